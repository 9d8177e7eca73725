//! Trait abstraction for serial port operations to enable testing

use async_trait::async_trait;
use std::io;

/// Trait for serial port I/O operations
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SerialPortIO: Send {
    /// Read whatever bytes are available, waiting for at least one
    ///
    /// `Ok(0)` means the port reached end-of-stream.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all data to the port
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;
}

/// Wrapper around tokio_serial::SerialStream that implements SerialPortIO
pub struct TokioSerialPort {
    port: tokio_serial::SerialStream,
}

impl TokioSerialPort {
    pub fn new(port: tokio_serial::SerialStream) -> Self {
        Self { port }
    }
}

#[async_trait]
impl SerialPortIO for TokioSerialPort {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use tokio::io::AsyncReadExt;
        self.port.read(buf).await
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.port.flush().await
    }
}
