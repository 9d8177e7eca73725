//! # Serial Communication Module
//!
//! Handles the serial connection to the MESC console.
//!
//! This module handles:
//! - Opening the console port (8N1, no flow control)
//! - Async read/write through the [`SerialPortIO`] abstraction
//! - Framing the byte stream into sanitized lines with bounded waits
//! - Mirroring raw traffic to observers through [`TrafficTap`]

pub mod port_trait;
pub mod tap;
pub mod transport;

pub use port_trait::{SerialPortIO, TokioSerialPort};
pub use tap::{Direction, TrafficEvent, TrafficTap};
pub use transport::{ReadOutcome, Transport};

use crate::error::TransportError;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

/// Console device paths to try when none is configured (in order of preference)
pub const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyACM0", // USB CDC (MESC boards enumerate as ACM)
    "/dev/ttyUSB0", // USB-to-serial adapters
];

/// MESC console port opener
pub struct MescSerial;

impl MescSerial {
    /// Open the console at `path`
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Open` if the port cannot be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use mesc_capture::serial::MescSerial;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let port = MescSerial::open("/dev/ttyACM0", 115200)?;
    ///     Ok(())
    /// }
    /// ```
    pub fn open(path: &str, baud_rate: u32) -> Result<TokioSerialPort, TransportError> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| TransportError::Open(format!("{}: {}", path, e)))?;

        info!("Opened MESC console at {} ({} baud)", path, baud_rate);
        Ok(TokioSerialPort::new(port))
    }

    /// Open the first console that succeeds from `paths`
    ///
    /// # Returns
    ///
    /// The opened port and the path it was found at
    pub fn open_with_paths(
        paths: &[&str],
        baud_rate: u32,
    ) -> Result<(TokioSerialPort, String), TransportError> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open(path, baud_rate) {
                Ok(port) => return Ok((port, path.to_string())),
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(TransportError::PortNotFound(paths.join(", ")))
    }
}
