//! # Line Transport
//!
//! Owns the serial port for the reader task: writes console commands and
//! yields sanitized lines with a bounded wait.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use super::port_trait::SerialPortIO;
use super::tap::TrafficTap;
use crate::error::TransportError;
use crate::protocol::commands::Command;
use crate::protocol::sanitizer::{LineSanitizer, RawLine};

const READ_CHUNK_SIZE: usize = 512;

/// Result of waiting for a line
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// A complete sanitized line
    Line(RawLine),
    /// Nothing complete arrived within the wait
    Idle,
}

/// Serial port plus line framing and traffic tap
pub struct Transport<P: SerialPortIO> {
    port: P,
    sanitizer: LineSanitizer,
    ready: VecDeque<RawLine>,
    read_buf: Vec<u8>,
    tap: TrafficTap,
}

impl<P: SerialPortIO> std::fmt::Debug for Transport<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("ready_lines", &self.ready.len())
            .finish_non_exhaustive()
    }
}

impl<P: SerialPortIO> Transport<P> {
    /// Wrap an open port
    pub fn new(port: P, max_line_length: usize, tap: TrafficTap) -> Self {
        Self {
            port,
            sanitizer: LineSanitizer::new(max_line_length),
            ready: VecDeque::new(),
            read_buf: vec![0; READ_CHUNK_SIZE],
            tap,
        }
    }

    pub fn tap(&self) -> &TrafficTap {
        &self.tap
    }

    /// Send one console command and flush it
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Write` if the write or flush fails, or
    /// `TransportError::Disconnected` if the port is gone.
    pub async fn write_command(&mut self, command: &Command) -> Result<(), TransportError> {
        let bytes = command.encode();

        self.port.write_all(&bytes).await.map_err(write_error)?;
        self.port.flush().await.map_err(write_error)?;

        self.tap.sent(&bytes);
        debug!("Sent command: {}", command);
        Ok(())
    }

    /// Wait up to `wait` for the next complete line
    ///
    /// Lines already framed from an earlier read are returned immediately.
    /// Cancel-safe: dropping the future loses no bytes.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Disconnected` when the port reaches
    /// end-of-stream, `TransportError::Read` on other read failures.
    pub async fn read_line(&mut self, wait: Duration) -> Result<ReadOutcome, TransportError> {
        let deadline = Instant::now() + wait;

        loop {
            if let Some(line) = self.ready.pop_front() {
                return Ok(ReadOutcome::Line(line));
            }

            let n = match timeout_at(deadline, self.port.read(&mut self.read_buf)).await {
                Err(_) => return Ok(ReadOutcome::Idle),
                Ok(Ok(0)) => {
                    warn!("Serial port reached end-of-stream");
                    return Err(TransportError::Disconnected);
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(read_error(e)),
            };

            let chunk = &self.read_buf[..n];
            self.tap.received(chunk);
            let lines = self.sanitizer.feed(chunk, Instant::now());
            self.ready.extend(lines);
        }
    }

    /// Drop partially received text and any unread lines
    pub fn discard_pending(&mut self) {
        self.ready.clear();
        self.sanitizer.reset();
    }
}

fn is_disconnect(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    )
}

fn write_error(e: io::Error) -> TransportError {
    if is_disconnect(e.kind()) {
        TransportError::Disconnected
    } else {
        TransportError::Write(e.to_string())
    }
}

fn read_error(e: io::Error) -> TransportError {
    if is_disconnect(e.kind()) {
        TransportError::Disconnected
    } else {
        TransportError::Read(e.to_string())
    }
}
