//! # Error Types
//!
//! Custom error types for MESC capture using `thiserror`.
//!
//! The taxonomy mirrors how a failure is handled:
//! - [`TransportError`] is fatal to the current session, not to the engine
//! - [`FramingError`] is absorbed per row up to a budget, then fails the session
//! - [`TimeoutError`] fails the session
//! - [`StateError`] is returned synchronously and has no side effects

use thiserror::Error;

use crate::capture::session::CaptureStatus;

/// Serial link failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The port closed or returned end-of-stream
    #[error("serial link disconnected")]
    Disconnected,

    /// A read failed at the OS level
    #[error("serial read failed: {0}")]
    Read(String),

    /// A command could not be written or flushed
    #[error("serial write failed: {0}")]
    Write(String),

    /// A specific port could not be opened
    #[error("failed to open serial port: {0}")]
    Open(String),

    /// None of the candidate ports could be opened
    #[error("no serial port found (tried: {0})")]
    PortNotFound(String),
}

/// Payload framing failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// Too many rows in a snapshot frame failed to decode
    #[error("{skipped} malformed snapshot rows exceeded the limit of {limit}")]
    MalformedRows { skipped: u32, limit: u32 },

    /// The controller ended the snapshot frame early
    #[error("snapshot frame ended after {rows} of {expected} rows")]
    TruncatedFrame { rows: usize, expected: usize },

    /// Too many consecutive log records were rejected
    #[error("{consecutive} consecutive log records rejected (last: {last})")]
    MalformedRecords { consecutive: u32, last: String },
}

/// Idle window expirations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeoutError {
    /// No recognizable payload after the capture command was sent
    #[error("no response within {waited_ms} ms")]
    NoResponse { waited_ms: u64 },

    /// Data stopped arriving mid-capture
    #[error("stream stalled for {waited_ms} ms after {received} samples")]
    Stalled { waited_ms: u64, received: usize },
}

/// Requests that do not fit the current capture state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// A capture was requested while another one is active
    #[error("capture already in progress ({0})")]
    AlreadyActive(CaptureStatus),

    /// Stop or cancel was requested with no active capture
    #[error("no capture in progress")]
    NotActive,

    /// A stream capture was requested without channels
    #[error("stream capture needs at least one channel")]
    NoChannels,

    /// The stream buffer holds records of another channel set
    #[error("stream buffer holds [{buffered}], clear it before logging [{requested}]")]
    SchemaMismatch { buffered: String, requested: String },
}

/// Main error type for MESC capture
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Serial link errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol framing errors
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// Idle timeout errors
    #[error("Timeout error: {0}")]
    Timeout(#[from] TimeoutError),

    /// Capture state errors
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Export and import parse errors
    #[error("Export format error: {0}")]
    Format(String),

    /// The reader task is no longer running
    #[error("capture engine stopped")]
    EngineStopped,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for MESC capture
pub type Result<T> = std::result::Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_wraps_into_capture_error() {
        let err: CaptureError = TransportError::Disconnected.into();
        assert!(matches!(err, CaptureError::Transport(TransportError::Disconnected)));
        assert_eq!(err.to_string(), "Transport error: serial link disconnected");
    }

    #[test]
    fn test_state_error_names_active_status() {
        let err = StateError::AlreadyActive(CaptureStatus::InProgress);
        assert_eq!(err.to_string(), "capture already in progress (in progress)");
    }

    #[test]
    fn test_framing_error_messages() {
        let err = FramingError::TruncatedFrame { rows: 12, expected: 600 };
        assert_eq!(err.to_string(), "snapshot frame ended after 12 of 600 rows");

        let err = FramingError::MalformedRows { skipped: 6, limit: 5 };
        assert!(err.to_string().contains("limit of 5"));
    }
}
