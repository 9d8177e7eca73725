//! Capture session state shared with observers

use std::fmt;

use chrono::{DateTime, Local};

use crate::error::{FramingError, TimeoutError, TransportError};

/// Which wire protocol a session captures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// One-shot `phasesnap` CSV burst
    Snapshot,
    /// Continuous JSON log stream
    Stream,
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMode::Snapshot => write!(f, "snapshot"),
            CaptureMode::Stream => write!(f, "stream"),
        }
    }
}

/// Lifecycle of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStatus {
    Idle,
    /// Command sent, no payload recognized yet
    Awaiting,
    /// Payload is arriving
    InProgress,
    Complete,
    Failed,
    Cancelled,
}

impl CaptureStatus {
    /// Awaiting or in progress
    pub fn is_active(&self) -> bool {
        matches!(self, CaptureStatus::Awaiting | CaptureStatus::InProgress)
    }

    /// Complete, failed or cancelled
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CaptureStatus::Complete | CaptureStatus::Failed | CaptureStatus::Cancelled
        )
    }
}

impl fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CaptureStatus::Idle => "idle",
            CaptureStatus::Awaiting => "awaiting",
            CaptureStatus::InProgress => "in progress",
            CaptureStatus::Complete => "complete",
            CaptureStatus::Failed => "failed",
            CaptureStatus::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Who cancelled a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelSource {
    User,
    EmergencyStop,
    Shutdown,
}

/// Why a session reached its terminal state
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalReason {
    /// Snapshot collected every row
    SnapshotComplete { samples: usize },
    /// Stream stopped on request and flushed
    StreamStopped { records: usize },
    Timeout(TimeoutError),
    Framing(FramingError),
    Transport(TransportError),
    Cancelled(CancelSource),
}

impl TerminalReason {
    /// Terminal status this reason leads to
    pub fn status(&self) -> CaptureStatus {
        match self {
            TerminalReason::SnapshotComplete { .. } | TerminalReason::StreamStopped { .. } => {
                CaptureStatus::Complete
            }
            TerminalReason::Timeout(_)
            | TerminalReason::Framing(_)
            | TerminalReason::Transport(_) => CaptureStatus::Failed,
            TerminalReason::Cancelled(_) => CaptureStatus::Cancelled,
        }
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalReason::SnapshotComplete { samples } => {
                write!(f, "complete: {} snapshot samples", samples)
            }
            TerminalReason::StreamStopped { records } => {
                write!(f, "complete: stream stopped after {} records", records)
            }
            TerminalReason::Timeout(e) => write!(f, "timeout: {}", e),
            TerminalReason::Framing(e) => write!(f, "framing: {}", e),
            TerminalReason::Transport(e) => write!(f, "transport: {}", e),
            TerminalReason::Cancelled(CancelSource::User) => write!(f, "cancelled by user"),
            TerminalReason::Cancelled(CancelSource::EmergencyStop) => {
                write!(f, "cancelled by emergency stop")
            }
            TerminalReason::Cancelled(CancelSource::Shutdown) => write!(f, "cancelled at shutdown"),
        }
    }
}

/// Observable state of the current (or last) capture session
///
/// Owned and mutated only by the capture state machine; observers receive
/// clones.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSession {
    /// Increments with every started capture; 0 before the first
    pub id: u64,
    pub mode: Option<CaptureMode>,
    pub status: CaptureStatus,
    pub started_at: Option<DateTime<Local>>,
    /// Samples or records accepted
    pub accepted: usize,
    /// Rows or records rejected as malformed
    pub rejected: u64,
    /// Set once the session reaches a terminal status
    pub reason: Option<TerminalReason>,
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::idle()
    }
}

impl CaptureSession {
    pub fn idle() -> Self {
        Self {
            id: 0,
            mode: None,
            status: CaptureStatus::Idle,
            started_at: None,
            accepted: 0,
            rejected: 0,
            reason: None,
        }
    }

    pub(crate) fn begin(id: u64, mode: CaptureMode) -> Self {
        Self {
            id,
            mode: Some(mode),
            status: CaptureStatus::Awaiting,
            started_at: Some(Local::now()),
            accepted: 0,
            rejected: 0,
            reason: None,
        }
    }

    pub(crate) fn finish(&mut self, reason: TerminalReason) {
        self.status = reason.status();
        self.reason = Some(reason);
    }
}
