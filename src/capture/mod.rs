//! # Capture Module
//!
//! Session lifecycle, sample storage and CSV export.
//!
//! This module handles:
//! - Driving snapshot and stream sessions through their states
//! - Enforcing response and idle timeouts and the malformed-data budgets
//! - Keeping completed samples in bounded, copy-on-read buffers
//! - Running the reader task that owns the serial link

pub mod buffer;
pub mod engine;
pub mod export;
pub mod machine;
pub mod session;

pub use buffer::{CaptureStore, SampleBuffer, StreamBuffer, StreamResume, StreamSnapshot};
pub use engine::{CaptureEngine, EngineHandle};
pub use machine::{CaptureLimits, CaptureMachine};
pub use session::{CancelSource, CaptureMode, CaptureSession, CaptureStatus, TerminalReason};
