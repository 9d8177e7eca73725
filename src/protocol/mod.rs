//! # MESC Console Protocol Module
//!
//! Text protocol spoken by the MESC firmware console.
//!
//! This module handles:
//! - Encoding outbound console commands (`phasesnap`, `log -r`, `log -a`, `log -s`)
//! - Turning the raw, ANSI-decorated byte stream into clean logical lines
//! - Framing and decoding the phase snapshot CSV burst
//! - Decoding the JSON log stream against a session-fixed channel schema

pub mod commands;
pub mod sanitizer;
pub mod snapshot;
pub mod stream;

pub use commands::Command;
pub use sanitizer::{LineSanitizer, RawLine};
pub use snapshot::{SnapshotEvent, SnapshotParser, SnapshotSample};
pub use stream::{ChannelSchema, LogRecord, StreamEvent, StreamParser};
