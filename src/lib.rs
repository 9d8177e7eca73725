//! # MESC Capture Library
//!
//! Capture phase snapshots and live telemetry from a MESC motor controller
//! over its serial console.
//!
//! This library provides the transport, line sanitizing, payload parsers and
//! capture state machine behind the `mesc-capture` command line tool.

pub mod capture;
pub mod config;
pub mod error;
pub mod protocol;
pub mod serial;
