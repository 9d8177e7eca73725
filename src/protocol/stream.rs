//! # Log Stream Parser
//!
//! Decodes the continuous JSON log stream enabled with `log -a` / `log -s`.
//!
//! Each payload line is a flat JSON object of channel name to number:
//!
//! ```text
//! {"vbus":48.5,"Iu_avg":0.1}
//! ```
//!
//! The device sends no timestamp, so each record is stamped with the
//! monotonic arrival time of its line relative to an epoch supplied by the
//! caller (the stream buffer's, so timestamps keep increasing across
//! sessions appended to one buffer). Under scheduling jitter that drifts
//! from the true sample time.
//!
//! The channel set is fixed once per session by the first valid record. It
//! must contain every requested channel; extra keys in that first record are
//! merged into the schema. A session that continues a buffer starts with the
//! buffer's schema instead. Afterwards every record must carry exactly the
//! schema's keys or it is rejected whole.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, info};

use super::sanitizer::RawLine;
use crate::error::FramingError;

/// Ordered channel names of a log session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelSchema {
    names: Vec<String>,
}

impl ChannelSchema {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// One decoded log record
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Arrival time relative to the stream epoch
    pub timestamp: Duration,
    /// Channel set shared by every record of the session
    pub schema: Arc<ChannelSchema>,
    /// Values in schema order
    pub values: Vec<f64>,
}

impl LogRecord {
    /// Value of a channel by name
    pub fn get(&self, name: &str) -> Option<f64> {
        self.schema
            .index_of(name)
            .and_then(|i| self.values.get(i).copied())
    }

    /// `(name, value)` pairs in schema order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.schema
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }
}

/// Why a payload line was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum RecordError {
    /// Not valid JSON, or not an object
    Malformed(String),
    /// A key whose value is not a number
    NonNumeric(String),
    /// A schema (or requested) channel is absent
    MissingChannel(String),
    /// A key outside the session schema
    UnexpectedChannel(String),
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::Malformed(e) => write!(f, "malformed record: {}", e),
            RecordError::NonNumeric(key) => write!(f, "non-numeric value for '{}'", key),
            RecordError::MissingChannel(key) => write!(f, "missing channel '{}'", key),
            RecordError::UnexpectedChannel(key) => write!(f, "unexpected channel '{}'", key),
        }
    }
}

/// Outcome of feeding one line to the parser
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Not a payload line (command echo, prompt, banner)
    Ignored,
    /// A record was decoded
    Record(LogRecord),
    /// A payload line was dropped
    Rejected(RecordError),
    /// Too many consecutive rejections
    Failed(FramingError),
}

/// Incremental log stream parser
#[derive(Debug)]
pub struct StreamParser {
    requested: Vec<String>,
    schema: Option<Arc<ChannelSchema>>,
    epoch: Instant,
    rejected: u64,
    consecutive_rejected: u32,
    max_consecutive_rejected: u32,
}

impl StreamParser {
    /// Create a parser for a session that requested `channels`
    ///
    /// Records are timestamped relative to `epoch`. The session fails after
    /// more than `max_consecutive_rejected` rejections in a row.
    pub fn new(channels: Vec<String>, epoch: Instant, max_consecutive_rejected: u32) -> Self {
        Self {
            requested: channels,
            schema: None,
            epoch,
            rejected: 0,
            consecutive_rejected: 0,
            max_consecutive_rejected,
        }
    }

    /// Start with an already established schema instead of negotiating one
    pub fn with_schema(mut self, schema: Arc<ChannelSchema>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Schema fixed by the first valid record, if any
    pub fn schema(&self) -> Option<&Arc<ChannelSchema>> {
        self.schema.as_ref()
    }

    /// Total rejected payload lines
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Feed one sanitized line
    ///
    /// # Examples
    ///
    /// ```
    /// use mesc_capture::protocol::{RawLine, StreamEvent, StreamParser};
    /// use tokio::time::Instant;
    ///
    /// let start = Instant::now();
    /// let mut parser = StreamParser::new(vec!["vbus".into()], start, 20);
    ///
    /// assert_eq!(parser.feed(&RawLine::new("log -a vbus", start)), StreamEvent::Ignored);
    /// let StreamEvent::Record(record) = parser.feed(&RawLine::new(r#"{"vbus":48.5}"#, start)) else {
    ///     panic!("expected a record");
    /// };
    /// assert_eq!(record.get("vbus"), Some(48.5));
    /// ```
    pub fn feed(&mut self, line: &RawLine) -> StreamEvent {
        let text = line.text.trim();
        if !text.starts_with('{') {
            return StreamEvent::Ignored;
        }

        match self.decode(text) {
            Ok((schema, values)) => {
                self.consecutive_rejected = 0;
                let timestamp = line.arrived_at.saturating_duration_since(self.epoch);
                StreamEvent::Record(LogRecord {
                    timestamp,
                    schema,
                    values,
                })
            }
            Err(reason) => {
                self.rejected += 1;
                self.consecutive_rejected += 1;
                debug!("Rejected log record ({}): {:?}", reason, text);

                if self.consecutive_rejected > self.max_consecutive_rejected {
                    StreamEvent::Failed(FramingError::MalformedRecords {
                        consecutive: self.consecutive_rejected,
                        last: reason.to_string(),
                    })
                } else {
                    StreamEvent::Rejected(reason)
                }
            }
        }
    }

    fn decode(&mut self, text: &str) -> Result<(Arc<ChannelSchema>, Vec<f64>), RecordError> {
        let object: Map<String, Value> =
            serde_json::from_str(text).map_err(|e| RecordError::Malformed(e.to_string()))?;

        for (key, value) in &object {
            if !value.is_number() {
                return Err(RecordError::NonNumeric(key.clone()));
            }
        }

        let schema = match &self.schema {
            Some(schema) => Arc::clone(schema),
            None => {
                let schema = Arc::new(self.negotiate_schema(&object)?);
                info!("Log schema fixed: {}", schema.names().join(", "));
                self.schema = Some(Arc::clone(&schema));
                schema
            }
        };

        if let Some(extra) = object.keys().find(|k| schema.index_of(k).is_none()) {
            return Err(RecordError::UnexpectedChannel(extra.clone()));
        }

        let values = schema
            .names()
            .iter()
            .map(|name| {
                object
                    .get(name)
                    .and_then(Value::as_f64)
                    .ok_or_else(|| RecordError::MissingChannel(name.clone()))
            })
            .collect::<Result<Vec<f64>, _>>()?;
        Ok((schema, values))
    }

    /// Requested channels first, then any extra keys of the first record
    fn negotiate_schema(&self, first: &Map<String, Value>) -> Result<ChannelSchema, RecordError> {
        if let Some(missing) = self.requested.iter().find(|name| !first.contains_key(*name)) {
            return Err(RecordError::MissingChannel(missing.clone()));
        }

        let mut names = self.requested.clone();
        names.extend(
            first
                .keys()
                .filter(|key| !self.requested.contains(key))
                .cloned(),
        );
        Ok(ChannelSchema::new(names))
    }
}
