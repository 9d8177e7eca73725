//! # Sample Buffers
//!
//! Bounded, insertion-ordered storage for completed samples and records.
//!
//! [`SampleBuffer`] is a FIFO ring: pushing into a full buffer evicts the
//! oldest entry. [`CaptureStore`] holds the snapshot and stream buffers
//! behind locks so the reader task can write while observers take copies.
//! Observers never hold a lock across I/O; exports copy first, then write.

use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::time::Instant;
use tracing::{debug, warn};

use super::export;
use crate::error::StateError;
use crate::protocol::snapshot::{SnapshotSample, SNAPSHOT_SAMPLES};
use crate::protocol::stream::{ChannelSchema, LogRecord};

/// Default stream buffer capacity
pub const DEFAULT_STREAM_CAPACITY: usize = 1000;

/// Fixed-capacity FIFO ring
#[derive(Debug, Clone)]
pub struct SampleBuffer<T> {
    entries: VecDeque<T>,
    capacity: usize,
    evicted: u64,
}

impl<T: Clone> SampleBuffer<T> {
    /// Create an empty buffer; a zero capacity is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    /// Append an entry, evicting and returning the oldest one if full
    pub fn push(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() == self.capacity {
            self.evicted += 1;
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    /// Replace the whole content; keeps the newest `capacity` entries
    pub fn replace(&mut self, entries: Vec<T>) {
        let skip = entries.len().saturating_sub(self.capacity);
        self.entries.clear();
        self.entries.extend(entries.into_iter().skip(skip));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Copy of the content in insertion order
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries dropped by ring eviction since creation
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

impl SampleBuffer<SnapshotSample> {
    /// Buffer sized for exactly one snapshot
    pub fn for_snapshot() -> Self {
        Self::new(SNAPSHOT_SAMPLES)
    }

    /// Write the samples as CSV
    pub fn export_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        export::export_snapshot(path, &self.snapshot())
    }
}

/// Stream records together with the schema they were decoded against
///
/// Record timestamps count from the buffer's epoch, which is set when the
/// first session logs into an empty buffer and kept until [`clear`](Self::clear).
#[derive(Debug, Clone)]
pub struct StreamBuffer {
    schema: Option<Arc<ChannelSchema>>,
    epoch: Option<Instant>,
    records: SampleBuffer<LogRecord>,
}

/// Where a new log session continues the stream buffer
#[derive(Debug, Clone)]
pub struct StreamResume {
    pub epoch: Instant,
    /// Schema of the buffered records, `None` for an empty buffer
    pub schema: Option<Arc<ChannelSchema>>,
}

impl StreamBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            schema: None,
            epoch: None,
            records: SampleBuffer::new(capacity),
        }
    }

    /// Prepare for a log session of `channels` starting at `now`
    ///
    /// An empty buffer takes `now` as its epoch. A non-empty one keeps its
    /// epoch and schema; its schema must list `channels` first, in order.
    ///
    /// # Errors
    ///
    /// `StateError::SchemaMismatch` if the buffered records have another
    /// channel set. The buffer is left untouched.
    pub fn resume(&mut self, channels: &[String], now: Instant) -> Result<StreamResume, StateError> {
        if self.records.is_empty() {
            self.schema = None;
            self.epoch = Some(now);
            return Ok(StreamResume {
                epoch: now,
                schema: None,
            });
        }

        let schema = self.schema.clone();
        if let Some(buffered) = &schema {
            if !buffered.names().starts_with(channels) {
                return Err(StateError::SchemaMismatch {
                    buffered: buffered.names().join(", "),
                    requested: channels.join(", "),
                });
            }
        }
        let epoch = *self.epoch.get_or_insert(now);
        Ok(StreamResume { epoch, schema })
    }

    /// Append a record
    ///
    /// Returns the evicted record when the buffer was full.
    ///
    /// # Errors
    ///
    /// `StateError::SchemaMismatch` if the record's schema differs from the
    /// buffered records'; the record is not stored.
    pub fn push(&mut self, record: LogRecord) -> Result<Option<LogRecord>, StateError> {
        match &self.schema {
            Some(schema) if **schema != *record.schema => {
                return Err(StateError::SchemaMismatch {
                    buffered: schema.names().join(", "),
                    requested: record.schema.names().join(", "),
                });
            }
            Some(_) => {}
            None => {
                debug!("Stream buffer schema: {}", record.schema.names().join(", "));
                self.schema = Some(Arc::clone(&record.schema));
            }
        }
        Ok(self.records.push(record))
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.schema = None;
        self.epoch = None;
    }

    pub fn epoch(&self) -> Option<Instant> {
        self.epoch
    }

    pub fn schema(&self) -> Option<&Arc<ChannelSchema>> {
        self.schema.as_ref()
    }

    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.records.snapshot()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.records.capacity()
    }

    pub fn evicted(&self) -> u64 {
        self.records.evicted()
    }

    /// Write the records as CSV
    pub fn export_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let schema = self.schema.as_deref().cloned().unwrap_or_default();
        export::export_stream(path, &schema, &self.snapshot())
    }
}

/// Copy of the stream buffer taken for a consumer
#[derive(Debug, Clone, Default)]
pub struct StreamSnapshot {
    pub schema: Option<Arc<ChannelSchema>>,
    pub records: Vec<LogRecord>,
}

/// Snapshot and stream buffers shared between the reader task and observers
///
/// Only the capture engine mutates the store; everything public here reads
/// and returns owned copies.
#[derive(Debug)]
pub struct CaptureStore {
    snapshot: RwLock<SampleBuffer<SnapshotSample>>,
    stream: RwLock<StreamBuffer>,
}

impl CaptureStore {
    pub fn new(stream_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            snapshot: RwLock::new(SampleBuffer::for_snapshot()),
            stream: RwLock::new(StreamBuffer::new(stream_capacity)),
        })
    }

    /// Copy of the last complete snapshot (empty or exactly 600 samples)
    pub fn snapshot_samples(&self) -> Vec<SnapshotSample> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner).snapshot()
    }

    /// Copy of the buffered stream records
    pub fn stream_records(&self) -> StreamSnapshot {
        let stream = self.stream.read().unwrap_or_else(PoisonError::into_inner);
        StreamSnapshot {
            schema: stream.schema().cloned(),
            records: stream.snapshot(),
        }
    }

    pub fn snapshot_len(&self) -> usize {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn stream_len(&self) -> usize {
        self.stream.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Export the snapshot buffer without holding its lock during I/O
    pub fn export_snapshot<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let samples = self.snapshot_samples();
        export::export_snapshot(path, &samples)
    }

    /// Export the stream buffer without holding its lock during I/O
    pub fn export_stream<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let copy = self.stream_records();
        let schema = copy.schema.as_deref().cloned().unwrap_or_default();
        export::export_stream(path, &schema, &copy.records)
    }

    pub(crate) fn replace_snapshot(&self, samples: Vec<SnapshotSample>) {
        self.snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(samples);
    }

    pub(crate) fn clear_snapshot(&self) {
        self.snapshot.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub(crate) fn resume_stream(
        &self,
        channels: &[String],
        now: Instant,
    ) -> Result<StreamResume, StateError> {
        self.stream
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .resume(channels, now)
    }

    pub(crate) fn push_record(&self, record: LogRecord) {
        let result = self
            .stream
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        if let Err(e) = result {
            warn!("Log record not buffered: {}", e);
        }
    }

    pub(crate) fn clear_stream(&self) {
        self.stream.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
