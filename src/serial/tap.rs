//! # Traffic Tap
//!
//! Mirrors every command written and every chunk read on the serial link to
//! any number of observers (a console view, a session log). Publishing never
//! waits: a slow subscriber lags and loses events, the reader task does not.

use std::fmt;

use chrono::{DateTime, Local};
use tokio::sync::broadcast;

/// Default number of events a subscriber may fall behind before lagging
pub const DEFAULT_TAP_CAPACITY: usize = 1024;

/// Direction of observed traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to controller
    Tx,
    /// Controller to host
    Rx,
}

/// One observed write or read
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficEvent {
    pub direction: Direction,
    /// Wall-clock time the bytes were written or read
    pub at: DateTime<Local>,
    /// Raw text, escapes included
    pub text: String,
}

impl fmt::Display for TrafficEvent {
    /// Console style: `[14:03:07.120 TX] phasesnap`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = self.at.format("%H:%M:%S%.3f");
        match self.direction {
            Direction::Tx => write!(f, "[{} TX] {}", time, self.text.trim_end()),
            Direction::Rx => write!(f, "{}", self.text),
        }
    }
}

/// Broadcast tap over raw serial traffic
#[derive(Debug, Clone)]
pub struct TrafficTap {
    sender: broadcast::Sender<TrafficEvent>,
}

impl Default for TrafficTap {
    fn default() -> Self {
        Self::new(DEFAULT_TAP_CAPACITY)
    }
}

impl TrafficTap {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Start observing traffic from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TrafficEvent> {
        self.sender.subscribe()
    }

    pub fn sent(&self, bytes: &[u8]) {
        self.publish(Direction::Tx, bytes);
    }

    pub fn received(&self, bytes: &[u8]) {
        self.publish(Direction::Rx, bytes);
    }

    fn publish(&self, direction: Direction, bytes: &[u8]) {
        if self.sender.receiver_count() == 0 {
            return;
        }
        let event = TrafficEvent {
            direction,
            at: Local::now(),
            text: String::from_utf8_lossy(bytes).into_owned(),
        };
        // Only fails when every receiver is gone
        let _ = self.sender.send(event);
    }
}
