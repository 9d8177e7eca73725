//! # Phase Snapshot Parser
//!
//! Frames and decodes the `phasesnap` CSV burst.
//!
//! ## Wire format
//!
//! ```text
//! phasesnap                         <- command echo (ignored)
//! Capturing phase current...        <- banner (ignored)
//! Ia, Ib, Ic, Va, Vb, Vc            <- header, the only frame-start signal
//! 0.076, 0.174, -0.074, 0.588, ...  <- exactly 600 rows
//! Snapshot output complete          <- trailing banner
//! ```
//!
//! Sample time is not transmitted. The controller samples at a fixed 20 kHz,
//! so row `i` is stamped `i × 50 µs` from its position in the frame.
//!
//! Current balance (Ia + Ib + Ic ≈ 0) is deliberately not checked here; rows
//! are accepted on shape alone and balance is left to analysis.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::FramingError;

/// Rows in a complete snapshot
pub const SNAPSHOT_SAMPLES: usize = 600;

/// Controller PWM/sample rate during a snapshot
pub const SNAPSHOT_SAMPLE_RATE_HZ: u32 = 20_000;

/// Time between consecutive snapshot rows (1 / 20 kHz)
pub const SNAPSHOT_SAMPLE_PERIOD: Duration = Duration::from_micros(50);

/// Channel names in header order
pub const SNAPSHOT_CHANNELS: [&str; 6] = ["Ia", "Ib", "Ic", "Va", "Vb", "Vc"];

/// Banner printed by the controller after the last row
pub const SNAPSHOT_END_BANNER: &str = "Snapshot output complete";

/// One decoded snapshot row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotSample {
    /// Offset from the first row, reconstructed from the row index
    pub timestamp: Duration,
    /// Phase A current (A)
    pub ia: f64,
    /// Phase B current (A)
    pub ib: f64,
    /// Phase C current (A)
    pub ic: f64,
    /// Phase A voltage (V)
    pub va: f64,
    /// Phase B voltage (V)
    pub vb: f64,
    /// Phase C voltage (V)
    pub vc: f64,
}

impl SnapshotSample {
    /// Build the sample for row `index` of a frame
    pub fn from_row(index: usize, values: [f64; 6]) -> Self {
        let [ia, ib, ic, va, vb, vc] = values;
        Self {
            timestamp: sample_timestamp(index),
            ia,
            ib,
            ic,
            va,
            vb,
            vc,
        }
    }

    /// Channel values in header order
    pub fn values(&self) -> [f64; 6] {
        [self.ia, self.ib, self.ic, self.va, self.vb, self.vc]
    }

    /// Mean phase voltage, a rough stand-in for the bus voltage
    pub fn vbus_approx(&self) -> f64 {
        (self.va + self.vb + self.vc) / 3.0
    }
}

/// Exact timestamp of row `index` at the fixed snapshot rate
pub fn sample_timestamp(index: usize) -> Duration {
    SNAPSHOT_SAMPLE_PERIOD * index as u32
}

/// Outcome of feeding one line to the parser
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotEvent {
    /// Line was outside the frame (echo, banner, prompt)
    Ignored,
    /// Header seen, frame collection started
    HeaderFound,
    /// A data row was accepted
    Row,
    /// A malformed row was skipped; carries the running skip count
    Skipped(u32),
    /// All rows received
    Complete(Vec<SnapshotSample>),
    /// The frame cannot complete
    Failed(FramingError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    /// Waiting for the header row
    Armed,
    /// Header seen, collecting rows
    Collecting,
    /// Completed or failed; further lines are ignored
    Done,
}

/// Incremental snapshot frame parser
///
/// Armed when created; discards lines until the header appears, then
/// collects rows until [`SNAPSHOT_SAMPLES`] have been decoded.
#[derive(Debug)]
pub struct SnapshotParser {
    state: FrameState,
    rows: Vec<SnapshotSample>,
    skipped: u32,
    max_skipped: u32,
}

impl SnapshotParser {
    /// Create an armed parser that fails after more than `max_skipped` malformed rows
    pub fn new(max_skipped: u32) -> Self {
        Self {
            state: FrameState::Armed,
            rows: Vec::with_capacity(SNAPSHOT_SAMPLES),
            skipped: 0,
            max_skipped,
        }
    }

    /// Whether the header has been seen
    pub fn in_frame(&self) -> bool {
        self.state == FrameState::Collecting
    }

    /// Rows decoded so far
    pub fn rows_received(&self) -> usize {
        self.rows.len()
    }

    /// Malformed rows skipped so far
    pub fn skipped_rows(&self) -> u32 {
        self.skipped
    }

    /// Feed one sanitized line
    ///
    /// # Examples
    ///
    /// ```
    /// use mesc_capture::protocol::{SnapshotEvent, SnapshotParser};
    ///
    /// let mut parser = SnapshotParser::new(5);
    /// assert_eq!(parser.feed("phasesnap"), SnapshotEvent::Ignored);
    /// assert_eq!(parser.feed("Ia, Ib, Ic, Va, Vb, Vc"), SnapshotEvent::HeaderFound);
    /// assert_eq!(parser.feed("0.1, 0.2, -0.3, 1.0, 1.0, 1.0"), SnapshotEvent::Row);
    /// ```
    pub fn feed(&mut self, line: &str) -> SnapshotEvent {
        match self.state {
            FrameState::Done => SnapshotEvent::Ignored,
            FrameState::Armed => {
                if is_header(line) {
                    debug!("Snapshot header found");
                    self.state = FrameState::Collecting;
                    SnapshotEvent::HeaderFound
                } else {
                    SnapshotEvent::Ignored
                }
            }
            FrameState::Collecting => self.feed_in_frame(line),
        }
    }

    fn feed_in_frame(&mut self, line: &str) -> SnapshotEvent {
        if line.contains(SNAPSHOT_END_BANNER) {
            self.state = FrameState::Done;
            return SnapshotEvent::Failed(FramingError::TruncatedFrame {
                rows: self.rows.len(),
                expected: SNAPSHOT_SAMPLES,
            });
        }

        if is_header(line) {
            // The controller restarted its output; the earlier rows belong to no frame
            warn!("Snapshot header repeated after {} rows, restarting frame", self.rows.len());
            self.rows.clear();
            self.skipped = 0;
            return SnapshotEvent::HeaderFound;
        }

        match decode_row(line) {
            Some(values) => {
                let index = self.rows.len();
                self.rows.push(SnapshotSample::from_row(index, values));

                if self.rows.len() == SNAPSHOT_SAMPLES {
                    self.state = FrameState::Done;
                    SnapshotEvent::Complete(std::mem::take(&mut self.rows))
                } else {
                    SnapshotEvent::Row
                }
            }
            None => {
                self.skipped += 1;
                debug!("Skipped malformed snapshot row {}: {:?}", self.skipped, line);

                if self.skipped > self.max_skipped {
                    self.state = FrameState::Done;
                    SnapshotEvent::Failed(FramingError::MalformedRows {
                        skipped: self.skipped,
                        limit: self.max_skipped,
                    })
                } else {
                    SnapshotEvent::Skipped(self.skipped)
                }
            }
        }
    }
}

/// Whether `line` is the snapshot header (case-insensitive, in order)
pub fn is_header(line: &str) -> bool {
    let mut fields = line.split(',').map(str::trim);
    SNAPSHOT_CHANNELS
        .iter()
        .all(|name| fields.next().is_some_and(|f| f.eq_ignore_ascii_case(name)))
        && fields.next().is_none()
}

/// Decode one data row into six finite values
///
/// Returns `None` unless the row has exactly six comma-separated decimal numbers.
pub fn decode_row(line: &str) -> Option<[f64; 6]> {
    let mut values = [0.0; 6];
    let mut count = 0;

    for field in line.split(',') {
        if count == values.len() {
            return None;
        }
        let value: f64 = field.trim().parse().ok()?;
        if !value.is_finite() {
            return None;
        }
        values[count] = value;
        count += 1;
    }

    (count == values.len()).then_some(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Ia, Ib, Ic, Va, Vb, Vc";
    const ROW: &str = "0.1,0.2,-0.3,1.0,1.0,1.0";

    fn feed_rows(parser: &mut SnapshotParser, count: usize) -> Vec<SnapshotEvent> {
        (0..count).map(|_| parser.feed(ROW)).collect()
    }

    #[test]
    fn test_constants() {
        assert_eq!(SNAPSHOT_SAMPLES, 600);
        assert_eq!(
            SNAPSHOT_SAMPLE_PERIOD,
            Duration::from_secs(1) / SNAPSHOT_SAMPLE_RATE_HZ
        );
    }

    #[test]
    fn test_header_detection() {
        assert!(is_header(HEADER));
        assert!(is_header("ia,ib,ic,va,vb,vc"));
        assert!(is_header("  IA , IB , IC , VA , VB , VC  "));
        assert!(!is_header("Ia, Ib, Ic, Va, Vb"));
        assert!(!is_header("Ia, Ib, Ic, Va, Vb, Vc, Vbus"));
        assert!(!is_header("Ib, Ia, Ic, Va, Vb, Vc"));
        assert!(!is_header("Capturing phase current..."));
    }

    #[test]
    fn test_decode_row() {
        assert_eq!(
            decode_row("0.076, 0.174, -0.074, 0.588, 0.634, 0.785"),
            Some([0.076, 0.174, -0.074, 0.588, 0.634, 0.785])
        );
        assert_eq!(decode_row("1,2,3,4,5,6"), Some([1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
        assert_eq!(decode_row("1,2,3,4,5"), None);
        assert_eq!(decode_row("1,2,3,4,5,6,7"), None);
        assert_eq!(decode_row("1,2,x,4,5,6"), None);
        assert_eq!(decode_row("1,2,,4,5,6"), None);
        assert_eq!(decode_row("1,2,NaN,4,5,6"), None);
        assert_eq!(decode_row("1,2,inf,4,5,6"), None);
        assert_eq!(decode_row(""), None);
    }

    #[test]
    fn test_noise_before_header_ignored() {
        let mut parser = SnapshotParser::new(5);
        assert_eq!(parser.feed("phasesnap"), SnapshotEvent::Ignored);
        assert_eq!(parser.feed("Capturing phase current..."), SnapshotEvent::Ignored);
        // Rows before the header are not data
        assert_eq!(parser.feed(ROW), SnapshotEvent::Ignored);
        assert!(!parser.in_frame());
        assert_eq!(parser.feed(HEADER), SnapshotEvent::HeaderFound);
        assert!(parser.in_frame());
    }

    #[test]
    fn test_full_frame_completes_with_exact_timestamps() {
        let mut parser = SnapshotParser::new(5);
        parser.feed(HEADER);

        let events = feed_rows(&mut parser, SNAPSHOT_SAMPLES);
        assert!(events[..SNAPSHOT_SAMPLES - 1].iter().all(|e| *e == SnapshotEvent::Row));

        let SnapshotEvent::Complete(samples) = &events[SNAPSHOT_SAMPLES - 1] else {
            panic!("expected Complete, got {:?}", events.last());
        };
        assert_eq!(samples.len(), SNAPSHOT_SAMPLES);
        for (i, sample) in samples.iter().enumerate() {
            assert_eq!(sample.timestamp, Duration::from_micros(50 * i as u64));
            assert_eq!(sample.values(), [0.1, 0.2, -0.3, 1.0, 1.0, 1.0]);
        }
    }

    #[test]
    fn test_lines_after_completion_ignored() {
        let mut parser = SnapshotParser::new(5);
        parser.feed(HEADER);
        feed_rows(&mut parser, SNAPSHOT_SAMPLES);
        assert_eq!(parser.feed(SNAPSHOT_END_BANNER), SnapshotEvent::Ignored);
        assert_eq!(parser.feed(ROW), SnapshotEvent::Ignored);
    }

    #[test]
    fn test_malformed_rows_skipped_within_budget() {
        let mut parser = SnapshotParser::new(5);
        parser.feed(HEADER);
        assert_eq!(parser.feed("0.1,0.2"), SnapshotEvent::Skipped(1));
        assert_eq!(parser.feed("garbage"), SnapshotEvent::Skipped(2));
        assert_eq!(parser.feed(ROW), SnapshotEvent::Row);
        assert_eq!(parser.rows_received(), 1);
        assert_eq!(parser.skipped_rows(), 2);
    }

    #[test]
    fn test_skipped_rows_do_not_shift_timestamps() {
        let mut parser = SnapshotParser::new(5);
        parser.feed(HEADER);
        parser.feed(ROW);
        parser.feed("bad row");
        feed_rows(&mut parser, SNAPSHOT_SAMPLES - 2);
        let SnapshotEvent::Complete(samples) = parser.feed(ROW) else {
            panic!("expected Complete");
        };
        assert_eq!(samples[1].timestamp, Duration::from_micros(50));
    }

    #[test]
    fn test_malformed_budget_exceeded_fails() {
        let mut parser = SnapshotParser::new(5);
        parser.feed(HEADER);
        for i in 1..=5 {
            assert_eq!(parser.feed("bad"), SnapshotEvent::Skipped(i));
        }
        assert_eq!(
            parser.feed("bad"),
            SnapshotEvent::Failed(FramingError::MalformedRows { skipped: 6, limit: 5 })
        );
        assert_eq!(parser.feed(ROW), SnapshotEvent::Ignored);
    }

    #[test]
    fn test_end_banner_before_full_frame_fails() {
        let mut parser = SnapshotParser::new(5);
        parser.feed(HEADER);
        feed_rows(&mut parser, 42);
        assert_eq!(
            parser.feed(SNAPSHOT_END_BANNER),
            SnapshotEvent::Failed(FramingError::TruncatedFrame { rows: 42, expected: 600 })
        );
    }

    #[test]
    fn test_repeated_header_restarts_frame() {
        let mut parser = SnapshotParser::new(5);
        parser.feed(HEADER);
        feed_rows(&mut parser, 10);
        parser.feed("bad");
        assert_eq!(parser.feed(HEADER), SnapshotEvent::HeaderFound);
        assert_eq!(parser.rows_received(), 0);
        assert_eq!(parser.skipped_rows(), 0);
    }

    #[test]
    fn test_vbus_approx() {
        let sample = SnapshotSample::from_row(0, [0.0, 0.0, 0.0, 1.0, 2.0, 3.0]);
        assert!((sample.vbus_approx() - 2.0).abs() < 1e-12);
    }
}
