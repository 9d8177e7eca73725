//! # Capture State Machine
//!
//! Synchronous core of a capture session. The engine feeds it requests,
//! sanitized lines and clock ticks; it decides state transitions, fills the
//! [`CaptureStore`] and tells the engine which commands to send.
//!
//! ```text
//!  Idle ──start──▶ Awaiting ──payload──▶ InProgress ──done/stop──▶ Complete
//!                     │                      │
//!                     └──timeout/error───────┴──▶ Failed
//!                     └──cancel──────────────┴──▶ Cancelled
//! ```
//!
//! Terminal states stay observable until the next start or an
//! [`acknowledge`](CaptureMachine::acknowledge).

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::buffer::CaptureStore;
use super::session::{CancelSource, CaptureMode, CaptureSession, CaptureStatus, TerminalReason};
use crate::config::Config;
use crate::error::{StateError, TimeoutError, TransportError};
use crate::protocol::commands::{self, Command};
use crate::protocol::sanitizer::RawLine;
use crate::protocol::snapshot::{SnapshotEvent, SnapshotParser};
use crate::protocol::stream::{StreamEvent, StreamParser};

/// Timeouts and error budgets applied to every session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureLimits {
    /// Wait for the first payload after the command was sent
    pub response_timeout: Duration,
    /// Longest silence tolerated once payload is arriving
    pub idle_timeout: Duration,
    pub max_malformed_rows: u32,
    pub max_consecutive_bad_records: u32,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl CaptureLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            response_timeout: config.capture.response_timeout(),
            idle_timeout: config.capture.idle_timeout(),
            max_malformed_rows: config.capture.max_malformed_rows,
            max_consecutive_bad_records: config.capture.max_consecutive_bad_records,
        }
    }
}

#[derive(Debug)]
enum ActiveParser {
    Snapshot(SnapshotParser),
    Stream {
        parser: StreamParser,
        interval: Duration,
    },
}

/// Capture session state machine
#[derive(Debug)]
pub struct CaptureMachine {
    session: CaptureSession,
    parser: Option<ActiveParser>,
    store: Arc<CaptureStore>,
    limits: CaptureLimits,
    last_activity: Instant,
}

impl CaptureMachine {
    pub fn new(store: Arc<CaptureStore>, limits: CaptureLimits) -> Self {
        Self {
            session: CaptureSession::idle(),
            parser: None,
            store,
            limits,
            last_activity: Instant::now(),
        }
    }

    pub fn session(&self) -> &CaptureSession {
        &self.session
    }

    pub fn store(&self) -> &Arc<CaptureStore> {
        &self.store
    }

    fn ensure_startable(&self) -> Result<(), StateError> {
        if self.session.status.is_active() {
            return Err(StateError::AlreadyActive(self.session.status));
        }
        Ok(())
    }

    fn begin(&mut self, mode: CaptureMode, parser: ActiveParser, now: Instant) {
        self.session = CaptureSession::begin(self.session.id + 1, mode);
        self.parser = Some(parser);
        self.last_activity = now;
        info!("Capture session {} started ({})", self.session.id, mode);
    }

    fn finish(&mut self, reason: TerminalReason) {
        self.parser = None;
        match reason.status() {
            CaptureStatus::Failed => warn!("Capture session {} {}", self.session.id, reason),
            _ => info!("Capture session {} {}", self.session.id, reason),
        }
        self.session.finish(reason);
    }

    /// Begin a phase snapshot
    ///
    /// Clears the snapshot buffer; a failed or cancelled snapshot leaves it
    /// empty rather than holding a previous frame next to a new attempt.
    ///
    /// # Errors
    ///
    /// `StateError::AlreadyActive` while a session is awaiting or in progress.
    pub fn start_snapshot(&mut self, now: Instant) -> Result<Vec<Command>, StateError> {
        self.ensure_startable()?;

        self.store.clear_snapshot();
        let parser = SnapshotParser::new(self.limits.max_malformed_rows);
        self.begin(CaptureMode::Snapshot, ActiveParser::Snapshot(parser), now);
        Ok(vec![Command::PhaseSnapshot])
    }

    /// Begin streaming `channels` every `interval_ms`
    ///
    /// Records are appended to the stream buffer. When it already holds
    /// records, the new session reuses their schema and timestamp epoch.
    ///
    /// # Errors
    ///
    /// `StateError::AlreadyActive` while a session is active,
    /// `StateError::NoChannels` if `channels` is empty,
    /// `StateError::SchemaMismatch` if the buffer holds other channels and
    /// must be cleared first.
    pub fn start_stream(
        &mut self,
        channels: Vec<String>,
        interval_ms: u64,
        now: Instant,
    ) -> Result<Vec<Command>, StateError> {
        self.ensure_startable()?;
        if channels.is_empty() {
            return Err(StateError::NoChannels);
        }

        let resume = self.store.resume_stream(&channels, now)?;
        let setup = commands::stream_setup_sequence(&channels, interval_ms);
        let mut parser =
            StreamParser::new(channels, resume.epoch, self.limits.max_consecutive_bad_records);
        if let Some(schema) = resume.schema {
            parser = parser.with_schema(schema);
        }
        self.begin(
            CaptureMode::Stream,
            ActiveParser::Stream {
                parser,
                interval: Duration::from_millis(interval_ms),
            },
            now,
        );
        Ok(setup)
    }

    /// Feed one sanitized line
    ///
    /// Returns commands to send best-effort, such as stopping a log stream
    /// that failed on malformed records.
    pub fn on_line(&mut self, line: &RawLine) -> Vec<Command> {
        match self.parser.as_mut() {
            None => Vec::new(),
            Some(ActiveParser::Snapshot(parser)) => {
                let event = parser.feed(&line.text);
                let rows = parser.rows_received();
                self.on_snapshot_event(event, rows, line.arrived_at);
                Vec::new()
            }
            Some(ActiveParser::Stream { parser, .. }) => {
                let event = parser.feed(line);
                let rejected = parser.rejected();
                self.on_stream_event(event, rejected, line.arrived_at)
            }
        }
    }

    fn on_snapshot_event(&mut self, event: SnapshotEvent, rows: usize, at: Instant) {
        match event {
            SnapshotEvent::Ignored => {}
            SnapshotEvent::HeaderFound => {
                self.session.status = CaptureStatus::InProgress;
                self.session.accepted = 0;
                self.session.rejected = 0;
                self.last_activity = at;
            }
            SnapshotEvent::Row => {
                self.session.accepted = rows;
                self.last_activity = at;
            }
            SnapshotEvent::Skipped(skipped) => {
                self.session.rejected = u64::from(skipped);
            }
            SnapshotEvent::Complete(samples) => {
                let count = samples.len();
                self.session.accepted = count;
                self.store.replace_snapshot(samples);
                self.finish(TerminalReason::SnapshotComplete { samples: count });
            }
            SnapshotEvent::Failed(e) => {
                self.finish(TerminalReason::Framing(e));
            }
        }
    }

    fn on_stream_event(&mut self, event: StreamEvent, rejected: u64, at: Instant) -> Vec<Command> {
        match event {
            StreamEvent::Ignored => Vec::new(),
            StreamEvent::Record(record) => {
                self.session.status = CaptureStatus::InProgress;
                self.session.accepted += 1;
                self.last_activity = at;
                self.store.push_record(record);
                Vec::new()
            }
            StreamEvent::Rejected(reason) => {
                debug!("Log record rejected: {}", reason);
                self.session.rejected = rejected;
                Vec::new()
            }
            StreamEvent::Failed(e) => {
                self.session.rejected = rejected;
                self.finish(TerminalReason::Framing(e));
                commands::stream_stop_sequence()
            }
        }
    }

    /// Longest silence allowed in the current state
    fn idle_window(&self) -> Option<Duration> {
        let interval = match self.parser.as_ref()? {
            ActiveParser::Snapshot(_) => Duration::ZERO,
            ActiveParser::Stream { interval, .. } => *interval,
        };
        match self.session.status {
            CaptureStatus::Awaiting => Some(self.limits.response_timeout + interval),
            CaptureStatus::InProgress => Some(self.limits.idle_timeout + interval * 2),
            _ => None,
        }
    }

    /// Check idle deadlines against `now`
    ///
    /// Returns commands to send best-effort if a stream timed out.
    pub fn on_tick(&mut self, now: Instant) -> Vec<Command> {
        let Some(window) = self.idle_window() else {
            return Vec::new();
        };
        let silent = now.saturating_duration_since(self.last_activity);
        if silent < window {
            return Vec::new();
        }

        let waited_ms = silent.as_millis() as u64;
        let error = match self.session.status {
            CaptureStatus::Awaiting => TimeoutError::NoResponse { waited_ms },
            _ => TimeoutError::Stalled {
                waited_ms,
                received: self.session.accepted,
            },
        };
        let was_stream = self.session.mode == Some(CaptureMode::Stream);
        self.finish(TerminalReason::Timeout(error));

        if was_stream {
            commands::stream_stop_sequence()
        } else {
            Vec::new()
        }
    }

    /// Stop the active session on request
    ///
    /// A stream completes with everything received so far. A snapshot cannot
    /// complete early, so stopping one cancels it.
    ///
    /// # Errors
    ///
    /// `StateError::NotActive` if nothing is awaiting or in progress.
    pub fn stop(&mut self) -> Result<Vec<Command>, StateError> {
        if !self.session.status.is_active() {
            return Err(StateError::NotActive);
        }

        match self.session.mode {
            Some(CaptureMode::Stream) => {
                let records = self.session.accepted;
                self.finish(TerminalReason::StreamStopped { records });
                Ok(commands::stream_stop_sequence())
            }
            _ => {
                self.finish(TerminalReason::Cancelled(CancelSource::User));
                Ok(Vec::new())
            }
        }
    }

    /// Abandon the active session
    ///
    /// # Errors
    ///
    /// `StateError::NotActive` if nothing is awaiting or in progress.
    pub fn cancel(&mut self, source: CancelSource) -> Result<Vec<Command>, StateError> {
        if !self.session.status.is_active() {
            return Err(StateError::NotActive);
        }

        let was_stream = self.session.mode == Some(CaptureMode::Stream);
        self.finish(TerminalReason::Cancelled(source));

        if was_stream {
            Ok(commands::stream_stop_sequence())
        } else {
            Ok(Vec::new())
        }
    }

    /// Fail the active session on a link error; no-op otherwise
    pub fn on_transport_error(&mut self, error: TransportError) {
        if self.session.status.is_active() {
            self.finish(TerminalReason::Transport(error));
        }
    }

    /// Return a terminal session to `Idle`
    ///
    /// # Errors
    ///
    /// `StateError::AlreadyActive` while a session is active.
    pub fn acknowledge(&mut self) -> Result<(), StateError> {
        self.ensure_startable()?;
        if self.session.status.is_terminal() {
            self.session = CaptureSession {
                id: self.session.id,
                ..CaptureSession::idle()
            };
        }
        Ok(())
    }

    /// Empty both buffers
    pub fn clear_buffers(&mut self) {
        self.store.clear_snapshot();
        self.store.clear_stream();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FramingError;
    use crate::protocol::snapshot::SNAPSHOT_SAMPLES;

    const HEADER: &str = "Ia, Ib, Ic, Va, Vb, Vc";

    fn machine() -> CaptureMachine {
        CaptureMachine::new(CaptureStore::new(1000), CaptureLimits::default())
    }

    fn line(text: &str, at: Instant) -> RawLine {
        RawLine::new(text, at)
    }

    fn row(i: usize) -> String {
        format!("{}, 0.5, -0.5, 12.0, 12.1, 11.9", i as f64 / 100.0)
    }

    fn channels() -> Vec<String> {
        vec!["vbus".to_string(), "Iu_avg".to_string()]
    }

    fn feed_snapshot(m: &mut CaptureMachine, rows: usize, at: Instant) {
        m.on_line(&line(HEADER, at));
        for i in 0..rows {
            m.on_line(&line(&row(i), at));
        }
    }

    #[test]
    fn test_snapshot_completes_after_all_rows() {
        let now = Instant::now();
        let mut m = machine();

        assert_eq!(m.start_snapshot(now).unwrap(), vec![Command::PhaseSnapshot]);
        assert_eq!(m.session().status, CaptureStatus::Awaiting);

        m.on_line(&line("phasesnap", now));
        m.on_line(&line("Mesc>", now));
        assert_eq!(m.session().status, CaptureStatus::Awaiting);

        feed_snapshot(&mut m, SNAPSHOT_SAMPLES, now);

        let session = m.session();
        assert_eq!(session.status, CaptureStatus::Complete);
        assert_eq!(
            session.reason,
            Some(TerminalReason::SnapshotComplete { samples: 600 })
        );
        let samples = m.store().snapshot_samples();
        assert_eq!(samples.len(), 600);
        assert_eq!(samples[599].timestamp, Duration::from_micros(599 * 50));
    }

    #[test]
    fn test_snapshot_in_progress_after_header() {
        let now = Instant::now();
        let mut m = machine();
        m.start_snapshot(now).unwrap();
        feed_snapshot(&mut m, 10, now);

        assert_eq!(m.session().status, CaptureStatus::InProgress);
        assert_eq!(m.session().accepted, 10);
        assert_eq!(m.store().snapshot_len(), 0);
    }

    #[test]
    fn test_start_while_active_is_rejected_without_side_effects() {
        let now = Instant::now();
        let mut m = machine();
        m.start_snapshot(now).unwrap();
        feed_snapshot(&mut m, 10, now);

        assert_eq!(
            m.start_snapshot(now),
            Err(StateError::AlreadyActive(CaptureStatus::InProgress))
        );
        assert_eq!(
            m.start_stream(channels(), 100, now),
            Err(StateError::AlreadyActive(CaptureStatus::InProgress))
        );
        assert_eq!(m.session().accepted, 10);
        assert_eq!(m.session().id, 1);
    }

    #[test]
    fn test_snapshot_malformed_budget() {
        let now = Instant::now();
        let mut m = machine();
        m.start_snapshot(now).unwrap();
        feed_snapshot(&mut m, 3, now);
        for _ in 0..6 {
            m.on_line(&line("1.0, nope, 2.0", now));
        }

        assert_eq!(m.session().status, CaptureStatus::Failed);
        assert_eq!(
            m.session().reason,
            Some(TerminalReason::Framing(FramingError::MalformedRows {
                skipped: 6,
                limit: 5
            }))
        );
        assert!(m.store().snapshot_samples().is_empty());
    }

    #[test]
    fn test_snapshot_stall_fails_and_discards_partial_frame() {
        let start = Instant::now();
        let mut m = machine();
        m.start_snapshot(start).unwrap();
        feed_snapshot(&mut m, 300, start);

        assert!(m.on_tick(start + Duration::from_millis(1999)).is_empty());
        assert_eq!(m.session().status, CaptureStatus::InProgress);

        m.on_tick(start + Duration::from_millis(2000));
        assert_eq!(m.session().status, CaptureStatus::Failed);
        assert!(matches!(
            m.session().reason,
            Some(TerminalReason::Timeout(TimeoutError::Stalled { received: 300, .. }))
        ));
        assert!(m.store().snapshot_samples().is_empty());
    }

    #[test]
    fn test_malformed_rows_do_not_extend_idle_window() {
        let start = Instant::now();
        let mut m = CaptureMachine::new(
            CaptureStore::new(1000),
            CaptureLimits {
                max_malformed_rows: 10,
                ..CaptureLimits::default()
            },
        );
        m.start_snapshot(start).unwrap();
        feed_snapshot(&mut m, 1, start);

        for i in 1..=5u64 {
            let at = start + Duration::from_millis(1900 * i);
            m.on_line(&line("1.0, nope, 2.0", at));
            m.on_tick(at);
            if i == 1 {
                assert_eq!(m.session().status, CaptureStatus::InProgress);
            }
        }
        assert_eq!(m.session().status, CaptureStatus::Failed);
        assert!(matches!(
            m.session().reason,
            Some(TerminalReason::Timeout(TimeoutError::Stalled { received: 1, .. }))
        ));
    }

    #[test]
    fn test_no_response_timeout() {
        let start = Instant::now();
        let mut m = machine();
        m.start_snapshot(start).unwrap();
        m.on_line(&line("phasesnap", start + Duration::from_millis(10)));

        m.on_tick(start + Duration::from_millis(2000));
        assert!(matches!(
            m.session().reason,
            Some(TerminalReason::Timeout(TimeoutError::NoResponse { waited_ms: 2000 }))
        ));
    }

    #[test]
    fn test_new_snapshot_clears_previous_frame() {
        let now = Instant::now();
        let mut m = machine();
        m.start_snapshot(now).unwrap();
        feed_snapshot(&mut m, SNAPSHOT_SAMPLES, now);
        assert_eq!(m.store().snapshot_len(), 600);

        m.start_snapshot(now).unwrap();
        assert_eq!(m.store().snapshot_len(), 0);
        assert_eq!(m.session().id, 2);
    }

    #[test]
    fn test_stream_setup_commands() {
        let mut m = machine();
        let commands = m.start_stream(channels(), 100, Instant::now()).unwrap();
        assert_eq!(
            commands,
            vec![
                Command::LogReset,
                Command::LogAdd("vbus".into()),
                Command::LogAdd("Iu_avg".into()),
                Command::LogInterval(100),
            ]
        );
    }

    #[test]
    fn test_stream_without_channels() {
        let mut m = machine();
        assert_eq!(
            m.start_stream(Vec::new(), 100, Instant::now()),
            Err(StateError::NoChannels)
        );
        assert_eq!(m.session().status, CaptureStatus::Idle);
    }

    #[test]
    fn test_stream_rejects_bad_record_and_continues() {
        let now = Instant::now();
        let mut m = machine();
        m.start_stream(channels(), 100, now).unwrap();

        m.on_line(&line(r#"{"vbus":48.5,"Iu_avg":0.1}"#, now));
        m.on_line(&line(r#"{"vbus":"#, now));

        assert_eq!(m.session().status, CaptureStatus::InProgress);
        assert_eq!(m.session().accepted, 1);
        assert_eq!(m.session().rejected, 1);
        assert_eq!(m.store().stream_len(), 1);
    }

    #[test]
    fn test_stream_fails_after_consecutive_rejects() {
        let now = Instant::now();
        let mut m = machine();
        m.start_stream(channels(), 100, now).unwrap();

        let mut followup = Vec::new();
        for _ in 0..21 {
            followup = m.on_line(&line("{broken", now));
        }
        assert_eq!(m.session().status, CaptureStatus::Failed);
        assert_eq!(followup, vec![Command::LogReset]);
    }

    #[test]
    fn test_rejected_records_do_not_extend_idle_window() {
        let start = Instant::now();
        let mut m = machine();
        m.start_stream(channels(), 100, start).unwrap();
        m.on_line(&line(r#"{"vbus":48.5,"Iu_avg":0.1}"#, start));

        // idle 2000 ms + 2 × 100 ms, counted from the last valid record
        m.on_line(&line("{broken", start + Duration::from_millis(2100)));
        assert!(m.on_tick(start + Duration::from_millis(2199)).is_empty());
        assert_eq!(m.on_tick(start + Duration::from_millis(2200)), vec![Command::LogReset]);
        assert_eq!(m.session().status, CaptureStatus::Failed);
    }

    #[test]
    fn test_second_stream_session_keeps_timestamps_ordered() {
        let start = Instant::now();
        let mut m = machine();
        m.start_stream(channels(), 100, start).unwrap();
        m.on_line(&line(
            r#"{"vbus":48.5,"Iu_avg":0.1}"#,
            start + Duration::from_secs(5),
        ));
        m.stop().unwrap();

        let restart = start + Duration::from_secs(15);
        m.start_stream(channels(), 100, restart).unwrap();
        m.on_line(&line(
            r#"{"vbus":48.6,"Iu_avg":0.2}"#,
            restart + Duration::from_millis(100),
        ));

        let records = m.store().stream_records().records;
        let stamps: Vec<Duration> = records.iter().map(|r| r.timestamp).collect();
        assert_eq!(
            stamps,
            vec![Duration::from_secs(5), Duration::from_millis(15_100)]
        );
    }

    #[test]
    fn test_stream_with_other_channels_needs_clear() {
        let now = Instant::now();
        let mut m = machine();
        m.start_stream(channels(), 100, now).unwrap();
        m.on_line(&line(r#"{"vbus":48.5,"Iu_avg":0.1}"#, now));
        m.stop().unwrap();

        assert!(matches!(
            m.start_stream(vec!["ehz".to_string()], 100, now),
            Err(StateError::SchemaMismatch { .. })
        ));
        assert_eq!(m.session().status, CaptureStatus::Complete);
        assert_eq!(m.store().stream_len(), 1);

        m.clear_buffers();
        assert!(m.start_stream(vec!["ehz".to_string()], 100, now).is_ok());
        assert_eq!(m.session().status, CaptureStatus::Awaiting);
    }

    #[test]
    fn test_stream_idle_window_includes_interval() {
        let start = Instant::now();
        let mut m = machine();
        m.start_stream(channels(), 500, start).unwrap();
        m.on_line(&line(r#"{"vbus":48.5,"Iu_avg":0.1}"#, start));

        // idle 2000 ms + 2 × 500 ms
        assert!(m.on_tick(start + Duration::from_millis(2999)).is_empty());
        assert_eq!(m.session().status, CaptureStatus::InProgress);

        assert_eq!(m.on_tick(start + Duration::from_millis(3000)), vec![Command::LogReset]);
        assert_eq!(m.session().status, CaptureStatus::Failed);
    }

    #[test]
    fn test_stop_stream_completes() {
        let now = Instant::now();
        let mut m = machine();
        m.start_stream(channels(), 100, now).unwrap();
        m.on_line(&line(r#"{"vbus":48.5,"Iu_avg":0.1}"#, now));
        m.on_line(&line(r#"{"vbus":48.6,"Iu_avg":0.2}"#, now));

        assert_eq!(m.stop().unwrap(), vec![Command::LogReset]);
        assert_eq!(m.session().status, CaptureStatus::Complete);
        assert_eq!(
            m.session().reason,
            Some(TerminalReason::StreamStopped { records: 2 })
        );
        assert_eq!(m.store().stream_len(), 2);
    }

    #[test]
    fn test_stop_snapshot_cancels() {
        let mut m = machine();
        m.start_snapshot(Instant::now()).unwrap();
        assert!(m.stop().unwrap().is_empty());
        assert_eq!(m.session().status, CaptureStatus::Cancelled);
    }

    #[test]
    fn test_stop_and_cancel_when_idle() {
        let mut m = machine();
        assert_eq!(m.stop(), Err(StateError::NotActive));
        assert_eq!(m.cancel(CancelSource::User), Err(StateError::NotActive));
    }

    #[test]
    fn test_cancel_stream_sends_log_reset() {
        let mut m = machine();
        m.start_stream(channels(), 100, Instant::now()).unwrap();
        assert_eq!(m.cancel(CancelSource::User).unwrap(), vec![Command::LogReset]);
        assert_eq!(
            m.session().reason,
            Some(TerminalReason::Cancelled(CancelSource::User))
        );
    }

    #[test]
    fn test_transport_error_fails_session_and_discards_snapshot() {
        let now = Instant::now();
        let mut m = machine();
        m.start_snapshot(now).unwrap();
        feed_snapshot(&mut m, 300, now);

        m.on_transport_error(TransportError::Disconnected);
        assert_eq!(m.session().status, CaptureStatus::Failed);
        assert_eq!(
            m.session().reason,
            Some(TerminalReason::Transport(TransportError::Disconnected))
        );
        assert!(m.store().snapshot_samples().is_empty());

        // Lines after the failure change nothing
        m.on_line(&line(&row(1), now));
        assert_eq!(m.session().status, CaptureStatus::Failed);
    }

    #[test]
    fn test_terminal_state_persists_until_acknowledged() {
        let mut m = machine();
        m.start_snapshot(Instant::now()).unwrap();
        m.cancel(CancelSource::User).unwrap();

        m.on_tick(Instant::now() + Duration::from_secs(60));
        assert_eq!(m.session().status, CaptureStatus::Cancelled);

        m.acknowledge().unwrap();
        assert_eq!(m.session().status, CaptureStatus::Idle);
        assert_eq!(m.session().id, 1);
        assert_eq!(m.session().reason, None);
    }

    #[test]
    fn test_acknowledge_while_active() {
        let mut m = machine();
        m.start_snapshot(Instant::now()).unwrap();
        assert_eq!(
            m.acknowledge(),
            Err(StateError::AlreadyActive(CaptureStatus::Awaiting))
        );
    }

    #[test]
    fn test_clear_buffers() {
        let now = Instant::now();
        let mut m = machine();
        m.start_stream(channels(), 100, now).unwrap();
        m.on_line(&line(r#"{"vbus":48.5,"Iu_avg":0.1}"#, now));
        m.clear_buffers();
        assert_eq!(m.store().stream_len(), 0);
    }
}
