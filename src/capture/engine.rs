//! # Capture Engine
//!
//! Async task that owns the serial [`Transport`] and the [`CaptureMachine`].
//!
//! The engine is the only writer of session state and buffers. Control
//! requests arrive over an mpsc channel and are answered on a oneshot, so a
//! request that fails validation is rejected before anything is sent to the
//! controller. Session changes are published on a `watch` channel; raw
//! traffic is mirrored on the transport's broadcast tap.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::buffer::{CaptureStore, StreamSnapshot};
use super::machine::{CaptureLimits, CaptureMachine};
use super::session::{CancelSource, CaptureSession};
use crate::config::Config;
use crate::error::{CaptureError, Result, StateError, TransportError};
use crate::protocol::commands::{self, Command};
use crate::protocol::snapshot::SnapshotSample;
use crate::serial::{ReadOutcome, SerialPortIO, TrafficEvent, TrafficTap, Transport};

const REQUEST_QUEUE_DEPTH: usize = 32;

type Reply = oneshot::Sender<Result<()>>;

#[derive(Debug)]
enum Request {
    StartSnapshot(Reply),
    StartStream {
        channels: Vec<String>,
        interval_ms: u64,
        reply: Reply,
    },
    Stop(Reply),
    Cancel(Reply),
    EmergencyStop(Reply),
    Acknowledge(Reply),
    ClearBuffers(Reply),
    Send(Command, Reply),
    Shutdown(oneshot::Sender<()>),
}

/// Reader task for one serial link
pub struct CaptureEngine<P: SerialPortIO> {
    transport: Transport<P>,
    machine: CaptureMachine,
    requests: mpsc::Receiver<Request>,
    status: watch::Sender<CaptureSession>,
    read_tick: Duration,
}

impl<P: SerialPortIO> CaptureEngine<P> {
    /// Build an engine around an open port
    ///
    /// The engine does nothing until [`run`](Self::run) is awaited or
    /// spawned; the returned handle can be cloned freely.
    pub fn new(port: P, config: &Config) -> (Self, EngineHandle) {
        let store = CaptureStore::new(config.stream.capacity);
        let tap = TrafficTap::default();
        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let (status_tx, status_rx) = watch::channel(CaptureSession::idle());

        let engine = Self {
            transport: Transport::new(port, config.capture.max_line_length, tap.clone()),
            machine: CaptureMachine::new(Arc::clone(&store), CaptureLimits::from_config(config)),
            requests: request_rx,
            status: status_tx,
            read_tick: config.serial.read_tick(),
        };
        let handle = EngineHandle {
            requests: request_tx,
            status: status_rx,
            store,
            tap,
        };
        (engine, handle)
    }

    /// Run until shut down or the link is lost
    ///
    /// A failed read fails the active session and the engine keeps serving;
    /// only a disconnected link ends the task.
    ///
    /// # Errors
    ///
    /// Returns `CaptureError::Transport` when the port disconnects. The
    /// active session, if any, is marked failed and published first.
    pub async fn run(mut self) -> Result<()> {
        info!("Capture engine running");

        loop {
            tokio::select! {
                biased;

                request = self.requests.recv() => match request {
                    Some(Request::Shutdown(reply)) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        return Ok(());
                    }
                    Some(request) => self.handle_request(request).await,
                    None => {
                        debug!("All engine handles dropped");
                        self.shutdown().await;
                        return Ok(());
                    }
                },

                outcome = self.transport.read_line(self.read_tick) => {
                    match outcome {
                        Ok(ReadOutcome::Line(line)) => {
                            let followup = self.machine.on_line(&line);
                            self.send_best_effort(followup).await;
                        }
                        Ok(ReadOutcome::Idle) => {}
                        Err(TransportError::Disconnected) => {
                            error!("Serial link lost");
                            self.machine.on_transport_error(TransportError::Disconnected);
                            self.publish();
                            return Err(TransportError::Disconnected.into());
                        }
                        Err(e) => {
                            warn!("Serial read failed: {}", e);
                            self.machine.on_transport_error(e);
                            self.publish();
                            tokio::time::sleep(self.read_tick).await;
                        }
                    }

                    let followup = self.machine.on_tick(Instant::now());
                    self.send_best_effort(followup).await;
                    self.publish();
                }
            }
        }
    }

    async fn handle_request(&mut self, request: Request) {
        match request {
            Request::StartSnapshot(reply) => {
                let result = self.start_snapshot().await;
                let _ = reply.send(result);
            }
            Request::StartStream {
                channels,
                interval_ms,
                reply,
            } => {
                let result = self.start_stream(channels, interval_ms).await;
                let _ = reply.send(result);
            }
            Request::Stop(reply) => {
                let result = self.stop().await;
                let _ = reply.send(result);
            }
            Request::Cancel(reply) => {
                let result = self.cancel(CancelSource::User).await;
                let _ = reply.send(result);
            }
            Request::EmergencyStop(reply) => {
                let result = self.emergency_stop().await;
                let _ = reply.send(result);
            }
            Request::Acknowledge(reply) => {
                let result = self.machine.acknowledge().map_err(CaptureError::from);
                self.publish();
                let _ = reply.send(result);
            }
            Request::ClearBuffers(reply) => {
                self.machine.clear_buffers();
                let _ = reply.send(Ok(()));
            }
            Request::Send(command, reply) => {
                let result = self
                    .transport
                    .write_command(&command)
                    .await
                    .map_err(CaptureError::from);
                let _ = reply.send(result);
            }
            Request::Shutdown(_) => {}
        }
    }

    async fn start_snapshot(&mut self) -> Result<()> {
        let commands = self.machine.start_snapshot(Instant::now())?;
        self.transport.discard_pending();
        self.publish();
        self.send_start_commands(commands).await
    }

    async fn start_stream(&mut self, channels: Vec<String>, interval_ms: u64) -> Result<()> {
        let commands = self
            .machine
            .start_stream(channels, interval_ms, Instant::now())?;
        self.transport.discard_pending();
        self.publish();
        self.send_start_commands(commands).await
    }

    /// A failed start command fails the new session
    async fn send_start_commands(&mut self, commands: Vec<Command>) -> Result<()> {
        for command in &commands {
            if let Err(e) = self.transport.write_command(command).await {
                error!("Failed to send '{}': {}", command, e);
                self.machine.on_transport_error(e.clone());
                self.publish();
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let commands = self.machine.stop()?;
        self.publish();
        self.send_best_effort(commands).await;
        Ok(())
    }

    async fn cancel(&mut self, source: CancelSource) -> Result<()> {
        let commands = self.machine.cancel(source)?;
        self.publish();
        self.send_best_effort(commands).await;
        Ok(())
    }

    /// Cancel locally first, zero the motor requests, then stop logging
    ///
    /// Runs whether or not a capture is active. Every zeroing command is
    /// attempted even if an earlier one fails.
    async fn emergency_stop(&mut self) -> Result<()> {
        warn!("Emergency stop requested");
        if self.machine.cancel(CancelSource::EmergencyStop).is_ok() {
            self.publish();
        }

        let mut result = Ok(());
        for command in commands::emergency_stop_sequence() {
            if let Err(e) = self.transport.write_command(&command).await {
                error!("Emergency stop command '{}' failed: {}", command, e);
                if result.is_ok() {
                    result = Err(CaptureError::from(e));
                }
            }
        }

        self.send_best_effort(commands::stream_stop_sequence()).await;
        result
    }

    async fn shutdown(&mut self) {
        info!("Capture engine shutting down");
        if let Ok(commands) = self.machine.cancel(CancelSource::Shutdown) {
            self.publish();
            self.send_best_effort(commands).await;
        }
    }

    async fn send_best_effort(&mut self, commands: Vec<Command>) {
        for command in &commands {
            match self.transport.write_command(command).await {
                Ok(()) => {}
                Err(TransportError::Disconnected) => {
                    warn!("Link lost, not sending '{}'", command);
                    break;
                }
                Err(e) => warn!("Failed to send '{}': {}", command, e),
            }
        }
    }

    fn publish(&self) {
        let current = self.machine.session();
        self.status.send_if_modified(|published| {
            if published != current {
                *published = current.clone();
                true
            } else {
                false
            }
        });
    }
}

/// Cloneable control surface of a running [`CaptureEngine`]
#[derive(Clone)]
pub struct EngineHandle {
    requests: mpsc::Sender<Request>,
    status: watch::Receiver<CaptureSession>,
    store: Arc<CaptureStore>,
    tap: TrafficTap,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("session", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl EngineHandle {
    async fn request(&self, make: impl FnOnce(Reply) -> Request) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(make(reply_tx))
            .await
            .map_err(|_| CaptureError::EngineStopped)?;
        reply_rx.await.map_err(|_| CaptureError::EngineStopped)?
    }

    /// Request a phase snapshot
    ///
    /// Returns once `phasesnap` has been sent; completion is observed through
    /// [`subscribe`](Self::subscribe) or [`wait_for_terminal`](Self::wait_for_terminal).
    pub async fn start_snapshot(&self) -> Result<()> {
        self.request(Request::StartSnapshot).await
    }

    /// Configure and start the log stream
    pub async fn start_stream(&self, channels: Vec<String>, interval_ms: u64) -> Result<()> {
        self.request(|reply| Request::StartStream {
            channels,
            interval_ms,
            reply,
        })
        .await
    }

    /// Stop the active capture; a stream completes, a snapshot is cancelled
    pub async fn stop(&self) -> Result<()> {
        self.request(Request::Stop).await
    }

    /// Stop the active capture if there still is one
    ///
    /// Returns `false` when the session had already ended on its own.
    pub async fn stop_if_active(&self) -> Result<bool> {
        match self.stop().await {
            Ok(()) => Ok(true),
            Err(CaptureError::State(StateError::NotActive)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Cancel the active capture
    pub async fn cancel(&self) -> Result<()> {
        self.request(Request::Cancel).await
    }

    /// Zero all motor requests, cancelling any capture first
    pub async fn emergency_stop(&self) -> Result<()> {
        self.request(Request::EmergencyStop).await
    }

    /// Return a finished session to idle
    pub async fn acknowledge(&self) -> Result<()> {
        self.request(Request::Acknowledge).await
    }

    /// Empty the snapshot and stream buffers
    pub async fn clear_buffers(&self) -> Result<()> {
        self.request(Request::ClearBuffers).await
    }

    /// Send an arbitrary console command
    pub async fn send_command(&self, command: Command) -> Result<()> {
        self.request(|reply| Request::Send(command, reply)).await
    }

    /// Cancel any capture and stop the engine task
    pub async fn shutdown(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(Request::Shutdown(reply_tx))
            .await
            .map_err(|_| CaptureError::EngineStopped)?;
        reply_rx.await.map_err(|_| CaptureError::EngineStopped)
    }

    /// Current session state
    pub fn session(&self) -> CaptureSession {
        self.status.borrow().clone()
    }

    /// Receiver notified on every session change
    pub fn subscribe(&self) -> watch::Receiver<CaptureSession> {
        self.status.clone()
    }

    /// Wait until the session reaches a terminal state
    ///
    /// Returns immediately if it already has one.
    pub async fn wait_for_terminal(&self) -> Result<CaptureSession> {
        self.wait_for(|s| s.status.is_terminal()).await
    }

    /// Wait until the session satisfies `predicate`
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&CaptureSession) -> bool,
    ) -> Result<CaptureSession> {
        let mut status = self.status.clone();
        let session = status
            .wait_for(predicate)
            .await
            .map_err(|_| CaptureError::EngineStopped)?
            .clone();
        Ok(session)
    }

    /// Raw traffic in both directions
    pub fn traffic(&self) -> broadcast::Receiver<TrafficEvent> {
        self.tap.subscribe()
    }

    pub fn store(&self) -> &Arc<CaptureStore> {
        &self.store
    }

    /// Copy of the last complete snapshot
    pub fn snapshot_samples(&self) -> Vec<SnapshotSample> {
        self.store.snapshot_samples()
    }

    /// Copy of the buffered log records
    pub fn stream_records(&self) -> StreamSnapshot {
        self.store.stream_records()
    }

    pub fn export_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        Ok(self.store.export_snapshot(path)?)
    }

    pub fn export_stream<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        Ok(self.store.export_stream(path)?)
    }
}
