// SPDX-License-Identifier: GPL-3.0-only

//! Capture coordinator
//!
//! Single task that owns [`SessionState`] and the one live camera process.
//! Host requests arrive on a command queue and are handled one at a time;
//! process liveness is polled on an interval in the same loop, so every
//! state transition is serialized.
//!
//! ```text
//!            prewarm            start_preview
//!   Idle ───────────▶ PreWarming ────────────▶ PreviewActive
//!    │ ▲                   │                        │
//!    │ └── stop / expiry ──┘                capture │
//!    │                                              ▼
//!    │ capture                              CapturePending
//!    │                                              │ frame boundary,
//!    ▼                                              │ preview reaped
//!  Capturing ◀──────────────────────────────────────┘
//!    │ exit 0 → PreviewActive (resume) or Idle
//!    │ exit ≠ 0 / deadline → Idle + DeviceFault
//! ```
//!
//! Any unexpected process death forces `Idle` and emits a fault event.

use super::commands;
use super::preview_reader::{PreviewStreamReader, ReaderStats};
use super::types::{
    CameraProcessHandle, CaptureRequest, CommandSpec, Outcome, ProcessKind, ProcessStatus,
    SessionEvent, SessionState, Termination,
};
use super::{FrameSink, ProcessSupervisor};
use crate::config::Config;
use crate::errors::{AttachError, SessionError, SessionResult, SpawnError};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub(crate) type Reply<T> = oneshot::Sender<SessionResult<T>>;

/// Host requests, answered through the embedded reply channel
pub(crate) enum Command {
    Prewarm(Reply<()>),
    StartPreview(Reply<()>),
    StopPreview(Reply<()>),
    Capture(CaptureRequest, Reply<Outcome>),
    CancelCapture(Reply<bool>),
    Shutdown(Reply<()>),
}

/// Capture waiting for the preview to reach a frame boundary
struct PendingCapture {
    request: CaptureRequest,
    reply: Reply<Outcome>,
    boundary: oneshot::Receiver<()>,
    deadline: Instant,
    /// State to restore if the capture is cancelled
    return_to: SessionState,
}

/// Capture whose process is running
struct ActiveCapture {
    request: CaptureRequest,
    reply: Reply<Outcome>,
    deadline: Instant,
}

enum Boundary {
    Reached,
    StreamEnded,
    TimedOut,
}

pub(crate) struct CaptureCoordinator<S: ProcessSupervisor> {
    supervisor: S,
    config: Config,
    sink: Arc<dyn FrameSink>,
    reader: PreviewStreamReader,
    state: SessionState,
    /// The only process allowed to hold the camera
    live: Option<CameraProcessHandle>,
    pending: Option<PendingCapture>,
    active: Option<ActiveCapture>,
    /// Restart the preview once the current capture completes
    resume_preview: bool,
    prewarm_deadline: Option<Instant>,
    events: broadcast::Sender<SessionEvent>,
    state_tx: watch::Sender<SessionState>,
}

impl<S: ProcessSupervisor> CaptureCoordinator<S> {
    pub(crate) fn new(
        config: Config,
        supervisor: S,
        sink: Arc<dyn FrameSink>,
        events: broadcast::Sender<SessionEvent>,
        state_tx: watch::Sender<SessionState>,
    ) -> Self {
        let reader = PreviewStreamReader::new(config.preview.mirror);
        Self {
            supervisor,
            config,
            sink,
            reader,
            state: SessionState::Idle,
            live: None,
            pending: None,
            active: None,
            resume_preview: false,
            prewarm_deadline: None,
            events,
            state_tx,
        }
    }

    pub(crate) fn reader_stats(&self) -> Arc<ReaderStats> {
        self.reader.stats()
    }

    /// Serve commands until shutdown or until every session handle is gone
    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        let mut ticker = tokio::time::interval(self.config.timing.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Capture coordinator started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.shutdown().await;
                        let _ = reply.send(Ok(()));
                        break;
                    }
                    Some(command) => self.handle(command).await,
                    None => {
                        debug!("All session handles dropped");
                        self.shutdown().await;
                        break;
                    }
                },
                _ = ticker.tick() => self.poll_live().await,
                boundary = boundary_reached(&mut self.pending) => {
                    self.begin_pending_capture(boundary).await;
                }
            }
        }

        info!("Capture coordinator stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Prewarm(reply) => {
                let result = self.prewarm().await;
                let _ = reply.send(result);
            }
            Command::StartPreview(reply) => {
                let result = self.start_preview().await;
                let _ = reply.send(result);
            }
            Command::StopPreview(reply) => {
                let result = self.stop_preview().await;
                let _ = reply.send(result);
            }
            Command::Capture(request, reply) => self.request_capture(request, reply),
            Command::CancelCapture(reply) => {
                let result = self.cancel_capture().await;
                let _ = reply.send(result);
            }
            // Handled by the run loop
            Command::Shutdown(reply) => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    // ===== Host requests =====

    async fn prewarm(&mut self) -> SessionResult<()> {
        match self.state {
            SessionState::Idle => {
                info!("Pre-warming camera");
                self.start_preview_process(false).await?;
                self.prewarm_deadline = self
                    .config
                    .timing
                    .prewarm_timeout()
                    .map(|timeout| Instant::now() + timeout);
                self.set_state(SessionState::PreWarming);
                Ok(())
            }
            SessionState::PreWarming | SessionState::PreviewActive => Ok(()),
            SessionState::CapturePending | SessionState::Capturing => Err(SessionError::Busy),
            SessionState::ShuttingDown => Err(SessionError::ShutDown),
        }
    }

    async fn start_preview(&mut self) -> SessionResult<()> {
        match self.state {
            SessionState::Idle => {
                self.start_preview_process(true).await?;
                self.set_state(SessionState::PreviewActive);
            }
            SessionState::PreWarming => {
                info!("Promoting pre-warmed preview");
                self.reader.set_sink(Some(Arc::clone(&self.sink)));
                self.prewarm_deadline = None;
                self.set_state(SessionState::PreviewActive);
            }
            SessionState::PreviewActive => {}
            SessionState::CapturePending => {
                self.reader.set_sink(Some(Arc::clone(&self.sink)));
                self.resume_preview = true;
                if let Some(pending) = self.pending.as_mut() {
                    pending.return_to = SessionState::PreviewActive;
                }
            }
            SessionState::Capturing => {
                debug!("Preview requested during capture, resuming afterwards");
                self.resume_preview = true;
            }
            SessionState::ShuttingDown => return Err(SessionError::ShutDown),
        }
        Ok(())
    }

    async fn stop_preview(&mut self) -> SessionResult<()> {
        match self.state {
            SessionState::Idle => {}
            SessionState::PreWarming | SessionState::PreviewActive => {
                self.teardown().await;
                self.prewarm_deadline = None;
                self.set_state(SessionState::Idle);
            }
            SessionState::CapturePending => {
                self.resume_preview = false;
                if let Some(pending) = self.pending.as_mut() {
                    pending.return_to = SessionState::Idle;
                }
            }
            SessionState::Capturing => self.resume_preview = false,
            SessionState::ShuttingDown => return Err(SessionError::ShutDown),
        }
        Ok(())
    }

    fn request_capture(&mut self, request: CaptureRequest, reply: Reply<Outcome>) {
        match self.state {
            SessionState::CapturePending | SessionState::Capturing => {
                warn!(path = %request.target.display(), "Capture rejected, camera busy");
                let _ = reply.send(Err(SessionError::Busy));
            }
            SessionState::ShuttingDown => {
                let _ = reply.send(Err(SessionError::ShutDown));
            }
            SessionState::Idle => {
                info!(
                    kind = %request.process_kind(),
                    path = %request.target.display(),
                    "Capture requested"
                );
                self.resume_preview = false;
                self.begin_capture(request, reply);
            }
            SessionState::PreWarming | SessionState::PreviewActive => {
                let return_to = self.state;
                self.resume_preview = return_to == SessionState::PreviewActive
                    && self.config.resume_preview_after_capture;
                self.prewarm_deadline = None;

                // Without a reader the dropped sender ends the wait at once
                let boundary = self
                    .reader
                    .pause_at_boundary()
                    .unwrap_or_else(|| oneshot::channel().1);

                info!(
                    kind = %request.process_kind(),
                    path = %request.target.display(),
                    "Capture requested"
                );
                self.pending = Some(PendingCapture {
                    request,
                    reply,
                    boundary,
                    deadline: Instant::now() + self.config.timing.boundary_timeout(),
                    return_to,
                });
                self.set_state(SessionState::CapturePending);
            }
        }
    }

    async fn cancel_capture(&mut self) -> SessionResult<bool> {
        let Some(pending) = self.pending.take() else {
            return Ok(false);
        };

        info!(path = %pending.request.target.display(), "Pending capture cancelled");
        let _ = pending.reply.send(Ok(Outcome::Cancelled));
        self.resume_preview = false;

        match pending.return_to {
            SessionState::PreviewActive => {
                self.reader.set_sink(Some(Arc::clone(&self.sink)));
                self.reader.resume();
                self.set_state(SessionState::PreviewActive);
            }
            SessionState::PreWarming => {
                self.reader.resume();
                self.prewarm_deadline = self
                    .config
                    .timing
                    .prewarm_timeout()
                    .map(|timeout| Instant::now() + timeout);
                self.set_state(SessionState::PreWarming);
            }
            _ => {
                self.teardown().await;
                self.set_state(SessionState::Idle);
            }
        }
        Ok(true)
    }

    async fn shutdown(&mut self) {
        if self.state == SessionState::ShuttingDown {
            return;
        }
        self.set_state(SessionState::ShuttingDown);

        if let Some(pending) = self.pending.take() {
            let _ = pending.reply.send(Err(SessionError::ShutDown));
        }
        if let Some(active) = self.active.take() {
            warn!(path = %active.request.target.display(), "Abandoning capture on shutdown");
            let _ = active.reply.send(Err(SessionError::ShutDown));
        }
        self.teardown().await;
        info!("Camera session shut down");
    }

    // ===== Transitions driven by the camera =====

    async fn begin_pending_capture(&mut self, boundary: Boundary) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        match boundary {
            Boundary::Reached => debug!("Preview paused at frame boundary"),
            Boundary::StreamEnded => debug!("Preview stream ended before capture"),
            Boundary::TimedOut => warn!(
                timeout_ms = self.config.timing.boundary_timeout_ms,
                "No frame boundary in time, stopping preview anyway"
            ),
        }

        // Preview must be reaped before the capture process may open the device
        if let Some(Termination::AlreadyExited(status)) = self.teardown().await {
            let fault = SessionError::DeviceFault(format!("preview process {}", status));
            error!(%status, "Preview died while a capture was pending");
            let _ = pending.reply.send(Err(fault.clone()));
            self.resume_preview = false;
            self.set_state(SessionState::Idle);
            self.emit(SessionEvent::Fault(fault));
            return;
        }

        let settle = self.config.timing.settle_delay();
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        self.begin_capture(pending.request, pending.reply);
    }

    fn begin_capture(&mut self, request: CaptureRequest, reply: Reply<Outcome>) {
        let kind = request.process_kind();
        let command = commands::capture_command(&self.config, &request);

        match self.spawn_exclusive(kind, &command) {
            Ok(handle) => {
                let deadline =
                    Instant::now() + request.duration() + self.config.timing.capture_timeout();
                self.live = Some(handle);
                self.active = Some(ActiveCapture {
                    request,
                    reply,
                    deadline,
                });
                self.set_state(SessionState::Capturing);
            }
            Err(e) => {
                warn!(%kind, error = %e, "Capture process failed to start");
                let _ = reply.send(Err(e.into()));
                self.resume_preview = false;
                self.set_state(SessionState::Idle);
            }
        }
    }

    async fn poll_live(&mut self) {
        let Some(handle) = self.live.as_ref() else {
            return;
        };
        let status = self.supervisor.poll(handle);
        if status.is_running() {
            self.check_deadlines().await;
            return;
        }

        let Some(handle) = self.live.take() else {
            return;
        };
        match handle.kind {
            ProcessKind::Preview => self.on_preview_exit(handle, status).await,
            ProcessKind::StillCapture | ProcessKind::VideoCapture => {
                self.on_capture_exit(handle, status).await
            }
        }
    }

    async fn on_preview_exit(&mut self, handle: CameraProcessHandle, status: ProcessStatus) {
        error!(id = %handle.id, %status, "Preview process died");
        self.reader.detach().await;

        let fault = SessionError::DeviceFault(format!("preview process {}", status));
        if let Some(pending) = self.pending.take() {
            let _ = pending.reply.send(Err(fault.clone()));
        }
        self.resume_preview = false;
        self.prewarm_deadline = None;
        self.set_state(SessionState::Idle);
        self.emit(SessionEvent::Fault(fault));
    }

    async fn on_capture_exit(&mut self, handle: CameraProcessHandle, status: ProcessStatus) {
        let Some(active) = self.active.take() else {
            warn!(kind = %handle.kind, %status, "Capture process exited without a request");
            self.set_state(SessionState::Idle);
            return;
        };

        if status != ProcessStatus::ExitedOk {
            error!(kind = %handle.kind, %status, "Capture failed");
            let fault = SessionError::DeviceFault(format!("{} process {}", handle.kind, status));
            let _ = active.reply.send(Err(fault.clone()));
            self.resume_preview = false;
            self.set_state(SessionState::Idle);
            self.emit(SessionEvent::Fault(fault));
            return;
        }

        let path = active.request.target;
        info!(
            kind = %handle.kind,
            path = %path.display(),
            elapsed_ms = handle.started_at.elapsed().as_millis() as u64,
            "Capture complete"
        );

        self.finish_capture().await;
        let _ = active.reply.send(Ok(Outcome::Success(path.clone())));
        self.emit(SessionEvent::CaptureComplete {
            kind: handle.kind,
            path,
        });
    }

    /// Return to preview or idle after a successful capture
    async fn finish_capture(&mut self) {
        if std::mem::take(&mut self.resume_preview) {
            match self.start_preview_process(true).await {
                Ok(()) => {
                    self.set_state(SessionState::PreviewActive);
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "Could not resume preview after capture");
                    self.emit(SessionEvent::Fault(e));
                }
            }
        }
        self.set_state(SessionState::Idle);
    }

    async fn check_deadlines(&mut self) {
        let now = Instant::now();

        if self.state == SessionState::PreWarming
            && self.prewarm_deadline.is_some_and(|deadline| now >= deadline)
        {
            info!("Pre-warmed preview was not used, releasing camera");
            self.prewarm_deadline = None;
            self.teardown().await;
            self.set_state(SessionState::Idle);
            return;
        }

        if self.active.as_ref().is_some_and(|a| now >= a.deadline)
            && let Some(active) = self.active.take()
        {
            let kind = active.request.process_kind();
            warn!(%kind, "Capture process overran its deadline");
            self.teardown().await;

            let fault = SessionError::DeviceFault(format!("{} process did not finish in time", kind));
            let _ = active.reply.send(Err(fault.clone()));
            self.resume_preview = false;
            self.set_state(SessionState::Idle);
            self.emit(SessionEvent::Fault(fault));
        }
    }

    // ===== Process plumbing =====

    /// Spawn only when no other process holds the device
    fn spawn_exclusive(
        &mut self,
        kind: ProcessKind,
        command: &CommandSpec,
    ) -> Result<CameraProcessHandle, SpawnError> {
        if let Some(live) = &self.live {
            return Err(SpawnError::DeviceBusy { held_by: live.kind });
        }
        self.supervisor.spawn(kind, command)
    }

    /// Spawn the preview and attach the reader, visible or hidden
    async fn start_preview_process(&mut self, visible: bool) -> SessionResult<()> {
        let command = commands::preview_command(&self.config);
        let handle = self.spawn_exclusive(ProcessKind::Preview, &command)?;

        let sink = visible.then(|| Arc::clone(&self.sink));
        let attached = match self.supervisor.take_output(&handle) {
            Some(stream) => self.reader.attach(&handle, stream, sink),
            None => Err(AttachError::NoOutputStream),
        };

        if let Err(e) = attached {
            warn!(id = %handle.id, error = %e, "Preview reader failed to attach");
            self.release(handle).await;
            return Err(e.into());
        }

        self.live = Some(handle);
        Ok(())
    }

    /// Detach the reader and terminate the live process, if any
    async fn teardown(&mut self) -> Option<Termination> {
        self.reader.detach().await;
        let handle = self.live.take()?;
        Some(self.release(handle).await)
    }

    /// Terminate and reap; a forced kill is reported but not fatal
    async fn release(&mut self, handle: CameraProcessHandle) -> Termination {
        let kind = handle.kind;
        let termination = self
            .supervisor
            .terminate(handle, self.config.timing.graceful_timeout())
            .await;
        if let Termination::Forced { waited } = termination {
            self.emit(SessionEvent::Fault(SessionError::Timeout { kind, waited }));
        }
        termination
    }

    fn set_state(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        self.state_tx.send_replace(to);
        info!(%from, %to, "Session state changed");
        self.emit(SessionEvent::StateChanged { from, to });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Resolves when a pending capture may proceed; never resolves otherwise
async fn boundary_reached(pending: &mut Option<PendingCapture>) -> Boundary {
    match pending {
        Some(pending) => {
            match tokio::time::timeout_at(pending.deadline, &mut pending.boundary).await {
                Ok(Ok(())) => Boundary::Reached,
                Ok(Err(_)) => Boundary::StreamEnded,
                Err(_) => Boundary::TimedOut,
            }
        }
        None => std::future::pending().await,
    }
}
