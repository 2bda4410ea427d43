// SPDX-License-Identifier: GPL-3.0-only

//! Public facade over the capture coordinator
//!
//! `CameraSession` is a cheap, clonable handle. Every request is queued to
//! the coordinator task and awaited until it reaches a terminal outcome;
//! state and events can be observed without blocking the coordinator.

use super::coordinator::{CaptureCoordinator, Command, Reply};
use super::preview_reader::ReaderStats;
use super::supervisor::LocalProcessSupervisor;
use super::types::{CaptureOptions, CaptureRequest, Outcome, SessionEvent, SessionState};
use super::{FrameSink, ProcessSupervisor};
use crate::config::Config;
use crate::constants::{COMMAND_QUEUE_CAPACITY, EVENT_CHANNEL_CAPACITY};
use crate::errors::{SessionError, SessionResult};
use futures::StreamExt;
use futures::stream::BoxStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, warn};

/// Handle to a running camera session
///
/// Must be created inside a tokio runtime. The session shuts down when
/// [`shutdown`](Self::shutdown) is called or the last handle is dropped.
#[derive(Clone)]
pub struct CameraSession {
    commands: mpsc::Sender<Command>,
    /// Template receiver; subscribers are created from it
    events: Arc<broadcast::Receiver<SessionEvent>>,
    state: watch::Receiver<SessionState>,
    stats: Arc<ReaderStats>,
}

impl CameraSession {
    /// Start a session driven by `supervisor`, presenting preview frames to `sink`
    pub fn new<S: ProcessSupervisor>(
        config: Config,
        supervisor: S,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let coordinator = CaptureCoordinator::new(config, supervisor, sink, event_tx, state_tx);
        let stats = coordinator.reader_stats();
        tokio::spawn(coordinator.run(command_rx));

        Self {
            commands: command_tx,
            events: Arc::new(event_rx),
            state: state_rx,
            stats,
        }
    }

    /// Start a session that runs the real rpicam programs
    pub fn with_local_processes(config: Config, sink: Arc<dyn FrameSink>) -> Self {
        Self::new(config, LocalProcessSupervisor::new(), sink)
    }

    /// Start the preview process ahead of time without showing frames
    pub async fn prewarm(&self) -> SessionResult<()> {
        self.request(Command::Prewarm).await
    }

    /// Show the live preview, reusing a pre-warmed process when there is one
    pub async fn start_preview(&self) -> SessionResult<()> {
        self.request(Command::StartPreview).await
    }

    /// Stop the preview and release the camera. Idempotent.
    pub async fn stop_preview(&self) -> SessionResult<()> {
        self.request(Command::StopPreview).await
    }

    /// Take a full resolution still and write it to `path`
    ///
    /// Returns once the file has been written, the capture failed, or the
    /// request was cancelled while waiting for the preview to stop.
    pub async fn capture_photo(
        &self,
        path: impl Into<PathBuf>,
        options: CaptureOptions,
    ) -> SessionResult<Outcome> {
        self.capture(CaptureRequest::photo(path, options)).await
    }

    /// Record `duration` of video to `path`
    pub async fn capture_video(
        &self,
        path: impl Into<PathBuf>,
        duration: Duration,
        options: CaptureOptions,
    ) -> SessionResult<Outcome> {
        self.capture(CaptureRequest::video(path, duration, options)).await
    }

    /// Cancel a capture that is still waiting for the preview to stop
    ///
    /// Returns `false` when there was nothing cancellable: once the capture
    /// process has started it runs to completion.
    pub async fn cancel_capture(&self) -> SessionResult<bool> {
        self.request(Command::CancelCapture).await
    }

    /// Terminate every process and stop the coordinator. Idempotent.
    pub async fn shutdown(&self) -> SessionResult<()> {
        match self.request(Command::Shutdown).await {
            Err(SessionError::ShutDown) => Ok(()),
            result => result,
        }
    }

    /// Current coordinator state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Preview frame counters, accumulated over the session's lifetime
    pub fn preview_stats(&self) -> Arc<ReaderStats> {
        Arc::clone(&self.stats)
    }

    /// Raw event receiver; events sent before subscribing are not seen
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.resubscribe()
    }

    /// Event stream that ends when the session shuts down
    pub fn events(&self) -> BoxStream<'static, SessionEvent> {
        let mut receiver = self.subscribe();
        async_stream::stream! {
            loop {
                match receiver.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Session event subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
        .boxed()
    }

    async fn capture(&self, request: CaptureRequest) -> SessionResult<Outcome> {
        prepare_target(&request.target).await?;
        self.request(|reply| Command::Capture(request, reply)).await
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> SessionResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SessionError::ShutDown)?;
        response.await.map_err(|_| SessionError::ShutDown)?
    }
}

/// Make sure the capture program can create its output file
async fn prepare_target(target: &Path) -> SessionResult<()> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
        debug!(directory = %parent.display(), "Capture directory ready");
    }
    Ok(())
}
