// SPDX-License-Identifier: GPL-3.0-only

//! Camera process lifecycle
//!
//! The camera is driven by external rpicam programs that cannot share the
//! device, so preview and capture processes are strictly serialized.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  Host application   │
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │   CameraSession     │  ← Public facade, clonable handle
//! └──────────┬──────────┘
//!            │ commands / events
//!            ▼
//! ┌─────────────────────┐      ┌─────────────────────┐
//! │ CaptureCoordinator  │─────▶│ PreviewStreamReader │──▶ FrameSink
//! └──────────┬──────────┘      └─────────────────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │ ProcessSupervisor   │  ← spawn / poll / terminate
//! └─────────────────────┘
//! ```

pub mod commands;
pub mod coordinator;
pub mod preview_reader;
pub mod session;
pub mod supervisor;
pub mod types;

pub use preview_reader::{PreviewStreamReader, ReaderStats};
pub use session::CameraSession;
pub use supervisor::LocalProcessSupervisor;
pub use types::*;

use crate::errors::SpawnError;
use std::future::Future;
use std::time::Duration;
use tokio::io::AsyncRead;

/// Consumer of decoded preview frames (typically a display surface)
///
/// `present` is called from a blocking worker thread, one frame at a time and
/// in strictly increasing sequence order. Frames the sink cannot keep up with
/// are dropped before decoding, never queued.
pub trait FrameSink: Send + Sync + 'static {
    fn present(&self, frame: Frame);
}

/// Launches, monitors and terminates the external camera programs
///
/// The supervisor exclusively owns the processes and their pipes. The only
/// way to read a preview stream is [`take_output`](Self::take_output), which
/// hands the read end out once.
pub trait ProcessSupervisor: Send + 'static {
    /// Read end of a preview process's stdout
    type Output: AsyncRead + Send + Unpin + 'static;

    /// Start `command`. Fails if the executable is missing or any other
    /// process still holds the camera.
    fn spawn(
        &mut self,
        kind: ProcessKind,
        command: &CommandSpec,
    ) -> Result<CameraProcessHandle, SpawnError>;

    /// Take the stdout stream of a preview process
    fn take_output(&mut self, handle: &CameraProcessHandle) -> Option<Self::Output>;

    /// Non-blocking status check. An exited process is reaped and forgotten,
    /// so its exit status is reported exactly once.
    fn poll(&mut self, handle: &CameraProcessHandle) -> ProcessStatus;

    /// Ask the process to stop, wait up to `graceful_timeout`, then kill it.
    /// Returns only after the process has been reaped.
    fn terminate(
        &mut self,
        handle: CameraProcessHandle,
        graceful_timeout: Duration,
    ) -> impl Future<Output = Termination> + Send;
}
