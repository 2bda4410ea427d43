// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for the camera session

use crate::errors::SessionError;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// What an external camera process is doing with the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessKind {
    /// Continuous MJPEG stream on stdout
    Preview,
    /// Single high resolution still written to a file
    StillCapture,
    /// Fixed-duration recording written to a file
    VideoCapture,
}

impl std::fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessKind::Preview => write!(f, "preview"),
            ProcessKind::StillCapture => write!(f, "still-capture"),
            ProcessKind::VideoCapture => write!(f, "video-capture"),
        }
    }
}

/// Supervisor-assigned process identifier, unique for the supervisor's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u64);

impl std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Token for a process owned by a [`ProcessSupervisor`](super::ProcessSupervisor)
///
/// The supervisor keeps the child and its pipes; the handle only names it.
/// Terminating consumes the handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraProcessHandle {
    pub id: ProcessId,
    pub kind: ProcessKind,
    /// Operating system pid, if the process was still alive right after spawn
    pub pid: Option<u32>,
    pub started_at: Instant,
}

/// Non-blocking liveness report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    ExitedOk,
    /// Non-zero exit; `None` when the process was killed by a signal
    ExitedError(Option<i32>),
}

impl ProcessStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running)
    }
}

impl From<std::process::ExitStatus> for ProcessStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        if status.success() {
            ProcessStatus::ExitedOk
        } else {
            ProcessStatus::ExitedError(status.code())
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::ExitedOk => write!(f, "exited successfully"),
            ProcessStatus::ExitedError(Some(code)) => write!(f, "exited with code {}", code),
            ProcessStatus::ExitedError(None) => write!(f, "killed by signal"),
        }
    }
}

/// How a terminate call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process had already exited before the stop signal
    AlreadyExited(ProcessStatus),
    /// The process honored the graceful stop signal
    Graceful(ProcessStatus),
    /// The process outlived the graceful timeout and was killed
    Forced { waited: Duration },
}

impl Termination {
    pub fn is_forced(&self) -> bool {
        matches!(self, Termination::Forced { .. })
    }
}

/// Program and arguments for one external process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Value following `flag`, if present
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Image size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A decoded preview frame
///
/// Ownership passes to the [`FrameSink`](super::FrameSink) on delivery.
#[derive(Debug)]
pub struct Frame {
    /// Position in the preview stream, strictly increasing per attachment
    pub sequence: u64,
    /// When the last byte of the frame was read from the pipe
    pub captured_at: Instant,
    /// RGBA pixels
    pub image: RgbaImage,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Per-capture overrides of the configured capture parameters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureOptions {
    pub resolution: Option<Resolution>,
    /// JPEG quality (stills only)
    pub quality: Option<u8>,
    /// Framerate (video only)
    pub framerate: Option<u32>,
    /// Mirror the captured media horizontally
    pub hflip: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureKind {
    Photo,
    Video { duration: Duration },
}

/// A pending capture, consumed once it reaches a terminal outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub kind: CaptureKind,
    pub target: PathBuf,
    pub options: CaptureOptions,
}

impl CaptureRequest {
    pub fn photo(target: impl Into<PathBuf>, options: CaptureOptions) -> Self {
        Self {
            kind: CaptureKind::Photo,
            target: target.into(),
            options,
        }
    }

    pub fn video(target: impl Into<PathBuf>, duration: Duration, options: CaptureOptions) -> Self {
        Self {
            kind: CaptureKind::Video { duration },
            target: target.into(),
            options,
        }
    }

    pub fn process_kind(&self) -> ProcessKind {
        match self.kind {
            CaptureKind::Photo => ProcessKind::StillCapture,
            CaptureKind::Video { .. } => ProcessKind::VideoCapture,
        }
    }

    /// Requested recording length (zero for stills)
    pub fn duration(&self) -> Duration {
        match self.kind {
            CaptureKind::Photo => Duration::ZERO,
            CaptureKind::Video { duration } => duration,
        }
    }
}

/// Terminal result of a successful capture call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The capture process exited cleanly after writing the target file
    Success(PathBuf),
    /// The request was cancelled before the capture process started
    Cancelled,
}

/// Coordinator state; only the coordinator writes it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Idle,
    PreWarming,
    PreviewActive,
    CapturePending,
    Capturing,
    ShuttingDown,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::PreWarming => write!(f, "pre-warming"),
            SessionState::PreviewActive => write!(f, "preview active"),
            SessionState::CapturePending => write!(f, "capture pending"),
            SessionState::Capturing => write!(f, "capturing"),
            SessionState::ShuttingDown => write!(f, "shutting down"),
        }
    }
}

/// Status and fault notifications for the host application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    CaptureComplete {
        kind: ProcessKind,
        path: PathBuf,
    },
    /// A fault the coordinator recovered from (device faults, forced kills)
    Fault(SessionError),
}
