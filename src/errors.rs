// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the camera session

use crate::backends::camera::types::ProcessKind;
use std::fmt;
use std::time::Duration;

/// Result type alias using SessionError
pub type SessionResult<T> = Result<T, SessionError>;

/// Failures while launching an external camera program
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnError {
    /// The configured executable could not be found or executed
    ExecutableNotFound(String),
    /// Another camera process still holds the device
    DeviceBusy { held_by: ProcessKind },
    /// Any other operating system error
    Io(String),
}

/// Preview reader misuse
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachError {
    /// Only preview processes produce a frame stream
    NotPreview(ProcessKind),
    /// The reader is already consuming another process
    AlreadyAttached,
    /// The process output stream was already taken
    NoOutputStream,
}

/// Session-level error taxonomy reported to the host application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// A camera process could not be started
    Spawn(SpawnError),
    /// The preview reader could not attach
    Attach(AttachError),
    /// A capture was requested while another one is in flight
    Busy,
    /// A camera process died unexpectedly or the device went away
    DeviceFault(String),
    /// Graceful termination exceeded its deadline and the process was killed
    Timeout { kind: ProcessKind, waited: Duration },
    /// The session has been shut down
    ShutDown,
    /// Configuration could not be loaded or saved
    Config(String),
    /// Filesystem error while preparing a capture
    Io(String),
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::ExecutableNotFound(program) => {
                write!(f, "Executable not found: {}", program)
            }
            SpawnError::DeviceBusy { held_by } => {
                write!(f, "Camera device is held by a {} process", held_by)
            }
            SpawnError::Io(msg) => write!(f, "Failed to spawn process: {}", msg),
        }
    }
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachError::NotPreview(kind) => {
                write!(f, "Cannot read frames from a {} process", kind)
            }
            AttachError::AlreadyAttached => write!(f, "Preview reader is already attached"),
            AttachError::NoOutputStream => write!(f, "Process has no output stream"),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Spawn(e) => write!(f, "Spawn error: {}", e),
            SessionError::Attach(e) => write!(f, "Attach error: {}", e),
            SessionError::Busy => write!(f, "Camera is busy capturing"),
            SessionError::DeviceFault(msg) => write!(f, "Device fault: {}", msg),
            SessionError::Timeout { kind, waited } => write!(
                f,
                "{} process ignored graceful stop for {} ms and was killed",
                kind,
                waited.as_millis()
            ),
            SessionError::ShutDown => write!(f, "Camera session is shut down"),
            SessionError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SessionError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for SpawnError {}
impl std::error::Error for AttachError {}
impl std::error::Error for SessionError {}

impl From<SpawnError> for SessionError {
    fn from(err: SpawnError) -> Self {
        SessionError::Spawn(err)
    }
}

impl From<AttachError> for SessionError {
    fn from(err: AttachError) -> Self {
        SessionError::Attach(err)
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Config(err.to_string())
    }
}
