// SPDX-License-Identifier: GPL-3.0-only

//! Booth Camera - camera process lifecycle for photo booths
//!
//! Drives a Raspberry Pi camera through the rpicam programs: a low
//! resolution MJPEG preview streamed to a display sink, and full resolution
//! stills or video captured by separate processes. Only one process may hold
//! the camera, so the session hands the device from preview to capture and
//! back without ever letting two processes overlap.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Camera session, coordinator and process management
//! - [`config`]: User configuration handling
//! - [`constants`]: Default program names, sizes and timings
//! - [`errors`]: Error types shared by every layer
//!
//! # Example
//!
//! ```ignore
//! let session = CameraSession::with_local_processes(Config::default(), sink);
//! session.start_preview().await?;
//! let outcome = session
//!     .capture_photo("/home/pi/booth/photo.jpg", CaptureOptions::default())
//!     .await?;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;

// Re-export commonly used types
pub use backends::camera::{
    CameraSession, CaptureOptions, Frame, FrameSink, Outcome, SessionEvent, SessionState,
};
pub use config::Config;
pub use errors::{SessionError, SessionResult};
