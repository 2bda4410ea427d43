// SPDX-License-Identifier: GPL-3.0-only

//! Backend layer for the camera hardware
//!
//! The camera is only reachable through external rpicam programs, so the
//! backend is a process lifecycle manager rather than a device driver:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              Host application               │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │               Backend Layer                 │
//! │  ┌──────────────────────────────────────┐   │
//! │  │   Camera (rpicam child processes)    │   │
//! │  └──────────────────────────────────────┘   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: Session facade, capture coordinator, preview reader and
//!   process supervisor

pub mod camera;
