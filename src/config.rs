// SPDX-License-Identifier: GPL-3.0-only

//! User configuration for the camera session
//!
//! The configuration is a JSON document stored at
//! `$XDG_CONFIG_HOME/booth-camera/config.json`. Every section has defaults,
//! so a partial (or missing) file is valid.

use crate::backends::camera::types::Resolution;
use crate::constants::{self, capture, preview, programs, timing};
use crate::errors::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Preview process settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSettings {
    /// Program producing the MJPEG preview stream
    pub executable: String,
    /// Preview width in pixels
    pub width: u32,
    /// Explicit preview height; derived from the still aspect ratio when unset
    pub height: Option<u32>,
    /// Preview framerate
    pub framerate: u32,
    /// Mirror the preview horizontally (selfie mode)
    pub mirror: bool,
    /// Additional arguments appended to the preview command line
    pub extra_args: Vec<String>,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            executable: programs::PREVIEW.to_string(),
            width: preview::TARGET_WIDTH,
            height: None,
            framerate: preview::FRAMERATE,
            mirror: true,
            extra_args: Vec::new(),
        }
    }
}

/// Still capture process settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StillSettings {
    pub executable: String,
    pub resolution: Resolution,
    /// JPEG quality (1-100); the program default when unset
    pub quality: Option<u8>,
    pub hflip: bool,
    pub extra_args: Vec<String>,
}

impl Default for StillSettings {
    fn default() -> Self {
        Self {
            executable: programs::STILL.to_string(),
            resolution: Resolution::new(capture::STILL_WIDTH, capture::STILL_HEIGHT),
            quality: None,
            hflip: false,
            extra_args: Vec::new(),
        }
    }
}

/// Video capture process settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub executable: String,
    pub resolution: Resolution,
    pub framerate: u32,
    pub codec: String,
    pub hflip: bool,
    pub extra_args: Vec<String>,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            executable: programs::VIDEO.to_string(),
            resolution: Resolution::new(capture::VIDEO_WIDTH, capture::VIDEO_HEIGHT),
            framerate: capture::VIDEO_FRAMERATE,
            codec: programs::VIDEO_CODEC.to_string(),
            hflip: false,
            extra_args: Vec::new(),
        }
    }
}

/// Timeouts and intervals, all in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    pub graceful_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub boundary_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub prewarm_timeout_ms: u64,
    pub capture_timeout_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            graceful_timeout_ms: timing::GRACEFUL_TIMEOUT_MS,
            poll_interval_ms: timing::POLL_INTERVAL_MS,
            boundary_timeout_ms: timing::BOUNDARY_TIMEOUT_MS,
            settle_delay_ms: timing::SETTLE_DELAY_MS,
            prewarm_timeout_ms: timing::PREWARM_TIMEOUT_MS,
            capture_timeout_ms: timing::CAPTURE_TIMEOUT_MS,
        }
    }
}

impl TimingSettings {
    pub fn graceful_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_timeout_ms)
    }

    /// Polling interval, never zero (tokio intervals reject a zero period)
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn boundary_timeout(&self) -> Duration {
        Duration::from_millis(self.boundary_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// `None` when pre-warmed previews never expire
    pub fn prewarm_timeout(&self) -> Option<Duration> {
        (self.prewarm_timeout_ms > 0).then(|| Duration::from_millis(self.prewarm_timeout_ms))
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub preview: PreviewSettings,
    pub still: StillSettings,
    pub video: VideoSettings,
    pub timing: TimingSettings,
    /// Restart the preview once a capture finishes if it was running before
    pub resume_preview_after_capture: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preview: PreviewSettings::default(),
            still: StillSettings::default(),
            video: VideoSettings::default(),
            timing: TimingSettings::default(),
            resume_preview_after_capture: true,
        }
    }
}

impl Config {
    /// Default configuration file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| {
            dir.join(constants::CONFIG_DIR_NAME)
                .join(constants::CONFIG_FILE_NAME)
        })
    }

    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist
    pub fn load(path: &Path) -> SessionResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let config = serde_json::from_str(&contents).map_err(|e| {
                    SessionError::Config(format!("{}: {}", path.display(), e))
                })?;
                info!(path = %path.display(), "Loaded configuration");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No configuration file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(SessionError::Config(format!("{}: {}", path.display(), e))),
        }
    }

    /// Load from an explicit path or the default location
    pub fn load_or_default(path: Option<&Path>) -> SessionResult<Self> {
        match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Write the configuration as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> SessionResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Saved configuration");
        Ok(())
    }
}
