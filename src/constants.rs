// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

/// External camera programs (rpicam-apps on Raspberry Pi OS Bookworm and later)
pub mod programs {
    /// Continuous preview and video recording
    pub const PREVIEW: &str = "rpicam-vid";

    /// Single-shot high resolution still capture
    pub const STILL: &str = "rpicam-still";

    /// Video recording
    pub const VIDEO: &str = "rpicam-vid";

    /// Default codec passed to the video recorder
    pub const VIDEO_CODEC: &str = "h264";
}

/// Preview stream constants
pub mod preview {
    /// Preview width; the height follows the capture aspect ratio
    pub const TARGET_WIDTH: u32 = 720;

    /// Fallback preview height when no capture resolution is known
    pub const FALLBACK_HEIGHT: u32 = 480;

    /// Preview framerate requested from the camera
    pub const FRAMERATE: u32 = 30;

    /// Bytes read from the preview pipe per read call
    pub const READ_CHUNK_SIZE: usize = 32 * 1024;

    /// Pending bytes without a complete JPEG before the buffer is discarded
    pub const MAX_PENDING_BYTES: usize = 500_000;
}

/// Capture defaults
pub mod capture {
    /// Camera Module 3 full sensor resolution
    pub const STILL_WIDTH: u32 = 4608;
    pub const STILL_HEIGHT: u32 = 2592;

    /// Full HD video
    pub const VIDEO_WIDTH: u32 = 1920;
    pub const VIDEO_HEIGHT: u32 = 1080;
    pub const VIDEO_FRAMERATE: u32 = 30;
}

/// Timing constants (milliseconds)
pub mod timing {
    /// Frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 30;

    /// Grace period between SIGTERM and SIGKILL
    pub const GRACEFUL_TIMEOUT_MS: u64 = 500;

    /// Liveness polling interval for the active camera process
    pub const POLL_INTERVAL_MS: u64 = 100;

    /// Maximum wait for the preview to reach a frame boundary before capture
    pub const BOUNDARY_TIMEOUT_MS: u64 = 250;

    /// Pause between preview teardown and capture spawn
    pub const SETTLE_DELAY_MS: u64 = 50;

    /// Pre-warmed preview lifetime without a start-preview request (0 disables)
    pub const PREWARM_TIMEOUT_MS: u64 = 60_000;

    /// Extra time a capture process gets beyond its requested duration
    pub const CAPTURE_TIMEOUT_MS: u64 = 15_000;
}

/// JPEG markers used to frame the MJPEG preview stream
pub mod jpeg {
    /// Start of image
    pub const SOI: [u8; 2] = [0xFF, 0xD8];

    /// End of image
    pub const EOI: [u8; 2] = [0xFF, 0xD9];
}

/// Configuration file location relative to the user config directory
pub const CONFIG_DIR_NAME: &str = "booth-camera";
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Number of session events buffered for slow subscribers
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Number of host requests queued ahead of the coordinator
pub const COMMAND_QUEUE_CAPACITY: usize = 16;
