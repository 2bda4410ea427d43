// SPDX-License-Identifier: GPL-3.0-only

//! Command lines for the rpicam preview, still and video programs

use super::types::{CaptureKind, CaptureRequest, CommandSpec, Resolution};
use crate::config::Config;
use crate::constants::preview;

/// Preview size matching the still capture aspect ratio
///
/// The width is fixed by configuration; the height follows the still
/// resolution and is rounded up to an even number, which the ISP requires.
pub fn preview_resolution(config: &Config) -> Resolution {
    let width = config.preview.width;
    if let Some(height) = config.preview.height {
        return Resolution::new(width, height);
    }

    let still = config.still.resolution;
    if still.width == 0 || still.height == 0 {
        return Resolution::new(width, preview::FALLBACK_HEIGHT);
    }

    let scaled = u64::from(width) * u64::from(still.height) / u64::from(still.width);
    let mut height = u32::try_from(scaled).unwrap_or(u32::MAX);
    if height % 2 != 0 {
        height = height.saturating_add(1).min(u32::MAX - 1);
    }
    Resolution::new(width, height.max(2))
}

/// Continuous MJPEG preview written to stdout
pub fn preview_command(config: &Config) -> CommandSpec {
    let size = preview_resolution(config);
    CommandSpec::new(&config.preview.executable)
        .args(["-t", "0", "--codec", "mjpeg", "-n"])
        .args(["--width".to_string(), size.width.to_string()])
        .args(["--height".to_string(), size.height.to_string()])
        .args([
            "--framerate".to_string(),
            config.preview.framerate.to_string(),
        ])
        .args(["--inline", "-o", "-"])
        .args(config.preview.extra_args.iter().cloned())
}

/// Command line for the capture described by `request`
pub fn capture_command(config: &Config, request: &CaptureRequest) -> CommandSpec {
    match request.kind {
        CaptureKind::Photo => still_command(config, request),
        CaptureKind::Video { .. } => video_command(config, request),
    }
}

fn still_command(config: &Config, request: &CaptureRequest) -> CommandSpec {
    let settings = &config.still;
    let size = request.options.resolution.unwrap_or(settings.resolution);
    let target = request.target.to_string_lossy().into_owned();

    let mut command = CommandSpec::new(&settings.executable)
        .arg("-o")
        .arg(target)
        .args(["-n", "-t", "1", "--immediate"])
        .args(["--width".to_string(), size.width.to_string()])
        .args(["--height".to_string(), size.height.to_string()]);

    if let Some(quality) = request.options.quality.or(settings.quality) {
        command = command.args(["-q".to_string(), quality.clamp(1, 100).to_string()]);
    }
    if request.options.hflip || settings.hflip {
        command = command.arg("--hflip");
    }
    command.args(settings.extra_args.iter().cloned())
}

fn video_command(config: &Config, request: &CaptureRequest) -> CommandSpec {
    let settings = &config.video;
    let size = request.options.resolution.unwrap_or(settings.resolution);
    let framerate = request.options.framerate.unwrap_or(settings.framerate);
    // rpicam treats -t 0 as "run forever"; a recording always has an end
    let duration_ms = request.duration().as_millis().max(1);

    let mut command = CommandSpec::new(&settings.executable)
        .args(["-t".to_string(), duration_ms.to_string()])
        .arg("-n")
        .args(["--codec".to_string(), settings.codec.clone()])
        .args(["--width".to_string(), size.width.to_string()])
        .args(["--height".to_string(), size.height.to_string()])
        .args(["--framerate".to_string(), framerate.to_string()])
        .arg("-o")
        .arg(request.target.to_string_lossy().into_owned());

    if request.options.hflip || settings.hflip {
        command = command.arg("--hflip");
    }
    command.args(settings.extra_args.iter().cloned())
}
