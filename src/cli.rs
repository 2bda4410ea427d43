// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for camera operations
//!
//! This module provides command-line functionality for:
//! - Running the preview and measuring its frame rate
//! - Taking photos
//! - Recording videos
//! - Showing the effective configuration

use booth_camera::{
    CameraSession, CaptureOptions, Config, Frame, FrameSink, Outcome, SessionEvent,
};
use chrono::Local;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Default folder name for saving photos and videos
const DEFAULT_SAVE_FOLDER: &str = "booth";

/// Sink that only counts frames; the CLI has no display
#[derive(Default)]
struct FrameCounter {
    frames: AtomicU64,
    last_size: AtomicU64,
}

impl FrameCounter {
    fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    fn last_size(&self) -> Option<(u32, u32)> {
        match self.last_size.load(Ordering::Relaxed) {
            0 => None,
            packed => Some(((packed >> 32) as u32, packed as u32)),
        }
    }
}

impl FrameSink for FrameCounter {
    fn present(&self, frame: Frame) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        let packed = (u64::from(frame.width()) << 32) | u64::from(frame.height());
        self.last_size.store(packed, Ordering::Relaxed);
    }
}

/// Run the preview and report how many frames reached the sink
pub fn run_preview(config: Config, seconds: u64) -> CliResult {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(preview_session(config, seconds))
}

async fn preview_session(config: Config, seconds: u64) -> CliResult {
    let stop = interrupt_notifier()?;
    let counter = Arc::new(FrameCounter::default());
    let session = CameraSession::with_local_processes(config, counter.clone());
    let printer = tokio::spawn(print_events(session.events()));

    session.prewarm().await?;
    session.start_preview().await?;
    let started = Instant::now();

    if seconds == 0 {
        println!("Preview running... (press Ctrl+C to stop)");
        stop.notified().await;
    } else {
        println!("Preview running for {}s... (press Ctrl+C to stop early)", seconds);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
            _ = stop.notified() => println!("Stopping early..."),
        }
    }

    session.stop_preview().await?;
    let elapsed = started.elapsed().as_secs_f64();
    let stats = session.preview_stats();
    session.shutdown().await?;
    let _ = printer.await;

    let frames = counter.frames();
    println!();
    println!("Frames presented: {}", frames);
    println!(
        "Frames read: {} (skipped to keep up: {})",
        stats.framed(),
        stats.dropped()
    );
    if elapsed > 0.0 {
        println!("Average rate: {:.1} fps", frames as f64 / elapsed);
    }
    if let Some((width, height)) = counter.last_size() {
        println!("Frame size: {}x{}", width, height);
    }
    Ok(())
}

/// Take a photo, optionally after running the preview for a while
pub fn take_photo(config: Config, output: Option<PathBuf>, preview_seconds: u64) -> CliResult {
    let output = resolve_output(output, &default_photo_dir(), "photo", "jpg");
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(photo_session(config, output, preview_seconds))
}

async fn photo_session(config: Config, output: PathBuf, preview_seconds: u64) -> CliResult {
    let counter = Arc::new(FrameCounter::default());
    let session = CameraSession::with_local_processes(config, counter.clone());
    let printer = tokio::spawn(print_events(session.events()));

    if preview_seconds > 0 {
        session.start_preview().await?;
        println!("Preview running for {}s...", preview_seconds);
        tokio::time::sleep(Duration::from_secs(preview_seconds)).await;
        println!("Preview frames: {}", counter.frames());
    }

    println!("Capturing...");
    let outcome = session
        .capture_photo(&output, CaptureOptions::default())
        .await;

    session.shutdown().await?;
    let _ = printer.await;

    match outcome? {
        Outcome::Success(path) => println!("Photo saved: {}", path.display()),
        Outcome::Cancelled => println!("Capture cancelled"),
    }
    Ok(())
}

/// Record a fixed-length video
pub fn record_video(config: Config, duration: u64, output: Option<PathBuf>) -> CliResult {
    let output = resolve_output(output, &default_video_dir(), "video", "mp4");
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(video_session(config, Duration::from_secs(duration), output))
}

async fn video_session(config: Config, duration: Duration, output: PathBuf) -> CliResult {
    let session = CameraSession::with_local_processes(config, Arc::new(FrameCounter::default()));
    let printer = tokio::spawn(print_events(session.events()));

    println!("Recording {}s to {}", duration.as_secs(), output.display());

    let capture = session.capture_video(&output, duration, CaptureOptions::default());
    tokio::pin!(capture);

    let started = Instant::now();
    let mut progress = tokio::time::interval(Duration::from_millis(100));
    let outcome = loop {
        tokio::select! {
            outcome = &mut capture => break outcome,
            _ = progress.tick() => {
                let elapsed = started.elapsed().as_secs();
                print!("\rRecording: {:02}:{:02}", elapsed / 60, elapsed % 60);
                std::io::Write::flush(&mut std::io::stdout())?;
            }
        }
    };
    println!();

    session.shutdown().await?;
    let _ = printer.await;

    match outcome? {
        Outcome::Success(path) => println!("Video saved: {}", path.display()),
        Outcome::Cancelled => println!("Recording cancelled"),
    }
    Ok(())
}

/// Print the effective configuration as JSON
pub fn print_config(config: &Config) -> CliResult {
    if let Some(path) = Config::default_path() {
        eprintln!("Default configuration file: {}", path.display());
    }
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

async fn print_events(mut events: BoxStream<'static, SessionEvent>) {
    while let Some(event) = events.next().await {
        let time = Local::now().format("%H:%M:%S%.3f");
        match event {
            SessionEvent::StateChanged { from, to } => {
                println!("[{}] {} -> {}", time, from, to);
            }
            SessionEvent::CaptureComplete { kind, path } => {
                println!("[{}] {} finished: {}", time, kind, path.display());
            }
            SessionEvent::Fault(error) => {
                eprintln!("[{}] Camera fault: {}", time, error);
            }
        }
    }
}

/// Ctrl+C wakes whoever waits on the returned notifier
fn interrupt_notifier() -> Result<Arc<Notify>, ctrlc::Error> {
    let notify = Arc::new(Notify::new());
    let handler_notify = notify.clone();
    ctrlc::set_handler(move || handler_notify.notify_one())?;
    Ok(notify)
}

/// Use the given path, a timestamped file inside it when it is a directory,
/// or a timestamped file in `default_dir`
fn resolve_output(
    output: Option<PathBuf>,
    default_dir: &Path,
    prefix: &str,
    extension: &str,
) -> PathBuf {
    let file_name = format!(
        "{}_{}.{}",
        prefix,
        Local::now().format("%Y%m%d_%H%M%S"),
        extension
    );
    match output {
        Some(path) if path.is_dir() => path.join(file_name),
        Some(path) => path,
        None => default_dir.join(file_name),
    }
}

/// Get default photo directory
fn default_photo_dir() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(DEFAULT_SAVE_FOLDER)
}

/// Get default video directory
fn default_video_dir() -> PathBuf {
    dirs::video_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(DEFAULT_SAVE_FOLDER)
}
