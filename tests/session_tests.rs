// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the camera session against a scripted supervisor

mod common;

use booth_camera::backends::camera::{ProcessKind, ProcessStatus};
use booth_camera::{
    CameraSession, CaptureOptions, Config, Outcome, SessionError, SessionEvent, SessionState,
};
use common::{FakeCamera, ProcessEvent, RecordingSink, jpeg_bytes};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(2);

fn test_config() -> Config {
    let mut config = Config::default();
    config.timing.poll_interval_ms = 10;
    config.timing.settle_delay_ms = 0;
    config
}

fn start(config: Config) -> (CameraSession, FakeCamera, Arc<RecordingSink>) {
    let camera = FakeCamera::new();
    let sink = Arc::new(RecordingSink::default());
    let session = CameraSession::new(config, camera.clone(), sink.clone());
    (session, camera, sink)
}

fn capture_target(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("booth-camera-session-{}", uuid::Uuid::new_v4()))
        .join(name)
}

async fn wait_for_state(session: &CameraSession, state: SessionState) {
    wait_for_state_within(session, state, WAIT).await;
}

async fn wait_for_state_within(session: &CameraSession, state: SessionState, limit: Duration) {
    let mut watch = session.watch_state();
    timeout(limit, watch.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", state))
        .unwrap();
}

async fn next_fault(events: &mut broadcast::Receiver<SessionEvent>) -> SessionError {
    next_fault_within(events, WAIT).await
}

async fn next_fault_within(
    events: &mut broadcast::Receiver<SessionEvent>,
    limit: Duration,
) -> SessionError {
    timeout(limit, async {
        loop {
            if let SessionEvent::Fault(error) = events.recv().await.unwrap() {
                return error;
            }
        }
    })
    .await
    .expect("no fault event")
}

#[tokio::test]
async fn test_prewarm_then_preview_reuses_process() {
    let (session, camera, sink) = start(test_config());

    session.prewarm().await.unwrap();
    assert_eq!(session.state(), SessionState::PreWarming);

    // Frames produced while pre-warming are drained, not shown
    let mut writer = camera.preview_writer().unwrap();
    writer.write_all(&jpeg_bytes(32, 24)).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.count(), 0);

    session.start_preview().await.unwrap();
    assert_eq!(session.state(), SessionState::PreviewActive);
    assert_eq!(camera.spawn_count(ProcessKind::Preview), 1);

    writer.write_all(&jpeg_bytes(32, 24)).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.count(), 1);

    // Repeated calls are no-ops
    session.prewarm().await.unwrap();
    session.start_preview().await.unwrap();
    assert_eq!(camera.spawn_count(ProcessKind::Preview), 1);

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_capture_hands_device_from_preview_and_back() {
    let (session, camera, _sink) = start(test_config());
    let mut events = session.subscribe();
    let target = capture_target("out.jpg");

    session.start_preview().await.unwrap();

    let capture = tokio::spawn({
        let session = session.clone();
        let target = target.clone();
        async move { session.capture_photo(target, CaptureOptions::default()).await }
    });

    wait_for_state(&session, SessionState::Capturing).await;
    assert_eq!(
        camera.log(),
        vec![
            ProcessEvent::Spawned(ProcessKind::Preview),
            ProcessEvent::Terminated(ProcessKind::Preview),
            ProcessEvent::Spawned(ProcessKind::StillCapture),
        ]
    );
    let still = camera.commands().pop().unwrap();
    assert_eq!(still.program, "rpicam-still");
    assert_eq!(still.value_of("-o"), target.to_str());
    assert!(target.parent().unwrap().is_dir());

    camera.exit(ProcessKind::StillCapture, ProcessStatus::ExitedOk);
    let outcome = timeout(WAIT, capture).await.unwrap().unwrap().unwrap();
    assert_eq!(outcome, Outcome::Success(target.clone()));

    // Preview comes back after a successful capture
    assert_eq!(session.state(), SessionState::PreviewActive);
    assert_eq!(camera.spawn_count(ProcessKind::Preview), 2);
    assert_eq!(camera.max_live(), 1);

    let complete = timeout(WAIT, async {
        loop {
            if let SessionEvent::CaptureComplete { kind, path } = events.recv().await.unwrap() {
                return (kind, path);
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(complete, (ProcessKind::StillCapture, target.clone()));

    session.shutdown().await.unwrap();
    if let Some(dir) = target.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

#[tokio::test]
async fn test_capture_without_resume_returns_to_idle() {
    let mut config = test_config();
    config.resume_preview_after_capture = false;
    let (session, camera, _sink) = start(config);
    let target = capture_target("still.jpg");

    session.start_preview().await.unwrap();
    let capture = tokio::spawn({
        let session = session.clone();
        let target = target.clone();
        async move { session.capture_photo(target, CaptureOptions::default()).await }
    });

    wait_for_state(&session, SessionState::Capturing).await;
    camera.exit(ProcessKind::StillCapture, ProcessStatus::ExitedOk);
    timeout(WAIT, capture).await.unwrap().unwrap().unwrap();

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(camera.spawn_count(ProcessKind::Preview), 1);
    assert_eq!(camera.live_count(), 0);

    session.shutdown().await.unwrap();
    if let Some(dir) = target.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

#[tokio::test]
async fn test_second_capture_is_rejected_busy() {
    let (session, camera, _sink) = start(test_config());
    let target = capture_target("clip.mp4");

    let capture = tokio::spawn({
        let session = session.clone();
        let target = target.clone();
        async move {
            session
                .capture_video(target, Duration::from_secs(5), CaptureOptions::default())
                .await
        }
    });
    wait_for_state(&session, SessionState::Capturing).await;

    let second = session
        .capture_photo(capture_target("other.jpg"), CaptureOptions::default())
        .await;
    assert_eq!(second, Err(SessionError::Busy));
    assert_eq!(session.prewarm().await, Err(SessionError::Busy));

    // The running capture is unaffected
    assert_eq!(session.state(), SessionState::Capturing);
    assert_eq!(camera.spawn_count(ProcessKind::VideoCapture), 1);
    let video = camera.commands().pop().unwrap();
    assert_eq!(video.value_of("-t"), Some("5000"));

    camera.exit(ProcessKind::VideoCapture, ProcessStatus::ExitedOk);
    let outcome = timeout(WAIT, capture).await.unwrap().unwrap();
    assert_eq!(outcome, Ok(Outcome::Success(target.clone())));
    assert_eq!(session.state(), SessionState::Idle);

    session.shutdown().await.unwrap();
    if let Some(dir) = target.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

#[tokio::test]
async fn test_preview_death_reports_device_fault() {
    let config = test_config();
    // A few poll ticks of slack for scheduling, far below WAIT
    let limit = config.timing.poll_interval() * 10;
    let (session, camera, _sink) = start(config);
    let mut events = session.subscribe();

    session.start_preview().await.unwrap();
    let died_at = Instant::now();
    camera.exit(ProcessKind::Preview, ProcessStatus::ExitedError(Some(255)));

    wait_for_state_within(&session, SessionState::Idle, limit).await;
    let fault = next_fault_within(&mut events, limit).await;
    assert!(died_at.elapsed() < limit, "fault took {:?}", died_at.elapsed());
    assert!(matches!(fault, SessionError::DeviceFault(_)), "{:?}", fault);

    // The session recovers with a fresh preview
    session.start_preview().await.unwrap();
    assert_eq!(camera.spawn_count(ProcessKind::Preview), 2);

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_capture_reports_device_fault() {
    let (session, camera, _sink) = start(test_config());
    let target = capture_target("broken.jpg");

    let capture = tokio::spawn({
        let session = session.clone();
        let target = target.clone();
        async move { session.capture_photo(target, CaptureOptions::default()).await }
    });
    wait_for_state(&session, SessionState::Capturing).await;

    camera.exit(ProcessKind::StillCapture, ProcessStatus::ExitedError(Some(1)));
    let outcome = timeout(WAIT, capture).await.unwrap().unwrap();
    assert!(matches!(outcome, Err(SessionError::DeviceFault(_))));
    assert_eq!(session.state(), SessionState::Idle);

    session.shutdown().await.unwrap();
    if let Some(dir) = target.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

#[tokio::test]
async fn test_stop_preview_is_idempotent() {
    let (session, camera, _sink) = start(test_config());

    session.stop_preview().await.unwrap();
    session.start_preview().await.unwrap();
    session.stop_preview().await.unwrap();
    session.stop_preview().await.unwrap();

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(camera.live_count(), 0);
    assert_eq!(
        camera.log(),
        vec![
            ProcessEvent::Spawned(ProcessKind::Preview),
            ProcessEvent::Terminated(ProcessKind::Preview),
        ]
    );

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_preview_frames_arrive_in_order() {
    let (session, camera, sink) = start(test_config());
    session.start_preview().await.unwrap();

    let mut writer = camera.preview_writer().unwrap();
    let frame = jpeg_bytes(48, 32);
    for _ in 0..5 {
        writer.write_all(&frame).await.unwrap();
        sleep(Duration::from_millis(20)).await;
    }
    sleep(Duration::from_millis(200)).await;

    let sequences = sink.sequences();
    assert!(!sequences.is_empty());
    assert!(sequences.windows(2).all(|w| w[0] < w[1]), "{:?}", sequences);
    // The newest frame is never dropped
    assert_eq!(sequences.last(), Some(&5));
    assert!(sink.sizes().iter().all(|size| *size == (48, 32)));

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_frame_sequence_continues_after_resumed_preview() {
    let (session, camera, sink) = start(test_config());
    let target = capture_target("resume.jpg");
    let frame = jpeg_bytes(32, 24);

    session.start_preview().await.unwrap();
    let mut writer = camera.preview_writer().unwrap();
    for _ in 0..3 {
        writer.write_all(&frame).await.unwrap();
        sleep(Duration::from_millis(30)).await;
    }

    let capture = tokio::spawn({
        let session = session.clone();
        let target = target.clone();
        async move { session.capture_photo(target, CaptureOptions::default()).await }
    });
    wait_for_state(&session, SessionState::Capturing).await;
    camera.exit(ProcessKind::StillCapture, ProcessStatus::ExitedOk);
    timeout(WAIT, capture).await.unwrap().unwrap().unwrap();
    wait_for_state(&session, SessionState::PreviewActive).await;

    let mut writer = camera.preview_writer().unwrap();
    for _ in 0..2 {
        writer.write_all(&frame).await.unwrap();
        sleep(Duration::from_millis(30)).await;
    }
    sleep(Duration::from_millis(100)).await;

    let sequences = sink.sequences();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]), "{:?}", sequences);
    assert_eq!(sequences.last(), Some(&5));

    session.shutdown().await.unwrap();
    if let Some(dir) = target.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

#[tokio::test]
async fn test_cancel_pending_capture_keeps_preview() {
    let mut config = test_config();
    // Long enough that only the frame boundary or a cancel ends the wait
    config.timing.boundary_timeout_ms = 10_000;
    let (session, camera, sink) = start(config);

    session.start_preview().await.unwrap();
    let mut writer = camera.preview_writer().unwrap();
    let frame = jpeg_bytes(32, 24);
    let (head, tail) = frame.split_at(frame.len() / 2);
    writer.write_all(head).await.unwrap();
    sleep(Duration::from_millis(50)).await;

    let capture = tokio::spawn({
        let session = session.clone();
        async move {
            session
                .capture_photo(capture_target("never.jpg"), CaptureOptions::default())
                .await
        }
    });
    wait_for_state(&session, SessionState::CapturePending).await;

    assert_eq!(session.cancel_capture().await, Ok(true));
    let outcome = timeout(WAIT, capture).await.unwrap().unwrap();
    assert_eq!(outcome, Ok(Outcome::Cancelled));
    assert_eq!(session.state(), SessionState::PreviewActive);
    assert_eq!(camera.spawn_count(ProcessKind::StillCapture), 0);
    assert!(camera.is_running(ProcessKind::Preview));

    // The same preview stream keeps flowing
    writer.write_all(tail).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.count(), 1);

    // Nothing left to cancel
    assert_eq!(session.cancel_capture().await, Ok(false));

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_pending_capture_waits_for_frame_boundary() {
    let mut config = test_config();
    config.timing.boundary_timeout_ms = 10_000;
    let (session, camera, _sink) = start(config);
    let target = capture_target("boundary.jpg");

    session.start_preview().await.unwrap();
    let mut writer = camera.preview_writer().unwrap();
    let frame = jpeg_bytes(32, 24);
    let (head, tail) = frame.split_at(frame.len() / 2);
    writer.write_all(head).await.unwrap();
    sleep(Duration::from_millis(50)).await;

    let capture = tokio::spawn({
        let session = session.clone();
        let target = target.clone();
        async move { session.capture_photo(target, CaptureOptions::default()).await }
    });
    wait_for_state(&session, SessionState::CapturePending).await;

    // Mid-frame: the preview must not be stopped yet
    sleep(Duration::from_millis(100)).await;
    assert_eq!(session.state(), SessionState::CapturePending);
    assert!(camera.is_running(ProcessKind::Preview));

    writer.write_all(tail).await.unwrap();
    wait_for_state(&session, SessionState::Capturing).await;
    assert!(!camera.is_running(ProcessKind::Preview));

    camera.exit(ProcessKind::StillCapture, ProcessStatus::ExitedOk);
    let outcome = timeout(WAIT, capture).await.unwrap().unwrap();
    assert_eq!(outcome, Ok(Outcome::Success(target.clone())));

    session.shutdown().await.unwrap();
    if let Some(dir) = target.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

#[tokio::test]
async fn test_spawn_failure_leaves_session_idle() {
    let (session, camera, _sink) = start(test_config());
    camera.fail_spawn(ProcessKind::Preview);

    let result = session.start_preview().await;
    assert!(matches!(result, Err(SessionError::Spawn(_))), "{:?}", result);
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(camera.live_count(), 0);

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_forced_termination_is_reported() {
    let (session, camera, _sink) = start(test_config());
    let mut events = session.subscribe();
    camera.ignore_graceful_stop();

    session.start_preview().await.unwrap();
    session.stop_preview().await.unwrap();

    let fault = next_fault(&mut events).await;
    assert!(
        matches!(
            fault,
            SessionError::Timeout {
                kind: ProcessKind::Preview,
                ..
            }
        ),
        "{:?}",
        fault
    );
    assert_eq!(session.state(), SessionState::Idle);

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_prewarm_expires_when_unused() {
    let mut config = test_config();
    config.timing.prewarm_timeout_ms = 50;
    let (session, camera, _sink) = start(config);

    session.prewarm().await.unwrap();
    wait_for_state(&session, SessionState::Idle).await;
    assert_eq!(camera.live_count(), 0);
    assert_eq!(
        camera.log().last(),
        Some(&ProcessEvent::Terminated(ProcessKind::Preview))
    );

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_rejects_later_calls() {
    let (session, camera, _sink) = start(test_config());
    let events = session.events();

    session.start_preview().await.unwrap();
    session.shutdown().await.unwrap();

    assert_eq!(camera.live_count(), 0);
    assert_eq!(session.start_preview().await, Err(SessionError::ShutDown));
    assert_eq!(
        session
            .capture_photo(capture_target("late.jpg"), CaptureOptions::default())
            .await,
        Err(SessionError::ShutDown)
    );
    // Shutting down twice is fine
    session.shutdown().await.unwrap();

    // The event stream ends with the session
    let seen: Vec<SessionEvent> = timeout(WAIT, events.collect()).await.unwrap();
    assert!(seen.contains(&SessionEvent::StateChanged {
        from: SessionState::PreviewActive,
        to: SessionState::ShuttingDown,
    }));
}
