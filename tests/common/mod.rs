// SPDX-License-Identifier: GPL-3.0-only

//! Test doubles for the camera session: a scripted process supervisor and a
//! recording frame sink

#![allow(dead_code)]

use booth_camera::backends::camera::{
    CameraProcessHandle, CommandSpec, Frame, FrameSink, ProcessId, ProcessKind, ProcessStatus,
    ProcessSupervisor, Termination,
};
use booth_camera::errors::SpawnError;
use image::{ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::future::Future;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::DuplexStream;

/// What the fake supervisor was asked to do, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Spawned(ProcessKind),
    Terminated(ProcessKind),
}

struct FakeProcess {
    kind: ProcessKind,
    status: ProcessStatus,
    /// Test side of the preview pipe
    writer: Option<DuplexStream>,
    /// Reader side, handed out by take_output
    output: Option<DuplexStream>,
}

#[derive(Default)]
struct FakeState {
    processes: HashMap<u64, FakeProcess>,
    next_id: u64,
    log: Vec<ProcessEvent>,
    commands: Vec<CommandSpec>,
    max_live: usize,
    failing: Vec<ProcessKind>,
    stubborn: bool,
}

impl FakeState {
    fn live_count(&self) -> usize {
        self.processes
            .values()
            .filter(|p| p.status.is_running())
            .count()
    }

    fn running_mut(&mut self, kind: ProcessKind) -> Option<&mut FakeProcess> {
        self.processes
            .values_mut()
            .find(|p| p.kind == kind && p.status.is_running())
    }
}

/// Scripted camera: processes run until the test finishes them
#[derive(Clone, Default)]
pub struct FakeCamera {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the write end of the running preview's stdout
    pub fn preview_writer(&self) -> Option<DuplexStream> {
        let mut state = self.state.lock().unwrap();
        state
            .running_mut(ProcessKind::Preview)
            .and_then(|p| p.writer.take())
    }

    /// Make the running process of `kind` exit with `status`
    pub fn exit(&self, kind: ProcessKind, status: ProcessStatus) {
        let mut state = self.state.lock().unwrap();
        let process = state
            .running_mut(kind)
            .unwrap_or_else(|| panic!("no running {} process", kind));
        process.status = status;
        process.writer = None;
    }

    /// Spawning `kind` fails as if the executable were missing
    pub fn fail_spawn(&self, kind: ProcessKind) {
        self.state.lock().unwrap().failing.push(kind);
    }

    /// Processes ignore the graceful stop and have to be killed
    pub fn ignore_graceful_stop(&self) {
        self.state.lock().unwrap().stubborn = true;
    }

    pub fn log(&self) -> Vec<ProcessEvent> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn spawn_count(&self, kind: ProcessKind) -> usize {
        self.log()
            .iter()
            .filter(|e| **e == ProcessEvent::Spawned(kind))
            .count()
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn live_count(&self) -> usize {
        self.state.lock().unwrap().live_count()
    }

    /// Highest number of simultaneously running processes ever observed
    pub fn max_live(&self) -> usize {
        self.state.lock().unwrap().max_live
    }

    pub fn is_running(&self, kind: ProcessKind) -> bool {
        self.state.lock().unwrap().running_mut(kind).is_some()
    }
}

impl ProcessSupervisor for FakeCamera {
    type Output = DuplexStream;

    fn spawn(
        &mut self,
        kind: ProcessKind,
        command: &CommandSpec,
    ) -> Result<CameraProcessHandle, SpawnError> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(&kind) {
            return Err(SpawnError::ExecutableNotFound(command.program.clone()));
        }
        if let Some(holder) = state.processes.values().find(|p| p.status.is_running()) {
            return Err(SpawnError::DeviceBusy {
                held_by: holder.kind,
            });
        }

        let (writer, output) = if kind == ProcessKind::Preview {
            let (writer, output) = tokio::io::duplex(256 * 1024);
            (Some(writer), Some(output))
        } else {
            (None, None)
        };

        state.next_id += 1;
        let id = state.next_id;
        state.processes.insert(
            id,
            FakeProcess {
                kind,
                status: ProcessStatus::Running,
                writer,
                output,
            },
        );
        state.log.push(ProcessEvent::Spawned(kind));
        state.commands.push(command.clone());
        state.max_live = state.max_live.max(state.live_count());

        Ok(CameraProcessHandle {
            id: ProcessId(id),
            kind,
            pid: None,
            started_at: Instant::now(),
        })
    }

    fn take_output(&mut self, handle: &CameraProcessHandle) -> Option<DuplexStream> {
        let mut state = self.state.lock().unwrap();
        state
            .processes
            .get_mut(&handle.id.0)
            .and_then(|p| p.output.take())
    }

    fn poll(&mut self, handle: &CameraProcessHandle) -> ProcessStatus {
        let mut state = self.state.lock().unwrap();
        let Some(process) = state.processes.get(&handle.id.0) else {
            return ProcessStatus::ExitedError(None);
        };
        let status = process.status;
        if !status.is_running() {
            state.processes.remove(&handle.id.0);
        }
        status
    }

    fn terminate(
        &mut self,
        handle: CameraProcessHandle,
        graceful_timeout: Duration,
    ) -> impl Future<Output = Termination> + Send {
        let mut state = self.state.lock().unwrap();
        let termination = match state.processes.remove(&handle.id.0) {
            None => Termination::AlreadyExited(ProcessStatus::ExitedError(None)),
            Some(process) if !process.status.is_running() => {
                Termination::AlreadyExited(process.status)
            }
            Some(process) => {
                state.log.push(ProcessEvent::Terminated(process.kind));
                if state.stubborn {
                    Termination::Forced {
                        waited: graceful_timeout,
                    }
                } else {
                    Termination::Graceful(ProcessStatus::ExitedOk)
                }
            }
        };
        async move { termination }
    }
}

/// Sink that keeps the sequence number and size of every presented frame
#[derive(Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<(u64, u32, u32)>>,
}

impl RecordingSink {
    pub fn sequences(&self) -> Vec<u64> {
        self.frames.lock().unwrap().iter().map(|f| f.0).collect()
    }

    pub fn count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn sizes(&self) -> Vec<(u32, u32)> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|f| (f.1, f.2))
            .collect()
    }
}

impl FrameSink for RecordingSink {
    fn present(&self, frame: Frame) {
        self.frames
            .lock()
            .unwrap()
            .push((frame.sequence, frame.width(), frame.height()));
    }
}

/// A small solid colour JPEG
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([200, 40, 40]));
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Jpeg).unwrap();
    bytes.into_inner()
}
