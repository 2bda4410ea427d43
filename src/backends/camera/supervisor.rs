// SPDX-License-Identifier: GPL-3.0-only

//! Local process supervisor
//!
//! Launches the rpicam programs with `tokio::process`, owns their pipes and
//! guarantees every child it started is reaped: terminate waits for the exit
//! status, and children are spawned with `kill_on_drop` so dropping the
//! supervisor cannot leave one running.

use super::ProcessSupervisor;
use super::types::{
    CameraProcessHandle, CommandSpec, ProcessId, ProcessKind, ProcessStatus, Termination,
};
use crate::errors::SpawnError;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Consecutive `try_wait` failures after which a process is given up as dead
const MAX_POLL_FAILURES: u32 = 3;

struct ManagedProcess {
    child: Child,
    kind: ProcessKind,
    stdout: Option<ChildStdout>,
    poll_failures: PollFailures,
}

/// Counts status queries that failed in a row
#[derive(Debug, Default)]
struct PollFailures(u32);

impl PollFailures {
    /// Record a failure; true once the limit is reached
    fn record(&mut self) -> bool {
        self.0 += 1;
        self.0 >= MAX_POLL_FAILURES
    }

    fn reset(&mut self) {
        self.0 = 0;
    }
}

/// Supervisor for real operating system processes
#[derive(Default)]
pub struct LocalProcessSupervisor {
    processes: HashMap<ProcessId, ManagedProcess>,
    next_id: u64,
}

impl LocalProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kind of a process that still holds the camera, if any
    fn device_holder(&mut self) -> Option<ProcessKind> {
        self.processes
            .values_mut()
            .find_map(|p| matches!(p.child.try_wait(), Ok(None)).then_some(p.kind))
    }
}

impl ProcessSupervisor for LocalProcessSupervisor {
    type Output = ChildStdout;

    fn spawn(
        &mut self,
        kind: ProcessKind,
        command: &CommandSpec,
    ) -> Result<CameraProcessHandle, SpawnError> {
        if let Some(held_by) = self.device_holder() {
            warn!(%kind, %held_by, "Refusing to spawn while the camera is claimed");
            return Err(SpawnError::DeviceBusy { held_by });
        }

        let stdout = if kind == ProcessKind::Preview {
            Stdio::piped()
        } else {
            Stdio::null()
        };

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    SpawnError::ExecutableNotFound(format!("{} ({})", command.program, e))
                }
                _ => SpawnError::Io(format!("{}: {}", command.program, e)),
            })?;

        self.next_id += 1;
        let id = ProcessId(self.next_id);
        let pid = child.id();

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr, kind, id));
        }

        info!(%kind, %id, ?pid, command = %command, "Spawned camera process");

        let stdout = child.stdout.take();
        self.processes.insert(
            id,
            ManagedProcess {
                child,
                kind,
                stdout,
                poll_failures: PollFailures::default(),
            },
        );

        Ok(CameraProcessHandle {
            id,
            kind,
            pid,
            started_at: Instant::now(),
        })
    }

    fn take_output(&mut self, handle: &CameraProcessHandle) -> Option<ChildStdout> {
        self.processes
            .get_mut(&handle.id)
            .and_then(|p| p.stdout.take())
    }

    fn poll(&mut self, handle: &CameraProcessHandle) -> ProcessStatus {
        let Some(process) = self.processes.get_mut(&handle.id) else {
            return ProcessStatus::ExitedError(None);
        };

        match process.child.try_wait() {
            Ok(None) => {
                process.poll_failures.reset();
                ProcessStatus::Running
            }
            Ok(Some(status)) => {
                // Reaped by try_wait; the handle is dead from here on
                self.processes.remove(&handle.id);
                let status = ProcessStatus::from(status);
                debug!(kind = %handle.kind, id = %handle.id, %status, "Camera process exited");
                status
            }
            Err(e) => {
                warn!(kind = %handle.kind, id = %handle.id, error = %e, "Failed to poll camera process");
                if !process.poll_failures.record() {
                    return ProcessStatus::Running;
                }
                // Unobservable from here on; dropping the child kills it
                self.processes.remove(&handle.id);
                warn!(kind = %handle.kind, id = %handle.id, "Giving up on camera process");
                ProcessStatus::ExitedError(None)
            }
        }
    }

    async fn terminate(
        &mut self,
        handle: CameraProcessHandle,
        graceful_timeout: Duration,
    ) -> Termination {
        let Some(mut process) = self.processes.remove(&handle.id) else {
            debug!(id = %handle.id, "Terminate on a process that is already gone");
            return Termination::AlreadyExited(ProcessStatus::ExitedError(None));
        };
        // Close our end of the pipe first so a blocked writer sees EPIPE
        drop(process.stdout.take());

        if let Ok(Some(status)) = process.child.try_wait() {
            return Termination::AlreadyExited(status.into());
        }

        send_graceful_stop(&mut process.child);
        let signalled_at = Instant::now();

        match tokio::time::timeout(graceful_timeout, process.child.wait()).await {
            Ok(Ok(status)) => {
                let status = ProcessStatus::from(status);
                info!(kind = %handle.kind, id = %handle.id, %status, "Camera process stopped");
                Termination::Graceful(status)
            }
            Ok(Err(e)) => {
                warn!(kind = %handle.kind, id = %handle.id, error = %e, "Wait failed, killing process");
                force_kill(&mut process.child, &handle).await;
                Termination::Forced {
                    waited: signalled_at.elapsed(),
                }
            }
            Err(_) => {
                warn!(
                    kind = %handle.kind,
                    id = %handle.id,
                    timeout_ms = graceful_timeout.as_millis() as u64,
                    "Camera process ignored graceful stop, killing"
                );
                force_kill(&mut process.child, &handle).await;
                Termination::Forced {
                    waited: graceful_timeout,
                }
            }
        }
    }
}

#[cfg(unix)]
fn send_graceful_stop(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    // SAFETY: pid belongs to a child we have not reaped yet, so it cannot
    // have been recycled for an unrelated process.
    let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if result != 0 {
        debug!(pid, error = %std::io::Error::last_os_error(), "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn send_graceful_stop(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "Failed to signal camera process");
    }
}

/// SIGKILL and reap
async fn force_kill(child: &mut Child, handle: &CameraProcessHandle) {
    if let Err(e) = child.kill().await {
        warn!(kind = %handle.kind, id = %handle.id, error = %e, "Kill failed, waiting for exit");
        if let Err(e) = child.wait().await {
            warn!(kind = %handle.kind, id = %handle.id, error = %e, "Could not reap camera process");
        }
    }
    info!(kind = %handle.kind, id = %handle.id, "Camera process killed");
}

async fn forward_stderr(stderr: ChildStderr, kind: ProcessKind, id: ProcessId) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(%kind, %id, "{}", line),
            Ok(None) => break,
            Err(e) => {
                debug!(%kind, %id, error = %e, "stderr closed");
                break;
            }
        }
    }
}
