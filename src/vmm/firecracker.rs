//! Firecracker process adapter.
//!
//! Starts one `firecracker` process per machine using its `--config-file`
//! mode, so no API round-trips are needed before boot. The API socket is
//! still requested; its appearance on disk is the readiness signal.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::errors::{KindlingError, KindlingResult};
use crate::layout::filenames;
use crate::vmm::{Hypervisor, MachineConfig};

const READINESS_POLL: Duration = Duration::from_millis(20);

/// Handle to one running firecracker process.
#[derive(Debug)]
pub struct FirecrackerHandle {
    child: Child,
    pid: u32,
}

impl FirecrackerHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

/// Launches microVMs by spawning the firecracker binary.
#[derive(Debug, Clone)]
pub struct FirecrackerAdapter {
    binary: PathBuf,
}

impl Default for FirecrackerAdapter {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("firecracker"),
        }
    }
}

impl FirecrackerAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific firecracker binary instead of resolving via `PATH`.
    pub fn with_binary(binary: PathBuf) -> Self {
        Self { binary }
    }

    fn write_config(&self, machine: &MachineConfig) -> KindlingResult<PathBuf> {
        let config_path = machine
            .socket_path
            .parent()
            .unwrap_or(Path::new("."))
            .join(filenames::MACHINE_CONFIG);
        let json = serde_json::to_string_pretty(machine)
            .map_err(|e| KindlingError::Launch(format!("failed to serialize config: {}", e)))?;
        fs::write(&config_path, json).map_err(|e| {
            KindlingError::Launch(format!(
                "failed to write {}: {}",
                config_path.display(),
                e
            ))
        })?;
        Ok(config_path)
    }
}

impl Hypervisor for FirecrackerAdapter {
    type Handle = FirecrackerHandle;

    fn start(&self, machine: &MachineConfig, timeout: Duration) -> KindlingResult<Self::Handle> {
        let config_path = self.write_config(machine)?;

        // A stale socket from a previous run would break the bind.
        let _ = fs::remove_file(&machine.socket_path);

        let mut child = Command::new(&self.binary)
            .arg("--api-sock")
            .arg(&machine.socket_path)
            .arg("--config-file")
            .arg(&config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                KindlingError::Launch(format!(
                    "failed to spawn {}: {}",
                    self.binary.display(),
                    e
                ))
            })?;
        let pid = child.id();

        // Readiness: the API socket appears once the process is serving.
        // An early exit within the window is a launch failure.
        let deadline = Instant::now() + timeout;
        loop {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(KindlingError::Launch(format!(
                    "firecracker exited during startup with {}",
                    status
                )));
            }
            if machine.socket_path.exists() {
                tracing::info!(pid, socket = %machine.socket_path.display(), "firecracker started");
                return Ok(FirecrackerHandle { child, pid });
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(KindlingError::Launch(format!(
                    "timed out after {:?} waiting for API socket {}",
                    timeout,
                    machine.socket_path.display()
                )));
            }
            thread::sleep(READINESS_POLL);
        }
    }

    fn shutdown(&self, handle: &mut Self::Handle, timeout: Duration) -> KindlingResult<()> {
        // Already reaped? Nothing left to stop.
        if let Ok(Some(_)) = handle.child.try_wait() {
            return Ok(());
        }

        // SIGTERM first; ESRCH means the process raced us to exit.
        match signal::kill(Pid::from_raw(handle.pid as i32), Signal::SIGTERM) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => {
                return Err(KindlingError::Shutdown(format!(
                    "failed to signal pid {}: {}",
                    handle.pid, e
                )))
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            match handle.child.try_wait() {
                Ok(Some(status)) => {
                    tracing::info!(pid = handle.pid, %status, "firecracker terminated");
                    return Ok(());
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        tracing::warn!(
                            pid = handle.pid,
                            "graceful shutdown timed out, sending SIGKILL"
                        );
                        handle.child.kill().map_err(|e| {
                            KindlingError::Shutdown(format!(
                                "failed to kill pid {}: {}",
                                handle.pid, e
                            ))
                        })?;
                        handle.child.wait().map_err(|e| {
                            KindlingError::Shutdown(format!(
                                "failed to reap pid {}: {}",
                                handle.pid, e
                            ))
                        })?;
                        return Ok(());
                    }
                    thread::sleep(READINESS_POLL);
                }
                Err(e) => {
                    return Err(KindlingError::Shutdown(format!(
                        "failed to poll pid {}: {}",
                        handle.pid, e
                    )))
                }
            }
        }
    }
}
