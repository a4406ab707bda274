//! Forked worker processes.

use super::heartbeat;
use super::WorkerHandle;
use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::os::unix::net::UnixStream;
use std::time::Duration;
use tracing::{error, info, warn};

pub struct ProcessWorker {
    pid: Pid,
    control: UnixStream,
    exited: bool,
    exit_code: Option<i32>,
}

impl ProcessWorker {
    /// Forks and runs `target` in the child, which exits with its result.
    ///
    /// The caller must be single-threaded: only the forking thread exists
    /// in the child.
    pub fn spawn<F>(target: F) -> Result<Self>
    where
        F: FnOnce() -> Result<()>,
    {
        let (parent_end, child_end) = UnixStream::pair().context("failed to create control channel")?;
        // SAFETY: the supervisor forks before starting any runtime or thread.
        match unsafe { fork() }.context("fork failed")? {
            ForkResult::Parent { child } => {
                drop(child_end);
                info!("Started worker process {}", child);
                Ok(Self {
                    pid: child,
                    control: parent_end,
                    exited: false,
                    exit_code: None,
                })
            }
            ForkResult::Child => {
                drop(parent_end);
                install_child_signal_handlers();
                if let Err(e) = heartbeat::spawn_responder(child_end) {
                    error!("Failed to start heartbeat responder: {}", e);
                    std::process::exit(1);
                }
                let code = match target() {
                    Ok(()) => 0,
                    Err(e) => {
                        error!("Worker {} failed: {:#}", std::process::id(), e);
                        1
                    }
                };
                std::process::exit(code);
            }
        }
    }

    /// Exit code once the worker has exited normally; `None` while it runs
    /// or when a signal ended it.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    fn reap(&mut self, flags: Option<WaitPidFlag>) -> bool {
        if self.exited {
            return true;
        }
        match waitpid(self.pid, flags) {
            Ok(WaitStatus::StillAlive) => false,
            Ok(WaitStatus::Exited(_, code)) => {
                info!("Worker {} exited with code {}", self.pid, code);
                self.exited = true;
                self.exit_code = Some(code);
                true
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                info!("Worker {} killed by {}", self.pid, sig);
                self.exited = true;
                true
            }
            Ok(_) => false,
            Err(Errno::ECHILD) => {
                self.exited = true;
                true
            }
            Err(Errno::EINTR) => false,
            Err(e) => {
                warn!("waitpid({}) failed: {}", self.pid, e);
                false
            }
        }
    }
}

/// SIGTERM gets the default action and SIGINT is ignored until the
/// worker runtime installs its graceful handlers, so an interrupt is never
/// a crash.
fn install_child_signal_handlers() {
    for (sig, handler) in [(Signal::SIGTERM, SigHandler::SigDfl), (Signal::SIGINT, SigHandler::SigIgn)] {
        // SAFETY: default and ignore dispositions install no handler code.
        if let Err(e) = unsafe { signal::signal(sig, handler) } {
            warn!("Failed to set {} disposition: {}", sig, e);
        }
    }
}

impl WorkerHandle for ProcessWorker {
    fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    fn has_exited(&mut self) -> bool {
        self.reap(Some(WaitPidFlag::WNOHANG))
    }

    fn ping(&mut self, timeout: Duration) -> bool {
        heartbeat::ping(&mut self.control, timeout)
    }

    fn terminate(&mut self) {
        if self.exited {
            return;
        }
        if let Err(e) = signal::kill(self.pid, Signal::SIGTERM) {
            if e != Errno::ESRCH {
                warn!("Failed to send SIGTERM to {}: {}", self.pid, e);
            }
        }
    }

    fn kill(&mut self) {
        if self.exited {
            return;
        }
        match signal::kill(self.pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {
                self.reap(None);
            }
            Err(e) => warn!("Failed to send SIGKILL to {}: {}", self.pid, e),
        }
    }
}
