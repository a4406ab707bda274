//! Multiprocess REST supervisor.
//!
//! The parent binds the listeners, forks a fixed number of workers that
//! serve from those same sockets, and replaces any worker that exits or
//! stops answering heartbeats. Shutdown is SIGTERM first and SIGKILL for
//! whatever is still running after the grace period.
//!
//! The parent loop is synchronous and starts no threads, so every fork
//! happens from a single-threaded process.

pub mod heartbeat;
pub mod worker;

use anyhow::Result;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

pub use worker::ProcessWorker;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Alive,
    Dead,
    Terminating,
    Terminated,
}

/// What the supervisor needs from a worker process.
pub trait WorkerHandle {
    fn pid(&self) -> u32;

    /// Non-blocking; reaps the process once it is gone.
    fn has_exited(&mut self) -> bool;

    fn ping(&mut self, timeout: Duration) -> bool;

    /// Asks the worker to stop (SIGTERM).
    fn terminate(&mut self);

    /// Forces the worker to stop (SIGKILL).
    fn kill(&mut self);
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub workers: usize,
    pub health_check_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub timeout_graceful_shutdown: Duration,
}

impl SupervisorConfig {
    pub fn from_config(cfg: &crate::config::Config) -> Self {
        Self {
            workers: cfg.workers,
            health_check_interval: Duration::from_secs(cfg.health_check_interval_seconds),
            heartbeat_timeout: Duration::from_secs(cfg.heartbeat_timeout_seconds),
            timeout_graceful_shutdown: Duration::from_secs(cfg.timeout_graceful_shutdown),
        }
    }
}

struct Slot<W> {
    worker: W,
    state: WorkerState,
}

pub struct Supervisor<W, F>
where
    W: WorkerHandle,
    F: FnMut() -> Result<W>,
{
    config: SupervisorConfig,
    spawn: F,
    slots: Vec<Slot<W>>,
}

impl<W, F> Supervisor<W, F>
where
    W: WorkerHandle,
    F: FnMut() -> Result<W>,
{
    pub fn new(config: SupervisorConfig, spawn: F) -> Self {
        Self {
            config,
            spawn,
            slots: Vec::new(),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        info!("Starting {} worker processes", self.config.workers);
        while self.slots.len() < self.config.workers {
            let worker = (self.spawn)()?;
            self.slots.push(Slot {
                worker,
                state: WorkerState::Starting,
            });
        }
        Ok(())
    }

    pub fn pids(&self) -> Vec<u32> {
        self.slots.iter().map(|s| s.worker.pid()).collect()
    }

    pub fn states(&self) -> Vec<WorkerState> {
        self.slots.iter().map(|s| s.state).collect()
    }

    /// One health pass. Returns the number of workers replaced.
    pub fn check_workers(&mut self) -> Result<usize> {
        let mut replaced = 0;
        for idx in 0..self.slots.len() {
            let slot = &mut self.slots[idx];
            let pid = slot.worker.pid();
            if slot.worker.has_exited() {
                warn!("Worker {} is dead, restarting", pid);
                slot.state = WorkerState::Dead;
            } else if !slot.worker.ping(self.config.heartbeat_timeout) {
                warn!("Worker {} failed heartbeat, restarting", pid);
                slot.state = WorkerState::Dead;
                stop_worker(&mut slot.worker, &mut slot.state, self.config.timeout_graceful_shutdown);
            } else {
                slot.state = WorkerState::Alive;
                continue;
            }

            let worker = (self.spawn)()?;
            info!("Replaced worker {} with {}", pid, worker.pid());
            self.slots[idx] = Slot {
                worker,
                state: WorkerState::Starting,
            };
            replaced += 1;
        }
        Ok(replaced)
    }

    /// Health-checks on the configured interval until `stop` is set.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        while !stop.load(Ordering::SeqCst) {
            sleep_unless(stop, self.config.health_check_interval);
            if stop.load(Ordering::SeqCst) {
                break;
            }
            if let Err(e) = self.check_workers() {
                error!("Worker health check failed: {:#}", e);
            }
        }
        Ok(())
    }

    /// SIGTERM to every worker, then SIGKILL to those still alive after the
    /// grace period.
    pub fn terminate_all(&mut self) {
        info!("Stopping {} worker processes", self.slots.len());
        for slot in &mut self.slots {
            if slot.worker.has_exited() {
                slot.state = WorkerState::Terminated;
            } else {
                slot.worker.terminate();
                slot.state = WorkerState::Terminating;
            }
        }

        let deadline = Instant::now() + self.config.timeout_graceful_shutdown;
        loop {
            let mut pending = false;
            for slot in &mut self.slots {
                if slot.state == WorkerState::Terminating {
                    if slot.worker.has_exited() {
                        slot.state = WorkerState::Terminated;
                    } else {
                        pending = true;
                    }
                }
            }
            if !pending || Instant::now() >= deadline {
                break;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }

        for slot in &mut self.slots {
            if slot.state == WorkerState::Terminating {
                warn!("Worker {} did not exit in time, killing", slot.worker.pid());
                slot.worker.kill();
                slot.state = WorkerState::Terminated;
            }
        }
    }
}

/// Terminate, wait for the grace period, kill if still present.
fn stop_worker<W: WorkerHandle>(worker: &mut W, state: &mut WorkerState, grace: Duration) {
    if worker.has_exited() {
        *state = WorkerState::Terminated;
        return;
    }
    worker.terminate();
    *state = WorkerState::Terminating;
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if worker.has_exited() {
            *state = WorkerState::Terminated;
            return;
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
    if worker.has_exited() {
        *state = WorkerState::Terminated;
        return;
    }
    warn!("Worker {} did not exit in time, killing", worker.pid());
    worker.kill();
    *state = WorkerState::Terminated;
}

fn sleep_unless(stop: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(100)));
    }
}

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn request_stop(_: nix::libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

/// Routes SIGINT and SIGTERM to a flag the supervisor loop polls.
pub fn install_stop_handler() -> Result<&'static AtomicBool> {
    let action = SigAction::new(SigHandler::Handler(request_stop), SaFlags::SA_RESTART, SigSet::empty());
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic.
        unsafe { signal::sigaction(sig, &action) }?;
    }
    Ok(&STOP_REQUESTED)
}
