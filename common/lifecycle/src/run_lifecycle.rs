//! Start/stop guard.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::LifecycleError;

/// Phases of a [`RunLifecycle`], in the only order they can be visited.
/// `Stopped` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Phase {
    NotStarted = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Phase::NotStarted,
            1 => Phase::Starting,
            2 => Phase::Running,
            3 => Phase::Stopping,
            _ => Phase::Stopped,
        }
    }
}

/// Guards the start and stop of a component so that each body runs at most once,
/// even under concurrent callers.
///
/// Transitions are serialized by an async mutex held for the duration of the
/// supplied body, so a `stop` racing a `start` waits for the start to finish and
/// then tears down whatever it brought up. The current phase is mirrored into an
/// atomic so [`status`](RunLifecycle::status) never blocks.
///
/// A failed start leaves the lifecycle in [`Phase::Starting`]; the owner is expected
/// to call [`stop`](RunLifecycle::stop) to release anything the partial start acquired.
pub struct RunLifecycle {
    name: String,
    transition: Mutex<()>,
    phase: AtomicU8,
    started: AtomicBool,
}

impl RunLifecycle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transition: Mutex::new(()),
            phase: AtomicU8::new(Phase::NotStarted as u8),
            started: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Non-blocking `(started, stopped)` snapshot. `started` is true once a start was
    /// attempted, whether or not it succeeded. Meant for observability and tests only.
    pub fn status(&self) -> (bool, bool) {
        (
            self.started.load(Ordering::SeqCst),
            self.phase() == Phase::Stopped,
        )
    }

    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    /// Run `start_fn` once, moving `NotStarted -> Starting -> Running`.
    ///
    /// Any other starting phase returns [`LifecycleError::AlreadyStarted`] without
    /// invoking `start_fn`. If `start_fn` fails its error is returned as-is and the
    /// lifecycle stays in `Starting`.
    pub async fn start<F, Fut, E>(&self, start_fn: F) -> Result<(), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: From<LifecycleError>,
    {
        let _transition = self.transition.lock().await;

        let phase = self.phase();
        if phase != Phase::NotStarted {
            debug!(name = %self.name, ?phase, "Lifecycle: start rejected");
            return Err(LifecycleError::AlreadyStarted {
                name: self.name.clone(),
                phase,
            }
            .into());
        }

        self.set_phase(Phase::Starting);
        self.started.store(true, Ordering::SeqCst);
        start_fn().await?;
        self.set_phase(Phase::Running);
        debug!(name = %self.name, "Lifecycle: running");
        Ok(())
    }

    /// Run `stop_fn` once, moving `Starting | Running -> Stopping -> Stopped`.
    ///
    /// A lifecycle that was never started moves straight to `Stopped` without running
    /// `stop_fn`; one that is already stopped is left alone. Concurrent callers wait
    /// for the first teardown to finish. Returns whether `stop_fn` ran in this call.
    pub async fn stop<F, Fut>(&self, stop_fn: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let _transition = self.transition.lock().await;

        match self.phase() {
            Phase::Stopped => return false,
            Phase::NotStarted => {
                debug!(name = %self.name, "Lifecycle: stopped before start");
                self.set_phase(Phase::Stopped);
                return false;
            }
            Phase::Starting | Phase::Running | Phase::Stopping => {}
        }

        self.set_phase(Phase::Stopping);
        stop_fn().await;
        self.set_phase(Phase::Stopped);
        debug!(name = %self.name, "Lifecycle: stopped");
        true
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }
}
