//! Lifecycle error types returned by the guard.

use thiserror::Error;

use crate::Phase;

/// Errors returned by [`RunLifecycle::start`](crate::RunLifecycle::start).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// `start` was called on a lifecycle that already left [`Phase::NotStarted`].
    #[error("'{name}' cannot be started more than once (currently {phase:?})")]
    AlreadyStarted { name: String, phase: Phase },
}
