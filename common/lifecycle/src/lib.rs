//! Run lifecycle guard: a one-shot start/stop state machine shared by anything that
//! needs idempotent, race-free start and stop. Each transition body runs at most once,
//! and a stopped component can never be started again.

mod error;
mod run_lifecycle;

pub use error::LifecycleError;
pub use run_lifecycle::{Phase, RunLifecycle};
