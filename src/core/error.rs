use crate::core::queue::SimTime;
use thiserror::Error;

/// Failures the simulator distinguishes.
///
/// Inside a scenario nothing is swallowed: any `SimError` aborts the run.
/// The multi-configuration driver traps per-configuration failures and
/// records them in the result map instead of halting the sweep.
#[derive(Debug, Clone, Error)]
pub enum SimError {
    #[error("event scheduled in the past: {event_time} < now {now}")]
    PastEvent { event_time: SimTime, now: SimTime },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("listener added during notification dispatch")]
    ConcurrentModification,

    #[error("duplicate result key: {0}")]
    DuplicateResultKey(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unknown property path: {0}")]
    UnknownProperty(String),

    #[error("type mismatch for property {path}: expected {expected}")]
    TypeMismatch { path: String, expected: &'static str },

    #[error("runtime fault: {0}")]
    RuntimeFault(String),
}
