//! Error types for lease pool operations.
//!
//! Each component owns a narrow error enum (`GateError`, `SchedulerError`,
//! `ConfigError`). `LeaseError` is what pool and registry callers see; it wraps
//! the component errors and adds the lease-specific failures.

use crate::config::ConfigError;
use crate::gate::GateError;
use crate::pool::PoolId;
use crate::scheduler::SchedulerError;
use std::time::Duration;
use thiserror::Error;

/// Result type for lease operations.
pub type Result<T> = std::result::Result<T, LeaseError>;

/// Errors returned by [`LeasePool`](crate::LeasePool) and
/// [`LeaseRegistry`](crate::LeaseRegistry) operations.
#[derive(Error, Debug)]
pub enum LeaseError {
    /// The pool has been shut down
    #[error("lease pool is closed")]
    Closed,

    /// The handle does not name a live lease (double release or stale handle)
    #[error("resource {0} is not leased by this handle")]
    NotLeased(usize),

    /// The handle was never issued by this pool
    #[error("handle was not issued by this pool")]
    UnknownHandle,

    /// A bounded wait for a resource ran out
    #[error("timed out after {0:?} waiting for a resource")]
    TimedOut(Duration),

    /// A non-blocking acquire found no free resource
    #[error("no resource available")]
    Unavailable,

    /// More resources were requested than the pool will ever hold
    #[error("requested {requested} resources from a pool of {capacity}")]
    ExceedsCapacity {
        /// Number of resources requested
        requested: usize,
        /// Capacity of the pool
        capacity: usize,
    },

    /// Lease durations must be non-zero
    #[error("lease duration must be greater than zero")]
    InvalidDuration,

    /// No pool is registered under this id
    #[error("unknown lease pool: {0}")]
    UnknownPool(PoolId),

    /// The expiration timer could not be armed
    #[error("expiration scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Invalid pool configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl LeaseError {
    /// Whether the caller may reasonably retry the same call later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TimedOut(_) | Self::Unavailable)
    }
}

impl From<GateError> for LeaseError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::TimedOut(waited) => Self::TimedOut(waited),
            GateError::Closed => Self::Closed,
            GateError::Unavailable => Self::Unavailable,
            GateError::ExceedsCapacity {
                requested,
                capacity,
            } => Self::ExceedsCapacity {
                requested,
                capacity,
            },
        }
    }
}
