#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

//! # Lion Lease
//!
//! Timed, fair resource leasing for the Lion microkernel.
//!
//! A [`LeasePool`] hands out a fixed number of interchangeable resources to
//! concurrent callers. Every lease has a hard upper bound on how long it may
//! be held; when the holder never gives the resource back, a background timer
//! reclaims it. The crate is built from four pieces:
//!
//! - A FIFO admission gate that queues callers while no resource is free
//! - A dedicated expiration scheduler running cancellable one-shot timers
//! - Per-resource lease records with generation-checked reclamation
//! - The pool itself, plus a registry of named pools
//!
//! ## Example
//!
//! ```no_run
//! use lion_lease::LeasePool;
//! use std::time::Duration;
//!
//! let pool = LeasePool::with_capacity(2).unwrap();
//! let handle = pool.acquire(Duration::from_millis(100)).unwrap();
//! assert!(pool.remaining_time(&handle) <= Duration::from_millis(100));
//! pool.release(&handle).unwrap();
//! ```

/// Pool configuration
pub mod config;

/// Pool-level error type
pub mod error;

/// FIFO admission control
pub mod gate;

/// Lease pools, handles and lease records
pub mod pool;

/// Registry of named pools
pub mod registry;

/// Background expiration timers
pub mod scheduler;

// Re-export key types for easier access
pub use config::{ConfigError, LeasePoolConfig};
pub use error::{LeaseError, Result};
pub use gate::{FairAdmissionGate, GateError};
pub use pool::{LeasePool, PoolId, PoolStats, ResourceHandle, ResourceId};
pub use registry::LeaseRegistry;
pub use scheduler::{CancelToken, ExpirationScheduler, SchedulerError};
