//! Background expiration timers.
//!
//! A single dedicated thread per scheduler runs one-shot callbacks once their
//! delay has elapsed. Every scheduled callback is paired with a
//! [`CancelToken`]; cancelling and firing race on one atomic so exactly one
//! of them wins.

pub mod timer;

// Re-export key types from timer
pub use timer::{CancelToken, ExpirationScheduler, SchedulerError};
