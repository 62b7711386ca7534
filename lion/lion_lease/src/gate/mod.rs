//! FIFO admission control.
//!
//! The gate is a counting semaphore with strict arrival-order admission:
//!
//! - Callers that cannot be admitted queue up and are served oldest first
//! - Released permits are handed directly to the head of the queue
//! - Closing the gate fails every queued caller with `Closed`

pub mod fair;

// Re-export key types from fair
pub use fair::{FairAdmissionGate, GateError};
