//! Lease pools.
//!
//! A [`LeasePool`] combines the admission gate, the expiration scheduler and
//! one lease record per resource. Callers receive a [`ResourceHandle`] for
//! every granted lease and hand it back to release the resource.

pub mod handle;
pub mod lease;
pub(crate) mod record;

// Re-export key types
pub use handle::{PoolId, ResourceHandle, ResourceId};
pub use lease::{LeasePool, PoolStats};
