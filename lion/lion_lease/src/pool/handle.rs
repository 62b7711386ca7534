//! Identifiers and the handle returned for a granted lease.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier of a lease pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolId(Uuid);

impl PoolId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PoolId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for PoolId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Default resource type: a numbered, otherwise featureless lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(u32);

impl ResourceId {
    /// Wrap a raw number
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// The raw number
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ResourceId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Proof of a granted lease on one resource.
///
/// The handle names the pool, the resource slot and the lease generation.
/// Once the lease ends (release, expiry or shutdown) the handle goes stale:
/// releasing it again fails with `NotLeased` and its remaining time is zero,
/// even if the same resource has since been leased to somebody else.
/// Cloning a handle does not duplicate the lease.
pub struct ResourceHandle<R> {
    pool: PoolId,
    slot: usize,
    generation: u64,
    resource: Arc<R>,
}

impl<R> ResourceHandle<R> {
    pub(crate) fn new(pool: PoolId, slot: usize, generation: u64, resource: Arc<R>) -> Self {
        Self {
            pool,
            slot,
            generation,
            resource,
        }
    }

    /// Index of the leased resource within its pool
    pub fn id(&self) -> usize {
        self.slot
    }

    /// The pool that issued this handle
    pub fn pool_id(&self) -> PoolId {
        self.pool
    }

    /// Lease generation this handle was issued for
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The leased resource
    pub fn resource(&self) -> &R {
        &self.resource
    }
}

impl<R> Deref for ResourceHandle<R> {
    type Target = R;

    fn deref(&self) -> &Self::Target {
        &self.resource
    }
}

impl<R> Clone for ResourceHandle<R> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool,
            slot: self.slot,
            generation: self.generation,
            resource: Arc::clone(&self.resource),
        }
    }
}

impl<R> PartialEq for ResourceHandle<R> {
    fn eq(&self, other: &Self) -> bool {
        self.pool == other.pool && self.slot == other.slot && self.generation == other.generation
    }
}

impl<R> Eq for ResourceHandle<R> {}

impl<R> Hash for ResourceHandle<R> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pool.hash(state);
        self.slot.hash(state);
        self.generation.hash(state);
    }
}

impl<R: fmt::Debug> fmt::Debug for ResourceHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("pool", &self.pool)
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .field("resource", &self.resource)
            .finish()
    }
}

impl<R> fmt::Display for ResourceHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource #{} (lease {})", self.slot, self.generation)
    }
}
