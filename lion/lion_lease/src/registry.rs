//! Registry of lease pools addressed by id.
//!
//! Lets a service own many independent pools of numbered locks and operate
//! on them by [`PoolId`]. Resizing a pool drains it: the old pool is shut
//! down, its blocked callers fail with `Closed`, outstanding handles go stale,
//! and a fresh pool of the new size is installed under the same id.

use crate::config::LeasePoolConfig;
use crate::error::{LeaseError, Result};
use crate::pool::{LeasePool, PoolId, PoolStats, ResourceHandle, ResourceId};
use dashmap::DashMap;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

type Pool = Arc<LeasePool<ResourceId>>;

/// A concurrent map of lease pools
pub struct LeaseRegistry {
    /// The pools, indexed by registry id
    pools: DashMap<PoolId, Pool>,

    /// Template for every pool created here; `capacity` is set per pool
    template: LeasePoolConfig,
}

impl LeaseRegistry {
    /// Create an empty registry using default pool settings
    pub fn new() -> Self {
        Self::with_config(LeasePoolConfig::default())
    }

    /// Create an empty registry whose pools use `template` settings
    pub fn with_config(template: LeasePoolConfig) -> Self {
        Self {
            pools: DashMap::new(),
            template,
        }
    }

    /// Create a pool of `capacity` locks and return its id
    pub fn create(&self, capacity: usize) -> Result<PoolId> {
        let pool = self.build(capacity)?;
        let id = pool.id();
        self.pools.insert(id, pool);

        info!("Registered lease pool {} with {} locks", id, capacity);
        Ok(id)
    }

    /// Look up a pool
    pub fn get(&self, id: PoolId) -> Result<Pool> {
        self.pools
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(LeaseError::UnknownPool(id))
    }

    /// Change the number of locks in a pool.
    ///
    /// Asking for the current size does nothing. Any other size shuts the
    /// current pool down and replaces it with a fresh one.
    pub fn resize(&self, id: PoolId, capacity: usize) -> Result<()> {
        let old = {
            let mut entry = self
                .pools
                .get_mut(&id)
                .ok_or(LeaseError::UnknownPool(id))?;
            if entry.capacity() == capacity {
                debug!("Pool {} already has {} locks", id, capacity);
                return Ok(());
            }
            let fresh = self.build(capacity)?;
            std::mem::replace(entry.value_mut(), fresh)
        };

        // Shut down outside the map shard lock
        old.shutdown();
        info!("Resized lease pool {} to {} locks", id, capacity);
        Ok(())
    }

    /// Remove a pool, shutting it down
    pub fn remove(&self, id: PoolId) -> Result<()> {
        let (_, pool) = self
            .pools
            .remove(&id)
            .ok_or(LeaseError::UnknownPool(id))?;
        pool.shutdown();

        info!("Removed lease pool {}", id);
        Ok(())
    }

    /// Lease one lock from pool `id`
    pub fn acquire(&self, id: PoolId, lease_duration: Duration) -> Result<ResourceHandle<ResourceId>> {
        self.get(id)?.acquire(lease_duration)
    }

    /// Lease `count` locks from pool `id` at once
    pub fn acquire_many(
        &self,
        id: PoolId,
        lease_duration: Duration,
        count: usize,
    ) -> Result<Vec<ResourceHandle<ResourceId>>> {
        self.get(id)?.acquire_many(lease_duration, count)
    }

    /// Release one lock back to pool `id`
    pub fn release(&self, id: PoolId, handle: &ResourceHandle<ResourceId>) -> Result<()> {
        self.get(id)?.release(handle)
    }

    /// Release several locks back to pool `id`, each independently
    pub fn release_many(
        &self,
        id: PoolId,
        handles: &[ResourceHandle<ResourceId>],
    ) -> Result<Vec<Result<()>>> {
        Ok(self.get(id)?.release_many(handles))
    }

    /// Time left on a lease held in pool `id`
    pub fn remaining_time(&self, id: PoolId, handle: &ResourceHandle<ResourceId>) -> Result<Duration> {
        Ok(self.get(id)?.remaining_time(handle))
    }

    /// Stats of pool `id`
    pub fn stats(&self, id: PoolId) -> Result<PoolStats> {
        Ok(self.get(id)?.stats())
    }

    /// Ids of every registered pool
    pub fn ids(&self) -> Vec<PoolId> {
        self.pools.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of registered pools
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether no pools are registered
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Shut down and remove every pool
    pub fn shutdown_all(&self) {
        let ids = self.ids();
        for id in ids {
            if let Some((_, pool)) = self.pools.remove(&id) {
                pool.shutdown();
            }
        }
        info!("All lease pools shut down");
    }

    fn build(&self, capacity: usize) -> Result<Pool> {
        LeasePool::from_config(LeasePoolConfig {
            capacity,
            ..self.template.clone()
        })
    }
}

impl Default for LeaseRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LeaseRegistry {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const LEASE: Duration = Duration::from_secs(30);

    #[test]
    fn test_registry_create_and_use() {
        let registry = LeaseRegistry::new();
        let id = registry.create(3).unwrap();

        assert_eq!(registry.ids(), vec![id]);
        assert_eq!(registry.get(id).unwrap().capacity(), 3);

        let handles = registry.acquire_many(id, LEASE, 2).unwrap();
        assert_eq!(registry.stats(id).unwrap().leased, 2);
        assert!(registry.remaining_time(id, &handles[0]).unwrap() > Duration::ZERO);

        let results = registry.release_many(id, &handles).unwrap();
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(registry.stats(id).unwrap().available, 3);
    }

    #[test]
    fn test_unknown_pool() {
        let registry = LeaseRegistry::new();
        let missing = PoolId::new();

        assert!(matches!(
            registry.acquire(missing, LEASE),
            Err(LeaseError::UnknownPool(id)) if id == missing
        ));
        assert!(matches!(
            registry.resize(missing, 2),
            Err(LeaseError::UnknownPool(_))
        ));
        assert!(matches!(registry.remove(missing), Err(LeaseError::UnknownPool(_))));
    }

    #[test]
    fn test_resize_same_size_is_noop() {
        let registry = LeaseRegistry::new();
        let id = registry.create(2).unwrap();
        let handle = registry.acquire(id, LEASE).unwrap();

        registry.resize(id, 2).unwrap();

        // Same pool, so the lease is still live
        assert!(registry.remaining_time(id, &handle).unwrap() > Duration::ZERO);
        registry.release(id, &handle).unwrap();
    }

    #[test]
    fn test_resize_drains_pool() {
        let registry = Arc::new(LeaseRegistry::new());
        let id = registry.create(1).unwrap();
        let held = registry.acquire(id, LEASE).unwrap();

        let waiter = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.acquire(id, LEASE).map(|_| ()))
        };
        while registry.get(id).unwrap().waiting() == 0 {
            thread::sleep(Duration::from_millis(1));
        }

        registry.resize(id, 4).unwrap();

        assert!(matches!(waiter.join().unwrap(), Err(LeaseError::Closed)));
        assert_eq!(registry.get(id).unwrap().capacity(), 4);
        assert!(matches!(
            registry.release(id, &held),
            Err(LeaseError::UnknownHandle)
        ));
    }

    #[test]
    fn test_resize_rejects_zero() {
        let registry = LeaseRegistry::new();
        let id = registry.create(2).unwrap();

        assert!(matches!(registry.resize(id, 0), Err(LeaseError::Config(_))));
        assert_eq!(registry.get(id).unwrap().capacity(), 2);
    }

    #[test]
    fn test_remove_and_shutdown_all() {
        let registry = LeaseRegistry::new();
        let a = registry.create(1).unwrap();
        let b = registry.create(2).unwrap();
        let pool_b = registry.get(b).unwrap();

        registry.remove(a).unwrap();
        assert_eq!(registry.len(), 1);

        registry.shutdown_all();
        assert!(registry.is_empty());
        assert!(pool_b.is_closed());
    }
}
