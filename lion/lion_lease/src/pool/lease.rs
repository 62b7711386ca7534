//! The lease pool.
//!
//! Admission is decided by the [`FairAdmissionGate`]; the pool only ever
//! claims a record after the gate has handed it a permit, and only ever
//! returns a permit after a record has been freed. That ordering keeps the
//! number of leased records at or below capacity without a pool-wide lock.

use crate::config::{ConfigError, LeasePoolConfig};
use crate::error::{LeaseError, Result};
use crate::gate::FairAdmissionGate;
use crate::pool::handle::{PoolId, ResourceHandle, ResourceId};
use crate::pool::record::LeaseRecord;
use crate::scheduler::ExpirationScheduler;
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Snapshot of a pool's occupancy and lifetime counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Pool this snapshot was taken from
    pub pool_id: PoolId,

    /// Number of resources managed by the pool
    pub capacity: usize,

    /// Permits currently free at the gate
    pub available: usize,

    /// Resources currently leased
    pub leased: usize,

    /// Callers blocked waiting for admission
    pub waiting: usize,

    /// Leases granted since creation
    pub total_acquired: u64,

    /// Leases ended by an explicit release
    pub total_released: u64,

    /// Leases ended by expiry
    pub total_expired: u64,
}

/// How a caller is willing to wait at the gate
#[derive(Debug, Clone, Copy)]
enum Admission {
    /// Block, optionally up to a limit
    Wait(Option<Duration>),
    /// Fail with `Unavailable` rather than block
    Try,
}

#[derive(Debug, Default)]
struct LeaseCounters {
    acquired: AtomicU64,
    released: AtomicU64,
    expired: AtomicU64,
}

/// A fixed set of resources leased out for bounded durations.
///
/// Callers block in FIFO order while every resource is leased. Each lease is
/// reclaimed either by [`release`](Self::release) or, once its duration has
/// elapsed, by the pool's expiration timer; whichever happens first wins and
/// the other becomes a no-op.
pub struct LeasePool<R> {
    /// Identity of this pool, carried by every handle it issues
    id: PoolId,

    /// The leasable resources, indexed by slot
    resources: Vec<Arc<R>>,

    /// One lease record per resource
    records: Vec<Mutex<LeaseRecord>>,

    /// FIFO admission control
    gate: FairAdmissionGate,

    /// Fires force-expire callbacks for leases that are never released
    scheduler: ExpirationScheduler,

    /// Configuration for this pool
    config: LeasePoolConfig,

    /// Whether this pool is shut down
    closed: AtomicBool,

    /// Where the next free-record scan starts
    cursor: AtomicUsize,

    /// Lifetime counters
    counters: LeaseCounters,

    /// Handed to expiration callbacks so they never keep the pool alive
    self_ref: Weak<Self>,
}

impl LeasePool<ResourceId> {
    /// Create a pool of `capacity` numbered resources with default settings
    pub fn with_capacity(capacity: usize) -> Result<Arc<Self>> {
        Self::from_config(LeasePoolConfig::with_capacity(capacity))
    }

    /// Create a pool of `config.capacity` numbered resources
    pub fn from_config(config: LeasePoolConfig) -> Result<Arc<Self>> {
        let capacity = u32::try_from(config.capacity).map_err(|_| {
            ConfigError::Invalid(format!("capacity {} is too large", config.capacity))
        })?;
        let resources = (0..capacity).map(ResourceId::new).collect();
        Self::new(resources, config)
    }
}

impl<R: Send + Sync + 'static> LeasePool<R> {
    /// Create a pool that leases out `resources`.
    ///
    /// The capacity is the number of resources given; `config.capacity` is
    /// overridden accordingly.
    pub fn new(resources: Vec<R>, config: LeasePoolConfig) -> Result<Arc<Self>> {
        if config.capacity != resources.len() {
            debug!(
                "Configured capacity {} replaced by {} supplied resources",
                config.capacity,
                resources.len()
            );
        }
        let config = LeasePoolConfig {
            capacity: resources.len(),
            ..config
        };
        config.validate()?;

        let scheduler = ExpirationScheduler::new(config.timer_thread_name.clone())?;
        let capacity = config.capacity;

        let pool = Arc::new_cyclic(|self_ref| Self {
            id: PoolId::new(),
            resources: resources.into_iter().map(Arc::new).collect(),
            records: (0..capacity).map(|_| Mutex::new(LeaseRecord::new())).collect(),
            gate: FairAdmissionGate::new(capacity),
            scheduler,
            config,
            closed: AtomicBool::new(false),
            cursor: AtomicUsize::new(0),
            counters: LeaseCounters::default(),
            self_ref: self_ref.clone(),
        });

        info!(
            "Created lease pool {} with {} resources",
            pool.id, capacity
        );
        Ok(pool)
    }

    /// Lease one resource for `lease_duration`, blocking until one is free.
    ///
    /// Waits without limit unless the configuration sets an acquire timeout.
    pub fn acquire(&self, lease_duration: Duration) -> Result<ResourceHandle<R>> {
        let admission = Admission::Wait(self.config.acquire_timeout);
        self.acquire_leases(lease_duration, 1, admission)
            .map(Self::single)
    }

    /// Lease one resource for the configured default duration
    pub fn acquire_default(&self) -> Result<ResourceHandle<R>> {
        self.acquire(self.config.default_lease_duration)
    }

    /// Lease one resource, waiting at most `wait` for admission
    pub fn acquire_timeout(
        &self,
        lease_duration: Duration,
        wait: Duration,
    ) -> Result<ResourceHandle<R>> {
        self.acquire_leases(lease_duration, 1, Admission::Wait(Some(wait)))
            .map(Self::single)
    }

    /// Lease one resource only if that is possible without waiting
    pub fn try_acquire(&self, lease_duration: Duration) -> Result<ResourceHandle<R>> {
        self.acquire_leases(lease_duration, 1, Admission::Try)
            .map(Self::single)
    }

    /// Lease `count` resources at once.
    ///
    /// All-or-nothing: the caller queues for all `count` permits together and
    /// either receives `count` handles or none, with every partially claimed
    /// resource rolled back on failure.
    pub fn acquire_many(
        &self,
        lease_duration: Duration,
        count: usize,
    ) -> Result<Vec<ResourceHandle<R>>> {
        let admission = Admission::Wait(self.config.acquire_timeout);
        self.acquire_leases(lease_duration, count, admission)
    }

    /// Return a leased resource to the pool.
    ///
    /// Fails with `UnknownHandle` for handles from another pool, `NotLeased`
    /// if the lease already ended (double release, or expiry got there first),
    /// and `Closed` after shutdown.
    pub fn release(&self, handle: &ResourceHandle<R>) -> Result<()> {
        self.check_handle(handle)?;

        if self.is_closed() {
            return Err(LeaseError::Closed);
        }

        let slot = handle.id();
        let timer = {
            let mut record = self.records[slot].lock();
            if !record.holds(handle.generation()) {
                debug!("Release of resource {} rejected: not leased", slot);
                return Err(LeaseError::NotLeased(slot));
            }
            record.clear()
        };

        // Losing this race is fine: the callback will find the lease gone
        if let Some(timer) = timer {
            self.scheduler.cancel(&timer);
        }

        self.counters.released.fetch_add(1, Ordering::Relaxed);
        self.gate.release_permit();

        debug!("Released resource {} in pool {}", slot, self.id);
        Ok(())
    }

    /// Release several handles, each independently.
    ///
    /// The result for every handle is reported at the same position; one
    /// failing handle does not prevent the others from being released.
    pub fn release_many(&self, handles: &[ResourceHandle<R>]) -> Vec<Result<()>> {
        handles.iter().map(|handle| self.release(handle)).collect()
    }

    /// Time left on the lease named by `handle`.
    ///
    /// Zero when the lease has ended, expired, or the pool is closed.
    pub fn remaining_time(&self, handle: &ResourceHandle<R>) -> Duration {
        if self.check_handle(handle).is_err() || self.is_closed() {
            return Duration::ZERO;
        }

        let record = self.records[handle.id()].lock();
        record.remaining(handle.generation(), Instant::now())
    }

    /// Shut the pool down.
    ///
    /// New acquires fail with `Closed`, blocked callers are woken with
    /// `Closed`, every outstanding lease is ended and its timer cancelled, and
    /// the timer thread is stopped. Calling this again has no effect.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Shutting down lease pool {}...", self.id);
        self.gate.close();

        let mut ended = 0;
        for record in &self.records {
            let timer = {
                let mut record = record.lock();
                if record.is_free() {
                    continue;
                }
                record.clear()
            };
            if let Some(timer) = timer {
                self.scheduler.cancel(&timer);
            }
            ended += 1;
        }
        self.gate.release_permits(ended);

        self.scheduler.shutdown();
        info!(
            "Lease pool {} shutdown complete ({} lease(s) ended).",
            self.id, ended
        );
    }

    /// Identity of this pool
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Number of resources managed by the pool
    pub fn capacity(&self) -> usize {
        self.resources.len()
    }

    /// Permits currently free at the gate
    pub fn available(&self) -> usize {
        self.gate.available()
    }

    /// Resources currently leased
    pub fn leased(&self) -> usize {
        self.records.iter().filter(|r| !r.lock().is_free()).count()
    }

    /// Callers blocked waiting for admission
    pub fn waiting(&self) -> usize {
        self.gate.waiting()
    }

    /// Whether the pool has been shut down
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Configuration this pool runs with
    pub fn config(&self) -> &LeasePoolConfig {
        &self.config
    }

    /// The resources managed by the pool, in slot order
    pub fn resources(&self) -> impl Iterator<Item = &R> + '_ {
        self.resources.iter().map(|r| r.as_ref())
    }

    /// Snapshot of occupancy and lifetime counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            pool_id: self.id,
            capacity: self.capacity(),
            available: self.available(),
            leased: self.leased(),
            waiting: self.waiting(),
            total_acquired: self.counters.acquired.load(Ordering::Relaxed),
            total_released: self.counters.released.load(Ordering::Relaxed),
            total_expired: self.counters.expired.load(Ordering::Relaxed),
        }
    }

    /// Reclaim a lease whose duration ran out. Invoked by the timer thread.
    pub(crate) fn force_expire(&self, slot: usize, generation: u64) {
        {
            let mut record = self.records[slot].lock();
            if !record.holds(generation) {
                trace!(
                    "Expiry of resource {} (lease {}) lost to release",
                    slot,
                    generation
                );
                return;
            }
            // The timer is the one firing right now
            record.clear();
        }

        self.counters.expired.fetch_add(1, Ordering::Relaxed);
        self.gate.release_permit();

        warn!(
            "Lease {} on resource {} in pool {} expired and was reclaimed",
            generation, slot, self.id
        );
    }

    fn acquire_leases(
        &self,
        lease_duration: Duration,
        count: usize,
        admission: Admission,
    ) -> Result<Vec<ResourceHandle<R>>> {
        // Zero, or too long to be represented as a deadline
        if lease_duration.is_zero() || Instant::now().checked_add(lease_duration).is_none() {
            return Err(LeaseError::InvalidDuration);
        }
        if self.is_closed() {
            return Err(LeaseError::Closed);
        }

        match admission {
            Admission::Wait(timeout) => self.gate.acquire_permits(count, timeout)?,
            Admission::Try => self.gate.try_acquire_permits(count)?,
        }

        let mut handles = Vec::with_capacity(count);
        for _ in 0..count {
            match self.lease_one(lease_duration) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    self.roll_back(&handles, count);
                    return Err(e);
                }
            }
        }

        // Shutdown may have swept the records while we were claiming
        if self.is_closed() {
            self.roll_back(&handles, count);
            return Err(LeaseError::Closed);
        }

        self.counters
            .acquired
            .fetch_add(count as u64, Ordering::Relaxed);
        debug!(
            "Leased {} resource(s) in pool {} for {:?}",
            count, self.id, lease_duration
        );
        Ok(handles)
    }

    /// Claim one free record. The caller must already hold a permit for it.
    fn lease_one(&self, lease_duration: Duration) -> Result<ResourceHandle<R>> {
        let capacity = self.records.len();

        loop {
            if self.is_closed() {
                return Err(LeaseError::Closed);
            }

            let start = self.cursor.fetch_add(1, Ordering::Relaxed) % capacity;
            for offset in 0..capacity {
                let slot = (start + offset) % capacity;
                let mut record = self.records[slot].lock();
                if !record.is_free() {
                    continue;
                }

                let expires_at = Instant::now()
                    .checked_add(lease_duration)
                    .ok_or(LeaseError::InvalidDuration)?;
                let generation = record.claim(expires_at);
                let pool = self.self_ref.clone();
                let armed = self.scheduler.schedule_once(lease_duration, move || {
                    if let Some(pool) = pool.upgrade() {
                        pool.force_expire(slot, generation);
                    }
                });

                match armed {
                    Ok(timer) => record.arm(timer),
                    Err(e) => {
                        record.clear();
                        warn!("Could not arm expiry for resource {}: {}", slot, e);
                        return Err(e.into());
                    }
                }

                return Ok(ResourceHandle::new(
                    self.id,
                    slot,
                    generation,
                    Arc::clone(&self.resources[slot]),
                ));
            }

            // A permit guarantees a free record; another admitted caller
            // claimed the one this scan passed over
            trace!("No free record found on this pass, rescanning");
            std::thread::yield_now();
        }
    }

    /// Undo a partial acquisition.
    ///
    /// Returns the permits that were never turned into a lease, plus one for
    /// every record cleared here. Records shutdown already swept had their
    /// permits returned by the sweep.
    fn roll_back(&self, handles: &[ResourceHandle<R>], permits: usize) {
        let mut cleared = 0;
        for handle in handles {
            let timer = {
                let mut record = self.records[handle.id()].lock();
                if !record.holds(handle.generation()) {
                    continue;
                }
                record.clear()
            };
            if let Some(timer) = timer {
                self.scheduler.cancel(&timer);
            }
            cleared += 1;
        }
        self.gate.release_permits(permits - handles.len() + cleared);
    }

    fn check_handle(&self, handle: &ResourceHandle<R>) -> Result<()> {
        if handle.pool_id() != self.id || handle.id() >= self.records.len() {
            return Err(LeaseError::UnknownHandle);
        }
        Ok(())
    }

    fn single(mut handles: Vec<ResourceHandle<R>>) -> ResourceHandle<R> {
        handles.remove(0)
    }
}

impl<R> fmt::Debug for LeasePool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeasePool")
            .field("id", &self.id)
            .field("capacity", &self.resources.len())
            .field("gate", &self.gate)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl<R> Drop for LeasePool<R> {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            // Handles may outlive the pool; waking waiters is all that is left
            self.gate.close();
            self.scheduler.shutdown();
            debug!("Lease pool {} dropped", self.id);
        }
    }
}
