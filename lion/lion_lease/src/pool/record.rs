//! Per-resource lease bookkeeping.
//!
//! A record is only ever touched under its own mutex, so the transitions
//! below are atomic with respect to one resource. The generation is bumped on
//! every grant; callers that free a record must present the generation they
//! were granted, which makes release, expiry and shutdown compete for a single
//! compare-and-clear.

use crate::scheduler::CancelToken;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub(crate) struct LeaseRecord {
    in_use: bool,
    expires_at: Option<Instant>,
    timer: Option<CancelToken>,
    generation: u64,
}

impl LeaseRecord {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_free(&self) -> bool {
        !self.in_use
    }

    /// FREE -> LEASED until `expires_at`. Returns the generation of the new lease.
    pub(crate) fn claim(&mut self, expires_at: Instant) -> u64 {
        debug_assert!(!self.in_use, "claiming a leased record");
        self.in_use = true;
        self.generation += 1;
        self.expires_at = Some(expires_at);
        self.timer = None;
        self.generation
    }

    pub(crate) fn arm(&mut self, timer: CancelToken) {
        self.timer = Some(timer);
    }

    /// Whether the lease of `generation` is still live
    pub(crate) fn holds(&self, generation: u64) -> bool {
        self.in_use && self.generation == generation
    }

    /// LEASED -> FREE. Hands back the expiration timer for cancellation.
    pub(crate) fn clear(&mut self) -> Option<CancelToken> {
        self.in_use = false;
        self.expires_at = None;
        self.timer.take()
    }

    pub(crate) fn remaining(&self, generation: u64, now: Instant) -> Duration {
        match self.expires_at {
            Some(expires_at) if self.holds(generation) => expires_at.saturating_duration_since(now),
            _ => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_lifecycle() {
        let mut record = LeaseRecord::new();
        assert!(record.is_free());

        let now = Instant::now();
        let generation = record.claim(now + Duration::from_millis(100));
        assert!(!record.is_free());
        assert!(record.holds(generation));
        assert_eq!(record.remaining(generation, now), Duration::from_millis(100));

        assert!(record.clear().is_none());
        assert!(record.is_free());
        assert!(!record.holds(generation));
        assert_eq!(record.remaining(generation, now), Duration::ZERO);
    }

    #[test]
    fn test_stale_generation_does_not_hold() {
        let mut record = LeaseRecord::new();
        let now = Instant::now();

        let first = record.claim(now + Duration::from_millis(10));
        record.clear();
        let second = record.claim(now + Duration::from_millis(10));

        assert_ne!(first, second);
        assert!(!record.holds(first));
        assert!(record.holds(second));
        assert_eq!(record.remaining(first, now), Duration::ZERO);
    }

    #[test]
    fn test_remaining_saturates_after_expiry() {
        let mut record = LeaseRecord::new();
        let now = Instant::now();
        let generation = record.claim(now + Duration::from_millis(10));

        let later = now + Duration::from_millis(50);
        assert_eq!(record.remaining(generation, later), Duration::ZERO);
    }
}
