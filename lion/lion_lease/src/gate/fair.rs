//! Fair counting gate with direct permit hand-off.
//!
//! Permits are never left lying around while somebody is queued: a release
//! first tops up the counter and then grants permits to waiters at the head of
//! the queue, in order, until the head asks for more than what is left. Only
//! granted waiters are woken, each on its own condition variable.

use log::{trace, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Error when a permit cannot be obtained from the gate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// No permit was granted within the wait budget
    #[error("timed out after {0:?} waiting for a permit")]
    TimedOut(Duration),

    /// The gate has been closed
    #[error("admission gate is closed")]
    Closed,

    /// More permits were requested than the gate will ever hold
    #[error("requested {requested} permits from a gate of {capacity}")]
    ExceedsCapacity {
        /// Number of permits requested
        requested: usize,
        /// Total permits managed by the gate
        capacity: usize,
    },

    /// A non-blocking request could not be satisfied immediately
    #[error("no permit available")]
    Unavailable,
}

/// A caller parked in the gate's queue
struct Waiter {
    /// Arrival number, used to find the entry again on timeout
    ticket: u64,

    /// Number of permits this caller needs
    permits: usize,

    /// Set under the gate lock once the permits are handed over
    granted: AtomicBool,

    /// Signalled when the waiter is granted or the gate closes
    wakeup: Condvar,
}

struct GateState {
    /// Permits not held by anyone and not promised to a waiter
    available: usize,

    /// Parked callers, oldest first
    queue: VecDeque<Arc<Waiter>>,

    /// Whether the gate has been closed
    closed: bool,

    /// Next arrival number
    next_ticket: u64,
}

/// A counting admission gate that serves callers strictly in arrival order
pub struct FairAdmissionGate {
    state: Mutex<GateState>,
    capacity: usize,
}

impl FairAdmissionGate {
    /// Create a gate with `capacity` permits, all initially available
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(GateState {
                available: capacity,
                queue: VecDeque::new(),
                closed: false,
                next_ticket: 0,
            }),
            capacity,
        }
    }

    /// Block until one permit is granted, the timeout elapses, or the gate closes
    pub fn acquire_permit(&self, timeout: Option<Duration>) -> Result<(), GateError> {
        self.acquire_permits(1, timeout)
    }

    /// Block until `count` permits are granted together.
    ///
    /// The request is all-or-nothing: either every permit is granted or none
    /// is taken. A multi-permit request at the head of the queue holds back
    /// everyone behind it until enough permits have been released.
    pub fn acquire_permits(&self, count: usize, timeout: Option<Duration>) -> Result<(), GateError> {
        if count == 0 {
            return Ok(());
        }
        self.check_capacity(count)?;

        // A deadline past the end of time is no deadline
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.state.lock();

        if state.closed {
            return Err(GateError::Closed);
        }

        // Barging is only allowed when nobody is queued
        if state.queue.is_empty() && state.available >= count {
            state.available -= count;
            trace!(
                "Gate admitted {} permit(s) immediately ({} left)",
                count,
                state.available
            );
            return Ok(());
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        let waiter = Arc::new(Waiter {
            ticket,
            permits: count,
            granted: AtomicBool::new(false),
            wakeup: Condvar::new(),
        });
        state.queue.push_back(Arc::clone(&waiter));

        trace!(
            "Gate queued waiter #{} for {} permit(s) ({} ahead)",
            ticket,
            count,
            state.queue.len() - 1
        );

        loop {
            if waiter.granted.load(Ordering::Relaxed) {
                return Ok(());
            }
            if state.closed {
                return Err(GateError::Closed);
            }

            match deadline {
                None => waiter.wakeup.wait(&mut state),
                Some(deadline) => {
                    if waiter.wakeup.wait_until(&mut state, deadline).timed_out() {
                        if waiter.granted.load(Ordering::Relaxed) {
                            return Ok(());
                        }
                        if state.closed {
                            return Err(GateError::Closed);
                        }

                        state.queue.retain(|w| w.ticket != ticket);
                        // Our departure may unblock whoever was queued behind us
                        Self::grant_waiters(&mut state);

                        trace!("Gate waiter #{} timed out", ticket);
                        return Err(GateError::TimedOut(timeout.unwrap_or_default()));
                    }
                }
            }
        }
    }

    /// Take `count` permits only if that is possible without waiting
    pub fn try_acquire_permits(&self, count: usize) -> Result<(), GateError> {
        if count == 0 {
            return Ok(());
        }
        self.check_capacity(count)?;

        let mut state = self.state.lock();

        if state.closed {
            return Err(GateError::Closed);
        }

        if state.queue.is_empty() && state.available >= count {
            state.available -= count;
            Ok(())
        } else {
            Err(GateError::Unavailable)
        }
    }

    /// Return one permit and wake the longest-waiting caller it satisfies
    pub fn release_permit(&self) {
        self.release_permits(1);
    }

    /// Return `count` permits, handing them to queued callers in order
    pub fn release_permits(&self, count: usize) {
        if count == 0 {
            return;
        }

        let mut state = self.state.lock();
        state.available += count;

        if state.available > self.capacity {
            warn!(
                "Gate released above capacity ({} > {}), clamping",
                state.available, self.capacity
            );
            state.available = self.capacity;
        }

        Self::grant_waiters(&mut state);
    }

    /// Close the gate, failing every queued caller with `Closed`.
    ///
    /// Calling this more than once has no further effect.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;

        let drained = state.queue.len();
        for waiter in state.queue.drain(..) {
            waiter.wakeup.notify_one();
        }

        trace!("Gate closed, {} waiter(s) released", drained);
    }

    /// Permits currently free and not promised to a waiter
    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    /// Number of callers parked in the queue
    pub fn waiting(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Total permits managed by the gate
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the gate has been closed
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn check_capacity(&self, count: usize) -> Result<(), GateError> {
        if count > self.capacity {
            return Err(GateError::ExceedsCapacity {
                requested: count,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    fn grant_waiters(state: &mut MutexGuard<'_, GateState>) {
        while let Some(head) = state.queue.front() {
            if head.permits > state.available {
                break;
            }

            let head = match state.queue.pop_front() {
                Some(head) => head,
                None => break,
            };
            state.available -= head.permits;
            head.granted.store(true, Ordering::Relaxed);
            head.wakeup.notify_one();

            trace!(
                "Gate handed {} permit(s) to waiter #{}",
                head.permits,
                head.ticket
            );
        }
    }
}

impl std::fmt::Debug for FairAdmissionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FairAdmissionGate")
            .field("capacity", &self.capacity)
            .field("available", &state.available)
            .field("waiting", &state.queue.len())
            .field("closed", &state.closed)
            .finish()
    }
}
