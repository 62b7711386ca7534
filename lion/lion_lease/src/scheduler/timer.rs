//! One-shot cancellable timers on a dedicated thread.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, trace};
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use thiserror::Error;

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Cancelled entries are purged once they outnumber live ones past this size
const COMPACT_THRESHOLD: usize = 64;

/// Error when arming a timer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The scheduler has been shut down
    #[error("expiration scheduler is shut down")]
    ShutDown,

    /// The timer thread could not be started
    #[error("failed to spawn timer thread: {0}")]
    SpawnFailed(String),

    /// The delay reaches past any representable deadline
    #[error("timer delay {0:?} is too long")]
    DelayTooLong(Duration),
}

/// Handle used to cancel a scheduled callback
#[derive(Debug, Clone)]
pub struct CancelToken {
    id: u64,
    state: Arc<AtomicU8>,
}

impl CancelToken {
    /// Identifier of the timer this token controls
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the callback has neither fired nor been cancelled
    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }

    /// Whether the callback has started running
    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }

    /// Whether the timer was cancelled before it fired
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }
}

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// A timer waiting in the heap
struct TimerEntry {
    deadline: Instant,
    id: u64,
    state: Arc<AtomicU8>,
    callback: Callback,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    // Reversed so the max-heap pops the earliest deadline first
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

enum Command {
    Schedule(TimerEntry),
    Shutdown,
}

/// Runs one-shot callbacks on a dedicated timer thread
pub struct ExpirationScheduler {
    /// Channel for handing new timers to the timer thread
    sender: Sender<Command>,

    /// Timer thread, taken on shutdown
    worker: Mutex<Option<JoinHandle<()>>>,

    /// Identity of the timer thread, so shutdown never joins itself
    worker_id: ThreadId,

    /// Set once shutdown has started
    is_shut_down: AtomicBool,

    /// Next timer identifier
    next_id: AtomicU64,

    /// Timers that have neither fired nor been cancelled
    pending: Arc<AtomicUsize>,

    /// Name of the timer thread
    name: String,
}

impl ExpirationScheduler {
    /// Start a scheduler whose timer thread carries `name`
    pub fn new(name: impl Into<String>) -> Result<Self, SchedulerError> {
        let name = name.into();
        let (sender, receiver) = unbounded();
        let pending = Arc::new(AtomicUsize::new(0));

        let worker_pending = Arc::clone(&pending);
        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || Self::timer_loop(receiver, worker_pending))
            .map_err(|e| SchedulerError::SpawnFailed(e.to_string()))?;

        let worker_id = worker.thread().id();
        debug!("Expiration scheduler '{}' started", name);

        Ok(Self {
            sender,
            worker: Mutex::new(Some(worker)),
            worker_id,
            is_shut_down: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            pending,
            name,
        })
    }

    /// Run `callback` once, no earlier than `delay` from now, unless cancelled
    pub fn schedule_once<F>(&self, delay: Duration, callback: F) -> Result<CancelToken, SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_shut_down.load(Ordering::Acquire) {
            return Err(SchedulerError::ShutDown);
        }

        let deadline = Instant::now()
            .checked_add(delay)
            .ok_or(SchedulerError::DelayTooLong(delay))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(AtomicU8::new(PENDING));
        let entry = TimerEntry {
            deadline,
            id,
            state: Arc::clone(&state),
            callback: Box::new(callback),
        };

        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(Command::Schedule(entry)).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(SchedulerError::ShutDown);
        }

        // Shutdown may have drained the channel before this entry landed
        let token = CancelToken { id, state };
        if self.is_shut_down.load(Ordering::SeqCst)
            && (self.cancel(&token) || token.is_cancelled())
        {
            return Err(SchedulerError::ShutDown);
        }

        trace!("Timer #{} armed for {:?}", id, delay);
        Ok(token)
    }

    /// Cancel a scheduled callback.
    ///
    /// Returns `true` if the callback will not run because of this call, and
    /// `false` if it already started or was cancelled before.
    pub fn cancel(&self, token: &CancelToken) -> bool {
        let cancelled = token
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if cancelled {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            trace!("Timer #{} cancelled", token.id);
        }
        cancelled
    }

    /// Number of timers that have neither fired nor been cancelled
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether shutdown has started
    pub fn is_shut_down(&self) -> bool {
        self.is_shut_down.load(Ordering::Acquire)
    }

    /// Name of the timer thread
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancel every outstanding timer and stop the timer thread.
    ///
    /// Waits for a callback that is already running to finish, unless called
    /// from that callback.
    pub fn shutdown(&self) {
        if self.is_shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Shutting down expiration scheduler '{}'", self.name);
        let _ = self.sender.send(Command::Shutdown);

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if thread::current().id() == self.worker_id {
                debug!("Scheduler '{}' shut down from its own thread", self.name);
                return;
            }
            if worker.join().is_err() {
                error!("Timer thread '{}' panicked during shutdown", self.name);
            }
        }
    }

    fn timer_loop(receiver: Receiver<Command>, pending: Arc<AtomicUsize>) {
        let mut heap: BinaryHeap<TimerEntry> = BinaryHeap::new();

        loop {
            let now = Instant::now();
            while heap.peek().is_some_and(|top| top.deadline <= now) {
                if let Some(entry) = heap.pop() {
                    Self::fire(entry, &pending);
                }
            }

            if heap.len() > COMPACT_THRESHOLD && heap.len() > 2 * pending.load(Ordering::Acquire) {
                heap.retain(|entry| entry.state.load(Ordering::Acquire) == PENDING);
            }

            let command = match heap.peek() {
                Some(top) => receiver.recv_deadline(top.deadline),
                None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match command {
                Ok(Command::Schedule(entry)) => heap.push(entry),
                Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        let mut dropped = 0;
        let leftovers = receiver.try_iter().filter_map(|command| match command {
            Command::Schedule(entry) => Some(entry),
            Command::Shutdown => None,
        });
        for entry in heap.into_iter().chain(leftovers) {
            if entry
                .state
                .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                pending.fetch_sub(1, Ordering::AcqRel);
                dropped += 1;
            }
        }

        debug!("Timer thread exiting, {} timer(s) cancelled", dropped);
    }

    fn fire(entry: TimerEntry, pending: &AtomicUsize) {
        if entry
            .state
            .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Cancelled while waiting in the heap
            return;
        }
        pending.fetch_sub(1, Ordering::AcqRel);

        trace!("Timer #{} firing", entry.id);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(entry.callback));
        if let Err(e) = result {
            error!(
                "Timer #{} callback panicked: {:?}",
                entry.id,
                e.downcast_ref::<&str>().unwrap_or(&"<unknown panic>")
            );
        }
    }
}

impl std::fmt::Debug for ExpirationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpirationScheduler")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .field("is_shut_down", &self.is_shut_down())
            .finish()
    }
}

impl Drop for ExpirationScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
