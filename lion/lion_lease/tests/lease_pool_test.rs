//! Integration tests for lease pools.
//!
//! These tests drive pools from many threads at once and check the
//! guarantees callers rely on: bounded occupancy, FIFO admission, and
//! reclamation of every lease exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use lion_lease::{LeaseError, LeasePool, LeaseRegistry, ResourceId};

const LONG_LEASE: Duration = Duration::from_secs(30);

fn wait_for_waiters(pool: &LeasePool<ResourceId>, count: usize) {
    let start = Instant::now();
    while pool.waiting() < count {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "waiters never queued"
        );
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_end_to_end_scenario() {
    let lease = Duration::from_millis(100);
    let pool = LeasePool::with_capacity(2).unwrap();

    let first = pool.acquire(lease).unwrap();
    let second = pool.acquire(lease).unwrap();

    let third = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.acquire(lease))
    };
    wait_for_waiters(&pool, 1);

    pool.release(&first).unwrap();
    let third = third.join().unwrap().unwrap();
    assert_eq!(third.id(), first.id());

    // No explicit release for `second` or `third`
    thread::sleep(Duration::from_millis(150));
    let fourth = pool
        .acquire_timeout(lease, Duration::from_millis(50))
        .unwrap();

    assert!(matches!(pool.release(&second), Err(LeaseError::NotLeased(_))));
    pool.release(&fourth).unwrap();
}

#[test]
fn test_capacity_never_exceeded() {
    let capacity = 3;
    let pool = LeasePool::with_capacity(capacity).unwrap();
    let in_use = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..12)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let in_use = Arc::clone(&in_use);
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                for _ in 0..10 {
                    let handle = pool.acquire(LONG_LEASE).unwrap();
                    let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    assert!(pool.leased() <= capacity);
                    thread::sleep(Duration::from_millis(1));
                    in_use.fetch_sub(1, Ordering::SeqCst);
                    pool.release(&handle).unwrap();
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= capacity);
    assert_eq!(pool.available(), capacity);
    assert_eq!(pool.stats().total_acquired, 120);
}

#[test]
fn test_exactly_once_reclamation() {
    let capacity = 4;
    let pool = LeasePool::with_capacity(capacity).unwrap();

    // Hold times straddle the lease so release and expiry race
    let workers: Vec<_> = (0..8)
        .map(|i| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for j in 0..10 {
                    let handle = pool.acquire(Duration::from_millis(5)).unwrap();
                    thread::sleep(Duration::from_millis(((i + j) % 3) * 3));
                    let _ = pool.release(&handle);
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    thread::sleep(Duration::from_millis(50));

    let stats = pool.stats();
    assert_eq!(stats.total_acquired, 80);
    assert_eq!(stats.total_released + stats.total_expired, 80);
    assert_eq!(stats.available, capacity);
    assert_eq!(stats.leased, 0);
}

#[test]
fn test_fifo_fairness() {
    let pool = LeasePool::with_capacity(1).unwrap();
    let held = pool.acquire(LONG_LEASE).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut waiters = Vec::new();
    for i in 0..5 {
        let worker_pool = Arc::clone(&pool);
        let order = Arc::clone(&order);
        waiters.push(thread::spawn(move || {
            let handle = worker_pool.acquire(LONG_LEASE).unwrap();
            order.lock().unwrap().push(i);
            worker_pool.release(&handle).unwrap();
        }));
        // Serialize arrival
        wait_for_waiters(&pool, i + 1);
    }

    pool.release(&held).unwrap();
    for waiter in waiters {
        waiter.join().unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_double_release_rejected() {
    let pool = LeasePool::with_capacity(2).unwrap();
    let handle = pool.acquire(LONG_LEASE).unwrap();

    pool.release(&handle).unwrap();
    assert!(matches!(
        pool.release(&handle),
        Err(LeaseError::NotLeased(_))
    ));
    assert_eq!(pool.available(), 2);
    assert_eq!(pool.stats().total_released, 1);
}

#[test]
fn test_timeout_reclamation() {
    let pool = LeasePool::with_capacity(1).unwrap();
    let _abandoned = pool.acquire(Duration::from_millis(50)).unwrap();

    let start = Instant::now();
    let next = pool.acquire(LONG_LEASE).unwrap();
    let waited = start.elapsed();

    assert!(waited >= Duration::from_millis(30));
    assert!(waited < Duration::from_secs(2));
    assert_eq!(pool.stats().total_expired, 1);
    pool.release(&next).unwrap();
}

#[test]
fn test_stale_handle_does_not_free_new_lease() {
    let pool = LeasePool::with_capacity(1).unwrap();
    let stale = pool.acquire(Duration::from_millis(20)).unwrap();
    thread::sleep(Duration::from_millis(60));

    let fresh = pool.acquire(LONG_LEASE).unwrap();
    assert_eq!(fresh.id(), stale.id());

    assert!(matches!(pool.release(&stale), Err(LeaseError::NotLeased(_))));
    assert_eq!(pool.remaining_time(&stale), Duration::ZERO);
    assert!(pool.remaining_time(&fresh) > Duration::ZERO);
    assert_eq!(pool.leased(), 1);

    pool.release(&fresh).unwrap();
}

#[test]
fn test_shutdown_drains_waiters() {
    let pool = LeasePool::with_capacity(1).unwrap();
    let _held = pool.acquire(LONG_LEASE).unwrap();

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire(LONG_LEASE).map(|_| ()))
        })
        .collect();
    wait_for_waiters(&pool, 4);

    pool.shutdown();

    for waiter in waiters {
        assert!(matches!(waiter.join().unwrap(), Err(LeaseError::Closed)));
    }
    assert_eq!(pool.waiting(), 0);
    assert_eq!(pool.leased(), 0);
}

#[test]
fn test_bounded_wait_leaves_no_ghost_waiter() {
    let pool = LeasePool::with_capacity(1).unwrap();
    let held = pool.acquire(LONG_LEASE).unwrap();

    let result = pool.acquire_timeout(LONG_LEASE, Duration::from_millis(20));
    assert!(matches!(result, Err(LeaseError::TimedOut(_))));
    assert_eq!(pool.waiting(), 0);

    // The permit goes to the next caller, not to the departed one
    pool.release(&held).unwrap();
    let next = pool.try_acquire(LONG_LEASE).unwrap();
    pool.release(&next).unwrap();
}

#[test]
fn test_acquire_many_is_all_or_nothing() {
    let pool = LeasePool::with_capacity(3).unwrap();
    let held = pool.acquire(LONG_LEASE).unwrap();

    let batch = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.acquire_many(LONG_LEASE, 3))
    };
    wait_for_waiters(&pool, 1);

    // Two of three are free but the batch must keep waiting
    assert_eq!(pool.available(), 2);
    assert_eq!(pool.leased(), 1);

    pool.release(&held).unwrap();
    let handles = batch.join().unwrap().unwrap();
    assert_eq!(handles.len(), 3);
    assert_eq!(pool.available(), 0);

    let results = pool.release_many(&handles);
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(pool.available(), 3);
}

#[test]
fn test_acquire_many_exceeding_capacity() {
    let pool = LeasePool::with_capacity(2).unwrap();
    assert!(matches!(
        pool.acquire_many(LONG_LEASE, 3),
        Err(LeaseError::ExceedsCapacity {
            requested: 3,
            capacity: 2
        })
    ));
    assert_eq!(pool.available(), 2);
}

#[test]
fn test_batch_blocks_later_single_acquires() {
    let pool = LeasePool::with_capacity(2).unwrap();
    let held = pool.acquire(LONG_LEASE).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let batch = {
        let pool = Arc::clone(&pool);
        let order = Arc::clone(&order);
        thread::spawn(move || {
            let handles = pool.acquire_many(LONG_LEASE, 2).unwrap();
            order.lock().unwrap().push("batch");
            pool.release_many(&handles);
        })
    };
    wait_for_waiters(&pool, 1);

    let single = {
        let pool = Arc::clone(&pool);
        let order = Arc::clone(&order);
        thread::spawn(move || {
            let handle = pool.acquire(LONG_LEASE).unwrap();
            order.lock().unwrap().push("single");
            pool.release(&handle).unwrap();
        })
    };
    wait_for_waiters(&pool, 2);

    pool.release(&held).unwrap();
    batch.join().unwrap();
    single.join().unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["batch", "single"]);
}

#[test]
fn test_release_many_reports_each_handle() {
    let pool = LeasePool::with_capacity(3).unwrap();
    let handles = pool.acquire_many(LONG_LEASE, 2).unwrap();
    pool.release(&handles[0]).unwrap();

    let results = pool.release_many(&handles);
    assert!(matches!(results[0], Err(LeaseError::NotLeased(_))));
    assert!(results[1].is_ok());
    assert_eq!(pool.available(), 3);
}

#[test]
fn test_registry_resize_under_load() {
    let registry = Arc::new(LeaseRegistry::new());
    let id = registry.create(2).unwrap();
    let barrier = Arc::new(Barrier::new(5));

    let clients: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut closed = 0;
                for _ in 0..20 {
                    match registry.acquire_many(id, Duration::from_millis(20), 2) {
                        Ok(handles) => {
                            thread::sleep(Duration::from_millis(1));
                            let _ = registry.release_many(id, &handles);
                        }
                        Err(LeaseError::Closed) => closed += 1,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
                closed
            })
        })
        .collect();

    barrier.wait();
    thread::sleep(Duration::from_millis(10));
    registry.resize(id, 3).unwrap();

    for client in clients {
        client.join().unwrap();
    }

    let pool = registry.get(id).unwrap();
    assert_eq!(pool.capacity(), 3);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(pool.available(), 3);
}
