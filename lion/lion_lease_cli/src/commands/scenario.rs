//! A scripted walkthrough of blocking, hand-off and expiry.

use anyhow::{bail, ensure, Context, Result};
use clap::Args;
use lion_lease::{LeaseError, LeasePool};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Arguments for the scenario command
#[derive(Args)]
pub struct ScenarioArgs {
    /// Lease length in milliseconds
    #[clap(long, default_value_t = 100)]
    pub lease_ms: u64,
}

/// Implementation of the scenario command
pub fn execute(args: &ScenarioArgs) -> Result<()> {
    let lease = Duration::from_millis(args.lease_ms);
    let pool = LeasePool::with_capacity(2).context("failed to create pool")?;
    println!("Pool of 2 resources, leases of {:?}", lease);

    let first = pool.acquire(lease)?;
    let second = pool.acquire(lease)?;
    println!("1. acquired {} and {}", first, second);

    let blocked = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.acquire(lease))
    };
    let start = Instant::now();
    while pool.waiting() == 0 {
        ensure!(
            start.elapsed() < Duration::from_secs(5),
            "third acquire never blocked"
        );
        thread::sleep(Duration::from_millis(1));
    }
    println!("2. third acquire is blocked");

    pool.release(&first)?;
    let third = blocked
        .join()
        .map_err(|_| anyhow::anyhow!("acquiring thread panicked"))??;
    ensure!(
        third.id() == first.id(),
        "third acquire got resource {} instead of {}",
        third.id(),
        first.id()
    );
    println!("3. released {}; third acquire got {}", first, third);

    thread::sleep(lease + lease / 2);
    let fourth = pool
        .acquire_timeout(lease, lease)
        .context("expired leases were not reclaimed")?;
    println!("4. after {:?} without releases, acquired {}", lease + lease / 2, fourth);

    match pool.release(&second) {
        Err(LeaseError::NotLeased(_)) => println!("5. {} had expired as expected", second),
        Ok(()) => bail!("{} was still leased after its lease ran out", second),
        Err(e) => return Err(e.into()),
    }

    pool.release(&fourth)?;
    pool.shutdown();
    println!("Scenario passed");
    Ok(())
}
