//! The lock manager demo.
//!
//! Several clients repeatedly take a batch of numbered locks from one
//! registry pool, hold them briefly, and give them back together.

use anyhow::{ensure, Context, Result};
use clap::Args;
use lion_lease::{LeaseError, LeaseRegistry, PoolId};
use log::{debug, warn};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Arguments for the locks command
#[derive(Args)]
pub struct LocksArgs {
    /// Locks in the pool
    #[clap(long, default_value_t = 4)]
    pub permits: usize,

    /// Concurrent clients
    #[clap(long, default_value_t = 6)]
    pub clients: usize,

    /// Locks each client takes at once
    #[clap(long, default_value_t = 2)]
    pub count: usize,

    /// Rounds per client
    #[clap(long, default_value_t = 5)]
    pub rounds: usize,

    /// How long a client holds its locks, in milliseconds
    #[clap(long, default_value_t = 10)]
    pub hold_ms: u64,

    /// Lease length in milliseconds
    #[clap(long, default_value_t = 500)]
    pub lease_ms: u64,
}

/// Implementation of the locks command
pub fn execute(args: &LocksArgs) -> Result<()> {
    ensure!(
        args.count <= args.permits,
        "cannot take {} locks at once from a pool of {}",
        args.count,
        args.permits
    );

    let registry = Arc::new(LeaseRegistry::new());
    let id = registry
        .create(args.permits)
        .context("failed to create lock pool")?;

    let workers = (0..args.clients)
        .map(|client| {
            let registry = Arc::clone(&registry);
            let count = args.count;
            let rounds = args.rounds;
            let hold = Duration::from_millis(args.hold_ms);
            let lease = Duration::from_millis(args.lease_ms);
            thread::Builder::new()
                .name(format!("lock-client-{}", client))
                .spawn(move || client_loop(&registry, id, client, count, rounds, hold, lease))
                .context("failed to spawn client thread")
        })
        .collect::<Result<Vec<_>>>()?;

    let mut lost = 0;
    for worker in workers {
        lost += worker
            .join()
            .map_err(|_| anyhow::anyhow!("client thread panicked"))??;
    }

    let stats = registry.stats(id)?;
    registry.shutdown_all();

    println!(
        "Lock pool {}: {} clients x {} rounds of {} lock(s)",
        id, args.clients, args.rounds, args.count
    );
    println!(
        "Leases: {} acquired, {} released, {} expired ({} lost before release)",
        stats.total_acquired, stats.total_released, stats.total_expired, lost
    );
    Ok(())
}

fn client_loop(
    registry: &LeaseRegistry,
    id: PoolId,
    client: usize,
    count: usize,
    rounds: usize,
    hold: Duration,
    lease: Duration,
) -> Result<usize> {
    let mut lost = 0;

    for round in 0..rounds {
        let handles = registry.acquire_many(id, lease, count)?;
        debug!(
            "Client {} round {} holds locks {:?}",
            client,
            round,
            handles.iter().map(|h| h.id()).collect::<Vec<_>>()
        );

        thread::sleep(hold);

        for result in registry.release_many(id, &handles)? {
            match result {
                Ok(()) => {}
                Err(LeaseError::NotLeased(slot)) => {
                    warn!("Client {} lost lock {} to expiry", client, slot);
                    lost += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(lost)
}
