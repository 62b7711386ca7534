//! The palantir demo.
//!
//! A handful of beings share a smaller set of palantiri. Each being leases a
//! palantir, gazes into it for a while, and hands it back. A being that gazes
//! past the end of its lease finds the palantir already reclaimed.

use anyhow::{Context, Result};
use clap::Args;
use lion_lease::{LeaseError, LeasePool, LeasePoolConfig, PoolStats};
use log::{info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const STONES: &[&str] = &[
    "Orthanc", "Minas Tirith", "Minas Ithil", "Osgiliath", "Amon Sul", "Annuminas", "Elostirion",
];

const BEINGS: &[&str] = &[
    "Saruman", "Denethor", "Aragorn", "Pippin", "Elendil", "Isildur", "Anarion", "Gandalf",
];

/// Arguments for the gaze command
#[derive(Args)]
pub struct GazeArgs {
    /// Number of palantiri (overrides the config file)
    #[clap(long)]
    pub palantiri: Option<usize>,

    /// Number of beings competing for them
    #[clap(long, default_value_t = 5)]
    pub beings: usize,

    /// Gazes per being
    #[clap(long, default_value_t = 3)]
    pub iterations: usize,

    /// Lease length in milliseconds (overrides the config file)
    #[clap(long)]
    pub lease_ms: Option<u64>,

    /// Longest a being gazes, in milliseconds
    #[clap(long, default_value_t = 150)]
    pub max_gaze_ms: u64,

    /// TOML pool configuration
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Print the summary as JSON
    #[clap(long)]
    pub json: bool,
}

/// A seeing stone
#[derive(Debug)]
pub struct Palantir {
    name: String,
}

#[derive(Debug, Default, Serialize)]
struct BeingReport {
    name: String,
    gazes: usize,
    reclaimed: usize,
}

#[derive(Serialize)]
struct GazeSummary {
    beings: Vec<BeingReport>,
    pool: PoolStats,
}

/// Implementation of the gaze command
pub fn execute(args: &GazeArgs) -> Result<()> {
    let config = pool_config(args)?;
    let palantiri = (0..config.capacity)
        .map(|i| Palantir {
            name: stone_name(i),
        })
        .collect();
    let pool = LeasePool::new(palantiri, config).context("failed to create palantir pool")?;

    info!(
        "{} beings sharing {} palantiri",
        args.beings,
        pool.capacity()
    );

    let workers = (0..args.beings)
        .map(|being| {
            let pool = Arc::clone(&pool);
            let name = being_name(being);
            let iterations = args.iterations;
            let max_gaze_ms = args.max_gaze_ms;
            thread::Builder::new()
                .name(name.clone())
                .spawn(move || gaze_loop(&pool, name, being, iterations, max_gaze_ms))
                .context("failed to spawn being thread")
        })
        .collect::<Result<Vec<_>>>()?;

    let mut beings = Vec::with_capacity(workers.len());
    for worker in workers {
        let report = worker
            .join()
            .map_err(|_| anyhow::anyhow!("being thread panicked"))??;
        beings.push(report);
    }

    let summary = GazeSummary {
        beings,
        pool: pool.stats(),
    };
    pool.shutdown();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn pool_config(args: &GazeArgs) -> Result<LeasePoolConfig> {
    let mut config = match &args.config {
        Some(path) => LeasePoolConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => LeasePoolConfig::with_capacity(3),
    };

    if let Some(palantiri) = args.palantiri {
        config.capacity = palantiri;
    }
    if let Some(lease_ms) = args.lease_ms {
        config.default_lease_duration = Duration::from_millis(lease_ms);
    }
    config.validate().context("invalid pool configuration")?;
    Ok(config)
}

fn gaze_loop(
    pool: &LeasePool<Palantir>,
    name: String,
    being: usize,
    iterations: usize,
    max_gaze_ms: u64,
) -> Result<BeingReport> {
    let mut report = BeingReport {
        name,
        ..Default::default()
    };

    for iteration in 0..iterations {
        let handle = pool.acquire_default()?;
        let gaze = gaze_time(being, iteration, max_gaze_ms);
        info!(
            "{} gazes into {} for {:?}",
            report.name, handle.name, gaze
        );

        thread::sleep(gaze);
        info!(
            "{} has {:?} left on {}",
            report.name,
            pool.remaining_time(&handle),
            handle.name
        );

        match pool.release(&handle) {
            Ok(()) => {}
            Err(LeaseError::NotLeased(_)) => {
                warn!("{} gazed too long; {} was reclaimed", report.name, handle.name);
                report.reclaimed += 1;
            }
            Err(e) => return Err(e.into()),
        }
        report.gazes += 1;
    }

    Ok(report)
}

/// Spread gaze lengths over `0..=max_gaze_ms` without a random source
fn gaze_time(being: usize, iteration: usize, max_gaze_ms: u64) -> Duration {
    let spread = (being as u64 * 37 + iteration as u64 * 53) % (max_gaze_ms + 1);
    Duration::from_millis(spread)
}

fn stone_name(index: usize) -> String {
    numbered(STONES, index)
}

fn being_name(index: usize) -> String {
    numbered(BEINGS, index)
}

fn numbered(names: &[&str], index: usize) -> String {
    let base = names[index % names.len()];
    match index / names.len() {
        0 => base.to_string(),
        round => format!("{} {}", base, round + 1),
    }
}

fn print_summary(summary: &GazeSummary) {
    println!("Palantir session complete");
    for being in &summary.beings {
        println!(
            "  {:<12} gazes: {:>3}  reclaimed: {:>3}",
            being.name, being.gazes, being.reclaimed
        );
    }
    let stats = &summary.pool;
    println!(
        "Leases: {} acquired, {} released, {} expired",
        stats.total_acquired, stats.total_released, stats.total_expired
    );
}
