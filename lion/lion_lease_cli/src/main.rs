use clap::{Parser, Subcommand};

mod commands;
mod logging;

use commands::gaze::GazeArgs;
use commands::locks::LocksArgs;
use commands::scenario::ScenarioArgs;

/// Lion lease pool demos
///
/// Drives timed, fair lease pools from many threads and reports what happened.
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[clap(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Beings take turns gazing into a limited set of palantiri
    Gaze(GazeArgs),

    /// Clients grab batches of numbered locks from a registry pool
    Locks(LocksArgs),

    /// Run the capacity-2, 100 ms walkthrough and check every step
    Scenario(ScenarioArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::setup_logger(cli.verbose);

    match cli.command {
        Commands::Gaze(args) => commands::gaze::execute(&args),
        Commands::Locks(args) => commands::locks::execute(&args),
        Commands::Scenario(args) => commands::scenario::execute(&args),
    }
}
