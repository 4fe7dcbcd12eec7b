// peerworld command line: host the authoritative world or join one

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use peerworld::config::load_config;
use peerworld::input::{create_input, InputKind};
use peerworld::{logging, runtime};

#[derive(Parser, Debug)]
#[command(name = "peerworld", version, about = "Shared world over WebRTC data channels")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// More output (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the authoritative world and accept joiners through the relay
    Host {
        /// Relay name joiners address
        #[arg(long)]
        name: String,
    },
    /// Connect to a host and run a predictive replica
    Join {
        /// Our relay name
        #[arg(long)]
        name: String,

        /// Relay name of the host
        #[arg(long)]
        server: String,

        /// What drives the local entity
        #[arg(long, value_enum, default_value_t = InputKind::Wander)]
        input: InputKind,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(
        cli.log_file.as_deref(),
        logging::level_for_verbosity(cli.verbose),
    )?;

    let config = load_config(cli.config.as_deref())?;
    info!(
        relay = %config.network.relay_url,
        tick_rate_hz = config.simulation.tick_rate_hz,
        "Configuration loaded"
    );

    match cli.command {
        Command::Host { name } => runtime::run_host(config, name).await,
        Command::Join {
            name,
            server,
            input,
        } => runtime::run_join(config, name, server, create_input(input)).await,
    }
}
