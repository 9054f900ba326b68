use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use republic::commands::trust::TrustAction;
use republic::{commands, config};

#[derive(Parser)]
#[command(name = "republic")]
#[command(about = "Personal ledgers for the republic network", long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.republic/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a new config file
    Init {
        /// Default user for commands that do not name one
        #[arg(long)]
        user: Option<String>,

        /// Port to accept peer connections on
        #[arg(long)]
        port: Option<u16>,

        /// Bootstrap peer (host:port); may be repeated
        #[arg(long = "peer")]
        peers: Vec<String>,

        /// Keep all state in memory
        #[arg(long)]
        memory: bool,
    },

    /// Run the gateway and host the configured users
    Run {
        /// Override the configured listen port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Issue your own asset
    Mint {
        amount: i64,

        #[arg(long)]
        user: Option<String>,
    },

    /// Send an asset to another user
    Send {
        /// Recipient user id
        to: String,

        amount: i64,

        /// Issuer of the asset to send (default: your own)
        #[arg(long)]
        asset: Option<String>,

        #[arg(long, default_value = "")]
        message: String,

        #[arg(long)]
        user: Option<String>,
    },

    /// Manage trust lines
    Trust {
        #[command(subcommand)]
        action: TrustAction,

        #[arg(long)]
        user: Option<String>,
    },

    /// Show node status and portfolio
    Status {
        #[arg(long)]
        user: Option<String>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Permanently delete a user's keys, chain and trust lines
    Delete {
        #[arg(long)]
        user: Option<String>,

        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config_path = match cli.config {
        Some(path) => PathBuf::from(path),
        None => config::default_config_path()?,
    };

    match cli.command {
        Commands::Init {
            user,
            port,
            peers,
            memory,
        } => commands::init::run(&config_path, user.as_deref(), port, &peers, memory),
        Commands::Run { port } => commands::run::run(&config_path, port),
        Commands::Mint { amount, user } => {
            commands::mint::run(&config_path, amount, user.as_deref())
        }
        Commands::Send {
            to,
            amount,
            asset,
            message,
            user,
        } => commands::send::run(
            &config_path,
            &to,
            amount,
            asset.as_deref(),
            &message,
            user.as_deref(),
        ),
        Commands::Trust { action, user } => {
            commands::trust::run(&config_path, &action, user.as_deref())
        }
        Commands::Status { user, json } => {
            commands::status::run(&config_path, user.as_deref(), json)
        }
        Commands::Delete { user, yes } => {
            commands::delete::run(&config_path, user.as_deref(), yes)
        }
    }
}
