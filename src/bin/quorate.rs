//! Quorate server binary

use clap::{Parser, Subcommand};
use quorate::{common::Config, ThrottleServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "quorate")]
#[command(about = "Raft-replicated throttling service", version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node
    Serve {
        /// Raft bind address, also this node's identity
        #[arg(long)]
        bind: Option<String>,

        /// Raft peers (comma-separated)
        #[arg(long, value_delimiter = ',')]
        nodes: Vec<String>,

        /// Port for addresses given without one
        #[arg(long)]
        default_port: Option<u16>,

        /// Raft data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Operator API listen address
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve {
            bind,
            nodes,
            default_port,
            data_dir,
            listen,
        } => {
            // CLI flags win over file and environment
            if let Some(bind) = bind {
                config.raft.bind = bind;
            }
            if !nodes.is_empty() {
                config.raft.nodes = nodes;
            }
            if let Some(port) = default_port {
                config.raft.default_port = port;
            }
            if let Some(dir) = data_dir {
                config.raft.data_dir = dir;
            }
            if let Some(listen) = listen {
                config.http.listen = listen;
            }
            config.validate()?;

            if let Err(e) = ThrottleServer::new(config).serve().await {
                tracing::error!("Failed to start: {}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
