//! Coordinator binary

use clap::{Parser, Subcommand};
use nvcache_coord::{common::Config, Coordinator};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "nvcache-coord")]
#[command(about = "Membership and configuration coordinator for the NVM cache")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start coordinator server
    Serve {
        /// Coordinator ID (overrides the config file)
        #[arg(long)]
        id: Option<String>,

        /// TOML config file
        #[arg(long, default_value = "coord.toml")]
        config: PathBuf,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Bind address for gRPC
        #[arg(long)]
        grpc: Option<SocketAddr>,

        /// Lease timeout in milliseconds
        #[arg(long)]
        lease_timeout_ms: Option<u64>,

        /// Shards placed by rebalance
        #[arg(long)]
        num_shards: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            id,
            config,
            bind,
            grpc,
            lease_timeout_ms,
            num_shards,
        } => {
            // Load config from file and environment, then override with CLI arguments
            let mut config = Config::load(Some(&config))?;

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.clone().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            if let Some(id) = id {
                config.node_id = id;
            }
            let coord_config = &mut config.coordinator;
            if let Some(bind) = bind {
                coord_config.http_addr = bind;
            }
            if let Some(grpc) = grpc {
                coord_config.grpc_addr = grpc;
            }
            if let Some(ms) = lease_timeout_ms {
                coord_config.lease_timeout_ms = ms;
            }
            if let Some(n) = num_shards {
                coord_config.num_shards = n;
            }
            coord_config.validate()?;

            let coord = Coordinator::new(config.coordinator, config.node_id);
            coord.serve().await?;
        }
    }

    Ok(())
}
