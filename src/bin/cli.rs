//! CLI for cache nodes and operators

use anyhow::Context;
use clap::{Parser, Subcommand};
use nvcache_coord::common::{format_bytes, parse_duration, ClusterConfig, NodeDescriptor};
use nvcache_coord::coordinator::convert::{
    check_error_code, config_from_proto, delta_to_proto, node_to_proto,
};
use nvcache_coord::proto::coordinator_client::CoordinatorClient;
use nvcache_coord::proto::{
    CheckVersionRequest, ConfigResponse, DeregisterNodeRequest, HeartbeatRequest, LeaseResponse,
    ReadConfigRequest, RegisterNodeRequest, WatchConfigRequest,
};
use tonic::transport::Channel;

#[derive(Parser)]
#[command(name = "nvcache-ctl")]
#[command(about = "nvcache coordinator CLI")]
#[command(version)]
struct Cli {
    /// Coordinator gRPC endpoint
    #[arg(long, default_value = "http://localhost:7001")]
    coordinator: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the latest cluster configuration
    ReadConfig {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Register a cache node
    Register {
        node_id: String,
        address: String,

        /// NVM capacity in bytes
        #[arg(long, default_value = "0")]
        capacity: u64,
    },

    /// Add a registered node to the configuration and give it shards
    Join {
        node_id: String,

        /// Shards to assign to the node
        #[arg(long, value_delimiter = ',')]
        shards: Vec<u32>,
    },

    /// Renew a node's lease
    Heartbeat { node_id: String },

    /// Gracefully remove a node
    Deregister { node_id: String },

    /// Check whether a configuration version is current
    CheckVersion { version: u64 },

    /// Print every new configuration as it is committed
    Watch {
        /// Start after this version
        #[arg(long, default_value = "0")]
        from: u64,

        /// Long-poll timeout (e.g. "30s")
        #[arg(long, default_value = "30s")]
        timeout: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut client = CoordinatorClient::connect(cli.coordinator.clone())
        .await
        .with_context(|| format!("connecting to {}", cli.coordinator))?;

    match cli.command {
        Commands::ReadConfig { json } => {
            let resp = client.read_config(ReadConfigRequest {}).await?.into_inner();
            let config = config_of(resp)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print_config(&config);
            }
        }

        Commands::Register {
            node_id,
            address,
            capacity,
        } => {
            let node = NodeDescriptor::new(node_id, address, capacity);
            let resp = client
                .register_node(RegisterNodeRequest {
                    node: Some(node_to_proto(&node)),
                })
                .await?
                .into_inner();
            print_lease(resp)?;
        }

        Commands::Join { node_id, shards } => {
            let delta = shards.into_iter().fold(
                nvcache_coord::common::ConfigDelta::new()
                    .add_node(NodeDescriptor::new(node_id.clone(), "", 0)),
                |delta, shard| delta.assign_shard(shard, node_id.clone()),
            );
            let resp = client
                .update_config(delta_to_proto(&delta))
                .await?
                .into_inner();
            let config = config_of(resp)?;
            println!("Committed version {}", config.version);
        }

        Commands::Heartbeat { node_id } => {
            let resp = client
                .heartbeat(HeartbeatRequest {
                    node_id,
                    timestamp_ms: 0,
                })
                .await?
                .into_inner();
            print_lease(resp)?;
        }

        Commands::Deregister { node_id } => {
            let resp = client
                .deregister_node(DeregisterNodeRequest { node_id })
                .await?
                .into_inner();
            check_error_code(resp.error_code, &resp.error_message)?;
            println!("Node {} deregistered", resp.node_id);
        }

        Commands::CheckVersion { version } => {
            let resp = client
                .check_version(CheckVersionRequest { version })
                .await?
                .into_inner();
            check_error_code(resp.error_code, &resp.error_message)?;
            println!("Current version: {}", resp.current_version);
            println!("  Stale: {}", resp.stale);
            println!("  Retained: {}", resp.retained);
        }

        Commands::Watch { from, timeout } => {
            let timeout = parse_duration(&timeout)?;
            watch(&mut client, from, timeout.as_millis() as u64).await?;
        }
    }

    Ok(())
}

fn config_of(resp: ConfigResponse) -> anyhow::Result<ClusterConfig> {
    check_error_code(resp.error_code, &resp.error_message)?;
    let config = resp.config.context("response carried no config")?;
    Ok(config_from_proto(config)?)
}

fn print_lease(resp: LeaseResponse) -> anyhow::Result<()> {
    check_error_code(resp.error_code, &resp.error_message)?;
    println!("Lease for {}:", resp.node_id);
    println!("  Expires at: {} ms", resp.lease_expires_at_ms);
    println!("  Config version: {}", resp.config_version);
    Ok(())
}

fn print_config(config: &ClusterConfig) {
    println!("Config version {} (committed {})", config.version, config.committed_at);
    println!("Nodes:");
    for node in config.nodes.values() {
        println!(
            "  {} {} {} [{}] shards {:?}",
            node.node_id,
            node.address,
            format_bytes(node.capacity),
            node.status,
            config.shards_of(&node.node_id)
        );
    }
    println!("Assigned shards: {}", config.shard_map.len());
    println!("Policy:");
    for (key, value) in &config.policy {
        println!("  {} = {}", key, value);
    }
}

async fn watch(
    client: &mut CoordinatorClient<Channel>,
    mut known: u64,
    timeout_ms: u64,
) -> anyhow::Result<()> {
    loop {
        let resp = client
            .watch_config(WatchConfigRequest {
                known_version: known,
                timeout_ms,
            })
            .await?
            .into_inner();
        let config = config_of(resp)?;
        if config.version > known {
            print_config(&config);
            known = config.version;
        }
    }
}
