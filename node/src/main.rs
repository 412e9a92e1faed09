// Dagchain node
// Offline tooling around the block-DAG engine

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing::info;

use dagchain_core::consensus::Network;
use dagchain_core::dag::{BehaviorFlags, BlockDag};
use node::{init_logging, BlockImporter, NodeConfig};

#[derive(Parser)]
#[command(name = "dagchain-node")]
#[command(about = "Block-DAG validation node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override storage.db_path
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Override chain.network
    #[arg(short, long)]
    network: Option<Network>,

    /// Keep all state in memory
    #[arg(long)]
    in_memory: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every block in a length-prefixed block file
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Skip proof-of-work checks (test data only)
        #[arg(long)]
        no_pow_check: bool,
    },

    /// Print the selected tip and DAG statistics as JSON
    Info,

    /// Print the effective configuration as TOML
    ShowConfig,
}

fn load_config(cli: &Cli) -> Result<NodeConfig> {
    let mut config = NodeConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(data_dir) = &cli.data_dir {
        config.storage.db_path = data_dir.clone();
    }
    if let Some(network) = cli.network {
        config.chain.network = network;
    }
    if cli.in_memory {
        config.storage.in_memory = true;
    }
    config.validate()?;
    Ok(config)
}

fn open_dag(config: &NodeConfig) -> Result<BlockDag> {
    let store = config
        .open_store()
        .with_context(|| format!("opening store at {}", config.storage.db_path.display()))?;
    let dag = BlockDag::new(config.dag_config(store)?).context("opening block DAG")?;
    Ok(dag)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config.logging)?;

    match &cli.command {
        Commands::Import { file, no_pow_check } => {
            let dag = open_dag(&config)?;
            let flags = if *no_pow_check {
                BehaviorFlags::NO_POW_CHECK
            } else {
                BehaviorFlags::NONE
            };
            let mut reader = BufReader::new(
                File::open(file).with_context(|| format!("opening {}", file.display()))?,
            );
            let stats = BlockImporter::new(&dag)
                .with_flags(flags)
                .import_from(&mut reader)?;
            let best = dag.best_snapshot()?;
            info!(
                "Import finished: tip {} at height {}",
                hex::encode(best.hash),
                best.height
            );
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "read": stats.read,
                    "main_view": stats.main_view,
                    "side_blocks": stats.side_blocks,
                    "orphans": stats.orphans,
                    "rejected": stats.rejected,
                    "best_hash": hex::encode(best.hash),
                    "best_height": best.height,
                }))?
            );
        }
        Commands::Info => {
            let dag = open_dag(&config)?;
            let best = dag.best_snapshot()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "network": config.chain.network.to_string(),
                    "best_hash": hex::encode(best.hash),
                    "height": best.height,
                    "chain_work": best.chain_work.to_string(),
                    "bits": format!("{:#010x}", best.bits),
                    "median_time_past": best.median_time_past,
                    "tx_count": best.tx_count,
                    "main_view_len": best.main_view_len,
                    "blocks": dag.block_count(),
                    "tips": dag.tips().iter().map(hex::encode).collect::<Vec<_>>(),
                    "orphans": dag.orphan_count(),
                    "next_required_bits": format!("{:#010x}", dag.next_required_bits()?),
                }))?
            );
        }
        Commands::ShowConfig => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
