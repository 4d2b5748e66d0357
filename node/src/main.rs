//! Mosaic Node Binary

use clap::{Parser, Subcommand};
use mosaic_core::NodeConfig;
use mosaic_crypto::keys::KeyPair;
use mosaic_node::NodeBuilder;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mosaic-node")]
#[command(about = "Mosaic Node - Metachain Orchestrator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node
    Run {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// API listen address
        #[arg(long)]
        api_addr: Option<String>,

        /// Data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Keep snapshots in memory only
        #[arg(long)]
        ephemeral: bool,
    },

    /// Generate a new keypair
    Keygen {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a default configuration file
    Config {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            api_addr,
            data_dir,
            ephemeral,
        } => {
            let mut config = match config {
                Some(path) => NodeConfig::from_json(&std::fs::read_to_string(&path)?)?,
                None => NodeConfig::default(),
            };
            if let Some(addr) = api_addr {
                config.api.listen_addr = addr;
            }
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            init_logging(&config.log_level);

            info!("Starting Mosaic Node...");

            // Load or create keypair
            let keypair = load_or_create_keypair(&config.data_dir)?;

            let mut builder = NodeBuilder::new().config(config).keypair(keypair);
            if ephemeral {
                builder = builder.ephemeral();
            }
            let node = builder.build().await?;

            node.start().await?;
        }

        Commands::Keygen { output } => {
            let keypair = KeyPair::generate();
            let json = serde_json::to_string_pretty(&key_file(&keypair))?;

            match output {
                Some(path) => {
                    std::fs::write(&path, &json)?;
                    println!("Keypair saved to: {}", path.display());
                }
                None => {
                    println!("{}", json);
                }
            }
        }

        Commands::Config { output } => {
            let json = NodeConfig::default().to_json()?;
            std::fs::write(&output, &json)?;

            println!("Configuration saved to: {}", output.display());
        }
    }

    Ok(())
}

/// `RUST_LOG` overrides the configured level
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn key_file(keypair: &KeyPair) -> serde_json::Value {
    serde_json::json!({
        "public_key": keypair.public_key().to_hex(),
        "address": keypair.address().to_hex(),
        "secret_key": hex::encode(keypair.secret_bytes()),
    })
}

fn load_or_create_keypair(data_dir: &Path) -> anyhow::Result<KeyPair> {
    let key_path = data_dir.join("node_key.json");

    if key_path.exists() {
        let content = std::fs::read_to_string(&key_path)?;
        let value: serde_json::Value = serde_json::from_str(&content)?;

        if let Some(secret_hex) = value.get("secret_key").and_then(|v| v.as_str()) {
            let secret_bytes = hex::decode(secret_hex)?;
            let keypair = KeyPair::from_secret_bytes(&secret_bytes)?;
            info!("Loaded keypair from {}", key_path.display());
            return Ok(keypair);
        }
    }

    // Create new keypair
    std::fs::create_dir_all(data_dir)?;

    let keypair = KeyPair::generate();
    std::fs::write(&key_path, serde_json::to_string_pretty(&key_file(&keypair))?)?;
    info!("Generated new keypair, saved to {}", key_path.display());

    Ok(keypair)
}
