//! # Conductor
//!
//! Main entry point for the Conductor validator node.
//!
//! Subcommands:
//! - `start` - run the validator
//! - `init` - write a default configuration file
//! - `keys generate` - run the federation formation ceremony

use anyhow::{Context, Result};
use clap::Parser;
use conductor_config::Config;
use conductor_node::peering::ChannelTransport;
use conductor_node::{generate_federation, metrics, ConductorNode, ValidatorKeyFile};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Conductor validator node and tools
#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(version)]
#[command(about = "Conductor - consensus core of the Chorus federation")]
struct Cli {
    /// Log format: text, json, or compact
    #[arg(long, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum LogFormat {
    Text,
    Json,
    Compact,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the validator node
    Start {
        /// Configuration file path
        #[arg(short, long, default_value = "conductor.toml")]
        config: PathBuf,

        /// Validator key file (overrides the config)
        #[arg(long)]
        key_file: Option<PathBuf>,
    },

    /// Write a default configuration file
    Init {
        /// Where to write the configuration
        #[arg(short, long, default_value = "conductor.toml")]
        output: PathBuf,
    },

    /// Key management
    Keys {
        #[command(subcommand)]
        command: KeyCommands,
    },
}

#[derive(clap::Subcommand, Debug)]
enum KeyCommands {
    /// Run the formation ceremony: generate identity keys and threshold
    /// shares for a whole federation
    Generate {
        /// Federation size
        #[arg(short = 'n', long, default_value_t = 4)]
        count: u32,

        /// Output directory for the key files
        #[arg(short, long, default_value = "keys")]
        output_dir: PathBuf,
    },
}

fn init_tracing(format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact())
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_format);

    match cli.command {
        Commands::Start { config, key_file } => start(&config, key_file.as_deref()).await,
        Commands::Init { output } => init_config(&output),
        Commands::Keys {
            command: KeyCommands::Generate { count, output_dir },
        } => generate_keys(count, &output_dir),
    }
}

async fn start(config_path: &Path, key_file: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    let key_path = key_file
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&config.node.key_path));
    let keyfile = ValidatorKeyFile::load(&key_path)
        .with_context(|| format!("loading key file from {}", key_path.display()))?;

    if config.metrics.enabled {
        metrics::install().context("installing metrics collectors")?;
    }

    let node = ConductorNode::new(config, &keyfile).context("assembling node")?;
    info!(validator = %node.validator_id(), "conductor starting");

    // The in-process transport serves single-host federations; a real
    // deployment plugs its gossip layer in behind the same trait and
    // feeds inbound envelopes into this channel.
    let transport = Arc::new(ChannelTransport::new());
    let (inbound_tx, inbound_rx) = tokio::sync::mpsc::channel(4096);
    transport.register(node.validator_id(), inbound_tx);

    node.run(transport, inbound_rx).await?;
    Ok(())
}

fn init_config(output: &Path) -> Result<()> {
    if output.exists() {
        anyhow::bail!("{} already exists", output.display());
    }
    let config = Config::default();
    config
        .save(output)
        .with_context(|| format!("writing {}", output.display()))?;
    println!(
        "wrote {}; fill in [genesis] before starting the node",
        output.display()
    );
    Ok(())
}

fn generate_keys(count: u32, output_dir: &Path) -> Result<()> {
    if count < 4 {
        anyhow::bail!("a federation needs at least 4 validators");
    }
    let threshold = 2 * ((count - 1) / 3) + 1;

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;

    let files = generate_federation(count, threshold).context("formation ceremony")?;
    for (index, file) in files.iter().enumerate() {
        let path = output_dir.join(format!("validator-{index}.toml"));
        file.save(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("wrote {} (share index {})", path.display(), file.share_index);
    }

    println!(
        "\ngenerated {count} validators with threshold {threshold}; \
         distribute one file per operator and keep them secret"
    );
    Ok(())
}
