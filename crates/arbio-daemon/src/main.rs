//! Arbio - Main entry point
//!
//! Fetches the asset manifest, starts every asset load, and turns image
//! recognitions read from stdin into scene events written to stdout.

mod asset_fetch;
mod config;
mod host;
mod manifest_fetch;
mod state;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "arbio")]
#[command(about = "Places manifest assets on recognized images once they are loaded")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "arbio.toml")]
    config: PathBuf,

    /// Manifest URL or path (overrides the configuration file)
    #[arg(short, long)]
    manifest_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Load the manifest, wait for every asset, print readiness and exit
    #[arg(long)]
    list: bool,

    /// Write a default configuration file to the config path and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; stdout carries scene events
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if std::env::var_os("RUST_LOG").is_some() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_target(true)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Arbio v{}", env!("CARGO_PKG_VERSION"));

    if args.init_config {
        config::save_default_config(&args.config)?;
        info!(path = %args.config.display(), "Wrote default configuration");
        return Ok(());
    }

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    if let Some(url) = args.manifest_url {
        config.manifest.url = url;
    }

    info!(
        manifest = %config.manifest.url,
        base_dir = %config.loader.base_dir.display(),
        policy = ?config.animation.policy,
        "Configuration loaded"
    );

    let state = state::AppState::new(config)?;

    if args.list {
        if !state.load_manifest().await {
            anyhow::bail!("Manifest could not be loaded");
        }
        for handle in state.registry.handles() {
            handle.settled().await;
        }

        let entity_ids = state.registry.entity_ids();
        println!("{} entities:", entity_ids.len());
        for id in entity_ids {
            let slots = state.registry.slots(&id).unwrap_or_default();
            println!("  - {} ({} assets)", id, slots.len());
            for (key, slot) in slots {
                println!("    {}: {} [{:?}]", key, slot.descriptor.source, slot.handle.state());
            }
        }
    } else {
        // Host mode - fetch in the background and serve recognitions
        let background = state.clone();
        tokio::spawn(async move {
            background.load_manifest().await;
        });

        let stdin = BufReader::new(tokio::io::stdin());
        host::run(state, stdin, tokio::io::stdout()).await?;
    }

    Ok(())
}
