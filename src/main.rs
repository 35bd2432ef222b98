use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use hookd::env::HOOKD_CONFIG;
use hookd::{Config, HookService, console};

#[derive(Parser)]
#[command(name = "hookd", version, about = "Hook action dispatcher with scheduled retries")]
struct Cli {
    /// Path to the config file (TOML)
    #[arg(short, long, env = HOOKD_CONFIG)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // Initialize logging: RUST_LOG wins, then --verbose, then the config level
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let service = HookService::new(&config);
    console::run(&service).await
}
