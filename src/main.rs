//! octokeyz CLI
//!
//! A command-line interface for octokeyz and b8 USB macropads.

use anyhow::Result;
use clap::Parser;
use tracing::debug;

// CLI definitions
mod cli;
use cli::{Cli, Commands};

// Command handlers
mod commands;
use commands::Target;

use octokeyz::KeypadConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Load config
    let config_path = cli.config.unwrap_or_else(KeypadConfig::default_path);
    debug!("Loading config from {:?}", config_path);
    let config = KeypadConfig::load(&config_path)?;
    let target = Target::new(config, cli.serial, cli.legacy_b8);

    match cli.command {
        Commands::List { json } => commands::list(&target, json)?,
        Commands::Led { state } => commands::led(&target, state)?,
        Commands::Display { line, text, align } => {
            commands::display(&target, line, &text, align)?
        }
        Commands::Clear { line, delay_ms } => commands::clear(&target, line, delay_ms)?,
        Commands::Listen => commands::listen(&target)?,
    }

    Ok(())
}
