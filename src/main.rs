//! modircd - Main binary

use clap::{Parser, Subcommand};
use modircd_core::utils::time::current_unix_timestamp;
use modircd_core::{Config, Server};
use modircd_modules::builtin_catalog;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// modircd - a modular IRC daemon
#[derive(Parser)]
#[command(name = "modircd")]
#[command(about = "A modular IRC daemon with runtime-loadable extension modules")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "modircd.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Test configuration and exit
    #[arg(long)]
    test_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a default configuration file
    Config {
        /// Output file path
        #[arg(short, long, default_value = "modircd.toml")]
        output: PathBuf,
    },
    /// List the modules this build can load
    Modules,
    /// Show server information
    Info,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    if let Some(command) = cli.command {
        match command {
            Commands::Config { output } => generate_config(&output)?,
            Commands::Modules => list_modules(),
            Commands::Info => show_info(),
            Commands::Version => show_version(),
        }
        return Ok(());
    }

    let config = if cli.config.exists() {
        info!("Loading configuration from {:?}", cli.config);
        Config::from_file(&cli.config)?
    } else {
        info!("Configuration file not found, using defaults");
        Config::default()
    };

    if cli.test_config {
        config.validate()?;
        info!("Configuration is valid");
        return Ok(());
    }

    let interval = Duration::from_secs(config.options.timer_interval.max(1));
    let mut server = Server::new(config, builtin_catalog());
    server.init()?;
    let server = Arc::new(Mutex::new(server));

    info!("Starting modircd...");
    let ticker = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            loop {
                timer.tick().await;
                server.lock().tick(current_unix_timestamp());
            }
        })
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down");
    ticker.abort();
    server.lock().shutdown("Server shutting down");
    Ok(())
}

/// Initialize logging
fn init_logging(level: &str) -> anyhow::Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .init();

    Ok(())
}

/// Generate default configuration file
fn generate_config(output: &PathBuf) -> anyhow::Result<()> {
    let config = Config::default();
    config.to_file(output)?;
    println!("Generated default configuration file: {:?}", output);
    Ok(())
}

fn list_modules() {
    let catalog = builtin_catalog();
    for name in catalog.names() {
        let Some(factory) = catalog.get(name) else {
            continue;
        };
        let module = factory();
        let version = module.version();
        println!(
            "{:<16} {:<10} {:<4} {}",
            name,
            version.to_string(),
            version.flags.letters(),
            module.description()
        );
    }
}

/// Show server information
fn show_info() {
    println!("modircd");
    println!("=======");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Description: {}", env!("CARGO_PKG_DESCRIPTION"));
    println!("Repository: {}", env!("CARGO_PKG_REPOSITORY"));
    println!("License: {}", env!("CARGO_PKG_LICENSE"));
    println!();
    println!("Features:");
    println!("  - Loadable extension modules with prioritized hooks");
    println!("  - Pluggable channel and user modes");
    println!("  - G/K/Z/Q/E-line bans with expiry");
}

/// Show version information
fn show_version() {
    println!("modircd {}", env!("CARGO_PKG_VERSION"));
}
