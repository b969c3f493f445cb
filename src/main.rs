//! Larder - disk-resident artifact cache
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use larder::cache::CacheManager;
use larder::cli::{commands, Cli, Commands};
use larder::config::ConfigManager;
use larder::error::LarderResult;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> LarderResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let mut config = config_manager.load().await?;

    init_logging(cli.verbose, &config.general.log_format);
    debug!("Using config {}", config_manager.path().display());

    if let Some(root) = cli.root {
        config.cache.root_directory = root;
    }
    let manager = CacheManager::new(config.cache_settings());

    match cli.command {
        Commands::Import(args) => commands::import(args, &manager).await,
        Commands::Cat(args) => commands::cat(args, &manager).await,
        Commands::Invalidate(args) => commands::invalidate(args, &manager).await,
        Commands::List(args) => commands::list(args, &manager),
        Commands::Stats => commands::stats(&manager),
        Commands::Prune(args) => commands::prune(args, &config, &manager).await,
        Commands::Clean => commands::clean(&manager).await,
        Commands::Key(args) => commands::key(args),
        Commands::Config(args) => commands::config(args, &config, &config_manager).await,
    }
}

/// 0 = warn, 1 = info, 2+ = debug; logs go to stderr so `cat` output stays clean
fn init_logging(verbose: u8, format: &str) {
    let filter = match verbose {
        0 => EnvFilter::new("larder=warn"),
        1 => EnvFilter::new("larder=info"),
        _ => EnvFilter::new("larder=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
