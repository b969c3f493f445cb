//! CLI argument definitions using clap derive

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Larder - disk-resident artifact cache
///
/// Stores fetched artifacts under a cache root, keyed by name and
/// parameters, safe to share between concurrent processes.
#[derive(Parser, Debug)]
#[command(name = "larder")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "LARDER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Cache root directory (overrides cache.root_directory)
    #[arg(long, global = true, env = "LARDER_ROOT")]
    pub root: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store a local file as the artifact for a key
    Import(ImportArgs),

    /// Write a cached artifact to stdout
    Cat(CatArgs),

    /// Remove the entry for a key
    Invalidate(KeyArgs),

    /// List cached entries
    List(ListArgs),

    /// Show entry count and total size
    Stats,

    /// Evict entries by age or total size
    Prune(PruneArgs),

    /// Remove leftovers of interrupted writes
    Clean,

    /// Print the fingerprint of a key
    Key(KeyArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// A cache key given on the command line
#[derive(Args, Debug, Clone)]
pub struct KeyArgs {
    /// Key name
    pub name: String,

    /// Key parameter (NAME=VALUE, repeatable)
    #[arg(short, long = "param", value_parser = parse_param)]
    pub params: Vec<(String, String)>,
}

/// Arguments for the import command
#[derive(Parser, Debug)]
pub struct ImportArgs {
    #[command(flatten)]
    pub key: KeyArgs,

    /// File to store
    pub file: PathBuf,

    /// Version tag the entry must carry
    #[arg(long = "version-tag")]
    pub version_tag: Option<String>,

    /// Freshness window in seconds (default: cache.default_ttl_secs)
    #[arg(long)]
    pub ttl: Option<u64>,

    /// Replace the entry even if it is still valid
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for the cat command
#[derive(Parser, Debug)]
pub struct CatArgs {
    #[command(flatten)]
    pub key: KeyArgs,

    /// Only serve an entry carrying this version tag
    #[arg(long = "version-tag")]
    pub version_tag: Option<String>,
}

/// Arguments for the list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the prune command
#[derive(Parser, Debug)]
pub struct PruneArgs {
    /// Remove entries older than N days (default: cache.max_age_days)
    #[arg(long)]
    pub max_age_days: Option<u64>,

    /// Evict oldest entries until the cache fits in N MB (default: cache.max_total_mb)
    #[arg(long)]
    pub max_total_mb: Option<u64>,

    /// Dry run - show what would be removed
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for list command
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Parse a key parameter in NAME=VALUE format
fn parse_param(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid NAME=VALUE format: no '=' found in '{s}'"))?;
    if name.is_empty() {
        return Err(format!("invalid NAME=VALUE format: empty name in '{s}'"));
    }
    Ok((name.to_string(), value.to_string()))
}
