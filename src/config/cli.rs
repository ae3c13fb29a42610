use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the storefront cache tool.
#[derive(Debug, Parser)]
#[command(
    name = "storefront",
    version,
    about = "Storefront cache policy and maintenance"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "STOREFRONT_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the TTL policy table.
    Policy,
    /// Connect to the configured cache store and round-trip a health-check key.
    Check,
    /// Delete cached keys matching a glob pattern.
    Flush(FlushArgs),
    /// Parse a human-readable duration and print it in seconds.
    #[command(name = "parse-duration")]
    ParseDuration(ParseDurationArgs),
    /// Print every mutation with the keys and patterns it invalidates.
    Mutations,
}

#[derive(Debug, Args, Clone, PartialEq, Eq)]
pub struct FlushArgs {
    /// Glob pattern of keys to delete.
    #[arg(long = "pattern", value_name = "PATTERN", default_value = "*")]
    pub pattern: String,
}

#[derive(Debug, Args, Clone, PartialEq, Eq)]
pub struct ParseDurationArgs {
    /// Duration such as "30 minutes" or "1 day".
    #[arg(value_name = "TEXT")]
    pub text: String,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the Redis connection URL.
    #[arg(long = "redis-url", value_name = "URL", global = true)]
    pub redis_url: Option<String>,

    /// Override the number of keys examined per SCAN step.
    #[arg(long = "scan-batch-size", value_name = "COUNT", global = true)]
    pub scan_batch_size: Option<u64>,
}
