use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the imageboard binary.
#[derive(Debug, Parser)]
#[command(name = "imageboard", version, about = "Imageboard content server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "IMAGEBOARD_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the imageboard HTTP server.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Enable the content cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the cache memory budget in megabytes.
    #[arg(long = "cache-budget-mb", value_name = "MB")]
    pub cache_budget_mb: Option<u64>,

    /// Override the cache freshness window in milliseconds.
    #[arg(long = "cache-freshness-ms", value_name = "MS")]
    pub cache_freshness_ms: Option<u64>,

    /// Load boards and threads from a JSON seed file.
    #[arg(long = "storage-seed-file", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub storage_seed_file: Option<PathBuf>,

    /// Override the language used when no `lang` cookie is sent.
    #[arg(long = "site-default-lang", value_name = "LANG")]
    pub site_default_lang: Option<String>,
}
