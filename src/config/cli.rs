use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the reseed operator binary.
#[derive(Debug, Parser)]
#[command(name = "reseed", version, about = "Read-through cache engine operator tool")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "RESEED_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Apply pending database migrations.
    Migrate(MigrateArgs),
    /// Check connectivity to Postgres and the cache store.
    Health(RuntimeArgs),
    /// Seed the first timeline page and the first offset page.
    Warm(RuntimeArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RuntimeArgs {
    #[command(flatten)]
    pub overrides: RuntimeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RuntimeOverrides {
    #[command(flatten)]
    pub database: DatabaseOverride,

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

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the Redis connection URL.
    #[arg(long = "redis-url", value_name = "URL")]
    pub redis_url: Option<String>,

    /// Override the point-cache TTL.
    #[arg(long = "cache-base-ttl-seconds", value_name = "SECONDS")]
    pub cache_base_ttl_seconds: Option<u64>,

    /// Override the sorted-structure TTL.
    #[arg(long = "cache-sorted-set-ttl-seconds", value_name = "SECONDS")]
    pub cache_sorted_set_ttl_seconds: Option<u64>,

    /// Override the page size shared by timelines and offset pages.
    #[arg(long = "cache-page-size", value_name = "COUNT")]
    pub cache_page_size: Option<u64>,
}
