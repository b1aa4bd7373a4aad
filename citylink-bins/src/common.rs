//! Common utilities for all binaries
//!
//! Shared initialization, CLI parsing, and setup code.

use anyhow::{Context, Result};
use citylink_core::config::Config;
use citylink_core::{LinkConfig, RateLimiter};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

/// Common CLI arguments for all binaries
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// TOML configuration file (CITYLINK__* environment variables override it)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Endpoint to connect to; overrides the configured one
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Print Prometheus metrics on exit
    #[arg(long)]
    pub metrics: bool,
}

/// Initialize tracing/logging
pub fn init_logging(args: &CommonArgs) -> Result<()> {
    citylink_core::utils::init_logger(&args.log_level, args.json_logs)
}

/// Resolved connection and rate-limit settings
pub struct Settings {
    pub link: LinkConfig,
    pub limiter: RateLimiter,
}

/// Build settings from the config file (if any) and CLI overrides
pub fn load_settings(args: &CommonArgs) -> Result<Settings> {
    match &args.config {
        Some(path) => {
            let mut config = Config::load(path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            if let Some(endpoint) = &args.endpoint {
                config.connection.endpoint = endpoint.clone();
                config.validate()?;
            }
            Ok(Settings {
                link: config.link_config(),
                limiter: RateLimiter::new(config.rate_limit_config()),
            })
        }
        None => {
            let endpoint = args
                .endpoint
                .clone()
                .context("Either --config or --endpoint is required")?;
            let link = LinkConfig::new(endpoint);
            link.validate()?;
            Ok(Settings {
                link,
                limiter: RateLimiter::new(Default::default()),
            })
        }
    }
}

/// Render a duration as `1h 05m 09s`
pub fn format_countdown(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}
