//! Runtime configuration
//!
//! Layered the usual way: built-in defaults, then a TOML file, then
//! `CITYLINK__SECTION__KEY` environment variables.
//!
//! ```toml
//! [connection]
//! endpoint = "wss://realtime.example.org/stream"
//! max_reconnect_attempts = 10
//!
//! [heartbeat]
//! interval_ms = 15000
//! timeout_ms = 30000
//!
//! [rate_limit]
//! max_actions = 15
//! window_secs = 14400
//! mode = "fixed"
//! ```

pub mod constants;
pub mod types;

pub use types::*;

use crate::connection::LinkConfig;
use crate::resilience::{BackoffConfig, DedupConfig, HeartbeatConfig};
use crate::risk::RateLimitConfig;
use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config as ConfigLoader, ConfigBuilder, Environment, File};
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "CITYLINK";

impl Config {
    /// Load configuration from file with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let builder = Self::defaults()?.add_source(File::from(path.as_ref()));
        Self::finish(builder)
    }

    /// Load from the environment only (`CITYLINK__CONNECTION__ENDPOINT` is required)
    pub fn from_env() -> Result<Self> {
        Self::finish(Self::defaults()?)
    }

    /// Load from default location (./config/citylink.toml)
    pub fn load_default() -> Result<Self> {
        Self::load("config/citylink.toml")
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        let builder = ConfigLoader::builder()
            .set_default("connection.connect_timeout_ms", constants::DEFAULT_CONNECT_TIMEOUT_MS)?
            .set_default(
                "connection.max_reconnect_attempts",
                constants::DEFAULT_MAX_RECONNECT_ATTEMPTS as u64,
            )?
            .set_default("connection.unlimited_reconnects", false)?
            .set_default("backoff.initial_delay_ms", constants::DEFAULT_BACKOFF_INITIAL_MS)?
            .set_default("backoff.max_delay_ms", constants::DEFAULT_BACKOFF_MAX_MS)?
            .set_default("backoff.multiplier", 2.0)?
            .set_default("backoff.jitter_factor", 0.0)?
            .set_default("heartbeat.interval_ms", constants::DEFAULT_HEARTBEAT_INTERVAL_MS)?
            .set_default("heartbeat.timeout_ms", constants::DEFAULT_HEARTBEAT_TIMEOUT_MS)?
            .set_default("dedup.enabled", true)?
            .set_default("dedup.window_ms", constants::DEFAULT_DEDUP_WINDOW_MS)?
            .set_default("rate_limit.max_actions", constants::DEFAULT_RATE_LIMIT_MAX_ACTIONS)?
            .set_default("rate_limit.window_secs", constants::DEFAULT_RATE_LIMIT_WINDOW_SECS)?
            .set_default("rate_limit.mode", "fixed")?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?;
        Ok(builder)
    }

    fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config = builder
            // Override with environment variables (CITYLINK__)
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let cfg: Config = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let endpoint = self.connection.endpoint.as_str();
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            anyhow::bail!(
                "Invalid endpoint '{}', must start with ws:// or wss://",
                endpoint
            );
        }

        if self.backoff.jitter_factor < 0.0 || self.backoff.jitter_factor > 1.0 {
            anyhow::bail!("backoff.jitter_factor must be within 0.0..=1.0");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Invalid log level '{}', must be one of: {:?}",
                self.logging.level,
                valid_log_levels
            );
        }

        self.link_config()
            .validate()
            .context("Invalid connection settings")?;
        self.rate_limit_config()
            .validate()
            .context("Invalid rate limit settings")?;

        Ok(())
    }

    /// Connection manager settings
    pub fn link_config(&self) -> LinkConfig {
        let max_retries = if self.connection.unlimited_reconnects {
            None
        } else {
            Some(self.connection.max_reconnect_attempts)
        };

        let mut link = LinkConfig::new(self.connection.endpoint.clone())
            .with_connect_timeout(Duration::from_millis(self.connection.connect_timeout_ms))
            .with_heartbeat(HeartbeatConfig {
                interval: Duration::from_millis(self.heartbeat.interval_ms),
                timeout: Duration::from_millis(self.heartbeat.timeout_ms),
            })
            .with_backoff(BackoffConfig {
                initial_delay: Duration::from_millis(self.backoff.initial_delay_ms),
                max_delay: Duration::from_millis(self.backoff.max_delay_ms),
                multiplier: self.backoff.multiplier,
                max_retries,
                jitter_factor: self.backoff.jitter_factor,
            })
            .with_dedup(self.dedup.enabled.then(|| DedupConfig {
                window: Duration::from_millis(self.dedup.window_ms),
                max_entries: self.dedup.max_entries,
            }));
        link.event_capacity = self.connection.event_capacity;
        link.outbound_capacity = self.connection.outbound_capacity;
        link
    }

    /// Rate limiter settings
    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_actions: self.rate_limit.max_actions,
            window: Duration::from_secs(self.rate_limit.window_secs),
            mode: self.rate_limit.mode,
            summary_chars: self.rate_limit.summary_chars,
        }
    }
}
