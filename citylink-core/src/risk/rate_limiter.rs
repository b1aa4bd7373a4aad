//! Per-identity action rate limiting
//!
//! Bounds how many user-initiated actions one identity (wallet address,
//! session id, ...) may perform per window. Being limited is a normal,
//! queryable state rather than an error: callers check first, act, then
//! record the action exactly once.
//!
//! ## Window modes
//!
//! ```text
//! MAX = 3, window = 4h
//!
//! Fixed (default): window anchored at the first action, whole quota returns at once
//!   t=0   act  remaining 2   reset_at = 4h
//!   t=1m  act  remaining 1
//!   t=2m  act  remaining 0   limited until 4h
//!   t=4h        remaining 3   (lazy reset on next access)
//!
//! Sliding: each action returns its quota one window after it happened
//!   t=0, 1m, 2m  act         limited until 4h
//!   t=4h          remaining 1 (the t=0 action aged out)
//! ```
//!
//! ## Usage
//!
//! ```
//! use citylink_core::risk::{RateLimitConfig, RateLimiter};
//!
//! let limiter = RateLimiter::new(RateLimitConfig::default());
//!
//! if !limiter.check_limit("addr1").is_limited {
//!     // perform the action, then:
//!     limiter.record_action("addr1", "hello");
//! }
//! ```

use crate::config::constants::{
    DEFAULT_PAYLOAD_SUMMARY_CHARS, DEFAULT_RATE_LIMIT_MAX_ACTIONS, DEFAULT_RATE_LIMIT_WINDOW_SECS,
};
use crate::core::LinkError;
use crate::monitoring::LinkMetrics;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

/// How quota returns to an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowMode {
    /// Window anchored at the first action; the full quota returns at its end
    #[default]
    Fixed,
    /// Each action stops counting one window after it was recorded
    Sliding,
}

/// Rate limiter configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Actions allowed per window
    pub max_actions: u32,
    /// Window length
    pub window: Duration,
    pub mode: WindowMode,
    /// Characters of the payload kept in the history
    pub summary_chars: usize,
}

impl RateLimitConfig {
    pub fn new(max_actions: u32, window: Duration) -> Self {
        Self {
            max_actions,
            window,
            ..Default::default()
        }
    }

    pub fn sliding(mut self) -> Self {
        self.mode = WindowMode::Sliding;
        self
    }

    pub fn validate(&self) -> Result<(), LinkError> {
        if self.max_actions == 0 {
            return Err(LinkError::InvalidConfig(
                "rate limit max_actions must be positive".to_string(),
            ));
        }
        if self.window.is_zero() {
            return Err(LinkError::InvalidConfig(
                "rate limit window must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_actions: DEFAULT_RATE_LIMIT_MAX_ACTIONS,
            window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECS),
            mode: WindowMode::Fixed,
            summary_chars: DEFAULT_PAYLOAD_SUMMARY_CHARS,
        }
    }
}

/// Quota view for one identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Actions still allowed in the current window
    pub remaining: u32,
    /// When quota next returns; `None` while no window is active
    pub reset_at: Option<SystemTime>,
    /// `remaining == 0` and the window has not reset
    pub is_limited: bool,
}

/// One recorded action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    pub at: SystemTime,
    /// Truncated payload
    pub summary: String,
}

#[derive(Debug, Clone)]
struct RateLimitRecord {
    remaining: u32,
    window_reset_at: Option<SystemTime>,
    history: VecDeque<ActionRecord>,
}

impl RateLimitRecord {
    fn fresh(max_actions: u32) -> Self {
        Self {
            remaining: max_actions,
            window_reset_at: None,
            history: VecDeque::new(),
        }
    }

    /// Apply lazy reset and history pruning as of `now`
    fn normalize(&mut self, config: &RateLimitConfig, now: SystemTime) {
        let cutoff = now.checked_sub(config.window);
        while let Some(oldest) = self.history.front() {
            match cutoff {
                Some(cutoff) if oldest.at <= cutoff => {
                    self.history.pop_front();
                }
                _ => break,
            }
        }

        match config.mode {
            WindowMode::Fixed => {
                if matches!(self.window_reset_at, Some(reset_at) if now >= reset_at) {
                    self.remaining = config.max_actions;
                    self.window_reset_at = None;
                }
            }
            WindowMode::Sliding => {
                let used = u32::try_from(self.history.len()).unwrap_or(u32::MAX);
                self.remaining = config.max_actions.saturating_sub(used);
                self.window_reset_at = self.history.front().map(|oldest| oldest.at + config.window);
            }
        }
    }

    fn status(&self) -> RateLimitStatus {
        RateLimitStatus {
            remaining: self.remaining,
            reset_at: self.window_reset_at,
            is_limited: self.remaining == 0,
        }
    }
}

/// Per-identity rate limiter
///
/// Cheap to clone; clones share records. Intended to be constructed once by
/// the application and handed to every consumer.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    records: Arc<DashMap<String, RateLimitRecord>>,
    /// Total checks performed
    total_checks: Arc<AtomicU64>,
    /// Checks that reported the identity as limited
    total_limited: Arc<AtomicU64>,
    /// Total actions recorded
    total_recorded: Arc<AtomicU64>,
    metrics: Option<LinkMetrics>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        info!(
            "Rate limiter: {} actions per {:?} ({:?} window)",
            config.max_actions, config.window, config.mode
        );
        Self {
            config,
            records: Arc::new(DashMap::new()),
            total_checks: Arc::new(AtomicU64::new(0)),
            total_limited: Arc::new(AtomicU64::new(0)),
            total_recorded: Arc::new(AtomicU64::new(0)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: LinkMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Current quota for `identity`
    ///
    /// Never mutates the stored record; an unseen identity reports the full
    /// quota with no active window.
    pub fn check_limit(&self, identity: &str) -> RateLimitStatus {
        self.check_limit_at(identity, SystemTime::now())
    }

    pub fn check_limit_at(&self, identity: &str, now: SystemTime) -> RateLimitStatus {
        self.total_checks.fetch_add(1, Ordering::Relaxed);

        let status = match self.records.get(identity) {
            Some(record) => {
                let mut view = record.clone();
                view.normalize(&self.config, now);
                view.status()
            }
            None => RateLimitStatus {
                remaining: self.config.max_actions,
                reset_at: None,
                is_limited: false,
            },
        };

        if status.is_limited {
            self.total_limited.fetch_add(1, Ordering::Relaxed);
            if let Some(metrics) = &self.metrics {
                metrics.rate_limit().checks_limited_total.inc();
            }
            debug!("Identity {} is rate limited until {:?}", identity, status.reset_at);
        }
        status
    }

    /// Record one accepted action for `identity`
    ///
    /// Call exactly once per action, after it was allowed. Opens a window
    /// on the first action and floors `remaining` at zero.
    pub fn record_action(&self, identity: &str, payload: &str) -> RateLimitStatus {
        self.record_action_at(identity, payload, SystemTime::now())
    }

    pub fn record_action_at(
        &self,
        identity: &str,
        payload: &str,
        now: SystemTime,
    ) -> RateLimitStatus {
        let mut created = false;
        let status = {
            let mut record = self
                .records
                .entry(identity.to_string())
                .or_insert_with(|| {
                    created = true;
                    RateLimitRecord::fresh(self.config.max_actions)
                });

            record.normalize(&self.config, now);
            record.history.push_back(ActionRecord {
                at: now,
                summary: summarize(payload, self.config.summary_chars),
            });

            match self.config.mode {
                WindowMode::Fixed => {
                    if record.window_reset_at.is_none() {
                        record.window_reset_at = Some(now + self.config.window);
                    }
                    record.remaining = record.remaining.saturating_sub(1);
                }
                WindowMode::Sliding => record.normalize(&self.config, now),
            }
            record.status()
        };

        self.total_recorded.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.rate_limit().actions_recorded_total.inc();
            if created {
                metrics
                    .rate_limit()
                    .tracked_identities
                    .set(i64::try_from(self.records.len()).unwrap_or(i64::MAX));
            }
        }
        debug!(
            "Recorded action for {} ({} remaining)",
            identity, status.remaining
        );
        status
    }

    /// Actions still inside the window, oldest first
    pub fn history(&self, identity: &str) -> Vec<ActionRecord> {
        self.history_at(identity, SystemTime::now())
    }

    pub fn history_at(&self, identity: &str, now: SystemTime) -> Vec<ActionRecord> {
        self.records
            .get(identity)
            .map(|record| {
                let mut view = record.clone();
                view.normalize(&self.config, now);
                view.history.into_iter().collect()
            })
            .unwrap_or_default()
    }

    /// Time until quota next returns, if a window is active
    pub fn time_until_reset(&self, identity: &str) -> Option<Duration> {
        self.time_until_reset_at(identity, SystemTime::now())
    }

    pub fn time_until_reset_at(&self, identity: &str, now: SystemTime) -> Option<Duration> {
        self.check_limit_at(identity, now)
            .reset_at
            .map(|reset_at| reset_at.duration_since(now).unwrap_or(Duration::ZERO))
    }

    /// Forget everything about `identity`
    pub fn reset(&self, identity: &str) {
        if self.records.remove(identity).is_some() {
            info!("Rate limit for {} reset", identity);
            if let Some(metrics) = &self.metrics {
                metrics
                    .rate_limit()
                    .tracked_identities
                    .set(i64::try_from(self.records.len()).unwrap_or(i64::MAX));
            }
        }
    }

    /// Number of identities with a stored record
    pub fn tracked_identities(&self) -> usize {
        self.records.len()
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Get total checks performed
    pub fn total_checks(&self) -> u64 {
        self.total_checks.load(Ordering::Acquire)
    }

    /// Get checks that found the identity limited
    pub fn total_limited(&self) -> u64 {
        self.total_limited.load(Ordering::Acquire)
    }

    /// Get total actions recorded
    pub fn total_recorded(&self) -> u64 {
        self.total_recorded.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("tracked_identities", &self.records.len())
            .finish()
    }
}

fn summarize(payload: &str, max_chars: usize) -> String {
    let mut chars = payload.chars();
    let mut summary: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        summary.push_str("...");
    }
    summary
}
