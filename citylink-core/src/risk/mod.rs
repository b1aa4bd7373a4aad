//! Outbound action throttling
//!
//! The rate limiter guards user-initiated sends: check the identity's quota,
//! perform the action, then record it.
//!
//! ```text
//! user action → check_limit ─(limited)→ show remaining + reset countdown
//!                    │
//!                    └─(allowed)→ ConnectionManager::send → record_action
//! ```

pub mod rate_limiter;

pub use rate_limiter::{
    ActionRecord, RateLimitConfig, RateLimitStatus, RateLimiter, WindowMode,
};
