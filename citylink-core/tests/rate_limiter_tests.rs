//! Rate limiter behavior tests
//!
//! These tests verify:
//! 1. Fresh identities report full quota and no active window
//! 2. MAX recorded actions limit the identity until the window resets
//! 3. The reset is lazy and replenishes the whole quota at once
//! 4. Shared handles see one set of records

use citylink_core::risk::{RateLimitConfig, RateLimiter, WindowMode};
use proptest::prelude::*;
use std::time::{Duration, SystemTime};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

fn start() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_750_000_000)
}

#[test]
fn test_fresh_identity() {
    let limiter = RateLimiter::new(RateLimitConfig::default());
    let status = limiter.check_limit_at("addr1", start());

    assert_eq!(status.remaining, 15);
    assert!(!status.is_limited);
    assert!(status.reset_at.is_none());
}

/// 15 actions within a minute, then checks before and after the 4h window
#[test]
fn test_fifteen_per_four_hours_scenario() {
    let limiter = RateLimiter::new(RateLimitConfig::default());
    let t0 = start();

    for i in 0..15u32 {
        let at = t0 + Duration::from_secs(u64::from(i) * 4);
        limiter.record_action_at("addr1", &format!("message {}", i), at);
    }

    // 16th check before 4h elapses
    let status = limiter.check_limit_at("addr1", t0 + MINUTE);
    assert!(status.is_limited);
    assert_eq!(status.remaining, 0);
    assert_eq!(status.reset_at, Some(t0 + 4 * HOUR));

    let status = limiter.check_limit_at("addr1", t0 + 4 * HOUR - Duration::from_secs(1));
    assert!(status.is_limited);

    // 4h + 1s after the first action
    let later = t0 + 4 * HOUR + Duration::from_secs(1);
    let status = limiter.check_limit_at("addr1", later);
    assert!(!status.is_limited);
    assert_eq!(status.remaining, 15);

    let status = limiter.record_action_at("addr1", "back again", later);
    assert!(!status.is_limited);
    assert_eq!(status.remaining, 14);
    assert_eq!(status.reset_at, Some(later + 4 * HOUR));
}

#[test]
fn test_record_after_reset_counts_in_new_window() {
    let limiter = RateLimiter::new(RateLimitConfig::new(3, HOUR));
    let t0 = start();

    for _ in 0..3 {
        limiter.record_action_at("addr1", "x", t0);
    }
    assert!(limiter.check_limit_at("addr1", t0 + MINUTE).is_limited);

    // First access after the deadline is a record, not a check
    let status = limiter.record_action_at("addr1", "y", t0 + 2 * HOUR);
    assert_eq!(status.remaining, 2);
    assert_eq!(limiter.history_at("addr1", t0 + 2 * HOUR).len(), 1);
}

#[test]
fn test_check_is_pure() {
    let limiter = RateLimiter::new(RateLimitConfig::new(2, HOUR));
    let t0 = start();
    limiter.record_action_at("addr1", "x", t0);

    for _ in 0..10 {
        assert_eq!(limiter.check_limit_at("addr1", t0).remaining, 1);
    }
    assert_eq!(limiter.tracked_identities(), 1);
    assert_eq!(limiter.total_recorded(), 1);
}

#[test]
fn test_clones_share_records() {
    let limiter = RateLimiter::new(RateLimitConfig::new(2, HOUR));
    let handle = limiter.clone();
    let t0 = start();

    handle.record_action_at("addr1", "x", t0);
    handle.record_action_at("addr1", "y", t0);

    assert!(limiter.check_limit_at("addr1", t0).is_limited);
}

#[test]
fn test_sliding_mode_from_config() {
    let config = RateLimitConfig {
        mode: WindowMode::Sliding,
        ..RateLimitConfig::new(2, HOUR)
    };
    let limiter = RateLimiter::new(config);
    let t0 = start();

    limiter.record_action_at("addr1", "a", t0);
    limiter.record_action_at("addr1", "b", t0 + 30 * MINUTE);
    assert!(limiter.check_limit_at("addr1", t0 + 59 * MINUTE).is_limited);

    // First action ages out, second still counts
    let status = limiter.check_limit_at("addr1", t0 + HOUR);
    assert_eq!(status.remaining, 1);
    assert!(!status.is_limited);
}

#[test]
fn test_countdown_for_limited_identity() {
    let limiter = RateLimiter::new(RateLimitConfig::new(1, HOUR));
    let t0 = start();
    limiter.record_action_at("addr1", "x", t0);

    assert_eq!(
        limiter.time_until_reset_at("addr1", t0 + 15 * MINUTE),
        Some(45 * MINUTE)
    );
    assert_eq!(limiter.time_until_reset_at("addr1", t0 + 2 * HOUR), None);
}

proptest! {
    #[test]
    fn prop_remaining_never_exceeds_max(max in 1u32..30, actions in 0usize..60) {
        let limiter = RateLimiter::new(RateLimitConfig::new(max, HOUR));
        let t0 = start();

        for i in 0..actions {
            let status = limiter.record_action_at("id", "x", t0 + Duration::from_secs(i as u64));
            prop_assert!(status.remaining <= max);
            prop_assert_eq!(status.is_limited, status.remaining == 0);
        }

        let status = limiter.check_limit_at("id", t0 + Duration::from_secs(actions as u64));
        let expected = max.saturating_sub(actions as u32);
        prop_assert_eq!(status.remaining, expected);
    }

    #[test]
    fn prop_full_quota_after_window(max in 1u32..30, actions in 1usize..60) {
        let limiter = RateLimiter::new(RateLimitConfig::new(max, HOUR));
        let t0 = start();

        for _ in 0..actions {
            limiter.record_action_at("id", "x", t0);
        }

        let status = limiter.check_limit_at("id", t0 + HOUR);
        prop_assert_eq!(status.remaining, max);
        prop_assert!(!status.is_limited);
    }
}
