//! Fuzz target for the dedup cache
//!
//! Feeds arbitrary (fingerprint, time offset) sequences and checks the
//! capacity bound and the "new, then duplicate" contract.

#![no_main]

use citylink_core::resilience::{DedupCache, DedupConfig, Fingerprint};
use libfuzzer_sys::fuzz_target;
use std::time::Duration;
use tokio::time::Instant;

fuzz_target!(|data: &[u8]| {
    let mut cache = DedupCache::new(DedupConfig {
        window: Duration::from_millis(50),
        max_entries: 16,
    });
    let start = Instant::now();
    let mut offset_ms = 0u64;

    for chunk in data.chunks(3) {
        let key = chunk[0];
        offset_ms += u64::from(*chunk.get(1).unwrap_or(&0) % 20);
        let now = start + Duration::from_millis(offset_ms);
        let fp = Fingerprint::from_parts(u64::from(key), chunk);

        if cache.check_and_remember_at(fp, now) {
            assert!(cache.seen_at(fp, now), "remembered fingerprint must be visible");
        }
        assert!(cache.len() <= 16, "capacity bound exceeded");
    }
});
