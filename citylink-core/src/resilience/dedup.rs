//! Short-window duplicate suppression for inbound messages
//!
//! The backend may redeliver a recent event after a reconnect, or two paths
//! may race. The cache remembers fingerprints for a fixed window and reports
//! them as seen until they expire.
//!
//! Best-effort and bounded: once `max_entries` is reached the oldest
//! fingerprint is evicted early.

use crate::config::constants::{DEFAULT_DEDUP_MAX_ENTRIES, DEFAULT_DEDUP_WINDOW_MS};
use crate::core::DataFrame;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for the dedup cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupConfig {
    /// How long a fingerprint stays visible
    pub window: Duration,
    /// Upper bound on remembered fingerprints
    pub max_entries: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(DEFAULT_DEDUP_WINDOW_MS),
            max_entries: DEFAULT_DEDUP_MAX_ENTRIES,
        }
    }
}

/// Message identity used for duplicate detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Fingerprint from a source timestamp and a content digest
    pub fn from_parts(timestamp: u64, content: &[u8]) -> Self {
        let mut hasher = DefaultHasher::new();
        timestamp.hash(&mut hasher);
        content.hash(&mut hasher);
        Fingerprint(hasher.finish())
    }

    /// Fingerprint from a backend-assigned unique event id
    pub fn from_id(id: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        "id".hash(&mut hasher);
        id.hash(&mut hasher);
        Fingerprint(hasher.finish())
    }

    /// Fingerprint of an inbound data frame
    ///
    /// Uses the frame's `id` when the backend supplies one, otherwise its
    /// timestamp (0 when absent) plus the serialized payload.
    pub fn of_frame(frame: &DataFrame) -> Self {
        match &frame.id {
            Some(id) => Self::from_id(id),
            None => Self::from_parts(
                frame.timestamp.unwrap_or(0),
                frame.payload.to_string().as_bytes(),
            ),
        }
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Time-windowed membership set of fingerprints
#[derive(Debug)]
pub struct DedupCache {
    config: DedupConfig,
    /// Fingerprint → expiry
    entries: HashMap<Fingerprint, Instant>,
    /// Insertion order for purging and eviction; may hold stale pairs
    order: VecDeque<(Fingerprint, Instant)>,
    suppressed: u64,
    evicted: u64,
}

impl DedupCache {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            order: VecDeque::new(),
            suppressed: 0,
            evicted: 0,
        }
    }

    /// Whether `fp` was remembered and has not yet expired
    pub fn seen(&self, fp: Fingerprint) -> bool {
        self.seen_at(fp, Instant::now())
    }

    pub fn seen_at(&self, fp: Fingerprint, now: Instant) -> bool {
        self.entries
            .get(&fp)
            .map_or(false, |expires_at| now < *expires_at)
    }

    /// Remember `fp` for one window starting now
    pub fn remember(&mut self, fp: Fingerprint) {
        self.remember_at(fp, Instant::now());
    }

    pub fn remember_at(&mut self, fp: Fingerprint, now: Instant) {
        self.purge_expired_at(now);

        let expires_at = now + self.config.window;
        self.entries.insert(fp, expires_at);
        self.order.push_back((fp, expires_at));

        while self.entries.len() > self.config.max_entries {
            match self.order.pop_front() {
                Some((old, old_expiry)) => {
                    if self.entries.get(&old) == Some(&old_expiry) {
                        self.entries.remove(&old);
                        self.evicted += 1;
                    }
                }
                None => break,
            }
        }
    }

    /// Returns `true` if `fp` is new (and remembers it), `false` if it is a duplicate
    pub fn check_and_remember(&mut self, fp: Fingerprint) -> bool {
        self.check_and_remember_at(fp, Instant::now())
    }

    pub fn check_and_remember_at(&mut self, fp: Fingerprint, now: Instant) -> bool {
        if self.seen_at(fp, now) {
            self.suppressed += 1;
            return false;
        }
        self.remember_at(fp, now);
        true
    }

    /// Physically drop expired entries
    pub fn purge_expired(&mut self) {
        self.purge_expired_at(Instant::now());
    }

    pub fn purge_expired_at(&mut self, now: Instant) {
        while let Some(&(fp, expires_at)) = self.order.front() {
            if expires_at > now {
                break;
            }
            self.order.pop_front();
            // A later remember() may have refreshed this fingerprint
            if self.entries.get(&fp) == Some(&expires_at) {
                self.entries.remove(&fp);
            }
        }
    }

    /// Number of physically stored fingerprints (expired ones included until purged)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Duplicates suppressed by `check_and_remember`
    pub fn suppressed_count(&self) -> u64 {
        self.suppressed
    }

    /// Entries evicted early because of the capacity bound
    pub fn evicted_count(&self) -> u64 {
        self.evicted
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}
