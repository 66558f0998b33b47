//! Storage for rate-limit windows.
//!
//! The limiter only needs get and set-with-TTL keyed by string; anything
//! that offers those (an in-process map, a distributed cache, a test double)
//! can back it. Atomicity of read-modify-write is the limiter's job.

use std::fmt::Debug;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Key-value store of request timestamps with per-entry expiry.
pub trait RateLimitStore: Send + Sync + Debug {
    /// Timestamps stored under `key`, or `None` if absent or expired.
    /// An entry is still live at exactly its expiry instant.
    fn get(&self, key: &str, now: Instant) -> Option<Vec<Instant>>;

    /// Replace the timestamps under `key`; the entry expires `ttl` after `now`.
    fn set(&self, key: &str, timestamps: Vec<Instant>, ttl: Duration, now: Instant);

    /// Drop expired entries. Returns how many were removed.
    fn purge_expired(&self, _now: Instant) -> usize {
        0
    }

    /// Number of stored entries, expired or not.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct StoredWindow {
    timestamps: Vec<Instant>,
    expires_at: Instant,
}

/// In-process store backed by DashMap.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    map: DashMap<String, StoredWindow>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for InMemoryStore {
    fn get(&self, key: &str, now: Instant) -> Option<Vec<Instant>> {
        let entry = self.map.get(key)?;
        if entry.expires_at < now {
            drop(entry);
            self.map.remove_if(key, |_, w| w.expires_at < now);
            return None;
        }
        Some(entry.timestamps.clone())
    }

    fn set(&self, key: &str, timestamps: Vec<Instant>, ttl: Duration, now: Instant) {
        self.map.insert(
            key.to_string(),
            StoredWindow {
                timestamps,
                expires_at: now + ttl,
            },
        );
    }

    fn purge_expired(&self, now: Instant) -> usize {
        let before = self.map.len();
        self.map.retain(|_, w| w.expires_at >= now);
        before.saturating_sub(self.map.len())
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}
