//! Token cache with TTL for validated platform tokens
//!
//! Process-wide mapping from a *platform* access token to its resolved
//! identity profile. Entries are never keyed by delegated/external tokens.
//! Validity is checked lazily on lookup; there is no eviction timer, and
//! an expired entry is treated as absent and overwritten by the next
//! successful validation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::profile::UserProfile;

/// Thread-safe identity cache with TTL expiry
pub struct TokenCache {
    /// Cache entries keyed by platform access token
    entries: DashMap<String, CacheEntry>,
    /// Cache statistics
    stats: CacheStats,
}

/// A cached profile with its expiry
#[derive(Debug, Clone)]
struct CacheEntry {
    /// The resolved profile
    profile: UserProfile,
    /// Entry becomes invalid at this instant
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses (absent or expired)
    pub misses: u64,
    /// Total expiry-driven evictions
    pub evictions: u64,
    /// Current number of entries
    pub size: usize,
}

impl TokenCache {
    /// Create a new empty cache
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Get a cached profile if the entry exists and hasn't expired.
    ///
    /// An expired entry counts as a miss and is evicted on the spot.
    pub fn get(&self, token: &str) -> Option<UserProfile> {
        if let Some(entry) = self.entries.get(token) {
            if entry.is_expired() {
                drop(entry);
                self.entries.remove(token);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            } else {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.profile.clone())
            }
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Insert or overwrite the entry for a platform token.
    ///
    /// Two writers racing after near-simultaneous cold lookups is a benign
    /// race: last writer wins, both profiles derive from the same token.
    pub fn insert(&self, token: &str, profile: UserProfile, ttl: Duration) {
        // Out-of-range TTLs clamp to "never expires"
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries
            .insert(token.to_string(), CacheEntry { profile, expires_at });
    }

    /// Insert an entry with an absolute expiry instant
    pub fn insert_until(&self, token: &str, profile: UserProfile, expires_at: DateTime<Utc>) {
        self.entries
            .insert(token.to_string(), CacheEntry { profile, expires_at });
    }

    /// Whether a live entry exists for this token (test inspection helper)
    #[must_use]
    pub fn contains(&self, token: &str) -> bool {
        self.entries
            .get(token)
            .is_some_and(|entry| !entry.is_expired())
    }

    /// Remove expired entries (optional maintenance; validity is otherwise
    /// checked lazily on lookup)
    pub fn evict_expired(&self) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired())
            .map(|entry| entry.key().clone())
            .collect();

        let count = expired.len();
        for token in expired {
            self.entries.remove(&token);
        }

        if count > 0 {
            self.stats
                .evictions
                .fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    /// Clear all cached entries
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            size: self.entries.len(),
        }
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}
