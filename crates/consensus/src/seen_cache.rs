//! Seen-message cache for replay rejection.
//!
//! Every signed peer message is keyed by `(sender, message_digest)`;
//! replaying one inside the TTL is rejected, outside the TTL it is
//! accepted and re-processed. The cache is volatile working memory with
//! a global entry bound against spam.

use conductor_crypto::Hash;
use conductor_types::ValidatorId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Configuration for the seen-message cache.
#[derive(Debug, Clone)]
pub struct SeenCacheConfig {
    /// How long an entry suppresses replays.
    pub ttl: Duration,
    /// Maximum entries held at once.
    pub max_entries: usize,
}

impl Default for SeenCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(86_400_000),
            max_entries: 1_000_000,
        }
    }
}

/// Result of checking a message against the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeenResult {
    /// First sighting inside the TTL; recorded.
    New,
    /// Replay inside the TTL; reject the message.
    Duplicate,
    /// Cache is at its entry bound; reject until eviction frees room.
    RateLimited,
}

/// Thread-safe replay filter with TTL eviction.
pub struct SeenMessageCache {
    config: SeenCacheConfig,
    entries: RwLock<HashMap<(ValidatorId, Hash), Instant>>,
}

impl SeenMessageCache {
    /// Create a cache with the given configuration.
    pub fn new(config: SeenCacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Create a cache with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(SeenCacheConfig::default())
    }

    /// Check a message and record it when new.
    pub fn check_and_record(&self, sender: ValidatorId, digest: Hash) -> SeenResult {
        let now = Instant::now();
        let key = (sender, digest);

        {
            let entries = self.entries.read();
            if let Some(&seen_at) = entries.get(&key) {
                if now.duration_since(seen_at) < self.config.ttl {
                    trace!(
                        sender = %sender,
                        digest = hex::encode(&digest[..8]),
                        "replayed message rejected"
                    );
                    return SeenResult::Duplicate;
                }
            }
        }

        let mut entries = self.entries.write();
        // Re-check under the write lock.
        if let Some(&seen_at) = entries.get(&key) {
            if now.duration_since(seen_at) < self.config.ttl {
                return SeenResult::Duplicate;
            }
            // Expired entry: refresh and accept for re-processing.
            entries.insert(key, now);
            return SeenResult::New;
        }

        if entries.len() >= self.config.max_entries {
            // Opportunistic eviction before rejecting outright.
            let ttl = self.config.ttl;
            entries.retain(|_, seen_at| now.duration_since(*seen_at) < ttl);
            if entries.len() >= self.config.max_entries {
                debug!(entries = entries.len(), "seen cache at capacity");
                return SeenResult::RateLimited;
            }
        }

        entries.insert(key, now);
        SeenResult::New
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        let ttl = self.config.ttl;
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, seen_at| now.duration_since(*seen_at) < ttl);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "seen cache purged");
        }
    }

    /// Current entry count.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl std::fmt::Debug for SeenMessageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeenMessageCache")
            .field("entries", &self.len())
            .field("ttl", &self.config.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(byte: u8) -> ValidatorId {
        ValidatorId([byte; 32])
    }

    #[test]
    fn test_replay_inside_ttl_rejected() {
        let cache = SeenMessageCache::with_defaults();
        assert_eq!(cache.check_and_record(sender(1), [2u8; 32]), SeenResult::New);
        assert_eq!(
            cache.check_and_record(sender(1), [2u8; 32]),
            SeenResult::Duplicate
        );
    }

    #[test]
    fn test_distinct_senders_are_distinct_keys() {
        let cache = SeenMessageCache::with_defaults();
        assert_eq!(cache.check_and_record(sender(1), [2u8; 32]), SeenResult::New);
        assert_eq!(cache.check_and_record(sender(2), [2u8; 32]), SeenResult::New);
    }

    #[test]
    fn test_expired_entry_reaccepted() {
        let cache = SeenMessageCache::new(SeenCacheConfig {
            ttl: Duration::from_millis(0),
            max_entries: 100,
        });
        assert_eq!(cache.check_and_record(sender(1), [2u8; 32]), SeenResult::New);
        // TTL of zero: the entry is immediately stale and re-accepted.
        assert_eq!(cache.check_and_record(sender(1), [2u8; 32]), SeenResult::New);
    }

    #[test]
    fn test_capacity_bound() {
        let cache = SeenMessageCache::new(SeenCacheConfig {
            ttl: Duration::from_secs(3600),
            max_entries: 2,
        });
        assert_eq!(cache.check_and_record(sender(1), [1u8; 32]), SeenResult::New);
        assert_eq!(cache.check_and_record(sender(1), [2u8; 32]), SeenResult::New);
        assert_eq!(
            cache.check_and_record(sender(1), [3u8; 32]),
            SeenResult::RateLimited
        );
    }

    #[test]
    fn test_purge_expired() {
        let cache = SeenMessageCache::new(SeenCacheConfig {
            ttl: Duration::from_millis(0),
            max_entries: 100,
        });
        cache.check_and_record(sender(1), [1u8; 32]);
        cache.purge_expired();
        assert!(cache.is_empty());
    }
}
