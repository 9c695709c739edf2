//! String set whose members expire on their own
//!
//! Used twice by the P2P layer:
//! - recently requested block ranges/hashes (short TTL, request dedup)
//! - peers that recently failed us (long TTL, quarantine)
//!
//! Membership only ever ends by time passing; there is no removal call.

use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct ExpiringSet {
    entries: DashMap<String, Instant>,
    default_ttl: Duration,
}

impl ExpiringSet {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    pub fn insert(&self, key: impl Into<String>) {
        self.insert_with_ttl(key, self.default_ttl);
    }

    /// Insert or refresh `key`. A refresh never shortens an existing expiry.
    pub fn insert_with_ttl(&self, key: impl Into<String>, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries
            .entry(key.into())
            .and_modify(|current| {
                if *current < expires_at {
                    *current = expires_at;
                }
            })
            .or_insert(expires_at);
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        let live = match self.entries.get(key) {
            Some(expires_at) => *expires_at > now,
            None => return false,
        };
        if !live {
            // Guard is dropped above, so this cannot deadlock on the shard
            self.entries.remove_if(key, |_, expires_at| *expires_at <= now);
        }
        live
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| *e.value() > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}
