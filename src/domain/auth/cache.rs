//! ID-tag authorization cache (§4.6): bounded FIFO with per-entry TTL, lazy
//! expiry purge on read.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::pipeline::AuthStatus;

#[derive(Debug, Clone)]
pub struct AuthCacheEntry {
    pub identifier: String,
    pub status: AuthStatus,
    pub method: &'static str,
    pub expires_at: DateTime<Utc>,
}

impl AuthCacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

pub struct AuthCache {
    capacity: usize,
    entries: Mutex<VecDeque<AuthCacheEntry>>,
}

impl AuthCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Insert or refresh a cache entry, evicting the oldest if over capacity.
    pub fn insert(&self, identifier: &str, status: AuthStatus, method: &'static str, ttl_secs: u64) {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|e| e.identifier != identifier);
        entries.push_back(AuthCacheEntry {
            identifier: identifier.to_string(),
            status,
            method,
            expires_at: Utc::now() + chrono::Duration::seconds(ttl_secs as i64),
        });
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// Look up an entry, purging it lazily if expired.
    pub fn lookup(&self, identifier: &str) -> Option<AuthCacheEntry> {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();
        if let Some(pos) = entries.iter().position(|e| e.identifier == identifier) {
            if entries[pos].is_expired(now) {
                entries.remove(pos);
                return None;
            }
            return Some(entries[pos].clone());
        }
        None
    }

    /// `ClearCache`: drop all entries.
    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_entry_is_evicted_over_capacity() {
        let cache = AuthCache::new(2);
        cache.insert("A", AuthStatus::Accepted, "Remote", 60);
        cache.insert("B", AuthStatus::Accepted, "Remote", 60);
        cache.insert("C", AuthStatus::Accepted, "Remote", 60);
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup("A").is_none());
        assert!(cache.lookup("C").is_some());
    }

    #[test]
    fn expired_entry_is_purged_lazily_on_read() {
        let cache = AuthCache::new(10);
        cache.insert("A", AuthStatus::Accepted, "Remote", 0);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(cache.lookup("A").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_removes_all_entries() {
        let cache = AuthCache::new(10);
        cache.insert("A", AuthStatus::Accepted, "Remote", 60);
        cache.clear();
        assert!(cache.is_empty());
    }
}
