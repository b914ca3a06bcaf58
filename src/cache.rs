use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::Result;

struct CacheEntry {
    data: Value,
    stored_at: Instant,
}

struct PendingWrite {
    key: String,
    stale: bool,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    pending: HashMap<u64, PendingWrite>,
    next_ticket: u64,
}

/// In-memory store of fetched API data with one TTL for every entry.
///
/// Values are kept as JSON so one store can hold every response shape;
/// typed access goes through `get` / `set`. Expired entries are purged
/// lazily when they are looked up.
///
/// A read that is about to fetch takes a [`Reservation`] for its key.
/// Invalidating or clearing the key while the fetch is in flight marks the
/// reservation stale, and the late response is then never stored.
pub struct CacheStore {
    state: Mutex<CacheState>,
    ttl: Duration,
}

/// Pending cache write for one key, taken before the fetch starts.
///
/// Dropping it without committing just forgets the write.
pub struct Reservation<'a> {
    cache: &'a CacheStore,
    ticket: u64,
}

impl Reservation<'_> {
    /// Stores `data` unless the key was invalidated since the reservation
    /// was taken. Returns whether the value was stored.
    pub fn commit(self, data: Value) -> bool {
        let mut state = self.cache.lock();
        let Some(pending) = state.pending.remove(&self.ticket) else {
            return false;
        };
        if pending.stale {
            tracing::debug!(key = %pending.key, "cache write dropped, key invalidated in flight");
            return false;
        }
        state.entries.insert(
            pending.key,
            CacheEntry {
                data,
                stored_at: Instant::now(),
            },
        );
        true
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.cache.lock().pending.remove(&self.ticket);
    }
}

impl CacheStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // A panic while holding the lock leaves the maps themselves intact
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Live value for `key`, removing it first if it has expired.
    pub fn get_raw(&self, key: &str) -> Option<Value> {
        let mut state = self.lock();
        let expired = match state.entries.get(key) {
            Some(entry) => entry.stored_at.elapsed() >= self.ttl,
            None => return None,
        };

        if expired {
            state.entries.remove(key);
            tracing::trace!(key, "cache entry expired");
            return None;
        }

        state.entries.get(key).map(|entry| entry.data.clone())
    }

    /// Typed read. A live entry that does not fit `T` is an error, not a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn contains_live(&self, key: &str) -> bool {
        self.get_raw(key).is_some()
    }

    pub fn set_raw(&self, key: &str, data: Value) {
        self.lock().entries.insert(
            key.to_string(),
            CacheEntry {
                data,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn set<T: Serialize>(&self, key: &str, data: &T) -> Result<()> {
        let value = serde_json::to_value(data)?;
        self.set_raw(key, value);
        Ok(())
    }

    /// Announces a write to `key` that will land once a fetch completes.
    pub fn reserve(&self, key: &str) -> Reservation<'_> {
        let mut state = self.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.pending.insert(
            ticket,
            PendingWrite {
                key: key.to_string(),
                stale: false,
            },
        );
        Reservation { cache: self, ticket }
    }

    /// Drops every key matching `pattern`, live or not, and spoils any
    /// reserved write to a matching key.
    pub fn invalidate(&self, pattern: &Regex) {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|key, _| !pattern.is_match(key));
        let removed = before - state.entries.len();

        let mut spoiled = 0;
        for pending in state.pending.values_mut() {
            if pattern.is_match(&pending.key) {
                pending.stale = true;
                spoiled += 1;
            }
        }
        tracing::debug!(
            pattern = pattern.as_str(),
            removed,
            spoiled,
            "cache invalidated"
        );
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        for pending in state.pending.values_mut() {
            pending.stale = true;
        }
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

/// Cache key families. Keys are prefix-namespaced so one pattern can
/// drop a whole family.
pub mod keys {
    use regex::Regex;

    pub const USERS: &str = "users";
    pub const PROFILE: &str = "profile";
    pub const THREADS: &str = "threads";
    pub const LEADERBOARDS: &str = "leaderboards";

    pub fn thread(id: &str) -> String {
        format!("thread-{}", id)
    }

    /// `^threads`: the thread list.
    pub fn threads_family() -> Regex {
        Regex::new("^threads").expect("static pattern")
    }

    /// `^thread-<id>`: everything derived from one thread's detail.
    pub fn thread_family(id: &str) -> Regex {
        Regex::new(&format!("^thread-{}", regex::escape(id))).expect("escaped pattern")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test(start_paused = true)]
    async fn entry_visible_until_ttl_elapses() {
        let cache = CacheStore::new(TTL);
        cache.set_raw("threads", json!([1, 2, 3]));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get_raw("threads"), Some(json!([1, 2, 3])));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get_raw("threads"), None);
        assert_eq!(cache.len(), 0);

        cache.set_raw("threads", json!("fresh"));
        assert_eq!(cache.get_raw("threads"), Some(json!("fresh")));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_stays_until_accessed() {
        let cache = CacheStore::new(TTL);
        cache.set_raw("users", json!([]));
        tokio::time::advance(TTL * 2).await;

        assert_eq!(cache.len(), 1);
        assert!(!cache.contains_live("users"));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn overwrite_resets_timestamp() {
        let cache = CacheStore::new(TTL);
        cache.set_raw("profile", json!({"id": "a"}));
        tokio::time::advance(Duration::from_secs(200)).await;
        cache.set_raw("profile", json!({"id": "b"}));
        tokio::time::advance(Duration::from_secs(200)).await;

        assert_eq!(cache.get_raw("profile"), Some(json!({"id": "b"})));
    }

    #[test]
    fn invalidate_by_family() {
        let cache = CacheStore::new(TTL);
        for key in ["thread-1", "thread-2", "threads"] {
            cache.set_raw(key, json!(key));
        }

        cache.invalidate(&Regex::new("^thread-").unwrap());
        assert!(!cache.contains_live("thread-1"));
        assert!(!cache.contains_live("thread-2"));
        assert!(cache.contains_live("threads"));

        cache.set_raw("thread-1", json!(1));
        cache.invalidate(&keys::threads_family());
        assert!(!cache.contains_live("threads"));
        assert!(cache.contains_live("thread-1"));
    }

    #[test]
    fn thread_family_escapes_ids() {
        let cache = CacheStore::new(TTL);
        cache.set_raw("thread-a.b", json!(1));
        cache.set_raw("thread-axb", json!(2));

        cache.invalidate(&keys::thread_family("a.b"));
        assert!(!cache.contains_live("thread-a.b"));
        assert!(cache.contains_live("thread-axb"));
    }

    #[test]
    fn typed_round_trip_and_mismatch() {
        let cache = CacheStore::new(TTL);
        cache.set("leaderboards", &vec![1u32, 2, 3]).unwrap();

        let scores: Option<Vec<u32>> = cache.get("leaderboards").unwrap();
        assert_eq!(scores, Some(vec![1, 2, 3]));
        assert!(cache.get::<String>("leaderboards").is_err());
        assert_eq!(cache.get::<String>("missing").unwrap(), None);
    }

    #[test]
    fn reservation_commits_when_untouched() {
        let cache = CacheStore::new(TTL);
        let reservation = cache.reserve("thread-7");

        assert!(reservation.commit(json!({"id": 7})));
        assert_eq!(cache.get_raw("thread-7"), Some(json!({"id": 7})));
    }

    #[test]
    fn invalidation_spoils_matching_reservations() {
        let cache = CacheStore::new(TTL);
        let detail = cache.reserve("thread-7");
        let list = cache.reserve("threads");

        cache.invalidate(&keys::thread_family("7"));

        assert!(!detail.commit(json!("stale")));
        assert!(!cache.contains_live("thread-7"));
        assert!(list.commit(json!([])));
        assert!(cache.contains_live("threads"));
    }

    #[test]
    fn clear_spoils_every_reservation() {
        let cache = CacheStore::new(TTL);
        let profile = cache.reserve(keys::PROFILE);
        cache.clear();

        assert!(!profile.commit(json!({"id": "old-user"})));
        assert!(cache.is_empty());
    }

    #[test]
    fn reservation_taken_after_invalidation_is_fresh() {
        let cache = CacheStore::new(TTL);
        cache.invalidate(&keys::threads_family());
        let reservation = cache.reserve(keys::THREADS);

        assert!(reservation.commit(json!([1])));
        assert!(cache.contains_live(keys::THREADS));
    }

    #[test]
    fn dropped_reservation_is_forgotten() {
        let cache = CacheStore::new(TTL);
        drop(cache.reserve("users"));
        assert!(cache.lock().pending.is_empty());
    }

    #[test]
    fn clear_drops_everything() {
        let cache = CacheStore::new(TTL);
        cache.set_raw(keys::USERS, json!([]));
        cache.set_raw(keys::PROFILE, json!({}));
        cache.clear();
        assert!(cache.is_empty());
    }
}
