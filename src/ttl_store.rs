use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Thread-safe in-memory map with per-entry expiry. Entries are evicted
/// lazily when an expired key is read and proactively by [`spawn_sweeper`].
/// Contents are volatile and lost on restart.
pub struct TtlStore<T> {
    entries: Mutex<HashMap<String, TtlEntry<T>>>,
}

#[derive(Debug, Clone)]
struct TtlEntry<T> {
    value: T,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlStoreStats {
    /// Raw entry count, including entries that expired but were not yet
    /// swept. Callers that need a live view should read individual keys.
    pub count: usize,
}

impl<T> Default for TtlStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TtlStore<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn put(&self, key: &str, value: T, ttl: Duration) {
        self.put_at(key, value, ttl, Utc::now());
    }

    /// Inserts or overwrites; a later put for the same key replaces the
    /// previous entry and its expiry without error.
    pub fn put_at(&self, key: &str, value: T, ttl: Duration, now: DateTime<Utc>) {
        // TTLs beyond what chrono can represent are clamped; nothing in this
        // service configures anything close to that.
        let expires_at = now
            + chrono::TimeDelta::from_std(ttl).unwrap_or_else(|_| chrono::TimeDelta::days(36_500));
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key.to_string(),
            TtlEntry {
                value,
                created_at: now,
                expires_at,
            },
        );
    }

    pub fn remove(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
    }

    /// Deletes every entry whose expiry has passed and returns how many were
    /// removed. Holds the store mutex for the whole pass, so the sweep is
    /// mutually exclusive with reads and writes.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub fn stats(&self) -> TtlStoreStats {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        TtlStoreStats {
            count: entries.len(),
        }
    }

    pub fn created_at(&self, key: &str) -> Option<DateTime<Utc>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).map(|entry| entry.created_at)
    }
}

impl<T: Clone> TtlStore<T> {
    pub fn get(&self, key: &str) -> Option<T> {
        self.get_at(key, Utc::now())
    }

    /// Returns the live value for `key`. An expired entry is deleted under
    /// the same lock acquisition that observed it, so no caller can see a
    /// half-evicted entry.
    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<T> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Single lock acquisition for check-and-consume flows: removes and
    /// returns the value only when it is live and `predicate` accepts it.
    pub fn take_if_at<F>(&self, key: &str, now: DateTime<Utc>, predicate: F) -> Option<T>
    where
        F: FnOnce(&T) -> bool,
    {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if now >= entry.expires_at => {
                entries.remove(key);
                None
            }
            Some(entry) if predicate(&entry.value) => {
                entries.remove(key).map(|entry| entry.value)
            }
            _ => None,
        }
    }
}

/// Spawns the proactive sweep loop for one store instance. The task runs for
/// the process lifetime; dropping the handle does not stop it.
pub fn spawn_sweeper<T>(
    store: Arc<TtlStore<T>>,
    label: &'static str,
    interval: Duration,
) -> tokio::task::JoinHandle<()>
where
    T: Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so a fresh store is not
        // swept before anything can expire.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = store.sweep_at(Utc::now());
            if removed > 0 {
                debug!(store = label, removed, "swept expired entries");
            }
            let stats = store.stats();
            if stats.count > 10_000 {
                warn!(store = label, count = stats.count, "ttl store unusually large");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn put_then_get_returns_value_before_expiry() {
        let store = TtlStore::new();
        let t0 = now();
        store.put_at("a@x.com", "v".to_string(), Duration::from_secs(1), t0);
        assert_eq!(store.get_at("a@x.com", t0), Some("v".to_string()));
    }

    #[test]
    fn get_after_ttl_is_absent_and_evicts() {
        let store = TtlStore::new();
        let t0 = now();
        store.put_at("a@x.com", "v".to_string(), Duration::from_secs(1), t0);
        let t2 = t0 + TimeDelta::seconds(2);
        assert_eq!(store.get_at("a@x.com", t2), None);
        // Lazy eviction removed the entry, not just hid it.
        assert_eq!(store.stats().count, 0);
    }

    #[test]
    fn put_overwrites_value_and_expiry() {
        let store = TtlStore::new();
        let t0 = now();
        store.put_at("k", 1u32, Duration::from_secs(1), t0);
        store.put_at("k", 2u32, Duration::from_secs(60), t0);
        let t5 = t0 + TimeDelta::seconds(5);
        assert_eq!(store.get_at("k", t5), Some(2));
    }

    #[test]
    fn remove_is_silent_for_missing_keys() {
        let store: TtlStore<String> = TtlStore::new();
        store.remove("never-stored");
        assert_eq!(store.stats().count, 0);
    }

    #[test]
    fn stats_counts_expired_but_unswept_entries() {
        let store = TtlStore::new();
        let t0 = now();
        store.put_at("a", 1u32, Duration::from_secs(1), t0);
        store.put_at("b", 2u32, Duration::from_secs(600), t0);
        assert_eq!(store.stats().count, 2);

        let t10 = t0 + TimeDelta::seconds(10);
        // "a" is expired but nothing has read or swept it yet.
        assert_eq!(store.stats().count, 2);
        assert_eq!(store.sweep_at(t10), 1);
        assert_eq!(store.stats().count, 1);
        assert_eq!(store.get_at("b", t10), Some(2));
    }

    #[test]
    fn sweep_keeps_live_entries_untouched() {
        let store = TtlStore::new();
        let t0 = now();
        store.put_at("live", "x".to_string(), Duration::from_secs(300), t0);
        assert_eq!(store.sweep_at(t0 + TimeDelta::seconds(1)), 0);
        assert_eq!(
            store.get_at("live", t0 + TimeDelta::seconds(1)),
            Some("x".to_string())
        );
    }

    #[test]
    fn take_if_consumes_only_on_match() {
        let store = TtlStore::new();
        let t0 = now();
        store.put_at("k", "secret".to_string(), Duration::from_secs(60), t0);

        assert_eq!(store.take_if_at("k", t0, |v| v == "wrong"), None);
        assert_eq!(store.stats().count, 1, "mismatch must not consume");

        assert_eq!(
            store.take_if_at("k", t0, |v| v == "secret"),
            Some("secret".to_string())
        );
        assert_eq!(store.stats().count, 0);
        assert_eq!(store.take_if_at("k", t0, |v| v == "secret"), None);
    }

    #[test]
    fn take_if_evicts_expired_entry_without_matching() {
        let store = TtlStore::new();
        let t0 = now();
        store.put_at("k", "secret".to_string(), Duration::from_secs(1), t0);
        let t2 = t0 + TimeDelta::seconds(2);
        assert_eq!(store.take_if_at("k", t2, |v| v == "secret"), None);
        assert_eq!(store.stats().count, 0);
    }

    #[test]
    fn created_at_reflects_insertion_time() {
        let store = TtlStore::new();
        let t0 = now();
        store.put_at("k", 1u32, Duration::from_secs(60), t0);
        assert_eq!(store.created_at("k"), Some(t0));
        let t1 = t0 + TimeDelta::seconds(30);
        store.put_at("k", 2u32, Duration::from_secs(60), t1);
        assert_eq!(store.created_at("k"), Some(t1));
    }

    #[test]
    fn independent_instances_do_not_share_entries() {
        let a = TtlStore::new();
        let b: TtlStore<String> = TtlStore::new();
        let t0 = now();
        a.put_at("k", "v".to_string(), Duration::from_secs(60), t0);
        assert_eq!(b.get_at("k", t0), None);
    }

    #[test]
    fn concurrent_writers_serialize_on_one_key() {
        let store = Arc::new(TtlStore::new());
        let mut handles = Vec::new();
        for i in 0..8u32 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    store.put("k", i, Duration::from_secs(60));
                    let _ = store.get("k");
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(store.get("k").is_some());
        assert_eq!(store.stats().count, 1);
    }
}
