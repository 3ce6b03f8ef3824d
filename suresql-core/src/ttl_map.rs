//! An ordered key-value store with per-entry expiry and a background sweep.
//!
//! Modeled on the coarse-grained `Arc<Mutex<HashMap<..>>>` session stores in
//! the wider ecosystem (see `MemoryStore`/`MokaStore`): one lock guards the
//! whole map rather than a lock per shard. That is simple to reason about and
//! is adequate at the scale a single gateway node serves; see `DESIGN.md`.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;

#[derive(Clone, Debug)]
struct Entry<V> {
    value: V,
    expires_at: OffsetDateTime,
}

fn is_live(expires_at: OffsetDateTime) -> bool {
    expires_at > OffsetDateTime::now_utc()
}

/// A TTL-bounded map. Disposal of evicted values is entirely the caller's
/// responsibility: the map never runs destructors or callbacks on removal.
#[derive(Debug)]
pub struct TtlMap<K, V> {
    entries: RwLock<HashMap<K, Entry<V>>>,
    default_ttl: Duration,
}

impl<K, V> TtlMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Inserts `value` under `key`. `ttl_override` of `Duration::ZERO` (or any
    /// non-positive duration) falls back to the map's default TTL.
    pub async fn put(&self, key: K, ttl_override: Duration, value: V) {
        let ttl = if ttl_override > Duration::ZERO {
            ttl_override
        } else {
            self.default_ttl
        };
        let expires_at = OffsetDateTime::now_utc().saturating_add(ttl);
        self.entries
            .write()
            .await
            .insert(key, Entry { value, expires_at });
    }

    /// Returns `(value, true)` if `key` is present and unexpired, otherwise
    /// `(default, false)`. Never returns an entry past its expiry, even if the
    /// sweep has not yet run.
    pub async fn get(&self, key: &K) -> Option<V> {
        self.entries
            .read()
            .await
            .get(key)
            .filter(|entry| is_live(entry.expires_at))
            .map(|entry| entry.value.clone())
    }

    pub async fn delete(&self, key: &K) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// A point-in-time copy of every live entry's key.
    pub async fn snapshot_keys(&self) -> Vec<K> {
        let guard = self.entries.read().await;
        guard
            .iter()
            .filter(|(_, entry)| is_live(entry.expires_at))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// A point-in-time copy of every live entry.
    pub async fn snapshot(&self) -> Vec<(K, V)> {
        let guard = self.entries.read().await;
        guard
            .iter()
            .filter(|(_, entry)| is_live(entry.expires_at))
            .map(|(k, entry)| (k.clone(), entry.value.clone()))
            .collect()
    }

    /// Deletes every expired entry. Called by the sweep loop, but also usable
    /// directly in tests without waiting on a tick.
    pub async fn sweep_once(&self) -> usize {
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|_, entry| is_live(entry.expires_at));
        before - guard.len()
    }
}

/// Runs `map.sweep_once()` on every tick of `period` until the returned
/// `JoinHandle` is aborted. Mirrors `ExpiredDeletion::continuously_delete_expired`.
pub fn spawn_sweep<K, V>(map: Arc<TtlMap<K, V>>, period: StdDuration) -> tokio::task::JoinHandle<()>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let removed = map.sweep_once().await;
            if removed > 0 {
                tracing::trace!(removed, "ttl map sweep removed expired entries");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let map: TtlMap<String, u32> = TtlMap::new(Duration::minutes(5));
        map.put("a".to_string(), Duration::ZERO, 42).await;
        assert_eq!(map.get(&"a".to_string()).await, Some(42));
    }

    #[tokio::test]
    async fn expired_entry_is_invisible() {
        let map: TtlMap<String, u32> = TtlMap::new(Duration::milliseconds(10));
        map.put("a".to_string(), Duration::ZERO, 42).await;
        tokio::time::sleep(StdDuration::from_millis(30)).await;
        assert_eq!(map.get(&"a".to_string()).await, None);
    }

    #[tokio::test]
    async fn ttl_override_takes_precedence() {
        let map: TtlMap<String, u32> = TtlMap::new(Duration::minutes(5));
        map.put("a".to_string(), Duration::milliseconds(10), 42)
            .await;
        tokio::time::sleep(StdDuration::from_millis(30)).await;
        assert_eq!(map.get(&"a".to_string()).await, None);
    }

    #[tokio::test]
    async fn delete_and_sweep_are_indistinguishable() {
        let map: TtlMap<String, u32> = TtlMap::new(Duration::milliseconds(10));
        map.put("a".to_string(), Duration::ZERO, 1).await;
        map.put("b".to_string(), Duration::ZERO, 2).await;

        map.delete(&"a".to_string()).await;
        assert_eq!(map.get(&"a".to_string()).await, None);

        tokio::time::sleep(StdDuration::from_millis(30)).await;
        let removed = map.sweep_once().await;
        assert_eq!(removed, 1); // only "b" was still present to sweep
        assert_eq!(map.len().await, 0);
    }

    #[tokio::test]
    async fn snapshot_excludes_expired() {
        let map: TtlMap<String, u32> = TtlMap::new(Duration::minutes(5));
        map.put("a".to_string(), Duration::ZERO, 1).await;
        map.put("b".to_string(), Duration::milliseconds(5), 2).await;
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        let snap = map.snapshot().await;
        assert_eq!(snap, vec![("a".to_string(), 1)]);
    }
}
