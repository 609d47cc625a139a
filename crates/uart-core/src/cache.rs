//! Concurrent TTL cache with a background sweep.
//!
//! Entries carry an absolute expiry computed at write time. Reads never extend
//! that expiry and never return an entry whose expiry has passed, even if the
//! sweep has not evicted it yet. The sweep only reclaims memory.
//!
//! ## Locking
//!
//! The entry map sits behind a single `RwLock`. Readers share the lock; writes,
//! deletes and each sweep pass take it exclusively, so a reader observes the
//! map either before or after a sweep pass, never in between.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::domain::MarketItem;

/// Catalog pages keyed by page number.
pub type PageCache = TtlCache<u32, Arc<Vec<MarketItem>>>;

/// Upper bound for expiry arithmetic, far beyond any configured TTL.
const MAX_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 365);

struct CachedEntry<V> {
    value: V,
    expires_at: Instant,
}

struct Shared<K, V> {
    entries: RwLock<HashMap<K, CachedEntry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K: Eq + Hash, V> Shared<K, V> {
    fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }
}

/// Key/value store whose entries expire a fixed duration after being written.
pub struct TtlCache<K, V> {
    shared: Arc<Shared<K, V>>,
    sweep_interval: Duration,
    stop_tx: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty cache and start its sweep task on the current runtime.
    ///
    /// The first sweep runs one full `sweep_interval` after construction.
    pub fn new(sweep_interval: Duration) -> Self {
        let sweep_interval = sweep_interval.max(Duration::from_millis(1));
        let shared = Arc::new(Shared {
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        });
        let (stop_tx, stop_rx) = watch::channel(false);
        let sweeper = tokio::spawn(sweep_loop(shared.clone(), sweep_interval, stop_rx));

        Self {
            shared,
            sweep_interval,
            stop_tx,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Look up a live entry. Expired entries are reported as absent.
    pub fn read(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let entries = self.shared.entries.read();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                self.shared.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            _ => {
                self.shared.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or fully replace the entry for `key`, expiring `ttl` from now.
    pub fn write(&self, key: K, value: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl.min(MAX_TTL);
        self.shared
            .entries
            .write()
            .insert(key, CachedEntry { value, expires_at });
    }

    /// Remove the entry for `key`. Returns whether one was present.
    pub fn delete(&self, key: &K) -> bool {
        self.shared.entries.write().remove(key).is_some()
    }

    /// Run one sweep pass immediately. Returns the number of evicted entries.
    pub fn sweep(&self) -> usize {
        self.shared.sweep()
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.shared.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.shared.hits.load(Ordering::Relaxed),
            misses: self.shared.misses.load(Ordering::Relaxed),
            evictions: self.shared.evictions.load(Ordering::Relaxed),
        }
    }

    /// Stop the sweep task and wait for it to exit.
    ///
    /// No sweep pass runs after this returns. Reads and writes keep working,
    /// expired entries are simply no longer reclaimed. Calling it twice is a no-op.
    pub async fn shutdown(&self) {
        let _ = self.stop_tx.send(true);
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "cache sweep task ended abnormally");
            }
        }
    }

    /// Whether the sweep task is still running.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

// Dropping the cache drops `stop_tx`, which ends the sweep loop on its next wakeup.
async fn sweep_loop<K, V>(
    shared: Arc<Shared<K, V>>,
    period: Duration,
    mut stop_rx: watch::Receiver<bool>,
) where
    K: Eq + Hash,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(interval_ms = period.as_millis() as u64, "cache sweep started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = shared.sweep();
                if removed > 0 {
                    tracing::debug!(removed, "cache sweep evicted expired entries");
                }
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }

    tracing::debug!("cache sweep stopped");
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently stored, expired or not.
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries removed by sweep passes.
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    fn page(ids: &[&str]) -> Arc<Vec<MarketItem>> {
        Arc::new(
            ids.iter()
                .map(|id| MarketItem::new(*id, format!("item {id}"), 10.0, ""))
                .collect(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_unknown_key_is_miss() {
        let cache: PageCache = TtlCache::new(Duration::from_secs(5));

        assert!(cache.read(&7).is_none());
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().hits, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_after_write_returns_items() {
        let cache: PageCache = TtlCache::new(Duration::from_secs(5));
        let items = page(&["a", "b", "c"]);

        cache.write(2, items.clone(), Duration::from_secs(30));

        let hit = cache.read(&2).expect("entry should be live");
        assert_eq!(hit, items);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_hidden_before_sweep() {
        let cache: PageCache = TtlCache::new(Duration::from_secs(60));
        cache.write(1, page(&["a"]), Duration::from_secs(1));

        sleep(Duration::from_secs(2)).await;

        assert!(cache.read(&1).is_none());
        // Still stored: the sweep has not run yet.
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_does_not_refresh_ttl() {
        let cache: PageCache = TtlCache::new(Duration::from_secs(60));
        cache.write(1, page(&["a"]), Duration::from_secs(10));

        sleep(Duration::from_secs(6)).await;
        assert!(cache.read(&1).is_some());

        sleep(Duration::from_secs(6)).await;
        assert!(cache.read(&1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_loop_evicts_expired_entries() {
        let cache: PageCache = TtlCache::new(Duration::from_secs(5));
        cache.write(1, page(&["a"]), Duration::from_secs(1));
        cache.write(2, page(&["b"]), Duration::from_secs(300));

        sleep(Duration::from_secs(6)).await;

        assert_eq!(cache.len(), 1);
        assert!(cache.read(&1).is_none());
        assert!(cache.read(&2).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_write_replaces_entry_and_ttl() {
        let cache: PageCache = TtlCache::new(Duration::from_secs(60));
        cache.write(3, page(&["a", "b"]), Duration::from_secs(100));
        cache.write(3, page(&["z"]), Duration::from_secs(1));

        let replaced = cache.read(&3).unwrap();
        assert_eq!(replaced.len(), 1);
        assert_eq!(replaced[0].id, "z");

        sleep(Duration::from_secs(2)).await;
        assert!(cache.read(&3).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete() {
        let cache: PageCache = TtlCache::new(Duration::from_secs(60));
        cache.write(4, page(&["a"]), Duration::from_secs(30));

        assert!(cache.delete(&4));
        assert!(!cache.delete(&4));
        assert!(cache.read(&4).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_sweep_keeps_live_entries() {
        let cache: TtlCache<&'static str, u32> = TtlCache::new(Duration::from_secs(60));
        cache.write("old", 1, Duration::from_millis(10));
        cache.write("new", 2, Duration::from_secs(10));

        sleep(Duration::from_millis(20)).await;

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.read(&"new"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_sweeping() {
        let cache: PageCache = TtlCache::new(Duration::from_secs(1));
        assert!(cache.is_sweeping());

        cache.shutdown().await;
        assert!(!cache.is_sweeping());

        cache.write(1, page(&["a"]), Duration::from_millis(1));
        sleep(Duration::from_secs(10)).await;

        // Nothing reclaims the entry any more, but it is still hidden from reads.
        assert_eq!(cache.len(), 1);
        assert!(cache.read(&1).is_none());

        // Idempotent.
        cache.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_and_writer() {
        let cache: Arc<PageCache> = Arc::new(TtlCache::new(Duration::from_millis(5)));
        cache.write(0, page(&["a"]), Duration::from_secs(60));

        let mut handles = Vec::new();
        for i in 0..8u32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let items = cache.read(&0).expect("page 0 stays live");
                    assert_eq!(items.len(), 1);
                    cache.write(i + 1, page(&["x"]), Duration::from_secs(60));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cache.len(), 9);
        cache.shutdown().await;
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            entries: 3,
            hits: 3,
            misses: 1,
            evictions: 0,
        };
        assert!((stats.hit_rate() - 75.0).abs() < 0.001);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
