//! Cache storage.
//!
//! The [`CacheStore`] owns every [`Entry`], their recency order and the
//! memory accounting. Its lock guards only the LRU structure and the running
//! total; it is never held while content is generated.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use lru::LruCache;
use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::accounting::SizeAccounting;
use super::config::{CacheConfig, megabytes_to_bytes};
use super::entry::Entry;
use super::keys::CacheKey;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

const METRIC_EVICT_TOTAL: &str = "imageboard_cache_evict_total";
const METRIC_BYTES: &str = "imageboard_cache_bytes";
const METRIC_ENTRIES: &str = "imageboard_cache_entries";

struct StoreInner {
    // Map and recency list in one structure, so they cannot drift apart.
    entries: LruCache<CacheKey, Arc<Entry>>,
    total: i64,
}

/// Shared, size-bounded LRU store of cache entries.
pub struct CacheStore {
    inner: Mutex<StoreInner>,
    budget: AtomicU64,
    accounting: SizeAccounting,
}

impl CacheStore {
    /// Create an empty store with the given budget in bytes.
    pub fn new(budget_bytes: u64) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                entries: LruCache::unbounded(),
                total: 0,
            }),
            budget: AtomicU64::new(budget_bytes),
            accounting: SizeAccounting::new(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.budget_bytes())
    }

    /// Return the entry for `key`, marking it most recently used, or insert
    /// an empty one at the front.
    pub fn lookup_or_create(&self, key: &CacheKey) -> Arc<Entry> {
        let mut inner = mutex_lock(&self.inner, SOURCE, "lookup_or_create");
        if let Some(entry) = inner.entries.get(key) {
            return Arc::clone(entry);
        }

        let entry = Arc::new(Entry::new(key.clone()));
        inner.entries.put(key.clone(), Arc::clone(&entry));
        gauge!(METRIC_ENTRIES).set(inner.entries.len() as f64);
        trace!(key = %key, "cache entry created");
        entry
    }

    /// Remove `entry` if it is still the one stored under `key` and was never
    /// populated. Returns true when it was removed.
    ///
    /// Lookups that fail before any content is stored call this, so failed
    /// requests leave nothing behind. A waiter still holding the entry keeps
    /// working on a detached copy whose updates no longer count.
    pub fn remove_if_empty(&self, key: &CacheKey, entry: &Arc<Entry>) -> bool {
        let mut inner = mutex_lock(&self.inner, SOURCE, "remove_if_empty");
        let current = inner
            .entries
            .peek(key)
            .is_some_and(|stored| Arc::ptr_eq(stored, entry));
        if !current || entry.is_populated() {
            return false;
        }

        inner.entries.pop(key);
        let released = entry.mark_evicted();
        inner.total -= released as i64;
        gauge!(METRIC_ENTRIES).set(inner.entries.len() as f64);
        trace!(key = %key, "empty cache entry removed");
        true
    }

    /// Drop every entry and reset the accounting. Maintenance and tests only.
    pub fn clear(&self) {
        let mut inner = mutex_lock(&self.inner, SOURCE, "clear");
        for (_, entry) in inner.entries.iter() {
            entry.mark_evicted();
        }
        inner.entries.clear();
        inner.total = 0;
        // Every pending delta belongs to an entry dropped above.
        self.accounting.take();
        gauge!(METRIC_BYTES).set(0.0);
        gauge!(METRIC_ENTRIES).set(0.0);
        debug!("cache cleared");
    }

    /// Apply a size delta to the running total, then evict least recently
    /// used entries until the total fits the budget or nothing is left.
    pub fn account(&self, delta: i64) {
        let budget = i64::try_from(self.budget_bytes()).unwrap_or(i64::MAX);
        let mut inner = mutex_lock(&self.inner, SOURCE, "account");
        inner.total += delta;

        let mut evicted = 0_u64;
        while inner.total > budget {
            let Some((key, victim)) = inner.entries.pop_lru() else {
                break;
            };
            let released = victim.mark_evicted();
            inner.total -= released as i64;
            evicted += 1;
            trace!(key = %key, released, "cache entry evicted");
        }

        if evicted > 0 {
            counter!(METRIC_EVICT_TOTAL).increment(evicted);
            debug!(
                evicted,
                total = inner.total,
                budget,
                remaining = inner.entries.len(),
                "cache evicted least recently used entries"
            );
        }
        gauge!(METRIC_BYTES).set(inner.total as f64);
        gauge!(METRIC_ENTRIES).set(inner.entries.len() as f64);
    }

    /// Apply every pending size report. Returns the delta that was applied.
    pub fn settle(&self) -> i64 {
        let delta = self.accounting.take();
        self.account(delta);
        delta
    }

    /// Spawn the background task applying size reports as they arrive.
    pub fn spawn_accountant(self: &Arc<Self>) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                store.accounting.reported().await;
                store.settle();
            }
        })
    }

    pub(crate) fn accounting(&self) -> &SizeAccounting {
        &self.accounting
    }

    pub fn budget_bytes(&self) -> u64 {
        self.budget.load(Ordering::Acquire)
    }

    /// Change the budget and immediately evict down to it.
    pub fn set_budget_bytes(&self, budget_bytes: u64) {
        self.budget.store(budget_bytes, Ordering::Release);
        self.account(0);
    }

    pub fn set_budget_mb(&self, budget_mb: u64) {
        self.set_budget_bytes(megabytes_to_bytes(budget_mb));
    }

    /// Running total as last settled. May lag pending reports.
    pub fn total_size(&self) -> i64 {
        mutex_lock(&self.inner, SOURCE, "total_size").total
    }

    /// Sum of the sizes recorded by the live entries.
    pub fn live_size(&self) -> i64 {
        let inner = mutex_lock(&self.inner, SOURCE, "live_size");
        inner
            .entries
            .iter()
            .map(|(_, entry)| entry.size() as i64)
            .sum()
    }

    /// Size reports not yet folded into the total.
    pub fn pending_size(&self) -> i64 {
        self.accounting.pending()
    }

    /// Check for an entry without touching its recency.
    pub fn contains(&self, key: &CacheKey) -> bool {
        mutex_lock(&self.inner, SOURCE, "contains").entries.contains(key)
    }

    /// Keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<CacheKey> {
        mutex_lock(&self.inner, SOURCE, "keys_by_recency")
            .entries
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.inner, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::time::Instant;

    use super::*;
    use crate::cache::entry::{EntryContent, SharedData};

    fn key(id: u64) -> CacheKey {
        CacheKey::thread("en", id, 0)
    }

    fn fill(store: &CacheStore, key: &CacheKey, bytes: usize) -> Arc<Entry> {
        let entry = store.lookup_or_create(key);
        let content = EntryContent {
            counter: Some(1),
            last_checked: Some(Instant::now()),
            data: Some(Arc::new(()) as SharedData),
            json: Bytes::from(vec![b'x'; bytes]),
            html: None,
        };
        entry.update(content, |c| c.json.len(), store.accounting());
        entry
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_creates_then_reuses_entries() {
        let store = CacheStore::new(1024);
        let first = store.lookup_or_create(&key(1));
        let again = store.lookup_or_create(&key(1));
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(first.size(), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn least_recently_used_entry_goes_first() {
        let store = CacheStore::new(30);
        fill(&store, &key(1), 10);
        fill(&store, &key(2), 10);
        fill(&store, &key(3), 10);
        store.settle();
        assert_eq!(store.len(), 3);

        store.lookup_or_create(&key(1));
        assert_eq!(store.keys_by_recency(), vec![key(1), key(3), key(2)]);

        fill(&store, &key(4), 10);
        store.settle();

        assert!(!store.contains(&key(2)));
        assert!(store.contains(&key(1)));
        assert!(store.contains(&key(3)));
        assert!(store.contains(&key(4)));
        assert_eq!(store.total_size(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_only_entry_is_evicted_immediately() {
        let store = CacheStore::new(1);
        fill(&store, &key(1), 2);
        store.settle();

        assert!(store.is_empty());
        assert_eq!(store.total_size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn total_matches_live_sizes_after_settling() {
        let store = CacheStore::new(100);
        for id in 0..12 {
            fill(&store, &key(id), 7 + id as usize);
        }
        let resized = store.lookup_or_create(&key(11));
        let content = EntryContent {
            counter: Some(2),
            json: Bytes::from_static(b"tiny"),
            ..Default::default()
        };
        resized.update(content, |c| c.json.len(), store.accounting());
        store.settle();

        assert_eq!(store.pending_size(), 0);
        assert!(store.total_size() <= 100);
        assert_eq!(store.total_size(), store.live_size());
    }

    #[tokio::test(start_paused = true)]
    async fn updates_to_evicted_entries_are_not_counted() {
        let store = CacheStore::new(15);
        let stale = fill(&store, &key(1), 10);
        fill(&store, &key(2), 10);
        store.settle();
        assert!(!store.contains(&key(1)));

        let content = EntryContent {
            counter: Some(9),
            json: Bytes::from(vec![b'y'; 12]),
            ..Default::default()
        };
        stale.update(content, |c| c.json.len(), store.accounting());
        store.settle();

        assert_eq!(store.total_size(), 10);
        assert_eq!(store.total_size(), store.live_size());
    }

    #[tokio::test(start_paused = true)]
    async fn shrinking_the_budget_evicts_at_once() {
        let store = CacheStore::new(1 << 20);
        fill(&store, &key(1), 600);
        fill(&store, &key(2), 600);
        store.settle();
        assert_eq!(store.len(), 2);

        store.set_budget_bytes(700);
        assert_eq!(store.keys_by_recency(), vec![key(2)]);

        store.set_budget_mb(0);
        assert!(store.is_empty());
        assert_eq!(store.total_size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_discards_entries_and_pending_reports() {
        let store = CacheStore::new(1024);
        let entry = fill(&store, &key(1), 10);
        fill(&store, &key(2), 10);
        assert_eq!(store.pending_size(), 20);

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.total_size(), 0);
        assert_eq!(store.pending_size(), 0);

        entry.update(EntryContent::default(), |_| 50, store.accounting());
        assert_eq!(store.pending_size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn only_never_populated_entries_are_removed() {
        let store = CacheStore::new(1024);
        let empty = store.lookup_or_create(&key(1));
        let filled = fill(&store, &key(2), 10);
        store.settle();

        assert!(!store.remove_if_empty(&key(2), &filled));
        assert!(store.remove_if_empty(&key(1), &empty));
        assert!(!store.contains(&key(1)));
        assert!(store.contains(&key(2)));
        assert_eq!(store.total_size(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn detached_entries_do_not_remove_their_replacement() {
        let store = CacheStore::new(1024);
        let detached = store.lookup_or_create(&key(1));
        assert!(store.remove_if_empty(&key(1), &detached));

        let replacement = store.lookup_or_create(&key(1));
        assert!(!store.remove_if_empty(&key(1), &detached));
        assert!(store.contains(&key(1)));

        // Late writes to the detached entry stay out of the total.
        let content = EntryContent {
            counter: Some(3),
            json: Bytes::from_static(b"late"),
            ..Default::default()
        };
        detached.update(content, |c| c.json.len(), store.accounting());
        store.settle();
        assert_eq!(store.total_size(), 0);
        assert_eq!(replacement.size(), 0);
    }

    #[test]
    fn negative_total_stops_eviction_quietly() {
        let store = CacheStore::new(0);
        store.account(-5);
        assert_eq!(store.total_size(), -5);
        store.account(5);
        assert_eq!(store.total_size(), 0);
    }

    #[tokio::test]
    async fn accountant_settles_reports_in_the_background() {
        let store = Arc::new(CacheStore::new(1024));
        let accountant = store.spawn_accountant();
        fill(&store, &key(1), 40);

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.total_size() != 40 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("accountant applies the pending delta");

        accountant.abort();
    }

    #[test]
    fn store_recovers_from_poisoned_lock() {
        let store = CacheStore::new(1024);
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store.inner.lock().expect("store lock should be acquired");
            panic!("poison store lock");
        }));

        store.account(3);
        assert_eq!(store.total_size(), 3);
    }
}
