use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use imageboard::cache::{
    CacheConfig, CacheKey, CacheStore, ContentCache, ContentError, ContentProvider,
};

/// Provider backed by a plain counter, recording every call the cache makes.
#[derive(Default)]
struct CountingProvider {
    counter: AtomicU64,
    failing: AtomicBool,
    failing_fresh: AtomicBool,
    missing: AtomicBool,
    fetch_delay_ms: u64,
    counter_calls: AtomicUsize,
    fresh_calls: AtomicUsize,
    render_calls: AtomicUsize,
}

impl CountingProvider {
    fn at(counter: u64) -> Self {
        Self {
            counter: AtomicU64::new(counter),
            ..Default::default()
        }
    }

    fn set_counter(&self, counter: u64) {
        self.counter.store(counter, Ordering::SeqCst);
    }

    fn counter_calls(&self) -> usize {
        self.counter_calls.load(Ordering::SeqCst)
    }

    fn fresh_calls(&self) -> usize {
        self.fresh_calls.load(Ordering::SeqCst)
    }

    fn render_calls(&self) -> usize {
        self.render_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentProvider for CountingProvider {
    type Content = String;

    async fn counter(&self, _key: &CacheKey) -> Result<u64, ContentError> {
        self.counter_calls.fetch_add(1, Ordering::SeqCst);
        if self.missing.load(Ordering::SeqCst) {
            return Err(ContentError::NotFound);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ContentError::backend("store unavailable"));
        }
        Ok(self.counter.load(Ordering::SeqCst))
    }

    async fn fresh(&self, key: &CacheKey) -> Result<String, ContentError> {
        self.fresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.fetch_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.fetch_delay_ms)).await;
        }
        if self.failing_fresh.load(Ordering::SeqCst) {
            return Err(ContentError::backend("fetch failed"));
        }
        Ok(format!(
            "thread {} v{}",
            key.id(),
            self.counter.load(Ordering::SeqCst)
        ))
    }

    fn encode_json(&self, content: &String) -> Result<Bytes, ContentError> {
        Ok(Bytes::from(serde_json::to_vec(content)?))
    }

    fn render_html(
        &self,
        content: &String,
        _json: &[u8],
        _key: &CacheKey,
    ) -> Result<Bytes, ContentError> {
        self.render_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from(format!("<p>{content}</p>")))
    }
}

fn cache_with(config: CacheConfig) -> ContentCache {
    let store = Arc::new(CacheStore::from_config(&config));
    ContentCache::new(store, &config)
}

fn cache() -> ContentCache {
    cache_with(CacheConfig::default())
}

fn key(id: u64) -> CacheKey {
    CacheKey::thread("en", id, 0)
}

#[tokio::test(start_paused = true)]
async fn fresh_entries_skip_the_counter_check() {
    let cache = cache();
    let provider = CountingProvider::at(5);

    let first = cache.get_json_and_data(&key(1), &provider).await.unwrap();
    assert_eq!(first.counter, 5);
    assert_eq!(provider.counter_calls(), 1);
    assert_eq!(provider.fresh_calls(), 1);

    tokio::time::advance(Duration::from_millis(999)).await;
    let second = cache.get_json_and_data(&key(1), &provider).await.unwrap();
    assert_eq!(provider.counter_calls(), 1);
    assert_eq!(second.json, first.json);
}

#[tokio::test(start_paused = true)]
async fn unchanged_counter_only_moves_last_checked() {
    let cache = cache();
    let provider = CountingProvider::at(5);

    let first = cache.get_json_and_data(&key(1), &provider).await.unwrap();
    tokio::time::advance(Duration::from_millis(1500)).await;

    let second = cache.get_json_and_data(&key(1), &provider).await.unwrap();
    assert_eq!(provider.counter_calls(), 2);
    assert_eq!(provider.fresh_calls(), 1);
    assert_eq!(second.json, first.json);
    assert!(Arc::ptr_eq(&first.data, &second.data));

    // The check restarted the window.
    tokio::time::advance(Duration::from_millis(500)).await;
    cache.get_json_and_data(&key(1), &provider).await.unwrap();
    assert_eq!(provider.counter_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn changed_counter_regenerates_exactly_once() {
    let cache = cache();
    let provider = CountingProvider::at(5);

    cache.get_json_and_data(&key(1), &provider).await.unwrap();
    provider.set_counter(6);
    tokio::time::advance(Duration::from_secs(2)).await;

    let changed = cache.get_json_and_data(&key(1), &provider).await.unwrap();
    assert_eq!(changed.counter, 6);
    assert_eq!(changed.json, Bytes::from_static(b"\"thread 1 v6\""));
    assert_eq!(provider.fresh_calls(), 2);

    tokio::time::advance(Duration::from_secs(2)).await;
    cache.get_json_and_data(&key(1), &provider).await.unwrap();
    assert_eq!(provider.fresh_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn counter_zero_still_populates_a_new_entry() {
    let cache = cache();
    let provider = CountingProvider::at(0);

    let cached = cache.get_json_and_data(&key(3), &provider).await.unwrap();
    assert_eq!(cached.counter, 0);
    assert_eq!(provider.fresh_calls(), 1);
    assert_eq!(cached.data.as_str(), "thread 3 v0");
}

#[tokio::test(start_paused = true)]
async fn html_is_rendered_once_per_generation() {
    let cache = cache();
    let provider = CountingProvider::at(1);

    cache.get_json_and_data(&key(1), &provider).await.unwrap();
    assert_eq!(provider.render_calls(), 0);

    let first = cache.get_html(&key(1), &provider).await.unwrap();
    assert_eq!(first.html, Bytes::from_static(b"<p>thread 1 v1</p>"));
    assert_eq!(provider.render_calls(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    let again = cache.get_html(&key(1), &provider).await.unwrap();
    assert_eq!(again.html, first.html);
    assert_eq!(provider.render_calls(), 1);

    provider.set_counter(2);
    tokio::time::advance(Duration::from_secs(2)).await;
    let changed = cache.get_html(&key(1), &provider).await.unwrap();
    assert_eq!(changed.html, Bytes::from_static(b"<p>thread 1 v2</p>"));
    assert_eq!(provider.render_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_checks_surface_and_do_not_refresh_the_window() {
    let cache = cache();
    let provider = CountingProvider::at(1);

    cache.get_json_and_data(&key(1), &provider).await.unwrap();
    tokio::time::advance(Duration::from_secs(2)).await;

    provider.failing.store(true, Ordering::SeqCst);
    let err = cache
        .get_json_and_data(&key(1), &provider)
        .await
        .expect_err("counter failure must surface");
    assert!(matches!(err, ContentError::Backend(_)));

    // The populated entry survives a failed check.
    assert!(cache.store().contains(&key(1)));

    provider.failing.store(false, Ordering::SeqCst);
    cache.get_json_and_data(&key(1), &provider).await.unwrap();
    assert_eq!(provider.counter_calls(), 3);
    assert_eq!(provider.fresh_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_fetch_is_retried_on_the_next_request() {
    let store = Arc::new(CacheStore::new(1 << 20));
    let cache = ContentCache::new(Arc::clone(&store), &CacheConfig::default());
    let provider = CountingProvider::at(1);
    provider.failing_fresh.store(true, Ordering::SeqCst);

    let err = cache
        .get_json_and_data(&key(1), &provider)
        .await
        .expect_err("fetch failure must surface");
    assert!(matches!(err, ContentError::Backend(_)));

    // No content was stored, so the next request fetches again.
    let err = cache
        .get_html(&key(1), &provider)
        .await
        .expect_err("fetch still failing");
    assert!(matches!(err, ContentError::Backend(_)));
    assert_eq!(provider.fresh_calls(), 2);
    assert_eq!(provider.render_calls(), 0);

    store.settle();
    assert_eq!(store.live_size(), 0);
    assert_eq!(store.total_size(), 0);
    assert!(!store.contains(&key(1)));

    provider.failing_fresh.store(false, Ordering::SeqCst);
    let cached = cache.get_json_and_data(&key(1), &provider).await.unwrap();
    assert_eq!(cached.counter, 1);
    assert_eq!(provider.fresh_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn missing_content_leaves_no_entries_behind() {
    let store = Arc::new(CacheStore::new(1));
    let cache = ContentCache::new(Arc::clone(&store), &CacheConfig::default());
    let provider = CountingProvider::at(1);
    provider.missing.store(true, Ordering::SeqCst);

    for id in 1..=1_000 {
        let err = cache
            .get_json_and_data(&key(id), &provider)
            .await
            .expect_err("unknown thread");
        assert!(err.is_not_found());
    }
    store.settle();

    assert!(store.is_empty());
    assert_eq!(store.total_size(), 0);
    assert_eq!(provider.fresh_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_misses_share_one_regeneration() {
    let cache = cache();
    let provider = CountingProvider {
        fetch_delay_ms: 50,
        ..CountingProvider::at(9)
    };

    let k = key(7);
    let (a, b, c, d) = tokio::join!(
        cache.get_json_and_data(&k, &provider),
        cache.get_json_and_data(&k, &provider),
        cache.get_json_and_data(&k, &provider),
        cache.get_json_and_data(&k, &provider),
    );

    let results = [a.unwrap(), b.unwrap(), c.unwrap(), d.unwrap()];
    assert!(results.iter().all(|r| r.counter == 9));
    assert!(results.iter().all(|r| r.json == results[0].json));
    assert_eq!(provider.fresh_calls(), 1);
    assert_eq!(provider.counter_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn disabled_cache_goes_to_the_provider_every_time() {
    let cache = cache_with(CacheConfig {
        enabled: false,
        ..CacheConfig::default()
    });
    let provider = CountingProvider::at(4);

    for _ in 0..3 {
        let html = cache.get_html(&key(1), &provider).await.unwrap();
        assert_eq!(html.counter, 4);
    }
    assert_eq!(provider.fresh_calls(), 3);
    assert_eq!(provider.render_calls(), 3);
    assert!(cache.store().is_empty());
}

#[tokio::test(start_paused = true)]
async fn store_stays_within_budget_and_keeps_recent_entries() {
    // "thread N v1" encodes to 13 bytes of JSON, 26 bytes per entry.
    let store = Arc::new(CacheStore::new(100));
    let cache = ContentCache::new(Arc::clone(&store), &CacheConfig::default());
    let provider = CountingProvider::at(1);

    for id in 1..=6 {
        cache.get_json_and_data(&key(id), &provider).await.unwrap();
        store.settle();
        assert!(store.total_size() <= 100);
        assert_eq!(store.total_size(), store.live_size());
    }

    assert_eq!(store.len(), 3);
    assert!(store.contains(&key(6)));
    assert!(store.contains(&key(5)));
    assert!(store.contains(&key(4)));
    assert!(!store.contains(&key(1)));
}

#[tokio::test(start_paused = true)]
async fn evicted_keys_are_rebuilt_on_next_access() {
    let store = Arc::new(CacheStore::new(40));
    let cache = ContentCache::new(Arc::clone(&store), &CacheConfig::default());
    let provider = CountingProvider::at(1);

    cache.get_json_and_data(&key(1), &provider).await.unwrap();
    cache.get_json_and_data(&key(2), &provider).await.unwrap();
    store.settle();
    assert!(!store.contains(&key(1)));

    cache.get_json_and_data(&key(1), &provider).await.unwrap();
    assert_eq!(provider.fresh_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn background_accountant_applies_reports() {
    let store = Arc::new(CacheStore::new(1 << 20));
    let accountant = store.spawn_accountant();
    let cache = ContentCache::new(Arc::clone(&store), &CacheConfig::default());
    let provider = CountingProvider::at(1);

    cache.get_html(&key(1), &provider).await.unwrap();
    for _ in 0..10 {
        if store.pending_size() == 0 && store.total_size() > 0 {
            break;
        }
        tokio::task::yield_now().await;
    }

    assert_eq!(store.pending_size(), 0);
    assert_eq!(store.total_size(), store.live_size());
    assert!(store.total_size() > 0);
    accountant.abort();
}
