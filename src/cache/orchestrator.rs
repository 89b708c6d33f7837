//! The staleness protocol tying the store and the providers together.
//!
//! Every lookup walks the same state machine:
//!
//! 1. **Fresh hit**: the entry was verified within the freshness window and
//!    is served without calling the provider.
//! 2. **Counter check**: the provider's counter is fetched under the entry's
//!    in-flight guard. Waiters re-check freshness once they hold the guard,
//!    so a burst of requests for a stale key costs one check.
//! 3. **Unchanged**: the counter matches the stored one; only
//!    `last_checked` moves.
//! 4. **Regenerate**: fresh content is fetched, encoded and swapped in.
//!
//! An entry that was never populated always regenerates, whatever counter
//! the provider reports. If that first attempt fails, the empty entry is
//! dropped from the store again.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use tokio::time::Instant;
use tracing::debug;

use super::config::CacheConfig;
use super::entry::{Entry, EntryContent, SharedData};
use super::keys::CacheKey;
use super::provider::{ContentError, ContentProvider};
use super::store::CacheStore;

const METRIC_HIT_TOTAL: &str = "imageboard_cache_hit_total";
const METRIC_REGENERATE_TOTAL: &str = "imageboard_cache_regenerate_total";

/// JSON view of a cached artifact.
#[derive(Debug)]
pub struct CachedJson<T> {
    pub json: Bytes,
    pub data: Arc<T>,
    pub counter: u64,
}

/// HTML view of a cached artifact.
#[derive(Debug)]
pub struct CachedHtml<T> {
    pub html: Bytes,
    pub data: Arc<T>,
    pub counter: u64,
}

// Content resolved for one request, typed for the provider that asked.
struct Resolved<T> {
    counter: u64,
    data: Arc<T>,
    json: Bytes,
    html: Option<Bytes>,
}

/// Public entry points of the content cache.
pub struct ContentCache {
    store: Arc<CacheStore>,
    freshness: Duration,
    enabled: bool,
}

impl ContentCache {
    pub fn new(store: Arc<CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            freshness: config.freshness_window(),
            enabled: config.enabled,
        }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn freshness_window(&self) -> Duration {
        self.freshness
    }

    /// Decoded data, its JSON encoding and the counter it was generated for.
    pub async fn get_json_and_data<P>(
        &self,
        key: &CacheKey,
        provider: &P,
    ) -> Result<CachedJson<P::Content>, ContentError>
    where
        P: ContentProvider + ?Sized,
    {
        let resolved = if self.enabled {
            self.resolve(key, provider, false).await?.1
        } else {
            self.uncached(key, provider, false).await?
        };
        Ok(CachedJson {
            json: resolved.json,
            data: resolved.data,
            counter: resolved.counter,
        })
    }

    /// Rendered HTML, decoded data and the counter. HTML is rendered at most
    /// once per generation of the content.
    pub async fn get_html<P>(
        &self,
        key: &CacheKey,
        provider: &P,
    ) -> Result<CachedHtml<P::Content>, ContentError>
    where
        P: ContentProvider + ?Sized,
    {
        if !self.enabled {
            let resolved = self.uncached(key, provider, true).await?;
            return Ok(CachedHtml {
                html: resolved.html.unwrap_or_default(),
                data: resolved.data,
                counter: resolved.counter,
            });
        }

        let (entry, resolved) = self.resolve(key, provider, true).await?;
        let html = match resolved.html {
            Some(html) => html,
            None => {
                let html = provider.render_html(&resolved.data, &resolved.json, key)?;
                let data = Arc::clone(&resolved.data);
                entry.attach_html(
                    Some(resolved.counter),
                    html.clone(),
                    |content| provider.size(&data, &content.json, html_of(content)),
                    self.store.accounting(),
                );
                html
            }
        };

        Ok(CachedHtml {
            html,
            data: resolved.data,
            counter: resolved.counter,
        })
    }

    async fn resolve<P>(
        &self,
        key: &CacheKey,
        provider: &P,
        want_html: bool,
    ) -> Result<(Arc<Entry>, Resolved<P::Content>), ContentError>
    where
        P: ContentProvider + ?Sized,
    {
        let entry = self.store.lookup_or_create(key);
        if let Some(hit) = self.fresh_hit::<P::Content>(&entry) {
            counter!(METRIC_HIT_TOTAL, "path" => "fresh").increment(1);
            return Ok((entry, hit));
        }

        let refreshed = self.refresh(&entry, key, provider, want_html).await;
        match refreshed {
            Ok(resolved) => Ok((entry, resolved)),
            Err(err) => {
                // A key that never produced content must not hold a slot.
                self.store.remove_if_empty(key, &entry);
                Err(err)
            }
        }
    }

    // Counter check and regeneration under the entry's in-flight guard.
    async fn refresh<P>(
        &self,
        entry: &Entry,
        key: &CacheKey,
        provider: &P,
        want_html: bool,
    ) -> Result<Resolved<P::Content>, ContentError>
    where
        P: ContentProvider + ?Sized,
    {
        let _in_flight = entry.refresh_guard().await;
        if let Some(hit) = self.fresh_hit::<P::Content>(entry) {
            counter!(METRIC_HIT_TOTAL, "path" => "fresh").increment(1);
            return Ok(hit);
        }

        let counter = provider.counter(key).await?;
        let snapshot = entry.snapshot();
        let unchanged = (snapshot.counter == Some(counter))
            .then(|| typed::<P::Content>(&snapshot))
            .flatten();
        if let Some(hit) = unchanged {
            entry.touch(Instant::now());
            counter!(METRIC_HIT_TOTAL, "path" => "unchanged").increment(1);
            return Ok(hit);
        }

        let previous = snapshot.counter;
        let resolved = self.generate(key, provider, counter, want_html).await?;
        entry.update(
            EntryContent {
                counter: Some(counter),
                last_checked: Some(Instant::now()),
                data: Some(Arc::clone(&resolved.data) as SharedData),
                json: resolved.json.clone(),
                html: resolved.html.clone(),
            },
            |content| provider.size(&resolved.data, &content.json, html_of(content)),
            self.store.accounting(),
        );

        counter!(METRIC_REGENERATE_TOTAL, "artifact" => key.artifact()).increment(1);
        debug!(key = %key, ?previous, counter, "cache entry regenerated");
        Ok(resolved)
    }

    async fn uncached<P>(
        &self,
        key: &CacheKey,
        provider: &P,
        want_html: bool,
    ) -> Result<Resolved<P::Content>, ContentError>
    where
        P: ContentProvider + ?Sized,
    {
        let counter = provider.counter(key).await?;
        self.generate(key, provider, counter, want_html).await
    }

    async fn generate<P>(
        &self,
        key: &CacheKey,
        provider: &P,
        counter: u64,
        want_html: bool,
    ) -> Result<Resolved<P::Content>, ContentError>
    where
        P: ContentProvider + ?Sized,
    {
        let content = provider.fresh(key).await?;
        let json = provider.encode_json(&content)?;
        let html = if want_html {
            Some(provider.render_html(&content, &json, key)?)
        } else {
            None
        };
        Ok(Resolved {
            counter,
            data: Arc::new(content),
            json,
            html,
        })
    }

    fn fresh_hit<T: Send + Sync + 'static>(&self, entry: &Entry) -> Option<Resolved<T>> {
        if !entry.is_fresh(Instant::now(), self.freshness) {
            return None;
        }
        typed(&entry.snapshot())
    }
}

fn typed<T: Send + Sync + 'static>(content: &EntryContent) -> Option<Resolved<T>> {
    Some(Resolved {
        counter: content.counter?,
        data: content.typed_data::<T>()?,
        json: content.json.clone(),
        html: content.html.clone(),
    })
}

fn html_of(content: &EntryContent) -> &[u8] {
    content.html.as_deref().unwrap_or_default()
}
