//! Single cache entries.
//!
//! An [`Entry`] carries three independent locks:
//!
//! - `content`: the cached data, JSON, HTML and freshness bookkeeping. Held
//!   only while copying a snapshot out or swapping new content in.
//! - `size`: the entry's memory estimate. Eviction reads it for arbitrary
//!   entries, so it must never wait behind content work.
//! - `refresh`: an async in-flight guard serialising counter checks and
//!   regeneration for this key.

use std::any::Any;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio::time::Instant;

use super::accounting::SizeAccounting;
use super::keys::CacheKey;
use super::lock::{mutex_lock, rw_read, rw_write};

const SOURCE: &str = "cache::entry";

/// Type-erased decoded content shared between the cache and its callers.
pub(crate) type SharedData = Arc<dyn Any + Send + Sync>;

/// Content fields of an entry. Cloning is cheap: all payloads are shared.
#[derive(Clone, Default)]
pub(crate) struct EntryContent {
    /// Counter the content was generated for. `None` until first populated.
    pub counter: Option<u64>,
    pub last_checked: Option<Instant>,
    pub data: Option<SharedData>,
    pub json: Bytes,
    /// Rendered lazily; `None` until someone asks for HTML of this content.
    pub html: Option<Bytes>,
}

impl EntryContent {
    /// Decoded data downcast to the provider's content type.
    pub fn typed_data<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.data.clone()?.downcast::<T>().ok()
    }
}

#[derive(Debug, Default)]
struct EntrySize {
    bytes: usize,
    evicted: bool,
}

/// One cached artifact. Only reachable through the [`CacheStore`](super::CacheStore).
pub struct Entry {
    key: CacheKey,
    content: RwLock<EntryContent>,
    size: Mutex<EntrySize>,
    refresh: AsyncMutex<()>,
}

impl Entry {
    pub(crate) fn new(key: CacheKey) -> Self {
        Self {
            key,
            content: RwLock::new(EntryContent::default()),
            size: Mutex::new(EntrySize::default()),
            refresh: AsyncMutex::new(()),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// True if the entry was checked less than `window` before `now`.
    pub fn is_fresh(&self, now: Instant, window: Duration) -> bool {
        rw_read(&self.content, SOURCE, "is_fresh")
            .last_checked
            .is_some_and(|checked| now.saturating_duration_since(checked) < window)
    }

    /// Current memory estimate of this entry.
    pub fn size(&self) -> usize {
        mutex_lock(&self.size, SOURCE, "size").bytes
    }

    pub(crate) fn snapshot(&self) -> EntryContent {
        rw_read(&self.content, SOURCE, "snapshot").clone()
    }

    pub(crate) async fn refresh_guard(&self) -> AsyncMutexGuard<'_, ()> {
        self.refresh.lock().await
    }

    /// Record a counter check that found the content unchanged.
    pub(crate) fn touch(&self, now: Instant) {
        rw_write(&self.content, SOURCE, "touch").last_checked = Some(now);
    }

    /// Replace the content wholesale and report the size delta to the store.
    pub(crate) fn update<F>(&self, content: EntryContent, estimate: F, accounting: &SizeAccounting)
    where
        F: FnOnce(&EntryContent) -> usize,
    {
        let new_size = estimate(&content);
        let mut current = rw_write(&self.content, SOURCE, "update");
        *current = content;
        // Resized before the content lock is released, so a concurrent
        // `attach_html` cannot land a size computed for older content.
        self.resize(new_size, accounting);
    }

    /// Attach rendered HTML, provided the content is still the one it was
    /// rendered from. Returns false when a newer generation won the race.
    pub(crate) fn attach_html<F>(
        &self,
        counter: Option<u64>,
        html: Bytes,
        estimate: F,
        accounting: &SizeAccounting,
    ) -> bool
    where
        F: FnOnce(&EntryContent) -> usize,
    {
        let mut content = rw_write(&self.content, SOURCE, "attach_html");
        if content.counter != counter {
            return false;
        }
        content.html = Some(html);
        self.resize(estimate(&content), accounting);
        true
    }

    /// True once content was stored at least once.
    pub(crate) fn is_populated(&self) -> bool {
        rw_read(&self.content, SOURCE, "is_populated").counter.is_some()
    }

    /// Flag the entry as evicted and return the size the store must release.
    ///
    /// Later updates on an evicted entry no longer report deltas, so the
    /// store total only ever covers live entries.
    pub(crate) fn mark_evicted(&self) -> usize {
        let mut size = mutex_lock(&self.size, SOURCE, "mark_evicted");
        size.evicted = true;
        size.bytes
    }

    fn resize(&self, new_size: usize, accounting: &SizeAccounting) {
        let mut size = mutex_lock(&self.size, SOURCE, "resize");
        let delta = new_size as i64 - size.bytes as i64;
        size.bytes = new_size;
        // Reported under the size lock so eviction observes either the old
        // size with no pending delta or the new size with its delta queued.
        if !size.evicted {
            accounting.report(delta);
        }
    }
}

/// Default memory estimate: the JSON and HTML payloads, plus the JSON length
/// again as a stand-in for the decoded object when one is held.
pub fn estimate_size(json: &[u8], html: &[u8], has_data: bool) -> usize {
    let mut size = json.len() + html.len();
    if has_data {
        size += json.len();
    }
    size
}
