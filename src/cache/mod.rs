//! Content cache.
//!
//! Memoizes generated thread, catalog and board page content between the
//! backing store and the request path:
//!
//! - **Store**: size-bounded LRU of entries, evicting under a memory budget
//! - **Entries**: decoded data, JSON and lazily rendered HTML per key
//! - **Providers**: per-artifact strategies for counters, content and rendering
//! - **Orchestrator**: the freshness-window / counter-check protocol
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! budget_mb = 128
//! freshness_ms = 1000
//! ```

mod accounting;
mod config;
mod entry;
mod keys;
pub(crate) mod lock;
mod orchestrator;
mod provider;
mod store;

pub use accounting::SizeAccounting;
pub use config::CacheConfig;
pub use entry::{Entry, estimate_size};
pub use keys::{ALL_BOARDS, CacheKey, PageSelector};
pub use orchestrator::{CachedHtml, CachedJson, ContentCache};
pub use provider::{ContentError, ContentProvider};
pub use store::CacheStore;
