//! Content provider contract.
//!
//! Each cacheable artifact kind (thread, catalog, board, board page)
//! implements [`ContentProvider`]. The cache never decides which provider
//! serves a request; callers pick one from the request shape.

use std::error::Error as StdError;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use super::entry::estimate_size;
use super::keys::CacheKey;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Failure surfaced by a provider. The cache forwards these untouched.
#[derive(Debug, Error)]
pub enum ContentError {
    /// The backing store holds no such thread or board.
    #[error("content not found")]
    NotFound,
    /// A board index page past the last available page was requested.
    #[error("page {page} is past the last page of {total}")]
    PageOverflow { page: u32, total: u32 },
    #[error("content backend failed: {0}")]
    Backend(#[source] BoxError),
    #[error("failed to encode JSON: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to render HTML: {0}")]
    Render(#[source] BoxError),
}

impl ContentError {
    pub fn backend(error: impl Into<BoxError>) -> Self {
        Self::Backend(error.into())
    }

    pub fn render(error: impl Into<BoxError>) -> Self {
        Self::Render(error.into())
    }

    /// True for errors a transport should answer with "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound | Self::PageOverflow { .. })
    }
}

/// Strategy describing how one artifact kind is checked, fetched, encoded,
/// rendered and sized.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Decoded content held by the cache and handed out to callers.
    type Content: Send + Sync + 'static;

    /// Cheap, authoritative change counter for the key's target.
    async fn counter(&self, key: &CacheKey) -> Result<u64, ContentError>;

    /// Fetch and assemble the canonical content for the key.
    async fn fresh(&self, key: &CacheKey) -> Result<Self::Content, ContentError>;

    /// Encode content to JSON. Providers whose content already carries its
    /// JSON, or which have none, keep the empty default.
    fn encode_json(&self, _content: &Self::Content) -> Result<Bytes, ContentError> {
        Ok(Bytes::new())
    }

    /// Render the HTML fragment of the content.
    fn render_html(
        &self,
        content: &Self::Content,
        json: &[u8],
        key: &CacheKey,
    ) -> Result<Bytes, ContentError>;

    /// Memory estimate of an entry holding this content.
    fn size(&self, _content: &Self::Content, json: &[u8], html: &[u8]) -> usize {
        estimate_size(json, html, true)
    }
}
