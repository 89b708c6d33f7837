use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::{LAST_N_ON_REQUEST, encode};
use crate::application::repos::BoardRepo;
use crate::cache::{CacheKey, ContentError, ContentProvider};
use crate::domain::posts::Thread;
use crate::presentation::views;

/// Single thread views, whole or truncated to the last replies.
#[derive(Clone)]
pub struct ThreadProvider {
    repo: Arc<dyn BoardRepo>,
}

impl ThreadProvider {
    pub fn new(repo: Arc<dyn BoardRepo>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl ContentProvider for ThreadProvider {
    type Content = Thread;

    async fn counter(&self, key: &CacheKey) -> Result<u64, ContentError> {
        Ok(self.repo.thread_counter(key.id()).await?)
    }

    async fn fresh(&self, key: &CacheKey) -> Result<Thread, ContentError> {
        Ok(self.repo.thread(key.id(), key.last_n()).await?)
    }

    fn encode_json(&self, content: &Thread) -> Result<Bytes, ContentError> {
        encode(content)
    }

    fn render_html(
        &self,
        content: &Thread,
        json: &[u8],
        key: &CacheKey,
    ) -> Result<Bytes, ContentError> {
        let last_100 = key.last_n() == LAST_N_ON_REQUEST;
        views::render_thread(content, json, key.lang(), last_100).map_err(ContentError::render)
    }
}
