use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::encode;
use crate::application::repos::BoardRepo;
use crate::cache::{CacheKey, ContentError, ContentProvider};
use crate::domain::posts::Board;
use crate::presentation::views;

/// Board catalogs; the `all` board lists every board's threads.
#[derive(Clone)]
pub struct CatalogProvider {
    repo: Arc<dyn BoardRepo>,
}

impl CatalogProvider {
    pub fn new(repo: Arc<dyn BoardRepo>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl ContentProvider for CatalogProvider {
    type Content = Board;

    async fn counter(&self, key: &CacheKey) -> Result<u64, ContentError> {
        let counter = if key.is_all_boards() {
            self.repo.all_board_counter().await?
        } else {
            self.repo.board_counter(key.board_name()).await?
        };
        Ok(counter)
    }

    async fn fresh(&self, key: &CacheKey) -> Result<Board, ContentError> {
        let board = if key.is_all_boards() {
            self.repo.all_board_catalog().await?
        } else {
            self.repo.board_catalog(key.board_name()).await?
        };
        Ok(board)
    }

    fn encode_json(&self, content: &Board) -> Result<Bytes, ContentError> {
        encode(content)
    }

    fn render_html(
        &self,
        content: &Board,
        json: &[u8],
        key: &CacheKey,
    ) -> Result<Bytes, ContentError> {
        views::render_catalog(content, json, key.lang(), key.is_all_boards())
            .map_err(ContentError::render)
    }
}
