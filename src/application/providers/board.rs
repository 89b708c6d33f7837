//! Board index pages.
//!
//! A [`BoardProvider`] entry holds every page of a board, built from the
//! cached abbreviated threads. Each [`BoardPageProvider`] entry serves one
//! of those pages and owns only its rendered HTML.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};

use super::{LAST_N_AT_INDEX, THREADS_PER_PAGE, ThreadProvider};
use crate::application::repos::BoardRepo;
use crate::cache::{CacheKey, ContentCache, ContentError, ContentProvider, PageSelector};
use crate::domain::posts::Thread;
use crate::presentation::views;

/// One page of a board index.
#[derive(Debug, Clone)]
pub struct BoardPage {
    /// Zero-based page number.
    pub number: u32,
    /// Pages of the board this page belonged to when it was built.
    pub total: u32,
    /// JSON array of the page's threads.
    pub json: Bytes,
    pub threads: Vec<Arc<Thread>>,
}

impl BoardPage {
    fn empty() -> Self {
        Self {
            number: 0,
            total: 1,
            json: Bytes::from_static(b"[]"),
            threads: Vec::new(),
        }
    }
}

/// Every page of a board at once.
#[derive(Clone)]
pub struct BoardProvider {
    repo: Arc<dyn BoardRepo>,
    threads: ThreadProvider,
    cache: Arc<ContentCache>,
}

impl BoardProvider {
    pub fn new(repo: Arc<dyn BoardRepo>, threads: ThreadProvider, cache: Arc<ContentCache>) -> Self {
        Self {
            repo,
            threads,
            cache,
        }
    }
}

#[async_trait]
impl ContentProvider for BoardProvider {
    type Content = Vec<BoardPage>;

    async fn counter(&self, key: &CacheKey) -> Result<u64, ContentError> {
        let counter = if key.is_all_boards() {
            self.repo.all_board_counter().await?
        } else {
            self.repo.board_counter(key.board_name()).await?
        };
        Ok(counter)
    }

    async fn fresh(&self, key: &CacheKey) -> Result<Vec<BoardPage>, ContentError> {
        let ids = if key.is_all_boards() {
            self.repo.all_thread_ids().await?
        } else {
            self.repo.thread_ids(key.board_name()).await?
        };

        let mut pages = Vec::with_capacity(ids.len().div_ceil(THREADS_PER_PAGE).max(1));
        for chunk in ids.chunks(THREADS_PER_PAGE) {
            let mut json = BytesMut::with_capacity(1 << 10);
            json.put_u8(b'[');
            let mut threads = Vec::with_capacity(chunk.len());
            for (i, &id) in chunk.iter().enumerate() {
                let thread_key = CacheKey::thread(key.lang(), id, LAST_N_AT_INDEX);
                let cached = self
                    .cache
                    .get_json_and_data(&thread_key, &self.threads)
                    .await?;
                if i != 0 {
                    json.put_u8(b',');
                }
                json.extend_from_slice(&cached.json);
                threads.push(cached.data);
            }
            json.put_u8(b']');
            pages.push(BoardPage {
                number: pages.len() as u32,
                total: 0,
                json: json.freeze(),
                threads,
            });
        }

        if pages.is_empty() {
            pages.push(BoardPage::empty());
        }
        let total = pages.len() as u32;
        for page in &mut pages {
            page.total = total;
        }
        Ok(pages)
    }

    // Served only through the per-page views.
    fn render_html(
        &self,
        _content: &Vec<BoardPage>,
        _json: &[u8],
        _key: &CacheKey,
    ) -> Result<Bytes, ContentError> {
        Ok(Bytes::new())
    }

    fn size(&self, content: &Vec<BoardPage>, _json: &[u8], _html: &[u8]) -> usize {
        content.iter().map(|page| page.json.len() * 2).sum()
    }
}

/// A single board index page, sliced out of the cached [`BoardProvider`]
/// entry.
#[derive(Clone)]
pub struct BoardPageProvider {
    board: BoardProvider,
    cache: Arc<ContentCache>,
}

impl BoardPageProvider {
    pub fn new(board: BoardProvider, cache: Arc<ContentCache>) -> Self {
        Self { board, cache }
    }
}

#[async_trait]
impl ContentProvider for BoardPageProvider {
    type Content = BoardPage;

    async fn counter(&self, key: &CacheKey) -> Result<u64, ContentError> {
        let parent = self
            .cache
            .get_json_and_data(&key.with_all_pages(), &self.board)
            .await?;
        Ok(parent.counter)
    }

    async fn fresh(&self, key: &CacheKey) -> Result<BoardPage, ContentError> {
        let page = match key.page() {
            PageSelector::Page(page) => page,
            PageSelector::All => 0,
        };
        let parent = self
            .cache
            .get_json_and_data(&key.with_all_pages(), &self.board)
            .await?;
        parent
            .data
            .get(page as usize)
            .cloned()
            .ok_or(ContentError::PageOverflow {
                page,
                total: parent.data.len() as u32,
            })
    }

    fn encode_json(&self, content: &BoardPage) -> Result<Bytes, ContentError> {
        Ok(content.json.clone())
    }

    fn render_html(
        &self,
        content: &BoardPage,
        json: &[u8],
        key: &CacheKey,
    ) -> Result<Bytes, ContentError> {
        views::render_index(
            content.threads.iter().map(|thread| &**thread),
            json,
            key.lang(),
            key.is_all_boards(),
        )
        .map_err(ContentError::render)
    }

    // The JSON and threads are shared with the parent board entry.
    fn size(&self, _content: &BoardPage, _json: &[u8], html: &[u8]) -> usize {
        html.len()
    }
}
