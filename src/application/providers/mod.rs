//! Content providers for every cacheable artifact.
//!
//! Board pages are assembled from individually cached threads, so the
//! board providers hold a handle to the [`ContentCache`] they feed.

mod board;
mod catalog;
mod thread;

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use crate::application::repos::BoardRepo;
use crate::cache::{ContentCache, ContentError};

pub use board::{BoardPage, BoardPageProvider, BoardProvider};
pub use catalog::CatalogProvider;
pub use thread::ThreadProvider;

/// Threads shown on one board index page.
pub const THREADS_PER_PAGE: usize = 20;
/// Replies shown under each thread on a board index page.
pub const LAST_N_AT_INDEX: u32 = 3;
/// Replies shown by a thread view asking for `?last=100`.
pub const LAST_N_ON_REQUEST: u32 = 100;

/// Every provider wired to the same repository and cache.
#[derive(Clone)]
pub struct Providers {
    pub thread: ThreadProvider,
    pub catalog: CatalogProvider,
    pub board: BoardProvider,
    pub board_page: BoardPageProvider,
}

impl Providers {
    pub fn new(repo: Arc<dyn BoardRepo>, cache: Arc<ContentCache>) -> Self {
        let thread = ThreadProvider::new(Arc::clone(&repo));
        let board = BoardProvider::new(Arc::clone(&repo), thread.clone(), Arc::clone(&cache));
        Self {
            catalog: CatalogProvider::new(repo),
            board_page: BoardPageProvider::new(board.clone(), cache),
            thread,
            board,
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Bytes, ContentError> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}
