//! Repository traits describing the board storage adapter.

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::ContentError;
use crate::domain::posts::{Board, Thread};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<RepoError> for ContentError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => ContentError::NotFound,
            other => ContentError::backend(other),
        }
    }
}

/// Read side of the board storage the content providers are built on.
///
/// Counters increase on every write to their target and are cheap to read;
/// they are what the cache compares to decide whether to regenerate.
#[async_trait]
pub trait BoardRepo: Send + Sync {
    async fn thread_counter(&self, id: u64) -> Result<u64, RepoError>;

    async fn board_counter(&self, board: &str) -> Result<u64, RepoError>;

    /// Counter bumped by a write to any board.
    async fn all_board_counter(&self) -> Result<u64, RepoError>;

    /// Thread with its last `last_n` replies, or all replies for `0`.
    async fn thread(&self, id: u64, last_n: u32) -> Result<Thread, RepoError>;

    /// Threads of one board without replies.
    async fn board_catalog(&self, board: &str) -> Result<Board, RepoError>;

    async fn all_board_catalog(&self) -> Result<Board, RepoError>;

    /// Thread ids of one board in index order.
    async fn thread_ids(&self, board: &str) -> Result<Vec<u64>, RepoError>;

    async fn all_thread_ids(&self) -> Result<Vec<u64>, RepoError>;
}
