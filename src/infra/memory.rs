//! In-memory board storage for development and tests.
//!
//! Every write bumps the counter of the thread it touches, of the thread's
//! board and the global counter, mirroring what the cache expects from a
//! real backing store.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::application::repos::{BoardRepo, RepoError};
use crate::cache::lock::{rw_read, rw_write};
use crate::domain::posts::{Board, Post, Thread, sort_for_index};

use super::error::InfraError;

const LOCK_TARGET: &str = "infra::memory";

/// Contents of a seed file: the boards to create and their threads.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub boards: Vec<String>,
    pub threads: Vec<Thread>,
}

struct StoredThread {
    thread: Thread,
    counter: u64,
}

#[derive(Default)]
struct State {
    boards: BTreeMap<String, u64>,
    threads: HashMap<u64, StoredThread>,
    global: u64,
    last_id: u64,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    // Bumps the thread, its board and the global counter.
    fn bump(&mut self, thread_id: u64) -> Result<(), RepoError> {
        let stored = self
            .threads
            .get_mut(&thread_id)
            .ok_or(RepoError::NotFound)?;
        stored.counter += 1;
        let board = self
            .boards
            .get_mut(&stored.thread.board)
            .ok_or(RepoError::NotFound)?;
        *board += 1;
        self.global += 1;
        Ok(())
    }

    fn stored(&self, id: u64) -> Result<&StoredThread, RepoError> {
        self.threads.get(&id).ok_or(RepoError::NotFound)
    }

    fn ensure_board(&self, board: &str) -> Result<(), RepoError> {
        if self.boards.contains_key(board) {
            Ok(())
        } else {
            Err(RepoError::NotFound)
        }
    }

    fn catalog<'a>(&self, threads: impl Iterator<Item = &'a StoredThread>) -> Board {
        let mut board: Board = threads
            .map(|stored| Thread {
                posts: Vec::new(),
                ..stored.thread.clone()
            })
            .collect();
        sort_for_index(&mut board);
        board
    }
}

/// [`BoardRepo`] kept entirely in process memory.
#[derive(Default)]
pub struct MemoryBoardRepo {
    state: RwLock<State>,
}

impl MemoryBoardRepo {
    pub fn new<I, S>(boards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let repo = Self::default();
        for board in boards {
            repo.add_board(board);
        }
        repo
    }

    /// Builds a repository from seed data. Seeded threads and boards start
    /// at counter 1.
    pub fn from_seed(seed: Seed) -> Result<Self, RepoError> {
        let repo = Self::new(seed.boards);
        {
            let mut state = rw_write(&repo.state, LOCK_TARGET, "from_seed");
            for mut thread in seed.threads {
                let board = state.boards.get_mut(&thread.board).ok_or_else(|| {
                    RepoError::Persistence(format!(
                        "thread {} references unknown board `{}`",
                        thread.id(),
                        thread.board
                    ))
                })?;
                *board = 1;

                thread.abbrev = false;
                thread.post_ctr = thread.posts.len() as u32 + 1;
                thread.image_ctr = std::iter::once(&thread.op)
                    .chain(&thread.posts)
                    .filter(|post| post.image.is_some())
                    .count() as u32;
                let max_id = thread
                    .posts
                    .iter()
                    .map(|post| post.id)
                    .chain(std::iter::once(thread.id()))
                    .max()
                    .unwrap_or_default();
                state.last_id = state.last_id.max(max_id);
                if state.threads.contains_key(&thread.id()) {
                    return Err(RepoError::Persistence(format!(
                        "thread {} is seeded twice",
                        thread.id()
                    )));
                }
                state
                    .threads
                    .insert(thread.id(), StoredThread { thread, counter: 1 });
            }
            if !state.threads.is_empty() {
                state.global = 1;
            }
        }
        Ok(repo)
    }

    /// Reads and applies a JSON seed file.
    pub async fn load_seed(path: &Path) -> Result<Self, InfraError> {
        let raw = tokio::fs::read(path).await?;
        let seed: Seed = serde_json::from_slice(&raw)
            .map_err(|err| InfraError::seed(path.display().to_string(), err.to_string()))?;
        let repo = Self::from_seed(seed)
            .map_err(|err| InfraError::seed(path.display().to_string(), err.to_string()))?;
        info!(
            target = "imageboard::infra::memory",
            path = %path.display(),
            threads = repo.thread_count(),
            "Loaded board seed"
        );
        Ok(repo)
    }

    /// Registers a board. Existing boards are left untouched.
    pub fn add_board(&self, board: impl Into<String>) {
        let mut state = rw_write(&self.state, LOCK_TARGET, "add_board");
        state.boards.entry(board.into()).or_insert(0);
    }

    pub fn boards(&self) -> Vec<String> {
        let state = rw_read(&self.state, LOCK_TARGET, "boards");
        state.boards.keys().cloned().collect()
    }

    pub fn thread_count(&self) -> usize {
        rw_read(&self.state, LOCK_TARGET, "thread_count").threads.len()
    }

    /// Opens a thread with `op` as its first post and returns the new id.
    pub fn create_thread(
        &self,
        board: &str,
        subject: impl Into<String>,
        mut op: Post,
    ) -> Result<u64, RepoError> {
        let mut state = rw_write(&self.state, LOCK_TARGET, "create_thread");
        state.ensure_board(board)?;
        let id = state.next_id();
        op.id = id;
        let thread = Thread {
            post_ctr: 1,
            image_ctr: u32::from(op.image.is_some()),
            reply_time: op.time,
            bump_time: op.time,
            subject: subject.into(),
            board: board.to_string(),
            op,
            ..Thread::default()
        };
        state
            .threads
            .insert(id, StoredThread { thread, counter: 0 });
        state.bump(id)?;
        Ok(id)
    }

    /// Appends a reply and returns its id. Saged replies do not bump.
    pub fn append_post(&self, thread_id: u64, mut post: Post) -> Result<u64, RepoError> {
        let mut state = rw_write(&self.state, LOCK_TARGET, "append_post");
        state.stored(thread_id)?;
        let id = state.next_id();
        post.id = id;
        if let Some(stored) = state.threads.get_mut(&thread_id) {
            let thread = &mut stored.thread;
            thread.post_ctr += 1;
            thread.image_ctr += u32::from(post.image.is_some());
            thread.reply_time = post.time;
            if !post.sage {
                thread.bump_time = post.time;
            }
            thread.posts.push(post);
        }
        state.bump(thread_id)?;
        Ok(id)
    }

    pub fn set_sticky(&self, thread_id: u64, sticky: bool) -> Result<(), RepoError> {
        let mut state = rw_write(&self.state, LOCK_TARGET, "set_sticky");
        match state.threads.get_mut(&thread_id) {
            Some(stored) => stored.thread.sticky = sticky,
            None => return Err(RepoError::NotFound),
        }
        state.bump(thread_id)
    }
}

#[async_trait]
impl BoardRepo for MemoryBoardRepo {
    async fn thread_counter(&self, id: u64) -> Result<u64, RepoError> {
        let state = rw_read(&self.state, LOCK_TARGET, "thread_counter");
        Ok(state.stored(id)?.counter)
    }

    async fn board_counter(&self, board: &str) -> Result<u64, RepoError> {
        let state = rw_read(&self.state, LOCK_TARGET, "board_counter");
        state.boards.get(board).copied().ok_or(RepoError::NotFound)
    }

    async fn all_board_counter(&self) -> Result<u64, RepoError> {
        Ok(rw_read(&self.state, LOCK_TARGET, "all_board_counter").global)
    }

    async fn thread(&self, id: u64, last_n: u32) -> Result<Thread, RepoError> {
        let state = rw_read(&self.state, LOCK_TARGET, "thread");
        Ok(state.stored(id)?.thread.with_last(last_n))
    }

    async fn board_catalog(&self, board: &str) -> Result<Board, RepoError> {
        let state = rw_read(&self.state, LOCK_TARGET, "board_catalog");
        state.ensure_board(board)?;
        Ok(state.catalog(
            state
                .threads
                .values()
                .filter(|stored| stored.thread.board == board),
        ))
    }

    async fn all_board_catalog(&self) -> Result<Board, RepoError> {
        let state = rw_read(&self.state, LOCK_TARGET, "all_board_catalog");
        Ok(state.catalog(state.threads.values()))
    }

    async fn thread_ids(&self, board: &str) -> Result<Vec<u64>, RepoError> {
        Ok(self
            .board_catalog(board)
            .await?
            .iter()
            .map(Thread::id)
            .collect())
    }

    async fn all_thread_ids(&self) -> Result<Vec<u64>, RepoError> {
        Ok(self
            .all_board_catalog()
            .await?
            .iter()
            .map(Thread::id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn post(time: i64, body: &str) -> Post {
        Post {
            time,
            body: body.to_string(),
            ..Post::default()
        }
    }

    #[tokio::test]
    async fn writes_bump_thread_board_and_global_counters() {
        let repo = MemoryBoardRepo::new(["a", "b"]);
        assert_eq!(repo.board_counter("a").await.unwrap(), 0);

        let id = repo.create_thread("a", "first", post(10, "op")).unwrap();
        assert_eq!(repo.thread_counter(id).await.unwrap(), 1);
        assert_eq!(repo.board_counter("a").await.unwrap(), 1);
        assert_eq!(repo.board_counter("b").await.unwrap(), 0);
        assert_eq!(repo.all_board_counter().await.unwrap(), 1);

        repo.append_post(id, post(20, "reply")).unwrap();
        repo.set_sticky(id, true).unwrap();
        assert_eq!(repo.thread_counter(id).await.unwrap(), 3);
        assert_eq!(repo.board_counter("a").await.unwrap(), 3);
        assert_eq!(repo.all_board_counter().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn unknown_targets_are_not_found() {
        let repo = MemoryBoardRepo::new(["a"]);
        assert!(matches!(
            repo.create_thread("zz", "x", post(1, "op")),
            Err(RepoError::NotFound)
        ));
        assert!(matches!(
            repo.thread_counter(404).await,
            Err(RepoError::NotFound)
        ));
        assert!(matches!(
            repo.board_catalog("zz").await,
            Err(RepoError::NotFound)
        ));
        assert!(matches!(
            repo.append_post(404, post(1, "x")),
            Err(RepoError::NotFound)
        ));
    }

    #[tokio::test]
    async fn sage_replies_do_not_bump_the_index_order() {
        let repo = MemoryBoardRepo::new(["a"]);
        let older = repo.create_thread("a", "older", post(10, "op")).unwrap();
        let newer = repo.create_thread("a", "newer", post(20, "op")).unwrap();
        assert_eq!(repo.thread_ids("a").await.unwrap(), vec![newer, older]);

        let mut sage = post(30, "sage");
        sage.sage = true;
        repo.append_post(older, sage).unwrap();
        assert_eq!(repo.thread_ids("a").await.unwrap(), vec![newer, older]);

        repo.append_post(older, post(40, "bump")).unwrap();
        assert_eq!(repo.thread_ids("a").await.unwrap(), vec![older, newer]);

        repo.set_sticky(newer, true).unwrap();
        assert_eq!(repo.all_thread_ids().await.unwrap(), vec![newer, older]);
    }

    #[tokio::test]
    async fn thread_reads_truncate_and_catalogs_drop_replies() {
        let repo = MemoryBoardRepo::new(["a"]);
        let id = repo.create_thread("a", "t", post(1, "op")).unwrap();
        for n in 0..5 {
            repo.append_post(id, post(2 + n, "reply")).unwrap();
        }

        let tail = repo.thread(id, 3).await.unwrap();
        assert!(tail.abbrev);
        assert_eq!(tail.posts.len(), 3);
        assert_eq!(tail.post_ctr, 6);

        let full = repo.thread(id, 0).await.unwrap();
        assert!(!full.abbrev);
        assert_eq!(full.posts.len(), 5);

        let catalog = repo.board_catalog("a").await.unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog[0].posts.is_empty());
    }

    #[tokio::test]
    async fn seed_file_populates_boards_and_counters() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "boards": ["a", "g"],
                "threads": [
                    {{ "id": 5, "board": "g", "subject": "seeded", "body": "op",
                       "posts": [{{ "id": 9, "body": "reply" }}] }}
                ]
            }}"#
        )
        .unwrap();

        let repo = MemoryBoardRepo::load_seed(file.path()).await.unwrap();
        assert_eq!(repo.boards(), vec!["a".to_string(), "g".to_string()]);
        assert_eq!(repo.thread_counter(5).await.unwrap(), 1);
        assert_eq!(repo.board_counter("g").await.unwrap(), 1);
        assert_eq!(repo.board_counter("a").await.unwrap(), 0);
        assert_eq!(repo.thread(5, 0).await.unwrap().post_ctr, 2);

        let next = repo.create_thread("a", "fresh", post(1, "op")).unwrap();
        assert_eq!(next, 10);
    }

    #[tokio::test]
    async fn seed_with_unknown_board_is_rejected() {
        let seed = Seed {
            boards: vec!["a".to_string()],
            threads: vec![Thread {
                board: "nope".to_string(),
                op: post(1, "op"),
                ..Thread::default()
            }],
        };
        assert!(matches!(
            MemoryBoardRepo::from_seed(seed),
            Err(RepoError::Persistence(_))
        ));
    }
}
