//! Cache key definitions.
//!
//! A [`CacheKey`] names one cacheable artifact. Keys are only built through
//! the [`CacheKey::thread`] and [`CacheKey::board`] factories so that two
//! requests for the same view always land in the same slot.

use std::fmt;

/// Name of the meta-board aggregating every board.
pub const ALL_BOARDS: &str = "all";

/// Pagination selector of a board view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageSelector {
    /// Every page of the board; backs the per-page views.
    All,
    /// A single zero-based board index page.
    Page(u32),
}

/// Identity of a cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    lang: String,
    board: String,
    id: u64,
    last_n: u32,
    page: PageSelector,
    catalog: bool,
}

impl CacheKey {
    /// Key of a thread view, optionally truncated to the last `last_n` replies.
    pub fn thread(lang: impl Into<String>, id: u64, last_n: u32) -> Self {
        Self {
            lang: lang.into(),
            board: String::new(),
            id,
            last_n,
            page: PageSelector::All,
            catalog: false,
        }
    }

    /// Key of a board view: either the catalog or one index page.
    ///
    /// Catalogs are not paginated, so `page` is ignored for them.
    pub fn board(lang: impl Into<String>, board: impl Into<String>, page: u32, catalog: bool) -> Self {
        let page = if catalog {
            PageSelector::All
        } else {
            PageSelector::Page(page)
        };
        Self {
            lang: lang.into(),
            board: board.into(),
            id: 0,
            last_n: 0,
            page,
            catalog,
        }
    }

    /// The same board view covering every page.
    pub fn with_all_pages(&self) -> Self {
        Self {
            page: PageSelector::All,
            ..self.clone()
        }
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }

    pub fn board_name(&self) -> &str {
        &self.board
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn last_n(&self) -> u32 {
        self.last_n
    }

    pub fn page(&self) -> PageSelector {
        self.page
    }

    pub fn is_catalog(&self) -> bool {
        self.catalog
    }

    /// True for views of the `/all/` meta-board.
    pub fn is_all_boards(&self) -> bool {
        self.board == ALL_BOARDS
    }

    /// Short label of the artifact kind, used for logs and metric labels.
    pub fn artifact(&self) -> &'static str {
        match (self.board.is_empty(), self.catalog, self.page) {
            (true, _, _) => "thread",
            (false, true, _) => "catalog",
            (false, false, PageSelector::All) => "board",
            (false, false, PageSelector::Page(_)) => "board_page",
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.artifact() {
            "thread" => write!(f, "{}:thread/{}?last={}", self.lang, self.id, self.last_n),
            "catalog" => write!(f, "{}:/{}/catalog", self.lang, self.board),
            _ => match self.page {
                PageSelector::All => write!(f, "{}:/{}/?page=*", self.lang, self.board),
                PageSelector::Page(page) => write!(f, "{}:/{}/?page={page}", self.lang, self.board),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn equal_fields_share_a_slot() {
        let mut slots = HashSet::new();
        slots.insert(CacheKey::thread("en", 1, 0));
        slots.insert(CacheKey::thread("en", 1, 0));
        slots.insert(CacheKey::thread("en", 1, 100));
        slots.insert(CacheKey::thread("pl", 1, 0));
        assert_eq!(slots.len(), 3);
    }

    #[test]
    fn catalog_keys_ignore_page() {
        assert_eq!(
            CacheKey::board("en", "a", 0, true),
            CacheKey::board("en", "a", 7, true)
        );
        assert_ne!(
            CacheKey::board("en", "a", 0, false),
            CacheKey::board("en", "a", 1, false)
        );
    }

    #[test]
    fn all_pages_key_is_distinct_from_each_page() {
        let page = CacheKey::board("en", "a", 2, false);
        let all = page.with_all_pages();
        assert_eq!(all.page(), PageSelector::All);
        assert_ne!(all, page);
        assert_eq!(all, CacheKey::board("en", "a", 0, false).with_all_pages());
    }

    #[test]
    fn artifact_labels() {
        assert_eq!(CacheKey::thread("en", 9, 3).artifact(), "thread");
        assert_eq!(CacheKey::board("en", "a", 0, true).artifact(), "catalog");
        assert_eq!(CacheKey::board("en", "a", 1, false).artifact(), "board_page");
        assert_eq!(
            CacheKey::board("en", "a", 1, false).with_all_pages().artifact(),
            "board"
        );
        assert!(CacheKey::board("en", ALL_BOARDS, 0, true).is_all_boards());
    }
}
