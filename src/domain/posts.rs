//! Posts, threads and boards as exposed through the JSON API.

use serde::{Deserialize, Serialize};

/// Uploaded file attached to a post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Image {
    #[serde(skip_serializing_if = "is_false")]
    pub spoiler: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub apng: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub audio: bool,
    /// Only meaningful for containers that may or may not carry video.
    #[serde(skip_serializing_if = "is_false")]
    pub video: bool,
    pub file_type: u8,
    pub thumb_type: u8,
    #[serde(skip_serializing_if = "is_zero")]
    pub length: u32,
    pub dims: [u16; 4],
    pub size: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub artist: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    pub name: String,
    pub md5: String,
    pub sha1: String,
}

impl Image {
    /// Canonical file extension of the upload.
    pub fn extension(&self) -> &'static str {
        file_extension(self.file_type)
    }
}

/// Extension of a stored file type.
pub fn file_extension(file_type: u8) -> &'static str {
    match file_type {
        0 => "jpg",
        1 => "png",
        2 => "gif",
        3 => "webm",
        4 => "pdf",
        5 => "svg",
        6 => "mp4",
        7 => "mp3",
        8 => "ogg",
        9 => "zip",
        10 => "7z",
        11 => "tar.gz",
        12 => "tar.xz",
        _ => "bin",
    }
}

/// A single post, either the opening post of a thread or a reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Post {
    #[serde(skip_serializing_if = "is_false")]
    pub editing: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub banned: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(skip_serializing)]
    pub sage: bool,
    pub id: u64,
    pub time: i64,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    /// `[target post, target thread]` pairs referenced from the body.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<[u64; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
}

/// Thread metadata, its opening post and (some of) its replies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Thread {
    /// Set when `posts` holds only the tail of the thread.
    #[serde(skip_serializing_if = "is_false")]
    pub abbrev: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub sticky: bool,
    pub post_ctr: u32,
    pub image_ctr: u32,
    pub reply_time: i64,
    pub bump_time: i64,
    pub subject: String,
    pub board: String,
    #[serde(flatten)]
    pub op: Post,
    pub posts: Vec<Post>,
}

impl Thread {
    pub fn id(&self) -> u64 {
        self.op.id
    }

    /// Copy of the thread keeping only the last `last_n` replies.
    /// `0` keeps every reply.
    pub fn with_last(&self, last_n: u32) -> Thread {
        let mut thread = self.clone();
        if last_n == 0 {
            thread.abbrev = false;
            return thread;
        }
        let keep = last_n as usize;
        if thread.posts.len() > keep {
            thread.posts.drain(..thread.posts.len() - keep);
        }
        thread.abbrev = true;
        thread
    }

    /// Number of replies omitted from an abbreviated view.
    pub fn omitted_posts(&self) -> u32 {
        // post_ctr counts the opening post as well.
        self.post_ctr
            .saturating_sub(1)
            .saturating_sub(self.posts.len() as u32)
    }
}

/// Threads of a board, as listed by the catalog.
pub type Board = Vec<Thread>;

/// Index order: stickies first, then most recently bumped.
pub fn sort_for_index(threads: &mut [Thread]) {
    threads.sort_by(|a, b| {
        b.sticky
            .cmp(&a.sticky)
            .then_with(|| b.bump_time.cmp(&a.bump_time))
            .then_with(|| b.id().cmp(&a.id()))
    });
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}
