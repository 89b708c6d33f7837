use crate::application::error::{ErrorReport, HttpError};
use crate::domain::posts::{Image, Post, Thread, file_extension};
use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    template.render().map(Html).map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
        .into()
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

pub fn render_not_found_response(lang: &str) -> Response {
    let labels = Labels::for_lang(lang);
    let mut response = render_template_response(
        NotFoundTemplate {
            lang: lang.to_string(),
            message: labels.not_found,
        },
        StatusCode::NOT_FOUND,
    );
    ErrorReport::from_message(
        "presentation::views::render_not_found_response",
        StatusCode::NOT_FOUND,
        "Resource not found",
    )
    .attach(&mut response);
    response
}

/// Interface strings of one language.
#[derive(Debug)]
pub struct Labels {
    pub index: &'static str,
    pub catalog: &'static str,
    pub omitted: &'static str,
    pub expand: &'static str,
    pub banned: &'static str,
    pub anonymous: &'static str,
    pub not_found: &'static str,
}

const EN: Labels = Labels {
    index: "Index",
    catalog: "Catalog",
    omitted: "replies omitted.",
    expand: "Expand",
    banned: "(USER WAS BANNED FOR THIS POST)",
    anonymous: "Anonymous",
    not_found: "Nothing here.",
};

const RU: Labels = Labels {
    index: "Главная",
    catalog: "Каталог",
    omitted: "ответов пропущено.",
    expand: "Развернуть",
    banned: "(ПОЛЬЗОВАТЕЛЬ ЗАБАНЕН ЗА ЭТОТ ПОСТ)",
    anonymous: "Аноним",
    not_found: "Здесь ничего нет.",
};

impl Labels {
    /// Falls back to English for languages without a pack.
    pub fn for_lang(lang: &str) -> &'static Labels {
        match lang {
            "ru" => &RU,
            _ => &EN,
        }
    }
}

#[derive(Clone, Default)]
pub struct ImageView {
    pub src: String,
    pub thumb: String,
    pub download: String,
    pub info: String,
    pub spoiler: bool,
    pub thumb_width: u16,
    pub thumb_height: u16,
}

impl ImageView {
    fn from_image(image: &Image) -> Self {
        let ext = image.extension();
        let thumb_ext = file_extension(image.thumb_type);
        let [width, height, thumb_width, thumb_height] = image.dims;
        let mut info = format_size(image.size);
        if width != 0 && height != 0 {
            info.push_str(&format!(", {width}x{height}"));
        }
        if image.length != 0 {
            info.push_str(&format!(", {}:{:02}", image.length / 60, image.length % 60));
        }
        Self {
            src: format!("/assets/images/src/{}.{ext}", image.sha1),
            thumb: format!("/assets/images/thumb/{}.{thumb_ext}", image.sha1),
            download: format!("{}.{ext}", image.name),
            info,
            spoiler: image.spoiler,
            thumb_width,
            thumb_height,
        }
    }
}

#[derive(Clone)]
pub struct PostView {
    pub id: u64,
    pub time: i64,
    pub name: String,
    pub trip: String,
    pub auth: String,
    pub body: String,
    pub banned: bool,
    pub deleted: bool,
    pub has_image: bool,
    pub image: ImageView,
}

impl PostView {
    fn from_post(post: &Post, labels: &Labels) -> Self {
        Self {
            id: post.id,
            time: post.time,
            name: post
                .name
                .clone()
                .unwrap_or_else(|| labels.anonymous.to_string()),
            trip: post.trip.clone().unwrap_or_default(),
            auth: post.auth.clone().unwrap_or_default(),
            body: post.body.clone(),
            banned: post.banned,
            deleted: post.deleted,
            has_image: post.image.is_some(),
            image: post
                .image
                .as_ref()
                .map(ImageView::from_image)
                .unwrap_or_default(),
        }
    }
}

/// A thread flattened for the templates: the opening post comes first.
#[derive(Clone)]
pub struct ThreadView {
    pub id: u64,
    pub board: String,
    pub subject: String,
    pub href: String,
    pub sticky: bool,
    pub post_ctr: u32,
    pub image_ctr: u32,
    pub omitted: u32,
    pub has_image: bool,
    pub image: ImageView,
    pub posts: Vec<PostView>,
}

impl ThreadView {
    fn from_thread(thread: &Thread, labels: &Labels, with_replies: bool) -> Self {
        let op = PostView::from_post(&thread.op, labels);
        let mut posts = vec![op.clone()];
        if with_replies {
            posts.extend(thread.posts.iter().map(|p| PostView::from_post(p, labels)));
        }
        Self {
            id: thread.id(),
            board: thread.board.clone(),
            subject: thread.subject.clone(),
            href: format!("/{}/{}", thread.board, thread.id()),
            sticky: thread.sticky,
            post_ctr: thread.post_ctr,
            image_ctr: thread.image_ctr,
            omitted: thread.omitted_posts(),
            has_image: op.has_image,
            image: op.image,
            posts,
        }
    }
}

#[derive(Template)]
#[template(path = "fragments/thread.html")]
struct ThreadFragment {
    thread: ThreadView,
    json: String,
    last_100: bool,
    labels: &'static Labels,
}

#[derive(Template)]
#[template(path = "fragments/catalog.html")]
struct CatalogFragment {
    threads: Vec<ThreadView>,
    json: String,
    show_board: bool,
}

#[derive(Template)]
#[template(path = "fragments/index.html")]
struct IndexFragment {
    threads: Vec<ThreadView>,
    json: String,
    show_board: bool,
    labels: &'static Labels,
}

#[derive(Template)]
#[template(path = "not_found.html")]
struct NotFoundTemplate {
    lang: String,
    message: &'static str,
}

/// Posts of a thread followed by the thread JSON for client-side hydration.
pub fn render_thread(
    thread: &Thread,
    json: &[u8],
    lang: &str,
    last_100: bool,
) -> Result<Bytes, AskamaError> {
    let labels = Labels::for_lang(lang);
    ThreadFragment {
        thread: ThreadView::from_thread(thread, labels, true),
        json: script_json(json),
        last_100,
        labels,
    }
    .render()
    .map(Bytes::from)
}

pub fn render_catalog(
    threads: &[Thread],
    json: &[u8],
    lang: &str,
    show_board: bool,
) -> Result<Bytes, AskamaError> {
    let labels = Labels::for_lang(lang);
    CatalogFragment {
        threads: threads
            .iter()
            .map(|t| ThreadView::from_thread(t, labels, false))
            .collect(),
        json: script_json(json),
        show_board,
    }
    .render()
    .map(Bytes::from)
}

/// One board index page of abbreviated threads.
pub fn render_index<'a>(
    threads: impl IntoIterator<Item = &'a Thread>,
    json: &[u8],
    lang: &str,
    show_board: bool,
) -> Result<Bytes, AskamaError> {
    let labels = Labels::for_lang(lang);
    IndexFragment {
        threads: threads
            .into_iter()
            .map(|t| ThreadView::from_thread(t, labels, true))
            .collect(),
        json: script_json(json),
        show_board,
        labels,
    }
    .render()
    .map(Bytes::from)
}

#[derive(Clone)]
pub struct PageLink {
    pub number: u32,
    pub href: String,
    pub current: bool,
}

/// Page chrome around a cached fragment.
pub struct PageView {
    pub lang: String,
    pub title: String,
    pub board: String,
    pub labels: &'static Labels,
    pub content: String,
    pub pages: Vec<PageLink>,
}

impl PageView {
    pub fn new(lang: &str, board: &str, title: impl Into<String>, fragment: &[u8]) -> Self {
        Self {
            lang: lang.to_string(),
            title: title.into(),
            board: board.to_string(),
            labels: Labels::for_lang(lang),
            content: String::from_utf8_lossy(fragment).into_owned(),
            pages: Vec::new(),
        }
    }

    /// Adds pagination links; a single page shows none.
    pub fn with_pages(mut self, current: u32, total: u32) -> Self {
        if total > 1 {
            self.pages = (0..total)
                .map(|number| PageLink {
                    number,
                    href: format!("/{}/?page={number}", self.board),
                    current: number == current,
                })
                .collect();
        }
        self
    }
}

#[derive(Template)]
#[template(path = "layout.html")]
pub struct LayoutTemplate {
    pub view: PageView,
}

/// JSON safe for embedding inside a `<script>` element.
pub fn script_json(json: &[u8]) -> String {
    String::from_utf8_lossy(json).replace('<', "\\u003c")
}

fn format_size(bytes: u64) -> String {
    match bytes {
        0..1024 => format!("{bytes} B"),
        1024..1_048_576 => format!("{} KB", bytes / 1024),
        _ => format!("{:.1} MB", bytes as f64 / 1_048_576.0),
    }
}
