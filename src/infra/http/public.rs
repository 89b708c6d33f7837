use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH, VARY},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use axum_extra::extract::CookieJar;
use bytes::Bytes;
use serde::Deserialize;

use crate::{
    application::{
        providers::{LAST_N_ON_REQUEST, Providers},
        repos::BoardRepo,
    },
    cache::{ALL_BOARDS, CacheKey, ContentCache, ContentError},
    presentation::views::{
        Labels, LayoutTemplate, PageView, render_not_found_response, render_template,
    },
};

use super::{
    content_error_to_http,
    middleware::{log_responses, set_request_context},
};

const LANG_COOKIE: &str = "lang";
const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Clone)]
pub struct HttpState {
    pub cache: Arc<ContentCache>,
    pub providers: Providers,
    pub default_lang: Arc<str>,
}

impl HttpState {
    pub fn new(
        repo: Arc<dyn BoardRepo>,
        cache: Arc<ContentCache>,
        default_lang: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            providers: Providers::new(repo, Arc::clone(&cache)),
            cache,
            default_lang: default_lang.into(),
        }
    }

    /// Interface language from the `lang` cookie, else the site default.
    fn lang(&self, jar: &CookieJar) -> String {
        jar.get(LANG_COOKIE)
            .map(|cookie| cookie.value())
            .filter(|lang| is_lang_code(lang))
            .unwrap_or(self.default_lang.as_ref())
            .to_string()
    }
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/_health", get(health))
        .route("/json/{board}/", get(board_json))
        .route("/json/{board}/catalog", get(catalog_json))
        .route("/json/{board}/{thread}", get(thread_json))
        .route("/{board}/", get(board_html))
        .route("/{board}/catalog", get(catalog_html))
        .route("/{board}/{thread}", get(thread_html))
        .fallback(fallback)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PageQuery {
    page: Option<String>,
}

impl PageQuery {
    // Unparsable page numbers fall back to the first page.
    fn page(&self) -> u32 {
        self.page
            .as_deref()
            .and_then(|page| page.parse().ok())
            .unwrap_or(0)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ThreadQuery {
    last: Option<String>,
}

impl ThreadQuery {
    fn last_n(&self) -> u32 {
        match self.last.as_deref().map(str::parse::<u32>) {
            Some(Ok(LAST_N_ON_REQUEST)) => LAST_N_ON_REQUEST,
            _ => 0,
        }
    }
}

async fn health() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

async fn fallback(State(state): State<HttpState>, jar: CookieJar) -> Response {
    render_not_found_response(&state.lang(&jar))
}

async fn board_json(
    State(state): State<HttpState>,
    jar: CookieJar,
    headers: HeaderMap,
    Path(board): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response {
    let key = CacheKey::board(state.lang(&jar), board, query.page(), false);
    match state
        .cache
        .get_json_and_data(&key, &state.providers.board_page)
        .await
    {
        Ok(page) => cached_response(&headers, page.counter, page.json, JSON_CONTENT_TYPE),
        Err(err) => content_error_to_http("infra::http::board_json", err).into_response(),
    }
}

async fn catalog_json(
    State(state): State<HttpState>,
    jar: CookieJar,
    headers: HeaderMap,
    Path(board): Path<String>,
) -> Response {
    let key = CacheKey::board(state.lang(&jar), board, 0, true);
    match state
        .cache
        .get_json_and_data(&key, &state.providers.catalog)
        .await
    {
        Ok(catalog) => {
            cached_response(&headers, catalog.counter, catalog.json, JSON_CONTENT_TYPE)
        }
        Err(err) => content_error_to_http("infra::http::catalog_json", err).into_response(),
    }
}

async fn thread_json(
    State(state): State<HttpState>,
    jar: CookieJar,
    headers: HeaderMap,
    Path((board, thread)): Path<(String, String)>,
    Query(query): Query<ThreadQuery>,
) -> Response {
    let Some(id) = parse_thread_id(&thread) else {
        return content_error_to_http("infra::http::thread_json", ContentError::NotFound)
            .into_response();
    };

    let key = CacheKey::thread(state.lang(&jar), id, query.last_n());
    let result = state
        .cache
        .get_json_and_data(&key, &state.providers.thread)
        .await
        .and_then(|cached| {
            if on_board(&cached.data.board, &board) {
                Ok(cached)
            } else {
                Err(ContentError::NotFound)
            }
        });

    match result {
        Ok(cached) => cached_response(&headers, cached.counter, cached.json, JSON_CONTENT_TYPE),
        Err(err) => content_error_to_http("infra::http::thread_json", err).into_response(),
    }
}

async fn board_html(
    State(state): State<HttpState>,
    jar: CookieJar,
    headers: HeaderMap,
    Path(board): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response {
    let lang = state.lang(&jar);
    let key = CacheKey::board(lang.as_str(), board.as_str(), query.page(), false);
    match state
        .cache
        .get_html(&key, &state.providers.board_page)
        .await
    {
        Ok(cached) => {
            if etag_matches(&headers, cached.counter) {
                return not_modified(cached.counter);
            }
            let view = PageView::new(&lang, &board, format!("/{board}/"), &cached.html)
                .with_pages(cached.data.number, cached.data.total);
            page_response(cached.counter, view)
        }
        Err(err) => html_error("infra::http::board_html", &lang, err),
    }
}

async fn catalog_html(
    State(state): State<HttpState>,
    jar: CookieJar,
    headers: HeaderMap,
    Path(board): Path<String>,
) -> Response {
    let lang = state.lang(&jar);
    let key = CacheKey::board(lang.as_str(), board.as_str(), 0, true);
    match state.cache.get_html(&key, &state.providers.catalog).await {
        Ok(cached) => {
            if etag_matches(&headers, cached.counter) {
                return not_modified(cached.counter);
            }
            let title = format!("/{board}/ {}", Labels::for_lang(&lang).catalog);
            page_response(
                cached.counter,
                PageView::new(&lang, &board, title, &cached.html),
            )
        }
        Err(err) => html_error("infra::http::catalog_html", &lang, err),
    }
}

async fn thread_html(
    State(state): State<HttpState>,
    jar: CookieJar,
    headers: HeaderMap,
    Path((board, thread)): Path<(String, String)>,
    Query(query): Query<ThreadQuery>,
) -> Response {
    let lang = state.lang(&jar);
    let Some(id) = parse_thread_id(&thread) else {
        return render_not_found_response(&lang);
    };

    let key = CacheKey::thread(lang.as_str(), id, query.last_n());
    match state.cache.get_html(&key, &state.providers.thread).await {
        Ok(cached) if on_board(&cached.data.board, &board) => {
            if etag_matches(&headers, cached.counter) {
                return not_modified(cached.counter);
            }
            let title = format!("/{board}/ - {}", cached.data.subject);
            page_response(
                cached.counter,
                PageView::new(&lang, &board, title, &cached.html),
            )
        }
        Ok(_) => render_not_found_response(&lang),
        Err(err) => html_error("infra::http::thread_html", &lang, err),
    }
}

fn html_error(source: &'static str, lang: &str, err: ContentError) -> Response {
    if err.is_not_found() {
        let mut response = render_not_found_response(lang);
        // Keep the specific cause for the response log.
        content_error_to_http(source, err)
            .into_report()
            .attach(&mut response);
        response
    } else {
        content_error_to_http(source, err).into_response()
    }
}

fn page_response(counter: u64, view: PageView) -> Response {
    match render_template(LayoutTemplate { view }) {
        Ok(html) => {
            let mut response = html.into_response();
            set_cache_headers(&mut response, counter);
            response
                .headers_mut()
                .insert(VARY, HeaderValue::from_static("Cookie"));
            response
        }
        Err(err) => err.into_response(),
    }
}

fn cached_response(
    headers: &HeaderMap,
    counter: u64,
    body: Bytes,
    content_type: &'static str,
) -> Response {
    if etag_matches(headers, counter) {
        return not_modified(counter);
    }
    let mut response = body.into_response();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    set_cache_headers(&mut response, counter);
    response
}

fn not_modified(counter: u64) -> Response {
    let mut response = StatusCode::NOT_MODIFIED.into_response();
    set_cache_headers(&mut response, counter);
    response
}

fn set_cache_headers(response: &mut Response, counter: u64) {
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    if let Ok(value) = HeaderValue::from_str(&etag(counter)) {
        headers.insert(ETAG, value);
    }
}

pub(crate) fn etag(counter: u64) -> String {
    format!("W/\"{counter}\"")
}

/// True when any validator of `If-None-Match` names the current counter.
pub(crate) fn etag_matches(headers: &HeaderMap, counter: u64) -> bool {
    let current = etag(counter);
    headers
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate == current)
}

fn parse_thread_id(raw: &str) -> Option<u64> {
    raw.parse().ok().filter(|id| *id != 0)
}

fn on_board(thread_board: &str, requested: &str) -> bool {
    requested == ALL_BOARDS || thread_board == requested
}

fn is_lang_code(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 8
        && value.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
