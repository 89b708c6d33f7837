mod middleware;
mod public;

pub use public::{HttpState, build_router};

use crate::application::error::{AppError, HttpError};
use crate::cache::ContentError;

/// Map a content error to a consistent HTTP error response.
pub fn content_error_to_http(source: &'static str, err: ContentError) -> HttpError {
    AppError::from(err).into_http(source)
}
