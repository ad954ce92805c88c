// Route handler modules

pub mod classifier;
pub mod explainer;
pub mod health;
pub mod training;

use std::future::Future;

use hyper::{Body, Response};

use super::cache::CacheClass;
use super::error::ApiError;
use super::response_helpers::{cached_response, Rendered};
use super::server::AppState;

/// Serve `key` from the cache, or render it and store successful results.
pub(crate) async fn through_cache<F, Fut>(
    state: &AppState,
    key: &str,
    class: CacheClass,
    render: F,
) -> Result<Response<Body>, ApiError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Rendered, ApiError>>,
{
    if let Some(hit) = state.cache.get(key) {
        return Ok(cached_response(&hit));
    }
    let rendered = render().await?;
    if rendered.status.is_success() {
        state
            .cache
            .put(key, rendered.to_cached(), state.cache.ttl_for(class));
    }
    Ok(rendered.into_response())
}
