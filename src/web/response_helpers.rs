// HTTP response helper functions shared by the route handlers

use hyper::body::Bytes;
use hyper::http::response::Builder;
use hyper::{Body, Response, StatusCode};
use serde::Serialize;

use super::cache::CachedResponse;
use super::error::ApiError;
use crate::sys_error;

/// Standard CORS headers
const CORS_ORIGIN: &str = "*";
const CORS_METHODS: &str = "GET, POST, OPTIONS";
const CORS_HEADERS: &str = "content-type";

fn with_cors(builder: Builder) -> Builder {
    builder
        .header("access-control-allow-origin", CORS_ORIGIN)
        .header("access-control-allow-methods", CORS_METHODS)
        .header("access-control-allow-headers", CORS_HEADERS)
}

/// Finish a builder, falling back to a bare 500 if a header was invalid.
fn finish(builder: Builder, body: Body) -> Response<Body> {
    builder.body(body).unwrap_or_else(|e| {
        sys_error!("[HTTP] Failed to build response: {e}");
        let mut fallback = Response::new(Body::empty());
        *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        fallback
    })
}

/// Build a response with an explicit content type and CORS headers
pub fn bytes_response(status: StatusCode, content_type: &str, body: impl Into<Body>) -> Response<Body> {
    finish(
        with_cors(Response::builder().status(status).header("content-type", content_type)),
        body.into(),
    )
}

/// Build a JSON response with CORS headers
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    match serde_json::to_vec(body) {
        Ok(json) => bytes_response(status, "application/json", json),
        Err(e) => {
            sys_error!("[HTTP] Serialization failed: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Serialization failed")
        }
    }
}

/// Build a JSON error response: `{"error": message}`
pub fn json_error(status: StatusCode, message: &str) -> Response<Body> {
    let json = serde_json::json!({ "error": message }).to_string();
    bytes_response(status, "application/json", json)
}

/// Map a handler error onto its status and a JSON error body
pub fn api_error(error: &ApiError) -> Response<Body> {
    let status = error.status();
    if status.is_server_error() {
        sys_error!("[HTTP] {status}: {error}");
    }
    json_error(status, &error.to_string())
}

/// Replay a response stored in the cache
pub fn cached_response(cached: &CachedResponse) -> Response<Body> {
    bytes_response(cached.status, &cached.content_type, cached.body.clone())
}

/// Build an empty response with CORS headers
pub fn empty_response(status: StatusCode) -> Response<Body> {
    finish(with_cors(Response::builder().status(status)), Body::empty())
}

/// CORS preflight response
pub fn cors_preflight() -> Response<Body> {
    empty_response(StatusCode::OK)
}

/// Content type for an image file, from its extension
pub fn content_type_for(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Response body plus the metadata needed to cache it
pub struct Rendered {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Bytes,
}

impl Rendered {
    pub fn json<T: Serialize>(body: &T) -> Result<Self, ApiError> {
        let json = serde_json::to_vec(body)
            .map_err(|e| ApiError::BadGateway(format!("cannot encode response: {e}")))?;
        Ok(Self {
            status: StatusCode::OK,
            content_type: "application/json",
            body: Bytes::from(json),
        })
    }

    pub fn to_cached(&self) -> CachedResponse {
        CachedResponse {
            status: self.status,
            content_type: self.content_type.to_string(),
            body: self.body.clone(),
        }
    }

    pub fn into_response(self) -> Response<Body> {
        bytes_response(self.status, self.content_type, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::error::WorkerError;
    use std::path::Path;

    #[test]
    fn test_json_error() {
        let response = json_error(StatusCode::BAD_REQUEST, "Test error");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn test_json_error_escapes_quotes() {
        let response = json_error(StatusCode::BAD_REQUEST, r#"Error "quoted""#);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], r#"Error "quoted""#);
    }

    #[test]
    fn test_api_error_status() {
        let response = api_error(&ApiError::Worker(WorkerError::Unavailable));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for(Path::new("a/explanation_lime_x.png")), "image/png");
        assert_eq!(content_type_for(Path::new("x.JPEG")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("x")), "application/octet-stream");
    }

    #[test]
    fn test_preflight_has_cors_headers() {
        let response = cors_preflight();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("access-control-allow-methods"));
    }
}
