// Request parsing utilities for HTTP handlers

use hyper::body::Bytes;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Body, HeaderMap};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::error::ApiError;
use crate::{sys_debug, sys_error};

/// Image types accepted for uploads.
const IMAGE_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/jpg"];

/// Read the whole body, refusing anything larger than `limit` bytes.
pub async fn read_body(headers: &HeaderMap, body: Body, limit: usize) -> Result<Bytes, ApiError> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(ApiError::PayloadTooLarge { limit });
    }

    let bytes = hyper::body::to_bytes(body).await.map_err(|e| {
        sys_error!("[REQUEST] Failed to read request body: {e}");
        ApiError::BadRequest("Failed to read request body".to_string())
    })?;
    if bytes.len() > limit {
        return Err(ApiError::PayloadTooLarge { limit });
    }
    Ok(bytes)
}

/// Parse a JSON body into a typed structure.
pub fn parse_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
    if let Ok(body_str) = std::str::from_utf8(bytes) {
        if !body_str.is_empty() {
            sys_debug!("[REQUEST] Body: {body_str}");
        }
    }
    serde_json::from_slice(bytes).map_err(|e| {
        sys_error!("[REQUEST] JSON parsing error: {e}");
        ApiError::BadRequest("Invalid JSON format".to_string())
    })
}

/// Require an image content type (`image/png`, `image/jpeg` or `image/jpg`).
pub fn require_image(headers: &HeaderMap) -> Result<(), ApiError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    // Ignore parameters such as `; charset=...`.
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    if IMAGE_TYPES.contains(&essence.as_str()) {
        Ok(())
    } else {
        Err(ApiError::UnsupportedMediaType(content_type.to_string()))
    }
}

/// Split a request path into its non-empty segments.
/// Example: "/v1/training/queue/abc/image" => ["v1", "training", "queue", "abc", "image"]
pub fn path_segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Parse a path segment as a resource id. Ids are always minted as UUIDs,
/// so anything else names a resource that cannot exist.
pub fn parse_id(segment: &str) -> Result<Uuid, ApiError> {
    let decoded = urlencoding::decode(segment)
        .map_err(|_| ApiError::NotFound(format!("unknown id: {segment}")))?;
    Uuid::parse_str(&decoded).map_err(|_| ApiError::NotFound(format!("unknown id: {decoded}")))
}
