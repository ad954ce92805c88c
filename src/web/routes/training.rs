// Training queue route handlers

use hyper::{Body, Request, Response, StatusCode};
use serde::Deserialize;
use uuid::Uuid;

use crate::web::error::ApiError;
use crate::web::request_parsing::{parse_id, parse_json, read_body, require_image};
use crate::web::response_helpers::{bytes_response, json_response};
use crate::web::server::AppState;
use crate::web::training_queue::TrainingQueueItem;
use crate::sys_info;

/// Largest accepted `{class}` body.
const MAX_ITEM_BODY: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct NewItemRequest {
    class: String,
}

/// GET /v1/training/queue
pub async fn handle_list(state: &AppState) -> Result<Response<Body>, ApiError> {
    Ok(json_response(StatusCode::OK, &state.queue.list().await))
}

/// POST /v1/training/queue
pub async fn handle_create(req: Request<Body>, state: &AppState) -> Result<Response<Body>, ApiError> {
    let (parts, body) = req.into_parts();
    let bytes = read_body(&parts.headers, body, MAX_ITEM_BODY).await?;
    let request: NewItemRequest = parse_json(&bytes)?;
    if request.class.trim().is_empty() {
        return Err(ApiError::BadRequest("class must not be empty".to_string()));
    }

    let item = state.queue.append(&request.class).await?;
    Ok(json_response(StatusCode::OK, &item))
}

/// GET /v1/training/queue/:id
pub async fn handle_get(id: &str, state: &AppState) -> Result<Response<Body>, ApiError> {
    let item = find(id, state).await?;
    Ok(json_response(StatusCode::OK, &item))
}

/// GET /v1/training/queue/:id/image
pub async fn handle_get_image(id: &str, state: &AppState) -> Result<Response<Body>, ApiError> {
    let item = find(id, state).await?;
    match tokio::fs::read(state.queue.image_path(&item.id)).await {
        Ok(bytes) => Ok(bytes_response(StatusCode::OK, "image/png", bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ApiError::NotFound(format!(
            "no image uploaded for training item {}",
            item.id
        ))),
        Err(e) => Err(e.into()),
    }
}

/// POST /v1/training/queue/:id/image
pub async fn handle_upload_image(
    id: &str,
    req: Request<Body>,
    state: &AppState,
) -> Result<Response<Body>, ApiError> {
    let item = find(id, state).await?;
    let (parts, body) = req.into_parts();
    require_image(&parts.headers)?;
    let bytes = read_body(&parts.headers, body, state.max_upload_bytes).await?;

    let path = state.queue.image_path(&item.id);
    tokio::fs::write(&path, &bytes).await?;
    sys_info!("[QUEUE] Stored image for {} at {}", item.id, path.display());
    Ok(json_response(StatusCode::OK, &"ok"))
}

async fn find(id: &str, state: &AppState) -> Result<TrainingQueueItem, ApiError> {
    let id: Uuid = parse_id(id)?;
    state
        .queue
        .get(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("unknown training item: {id}")))
}
