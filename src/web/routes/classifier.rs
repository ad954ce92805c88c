// Classification route handlers

use hyper::{Body, Method, Request, Response};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::through_cache;
use crate::web::cache::{body_key, path_key, CacheClass};
use crate::web::error::ApiError;
use crate::web::request_parsing::{parse_id, read_body, require_image};
use crate::web::response_helpers::Rendered;
use crate::web::server::AppState;
use crate::web::worker::ipc_types::WorkerMethod;
use crate::sys_info;

#[derive(Debug, Serialize)]
pub struct Link {
    pub href: String,
}

#[derive(Debug, Serialize)]
pub struct ClassificationLinks {
    #[serde(rename = "self")]
    pub self_link: Link,
    pub explanation_lime: Link,
    pub explanation_gradcam: Link,
}

#[derive(Debug, Serialize)]
pub struct Classification {
    pub id: Uuid,
    pub class_probabilities: Value,
    #[serde(rename = "_links")]
    pub links: ClassificationLinks,
}

impl Classification {
    pub fn new(id: Uuid, class_probabilities: Value) -> Self {
        let href = |prefix: &str| Link {
            href: format!("{prefix}/{id}"),
        };
        Self {
            id,
            class_probabilities,
            links: ClassificationLinks {
                self_link: href("/v1/classifier"),
                explanation_lime: href("/v1/explainer/lime"),
                explanation_gradcam: href("/v1/explainer/gradcam"),
            },
        }
    }
}

/// POST /v1/classifier: store the uploaded image under a new id and classify it.
pub async fn handle_upload(req: Request<Body>, state: &AppState) -> Result<Response<Body>, ApiError> {
    let (parts, body) = req.into_parts();
    require_image(&parts.headers)?;
    let bytes = read_body(&parts.headers, body, state.max_upload_bytes).await?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("empty image".to_string()));
    }

    let key = body_key(&Method::POST, parts.uri.path(), &bytes);
    let bytes = &bytes;
    through_cache(state, &key, CacheClass::Classification, move || async move {
        let id = Uuid::new_v4();
        let image_path = state.image_path(&id);
        tokio::fs::write(&image_path, bytes).await?;
        sys_info!("[HTTP] Stored upload as {}", image_path.display());
        classify(state, id).await
    })
    .await
}

/// GET /v1/classifier/:id: classify an image uploaded earlier.
pub async fn handle_get(id: &str, state: &AppState) -> Result<Response<Body>, ApiError> {
    let id = parse_id(id)?;
    let key = path_key(&Method::GET, &format!("/v1/classifier/{id}"));
    through_cache(state, &key, CacheClass::Classification, move || async move {
        state.ensure_uploaded(&id).await?;
        classify(state, id).await
    })
    .await
}

async fn classify(state: &AppState, id: Uuid) -> Result<Rendered, ApiError> {
    let result = state
        .correlator
        .submit(WorkerMethod::Classify, &id.to_string())
        .await?;
    let probabilities: Value = serde_json::from_str(&result)
        .map_err(|e| ApiError::BadGateway(format!("worker returned invalid classification: {e}")))?;
    if !probabilities.is_object() {
        return Err(ApiError::BadGateway(format!(
            "worker returned invalid classification: {result}"
        )));
    }
    Rendered::json(&Classification::new(id, probabilities))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_shape() {
        let id = Uuid::new_v4();
        let body = serde_json::to_value(Classification::new(
            id,
            serde_json::json!({ "COVID-19": 0.8, "NO FINDING": 0.2 }),
        ))
        .unwrap();

        assert_eq!(body["id"], id.to_string());
        assert_eq!(body["class_probabilities"]["COVID-19"], 0.8);
        assert_eq!(body["_links"]["self"]["href"], format!("/v1/classifier/{id}"));
        assert_eq!(
            body["_links"]["explanation_lime"]["href"],
            format!("/v1/explainer/lime/{id}")
        );
        assert_eq!(
            body["_links"]["explanation_gradcam"]["href"],
            format!("/v1/explainer/gradcam/{id}")
        );
    }
}
