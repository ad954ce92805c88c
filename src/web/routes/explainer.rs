// Explanation route handlers (LIME and Grad-CAM)

use std::path::{Path, PathBuf};

use hyper::body::Bytes;
use hyper::{Body, Method, Response, StatusCode};
use uuid::Uuid;

use super::through_cache;
use crate::web::cache::{path_key, CacheClass};
use crate::web::error::ApiError;
use crate::web::request_parsing::parse_id;
use crate::web::response_helpers::{content_type_for, Rendered};
use crate::web::server::AppState;
use crate::web::worker::ipc_types::WorkerMethod;
use crate::sys_debug;

/// URL segment under `/v1/explainer/` for an explanation method.
pub fn route_name(method: WorkerMethod) -> Option<&'static str> {
    match method {
        WorkerMethod::ExplainLime => Some("lime"),
        WorkerMethod::ExplainGradcam => Some("gradcam"),
        WorkerMethod::Classify => None,
    }
}

/// GET /v1/explainer/{lime,gradcam}/:id: render an explanation image.
pub async fn handle(method: WorkerMethod, id: &str, state: &AppState) -> Result<Response<Body>, ApiError> {
    let name = route_name(method)
        .ok_or_else(|| ApiError::NotFound(format!("{method} is not an explanation")))?;
    let id = parse_id(id)?;
    let key = path_key(&Method::GET, &format!("/v1/explainer/{name}/{id}"));
    through_cache(state, &key, CacheClass::Explanation, move || async move {
        state.ensure_uploaded(&id).await?;
        explain(state, method, id).await
    })
    .await
}

async fn explain(state: &AppState, method: WorkerMethod, id: Uuid) -> Result<Rendered, ApiError> {
    let result = state.correlator.submit(method, &id.to_string()).await?;
    let artifact = resolve_artifact(&state.worker_base_dir, &result)?;
    sys_debug!("[HTTP] {method} {id} produced {}", artifact.display());

    let body = match tokio::fs::read(&artifact).await {
        Ok(body) => body,
        Err(e) => {
            return Err(ApiError::BadGateway(format!(
                "explanation {} is not readable: {e}",
                artifact.display()
            )))
        }
    };
    Ok(Rendered {
        status: StatusCode::OK,
        content_type: content_type_for(&artifact),
        body: Bytes::from(body),
    })
}

/// The worker answers with a file path, relative to its own working directory.
fn resolve_artifact(base: &Path, result: &str) -> Result<PathBuf, ApiError> {
    let reported = result.trim();
    if reported.is_empty() {
        return Err(ApiError::BadGateway(
            "worker returned no explanation path".to_string(),
        ));
    }
    let path = Path::new(reported);
    Ok(if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_names() {
        assert_eq!(route_name(WorkerMethod::ExplainLime), Some("lime"));
        assert_eq!(route_name(WorkerMethod::ExplainGradcam), Some("gradcam"));
        assert_eq!(route_name(WorkerMethod::Classify), None);
    }

    #[test]
    fn test_resolve_artifact() {
        let base = Path::new("/srv/worker");
        assert_eq!(
            resolve_artifact(base, "explanation_lime_x.png").unwrap(),
            PathBuf::from("/srv/worker/explanation_lime_x.png")
        );
        assert_eq!(
            resolve_artifact(base, "/tmp/out.png\r").unwrap(),
            PathBuf::from("/tmp/out.png")
        );
        assert!(matches!(resolve_artifact(base, "  "), Err(ApiError::BadGateway(_))));
    }
}
