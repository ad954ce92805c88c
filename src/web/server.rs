// HTTP server: shared state, request routing and the accept loop

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server};
use uuid::Uuid;

use super::cache::ResponseCache;
use super::error::ApiError;
use super::request_parsing::path_segments;
use super::response_helpers::{api_error, cors_preflight};
use super::routes;
use super::training_queue::SharedTrainingQueue;
use super::worker::correlator::SharedCorrelator;
use super::worker::ipc_types::WorkerMethod;
use super::worker::worker_bridge::WorkerChannel;
use crate::{sys_debug, sys_error, sys_info};

/// Everything a request handler needs, cloned into every connection.
#[derive(Clone)]
pub struct AppState {
    pub correlator: SharedCorrelator,
    /// The worker process behind `correlator`, when this state owns one.
    pub worker: Option<Arc<WorkerChannel>>,
    pub cache: Arc<ResponseCache>,
    pub queue: SharedTrainingQueue,
    /// Uploaded images, `<id>.png`; shared with the worker.
    pub cache_dir: PathBuf,
    /// Base for relative paths in worker replies.
    pub worker_base_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn worker_alive(&self) -> bool {
        match &self.worker {
            Some(worker) => worker.is_alive(),
            None => !self.correlator.is_broken(),
        }
    }

    pub fn image_path(&self, id: &Uuid) -> PathBuf {
        self.cache_dir.join(format!("{id}.png"))
    }

    /// Fail with not-found unless an image was uploaded under `id`.
    pub async fn ensure_uploaded(&self, id: &Uuid) -> Result<(), ApiError> {
        match tokio::fs::try_exists(self.image_path(id)).await? {
            true => Ok(()),
            false => Err(ApiError::NotFound(format!("no image uploaded as {id}"))),
        }
    }
}

pub async fn handle_request(req: Request<Body>, state: AppState) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    sys_debug!("[HTTP] {method} {path}");

    if method == Method::OPTIONS {
        return Ok(cors_preflight());
    }

    let segments = path_segments(&path);
    let result = match (&method, segments.as_slice()) {
        (&Method::GET, ["health"]) => Ok(routes::health::handle(&state).await),

        (&Method::POST, ["v1", "classifier"]) => {
            routes::classifier::handle_upload(req, &state).await
        }
        (&Method::GET, ["v1", "classifier", id]) => routes::classifier::handle_get(id, &state).await,

        (&Method::GET, ["v1", "explainer", "lime", id]) => {
            routes::explainer::handle(WorkerMethod::ExplainLime, id, &state).await
        }
        (&Method::GET, ["v1", "explainer", "gradcam", id]) => {
            routes::explainer::handle(WorkerMethod::ExplainGradcam, id, &state).await
        }

        (&Method::GET, ["v1", "training", "queue"]) => routes::training::handle_list(&state).await,
        (&Method::POST, ["v1", "training", "queue"]) => {
            routes::training::handle_create(req, &state).await
        }
        (&Method::GET, ["v1", "training", "queue", id]) => {
            routes::training::handle_get(id, &state).await
        }
        (&Method::GET, ["v1", "training", "queue", id, "image"]) => {
            routes::training::handle_get_image(id, &state).await
        }
        (&Method::POST, ["v1", "training", "queue", id, "image"]) => {
            routes::training::handle_upload_image(id, req, &state).await
        }

        _ => Err(ApiError::NotFound(format!("no route for {method} {path}"))),
    };

    Ok(match result {
        Ok(response) => response,
        Err(e) => {
            sys_debug!("[HTTP] {method} {path} failed: {e}");
            api_error(&e)
        }
    })
}

/// Serve until `shutdown` resolves, then drain open connections.
pub async fn serve<F>(addr: SocketAddr, state: AppState, shutdown: F) -> Result<(), hyper::Error>
where
    F: Future<Output = ()>,
{
    let make_svc = make_service_fn(move |_conn| {
        let state = state.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| handle_request(req, state.clone())))
        }
    });

    let server = Server::try_bind(&addr)?.serve(make_svc);

    sys_info!("[HTTP] Covid-19 Classification API listening on http://{addr}");
    sys_info!("[HTTP]   POST /v1/classifier                  - Classify an x-ray image");
    sys_info!("[HTTP]   GET  /v1/classifier/:id              - Classification of an uploaded image");
    sys_info!("[HTTP]   GET  /v1/explainer/lime/:id          - LIME explanation");
    sys_info!("[HTTP]   GET  /v1/explainer/gradcam/:id       - Grad-CAM explanation");
    sys_info!("[HTTP]   GET  /v1/training/queue              - List training items");
    sys_info!("[HTTP]   POST /v1/training/queue              - Queue a training item");
    sys_info!("[HTTP]   GET  /v1/training/queue/:id          - Training item");
    sys_info!("[HTTP]   GET  /v1/training/queue/:id/image    - Training image");
    sys_info!("[HTTP]   POST /v1/training/queue/:id/image    - Upload training image");
    sys_info!("[HTTP]   GET  /health                         - Health check");

    server.with_graceful_shutdown(shutdown).await
}

/// Wait for `signal`, then stop the worker. Handlers parked on a worker
/// answer fail with 503 instead of holding the drain open.
pub async fn stop_worker_on<F>(signal: F, worker: Arc<WorkerChannel>)
where
    F: Future<Output = ()>,
{
    signal.await;
    sys_info!("[HTTP] Stopping worker before draining connections");
    worker.shutdown().await;
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            sys_error!("[HTTP] Cannot listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                sys_error!("[HTTP] Cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    sys_info!("[HTTP] Shutdown signal received, draining connections");
}
