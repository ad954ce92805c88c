// Health check route handler

use hyper::{Body, Response, StatusCode};
use serde::Serialize;

use crate::web::response_helpers::json_response;
use crate::web::server::AppState;

#[derive(Serialize)]
struct Health {
    status: &'static str,
    worker_alive: bool,
}

pub async fn handle(state: &AppState) -> Response<Body> {
    json_response(
        StatusCode::OK,
        &Health {
            status: "ok",
            worker_alive: state.worker_alive(),
        },
    )
}
