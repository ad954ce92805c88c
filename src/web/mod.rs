// HTTP service modules for the x-ray classification API

pub mod cache;
pub mod config;
pub mod error;
pub mod logger;
pub mod request_parsing;
pub mod response_helpers;
pub mod routes;
pub mod server;
pub mod training_queue;
pub mod worker;

pub use config::ServerConfig;
pub use error::{ApiError, WorkerError};
pub use server::{serve, AppState};
