// Error types for the worker pipeline, the training queue and the HTTP layer

use std::time::Duration;

use hyper::StatusCode;
use thiserror::Error;

/// Violations of the worker line protocol.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("argument must not be empty")]
    EmptyArgument,
    #[error("argument must not contain whitespace: {0:?}")]
    ArgumentHasWhitespace(String),
    #[error("malformed worker reply: {0:?}")]
    MalformedReply(String),
    #[error("unknown worker method: {0}")]
    UnknownMethod(String),
}

/// Failures talking to the worker process.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker process is not available")]
    Unavailable,
    #[error("worker did not answer `{method} {argument}` within {after:?}")]
    Timeout {
        method: String,
        argument: String,
        after: Duration,
    },
    #[error(transparent)]
    InvalidCommand(#[from] ProtocolError),
    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Failures of the training queue store.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("training queue io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize training queue: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("training queue file {path} is corrupt: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything a route handler can fail with, mapped onto an HTTP status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },
    #[error("{0}")]
    BadGateway(String),
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProtocolError> for ApiError {
    fn from(e: ProtocolError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Worker(WorkerError::Unavailable) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Worker(WorkerError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Worker(WorkerError::InvalidCommand(_)) => StatusCode::BAD_REQUEST,
            ApiError::Worker(WorkerError::Spawn(_))
            | ApiError::Queue(_)
            | ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(WorkerError::Unavailable).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        let timeout = WorkerError::Timeout {
            method: "classify".into(),
            argument: "x".into(),
            after: Duration::from_secs(1),
        };
        assert_eq!(ApiError::from(timeout).status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ApiError::from(ProtocolError::EmptyArgument).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotFound("missing".into()).status(),
            StatusCode::NOT_FOUND
        );
    }
}
