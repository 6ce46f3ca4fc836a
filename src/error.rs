use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Connection to {target} failed: {reason}")]
    Connection { target: String, reason: String },

    #[error("Device info query '{query}' failed: {reason}")]
    DeviceInfo { query: &'static str, reason: String },

    #[error("Invalid coordinates {coords:?}: {reason}")]
    InvalidCoordinates { coords: Vec<f64>, reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The probed target is not on screen (yet). Search loops treat this as a miss.
    #[error("Target not found: {0}")]
    NotFound(String),

    #[error("Search for {target} exhausted after {attempts} attempt(s)")]
    SearchExhausted { target: String, attempts: u32 },

    #[error("Transport error on {method} {url}: {reason}")]
    Transport {
        method: String,
        url: String,
        reason: String,
    },

    #[error("{method} {url} returned HTTP {status}: {body}")]
    HttpStatus {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    /// Logical error envelope returned inside an otherwise successful exchange.
    #[error("Backend error {error}: {message}")]
    Backend {
        error: String,
        message: String,
        traceback: Option<String>,
    },

    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Attempts {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<DriverError>,
    },

    #[error("{action} at {coords:?} failed: {source}")]
    Action {
        action: String,
        coords: Vec<f64>,
        #[source]
        source: Box<DriverError>,
    },

    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        operation: &'static str,
        backend: &'static str,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    /// Innermost error, with `Attempts` and `Action` wrappers peeled off.
    pub fn root(&self) -> &DriverError {
        match self {
            DriverError::Attempts { source, .. } | DriverError::Action { source, .. } => {
                source.root()
            }
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), DriverError::NotFound(_))
    }

    pub fn connection(target: impl Into<String>, reason: impl ToString) -> Self {
        DriverError::Connection {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub fn device_info(query: &'static str, reason: impl ToString) -> Self {
        DriverError::DeviceInfo {
            query,
            reason: reason.to_string(),
        }
    }

    pub fn with_attempts(self, operation: impl Into<String>, attempts: u32) -> Self {
        DriverError::Attempts {
            operation: operation.into(),
            attempts,
            source: Box::new(self),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    detail: String,
}

impl IntoResponse for DriverError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.root() {
            DriverError::InvalidArgument(_) | DriverError::InvalidCoordinates { .. } => {
                (StatusCode::BAD_REQUEST, "Bad Request")
            }
            DriverError::NotFound(_) | DriverError::SearchExhausted { .. } => {
                (StatusCode::NOT_FOUND, "Not Found")
            }
            DriverError::Connection { .. } => (StatusCode::BAD_GATEWAY, "Connection Error"),
            DriverError::Transport { .. } | DriverError::HttpStatus { .. } => {
                (StatusCode::BAD_GATEWAY, "Transport Error")
            }
            DriverError::Backend { .. } => (StatusCode::BAD_GATEWAY, "Backend Error"),
            DriverError::Unsupported { .. } => (StatusCode::NOT_IMPLEMENTED, "Not Implemented"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Error"),
        };

        let body = Json(ErrorResponse {
            error: error_message.to_string(),
            detail: self.to_string(),
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
