//! Error types for the gRPC-REST gateway

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateway
///
/// Covers schema introspection failures (fatal at startup), per-instance
/// lifecycle violations (surfaced to the REST client) and backing call
/// failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Backing gRPC call failed
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::Status),

    /// gRPC transport errors
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// Malformed or unresolvable schema source
    #[error("Schema error: {0}")]
    Schema(String),

    /// No instance is registered under the given id
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// Illegal lifecycle transition (mutating a started instance, deleting a running one)
    #[error("Invalid instance state: {0}")]
    InvalidState(String),

    /// Invalid request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// HTTP status used when this error is returned from a REST endpoint
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InstanceNotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidState(_) => StatusCode::PRECONDITION_FAILED,
            Error::InvalidRequest(_) | Error::Serialization(_) => StatusCode::BAD_REQUEST,
            Error::Grpc(_) | Error::Transport(_) => StatusCode::BAD_GATEWAY,
            Error::Schema(_)
            | Error::Config(_)
            | Error::Internal(_)
            | Error::Io(_)
            | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Error::Grpc(_) => "GRPC_ERROR",
            Error::Transport(_) => "TRANSPORT_ERROR",
            Error::Schema(_) => "SCHEMA_ERROR",
            Error::InstanceNotFound(_) => "INSTANCE_NOT_FOUND",
            Error::InvalidState(_) => "INVALID_STATE",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Io(_) => "IO_ERROR",
            Error::Other(_) => "UNKNOWN_ERROR",
        }
    }

    /// Convert error to the JSON body returned by REST endpoints
    ///
    /// # Security
    ///
    /// In production (ENV=production), internal error details are sanitized
    /// to prevent information disclosure. Lifecycle errors always keep their
    /// message since they only describe the client's own instance.
    pub fn to_rest_error(&self) -> RestError {
        let is_production = std::env::var("ENV")
            .map(|e| e == "production" || e == "prod")
            .unwrap_or(false);

        let message = if is_production {
            match self {
                Error::Grpc(_) => "Backend service error".to_string(),
                Error::Transport(_) => "Service connection error".to_string(),
                Error::Internal(_) | Error::Io(_) => "Internal server error".to_string(),
                Error::Config(_) => "Gateway misconfigured".to_string(),
                Error::Serialization(_) => "Data processing error".to_string(),
                Error::Other(_) => "An unexpected error occurred".to_string(),
                Error::Schema(msg) => format!("Schema error: {}", msg),
                Error::InstanceNotFound(_) | Error::InvalidState(_) | Error::InvalidRequest(_) => {
                    self.to_string()
                }
            }
        } else {
            self.to_string()
        };

        RestError {
            message,
            code: self.code().to_string(),
        }
    }
}

/// Error body returned to REST clients
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RestError {
    pub message: String,
    pub code: String,
}

impl From<Error> for RestError {
    fn from(err: Error) -> Self {
        err.to_rest_error()
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }
        (status, Json(self.to_rest_error())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_error_display() {
        let err = Error::Schema("operation GetOrder: unresolved type".to_string());
        assert_eq!(
            err.to_string(),
            "Schema error: operation GetOrder: unresolved type"
        );

        let err = Error::InstanceNotFound("abc".to_string());
        assert_eq!(err.to_string(), "Instance not found: abc");

        let err = Error::InvalidState("instance already started".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid instance state: instance already started"
        );

        let err = Error::InvalidRequest("not json".to_string());
        assert_eq!(err.to_string(), "Invalid request: not json");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            Error::InstanceNotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::InvalidState("x".into()).status_code(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            Error::InvalidRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Grpc(tonic::Status::unavailable("down")).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            Error::Schema("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_error_from_tonic_status() {
        let status = tonic::Status::not_found("Order not found");
        let err: Error = status.into();
        assert!(matches!(err, Error::Grpc(_)));
        assert!(err.to_string().contains("Order not found"));
    }

    #[test]
    fn test_rest_error_development() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("ENV");

        let err = Error::Internal("lock poisoned in payload store".to_string());
        let rest = err.to_rest_error();
        assert_eq!(rest.message, "Internal error: lock poisoned in payload store");
        assert_eq!(rest.code, "INTERNAL_ERROR");
    }

    #[test]
    fn test_rest_error_production_sanitized() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("ENV", "production");

        let rest = Error::Internal("sensitive data here".to_string()).to_rest_error();
        assert_eq!(rest.message, "Internal server error");

        let rest = Error::Grpc(tonic::Status::internal("stack trace")).to_rest_error();
        assert_eq!(rest.message, "Backend service error");

        // lifecycle errors stay descriptive
        let rest = Error::InvalidState("instance is still running".to_string()).to_rest_error();
        assert_eq!(rest.message, "Invalid instance state: instance is still running");
        assert_eq!(rest.code, "INVALID_STATE");

        std::env::remove_var("ENV");
    }

    #[test]
    fn test_rest_error_serialization() {
        let rest = RestError {
            message: "Instance not found: 42".to_string(),
            code: "INSTANCE_NOT_FOUND".to_string(),
        };
        let json = serde_json::to_value(&rest).unwrap();
        assert_eq!(json["code"], "INSTANCE_NOT_FOUND");
        assert_eq!(json["message"], "Instance not found: 42");
    }

    #[tokio::test]
    async fn test_into_response_status() {
        let response = Error::InstanceNotFound("missing".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = Error::InvalidState("running".into()).into_response();
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    }
}
