use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::proxy::outcome::ProxyFault;

/// Unified error type for the proxy rotor
#[derive(Error, Debug)]
pub enum RotorError {
    // Registration errors
    #[error("Invalid proxy address: {0}")]
    InvalidAddress(String),

    #[error("Proxy already exists: {0}")]
    DuplicateProxy(String),

    #[error("Proxy not found: {0}")]
    ProxyNotFound(String),

    // Proxy-attributable errors
    #[error("Invalid proxy: {0}")]
    InvalidProxy(String),

    #[error("Proxy returned invalid data: {0}")]
    InvalidProxyData(String),

    #[error("Transparent proxy: {0}")]
    TransparentProxy(String),

    #[error("No proxies available")]
    NoProxiesAvailable,

    // Caller errors
    #[error("{0}")]
    CallerRequest(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for rotor operations
pub type Result<T> = std::result::Result<T, RotorError>;

impl RotorError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            RotorError::InvalidAddress(_)
            | RotorError::InvalidRequest(_)
            | RotorError::CallerRequest(_)
            | RotorError::InvalidConfig(_) => StatusCode::BAD_REQUEST,

            // 404 Not Found
            RotorError::ProxyNotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            RotorError::DuplicateProxy(_) => StatusCode::CONFLICT,

            // 502 Bad Gateway
            RotorError::InvalidProxy(_)
            | RotorError::InvalidProxyData(_)
            | RotorError::TransparentProxy(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            RotorError::NoProxiesAvailable | RotorError::DatabaseConnection(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 500 Internal Server Error
            RotorError::Database(_) | RotorError::Io(_) | RotorError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl From<ProxyFault> for RotorError {
    fn from(fault: ProxyFault) -> Self {
        match fault {
            ProxyFault::Unreachable(msg) => RotorError::InvalidProxy(msg),
            ProxyFault::InvalidData(msg) => RotorError::InvalidProxyData(msg),
            ProxyFault::Transparent(msg) => RotorError::TransparentProxy(msg),
        }
    }
}

// Implement IntoResponse for API error responses
impl IntoResponse for RotorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if self.is_server_error() {
            error!("API request failed: {}", self);
        }
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_code_mapping() {
        assert_eq!(
            RotorError::InvalidAddress("999.999.999.999:80".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RotorError::CallerRequest("relative URL without a base".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RotorError::DuplicateProxy("1.2.3.4:8080".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            RotorError::ProxyNotFound("1.2.3.4:8080".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            RotorError::TransparentProxy("via header".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            RotorError::NoProxiesAvailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_is_server_error() {
        assert!(!RotorError::InvalidRequest("bad".to_string()).is_server_error());
        assert!(!RotorError::DuplicateProxy("1.2.3.4:8080".to_string()).is_server_error());
        assert!(RotorError::NoProxiesAvailable.is_server_error());
        assert!(RotorError::Internal("boom".to_string()).is_server_error());
    }

    #[test]
    fn test_proxy_fault_conversion() {
        let err: RotorError = ProxyFault::Unreachable("connection refused".into()).into();
        assert!(matches!(err, RotorError::InvalidProxy(_)));

        let err: RotorError = ProxyFault::InvalidData("length mismatch".into()).into();
        assert!(matches!(err, RotorError::InvalidProxyData(_)));

        let err: RotorError = ProxyFault::Transparent("Via: 1.1 squid".into()).into();
        assert!(matches!(err, RotorError::TransparentProxy(_)));

    }

    #[test]
    fn test_caller_error_message_is_verbatim() {
        let err = RotorError::CallerRequest("unsupported scheme: ftp".to_string());
        assert_eq!(err.to_string(), "unsupported scheme: ftp");
    }
}
