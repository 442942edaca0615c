use atelier_shared::ArtifactError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Capability timeout: {0}")]
    Timeout(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: String,
    pub details: Option<serde_json::Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub request_id: Option<String>,
}

impl AppError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::ConfigurationError(_) => "CONFIGURATION_ERROR",
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::CapabilityUnavailable(_) => "CAPABILITY_UNAVAILABLE",
            AppError::GenerationFailed(_) => "GENERATION_FAILED",
            AppError::Timeout(_) => "CAPABILITY_TIMEOUT",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::CapabilityUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::GenerationFailed(_) => StatusCode::BAD_GATEWAY,
            // Timeouts here are always an upstream capability, not the caller
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Timeout(_) => true,
            AppError::CapabilityUnavailable(_) => true,
            AppError::GenerationFailed(_) => true,
            _ => false,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();

        let error_response = ErrorResponse {
            error: self.error_code().to_string(),
            message: self.to_string(),
            code: format!("{}", status_code.as_u16()),
            details: None,
            timestamp: chrono::Utc::now(),
            request_id: None, // Could be populated from request context
        };

        // Log errors based on severity
        match &self {
            AppError::InternalServerError(_) | AppError::ConfigurationError(_) => {
                tracing::error!("Server error: {:?}", self);
            }
            AppError::CapabilityUnavailable(_)
            | AppError::GenerationFailed(_)
            | AppError::Timeout(_) => {
                tracing::warn!("Capability error: {:?}", self);
            }
            AppError::InvalidInput(_) => {
                tracing::info!("Client error: {:?}", self);
            }
            _ => {
                tracing::debug!("Error: {:?}", self);
            }
        }

        (status_code, Json(error_response)).into_response()
    }
}

// From implementations for common error types

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Timeout(format!("HTTP request timeout: {}", err))
        } else if err.is_connect() {
            AppError::CapabilityUnavailable(format!("Connection failed: {}", err))
        } else if err.is_status() {
            match err.status().map(|s| s.as_u16()) {
                Some(502) | Some(503) | Some(504) => {
                    AppError::CapabilityUnavailable(format!("Capability overloaded: {}", err))
                }
                _ => AppError::GenerationFailed(format!("Capability HTTP error: {}", err)),
            }
        } else {
            AppError::GenerationFailed(format!("Request failed: {}", err))
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::GenerationFailed(format!("Capability returned malformed JSON: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => AppError::NotFound(format!("File not found: {}", err)),
            std::io::ErrorKind::TimedOut => AppError::Timeout(format!("I/O timeout: {}", err)),
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::ConnectionAborted => {
                AppError::CapabilityUnavailable(format!("Connection failed: {}", err))
            }
            _ => AppError::InternalServerError(format!("I/O error: {}", err)),
        }
    }
}

// Caller-supplied payload context: undecodable uploads are the caller's
// problem, encode failures on the way out are ours.
impl From<ArtifactError> for AppError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::InvalidBase64(_) | ArtifactError::Decode(_) => {
                AppError::InvalidInput(err.to_string())
            }
            ArtifactError::Encode(_) => AppError::InternalServerError(err.to_string()),
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for AppError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        AppError::InvalidInput(format!("Malformed multipart upload: {}", err))
    }
}

// Error context helpers

pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> Result<T>;
    fn with_context_lazy<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<AppError>,
{
    fn with_context(self, context: &str) -> Result<T> {
        self.map_err(|e| {
            let app_error = e.into();
            match app_error {
                AppError::InternalServerError(msg) => {
                    AppError::InternalServerError(format!("{}: {}", context, msg))
                }
                AppError::CapabilityUnavailable(msg) => {
                    AppError::CapabilityUnavailable(format!("{}: {}", context, msg))
                }
                AppError::GenerationFailed(msg) => {
                    AppError::GenerationFailed(format!("{}: {}", context, msg))
                }
                AppError::Timeout(msg) => AppError::Timeout(format!("{}: {}", context, msg)),
                _ => app_error,
            }
        })
    }

    fn with_context_lazy<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let app_error = e.into();
            let context = f();
            match app_error {
                AppError::InternalServerError(msg) => {
                    AppError::InternalServerError(format!("{}: {}", context, msg))
                }
                AppError::CapabilityUnavailable(msg) => {
                    AppError::CapabilityUnavailable(format!("{}: {}", context, msg))
                }
                AppError::GenerationFailed(msg) => {
                    AppError::GenerationFailed(format!("{}: {}", context, msg))
                }
                AppError::Timeout(msg) => AppError::Timeout(format!("{}: {}", context, msg)),
                _ => app_error,
            }
        })
    }
}

// Utility functions for error handling

pub fn internal_error<T>(msg: impl Into<String>) -> Result<T> {
    Err(AppError::InternalServerError(msg.into()))
}

pub fn invalid_input<T>(msg: impl Into<String>) -> Result<T> {
    Err(AppError::InvalidInput(msg.into()))
}

pub fn capability_unavailable<T>(msg: impl Into<String>) -> Result<T> {
    Err(AppError::CapabilityUnavailable(msg.into()))
}

pub fn generation_failed<T>(msg: impl Into<String>) -> Result<T> {
    Err(AppError::GenerationFailed(msg.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::InvalidInput("test".to_string()).error_code(),
            "INVALID_INPUT"
        );
        assert_eq!(
            AppError::CapabilityUnavailable("test".to_string()).error_code(),
            "CAPABILITY_UNAVAILABLE"
        );
        assert_eq!(
            AppError::GenerationFailed("test".to_string()).error_code(),
            "GENERATION_FAILED"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::InvalidInput("test".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::CapabilityUnavailable("test".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::GenerationFailed("test".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::Timeout("test".to_string()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(AppError::Timeout("test".to_string()).is_retryable());
        assert!(AppError::CapabilityUnavailable("test".to_string()).is_retryable());
        assert!(AppError::GenerationFailed("test".to_string()).is_retryable());
        assert!(!AppError::InvalidInput("test".to_string()).is_retryable());
    }

    #[test]
    fn test_error_classification() {
        let client_error = AppError::InvalidInput("test".to_string());
        let server_error = AppError::GenerationFailed("test".to_string());

        assert!(client_error.is_client_error());
        assert!(!client_error.is_server_error());
        assert!(!server_error.is_client_error());
        assert!(server_error.is_server_error());
    }

    #[test]
    fn test_artifact_error_mapping() {
        let err = atelier_shared::ImageArtifact::from_base64("not base64 at all!!").unwrap_err();
        let mapped = AppError::from(err);
        assert_eq!(mapped.status_code(), StatusCode::BAD_REQUEST);
    }
}
