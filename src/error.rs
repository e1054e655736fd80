use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Application error type covering the store, the bus, and the edge surface.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Database & Storage Errors =====
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store operation timed out")]
    StoreTimeout,

    // ===== Message Bus Errors =====
    #[error("Kafka error: {0}")]
    Kafka(String),

    // ===== Serialization Errors =====
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== Validation Errors =====
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("UUID parse error: {0}")]
    Uuid(#[from] uuid::Error),

    // ===== Push Channel Errors =====
    #[error("max connections reached")]
    CapacityExceeded,

    #[error("no active connections for user")]
    NoRecipient,

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Config(String),

    // ===== Internal Server Errors =====
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Uuid(_) => StatusCode::BAD_REQUEST,
            AppError::CapacityExceeded => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NoRecipient => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a user-facing error message (without internal details)
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(msg) => msg.clone(),
            AppError::CapacityExceeded => "max connections reached".to_string(),
            AppError::NoRecipient => "no active connections for user".to_string(),
            AppError::Database(_) | AppError::StoreTimeout => "storage error".to_string(),
            AppError::Kafka(_) => "message bus error".to_string(),
            AppError::Config(msg) => format!("configuration error: {msg}"),
            _ => "internal server error".to_string(),
        }
    }

    /// Log this error with a level matching its severity
    pub fn log(&self) {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = %status.as_u16(), "Server error occurred");
        } else {
            tracing::debug!(error = %self, status = %status.as_u16(), "Client error occurred");
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    /// Create an internal server error
    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    /// Create a Kafka error
    pub fn kafka(msg: impl Into<String>) -> Self {
        AppError::Kafka(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        AppError::Config(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        self.log();

        let status = self.status_code();

        // Server errors stay opaque to the client
        let body = if status.is_server_error() {
            json!({
                "error": "internal server error",
                "status": status.as_u16(),
            })
        } else {
            json!({
                "error": self.user_message(),
                "status": status.as_u16(),
            })
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<rdkafka::error::KafkaError> for AppError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        AppError::Kafka(err.to_string())
    }
}
