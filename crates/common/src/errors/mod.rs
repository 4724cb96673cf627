//! Error types for Bibliosync services
//!
//! Provides:
//! - Distinct error types for each failure mode of the controller
//! - The two failure tiers (expected vs unexpected)
//! - HTTP status code mapping and structured responses for the gateway
//! - Error codes for machine handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,
    InvalidLegacyRecord,

    // Resource errors (4xxx)
    NotFound,
    CollectionNotFound,
    ParentMissing,
    RunInProgress,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External collaborator errors (8xxx)
    UpstreamError,
    RemoteUnavailable,
    RemoteMiss,
    PublishPrecondition,
    PublishFailed,
    QueueError,
    LegacySourceError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,
            ErrorCode::InvalidLegacyRecord => 1003,

            ErrorCode::NotFound => 4001,
            ErrorCode::CollectionNotFound => 4002,
            ErrorCode::ParentMissing => 4003,
            ErrorCode::RunInProgress => 4004,

            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::RemoteUnavailable => 8002,
            ErrorCode::RemoteMiss => 8003,
            ErrorCode::PublishPrecondition => 8004,
            ErrorCode::PublishFailed => 8005,
            ErrorCode::QueueError => 8006,
            ErrorCode::LegacySourceError => 8007,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid legacy record {pid}: {message}")]
    InvalidLegacyRecord { pid: String, message: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Collection not found: {acron}")]
    CollectionNotFound { acron: String },

    #[error("Parent of {kind} {pid} is not migrated: {message}")]
    ParentMissing {
        kind: String,
        pid: String,
        message: String,
    },

    #[error("A {operation} run is already active for {collection}")]
    RunInProgress { collection: String, operation: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External collaborator errors
    #[error("Remote metadata source unavailable at {url}: {message}")]
    RemoteUnavailable { url: String, message: String },

    #[error("Remote metadata source has no result for {query}")]
    RemoteMiss { query: String },

    #[error("Publish target not ready for {collection}/{kind}/{website}: {message}")]
    PublishPrecondition {
        collection: String,
        kind: String,
        website: String,
        message: String,
    },

    #[error("Publish failed for {kind} {pid}: {message}")]
    PublishFailed {
        kind: String,
        pid: String,
        message: String,
    },

    #[error("Queue error: {message}")]
    QueueError { message: String },

    #[error("Legacy source error: {message}")]
    LegacySource { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidLegacyRecord { .. } => ErrorCode::InvalidLegacyRecord,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::CollectionNotFound { .. } => ErrorCode::CollectionNotFound,
            AppError::ParentMissing { .. } => ErrorCode::ParentMissing,
            AppError::RunInProgress { .. } => ErrorCode::RunInProgress,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::RemoteUnavailable { .. } => ErrorCode::RemoteUnavailable,
            AppError::RemoteMiss { .. } => ErrorCode::RemoteMiss,
            AppError::PublishPrecondition { .. } => ErrorCode::PublishPrecondition,
            AppError::PublishFailed { .. } => ErrorCode::PublishFailed,
            AppError::QueueError { .. } => ErrorCode::QueueError,
            AppError::LegacySource { .. } => ErrorCode::LegacySourceError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Expected failures are return values with a defined fallback
    /// (fetch-and-create, skip, abort this stage). Everything else is
    /// unexpected and belongs in the failure ledger.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            AppError::RemoteMiss { .. } | AppError::PublishPrecondition { .. }
        )
    }

    /// Short type name recorded in failure ledger entries
    pub fn type_name(&self) -> String {
        format!("{:?}", self.code())
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::InvalidLegacyRecord { .. } => StatusCode::BAD_REQUEST,

            AppError::NotFound { .. } | AppError::CollectionNotFound { .. } => {
                StatusCode::NOT_FOUND
            }

            AppError::ParentMissing { .. } | AppError::RunInProgress { .. } => StatusCode::CONFLICT,

            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            AppError::RemoteUnavailable { .. }
            | AppError::RemoteMiss { .. }
            | AppError::PublishFailed { .. }
            | AppError::LegacySource { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            AppError::PublishPrecondition { .. } | AppError::QueueError { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for the operations API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
