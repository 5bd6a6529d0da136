//! Error types for fedikit
//!
//! Every failure in the engine is expressed as an `AppError`. Inbound
//! errors implement `IntoResponse` so a remote sender receives a status
//! code it can apply its own retry policy to.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Engine-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// A document is not valid Activity Vocabulary (400)
    #[error("Malformed vocabulary: {0}")]
    MalformedVocabulary(String),

    /// A value cannot be canonicalized (400)
    #[error("Canonicalization error: {0}")]
    Canonicalization(String),

    /// No local key pair for the actor (404)
    #[error("Key not found for actor: {0}")]
    KeyNotFound(String),

    /// Remote actor could not be fetched (503, retryable)
    #[error("Actor unreachable: {0}")]
    ActorUnreachable(String),

    /// Remote actor document is unusable (401)
    #[error("Actor invalid: {0}")]
    ActorInvalid(String),

    /// Request carries no Signature header (401)
    #[error("Missing Signature header")]
    SignatureMissing,

    /// Signature header cannot be parsed or is incomplete (401)
    #[error("Malformed signature: {0}")]
    SignatureMalformed(String),

    /// Cryptographic verification failed (401)
    #[error("Invalid signature: {0}")]
    SignatureInvalid(String),

    /// Date header is outside the clock skew window (401)
    #[error("Signature expired: date skew of {skew_secs}s exceeds {max_secs}s")]
    SignatureExpired { skew_secs: i64, max_secs: u64 },

    /// Body digest does not match the digest header (401)
    #[error("Digest mismatch")]
    DigestMismatch,

    /// Application handler failed (500)
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    /// A delivery reached a terminal failure
    #[error("Delivery to {inbox} abandoned after {attempts} attempt(s): {last_error}")]
    DeliveryAbandoned {
        inbox: String,
        attempts: u32,
        last_error: String,
    },

    /// Resource not found (404)
    #[error("Resource not found")]
    NotFound,

    /// Requested representation is not available (406)
    #[error("Not acceptable")]
    NotAcceptable,

    /// Destination refused by local policy (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Validation error (400)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Remote peer answered with an error status or the request failed (502)
    #[error("Transport error: {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// HTTP client error (502)
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Configuration error (500)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage contract failure (500)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Error reported by an application-supplied activity handler
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Whether a delivery attempt that failed with this error may be retried.
    ///
    /// Network failures, timeouts, 5xx and rate-limit class responses are
    /// retryable. Everything else is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::ActorUnreachable(_) | AppError::HttpClient(_) => true,
            AppError::Transport { status: None, .. } => true,
            AppError::Transport {
                status: Some(code), ..
            } => is_retryable_status(*code),
            _ => false,
        }
    }

    /// Short stable label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::MalformedVocabulary(_) => "malformed_vocabulary",
            AppError::Canonicalization(_) => "canonicalization",
            AppError::KeyNotFound(_) => "key_not_found",
            AppError::ActorUnreachable(_) => "actor_unreachable",
            AppError::ActorInvalid(_) => "actor_invalid",
            AppError::SignatureMissing => "signature_missing",
            AppError::SignatureMalformed(_) => "signature_malformed",
            AppError::SignatureInvalid(_) => "signature_invalid",
            AppError::SignatureExpired { .. } => "signature_expired",
            AppError::DigestMismatch => "digest_mismatch",
            AppError::Handler(_) => "handler",
            AppError::DeliveryAbandoned { .. } => "delivery_abandoned",
            AppError::NotFound => "not_found",
            AppError::NotAcceptable => "not_acceptable",
            AppError::Forbidden(_) => "forbidden",
            AppError::Validation(_) => "validation",
            AppError::Transport { .. } => "transport",
            AppError::HttpClient(_) => "http_client",
            AppError::Config(_) => "config",
            AppError::Storage(_) => "storage",
            AppError::Internal(_) => "internal",
        }
    }
}

/// 408, 429 and every 5xx are worth another attempt.
pub fn is_retryable_status(code: u16) -> bool {
    code == 408 || code == 429 || (500..600).contains(&code)
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl IntoResponse for AppError {
    /// Maps each error variant to an HTTP status code and JSON error body.
    fn into_response(self) -> Response {
        use axum::Json;

        let status = match &self {
            AppError::SignatureMissing
            | AppError::SignatureMalformed(_)
            | AppError::SignatureInvalid(_)
            | AppError::SignatureExpired { .. }
            | AppError::DigestMismatch
            | AppError::ActorInvalid(_) => StatusCode::UNAUTHORIZED,
            AppError::MalformedVocabulary(_)
            | AppError::Canonicalization(_)
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound | AppError::KeyNotFound(_) => StatusCode::NOT_FOUND,
            AppError::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::ActorUnreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Transport { .. } | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,
            AppError::Handler(_)
            | AppError::DeliveryAbandoned { .. }
            | AppError::Config(_)
            | AppError::Storage(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Internal details stay in the logs.
        let error_message = match &self {
            AppError::Handler(_) => "Activity handler failed".to_string(),
            AppError::Internal(_) | AppError::Storage(_) | AppError::Config(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        use crate::metrics::ERRORS_TOTAL;
        ERRORS_TOTAL.with_label_values(&[self.kind()]).inc();

        let body = Json(serde_json::json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
