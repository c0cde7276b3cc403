//! # Error Handling
//!
//! This module defines the error types of the evaluation pipeline and how they are
//! converted into HTTP responses.
//!
//! ## Two layers:
//! - **EvalError**: What can go wrong while normalizing audio or talking to the
//!   scoring service. Produced by the audio and scoring modules.
//! - **AppError**: What a handler returns. Implements `ResponseError`, so actix
//!   turns it into an HTTP response automatically.
//!
//! ## Response format:
//! Every error response has the same body, which existing clients depend on:
//! ```json
//! { "error": "HTTP status code 503" }
//! ```
//! All pipeline failures map to 500. Only request-shape problems (missing upload,
//! oversized upload, broken multipart stream) are reported as 400.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Failures of a single evaluation attempt.
///
/// None of these are retried. Each one is logged where it happens and then
/// surfaced to the caller through [`AppError::Pipeline`].
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// The input audio could not be turned into 16kHz mono PCM WAV
    #[error("{0}")]
    Transcode(String),

    /// The outbound request could not be sent (DNS, connect, TLS, ...)
    #[error("{0}")]
    Submission(String),

    /// The scoring service answered with a status outside 2xx
    #[error("HTTP status code {0}")]
    RemoteStatus(u16),

    /// The response body could not be read to completion
    #[error("{0}")]
    ResponseRead(String),

    /// The response body was read but is not JSON
    #[error("Invalid JSON in scoring response: {0}")]
    MalformedResponse(String),
}

impl EvalError {
    /// Short machine-readable name, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::Transcode(_) => "transcode_error",
            EvalError::Submission(_) => "submission_error",
            EvalError::RemoteStatus(_) => "remote_status_error",
            EvalError::ResponseRead(_) => "response_read_error",
            EvalError::MalformedResponse(_) => "malformed_response",
        }
    }
}

/// Custom error types returned by HTTP handlers.
///
/// ## Error Categories:
/// - **Pipeline**: Transcoding or scoring-service failure (500)
/// - **Internal**: Any other server-side problem (500)
/// - **BadRequest**: Client sent an unusable request (400)
/// - **NotFound**: Requested resource doesn't exist (404)
/// - **ValidationError**: Request data failed a rule, e.g. upload too large (400)
#[derive(Debug)]
pub enum AppError {
    Pipeline(EvalError),
    Internal(String),
    BadRequest(String),
    NotFound(String),
    ValidationError(String),
}

impl AppError {
    /// The text placed in the `error` field of the response body.
    pub fn message(&self) -> String {
        match self {
            AppError::Pipeline(err) => err.to_string(),
            AppError::Internal(msg)
            | AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::ValidationError(msg) => msg.clone(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Pipeline(err) => write!(f, "Evaluation failed ({}): {}", err.kind(), err),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

/// Implementation of the ResponseError trait for AppError.
///
/// ## HTTP Status Code Mapping:
/// - Pipeline/Internal → 500 (Internal Server Error)
/// - BadRequest/ValidationError → 400 (Bad Request)
/// - NotFound → 404 (Not Found)
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;

        match self {
            AppError::Pipeline(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "error": self.message()
        }))
    }
}

impl From<EvalError> for AppError {
    fn from(err: EvalError) -> Self {
        AppError::Pipeline(err)
    }
}

/// Automatic conversion from anyhow::Error to AppError.
///
/// When you use `?` with an anyhow::Error, it automatically becomes an AppError::Internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;
