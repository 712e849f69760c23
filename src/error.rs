//! # Error Handling
//!
//! HTTP-facing error type for the relay service and its conversion into responses.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Enums for Error Types
//! - **Variants**: Each variant is one failure the relay can report to a client
//! - **Data**: Upstream failures carry the upstream status and body so they can be forwarded
//!
//! ### Traits for Error Conversion
//! - **ResponseError trait**: Converts errors to HTTP responses inside actix-web
//! - **Display trait**: Defines how errors are formatted in logs
//!
//! ## Response bodies:
//! - Upstream rejections keep the upstream status. JSON bodies are forwarded verbatim,
//!   anything else becomes `{"detail": "<text>"}`.
//! - A stream failure before the first relayed byte is a 502 with
//!   `{"detail": "Upstream stream error: <kind>"}`.
//! - Everything else uses the envelope
//!   `{"error": {"type": ..., "message": ..., "timestamp": ...}}`.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Body returned by the upstream service alongside a non-success status.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamBody {
    /// Structured error payload, forwarded as-is
    Json(serde_json::Value),
    /// Decoded text payload, wrapped into a generic message
    Text(String),
}

/// Custom error types for the application.
///
/// ## Error Categories:
/// - **BadRequest**: Malformed request payload (400)
/// - **ValidationError**: Request failed validation rules (400)
/// - **Upstream**: The TTS provider answered with a non-success status (status preserved)
/// - **UpstreamStream**: The upstream stream broke before any byte was relayed (502)
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    ValidationError(String),
    Upstream { status: StatusCode, body: UpstreamBody },
    UpstreamStream(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Upstream { status, body } => match body {
                UpstreamBody::Json(value) => write!(f, "Upstream rejected request ({}): {}", status, value),
                UpstreamBody::Text(text) => write!(f, "Upstream rejected request ({}): {}", status, text),
            },
            AppError::UpstreamStream(kind) => write!(f, "Upstream stream error: {}", kind),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream { status, .. } => *status,
            AppError::UpstreamStream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();

        let (error_type, message) = match self {
            AppError::Upstream { body: UpstreamBody::Json(value), .. } => {
                return HttpResponse::build(status).json(value);
            }
            AppError::Upstream { body: UpstreamBody::Text(text), .. } => {
                return HttpResponse::build(status).json(json!({ "detail": text }));
            }
            AppError::UpstreamStream(_) => {
                return HttpResponse::build(status).json(json!({ "detail": self.to_string() }));
            }
            AppError::BadRequest(msg) => ("bad_request", msg.clone()),
            AppError::ValidationError(msg) => ("validation_error", msg.clone()),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}
