//! # Error Handling
//!
//! Two error families live here:
//!
//! - **SessionError**: everything that can go wrong inside one readaloud
//!   session (payload parsing, backend synthesis, transcoding, framing).
//!   Every variant is terminal for the session that raised it.
//! - **AppError**: failures at the HTTP boundary, before a websocket
//!   session exists. These become JSON error responses.
//!
//! ## Key Rust Concepts:
//! - **thiserror**: derives `Display` and `std::error::Error` from the
//!   `#[error(...)]` attributes on each variant
//! - **ResponseError trait**: converts `AppError` into an HTTP response

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Errors raised while serving a single readaloud session.
///
/// ## Propagation policy:
/// None of these are retried and none are reported to the client. The
/// session logs the error with its stage and closes the socket without
/// sending a complete turn.start / audio / turn.end sequence.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    /// The SSML payload is not well-formed or does not have the
    /// speak → voice → prosody shape.
    #[error("malformed SSML payload: {0}")]
    MalformedPayload(String),

    /// The prosody rate is neither a multiplier nor a relative percentage.
    #[error("unparseable prosody rate {0:?}")]
    RateParseFailed(String),

    /// The backend could not be reached (connect error, timeout).
    #[error("TTS backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend answered, but not with usable audio.
    #[error("TTS backend error: {0}")]
    BackendError(String),

    /// The external transcoder failed or exited non-zero.
    #[error("transcoding failed: {exit_detail}")]
    TranscodeFailed { exit_detail: String },

    /// An outbound header block does not fit the 16-bit length prefix.
    #[error("frame header of {0} bytes exceeds the 16-bit length prefix")]
    FrameTooLarge(usize),
}

impl SessionError {
    /// Pipeline stage the error belongs to, used as a structured log field.
    pub fn stage(&self) -> &'static str {
        match self {
            SessionError::MalformedPayload(_) => "extract",
            SessionError::RateParseFailed(_) => "rate",
            SessionError::BackendUnavailable(_) | SessionError::BackendError(_) => "backend",
            SessionError::TranscodeFailed { .. } => "transcode",
            SessionError::FrameTooLarge(_) => "encode",
        }
    }
}

/// Errors returned from HTTP handlers.
///
/// ## HTTP Status Code Mapping:
/// - UpgradeFailed → 400 (the request was not a valid websocket upgrade)
/// - OriginRejected → 403 (the upgrade policy refused the Origin header)
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Websocket upgrade failed: {0}")]
    UpgradeFailed(String),

    #[error("Origin not allowed: {0}")]
    OriginRejected(String),
}

/// Every error response shares one JSON shape:
/// ```json
/// { "error": { "type": "upgrade_failed", "message": "...", "timestamp": "..." } }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type) = match self {
            AppError::UpgradeFailed(_) => (actix_web::http::StatusCode::BAD_REQUEST, "upgrade_failed"),
            AppError::OriginRejected(_) => (actix_web::http::StatusCode::FORBIDDEN, "origin_rejected"),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Shorthand for handler results.
pub type AppResult<T> = Result<T, AppError>;
