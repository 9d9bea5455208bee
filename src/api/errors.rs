//! API Error Handling
//!
//! Structured error responses with proper HTTP status codes and request tracking.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::EngineError;

/// Top-level API error response with request tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code, e.g. `ROUND_ALREADY_CRASHED`
    pub code: String,
    pub message: String,
}

/// API error types with request tracking
#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    Engine(EngineError),
    BadRequest(String),
    NotFound(String),
    InternalError(String),
}

impl ApiError {
    pub fn engine(request_id: String, error: EngineError) -> Self {
        Self {
            kind: ApiErrorKind::Engine(error),
            request_id,
        }
    }

    pub fn bad_request(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::BadRequest(message),
            request_id,
        }
    }

    pub fn not_found(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::NotFound(message),
            request_id,
        }
    }

    pub fn internal_error(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::InternalError(message),
            request_id,
        }
    }

    pub fn status(&self) -> StatusCode {
        match &self.kind {
            ApiErrorKind::Engine(error) => engine_status(error),
            ApiErrorKind::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
            ApiErrorKind::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match &self.kind {
            ApiErrorKind::Engine(error) => error.code(),
            ApiErrorKind::BadRequest(_) => "BAD_REQUEST",
            ApiErrorKind::NotFound(_) => "NOT_FOUND",
            ApiErrorKind::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

fn engine_status(error: &EngineError) -> StatusCode {
    match error {
        EngineError::RoundNotAcceptingBets { .. }
        | EngineError::RoundAlreadyCrashed { .. }
        | EngineError::BetAlreadyResolved { .. } => StatusCode::CONFLICT,
        EngineError::InsufficientFunds => StatusCode::PAYMENT_REQUIRED,
        EngineError::BetNotFound { .. } | EngineError::RoundNotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::SettlementUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::InvalidStake { .. } => StatusCode::BAD_REQUEST,
        EngineError::ClockFault(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ApiErrorKind::Engine(error) => write!(f, "[{}] {}", self.request_id, error),
            ApiErrorKind::BadRequest(msg) => write!(f, "[{}] Bad Request: {}", self.request_id, msg),
            ApiErrorKind::NotFound(msg) => write!(f, "[{}] Not Found: {}", self.request_id, msg),
            ApiErrorKind::InternalError(msg) => write!(f, "[{}] Internal Error: {}", self.request_id, msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = match self.kind {
            ApiErrorKind::Engine(error) => error.to_string(),
            ApiErrorKind::BadRequest(msg)
            | ApiErrorKind::NotFound(msg)
            | ApiErrorKind::InternalError(msg) => msg,
        };

        let body = Json(ErrorResponse {
            request_id: self.request_id,
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::BetId;
    use crate::round::RoundId;

    #[test]
    fn test_engine_errors_map_to_status() {
        let cases = [
            (EngineError::RoundNotAcceptingBets { round_id: RoundId(1) }, StatusCode::CONFLICT),
            (EngineError::InsufficientFunds, StatusCode::PAYMENT_REQUIRED),
            (EngineError::RoundAlreadyCrashed { round_id: RoundId(1) }, StatusCode::CONFLICT),
            (EngineError::BetAlreadyResolved { bet_id: BetId(1) }, StatusCode::CONFLICT),
            (EngineError::BetNotFound { bet_id: BetId(1) }, StatusCode::NOT_FOUND),
            (
                EngineError::SettlementUnavailable { reason: "down".into() },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                EngineError::InvalidStake { stake: 1, reason: "too small".into() },
                StatusCode::BAD_REQUEST,
            ),
            (EngineError::RoundNotFound { round_id: RoundId(9) }, StatusCode::NOT_FOUND),
        ];

        for (error, status) in cases {
            let code = error.code();
            let api = ApiError::engine("req".to_string(), error);
            assert_eq!(api.status(), status, "{}", code);
            assert_eq!(api.code(), code);
        }
    }
}
