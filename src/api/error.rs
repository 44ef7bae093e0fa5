//! Translation of ledger errors into HTTP responses.

use crate::errors::{Error, ErrorClass};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

/// Wrapper so handlers can return `Result<_, ApiError>` and use `?` on ledger calls.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(value: Error) -> Self {
        Self(value)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: ErrorClass,
}

impl ApiError {
    /// Status code for the wrapped error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match &self.0 {
            Error::AllocationNotFound { .. }
            | Error::TransactionNotFound { .. }
            | Error::ChargeNotFound { .. } => StatusCode::NOT_FOUND,
            Error::InsufficientPoints { .. }
            | Error::AllocationUnavailable { .. }
            | Error::InvalidChargeTransition { .. } => StatusCode::CONFLICT,
            err => match err.class() {
                ErrorClass::Validation => StatusCode::BAD_REQUEST,
                ErrorClass::TransientNetwork => StatusCode::SERVICE_UNAVAILABLE,
                ErrorClass::FatalState => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.0.class();
        if kind == ErrorClass::FatalState {
            error!(error = %self.0, "request failed");
        }
        // Internal details stay in the logs
        let message = match kind {
            ErrorClass::FatalState => "Internal error".to_string(),
            ErrorClass::TransientNetwork => "Ledger temporarily unavailable".to_string(),
            ErrorClass::Validation => self.0.to_string(),
        };
        (status, Json(ErrorBody { error: message, kind })).into_response()
    }
}
