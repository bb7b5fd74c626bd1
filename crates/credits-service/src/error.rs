//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use credits_core::{IdError, LedgerError};

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden - valid credentials but insufficient permissions.
    #[error("forbidden")]
    Forbidden,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Transient storage contention. The request may be retried unchanged.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// Insufficient balance.
    #[error("insufficient balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// The account is soft-disabled.
    #[error("account disabled: {0}")]
    AccountDisabled(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden", self.to_string(), None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (
                StatusCode::CONFLICT,
                "transaction_conflict",
                msg.clone(),
                None,
            ),
            Self::InsufficientBalance { balance, required } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_balance",
                self.to_string(),
                Some(serde_json::json!({
                    "balance": balance,
                    "required": required
                })),
            ),
            Self::AccountDisabled(account_id) => (
                StatusCode::FORBIDDEN,
                "account_disabled",
                format!("Account {account_id} is disabled"),
                None,
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound { .. } | LedgerError::EntryNotFound { .. } => {
                Self::NotFound(err.to_string())
            }
            LedgerError::InsufficientBalance { balance, required } => {
                Self::InsufficientBalance { balance, required }
            }
            LedgerError::TransactionConflict(msg) => Self::Conflict(msg),
            LedgerError::AccountDisabled { account_id } => Self::AccountDisabled(account_id),
            LedgerError::InvalidAmount(_)
            | LedgerError::UnknownPlan(_)
            | LedgerError::ConfirmationRequired
            | LedgerError::NotAHold { .. }
            | LedgerError::InvalidId(_) => Self::BadRequest(err.to_string()),
            LedgerError::InvalidTransition { .. }
            | LedgerError::Storage(_)
            | LedgerError::Serialization(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<IdError> for ApiError {
    fn from(err: IdError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_errors_map_to_statuses() {
        let cases = [
            (
                LedgerError::NotFound {
                    account_id: "a".into(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                LedgerError::InsufficientBalance {
                    balance: 1,
                    required: 2,
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (LedgerError::InvalidAmount(0), StatusCode::BAD_REQUEST),
            (LedgerError::UnknownPlan("x".into()), StatusCode::BAD_REQUEST),
            (LedgerError::ConfirmationRequired, StatusCode::BAD_REQUEST),
            (
                LedgerError::AccountDisabled {
                    account_id: "a".into(),
                },
                StatusCode::FORBIDDEN,
            ),
            (
                LedgerError::TransactionConflict("busy".into()),
                StatusCode::CONFLICT,
            ),
            (
                LedgerError::Storage("disk".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), status);
        }
    }
}
