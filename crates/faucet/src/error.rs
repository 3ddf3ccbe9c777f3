//! Error types for the faucet service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use trickle_common::{format_duration, round_duration, CoinError, DurationError};

/// Faucet service errors
#[derive(Error, Debug)]
pub enum FaucetError {
    #[error("{0} chain prefix is not supported")]
    UnsupportedChain(String),

    #[error("malformed destination address, err: {0}")]
    MalformedAddress(String),

    #[error(
        "you must wait {} until you can get {} funding again",
        format_duration(round_duration(*.remaining, Duration::from_secs(2))),
        .prefix
    )]
    RateLimited { prefix: String, remaining: Duration },

    #[error("unable to verify funding history, try again later: {0}")]
    RateLimitUnverifiable(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0} worker is not running")]
    WorkerUnavailable(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl FaucetError {
    /// Errors caused by the requester; reported back, never escalated
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            FaucetError::UnsupportedChain(_)
                | FaucetError::MalformedAddress(_)
                | FaucetError::RateLimited { .. }
                | FaucetError::RateLimitUnverifiable(_)
        )
    }

    /// Errors that must stop the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FaucetError::Configuration(_) | FaucetError::WorkerUnavailable(_)
        )
    }
}

impl From<CoinError> for FaucetError {
    fn from(err: CoinError) -> Self {
        FaucetError::Configuration(err.to_string())
    }
}

impl From<DurationError> for FaucetError {
    fn from(err: DurationError) -> Self {
        FaucetError::Configuration(err.to_string())
    }
}

impl From<bincode::Error> for FaucetError {
    fn from(err: bincode::Error) -> Self {
        FaucetError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for FaucetError {
    fn from(err: reqwest::Error) -> Self {
        FaucetError::RpcError(err.to_string())
    }
}

impl IntoResponse for FaucetError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            FaucetError::UnsupportedChain(_) => (StatusCode::BAD_REQUEST, "UNSUPPORTED_CHAIN"),
            FaucetError::MalformedAddress(_) => (StatusCode::BAD_REQUEST, "MALFORMED_ADDRESS"),
            FaucetError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
            FaucetError::RateLimitUnverifiable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "RATE_LIMIT_UNVERIFIABLE")
            }
            FaucetError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            FaucetError::Configuration(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIGURATION_ERROR"),
            FaucetError::TransactionFailed(_) => (StatusCode::BAD_GATEWAY, "TRANSACTION_FAILED"),
            FaucetError::RpcError(_) => (StatusCode::BAD_GATEWAY, "RPC_ERROR"),
            FaucetError::DatabaseError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            FaucetError::WorkerUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "WORKER_UNAVAILABLE"),
            FaucetError::Serialization(_)
            | FaucetError::Notification(_)
            | FaucetError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(json!({
            "error": error_code,
            "message": self.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        }));

        (status, body).into_response()
    }
}

pub type FaucetResult<T> = Result<T, FaucetError>;
