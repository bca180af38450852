//! Surface error type of the marketplace agent.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::store::StoreError;
use punks_ark::{ArkClientError, TxTemplateError};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("deposit unverified: {0}")]
    DepositUnverified(String),
    #[error("insufficient funds: need {needed} sats, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },
    #[error("upstream failure: {0}")]
    UpstreamFailure(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            Error::DepositUnverified(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            Error::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Error::Internal(e.to_string())
    }
}

impl From<ArkClientError> for Error {
    fn from(e: ArkClientError) -> Self {
        Error::UpstreamFailure(e.to_string())
    }
}

impl From<TxTemplateError> for Error {
    fn from(e: TxTemplateError) -> Self {
        match e {
            TxTemplateError::NotListed => Error::PreconditionFailed("punk is not listed".into()),
            TxTemplateError::InsufficientFunds { needed, available } => {
                Error::InsufficientFunds { needed, available }
            }
            TxTemplateError::InvalidOutpoint(op) => {
                Error::InvalidArgument(format!("invalid outpoint: {op}"))
            }
            TxTemplateError::Script(e) => Error::Internal(e.to_string()),
            TxTemplateError::Client(e) => Error::UpstreamFailure(e.to_string()),
        }
    }
}

impl From<punks_core::CodecError> for Error {
    fn from(e: punks_core::CodecError) -> Self {
        Error::InvalidArgument(e.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_the_documented_statuses() {
        assert_eq!(Error::InvalidArgument(String::new()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::NotFound(String::new()).status(), StatusCode::NOT_FOUND);
        assert_eq!(Error::Conflict(String::new()).status(), StatusCode::CONFLICT);
        assert_eq!(Error::Forbidden(String::new()).status(), StatusCode::FORBIDDEN);
        assert_eq!(
            Error::PreconditionFailed(String::new()).status(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            Error::DepositUnverified(String::new()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            Error::InsufficientFunds { needed: 1, available: 0 }.status(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            Error::UpstreamFailure(String::new()).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
