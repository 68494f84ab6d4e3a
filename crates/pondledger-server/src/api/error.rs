// HTTP error type. Every failure becomes a status code plus a JSON body of
// the form `{"error": "..."}`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use pondledger_app::dialog::DialogError;
use pondledger_core::ledger::LedgerError;
use pondledger_llm::client::LlmError;
use pondledger_llm::extractor::ExtractionError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Dialog(#[from] DialogError),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

fn ledger_status(e: &LedgerError) -> StatusCode {
    match e {
        LedgerError::InvalidPath(_) => StatusCode::BAD_REQUEST,
        LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
        LedgerError::Malformed { .. } | LedgerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Ledger(e) => ledger_status(e),
            ApiError::Dialog(e) => match e {
                DialogError::NotFound { .. } => StatusCode::NOT_FOUND,
                DialogError::Incomplete { .. }
                | DialogError::UnknownProject { .. }
                | DialogError::UnknownCategory { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                DialogError::AlreadySaved { .. } => StatusCode::CONFLICT,
                DialogError::Ledger(e) => ledger_status(e),
            },
            ApiError::Extraction(ExtractionError::Llm(LlmError::Disabled)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Extraction(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(format!("{e:#}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        if status.is_server_error() {
            warn!(%status, "request failed: {message}");
        }

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
