// Receipt reading.

use axum::{extract::State, Json};

use pondledger_llm::receipt::{ReceiptAnalysis, ReceiptInput};

use super::{ApiError, ApiResult};
use crate::AppState;

/// POST /api/analyze/receipt
///
/// Always 200 once the input is accepted. When the model fails the details
/// are empty and `error` says why, so the client can fall back to manual
/// entry.
pub async fn receipt(
    State(state): State<AppState>,
    Json(input): Json<ReceiptInput>,
) -> ApiResult<Json<ReceiptAnalysis>> {
    let empty = match &input {
        ReceiptInput::Text { text } => text.trim().is_empty(),
        ReceiptInput::Image { data_base64, .. } => data_base64.is_empty(),
    };
    if empty {
        return Err(ApiError::BadRequest("receipt input is empty".into()));
    }
    Ok(Json(state.services.analyze_receipt(&input).await))
}
