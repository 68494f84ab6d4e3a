// Conversational transaction entry.
//
// `/assist/extract` is a single stateless turn: the client sends the state
// it holds and gets the merged state back. The session endpoints keep that
// state server-side and save the finished record into the ledger.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use pondledger_app::dialog::{DialogReply, DialogSession};
use pondledger_core::model::Transaction;
use pondledger_llm::extractor::{ExtractionRequest, ExtractionTurn};

use super::{ApiError, ApiResult};
use crate::AppState;

/// POST /api/assist/extract
///
/// Empty project or category lists are filled from the ledger and config.
pub async fn extract(
    State(state): State<AppState>,
    Json(mut request): Json<ExtractionRequest>,
) -> ApiResult<Json<ExtractionTurn>> {
    if request.utterance.trim().is_empty() {
        return Err(ApiError::BadRequest("utterance is required".into()));
    }
    let services = &state.services;
    if request.projects.is_empty() || request.categories.is_empty() {
        let ctx = services.turn_context()?;
        if request.projects.is_empty() {
            request.projects = ctx.projects;
        }
        if request.categories.is_empty() {
            request.categories = ctx.categories;
        }
    }
    Ok(Json(services.extract(&request).await?))
}

/// POST /api/assist/sessions
pub async fn start_session(State(state): State<AppState>) -> (StatusCode, Json<DialogSession>) {
    (StatusCode::CREATED, Json(state.services.start_session()))
}

/// GET /api/assist/sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DialogSession>> {
    state
        .services
        .session(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("session {id}")))
}

/// DELETE /api/assist/sessions/:id
pub async fn end_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.services.end_session(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("session {id}")))
    }
}

#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub utterance: String,
}

/// POST /api/assist/sessions/:id/turn
///
/// Model failures do not fail the request: the reply carries the apology
/// and the session is unchanged.
pub async fn turn(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TurnRequest>,
) -> ApiResult<Json<DialogReply>> {
    if req.utterance.trim().is_empty() {
        return Err(ApiError::BadRequest("utterance is required".into()));
    }
    Ok(Json(state.services.session_turn(&id, &req.utterance).await?))
}

/// POST /api/assist/sessions/:id/save
pub async fn save(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Transaction>)> {
    Ok((StatusCode::CREATED, Json(state.services.save_session(&id).await?)))
}
