// Transactions and projects.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing::warn;

use pondledger_core::analytics::TransactionFilter;
use pondledger_core::model::{Project, Transaction};

use super::{ApiError, ApiResult};
use crate::AppState;

fn check_amount(tx: &Transaction) -> ApiResult<()> {
    if !tx.amount.is_finite() || tx.amount <= 0.0 {
        return Err(ApiError::BadRequest(format!(
            "amount must be a positive number, got {}",
            tx.amount
        )));
    }
    Ok(())
}

/// GET /api/transactions
///
/// Newest first. Query parameters narrow the list: `projectId`, `category`,
/// `status`, `kind`, `from`, `to`.
pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<TransactionFilter>,
) -> Json<Vec<Transaction>> {
    match state.services.ledger.list_transactions() {
        Ok(txs) => Json(filter.apply(&txs).into_iter().cloned().collect()),
        Err(e) => {
            warn!("failed to list transactions: {e}");
            Json(Vec::new())
        }
    }
}

/// POST /api/transactions
pub async fn create(
    State(state): State<AppState>,
    Json(mut tx): Json<Transaction>,
) -> ApiResult<(StatusCode, Json<Transaction>)> {
    check_amount(&tx)?;
    tx.id.clear();
    let tx = state.services.ledger.add_transaction(tx)?;
    Ok((StatusCode::CREATED, Json(tx)))
}

/// GET /api/transactions/:id
pub async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Transaction>> {
    state
        .services
        .ledger
        .get_transaction(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("transaction {id}")))
}

/// PUT /api/transactions/:id
pub async fn replace(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(tx): Json<Transaction>,
) -> ApiResult<Json<Transaction>> {
    check_amount(&tx)?;
    Ok(Json(state.services.ledger.replace_transaction(&id, tx)?))
}

/// DELETE /api/transactions/:id
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.services.ledger.delete_transaction(&id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("transaction {id}")))
    }
}

/// GET /api/projects
pub async fn list_projects(State(state): State<AppState>) -> Json<Vec<Project>> {
    match state.services.ledger.list_projects() {
        Ok(projects) => Json(projects),
        Err(e) => {
            warn!("failed to list projects: {e}");
            Json(Vec::new())
        }
    }
}

/// POST /api/projects
///
/// Names must be non-empty and unique ignoring case, since dialogs resolve
/// projects by name.
pub async fn create_project(
    State(state): State<AppState>,
    Json(mut project): Json<Project>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    project.name = project.name.trim().to_string();
    if project.name.is_empty() {
        return Err(ApiError::BadRequest("project name is required".into()));
    }
    let ledger = &state.services.ledger;
    if ledger.find_project_by_name(&project.name)?.is_some() {
        return Err(ApiError::BadRequest(format!(
            "project '{}' already exists",
            project.name
        )));
    }
    project.id.clear();
    Ok((StatusCode::CREATED, Json(ledger.add_project(project)?)))
}

/// PUT /api/projects/:id
///
/// Renaming onto another project's name is refused.
pub async fn replace_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut project): Json<Project>,
) -> ApiResult<Json<Project>> {
    project.name = project.name.trim().to_string();
    if project.name.is_empty() {
        return Err(ApiError::BadRequest("project name is required".into()));
    }
    let ledger = &state.services.ledger;
    if let Some(existing) = ledger.find_project_by_name(&project.name)? {
        if existing.id != id {
            return Err(ApiError::BadRequest(format!(
                "project '{}' already exists",
                project.name
            )));
        }
    }
    Ok(Json(ledger.replace_project(&id, project)?))
}

/// DELETE /api/projects/:id
///
/// Transactions and budgets that reference the project are left as they are.
pub async fn remove_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.services.ledger.delete_project(&id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("project {id}")))
    }
}
