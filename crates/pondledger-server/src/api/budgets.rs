// Budgets and budget-vs-actual.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::warn;

use pondledger_core::analytics::{self, BudgetComparison, TransactionFilter};
use pondledger_core::model::Budget;

use super::{ApiError, ApiResult};
use crate::AppState;

fn check_budget(budget: &Budget) -> ApiResult<()> {
    if budget.category.trim().is_empty() {
        return Err(ApiError::BadRequest("budget category is required".into()));
    }
    if !budget.amount.is_finite() || budget.amount < 0.0 {
        return Err(ApiError::BadRequest(format!(
            "budget amount must not be negative, got {}",
            budget.amount
        )));
    }
    Ok(())
}

/// GET /api/budgets
pub async fn list(State(state): State<AppState>) -> Json<Vec<Budget>> {
    match state.services.ledger.list_budgets() {
        Ok(budgets) => Json(budgets),
        Err(e) => {
            warn!("failed to list budgets: {e}");
            Json(Vec::new())
        }
    }
}

/// POST /api/budgets
pub async fn create(
    State(state): State<AppState>,
    Json(mut budget): Json<Budget>,
) -> ApiResult<(StatusCode, Json<Budget>)> {
    check_budget(&budget)?;
    budget.id.clear();
    Ok((StatusCode::CREATED, Json(state.services.ledger.add_budget(budget)?)))
}

/// GET /api/budgets/:id
pub async fn fetch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Budget>> {
    state
        .services
        .ledger
        .get_budget(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("budget {id}")))
}

/// PUT /api/budgets/:id
pub async fn replace(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(budget): Json<Budget>,
) -> ApiResult<Json<Budget>> {
    check_budget(&budget)?;
    Ok(Json(state.services.ledger.replace_budget(&id, budget)?))
}

/// DELETE /api/budgets/:id
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.services.ledger.delete_budget(&id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("budget {id}")))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonQuery {
    pub project_id: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// GET /api/budgets/comparison
///
/// Every budget (or one project's) against actual spend. Without `from` and
/// `to` all transactions count.
pub async fn comparison(
    State(state): State<AppState>,
    Query(query): Query<ComparisonQuery>,
) -> ApiResult<Json<Vec<BudgetComparison>>> {
    let ledger = &state.services.ledger;

    let mut budgets = ledger.list_budgets()?;
    if let Some(project_id) = query.project_id.as_deref() {
        budgets.retain(|b| b.project_id.as_deref() == Some(project_id));
    }

    let filter = TransactionFilter {
        from: query.from,
        to: query.to,
        ..Default::default()
    };
    let txs = ledger.list_transactions()?;
    let in_range: Vec<_> = filter.apply(&txs).into_iter().cloned().collect();

    Ok(Json(analytics::budget_comparison(&budgets, &in_range)))
}
