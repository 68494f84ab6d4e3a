// Period reports, CSV export and model-written insights.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;

use pondledger_app::reports::{Period, Report};
use pondledger_core::model::Insight;

use super::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub project_id: Option<String>,
}

fn period(from: Option<NaiveDate>, to: Option<NaiveDate>, today: NaiveDate) -> ApiResult<Period> {
    let period = Period::resolve(from, to, today);
    if period.from > period.to {
        return Err(ApiError::BadRequest(format!(
            "period starts after it ends: {} > {}",
            period.from, period.to
        )));
    }
    Ok(period)
}

/// GET /api/reports
pub async fn report(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Json<Report>> {
    let services = &state.services;
    let period = period(query.from, query.to, services.today())?;
    Ok(Json(services.report(period, query.project_id.as_deref())?))
}

/// GET /api/reports/transactions.csv
pub async fn transactions_csv(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<impl IntoResponse> {
    let services = &state.services;
    let period = period(query.from, query.to, services.today())?;
    let csv = services.export_csv(period, query.project_id.as_deref())?;
    let filename = format!(
        "attachment; filename=\"transactions-{}-{}.csv\"",
        period.from, period.to
    );
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, filename),
        ],
        csv,
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightRequest {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub project_id: Option<String>,
    pub question: Option<String>,
}

/// POST /api/insights
///
/// Returns the pending record at once. Text streams to live-feed clients as
/// `insightToken` messages; poll `GET /api/insights/:id` for the result.
pub async fn start_insight(
    State(state): State<AppState>,
    Json(req): Json<InsightRequest>,
) -> ApiResult<(StatusCode, Json<Insight>)> {
    let services = &state.services;
    let period = period(req.from, req.to, services.today())?;
    let question = req.question.as_deref().map(str::trim).filter(|q| !q.is_empty());
    let insight = services.start_insight(period, req.project_id.as_deref(), question)?;
    Ok((StatusCode::ACCEPTED, Json(insight)))
}

/// GET /api/insights/:id
pub async fn get_insight(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Insight>> {
    state
        .services
        .ledger
        .get_insight(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("insight {id}")))
}
