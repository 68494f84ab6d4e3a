// Ponds, inventory and the activity log, per farm profile. The `legacy`
// profile addresses the old shared farming root.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use pondledger_core::farming::{self, PondMetrics};
use pondledger_core::model::{InventoryItem, Pond, PondActivity};
use pondledger_core::paths::FarmScope;

use super::{ApiError, ApiResult};
use crate::AppState;

fn scope(profile: &str) -> ApiResult<FarmScope> {
    FarmScope::from_profile(profile).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// GET /api/farms/:profile/ponds
pub async fn list_ponds(
    State(state): State<AppState>,
    Path(profile): Path<String>,
) -> ApiResult<Json<Vec<Pond>>> {
    let scope = scope(&profile)?;
    Ok(Json(state.services.ledger.list_ponds(&scope)?))
}

/// POST /api/farms/:profile/ponds
pub async fn create_pond(
    State(state): State<AppState>,
    Path(profile): Path<String>,
    Json(mut pond): Json<Pond>,
) -> ApiResult<(StatusCode, Json<Pond>)> {
    let scope = scope(&profile)?;
    if pond.name.trim().is_empty() {
        return Err(ApiError::BadRequest("pond name is required".into()));
    }
    pond.id.clear();
    Ok((StatusCode::CREATED, Json(state.services.ledger.add_pond(&scope, pond)?)))
}

/// GET /api/farms/:profile/ponds/:id/metrics
///
/// Days of culture run to the last harvest, or to today while stocked.
pub async fn pond_metrics(
    State(state): State<AppState>,
    Path((profile, id)): Path<(String, String)>,
) -> ApiResult<Json<PondMetrics>> {
    let scope = scope(&profile)?;
    let ledger = &state.services.ledger;
    let pond = ledger
        .get_pond(&scope, &id)?
        .ok_or_else(|| ApiError::NotFound(format!("pond {id}")))?;
    let activities = ledger.list_activities(&scope, Some(&id))?;
    Ok(Json(farming::pond_metrics(
        &pond,
        &activities,
        state.services.today(),
    )))
}

/// GET /api/farms/:profile/inventory
pub async fn list_inventory(
    State(state): State<AppState>,
    Path(profile): Path<String>,
) -> ApiResult<Json<Vec<InventoryItem>>> {
    let scope = scope(&profile)?;
    Ok(Json(state.services.ledger.list_inventory(&scope)?))
}

/// POST /api/farms/:profile/inventory
pub async fn create_inventory_item(
    State(state): State<AppState>,
    Path(profile): Path<String>,
    Json(mut item): Json<InventoryItem>,
) -> ApiResult<(StatusCode, Json<InventoryItem>)> {
    let scope = scope(&profile)?;
    if item.name.trim().is_empty() || item.unit.trim().is_empty() {
        return Err(ApiError::BadRequest("item name and unit are required".into()));
    }
    item.id.clear();
    Ok((
        StatusCode::CREATED,
        Json(state.services.ledger.add_inventory_item(&scope, item)?),
    ))
}

/// GET /api/farms/:profile/inventory/low-stock
pub async fn low_stock(
    State(state): State<AppState>,
    Path(profile): Path<String>,
) -> ApiResult<Json<Vec<InventoryItem>>> {
    let scope = scope(&profile)?;
    let items = state.services.ledger.list_inventory(&scope)?;
    Ok(Json(farming::low_stock(&items).into_iter().cloned().collect()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityQuery {
    pub pond_id: Option<String>,
}

/// GET /api/farms/:profile/activities
pub async fn list_activities(
    State(state): State<AppState>,
    Path(profile): Path<String>,
    Query(query): Query<ActivityQuery>,
) -> ApiResult<Json<Vec<PondActivity>>> {
    let scope = scope(&profile)?;
    Ok(Json(
        state
            .services
            .ledger
            .list_activities(&scope, query.pond_id.as_deref())?,
    ))
}

/// POST /api/farms/:profile/activities
///
/// A feeding that names an inventory item draws its stock down.
pub async fn create_activity(
    State(state): State<AppState>,
    Path(profile): Path<String>,
    Json(mut activity): Json<PondActivity>,
) -> ApiResult<(StatusCode, Json<PondActivity>)> {
    let scope = scope(&profile)?;
    let ledger = &state.services.ledger;
    if ledger.get_pond(&scope, &activity.pond_id)?.is_none() {
        return Err(ApiError::NotFound(format!("pond {}", activity.pond_id)));
    }
    activity.id.clear();
    Ok((
        StatusCode::CREATED,
        Json(ledger.add_activity(&scope, activity)?),
    ))
}
