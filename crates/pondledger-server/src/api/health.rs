// Liveness and the active profile.

use axum::{extract::State, Json};
use serde::Serialize;

use pondledger_core::model::Category;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
}

/// GET /api/health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "pondledger".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub user: String,
    pub farm_profile: String,
    pub currency: String,
    pub categories: Vec<Category>,
}

/// GET /api/profile
///
/// The user, farm profile and currency every client screen is rendered in.
pub async fn profile(State(state): State<AppState>) -> Json<ProfileResponse> {
    let config = &state.services.config;
    Json(ProfileResponse {
        user: config.profile.user.clone(),
        farm_profile: config.profile.farm_profile.clone(),
        currency: config.profile.currency.clone(),
        categories: config.categories.clone(),
    })
}
