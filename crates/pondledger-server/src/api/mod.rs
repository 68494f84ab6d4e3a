// HTTP API handlers, one module per resource.

use axum::routing::{get, post, put};
use axum::Router;

use crate::AppState;

pub mod analyze;
pub mod assist;
pub mod attendance;
pub mod budgets;
pub mod error;
pub mod farms;
pub mod health;
pub mod reports;
pub mod transactions;

pub use error::{ApiError, ApiResult};

/// All API routes, relative to the `/api` prefix.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/profile", get(health::profile))
        // Ledger
        .route(
            "/transactions",
            get(transactions::list).post(transactions::create),
        )
        .route(
            "/transactions/:id",
            get(transactions::fetch)
                .put(transactions::replace)
                .delete(transactions::remove),
        )
        .route("/budgets", get(budgets::list).post(budgets::create))
        .route("/budgets/comparison", get(budgets::comparison))
        .route(
            "/budgets/:id",
            get(budgets::fetch)
                .put(budgets::replace)
                .delete(budgets::remove),
        )
        .route(
            "/projects",
            get(transactions::list_projects).post(transactions::create_project),
        )
        .route(
            "/projects/:id",
            put(transactions::replace_project).delete(transactions::remove_project),
        )
        // People
        .route(
            "/employees",
            get(attendance::list_employees).post(attendance::create_employee),
        )
        .route(
            "/employees/:id",
            get(attendance::fetch_employee)
                .put(attendance::replace_employee)
                .delete(attendance::remove_employee),
        )
        .route("/attendance/summary", get(attendance::summary))
        .route("/attendance/reminders/:date", get(attendance::reminders))
        .route("/attendance/:date", get(attendance::day))
        .route("/attendance/:date/:employee_id", put(attendance::mark))
        .route("/notifications/action", post(attendance::notification_action))
        // Farms
        .route(
            "/farms/:profile/ponds",
            get(farms::list_ponds).post(farms::create_pond),
        )
        .route("/farms/:profile/ponds/:id/metrics", get(farms::pond_metrics))
        .route(
            "/farms/:profile/inventory",
            get(farms::list_inventory).post(farms::create_inventory_item),
        )
        .route("/farms/:profile/inventory/low-stock", get(farms::low_stock))
        .route(
            "/farms/:profile/activities",
            get(farms::list_activities).post(farms::create_activity),
        )
        // Model-backed
        .route("/assist/extract", post(assist::extract))
        .route("/assist/sessions", post(assist::start_session))
        .route(
            "/assist/sessions/:id",
            get(assist::get_session).delete(assist::end_session),
        )
        .route("/assist/sessions/:id/turn", post(assist::turn))
        .route("/assist/sessions/:id/save", post(assist::save))
        .route("/analyze/receipt", post(analyze::receipt))
        .route("/reports", get(reports::report))
        .route("/reports/transactions.csv", get(reports::transactions_csv))
        .route("/insights", post(reports::start_insight))
        .route("/insights/:id", get(reports::get_insight))
}
