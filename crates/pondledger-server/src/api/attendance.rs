// Employees, daily attendance marks, and reminder actions.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use tracing::warn;

use pondledger_app::notifications::ActionRequest;
use pondledger_app::reports::Period;
use pondledger_core::attendance::{self, EmployeeAttendance};
use pondledger_core::model::{AttendanceRecord, AttendanceStatus, Employee, MarkedVia};
use pondledger_core::protocol::Notification;

use super::{ApiError, ApiResult};
use crate::AppState;

/// GET /api/employees
pub async fn list_employees(State(state): State<AppState>) -> Json<Vec<Employee>> {
    match state.services.ledger.list_employees() {
        Ok(employees) => Json(employees),
        Err(e) => {
            warn!("failed to list employees: {e}");
            Json(Vec::new())
        }
    }
}

/// POST /api/employees
pub async fn create_employee(
    State(state): State<AppState>,
    Json(mut employee): Json<Employee>,
) -> ApiResult<(StatusCode, Json<Employee>)> {
    check_employee(&mut employee)?;
    employee.id.clear();
    Ok((
        StatusCode::CREATED,
        Json(state.services.ledger.add_employee(employee)?),
    ))
}

fn check_employee(employee: &mut Employee) -> ApiResult<()> {
    employee.name = employee.name.trim().to_string();
    if employee.name.is_empty() {
        return Err(ApiError::BadRequest("employee name is required".into()));
    }
    if employee.daily_wage.is_some_and(|w| w < 0.0) {
        return Err(ApiError::BadRequest("daily wage must not be negative".into()));
    }
    Ok(())
}

/// GET /api/employees/:id
pub async fn fetch_employee(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Employee>> {
    state
        .services
        .ledger
        .get_employee(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("employee {id}")))
}

/// PUT /api/employees/:id
pub async fn replace_employee(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut employee): Json<Employee>,
) -> ApiResult<Json<Employee>> {
    check_employee(&mut employee)?;
    Ok(Json(state.services.ledger.replace_employee(&id, employee)?))
}

/// DELETE /api/employees/:id
///
/// Past attendance marks are kept.
pub async fn remove_employee(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.services.ledger.delete_employee(&id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("employee {id}")))
    }
}

/// GET /api/attendance/:date
pub async fn day(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
) -> ApiResult<Json<Vec<AttendanceRecord>>> {
    Ok(Json(state.services.ledger.attendance_on(date)?))
}

#[derive(Debug, Deserialize)]
pub struct MarkRequest {
    pub status: AttendanceStatus,
}

/// PUT /api/attendance/:date/:employee_id
///
/// Overwrites any earlier mark for that employee and day.
pub async fn mark(
    State(state): State<AppState>,
    Path((date, employee_id)): Path<(NaiveDate, String)>,
    Json(req): Json<MarkRequest>,
) -> ApiResult<Json<AttendanceRecord>> {
    let ledger = &state.services.ledger;
    if ledger.get_employee(&employee_id)?.is_none() {
        return Err(ApiError::NotFound(format!("employee {employee_id}")));
    }

    let record = AttendanceRecord {
        employee_id,
        date,
        status: req.status,
        marked_via: MarkedVia::App,
        marked_at: Some(Utc::now()),
    };
    ledger.mark_attendance(&record)?;
    Ok(Json(record))
}

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

/// GET /api/attendance/summary
///
/// Days worked and wages due per employee. Defaults to month to date.
pub async fn summary(
    State(state): State<AppState>,
    Query(range): Query<RangeQuery>,
) -> ApiResult<Json<Vec<EmployeeAttendance>>> {
    let services = &state.services;
    let period = Period::resolve(range.from, range.to, services.today());
    if period.from > period.to {
        return Err(ApiError::BadRequest(format!(
            "range starts after it ends: {} > {}",
            period.from, period.to
        )));
    }

    let employees = services.ledger.list_employees()?;
    let marks = services.ledger.attendance_between(period.from, period.to)?;
    Ok(Json(attendance::summarize(&employees, &marks)))
}

/// GET /api/attendance/reminders/:date
pub async fn reminders(
    State(state): State<AppState>,
    Path(date): Path<NaiveDate>,
) -> ApiResult<Json<Vec<Notification>>> {
    Ok(Json(state.services.reminders(date)?))
}

/// POST /api/notifications/action
pub async fn notification_action(
    State(state): State<AppState>,
    Json(req): Json<ActionRequest>,
) -> ApiResult<Json<AttendanceRecord>> {
    let services = &state.services;
    if services.ledger.get_employee(&req.employee_id)?.is_none() {
        return Err(ApiError::NotFound(format!("employee {}", req.employee_id)));
    }
    Ok(Json(services.apply_notification_action(&req)?))
}
