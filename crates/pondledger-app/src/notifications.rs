// Attendance reminders and the actions they carry.
//
// A reminder is raised for each employee with no mark on a given day. Acting
// on one writes the attendance record directly, tagged as marked from a
// notification.

use std::time::Duration;

use chrono::{Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use pondledger_core::attendance;
use pondledger_core::ledger::{Ledger, LedgerResult};
use pondledger_core::model::{AttendanceRecord, AttendanceStatus, MarkedVia};
use pondledger_core::protocol::{LiveMessage, Notification, NotificationAction};

/// An action taken on a reminder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub action: NotificationAction,
    pub employee_id: String,
    pub date: NaiveDate,
}

pub fn action_status(action: NotificationAction) -> AttendanceStatus {
    match action {
        NotificationAction::MarkFullDay => AttendanceStatus::FullDay,
        NotificationAction::MarkHalfDay => AttendanceStatus::HalfDay,
        NotificationAction::MarkAbsent => AttendanceStatus::Absent,
    }
}

/// One reminder per employee still unmarked on `date`.
pub fn attendance_reminders(ledger: &Ledger, date: NaiveDate) -> LedgerResult<Vec<Notification>> {
    let employees = ledger.list_employees()?;
    let marks = ledger.attendance_on(date)?;

    Ok(attendance::unmarked(&employees, &marks)
        .into_iter()
        .map(|e| Notification {
            title: "Attendance".to_string(),
            body: format!("Mark attendance for {} on {}", e.name, date.format("%d %b %Y")),
            employee_id: Some(e.id.clone()),
            date: Some(date),
            actions: vec![
                NotificationAction::MarkFullDay,
                NotificationAction::MarkHalfDay,
                NotificationAction::MarkAbsent,
            ],
        })
        .collect())
}

/// Write the attendance mark an action asks for.
pub fn apply_action(ledger: &Ledger, request: &ActionRequest) -> LedgerResult<AttendanceRecord> {
    let record = AttendanceRecord {
        employee_id: request.employee_id.clone(),
        date: request.date,
        status: action_status(request.action),
        marked_via: MarkedVia::Notification,
        marked_at: Some(Utc::now()),
    };
    ledger.mark_attendance(&record)?;
    Ok(record)
}

/// Push today's reminders to live subscribers. Returns how many were sent.
pub fn publish_reminders(
    ledger: &Ledger,
    live: &broadcast::Sender<LiveMessage>,
    date: NaiveDate,
) -> LedgerResult<usize> {
    let reminders = attendance_reminders(ledger, date)?;
    let count = reminders.len();
    for n in reminders {
        // Send only fails when nobody is listening.
        let _ = live.send(LiveMessage::Notification(n));
    }
    if count > 0 {
        info!(count, %date, "attendance reminders published");
    }
    Ok(count)
}

/// Publish reminders for the local date every `interval`, forever.
pub async fn run_reminder_loop(
    ledger: Ledger,
    live: broadcast::Sender<LiveMessage>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if live.receiver_count() == 0 {
            debug!("no live clients, skipping reminders");
            continue;
        }
        if let Err(e) = publish_reminders(&ledger, &live, Local::now().date_naive()) {
            warn!("failed to publish reminders: {e}");
        }
    }
}
