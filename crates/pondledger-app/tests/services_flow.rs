// End-to-end checks of the service layer over an in-memory store and a
// scripted model.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pondledger_app::dialog::DialogError;
use pondledger_app::notifications::ActionRequest;
use pondledger_app::reports::Period;
use pondledger_app::AppServices;
use pondledger_core::config::{config_from_str, CredentialsConfig};
use pondledger_core::ledger::Ledger;
use pondledger_core::model::{Employee, MarkedVia, Project, TransactionKind};
use pondledger_core::protocol::NotificationAction;
use pondledger_core::store::DocumentStore;
use pondledger_llm::client::{CompletionBackend, CompletionRequest, LlmError};
use pondledger_llm::extractor::{APOLOGY_MESSAGE, COMPLETION_MESSAGE};
use pondledger_llm::receipt::ReceiptInput;

// ===========================================================================
// Test helpers
// ===========================================================================

struct ScriptedModel(Mutex<VecDeque<Result<String, LlmError>>>);

#[async_trait]
impl CompletionBackend for ScriptedModel {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
        self.0
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(LlmError::EmptyResponse))
    }
}

fn services(replies: Vec<Result<String, LlmError>>) -> AppServices {
    let settings = include_str!("../../../defaults/settings.toml");
    let config = config_from_str(settings, CredentialsConfig::default()).unwrap();
    let ledger = Ledger::new(Arc::new(DocumentStore::open(":memory:").unwrap()));
    ledger
        .add_project(Project {
            id: String::new(),
            name: "North Block".into(),
        })
        .unwrap();
    AppServices::new(config, ledger, Arc::new(ScriptedModel(Mutex::new(replies.into()))))
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn voice_session_records_transaction_visible_in_report() {
    let svc = services(vec![
        Ok(r#"{"updatedState":{"type":"expense","amount":1800,"title":"Diesel"},"nextQuestion":"Which project is this for?"}"#.into()),
        Err(LlmError::EmptyResponse),
        Ok(format!(
            r#"{{"updatedState":{{"project":"North Block","category":"Fuel"}},"nextQuestion":"{COMPLETION_MESSAGE}"}}"#
        )),
    ]);

    let session = svc.start_session();
    let reply = svc.session_turn(&session.id, "1800 on diesel").await.unwrap();
    assert_eq!(reply.question, "Which project is this for?");

    // A failed turn apologises; the next answer picks up where it left off.
    let reply = svc.session_turn(&session.id, "north block, fuel").await.unwrap();
    assert_eq!(reply.question, APOLOGY_MESSAGE);
    assert_eq!(reply.state.amount, Some(1800.0));

    let reply = svc.session_turn(&session.id, "north block, fuel").await.unwrap();
    assert!(reply.complete);

    let tx = svc.save_session(&session.id).await.unwrap();
    assert_eq!(tx.kind, TransactionKind::Expense);
    assert_eq!(tx.date, svc.today());

    let report = svc.report(Period::month_to_date(svc.today()), None).unwrap();
    assert_eq!(report.summary.total_expense, 1800.0);
    assert_eq!(report.spend_by_category["Fuel"], 1800.0);

    assert!(svc.end_session(&session.id));
    assert!(matches!(
        svc.save_session(&session.id).await,
        Err(DialogError::NotFound { .. })
    ));
}

#[tokio::test]
async fn receipt_failure_returns_empty_details() {
    let svc = services(vec![
        Ok(r#"{"vendor":"Avanti Feeds","total":4500,"category":"FEED","items":[]}"#.into()),
        Err(LlmError::Status {
            status: 529,
            message: "Overloaded".into(),
        }),
    ]);
    let input = ReceiptInput::Text {
        text: "AVANTI FEEDS TOTAL 4500".into(),
    };

    let ok = svc.analyze_receipt(&input).await;
    assert_eq!(ok.error, None);
    assert_eq!(ok.details.category.as_deref(), Some("Feed"));

    let failed = svc.analyze_receipt(&input).await;
    assert_eq!(failed.details.vendor, None);
    assert_eq!(
        failed.error.as_deref(),
        Some("API returned status 529: Overloaded")
    );
}

#[tokio::test]
async fn reminder_action_marks_attendance() {
    let svc = services(vec![]);
    let worker = svc
        .ledger
        .add_employee(Employee {
            id: String::new(),
            name: "Ravi".into(),
            role: Some("Feeder".into()),
            daily_wage: Some(450.0),
        })
        .unwrap();
    let today = svc.today();

    let reminders = svc.reminders(today).unwrap();
    assert_eq!(reminders.len(), 1);

    svc.apply_notification_action(&ActionRequest {
        action: NotificationAction::MarkFullDay,
        employee_id: worker.id.clone(),
        date: today,
    })
    .unwrap();

    assert!(svc.reminders(today).unwrap().is_empty());
    let marks = svc.ledger.attendance_on(today).unwrap();
    assert_eq!(marks[0].marked_via, MarkedVia::Notification);
}
