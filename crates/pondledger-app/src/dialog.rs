// Voice-dialog sessions for recording a transaction by conversation.
//
// A session holds the partially filled record and the questions asked so
// far. Each utterance runs one extraction turn; a failed turn answers with
// the apology message and leaves the session untouched so the same question
// can simply be answered again. Sessions live in memory only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use pondledger_core::ledger::{Ledger, LedgerError};
use pondledger_core::model::{Category, Transaction, TransactionKind};
use pondledger_llm::extractor::{
    ExtractionRequest, NextStep, PartialTransaction, TransactionExtractor, APOLOGY_MESSAGE,
    COMPLETION_MESSAGE,
};

/// First question of every session.
pub const OPENING_QUESTION: &str = "What would you like to record?";

#[derive(Debug, Error)]
pub enum DialogError {
    #[error("no dialog session {id}")]
    NotFound { id: String },

    #[error("transaction is missing: {missing}")]
    Incomplete { missing: String },

    #[error("unknown project '{name}'")]
    UnknownProject { name: String },

    #[error("unknown category '{name}'")]
    UnknownCategory { name: String },

    #[error("session already saved as transaction {transaction_id}")]
    AlreadySaved { transaction_id: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Names the model may choose from, plus the date relative phrases resolve
/// against.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub projects: Vec<String>,
    pub categories: Vec<String>,
    pub today: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogSession {
    pub id: String,
    pub state: PartialTransaction,
    pub questions: Vec<String>,
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_transaction_id: Option<String>,
}

/// What the user hears back after a turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogReply {
    pub session_id: String,
    pub question: String,
    pub complete: bool,
    pub state: PartialTransaction,
}

impl DialogSession {
    pub fn new(id: String) -> Self {
        Self {
            id,
            state: PartialTransaction::default(),
            questions: vec![OPENING_QUESTION.to_string()],
            complete: false,
            saved_transaction_id: None,
        }
    }

    fn reply(&self, question: &str) -> DialogReply {
        DialogReply {
            session_id: self.id.clone(),
            question: question.to_string(),
            complete: self.complete,
            state: self.state.clone(),
        }
    }

    /// Run one turn for `utterance`.
    pub async fn respond(
        &mut self,
        extractor: &TransactionExtractor,
        ctx: &TurnContext,
        utterance: &str,
    ) -> DialogReply {
        let request = ExtractionRequest {
            state: self.state.clone(),
            projects: ctx.projects.clone(),
            categories: ctx.categories.clone(),
            utterance: utterance.to_string(),
            previous_questions: self.questions.clone(),
        };

        let turn = match extractor.extract(&request, ctx.today).await {
            Ok(turn) => turn,
            Err(e) => {
                warn!(session = %self.id, "extraction turn failed: {e}");
                return self.reply(APOLOGY_MESSAGE);
            }
        };

        self.state = turn.state.clone();
        match turn.next_step() {
            NextStep::Complete => {
                self.complete = true;
                info!(session = %self.id, "dialog complete");
                self.reply(COMPLETION_MESSAGE)
            }
            NextStep::Ask(question) => {
                self.complete = false;
                debug!(session = %self.id, %question, "asking");
                self.questions.push(question.clone());
                self.reply(&question)
            }
        }
    }

    /// Build the ledger transaction for a complete session. The project name
    /// must match an existing project and the category a configured one
    /// (both case-insensitively); stored names use the canonical spelling.
    pub fn to_transaction(
        &self,
        ledger: &Ledger,
        categories: &[Category],
        today: NaiveDate,
    ) -> Result<Transaction, DialogError> {
        let missing = self.state.missing_fields();
        if !missing.is_empty() {
            let names: Vec<String> = missing.iter().map(|f| format!("{f:?}").to_lowercase()).collect();
            return Err(DialogError::Incomplete {
                missing: names.join(", "),
            });
        }

        let s = &self.state;
        let project_name = s.project.clone().unwrap_or_default();
        let project = ledger
            .find_project_by_name(&project_name)?
            .ok_or(DialogError::UnknownProject { name: project_name })?;

        let category = match s.category.as_deref() {
            Some(name) => Some(
                categories
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(name.trim()))
                    .map(|c| c.name.clone())
                    .ok_or_else(|| DialogError::UnknownCategory {
                        name: name.to_string(),
                    })?,
            ),
            None => None,
        };

        let date = s.date.unwrap_or(today);
        let amount = s.amount.unwrap_or_default();
        let mut tx = match s.kind.unwrap_or_default() {
            TransactionKind::Expense => Transaction::expense(date, amount),
            TransactionKind::Income => Transaction::income(date, amount),
        };
        tx.status = s.status.unwrap_or_default();
        tx.title = s.title.clone();
        tx.category = category;
        tx.project_id = Some(project.id);
        tx.vendor = s.vendor.clone();
        tx.description = s.description.clone();
        Ok(tx)
    }
}

/// One open session plus the gate that serializes its turns and saves.
struct Slot {
    session: DialogSession,
    turn: Arc<AsyncMutex<()>>,
}

/// In-memory registry of open sessions.
///
/// The map lock is never held across the model call. Work on one session
/// (a turn or a save) holds that session's gate instead, so turns on the same
/// session run one after another and a save sees the latest state.
#[derive(Default)]
pub struct DialogSessions {
    sessions: Mutex<HashMap<String, Slot>>,
}

impl DialogSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) -> DialogSession {
        let session = DialogSession::new(uuid::Uuid::new_v4().to_string());
        self.lock().insert(
            session.id.clone(),
            Slot {
                session: session.clone(),
                turn: Arc::new(AsyncMutex::new(())),
            },
        );
        info!(session = %session.id, "dialog started");
        session
    }

    pub fn get(&self, id: &str) -> Option<DialogSession> {
        self.lock().get(id).map(|slot| slot.session.clone())
    }

    /// Drop session `id`. A turn still running on it finishes without
    /// bringing it back.
    pub fn end(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Run one turn on session `id`. Fails with `NotFound` if the session is
    /// unknown or was ended while the turn ran.
    pub async fn respond(
        &self,
        id: &str,
        extractor: &TransactionExtractor,
        ctx: &TurnContext,
        utterance: &str,
    ) -> Result<DialogReply, DialogError> {
        let gate = self.gate(id)?;
        let _turn = gate.lock().await;

        let mut session = self.get(id).ok_or_else(|| DialogError::NotFound { id: id.into() })?;
        let reply = session.respond(extractor, ctx, utterance).await;

        match self.lock().get_mut(id) {
            Some(slot) if Arc::ptr_eq(&slot.turn, &gate) => {
                slot.session.state = session.state;
                slot.session.questions = session.questions;
                slot.session.complete = session.complete;
            }
            _ => {
                debug!(session = id, "session ended during turn");
                return Err(DialogError::NotFound { id: id.into() });
            }
        }
        Ok(reply)
    }

    /// Write the session's transaction to the ledger. A session is saved at
    /// most once; later calls fail with `AlreadySaved`.
    pub async fn save(
        &self,
        id: &str,
        ledger: &Ledger,
        categories: &[Category],
        today: NaiveDate,
    ) -> Result<Transaction, DialogError> {
        let gate = self.gate(id)?;
        let _turn = gate.lock().await;

        let session = self.get(id).ok_or_else(|| DialogError::NotFound { id: id.into() })?;
        if let Some(transaction_id) = session.saved_transaction_id {
            return Err(DialogError::AlreadySaved { transaction_id });
        }

        let tx = ledger.add_transaction(session.to_transaction(ledger, categories, today)?)?;
        if let Some(slot) = self.lock().get_mut(id) {
            slot.session.saved_transaction_id = Some(tx.id.clone());
        }
        info!(session = id, transaction = %tx.id, "dialog saved");
        Ok(tx)
    }

    fn gate(&self, id: &str) -> Result<Arc<AsyncMutex<()>>, DialogError> {
        self.lock()
            .get(id)
            .map(|slot| Arc::clone(&slot.turn))
            .ok_or_else(|| DialogError::NotFound { id: id.into() })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.sessions.lock().expect("dialog session lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pondledger_core::model::{Project, TransactionStatus};
    use pondledger_core::store::DocumentStore;
    use pondledger_llm::client::{CompletionBackend, CompletionRequest, LlmError};
    use std::collections::VecDeque;
    use tokio::sync::Notify;

    struct Script(Mutex<VecDeque<Result<String, LlmError>>>);

    #[async_trait]
    impl CompletionBackend for Script {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
            self.0
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyResponse))
        }
    }

    fn extractor(replies: Vec<Result<String, LlmError>>) -> TransactionExtractor {
        TransactionExtractor::new(Arc::new(Script(Mutex::new(replies.into()))), 256)
    }

    fn ctx() -> TurnContext {
        TurnContext {
            projects: vec!["North Block".into()],
            categories: vec!["Feed".into()],
            today: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
        }
    }

    fn ledger_with_project() -> Ledger {
        let ledger = Ledger::new(Arc::new(DocumentStore::open(":memory:").unwrap()));
        ledger
            .add_project(Project {
                id: String::new(),
                name: "North Block".into(),
            })
            .unwrap();
        ledger
    }

    fn categories() -> Vec<Category> {
        vec![Category {
            name: "Feed".into(),
            gl_code: Some("5100".into()),
        }]
    }

    fn complete_reply() -> Result<String, LlmError> {
        Ok(format!(
            r#"{{"updatedState":{{"type":"expense","amount":4500,"title":"Feed bags","project":"north block","category":"feed","status":"credit"}},"nextQuestion":"{COMPLETION_MESSAGE}"}}"#
        ))
    }

    #[tokio::test]
    async fn failed_turn_apologises_and_keeps_state() {
        let ex = extractor(vec![
            Ok(r#"{"updatedState":{"type":"expense","amount":300},"nextQuestion":"What was it for?"}"#.into()),
            Err(LlmError::EmptyResponse),
        ]);
        let mut session = DialogSession::new("s1".into());

        let first = session.respond(&ex, &ctx(), "spent 300").await;
        assert_eq!(first.question, "What was it for?");
        let before = session.state.clone();
        let asked = session.questions.len();

        let second = session.respond(&ex, &ctx(), "on lime").await;
        assert_eq!(second.question, APOLOGY_MESSAGE);
        assert!(!second.complete);
        assert_eq!(session.state, before);
        assert_eq!(session.questions.len(), asked);
    }

    #[tokio::test]
    async fn complete_session_saves_with_resolved_names() {
        let ledger = ledger_with_project();
        let sessions = DialogSessions::new();
        let session = sessions.start();
        assert_eq!(session.questions, vec![OPENING_QUESTION.to_string()]);

        let reply = sessions
            .respond(&session.id, &extractor(vec![complete_reply()]), &ctx(), "4500 feed on credit")
            .await
            .unwrap();
        assert!(reply.complete);
        assert_eq!(reply.question, COMPLETION_MESSAGE);

        let tx = sessions
            .save(&session.id, &ledger, &categories(), ctx().today)
            .await
            .unwrap();
        assert_eq!(tx.amount, 4500.0);
        assert_eq!(tx.status, TransactionStatus::Credit);
        assert_eq!(tx.category.as_deref(), Some("Feed"));
        assert_eq!(tx.date, ctx().today);
        let project = ledger.find_project_by_name("North Block").unwrap().unwrap();
        assert_eq!(tx.project_id, Some(project.id));

        assert!(matches!(
            sessions.save(&session.id, &ledger, &categories(), ctx().today).await,
            Err(DialogError::AlreadySaved { .. })
        ));
    }

    #[tokio::test]
    async fn incomplete_or_unknown_names_are_rejected() {
        let ledger = ledger_with_project();
        let mut session = DialogSession::new("s2".into());
        assert!(matches!(
            session.to_transaction(&ledger, &categories(), ctx().today),
            Err(DialogError::Incomplete { .. })
        ));

        session.respond(&extractor(vec![complete_reply()]), &ctx(), "x").await;
        session.state.project = Some("South Block".into());
        assert!(matches!(
            session.to_transaction(&ledger, &categories(), ctx().today),
            Err(DialogError::UnknownProject { .. })
        ));

        session.state.project = Some("North Block".into());
        session.state.category = Some("Snacks".into());
        assert!(matches!(
            session.to_transaction(&ledger, &categories(), ctx().today),
            Err(DialogError::UnknownCategory { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let sessions = DialogSessions::new();
        let err = sessions
            .respond("nope", &extractor(vec![]), &ctx(), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, DialogError::NotFound { .. }));
        assert!(!sessions.end("nope"));
    }

    /// Parks every call until released, after announcing that it started.
    struct Held {
        started: Notify,
        release: Notify,
        reply: String,
    }

    #[async_trait]
    impl CompletionBackend for Held {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(self.reply.clone())
        }
    }

    /// Yields once before each scripted reply so concurrent turns interleave.
    struct Yielding(Mutex<VecDeque<String>>);

    #[async_trait]
    impl CompletionBackend for Yielding {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
            tokio::task::yield_now().await;
            self.0.lock().unwrap().pop_front().ok_or(LlmError::EmptyResponse)
        }
    }

    #[tokio::test]
    async fn session_ended_mid_turn_stays_ended() {
        let backend = Arc::new(Held {
            started: Notify::new(),
            release: Notify::new(),
            reply: r#"{"updatedState":{"amount":300},"nextQuestion":"What was it for?"}"#.into(),
        });
        let ex = TransactionExtractor::new(backend.clone(), 256);
        let sessions = DialogSessions::new();
        let id = sessions.start().id;

        let turn_ctx = ctx();
        let (turn, ended) = tokio::join!(sessions.respond(&id, &ex, &turn_ctx, "spent 300"), async {
            backend.started.notified().await;
            let ended = sessions.end(&id);
            backend.release.notify_one();
            ended
        });

        assert!(ended);
        assert!(matches!(turn, Err(DialogError::NotFound { .. })));
        assert!(sessions.get(&id).is_none());
    }

    #[tokio::test]
    async fn concurrent_turns_on_one_session_both_land() {
        let ex = TransactionExtractor::new(
            Arc::new(Yielding(Mutex::new(
                vec![
                    r#"{"updatedState":{"type":"expense","amount":300},"nextQuestion":"What was it for?"}"#.to_string(),
                    r#"{"updatedState":{"title":"Lime"},"nextQuestion":"Which project is this for?"}"#.to_string(),
                ]
                .into(),
            ))),
            256,
        );
        let sessions = DialogSessions::new();
        let id = sessions.start().id;

        let (ctx_a, ctx_b) = (ctx(), ctx());
        let (a, b) = tokio::join!(
            sessions.respond(&id, &ex, &ctx_a, "spent 300"),
            sessions.respond(&id, &ex, &ctx_b, "on lime"),
        );
        a.unwrap();
        b.unwrap();

        let session = sessions.get(&id).unwrap();
        assert_eq!(session.state.amount, Some(300.0));
        assert_eq!(session.state.title.as_deref(), Some("Lime"));
        assert_eq!(session.questions.len(), 3);
    }

    #[tokio::test]
    async fn concurrent_saves_write_one_transaction() {
        let ledger = ledger_with_project();
        let sessions = DialogSessions::new();
        let id = sessions.start().id;
        sessions
            .respond(&id, &extractor(vec![complete_reply()]), &ctx(), "4500 feed on credit")
            .await
            .unwrap();

        let (cats_a, cats_b) = (categories(), categories());
        let (a, b) = tokio::join!(
            sessions.save(&id, &ledger, &cats_a, ctx().today),
            sessions.save(&id, &ledger, &cats_b, ctx().today),
        );
        let saved: Vec<_> = [a, b].into_iter().filter_map(Result::ok).collect();
        assert_eq!(saved.len(), 1);
        assert_eq!(ledger.list_transactions().unwrap().len(), 1);
        assert_eq!(
            sessions.get(&id).unwrap().saved_transaction_id,
            Some(saved[0].id.clone())
        );
    }

    #[tokio::test]
    async fn failed_save_can_be_retried() {
        let ledger = ledger_with_project();
        let sessions = DialogSessions::new();
        let id = sessions.start().id;

        assert!(matches!(
            sessions.save(&id, &ledger, &categories(), ctx().today).await,
            Err(DialogError::Incomplete { .. })
        ));
        sessions
            .respond(&id, &extractor(vec![complete_reply()]), &ctx(), "4500 feed on credit")
            .await
            .unwrap();
        assert!(sessions.save(&id, &ledger, &categories(), ctx().today).await.is_ok());
    }
}
