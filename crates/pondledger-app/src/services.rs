// The service layer shared by every request handler: config, ledger, model
// backend, open dialogs, and the live broadcast channel.

use std::sync::Arc;

use chrono::{Local, NaiveDate};
use tokio::sync::broadcast;
use tracing::info;

use pondledger_core::config::Config;
use pondledger_core::ledger::{Ledger, LedgerResult};
use pondledger_core::model::{AttendanceRecord, Insight, Transaction};
use pondledger_core::protocol::{LiveMessage, Notification};
use pondledger_llm::client::CompletionBackend;
use pondledger_llm::extractor::{
    ExtractionError, ExtractionRequest, ExtractionTurn, TransactionExtractor,
};
use pondledger_llm::receipt::{self, ReceiptAnalysis, ReceiptInput};

use crate::dialog::{DialogError, DialogReply, DialogSession, DialogSessions, TurnContext};
use crate::insights::InsightRunner;
use crate::notifications::{self, ActionRequest};
use crate::reports::{self, Period, Report};

/// Capacity of the live broadcast channel. Lagging receivers skip messages.
const LIVE_CHANNEL_CAPACITY: usize = 256;

pub struct AppServices {
    pub config: Arc<Config>,
    pub ledger: Ledger,
    backend: Arc<dyn CompletionBackend>,
    extractor: TransactionExtractor,
    sessions: DialogSessions,
    insights: InsightRunner,
    live: broadcast::Sender<LiveMessage>,
}

impl AppServices {
    pub fn new(config: Config, ledger: Ledger, backend: Arc<dyn CompletionBackend>) -> Self {
        let (live, _) = broadcast::channel(LIVE_CHANNEL_CAPACITY);
        let extractor =
            TransactionExtractor::new(Arc::clone(&backend), config.llm.extraction_max_tokens);
        let insights = InsightRunner::new(
            ledger.clone(),
            Arc::clone(&backend),
            live.clone(),
            config.profile.currency.clone(),
            config.llm.insight_max_tokens,
        );
        Self {
            config: Arc::new(config),
            ledger,
            backend,
            extractor,
            sessions: DialogSessions::new(),
            insights,
            live,
        }
    }

    pub fn live(&self) -> &broadcast::Sender<LiveMessage> {
        &self.live
    }

    pub fn subscribe_live(&self) -> broadcast::Receiver<LiveMessage> {
        self.live.subscribe()
    }

    pub fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    // ------------------------------------------------------------------
    // Assist
    // ------------------------------------------------------------------

    /// Current project names and configured categories for the extractor.
    pub fn turn_context(&self) -> LedgerResult<TurnContext> {
        Ok(TurnContext {
            projects: self
                .ledger
                .list_projects()?
                .into_iter()
                .map(|p| p.name)
                .collect(),
            categories: self.config.category_names(),
            today: self.today(),
        })
    }

    /// Stateless extraction: the caller carries the state between turns.
    pub async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionTurn, ExtractionError> {
        self.extractor.extract(request, self.today()).await
    }

    pub fn start_session(&self) -> DialogSession {
        self.sessions.start()
    }

    pub fn session(&self, id: &str) -> Option<DialogSession> {
        self.sessions.get(id)
    }

    pub fn end_session(&self, id: &str) -> bool {
        self.sessions.end(id)
    }

    pub async fn session_turn(&self, id: &str, utterance: &str) -> Result<DialogReply, DialogError> {
        let ctx = self.turn_context()?;
        self.sessions.respond(id, &self.extractor, &ctx, utterance).await
    }

    pub async fn save_session(&self, id: &str) -> Result<Transaction, DialogError> {
        self.sessions
            .save(id, &self.ledger, &self.config.categories, self.today())
            .await
    }

    pub async fn analyze_receipt(&self, input: &ReceiptInput) -> ReceiptAnalysis {
        receipt::analyze_receipt_or_empty(
            self.backend.as_ref(),
            input,
            &self.config.category_names(),
            self.config.llm.receipt_max_tokens,
        )
        .await
    }

    // ------------------------------------------------------------------
    // Reports and insights
    // ------------------------------------------------------------------

    pub fn report(&self, period: Period, project_id: Option<&str>) -> LedgerResult<Report> {
        reports::build_report(&self.ledger, period, project_id)
    }

    pub fn export_csv(&self, period: Period, project_id: Option<&str>) -> anyhow::Result<String> {
        reports::export_csv(&self.ledger, &self.config.categories, period, project_id)
    }

    /// Start an insight for the period's report. The returned record is
    /// pending; the text arrives over the live feed and in the stored record.
    pub fn start_insight(
        &self,
        period: Period,
        project_id: Option<&str>,
        question: Option<&str>,
    ) -> LedgerResult<Insight> {
        let report = self.report(period, project_id)?;
        let (insight, _handle) = self.insights.start(&report, question)?;
        Ok(insight)
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    pub fn reminders(&self, date: NaiveDate) -> LedgerResult<Vec<Notification>> {
        notifications::attendance_reminders(&self.ledger, date)
    }

    pub fn apply_notification_action(&self, request: &ActionRequest) -> LedgerResult<AttendanceRecord> {
        let record = notifications::apply_action(&self.ledger, request)?;
        info!(
            employee = %record.employee_id,
            action = ?request.action,
            "notification action applied"
        );
        Ok(record)
    }
}
