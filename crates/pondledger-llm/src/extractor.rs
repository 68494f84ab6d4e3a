// Conversational transaction-state extractor.
//
// Each turn sends the partially filled record, the valid project and category
// names, the questions asked so far and the latest utterance to the model.
// The model does all interpretation (dates, amounts, type, fuzzy category
// matching) and replies with the updated record plus the next question. This
// module only shape-checks that reply and merges it into the prior state.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use pondledger_core::model::{TransactionKind, TransactionStatus};

use crate::client::{CompletionBackend, CompletionRequest};
use crate::prompt;
use crate::reply::parse_reply;
pub use crate::reply::ExtractionError;

/// The fixed sentence the model returns once every required field is known.
pub const COMPLETION_MESSAGE: &str = "Great, I have everything I need to record this transaction.";

/// Asked when the record looks complete but the model neither confirmed it
/// nor asked anything.
pub const CONFIRM_QUESTION: &str = "Is there anything else to add before I record this?";

/// Reply used in place of a question when a turn fails.
pub const APOLOGY_MESSAGE: &str = "Sorry, I couldn't process that. Could you say it again?";

// ---------------------------------------------------------------------------
// Partial state
// ---------------------------------------------------------------------------

/// A transaction as far as the conversation has filled it in. `project` and
/// `category` are names, not ids; they are resolved when the record is saved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialTransaction {
    #[serde(rename = "type", default, deserialize_with = "lenient_kind")]
    pub kind: Option<TransactionKind>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default, deserialize_with = "non_blank")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "non_blank")]
    pub project: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: Option<TransactionStatus>,
    #[serde(default, deserialize_with = "non_blank")]
    pub vendor: Option<String>,
    #[serde(default, deserialize_with = "non_blank")]
    pub description: Option<String>,
}

/// A required field that is still unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingField {
    Type,
    Amount,
    Title,
    Project,
    Category,
}

impl MissingField {
    /// The question to ask when the caller has to prompt for this field itself.
    pub fn question(&self) -> &'static str {
        match self {
            MissingField::Type => "Was this money spent or money received?",
            MissingField::Amount => "How much was it?",
            MissingField::Title => "What should I call this transaction?",
            MissingField::Project => "Which project is this for?",
            MissingField::Category => "Which category does this expense belong to?",
        }
    }
}

impl PartialTransaction {
    /// Required fields still missing, in the order they should be asked for.
    /// Category is only required for expenses.
    pub fn missing_fields(&self) -> Vec<MissingField> {
        let mut missing = Vec::new();
        if self.kind.is_none() {
            missing.push(MissingField::Type);
        }
        if !self.amount.is_some_and(|a| a.is_finite() && a > 0.0) {
            missing.push(MissingField::Amount);
        }
        if is_blank(&self.title) {
            missing.push(MissingField::Title);
        }
        if is_blank(&self.project) {
            missing.push(MissingField::Project);
        }
        if self.kind == Some(TransactionKind::Expense) && is_blank(&self.category) {
            missing.push(MissingField::Category);
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Overlay `update` on this state. Fields the update leaves empty keep
    /// their previous value.
    pub fn merge(&self, update: PartialTransaction) -> PartialTransaction {
        PartialTransaction {
            kind: update.kind.or(self.kind),
            amount: update.amount.or(self.amount),
            title: update.title.or_else(|| self.title.clone()),
            date: update.date.or(self.date),
            project: update.project.or_else(|| self.project.clone()),
            category: update.category.or_else(|| self.category.clone()),
            status: update.status.or(self.status),
            vendor: update.vendor.or_else(|| self.vendor.clone()),
            description: update.description.or_else(|| self.description.clone()),
        }
    }
}

fn is_blank(field: &Option<String>) -> bool {
    !field.as_deref().is_some_and(|s| !s.trim().is_empty())
}

fn non_blank<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

fn lenient_kind<'de, D>(deserializer: D) -> Result<Option<TransactionKind>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.as_deref().and_then(TransactionKind::parse))
}

/// Only ISO dates are kept. The model is told to resolve relative phrases
/// itself, so anything else ("yesterday") is dropped rather than failing the
/// turn.
fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()))
}

fn lenient_status<'de, D>(deserializer: D) -> Result<Option<TransactionStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.as_deref().and_then(TransactionStatus::parse))
}

// ---------------------------------------------------------------------------
// Turn contract
// ---------------------------------------------------------------------------

/// Input for one extraction turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRequest {
    #[serde(default)]
    pub state: PartialTransaction,
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub utterance: String,
    #[serde(default)]
    pub previous_questions: Vec<String>,
}

/// Output of one extraction turn: the merged state and the model's question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionTurn {
    #[serde(rename = "updatedState")]
    pub state: PartialTransaction,
    pub next_question: String,
}

/// What the dialog should do after a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    /// Every required field is present and the model agreed.
    Complete,
    /// Ask this question next.
    Ask(String),
}

impl ExtractionTurn {
    /// Whether the model returned [`COMPLETION_MESSAGE`]. Compared ignoring
    /// case, surrounding whitespace and trailing punctuation.
    pub fn signals_completion(&self) -> bool {
        normalize(&self.next_question) == normalize(COMPLETION_MESSAGE)
    }

    /// Decide the next step. Completion requires both the model's signal and
    /// the local completeness check; an early signal falls back to asking for
    /// the first missing field. A blank question never completes.
    pub fn next_step(&self) -> NextStep {
        let first_missing = self.state.missing_fields().first().copied();
        if self.signals_completion() {
            return match first_missing {
                None => NextStep::Complete,
                Some(field) => {
                    debug!(?field, "model signalled completion early");
                    NextStep::Ask(field.question().to_string())
                }
            };
        }
        if self.next_question.trim().is_empty() {
            return match first_missing {
                None => NextStep::Ask(CONFIRM_QUESTION.to_string()),
                Some(field) => NextStep::Ask(field.question().to_string()),
            };
        }
        NextStep::Ask(self.next_question.clone())
    }
}

fn normalize(s: &str) -> String {
    s.trim()
        .trim_end_matches(['.', '!', '?'])
        .to_lowercase()
}

/// Wire shape of the model's reply.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelReply {
    #[serde(default)]
    updated_state: Option<PartialTransaction>,
    next_question: String,
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Runs extraction turns against a completion backend.
#[derive(Clone)]
pub struct TransactionExtractor {
    backend: Arc<dyn CompletionBackend>,
    max_tokens: u32,
}

impl TransactionExtractor {
    pub fn new(backend: Arc<dyn CompletionBackend>, max_tokens: u32) -> Self {
        Self {
            backend,
            max_tokens,
        }
    }

    /// Run one turn. `today` anchors relative dates in the utterance.
    ///
    /// No retries: a transport failure or malformed reply is returned as an
    /// error and the caller decides what to tell the user.
    pub async fn extract(
        &self,
        request: &ExtractionRequest,
        today: NaiveDate,
    ) -> Result<ExtractionTurn, ExtractionError> {
        let completion = CompletionRequest::text(
            prompt::extraction_system_prompt(today),
            prompt::build_extraction_prompt(request),
            self.max_tokens,
        );

        let raw = self.backend.complete(&completion).await?;
        let reply: ModelReply = parse_reply(&raw).inspect_err(|e| {
            warn!("extraction reply rejected: {e}");
        })?;

        let state = match reply.updated_state {
            Some(update) => request.state.merge(update),
            None => request.state.clone(),
        };
        debug!(missing = ?state.missing_fields(), "extraction turn merged");

        Ok(ExtractionTurn {
            state,
            next_question: reply.next_question.trim().to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::LlmError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<Result<String, LlmError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CompletionBackend for Scripted {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
            if let Some(crate::client::ContentBlock::Text(text)) = request.content.first() {
                self.prompts.lock().unwrap().push(text.clone());
            }
            self.replies.lock().unwrap().remove(0)
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
    }

    fn full_expense() -> PartialTransaction {
        PartialTransaction {
            kind: Some(TransactionKind::Expense),
            amount: Some(4500.0),
            title: Some("Feed bags".into()),
            project: Some("North Block".into()),
            category: Some("Feed".into()),
            ..Default::default()
        }
    }

    #[test]
    fn missing_fields_in_ask_order() {
        let empty = PartialTransaction::default();
        assert_eq!(
            empty.missing_fields(),
            vec![
                MissingField::Type,
                MissingField::Amount,
                MissingField::Title,
                MissingField::Project
            ]
        );

        let mut expense = full_expense();
        expense.category = None;
        assert_eq!(expense.missing_fields(), vec![MissingField::Category]);

        let mut income = full_expense();
        income.kind = Some(TransactionKind::Income);
        income.category = None;
        assert!(income.is_complete());
    }

    #[test]
    fn zero_or_blank_values_are_missing() {
        let mut tx = full_expense();
        tx.amount = Some(0.0);
        tx.title = Some("   ".into());
        assert_eq!(
            tx.missing_fields(),
            vec![MissingField::Amount, MissingField::Title]
        );
    }

    #[test]
    fn merge_keeps_previous_values_for_empty_fields() {
        let prev = PartialTransaction {
            kind: Some(TransactionKind::Expense),
            amount: Some(300.0),
            vendor: Some("Avanti".into()),
            ..Default::default()
        };
        let update = PartialTransaction {
            amount: Some(350.0),
            project: Some("South".into()),
            ..Default::default()
        };
        let merged = prev.merge(update);
        assert_eq!(merged.kind, Some(TransactionKind::Expense));
        assert_eq!(merged.amount, Some(350.0));
        assert_eq!(merged.vendor.as_deref(), Some("Avanti"));
        assert_eq!(merged.project.as_deref(), Some("South"));
    }

    #[test]
    fn model_state_deserializes_leniently() {
        let state: PartialTransaction = serde_json::from_str(
            r#"{"type":"Expense","amount":120.5,"title":"","project":null,"status":"unknown","date":"2026-03-13"}"#,
        )
        .unwrap();
        assert_eq!(state.kind, Some(TransactionKind::Expense));
        assert_eq!(state.amount, Some(120.5));
        assert_eq!(state.title, None);
        assert_eq!(state.project, None);
        assert_eq!(state.status, None);
        assert_eq!(state.date, NaiveDate::from_ymd_opt(2026, 3, 13));
    }

    #[test]
    fn completion_signal_matching_is_loose() {
        let turn = |q: &str| ExtractionTurn {
            state: full_expense(),
            next_question: q.into(),
        };
        assert!(turn(COMPLETION_MESSAGE).signals_completion());
        assert!(turn("  great, I have everything I need to record this transaction!  ").signals_completion());
        assert!(!turn("Which project is this for?").signals_completion());
    }

    #[test]
    fn early_completion_asks_for_first_missing_field() {
        let mut state = full_expense();
        state.project = None;
        let turn = ExtractionTurn {
            state,
            next_question: COMPLETION_MESSAGE.into(),
        };
        assert_eq!(
            turn.next_step(),
            NextStep::Ask(MissingField::Project.question().into())
        );
    }

    #[test]
    fn complete_only_when_signalled_and_locally_complete() {
        let done = ExtractionTurn {
            state: full_expense(),
            next_question: COMPLETION_MESSAGE.into(),
        };
        assert_eq!(done.next_step(), NextStep::Complete);

        let asking = ExtractionTurn {
            state: full_expense(),
            next_question: "Who was the vendor?".into(),
        };
        assert_eq!(asking.next_step(), NextStep::Ask("Who was the vendor?".into()));
    }

    #[test]
    fn blank_question_without_signal_does_not_complete() {
        let blank = ExtractionTurn {
            state: full_expense(),
            next_question: "   ".into(),
        };
        assert!(!blank.signals_completion());
        assert_eq!(blank.next_step(), NextStep::Ask(CONFIRM_QUESTION.into()));

        let mut state = full_expense();
        state.title = None;
        let blank = ExtractionTurn {
            state,
            next_question: String::new(),
        };
        assert_eq!(
            blank.next_step(),
            NextStep::Ask(MissingField::Title.question().into())
        );
    }

    #[test]
    fn unparseable_date_is_dropped() {
        let state: PartialTransaction = serde_json::from_str(
            r#"{"type":"expense","amount":300,"date":"yesterday"}"#,
        )
        .unwrap();
        assert_eq!(state.date, None);
        assert_eq!(state.amount, Some(300.0));

        let state: PartialTransaction =
            serde_json::from_str(r#"{"date":" 2026-03-13 "}"#).unwrap();
        assert_eq!(state.date, NaiveDate::from_ymd_opt(2026, 3, 13));
    }

    #[tokio::test]
    async fn relative_date_in_reply_keeps_the_turn() {
        let backend = Scripted::new(vec![Ok(
            r#"{"updatedState":{"type":"expense","amount":300,"date":"yesterday"},"nextQuestion":"What was it for?"}"#
                .into(),
        )]);
        let extractor = TransactionExtractor::new(backend, 256);
        let request = ExtractionRequest {
            utterance: "spent 300 yesterday".into(),
            ..Default::default()
        };
        let turn = extractor.extract(&request, today()).await.unwrap();
        assert_eq!(turn.state.amount, Some(300.0));
        assert_eq!(turn.state.date, None);
        assert_eq!(turn.next_question, "What was it for?");
    }

    #[tokio::test]
    async fn extract_merges_fenced_reply() {
        let backend = Scripted::new(vec![Ok(
            "```json\n{\"updatedState\":{\"type\":\"expense\",\"amount\":4500,\"title\":\"Feed bags\"},\"nextQuestion\":\"Which project is this for?\"}\n```"
                .into(),
        )]);
        let extractor = TransactionExtractor::new(backend.clone(), 256);

        let request = ExtractionRequest {
            state: PartialTransaction {
                vendor: Some("Avanti".into()),
                ..Default::default()
            },
            projects: vec!["North Block".into()],
            categories: vec!["Feed".into()],
            utterance: "spent 4500 on feed bags".into(),
            previous_questions: vec![],
        };
        let turn = extractor.extract(&request, today()).await.unwrap();

        assert_eq!(turn.state.kind, Some(TransactionKind::Expense));
        assert_eq!(turn.state.amount, Some(4500.0));
        assert_eq!(turn.state.vendor.as_deref(), Some("Avanti"));
        assert_eq!(turn.next_question, "Which project is this for?");

        let prompts = backend.prompts.lock().unwrap();
        assert!(prompts[0].contains("spent 4500 on feed bags"));
        assert!(prompts[0].contains("North Block"));
    }

    #[tokio::test]
    async fn extract_surfaces_malformed_and_transport_errors() {
        let backend = Scripted::new(vec![
            Ok("I think it was feed?".into()),
            Ok(r#"{"updatedState":{"amount":"lots"},"nextQuestion":"?"}"#.into()),
            Err(LlmError::EmptyResponse),
        ]);
        let extractor = TransactionExtractor::new(backend, 256);
        let request = ExtractionRequest {
            utterance: "feed".into(),
            ..Default::default()
        };

        assert!(matches!(
            extractor.extract(&request, today()).await,
            Err(ExtractionError::NoJson { .. })
        ));
        assert!(matches!(
            extractor.extract(&request, today()).await,
            Err(ExtractionError::Shape { .. })
        ));
        assert!(matches!(
            extractor.extract(&request, today()).await,
            Err(ExtractionError::Llm(LlmError::EmptyResponse))
        ));
    }
}
