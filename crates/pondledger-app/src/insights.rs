// Streaming insight generation.
//
// Starting an insight writes a pending `insights/{id}` document and spawns a
// task that streams the model's answer. Tokens are relayed to live-feed
// clients as they arrive; the finished text (or the error) is written back
// to the document.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pondledger_core::ledger::{Ledger, LedgerResult};
use pondledger_core::model::{Insight, InsightStatus};
use pondledger_core::protocol::{LiveMessage, LlmEvent};
use pondledger_llm::client::{CompletionBackend, CompletionRequest};
use pondledger_llm::prompt;

use crate::reports::Report;

#[derive(Clone)]
pub struct InsightRunner {
    ledger: Ledger,
    backend: Arc<dyn CompletionBackend>,
    live: broadcast::Sender<LiveMessage>,
    currency: String,
    max_tokens: u32,
}

impl InsightRunner {
    pub fn new(
        ledger: Ledger,
        backend: Arc<dyn CompletionBackend>,
        live: broadcast::Sender<LiveMessage>,
        currency: String,
        max_tokens: u32,
    ) -> Self {
        Self {
            ledger,
            backend,
            live,
            currency,
            max_tokens,
        }
    }

    /// Create the pending insight and spawn the streaming task. Returns the
    /// pending record immediately.
    pub fn start(
        &self,
        report: &Report,
        question: Option<&str>,
    ) -> LedgerResult<(Insight, JoinHandle<()>)> {
        let insight = self.ledger.put_insight(Insight {
            id: String::new(),
            created_at: Utc::now(),
            status: InsightStatus::Pending,
            text: String::new(),
        })?;

        let request = CompletionRequest::text(
            prompt::insight_system_prompt(),
            prompt::build_insight_prompt(&report.insight_context(&self.currency, question)),
            self.max_tokens,
        );

        let runner = self.clone();
        let pending = insight.clone();
        let handle = tokio::spawn(async move {
            runner.run(pending, request).await;
        });

        info!(id = %insight.id, "insight started");
        Ok((insight, handle))
    }

    async fn run(&self, mut insight: Insight, request: CompletionRequest) {
        let (tx, mut rx) = mpsc::channel::<LlmEvent>(64);
        let backend = Arc::clone(&self.backend);
        let id = insight.id.clone();
        let producer = tokio::spawn(async move {
            if let Err(e) = backend.stream(&request, tx, id).await {
                warn!("insight stream task failed: {e}");
            }
        });

        let mut streamed = String::new();
        let mut outcome: Option<Result<String, String>> = None;

        while let Some(event) = rx.recv().await {
            match event {
                LlmEvent::Token { request_id, .. }
                | LlmEvent::Complete { request_id, .. }
                | LlmEvent::Error { request_id, .. }
                    if request_id != insight.id =>
                {
                    debug!(%request_id, "discarding event for another request");
                }
                LlmEvent::Token { text, .. } => {
                    streamed.push_str(&text);
                    // No receivers is fine; nobody is watching.
                    let _ = self.live.send(LiveMessage::InsightToken {
                        id: insight.id.clone(),
                        text,
                    });
                }
                LlmEvent::Complete {
                    full_text,
                    input_tokens,
                    output_tokens,
                    ..
                } => {
                    debug!(input_tokens, output_tokens, "insight stream complete");
                    outcome = Some(Ok(full_text));
                    break;
                }
                LlmEvent::Error { message, .. } => {
                    outcome = Some(Err(message));
                    break;
                }
            }
        }
        if let Err(e) = producer.await {
            warn!("insight stream task panicked: {e}");
        }

        match outcome {
            Some(Ok(text)) => {
                insight.status = InsightStatus::Complete;
                insight.text = text;
            }
            Some(Err(message)) => {
                warn!(id = %insight.id, "insight failed: {message}");
                insight.status = InsightStatus::Failed;
                insight.text = message;
            }
            None if !streamed.is_empty() => {
                insight.status = InsightStatus::Complete;
                insight.text = streamed;
            }
            None => {
                insight.status = InsightStatus::Failed;
                insight.text = "stream ended without a response".to_string();
            }
        }

        match self.ledger.put_insight(insight) {
            Ok(saved) => info!(id = %saved.id, status = ?saved.status, "insight finished"),
            Err(e) => warn!("failed to store insight: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reports::{build_report, Period};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use pondledger_core::store::DocumentStore;
    use pondledger_llm::client::LlmError;

    struct Fixed(Result<&'static str, ()>);

    #[async_trait]
    impl CompletionBackend for Fixed {
        async fn complete(&self, _request: &CompletionRequest) -> Result<String, LlmError> {
            self.0.map(str::to_string).map_err(|_| LlmError::EmptyResponse)
        }
    }

    fn setup(reply: Result<&'static str, ()>) -> (InsightRunner, Ledger, broadcast::Receiver<LiveMessage>) {
        let ledger = Ledger::new(Arc::new(DocumentStore::open(":memory:").unwrap()));
        let (live, rx) = broadcast::channel(16);
        let runner = InsightRunner::new(ledger.clone(), Arc::new(Fixed(reply)), live, "INR".into(), 256);
        (runner, ledger, rx)
    }

    fn report(ledger: &Ledger) -> Report {
        let today = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        build_report(ledger, Period::month_to_date(today), None).unwrap()
    }

    #[tokio::test]
    async fn completed_insight_is_streamed_and_stored() {
        let (runner, ledger, mut live) = setup(Ok("Feed spend is on track."));
        let (pending, handle) = runner.start(&report(&ledger), None).unwrap();
        assert_eq!(pending.status, InsightStatus::Pending);
        handle.await.unwrap();

        match live.recv().await.unwrap() {
            LiveMessage::InsightToken { id, text } => {
                assert_eq!(id, pending.id);
                assert_eq!(text, "Feed spend is on track.");
            }
            other => panic!("expected InsightToken, got {other:?}"),
        }

        let stored = ledger.get_insight(&pending.id).unwrap().unwrap();
        assert_eq!(stored.status, InsightStatus::Complete);
        assert_eq!(stored.text, "Feed spend is on track.");
    }

    #[tokio::test]
    async fn failed_insight_records_error() {
        let (runner, ledger, _live) = setup(Err(()));
        let (pending, handle) = runner.start(&report(&ledger), Some("why?")).unwrap();
        handle.await.unwrap();

        let stored = ledger.get_insight(&pending.id).unwrap().unwrap();
        assert_eq!(stored.status, InsightStatus::Failed);
        assert_eq!(stored.text, "response contained no text");
    }
}
