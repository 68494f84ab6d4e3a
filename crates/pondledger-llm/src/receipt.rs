// Receipt and bill analysis: OCR text or a photo in, structured details out.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::client::{CompletionBackend, CompletionRequest, ContentBlock};
use crate::prompt;
use crate::reply::{parse_reply, ExtractionError};

/// What to analyse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ReceiptInput {
    Text { text: String },
    #[serde(rename_all = "camelCase")]
    Image { media_type: String, data_base64: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptItem {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
}

/// Fields read off a receipt. Anything unreadable is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptDetails {
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub items: Vec<ReceiptItem>,
}

/// Result handed back to callers: the details, plus an error message when
/// analysis failed and the details are the empty default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptAnalysis {
    #[serde(flatten)]
    pub details: ReceiptDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ask the model to read a receipt.
pub async fn analyze_receipt(
    backend: &dyn CompletionBackend,
    input: &ReceiptInput,
    categories: &[String],
    max_tokens: u32,
) -> Result<ReceiptDetails, ExtractionError> {
    let content = match input {
        ReceiptInput::Text { text } => {
            vec![ContentBlock::Text(prompt::build_receipt_prompt(categories, Some(text)))]
        }
        ReceiptInput::Image {
            media_type,
            data_base64,
        } => vec![
            ContentBlock::Image {
                media_type: media_type.clone(),
                data: data_base64.clone(),
            },
            ContentBlock::Text(prompt::build_receipt_prompt(categories, None)),
        ],
    };

    let request = CompletionRequest {
        system: prompt::receipt_system_prompt(),
        content,
        max_tokens,
    };
    let raw = backend.complete(&request).await?;
    let mut details: ReceiptDetails = parse_reply(&raw)?;

    // Keep the category only if it names a configured one, in its configured
    // spelling.
    details.category = details.category.and_then(|c| {
        categories
            .iter()
            .find(|known| known.eq_ignore_ascii_case(c.trim()))
            .cloned()
    });

    info!(
        vendor = details.vendor.as_deref().unwrap_or("?"),
        total = details.total,
        items = details.items.len(),
        "receipt analysed"
    );
    Ok(details)
}

/// Like [`analyze_receipt`], but failures produce an empty result carrying
/// the error message instead of an `Err`.
pub async fn analyze_receipt_or_empty(
    backend: &dyn CompletionBackend,
    input: &ReceiptInput,
    categories: &[String],
    max_tokens: u32,
) -> ReceiptAnalysis {
    match analyze_receipt(backend, input, categories, max_tokens).await {
        Ok(details) => ReceiptAnalysis {
            details,
            error: None,
        },
        Err(e) => {
            warn!("receipt analysis failed: {e}");
            ReceiptAnalysis {
                details: ReceiptDetails::default(),
                error: Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::LlmError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct OneReply {
        reply: Mutex<Option<Result<String, LlmError>>>,
        seen: Mutex<Option<CompletionRequest>>,
    }

    impl OneReply {
        fn new(reply: Result<String, LlmError>) -> Self {
            Self {
                reply: Mutex::new(Some(reply)),
                seen: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl CompletionBackend for OneReply {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
            *self.seen.lock().unwrap() = Some(request.clone());
            self.reply.lock().unwrap().take().unwrap_or(Err(LlmError::EmptyResponse))
        }
    }

    fn categories() -> Vec<String> {
        vec!["Feed".into(), "Fuel".into()]
    }

    #[tokio::test]
    async fn text_receipt_is_parsed_and_category_normalized() {
        let backend = OneReply::new(Ok(r#"{
            "vendor": "Avanti Feeds",
            "date": "2026-03-02",
            "total": 4500,
            "category": "feed",
            "items": [{"description": "Grower feed 25kg", "amount": 4500}]
        }"#
        .into()));
        let input = ReceiptInput::Text {
            text: "AVANTI FEEDS ... TOTAL 4500".into(),
        };

        let details = analyze_receipt(&backend, &input, &categories(), 800).await.unwrap();
        assert_eq!(details.vendor.as_deref(), Some("Avanti Feeds"));
        assert_eq!(details.total, Some(4500.0));
        assert_eq!(details.category.as_deref(), Some("Feed"));
        assert_eq!(details.items.len(), 1);
    }

    #[tokio::test]
    async fn unknown_category_is_dropped() {
        let backend = OneReply::new(Ok(r#"{"vendor":"X","category":"Snacks","items":[]}"#.into()));
        let input = ReceiptInput::Text { text: "x".into() };
        let details = analyze_receipt(&backend, &input, &categories(), 800).await.unwrap();
        assert_eq!(details.category, None);
    }

    #[tokio::test]
    async fn image_receipt_sends_image_block_first() {
        let backend = OneReply::new(Ok("{}".into()));
        let input = ReceiptInput::Image {
            media_type: "image/jpeg".into(),
            data_base64: "/9j/4AAQ".into(),
        };
        analyze_receipt(&backend, &input, &categories(), 800).await.unwrap();

        let seen = backend.seen.lock().unwrap().clone().unwrap();
        assert!(matches!(&seen.content[0], ContentBlock::Image { media_type, .. } if media_type == "image/jpeg"));
        assert!(matches!(&seen.content[1], ContentBlock::Text(t) if t.contains("attached image")));
    }

    #[tokio::test]
    async fn failure_yields_empty_result_with_message() {
        let backend = OneReply::new(Ok("no receipt here".into()));
        let input = ReceiptInput::Text { text: "?".into() };
        let analysis = analyze_receipt_or_empty(&backend, &input, &categories(), 800).await;
        assert_eq!(analysis.details, ReceiptDetails::default());
        assert_eq!(
            analysis.error.as_deref(),
            Some("model reply contained no JSON object")
        );
    }

    #[test]
    fn input_wire_format() {
        let input: ReceiptInput = serde_json::from_str(
            r#"{"kind":"image","mediaType":"image/png","dataBase64":"AAAA"}"#,
        )
        .unwrap();
        assert_eq!(
            input,
            ReceiptInput::Image {
                media_type: "image/png".into(),
                data_base64: "AAAA".into()
            }
        );
    }
}
