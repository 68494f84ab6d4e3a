// Message types shared between the store, the app services, the LLM layer
// and the live feed.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::paths::DocPath;

// ---------------------------------------------------------------------------
// Store changes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Set,
    Update,
    Remove,
}

/// A single mutation published by the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreChange {
    pub path: DocPath,
    pub op: ChangeOp,
    /// The document after the change; `None` for removals.
    pub value: Option<Value>,
}

impl StoreChange {
    /// Whether a listener on `prefix` should see this change: the change is
    /// at or below the prefix, or removes an ancestor of it.
    pub fn affects(&self, prefix: &DocPath) -> bool {
        prefix.contains(&self.path) || self.path.contains(prefix)
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Actions a notification can carry back to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationAction {
    MarkFullDay,
    MarkHalfDay,
    MarkAbsent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<NotificationAction>,
}

// ---------------------------------------------------------------------------
// Live feed messages
// ---------------------------------------------------------------------------

/// Messages pushed from the server to live-feed clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LiveMessage {
    Change(StoreChange),
    InsightToken { id: String, text: String },
    Notification(Notification),
    Error { message: String },
}

/// Messages a live-feed client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Subscribe { path: DocPath },
    Unsubscribe { path: DocPath },
}

// ---------------------------------------------------------------------------
// LLM streaming events
// ---------------------------------------------------------------------------

/// Events emitted while a model response streams in. `request_id` lets the
/// receiver route tokens for concurrent requests.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmEvent {
    Token {
        text: String,
        request_id: String,
    },
    Complete {
        full_text: String,
        input_tokens: u32,
        output_tokens: u32,
        request_id: String,
    },
    Error {
        message: String,
        request_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(s: &str) -> DocPath {
        DocPath::parse(s).unwrap()
    }

    #[test]
    fn change_affects_prefix_descendants_and_ancestors() {
        let change = StoreChange {
            path: path("transactions/t1"),
            op: ChangeOp::Set,
            value: Some(json!({})),
        };
        assert!(change.affects(&path("transactions")));
        assert!(change.affects(&path("transactions/t1")));
        assert!(!change.affects(&path("budgets")));

        let removal = StoreChange {
            path: path("shrimp/north"),
            op: ChangeOp::Remove,
            value: None,
        };
        assert!(removal.affects(&path("shrimp/north/ponds")));
    }

    #[test]
    fn live_message_is_tagged() {
        let msg = LiveMessage::InsightToken {
            id: "i1".into(),
            text: "Feed".into(),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "insightToken");
        assert_eq!(v["id"], "i1");

        let change = LiveMessage::Change(StoreChange {
            path: path("budgets/b1"),
            op: ChangeOp::Remove,
            value: None,
        });
        let v = serde_json::to_value(&change).unwrap();
        assert_eq!(v["type"], "change");
        assert_eq!(v["path"], "budgets/b1");
        assert_eq!(v["op"], "remove");
    }

    #[test]
    fn client_message_parses_subscribe() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","path":"transactions"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                path: path("transactions")
            }
        );
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"subscribe","path":"a.b"}"#).is_err());
    }

    #[test]
    fn notification_action_kebab_case() {
        let a: NotificationAction = serde_json::from_value(json!("mark-half-day")).unwrap();
        assert_eq!(a, NotificationAction::MarkHalfDay);
    }
}
