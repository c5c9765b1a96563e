//! The boundary with the agent-to-agent protocol layer.
//!
//! The protocol adapter converts its wire representation into a
//! [`RequestContext`] and hands the core a [`ProgressSink`]; the core never
//! sees wire framing. Dynamic part shapes are normalised once, by
//! [`Part::extract_text`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One part of a protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    Data {
        data: serde_json::Value,
    },
    File {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uri: Option<String>,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// The textual content of this part; non-text parts contribute nothing.
    pub fn extract_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Join the text of all parts in part order.
    pub fn join_text(parts: &[Part]) -> String {
        parts.iter().filter_map(Part::extract_text).collect()
    }
}

/// Who spoke a prior turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Agent,
}

/// One prior turn of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            parts: vec![Part::text(text)],
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Agent,
            parts: vec![Part::text(text)],
        }
    }
}

/// Everything the core gets to see about one inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub task_id: String,
    pub context_id: String,
    /// Parts of the message being answered
    pub current_message: Vec<Part>,
    /// Prior turns in chronological order
    pub prior_turns: Vec<Turn>,
}

impl RequestContext {
    /// A context with a single text part and no history.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            context_id: uuid::Uuid::new_v4().to_string(),
            current_message: vec![Part::text(text)],
            prior_turns: Vec::new(),
        }
    }
}

/// The protocol layer's per-request status channel.
///
/// Sinks are infallible from the core's point of view: a caller that went
/// away must not abort an in-flight loop.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// An intermediate (or final, when `is_final`) status update.
    async fn notify(&self, text: &str, is_final: bool);

    /// Emit the answer as the completion artifact and finish the task.
    async fn complete(&self, text: &str);

    /// Finish the task as failed with a user-visible message.
    async fn fail(&self, text: &str);
}

/// A sink that drops everything. Used by `invoke`, which has no caller to report to.
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn notify(&self, _text: &str, _is_final: bool) {}
    async fn complete(&self, _text: &str) {}
    async fn fail(&self, _text: &str) {}
}
