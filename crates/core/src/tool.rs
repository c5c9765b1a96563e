//! Tool domain types and the remote tool transport trait.
//!
//! Tools are not implemented in-process: they live on remote endpoints and
//! are reached through a [`ToolTransport`]. The loop only ever sees the
//! normalised, text-typed [`ToolCallResult`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// A calling-convention-neutral description of one remote tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Globally unique key, `"<endpoint>:<tool-name>"`
    pub key: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema of the tool's input, when the endpoint declared one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
}

/// A tool call requested by the model, in either calling convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Call ID (model-provided in native convention, synthesized in prompt convention)
    pub id: String,

    /// Catalog key of the tool to execute
    pub tool_key: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The normalised outcome of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// The call ID this result answers
    pub tool_call_id: String,

    /// Result text (structured results are serialized JSON)
    pub content: String,

    /// Whether the call failed
    pub is_error: bool,
}

/// One content fragment returned by a remote tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        #[serde(default)]
        data: String,
        #[serde(default, rename = "mimeType")]
        mime_type: Option<String>,
    },
    #[serde(other)]
    Unsupported,
}

impl ContentBlock {
    /// Get text content if this is a text block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// The raw response of a remote tool call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    #[serde(default)]
    pub content: Vec<ContentBlock>,

    #[serde(default, rename = "structuredContent", skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<serde_json::Value>,

    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl ToolOutput {
    /// A single-text-block output.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            ..Self::default()
        }
    }
}

/// The remote tool transport.
///
/// Dispatches a named call to a named endpoint. Shared across concurrent
/// loops; implementations pool their own connections.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn call(
        &self,
        endpoint: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolOutput, ToolError>;
}
