//! Progress notifications surfaced to the caller while a request runs.

/// A status update emitted during execution.
///
/// `Display` renders the user-facing text sent through the progress sink.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The request was accepted and is being worked on.
    Started,

    /// The model asked for tools; they are about to run.
    Thinking { tool_count: usize },

    /// One tool call finished.
    ToolSucceeded { tool_key: String },

    /// One tool call failed; the loop carries on.
    ToolFailed { tool_key: String, error: String },
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => write!(f, "🔄 Processing your request..."),
            Self::Thinking { tool_count } => write!(f, "🤔 Thinking... (calling {tool_count} tool(s))"),
            Self::ToolSucceeded { tool_key } => write!(f, "✓ Tool '{tool_key}' executed"),
            Self::ToolFailed { tool_key, error } => write!(f, "❌ Tool '{tool_key}' failed: {error}"),
        }
    }
}
