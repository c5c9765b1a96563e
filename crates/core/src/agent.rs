//! Agent descriptor types.

use serde::{Deserialize, Serialize};

/// Immutable description of one hosted agent, loaded once at process start.
///
/// `name` is unique across the process and identifies the agent's listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique agent name
    pub name: String,

    /// Which runtime serves this agent
    #[serde(default)]
    pub kind: AgentKind,

    /// Bind host
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port (0 = ephemeral)
    pub port: u16,

    /// Human-readable description (published on the agent card)
    #[serde(default)]
    pub description: String,

    /// How tool calls are exchanged with the model
    #[serde(default)]
    pub calling_convention: CallingConvention,

    /// Maximum tool call rounds per request (safety limit)
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,

    /// Optional system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// MCP servers this agent may use (empty = all configured servers)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_max_tool_iterations() -> u32 {
    5
}

impl AgentDescriptor {
    /// Create a descriptor with defaults for everything but name, kind and port.
    pub fn new(name: impl Into<String>, kind: AgentKind, port: u16) -> Self {
        Self {
            name: name.into(),
            kind,
            host: default_host(),
            port,
            description: String::new(),
            calling_convention: CallingConvention::default(),
            max_tool_iterations: default_max_tool_iterations(),
            system_prompt: None,
            mcp_servers: Vec::new(),
        }
    }

    /// `host:port` as configured.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL advertised for this agent.
    pub fn url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }
}

/// Which runtime variant serves an agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Fixed greeting, no model
    #[default]
    Echo,
    /// Single model call, no tools
    Llm,
    /// ReAct loop over MCP tools
    Mcp,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Echo => write!(f, "echo"),
            Self::Llm => write!(f, "llm"),
            Self::Mcp => write!(f, "mcp"),
        }
    }
}

/// How tool calls travel between the loop and the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallingConvention {
    /// Structured tool-call fields returned by the model client
    #[default]
    Native,
    /// Tool calls encoded in model-generated text
    Prompt,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_defaults() {
        let desc: AgentDescriptor =
            serde_json::from_value(serde_json::json!({ "name": "a", "port": 9001 })).unwrap();
        assert_eq!(desc.kind, AgentKind::Echo);
        assert_eq!(desc.calling_convention, CallingConvention::Native);
        assert_eq!(desc.max_tool_iterations, 5);
        assert_eq!(desc.bind_addr(), "127.0.0.1:9001");
    }

    #[test]
    fn convention_parses_snake_case() {
        let conv: CallingConvention = serde_json::from_str("\"prompt\"").unwrap();
        assert_eq!(conv, CallingConvention::Prompt);
    }
}
