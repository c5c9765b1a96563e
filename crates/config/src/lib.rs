//! Configuration loading, validation, and management for agentmux.
//!
//! Loads configuration from `agentmux.toml` (or the path in
//! `AGENTMUX_CONFIG`) with environment variable overrides. Validates all
//! settings at startup; agent descriptors are immutable afterwards.

use agentmux_core::agent::{AgentDescriptor, AgentKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "agentmux.toml";

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model client configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Listener lifecycle configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Remote MCP tool servers
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,

    /// Hosted agents, one listener each
    #[serde(default)]
    pub agents: Vec<AgentDescriptor>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_llm_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_url(),
            api_key: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
            timeout_secs: default_llm_timeout(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// How long `stop` waits for in-flight requests before dropping a listener
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_shutdown_grace_ms() -> u64 {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,

    pub url: String,

    #[serde(default = "default_mcp_timeout")]
    pub timeout_secs: u64,

    /// Environment variable holding a bearer token, if the server needs one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

fn default_mcp_timeout() -> u64 {
    30
}

impl AppConfig {
    /// Load from a specific path, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply `AGENTMUX_*` overrides from the given lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("AGENTMUX_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(model) = lookup("AGENTMUX_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = lookup("AGENTMUX_LLM_URL") {
            self.llm.base_url = url;
        }
    }

    /// Look up one agent descriptor by name.
    pub fn agent(&self, name: &str) -> Option<&AgentDescriptor> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// The MCP servers an agent may use, in declaration order.
    pub fn mcp_servers_for(&self, agent: &AgentDescriptor) -> Vec<McpServerConfig> {
        self.mcp_servers
            .iter()
            .filter(|s| agent.mcp_servers.is_empty() || agent.mcp_servers.contains(&s.name))
            .cloned()
            .collect()
    }

    /// Whether any configured agent needs the model client.
    pub fn needs_model(&self) -> bool {
        self.agents.iter().any(|a| a.kind != AgentKind::Echo)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let mut servers = HashSet::new();
        for server in &self.mcp_servers {
            if !servers.insert(server.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate MCP server name '{}'",
                    server.name
                )));
            }
        }

        let mut names = HashSet::new();
        let mut addrs = HashSet::new();
        for agent in &self.agents {
            if agent.name.trim().is_empty() {
                return Err(ConfigError::ValidationError("agent name must not be empty".into()));
            }
            if !names.insert(agent.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate agent name '{}'",
                    agent.name
                )));
            }
            if agent.max_tool_iterations == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "agent '{}': max_tool_iterations must be at least 1",
                    agent.name
                )));
            }
            if agent.port != 0 && !addrs.insert(agent.bind_addr()) {
                return Err(ConfigError::ValidationError(format!(
                    "agent '{}': address {} is already used by another agent",
                    agent.name,
                    agent.bind_addr()
                )));
            }
            if let Some(missing) = agent.mcp_servers.iter().find(|s| !servers.contains(s.as_str())) {
                return Err(ConfigError::ValidationError(format!(
                    "agent '{}' references unknown MCP server '{}'",
                    agent.name, missing
                )));
            }
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
