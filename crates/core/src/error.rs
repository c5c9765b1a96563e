//! Error types for the agentmux domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum.

use thiserror::Error;

/// The top-level error type for all agentmux operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model invocation errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Listener lifecycle errors ---
    #[error("Listener error: {0}")]
    Listener(#[from] ListenerError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures of the model client. These are never swallowed by the ReAct loop.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures of a single tool call. Always contained inside the loop.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool '{0}' not found in catalog")]
    NotFound(String),

    #[error("Transport failure calling {endpoint}: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("Remote error from {endpoint}: [{code}] {message}")]
    Remote {
        endpoint: String,
        code: i64,
        message: String,
    },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Failures of the listener lifecycle.
#[derive(Debug, Clone, Error)]
pub enum ListenerError {
    #[error("Agent '{0}' is not configured")]
    UnknownAgent(String),

    #[error("Agent '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Failed to bind agent '{name}' on {addr}: {reason}")]
    Bind {
        name: String,
        addr: String,
        reason: String,
    },
}
