//! # agentmux Core
//!
//! Domain types, traits, and error definitions for the agentmux multi-agent
//! host. This crate has **no framework dependencies**: it defines the domain
//! model that every other crate implements against.
//!
//! ## Seams
//!
//! Each external collaborator is a trait here, with implementations living
//! in their own crates:
//! - [`Provider`]: the language-model client
//! - [`ToolTransport`]: the remote tool-execution client
//! - [`ProgressSink`]: the protocol layer's per-request status channel

pub mod agent;
pub mod error;
pub mod event;
pub mod message;
pub mod protocol;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentDescriptor, AgentKind, CallingConvention};
pub use error::{Error, ListenerError, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{Message, MessageToolCall, Role};
pub use protocol::{NullSink, Part, ProgressSink, RequestContext, Turn, TurnRole};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use tool::{ContentBlock, ToolCallRequest, ToolCallResult, ToolDescriptor, ToolOutput, ToolTransport};
