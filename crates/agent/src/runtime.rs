//! Agent runtimes: what answers a request once the listener has parsed it.
//!
//! Every variant implements [`AgentRuntime`]. The protocol layer calls
//! [`AgentRuntime::execute`], which prepares the conversation, reports
//! progress and the final answer through the sink, and makes sure a
//! failure is reported before it is returned.

use std::sync::Arc;

use agentmux_config::AppConfig;
use agentmux_core::agent::{AgentDescriptor, AgentKind};
use agentmux_core::event::{DomainEvent, EventBus};
use agentmux_core::message::Message;
use agentmux_core::protocol::{NullSink, Part, ProgressSink, RequestContext, TurnRole};
use agentmux_core::provider::{Provider, ProviderRequest};
use agentmux_core::tool::ToolTransport;
use agentmux_core::{Error, Result};
use agentmux_tools::{ToolCatalog, ToolDiscovery, ToolInvoker};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use crate::progress::ProgressEvent;
use crate::react::{ModelSettings, ReactLoop};

/// The conversation handed to a runtime.
#[derive(Debug, Clone, Default)]
pub struct ConversationInput {
    /// Prior turns, oldest first
    pub history: Vec<Message>,
    /// Text of the message being answered
    pub current: String,
}

impl ConversationInput {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            history: Vec::new(),
            current: text.into(),
        }
    }
}

/// Build the conversation input from a request context.
///
/// Text parts are joined in part order; prior turns keep their
/// chronological order and turns without text are dropped.
pub fn prepare_conversation(ctx: &RequestContext) -> ConversationInput {
    let history = ctx
        .prior_turns
        .iter()
        .filter_map(|turn| {
            let text = Part::join_text(&turn.parts);
            if text.is_empty() {
                return None;
            }
            Some(match turn.role {
                TurnRole::User => Message::user(text),
                TurnRole::Agent => Message::assistant(text),
            })
        })
        .collect();

    ConversationInput {
        history,
        current: Part::join_text(&ctx.current_message),
    }
}

/// One hosted agent.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// The descriptor this runtime was built from.
    fn descriptor(&self) -> &AgentDescriptor;

    /// Extract the conversation from a request.
    fn prepare(&self, ctx: &RequestContext) -> ConversationInput {
        prepare_conversation(ctx)
    }

    /// Produce an answer, reporting intermediate progress to `sink`.
    async fn run(&self, input: &ConversationInput, sink: &dyn ProgressSink) -> Result<String>;

    /// Answer a single message without progress reporting.
    async fn invoke(&self, text: &str) -> Result<String> {
        self.run(&ConversationInput::from_text(text), &NullSink).await
    }

    /// Serve one request end to end.
    ///
    /// Returns the answer, or `None` when the request had no text. Errors
    /// are reported through `sink.fail` before being returned.
    async fn execute(&self, ctx: &RequestContext, sink: &dyn ProgressSink) -> Result<Option<String>> {
        let name = &self.descriptor().name;
        let input = self.prepare(ctx);
        if input.current.trim().is_empty() {
            sink.fail("No message content found").await;
            return Ok(None);
        }

        info!(agent = %name, task = %ctx.task_id, chars = input.current.len(), "Processing request");
        sink.notify(&ProgressEvent::Started.to_string(), false).await;

        match self.run(&input, sink).await {
            Ok(answer) => {
                sink.complete(&answer).await;
                Ok(Some(answer))
            }
            Err(e) => {
                error!(agent = %name, task = %ctx.task_id, error = %e, "Request failed");
                sink.fail(&format!("Sorry, an error occurred while processing your request: {e}"))
                    .await;
                Err(e)
            }
        }
    }
}

/// Answers every request with a fixed greeting.
pub struct EchoAgent {
    descriptor: AgentDescriptor,
}

impl EchoAgent {
    pub fn new(descriptor: AgentDescriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl AgentRuntime for EchoAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn run(&self, _input: &ConversationInput, _sink: &dyn ProgressSink) -> Result<String> {
        Ok(format!(
            "Echo Agent ({}) response: Hello from Echo Agent!",
            self.descriptor.name
        ))
    }
}

/// One model call per request, no tools.
pub struct LlmAgent {
    descriptor: AgentDescriptor,
    provider: Arc<dyn Provider>,
    settings: ModelSettings,
    event_bus: Arc<EventBus>,
}

impl LlmAgent {
    pub fn new(
        descriptor: AgentDescriptor,
        provider: Arc<dyn Provider>,
        settings: ModelSettings,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            descriptor,
            provider,
            settings,
            event_bus,
        }
    }
}

#[async_trait]
impl AgentRuntime for LlmAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn run(&self, input: &ConversationInput, _sink: &dyn ProgressSink) -> Result<String> {
        let system = self
            .descriptor
            .system_prompt
            .clone()
            .unwrap_or_else(|| "You are a helpful AI assistant.".into());

        let mut messages = Vec::with_capacity(input.history.len() + 2);
        messages.push(Message::system(system));
        messages.extend(input.history.iter().cloned());
        messages.push(Message::user(&input.current));

        let response = self
            .provider
            .complete(ProviderRequest {
                model: self.settings.model.clone(),
                messages,
                temperature: self.settings.temperature,
                max_tokens: self.settings.max_tokens,
                tools: Vec::new(),
            })
            .await?;

        if let Some(usage) = &response.usage {
            self.event_bus.publish(DomainEvent::ResponseGenerated {
                agent: self.descriptor.name.clone(),
                model: response.model.clone(),
                tokens_used: usage.total_tokens,
                timestamp: Utc::now(),
            });
        }

        Ok(response.message.content)
    }
}

/// ReAct over remote MCP tools.
///
/// Tools are discovered on the first request and reused once every
/// endpoint has answered. Until then each request discovers again.
/// Concurrent first requests share one discovery.
pub struct McpAgent {
    descriptor: AgentDescriptor,
    provider: Arc<dyn Provider>,
    settings: ModelSettings,
    endpoints: Vec<String>,
    discovery: Arc<dyn ToolDiscovery>,
    transport: Arc<dyn ToolTransport>,
    event_bus: Arc<EventBus>,
    react: OnceCell<ReactLoop>,
}

impl McpAgent {
    pub fn new(
        descriptor: AgentDescriptor,
        provider: Arc<dyn Provider>,
        settings: ModelSettings,
        endpoints: Vec<String>,
        discovery: Arc<dyn ToolDiscovery>,
        transport: Arc<dyn ToolTransport>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            descriptor,
            provider,
            settings,
            endpoints,
            discovery,
            transport,
            event_bus,
            react: OnceCell::new(),
        }
    }

    /// Discover tools and build the loop over them.
    ///
    /// `Err` carries a loop over a partial catalog when some endpoint did not
    /// answer. It serves the current request only.
    async fn build_loop(&self) -> std::result::Result<ReactLoop, ReactLoop> {
        let found = self.discovery.discover(&self.endpoints).await;
        let missing: Vec<&str> = self
            .endpoints
            .iter()
            .filter(|endpoint| !found.iter().any(|(name, _)| name == *endpoint))
            .map(String::as_str)
            .collect();
        let catalog = ToolCatalog::new(found);
        let tools = catalog.len();

        let invoker = ToolInvoker::new(Arc::new(catalog), self.transport.clone());
        let react = ReactLoop::new(
            self.descriptor.name.clone(),
            self.provider.clone(),
            self.settings.clone(),
            invoker,
            self.event_bus.clone(),
        )
        .with_convention(self.descriptor.calling_convention)
        .with_max_tool_iterations(self.descriptor.max_tool_iterations)
        .with_system_prompt(self.descriptor.system_prompt.clone());

        if missing.is_empty() {
            info!(agent = %self.descriptor.name, tools, "Tool catalog ready");
            Ok(react)
        } else {
            warn!(
                agent = %self.descriptor.name,
                tools,
                missing = ?missing,
                "Tool discovery incomplete, retrying on the next request"
            );
            Err(react)
        }
    }
}

#[async_trait]
impl AgentRuntime for McpAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn run(&self, input: &ConversationInput, sink: &dyn ProgressSink) -> Result<String> {
        let result = match self.react.get_or_try_init(|| self.build_loop()).await {
            Ok(react) => react.run(&input.history, &input.current, sink).await?,
            Err(partial) => partial.run(&input.history, &input.current, sink).await?,
        };
        Ok(result.answer)
    }
}

/// Shared collaborators for building runtimes.
#[derive(Clone)]
pub struct RuntimeDeps {
    /// Model client; required by every kind except echo
    pub provider: Option<Arc<dyn Provider>>,
    pub discovery: Arc<dyn ToolDiscovery>,
    pub transport: Arc<dyn ToolTransport>,
    pub event_bus: Arc<EventBus>,
}

/// Build the runtime for one configured agent.
pub fn build_runtime(
    descriptor: &AgentDescriptor,
    config: &AppConfig,
    deps: &RuntimeDeps,
) -> Result<Arc<dyn AgentRuntime>> {
    let model_client = || {
        deps.provider.clone().ok_or_else(|| Error::Config {
            message: format!("Agent '{}' needs a model client but none is configured", descriptor.name),
        })
    };

    let runtime: Arc<dyn AgentRuntime> = match descriptor.kind {
        AgentKind::Echo => Arc::new(EchoAgent::new(descriptor.clone())),
        AgentKind::Llm => Arc::new(LlmAgent::new(
            descriptor.clone(),
            model_client()?,
            ModelSettings::from_config(&config.llm),
            deps.event_bus.clone(),
        )),
        AgentKind::Mcp => {
            let endpoints = config
                .mcp_servers_for(descriptor)
                .into_iter()
                .map(|s| s.name)
                .collect();
            Arc::new(McpAgent::new(
                descriptor.clone(),
                model_client()?,
                ModelSettings::from_config(&config.llm),
                endpoints,
                deps.discovery.clone(),
                deps.transport.clone(),
                deps.event_bus.clone(),
            ))
        }
    };
    Ok(runtime)
}
