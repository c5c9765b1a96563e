//! Shared test helpers for loop and runtime tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use agentmux_core::error::{ProviderError, ToolError};
use agentmux_core::message::{Message, MessageToolCall};
use agentmux_core::protocol::ProgressSink;
use agentmux_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use agentmux_core::tool::{ToolOutput, ToolTransport};
use agentmux_tools::{McpTool, ToolCatalog, ToolDiscovery, ToolInvoker};
use async_trait::async_trait;

use crate::react::ModelSettings;

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue. When the
/// queue is empty the `repeat` response is returned if set, otherwise the
/// call fails with a network error.
pub struct SequentialMockProvider {
    responses: Mutex<VecDeque<ProviderResponse>>,
    repeat: Option<ProviderResponse>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a provider that returns a single text response (no tool calls).
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![make_text_response(text)])
    }

    /// Create a provider that first returns tool calls, then a final answer.
    pub fn tool_then_answer(tool_calls: Vec<MessageToolCall>, thought: &str, answer: &str) -> Self {
        Self::new(vec![make_tool_call_response(tool_calls, thought), make_text_response(answer)])
    }

    /// Create a provider that returns the same response forever.
    pub fn repeating(response: ProviderResponse) -> Self {
        Self {
            repeat: Some(response),
            ..Self::new(vec![])
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let next = self.responses.lock().unwrap().pop_front();
        next.or_else(|| self.repeat.clone())
            .ok_or_else(|| ProviderError::Network("no more scripted responses".into()))
    }
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> ProviderResponse {
    make_tool_call_response(vec![], text)
}

/// Create a response with tool calls and optional thought content.
pub fn make_tool_call_response(tool_calls: Vec<MessageToolCall>, thought: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_tool_calls(thought, tool_calls),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Helper to create a native tool call.
pub fn make_tool_call(id: &str, name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }
}

pub fn test_settings() -> ModelSettings {
    ModelSettings {
        model: "mock-model".into(),
        temperature: 0.0,
        max_tokens: None,
    }
}

/// The tools of the fake `calc` endpoint.
pub fn calc_tools() -> Vec<McpTool> {
    vec![
        McpTool {
            name: "add".into(),
            description: Some("Add two numbers".into()),
            input_schema: Some(serde_json::json!({
                "type": "object",
                "properties": { "a": { "type": "number" }, "b": { "type": "number" } }
            })),
        },
        McpTool {
            name: "div".into(),
            description: Some("Divide two numbers".into()),
            input_schema: None,
        },
    ]
}

/// An invoker over the `calc` endpoint backed by `transport`.
pub fn calc_invoker(transport: Arc<ScriptedTransport>) -> ToolInvoker {
    let catalog = ToolCatalog::new(vec![("calc".into(), calc_tools())]);
    ToolInvoker::new(Arc::new(catalog), transport)
}

/// A tool endpoint with canned answers per tool name.
pub struct ScriptedTransport {
    answers: HashMap<String, Result<String, String>>,
    calls: Mutex<Vec<(String, String, serde_json::Value)>>,
    discoveries: Mutex<usize>,
    unreachable_for: usize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            answers: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            discoveries: Mutex::new(0),
            unreachable_for: 0,
        }
    }

    /// The first `attempts` discoveries find nothing, as if the endpoint were down.
    pub fn unreachable_for(mut self, attempts: usize) -> Self {
        self.unreachable_for = attempts;
        self
    }

    pub fn ok(mut self, tool: &str, text: &str) -> Self {
        self.answers.insert(tool.into(), Ok(text.into()));
        self
    }

    pub fn fail(mut self, tool: &str, message: &str) -> Self {
        self.answers.insert(tool.into(), Err(message.into()));
        self
    }

    /// `(endpoint, tool, arguments)` for every call, in order.
    pub fn calls(&self) -> Vec<(String, String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn discoveries(&self) -> usize {
        *self.discoveries.lock().unwrap()
    }
}

#[async_trait]
impl ToolTransport for ScriptedTransport {
    async fn call(
        &self,
        endpoint: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolOutput, ToolError> {
        self.calls
            .lock()
            .unwrap()
            .push((endpoint.into(), tool_name.into(), arguments));
        match self.answers.get(tool_name) {
            Some(Ok(text)) => Ok(ToolOutput::text(text.clone())),
            Some(Err(message)) => Err(ToolError::Remote {
                endpoint: endpoint.into(),
                code: -32000,
                message: message.clone(),
            }),
            None => Err(ToolError::Transport {
                endpoint: endpoint.into(),
                reason: "no scripted answer".into(),
            }),
        }
    }
}

#[async_trait]
impl ToolDiscovery for ScriptedTransport {
    async fn discover(&self, endpoints: &[String]) -> Vec<(String, Vec<McpTool>)> {
        let attempt = {
            let mut count = self.discoveries.lock().unwrap();
            *count += 1;
            *count
        };
        if attempt <= self.unreachable_for {
            return Vec::new();
        }
        endpoints
            .iter()
            .filter(|e| e.as_str() == "calc")
            .map(|e| (e.clone(), calc_tools()))
            .collect()
    }
}

/// What a [`RecordingSink`] saw.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Notify(String, bool),
    Complete(String),
    Fail(String),
}

/// A progress sink that records every call.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Text of every `notify` call, in order.
    pub fn notifications(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Notify(text, _) => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn notify(&self, text: &str, is_final: bool) {
        self.events.lock().unwrap().push(SinkEvent::Notify(text.into(), is_final));
    }

    async fn complete(&self, text: &str) {
        self.events.lock().unwrap().push(SinkEvent::Complete(text.into()));
    }

    async fn fail(&self, text: &str) {
        self.events.lock().unwrap().push(SinkEvent::Fail(text.into()));
    }
}
