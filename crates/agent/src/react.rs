//! ReAct loop: Thought → Action → Observation until an answer appears.
//!
//! Each round asks the model for a response. A response without tool calls
//! ends the loop with that text as the answer. Otherwise every requested
//! call is executed in the order the model gave, the results are appended
//! to the history, and the model is asked again.
//!
//! # Bounds
//!
//! At most `max_tool_iterations + 1` model calls are made. Running out
//! yields [`EXHAUSTED_ANSWER`] rather than an error.
//!
//! # Failures
//!
//! Tool failures of any kind become error-tagged results the model can
//! read. Only a failed model call ends the loop early, as an `Err`.

use std::sync::Arc;
use std::time::Instant;

use agentmux_config::LlmConfig;
use agentmux_core::agent::CallingConvention;
use agentmux_core::error::ToolError;
use agentmux_core::event::{DomainEvent, EventBus};
use agentmux_core::message::{Message, MessageToolCall};
use agentmux_core::protocol::ProgressSink;
use agentmux_core::provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition};
use agentmux_core::tool::{ToolCallRequest, ToolCallResult};
use agentmux_tools::ToolInvoker;
use agentmux_tools::invoker::error_result;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::progress::ProgressEvent;
use crate::prompt;

/// Answer returned when the iteration budget runs out.
pub const EXHAUSTED_ANSWER: &str = "Sorry, I couldn't complete the task within the allowed tool calls.";

/// Model parameters sent with every request.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl ModelSettings {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

/// How a loop run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The model produced a tool-free response.
    Done,
    /// The model was still calling tools when the budget ran out.
    Exhausted,
}

/// The result of one loop run.
#[derive(Debug, Clone)]
pub struct ReactResult {
    /// The final answer text.
    pub answer: String,
    pub outcome: LoopOutcome,
    /// Number of model invocations.
    pub model_calls: usize,
    /// Total tool calls made.
    pub tool_calls_made: usize,
    /// Full message history, including the seed messages.
    pub messages: Vec<Message>,
}

/// One agent's loop configuration. Cheap to share; every `run` owns its
/// own history.
pub struct ReactLoop {
    agent: String,
    provider: Arc<dyn Provider>,
    settings: ModelSettings,
    invoker: ToolInvoker,
    convention: CallingConvention,
    max_tool_iterations: u32,
    system_prompt: String,
    event_bus: Arc<EventBus>,
}

impl ReactLoop {
    pub fn new(
        agent: impl Into<String>,
        provider: Arc<dyn Provider>,
        settings: ModelSettings,
        invoker: ToolInvoker,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            agent: agent.into(),
            provider,
            settings,
            invoker,
            convention: CallingConvention::Native,
            max_tool_iterations: 5,
            system_prompt: prompt::DEFAULT_SYSTEM_PROMPT.into(),
            event_bus,
        }
    }

    pub fn with_convention(mut self, convention: CallingConvention) -> Self {
        self.convention = convention;
        self
    }

    pub fn with_max_tool_iterations(mut self, max: u32) -> Self {
        self.max_tool_iterations = max;
        self
    }

    /// Replace the default system prompt. `None` keeps the default.
    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        if let Some(p) = system_prompt {
            self.system_prompt = p;
        }
        self
    }

    /// Run the loop for one user message.
    ///
    /// `history` holds prior turns as user/assistant messages; it is placed
    /// between the system prompt and the new message.
    pub async fn run(
        &self,
        history: &[Message],
        user_message: &str,
        sink: &dyn ProgressSink,
    ) -> agentmux_core::Result<ReactResult> {
        let max_model_calls = self.max_tool_iterations as usize + 1;
        let mut messages = self.seed(history, user_message);
        let tool_defs: Vec<ToolDefinition> = match self.convention {
            CallingConvention::Native => self.invoker.catalog().native_definitions(),
            CallingConvention::Prompt => Vec::new(),
        };
        let mut tool_calls_made = 0usize;

        info!(
            agent = %self.agent,
            convention = ?self.convention,
            tools = self.invoker.catalog().len(),
            max_model_calls,
            "ReAct loop starting"
        );

        for iteration in 1..=max_model_calls {
            debug!(agent = %self.agent, iteration, "ReAct iteration");

            let request = ProviderRequest {
                model: self.settings.model.clone(),
                messages: messages.clone(),
                temperature: self.settings.temperature,
                max_tokens: self.settings.max_tokens,
                tools: tool_defs.clone(),
            };

            let response = self.provider.complete(request).await?;
            self.record_usage(&response);

            let round = match self.convention {
                CallingConvention::Native => self.native_round(response, &mut messages, sink).await,
                CallingConvention::Prompt => {
                    self.prompt_round(response, iteration, &mut messages, sink)
                        .await
                }
            };

            match round {
                Round::Answer(answer) => {
                    info!(
                        agent = %self.agent,
                        iterations = iteration,
                        tool_calls = tool_calls_made,
                        "ReAct loop completed"
                    );
                    return Ok(ReactResult {
                        answer,
                        outcome: LoopOutcome::Done,
                        model_calls: iteration,
                        tool_calls_made,
                        messages,
                    });
                }
                Round::Tools(n) => tool_calls_made += n,
            }
        }

        warn!(
            agent = %self.agent,
            max_tool_iterations = self.max_tool_iterations,
            "ReAct: max iterations reached"
        );

        Ok(ReactResult {
            answer: EXHAUSTED_ANSWER.into(),
            outcome: LoopOutcome::Exhausted,
            model_calls: max_model_calls,
            tool_calls_made,
            messages,
        })
    }

    fn seed(&self, history: &[Message], user_message: &str) -> Vec<Message> {
        let system = match self.convention {
            CallingConvention::Native => self.system_prompt.clone(),
            CallingConvention::Prompt => prompt::build_system_prompt(&self.system_prompt, self.invoker.catalog()),
        };
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system));
        messages.extend(history.iter().cloned());
        messages.push(Message::user(user_message));
        messages
    }

    async fn native_round(
        &self,
        response: ProviderResponse,
        messages: &mut Vec<Message>,
        sink: &dyn ProgressSink,
    ) -> Round {
        if response.message.tool_calls.is_empty() {
            let answer = response.message.content.clone();
            messages.push(response.message);
            return Round::Answer(answer);
        }

        let tool_calls: Vec<MessageToolCall> = response.message.tool_calls.clone();
        sink.notify(
            &ProgressEvent::Thinking {
                tool_count: tool_calls.len(),
            }
            .to_string(),
            false,
        )
        .await;
        messages.push(response.message);

        for tc in &tool_calls {
            let arguments = parse_arguments(&tc.arguments);
            let result = self.run_tool(&tc.id, &tc.name, arguments, sink).await;
            messages.push(Message::tool_result(&result.tool_call_id, &result.content));
        }

        Round::Tools(tool_calls.len())
    }

    async fn prompt_round(
        &self,
        response: ProviderResponse,
        iteration: usize,
        messages: &mut Vec<Message>,
        sink: &dyn ProgressSink,
    ) -> Round {
        let text = response.message.content;
        let calls = prompt::parse_tool_calls(&text, iteration);
        if calls.is_empty() {
            messages.push(Message::assistant(&text));
            return Round::Answer(text);
        }

        sink.notify(&ProgressEvent::Thinking { tool_count: calls.len() }.to_string(), false)
            .await;
        messages.push(Message::assistant(&text));

        let mut results = Vec::with_capacity(calls.len());
        for call in &calls {
            let result = self
                .run_tool(&call.id, &call.tool_key, Ok(call.arguments.clone()), sink)
                .await;
            results.push(result);
        }
        messages.push(Message::user(prompt::format_tool_results(&calls, &results)));

        Round::Tools(calls.len())
    }

    /// Execute one call, report it, and publish the outcome.
    async fn run_tool(
        &self,
        id: &str,
        tool_key: &str,
        arguments: Result<serde_json::Value, ToolError>,
        sink: &dyn ProgressSink,
    ) -> ToolCallResult {
        let start = Instant::now();
        let result = match arguments {
            Ok(arguments) => {
                self.invoker
                    .invoke(&ToolCallRequest {
                        id: id.to_string(),
                        tool_key: tool_key.to_string(),
                        arguments,
                    })
                    .await
            }
            Err(e) => {
                warn!(agent = %self.agent, tool = %tool_key, error = %e, "Rejected tool call arguments");
                error_result(id, &e)
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        self.event_bus.publish(DomainEvent::ToolExecuted {
            agent: self.agent.clone(),
            tool_key: tool_key.to_string(),
            success: !result.is_error,
            duration_ms,
            timestamp: Utc::now(),
        });

        let event = if result.is_error {
            ProgressEvent::ToolFailed {
                tool_key: tool_key.to_string(),
                error: failure_reason(&result),
            }
        } else {
            ProgressEvent::ToolSucceeded {
                tool_key: tool_key.to_string(),
            }
        };
        sink.notify(&event.to_string(), false).await;

        result
    }

    fn record_usage(&self, response: &ProviderResponse) {
        if let Some(usage) = &response.usage {
            self.event_bus.publish(DomainEvent::ResponseGenerated {
                agent: self.agent.clone(),
                model: response.model.clone(),
                tokens_used: usage.total_tokens,
                timestamp: Utc::now(),
            });
        }
    }
}

enum Round {
    Answer(String),
    /// Number of tool calls executed this round.
    Tools(usize),
}

fn parse_arguments(raw: &str) -> Result<serde_json::Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// The `error` field of a JSON error result, or the raw content.
fn failure_reason(result: &ToolCallResult) -> String {
    serde_json::from_str::<serde_json::Value>(&result.content)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| result.content.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use agentmux_core::error::ProviderError;
    use agentmux_core::message::Role;
    use async_trait::async_trait;
    use serde_json::json;

    fn react(provider: Arc<SequentialMockProvider>, transport: Arc<ScriptedTransport>) -> ReactLoop {
        ReactLoop::new(
            "assistant",
            provider,
            test_settings(),
            calc_invoker(transport),
            Arc::new(EventBus::default()),
        )
    }

    #[tokio::test]
    async fn tool_free_response_is_answer_verbatim() {
        let provider = Arc::new(SequentialMockProvider::single_text("hi"));
        let transport = Arc::new(ScriptedTransport::new());
        let sink = RecordingSink::default();

        let result = react(provider.clone(), transport.clone())
            .run(&[], "hello", &sink)
            .await
            .unwrap();

        assert_eq!(result.answer, "hi");
        assert_eq!(result.outcome, LoopOutcome::Done);
        assert_eq!(result.model_calls, 1);
        assert_eq!(provider.call_count(), 1);
        assert!(transport.calls().is_empty());
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn native_tool_round_then_answer() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("call_1", "calc:add", json!({ "a": 2, "b": 3 }))],
            "",
            "The answer is 5",
        ));
        let transport = Arc::new(ScriptedTransport::new().ok("add", "5"));
        let sink = RecordingSink::default();

        let result = react(provider.clone(), transport.clone())
            .run(&[], "What is 2 + 3?", &sink)
            .await
            .unwrap();

        assert_eq!(result.answer, "The answer is 5");
        assert_eq!(result.model_calls, 2);
        assert_eq!(result.tool_calls_made, 1);
        assert_eq!(provider.call_count(), 2);
        assert_eq!(transport.calls(), vec![("calc".to_string(), "add".to_string(), json!({ "a": 2, "b": 3 }))]);

        // The second request saw the tool result linked to its call id
        let requests = provider.requests();
        let tool_msg = requests[1].messages.iter().find(|m| m.role == Role::Tool).unwrap();
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool_msg.content, "5");

        // Native requests offer the catalog
        assert_eq!(requests[0].tools.len(), 2);
        assert_eq!(requests[0].tools[0].name, "calc:add");

        assert_eq!(
            sink.notifications(),
            vec!["🤔 Thinking... (calling 1 tool(s))", "✓ Tool 'calc:add' executed"]
        );
    }

    #[tokio::test]
    async fn results_appended_in_request_order_despite_failures() {
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![
                make_tool_call("c1", "calc:div", json!({ "a": 1, "b": 0 })),
                make_tool_call("c2", "calc:missing", json!({})),
                make_tool_call("c3", "calc:add", json!({ "a": 1, "b": 1 })),
            ],
            "Working on it",
            "done",
        ));
        let transport = Arc::new(ScriptedTransport::new().ok("add", "2").fail("div", "division by zero"));
        let sink = RecordingSink::default();

        let result = react(provider, transport).run(&[], "go", &sink).await.unwrap();

        let tool_ids: Vec<&str> = result
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.as_deref())
            .collect();
        assert_eq!(tool_ids, vec!["c1", "c2", "c3"]);
        assert_eq!(result.tool_calls_made, 3);

        let notes = sink.notifications();
        assert_eq!(notes[0], "🤔 Thinking... (calling 3 tool(s))");
        assert!(notes[1].starts_with("❌ Tool 'calc:div' failed:"));
        assert_eq!(notes[2], "❌ Tool 'calc:missing' failed: Tool 'calc:missing' not found in catalog");
        assert_eq!(notes[3], "✓ Tool 'calc:add' executed");
    }

    #[tokio::test]
    async fn exhaustion_after_k_plus_one_model_calls() {
        for k in [1u32, 3] {
            let provider = Arc::new(SequentialMockProvider::repeating(make_tool_call_response(
                vec![make_tool_call("call_x", "calc:add", json!({ "a": 1, "b": 1 }))],
                "",
            )));
            let transport = Arc::new(ScriptedTransport::new().ok("add", "2"));
            let sink = RecordingSink::default();

            let result = react(provider.clone(), transport.clone())
                .with_max_tool_iterations(k)
                .run(&[], "loop forever", &sink)
                .await
                .unwrap();

            assert_eq!(result.outcome, LoopOutcome::Exhausted);
            assert_eq!(result.answer, EXHAUSTED_ANSWER);
            assert_eq!(provider.call_count(), k as usize + 1);
            assert_eq!(transport.calls().len(), k as usize + 1);
        }
    }

    #[tokio::test]
    async fn prompt_convention_exhausts_after_k_plus_one_calls() {
        let reply = "```json\n{\"tool\": \"calc:add\", \"arguments\": {\"a\": 1, \"b\": 1}}\n```";
        let provider = Arc::new(SequentialMockProvider::repeating(make_text_response(reply)));
        let transport = Arc::new(ScriptedTransport::new().ok("add", "2"));

        let result = react(provider.clone(), transport.clone())
            .with_convention(CallingConvention::Prompt)
            .with_max_tool_iterations(2)
            .run(&[], "loop forever", &RecordingSink::default())
            .await
            .unwrap();

        assert_eq!(result.outcome, LoopOutcome::Exhausted);
        assert_eq!(result.answer, EXHAUSTED_ANSWER);
        assert_eq!(provider.call_count(), 3);
        assert_eq!(transport.calls().len(), 3);
        assert!(provider.requests().iter().all(|r| r.tools.is_empty()));
    }

    /// Replies from the request alone: a tool round chosen by the question,
    /// then an answer naming the question and the tool output.
    struct TranscriptProvider;

    #[async_trait]
    impl Provider for TranscriptProvider {
        fn name(&self) -> &str {
            "transcript"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            tokio::task::yield_now().await;
            let question = request
                .messages
                .iter()
                .rfind(|m| m.role == Role::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            match request.messages.last() {
                Some(last) if last.role == Role::Tool => {
                    Ok(make_text_response(&format!("{question} -> {}", last.content)))
                }
                _ => {
                    let tool = if question == "alpha" { "calc:add" } else { "calc:div" };
                    Ok(make_tool_call_response(vec![make_tool_call("c1", tool, json!({}))], ""))
                }
            }
        }
    }

    #[tokio::test]
    async fn concurrent_runs_share_no_conversation_state() {
        let transport = Arc::new(ScriptedTransport::new().ok("add", "sum").ok("div", "quotient"));
        let react = ReactLoop::new(
            "assistant",
            Arc::new(TranscriptProvider),
            test_settings(),
            calc_invoker(transport.clone()),
            Arc::new(EventBus::default()),
        );
        let history_a = vec![Message::user("earlier a"), Message::assistant("ok a")];

        let sink_a = RecordingSink::default();
        let sink_b = RecordingSink::default();
        let (a, b) = tokio::join!(
            react.run(&history_a, "alpha", &sink_a),
            react.run(&[], "beta", &sink_b),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.answer, "alpha -> sum");
        assert_eq!(b.answer, "beta -> quotient");
        assert!(a.messages.iter().all(|m| !m.content.contains("beta") && m.content != "quotient"));
        assert!(b.messages.iter().all(|m| !m.content.contains("alpha") && m.content != "sum"));
        assert!(b.messages.iter().all(|m| !m.content.contains("earlier a")));
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn invalid_native_arguments_are_contained() {
        let mut bad = make_tool_call("c1", "calc:add", json!({}));
        bad.arguments = "{not json".into();
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(vec![bad], "", "gave up"));
        let transport = Arc::new(ScriptedTransport::new().ok("add", "2"));
        let sink = RecordingSink::default();

        let result = react(provider.clone(), transport.clone())
            .run(&[], "go", &sink)
            .await
            .unwrap();

        assert_eq!(result.answer, "gave up");
        assert!(transport.calls().is_empty());
        let tool_msg = provider.requests()[1]
            .messages
            .iter()
            .find(|m| m.role == Role::Tool)
            .cloned()
            .unwrap();
        assert!(tool_msg.content.contains("Invalid tool arguments"));
    }

    #[tokio::test]
    async fn model_failure_propagates() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let transport = Arc::new(ScriptedTransport::new());
        let sink = RecordingSink::default();

        let err = react(provider, transport).run(&[], "hello", &sink).await.unwrap_err();
        assert!(matches!(err, agentmux_core::Error::Provider(_)));
    }

    #[tokio::test]
    async fn history_sits_between_system_and_user() {
        let provider = Arc::new(SequentialMockProvider::single_text("ok"));
        let transport = Arc::new(ScriptedTransport::new());
        let history = vec![Message::user("earlier"), Message::assistant("reply")];

        react(provider.clone(), transport)
            .with_system_prompt(Some("Be brief.".into()))
            .run(&history, "now", &RecordingSink::default())
            .await
            .unwrap();

        let requests = provider.requests();
        let sent = &requests[0].messages;
        let roles: Vec<Role> = sent.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(sent[0].content, "Be brief.");
        assert_eq!(sent[3].content, "now");
    }

    #[tokio::test]
    async fn prompt_convention_round_trip() {
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_text_response("```json\n{\"tool\": \"calc:add\", \"arguments\": {\"a\": 2, \"b\": 3}}\n```"),
            make_text_response("The answer is 5"),
        ]));
        let transport = Arc::new(ScriptedTransport::new().ok("add", "5"));
        let sink = RecordingSink::default();

        let result = react(provider.clone(), transport.clone())
            .with_convention(CallingConvention::Prompt)
            .run(&[], "What is 2 + 3?", &sink)
            .await
            .unwrap();

        assert_eq!(result.answer, "The answer is 5");
        assert_eq!(result.model_calls, 2);
        assert_eq!(transport.calls().len(), 1);

        let requests = provider.requests();
        assert!(requests[0].tools.is_empty());
        assert!(requests[0].messages[0].content.contains("- calc:add:"));
        let feedback = requests[1].messages.last().unwrap();
        assert_eq!(feedback.role, Role::User);
        assert!(feedback.content.contains("[1] calc:add (succeeded)\n5"));
    }

    #[tokio::test]
    async fn prompt_convention_unparseable_reply_is_answer() {
        let reply = "```json\n{\"tool\": \"calc:add\", \"arguments\": \n```";
        let provider = Arc::new(SequentialMockProvider::single_text(reply));
        let transport = Arc::new(ScriptedTransport::new());

        let result = react(provider.clone(), transport.clone())
            .with_convention(CallingConvention::Prompt)
            .run(&[], "hi", &RecordingSink::default())
            .await
            .unwrap();

        assert_eq!(result.outcome, LoopOutcome::Done);
        assert_eq!(result.answer, reply);
        assert_eq!(provider.call_count(), 1);
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn publishes_tool_and_usage_events() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let provider = Arc::new(SequentialMockProvider::tool_then_answer(
            vec![make_tool_call("c1", "calc:add", json!({ "a": 1, "b": 2 }))],
            "",
            "3",
        ));
        let transport = Arc::new(ScriptedTransport::new().ok("add", "3"));

        ReactLoop::new("assistant", provider, test_settings(), calc_invoker(transport), bus)
            .run(&[], "1+2", &RecordingSink::default())
            .await
            .unwrap();

        let mut tool_events = 0;
        let mut usage_events = 0;
        while let Ok(event) = rx.try_recv() {
            match event.as_ref() {
                DomainEvent::ToolExecuted { tool_key, success, .. } => {
                    assert_eq!(tool_key, "calc:add");
                    assert!(success);
                    tool_events += 1;
                }
                DomainEvent::ResponseGenerated { tokens_used, .. } => {
                    assert_eq!(*tokens_used, 15);
                    usage_events += 1;
                }
                _ => {}
            }
        }
        assert_eq!(tool_events, 1);
        assert_eq!(usage_events, 2);
    }
}
