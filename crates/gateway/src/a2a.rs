//! A2A-style JSON-RPC adapter for one agent.
//!
//! Converts wire messages into a [`RequestContext`], runs the agent through
//! [`AgentRuntime::execute`], and reports progress back as task status
//! updates. The runtime never sees wire framing.
//!
//! Routes:
//! - `GET /.well-known/agent-card.json`: the agent card
//! - `GET /health`: liveness
//! - `POST /`: JSON-RPC 2.0 (`message/send`, `message/stream`)

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use agentmux_agent::AgentRuntime;
use agentmux_core::agent::{AgentDescriptor, AgentKind};
use agentmux_core::protocol::{Part, ProgressSink, RequestContext, Turn, TurnRole};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

pub const PROTOCOL_VERSION: &str = "0.3.0";

/// Status message attached to a task after its answer artifact.
pub const COMPLETED_MESSAGE: &str = "✅ Task completed successfully!";

/// How many conversations a listener remembers.
pub const MAX_CONTEXTS: usize = 256;

/// Turns kept per conversation (user and agent turns counted separately).
pub const MAX_TURNS_PER_CONTEXT: usize = 40;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

// --- JSON-RPC framing ---

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse<T> {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl<T: Serialize> JsonRpcResponse<T> {
    pub fn success(id: Value, result: T) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }
}

impl JsonRpcResponse<()> {
    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct MessageSendParams {
    message: WireMessage,
}

/// A protocol message as it travels on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(default = "user_role")]
    pub role: TurnRole,
    #[serde(with = "wire_parts")]
    pub parts: Vec<Part>,
    #[serde(default = "new_id")]
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default = "message_kind")]
    pub kind: String,
}

fn user_role() -> TurnRole {
    TurnRole::User
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn message_kind() -> String {
    "message".into()
}

impl WireMessage {
    fn agent(text: &str, task_id: &str, context_id: &str) -> Self {
        Self {
            role: TurnRole::Agent,
            parts: vec![Part::text(text)],
            message_id: new_id(),
            context_id: Some(context_id.into()),
            task_id: Some(task_id.into()),
            kind: message_kind(),
        }
    }
}

/// Wire parts carry their discriminator as `kind` (or `type` from older
/// clients), and nest file metadata under `file`.
mod wire_parts {
    use agentmux_core::protocol::Part;
    use serde::de::Error as _;
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::{Value, json};

    #[derive(Deserialize)]
    struct RawPart {
        #[serde(alias = "type")]
        kind: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        data: Option<Value>,
        #[serde(default)]
        file: Option<RawFile>,
    }

    #[derive(Deserialize)]
    struct RawFile {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        uri: Option<String>,
    }

    pub fn to_wire(part: &Part) -> Value {
        match part {
            Part::Text { text } => json!({ "kind": "text", "text": text }),
            Part::Data { data } => json!({ "kind": "data", "data": data }),
            Part::File { name, uri } => json!({ "kind": "file", "file": { "name": name, "uri": uri } }),
        }
    }

    pub fn serialize<S: Serializer>(parts: &[Part], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(parts.len()))?;
        for part in parts {
            seq.serialize_element(&to_wire(part))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Part>, D::Error> {
        let raw = Vec::<RawPart>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|p| match p.kind.as_str() {
                "text" => Ok(Part::Text {
                    text: p.text.unwrap_or_default(),
                }),
                "data" => Ok(Part::Data {
                    data: p.data.unwrap_or(Value::Null),
                }),
                "file" => {
                    let file = p.file.unwrap_or(RawFile { name: None, uri: None });
                    Ok(Part::File {
                        name: file.name,
                        uri: file.uri,
                    })
                }
                other => Err(D::Error::custom(format!("unsupported part kind '{other}'"))),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Submitted,
    Working,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<WireMessage>,
    pub timestamp: String,
}

impl TaskStatus {
    fn new(state: TaskState, message: Option<WireMessage>) -> Self {
        Self {
            state,
            message,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub artifact_id: String,
    pub name: String,
    #[serde(with = "wire_parts")]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub context_id: String,
    pub kind: &'static str,
    pub status: TaskStatus,
    pub artifacts: Vec<Artifact>,
    pub history: Vec<WireMessage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusUpdate {
    pub task_id: String,
    pub context_id: String,
    pub kind: &'static str,
    pub status: TaskStatus,
    #[serde(rename = "final")]
    pub is_final: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskArtifactUpdate {
    pub task_id: String,
    pub context_id: String,
    pub kind: &'static str,
    pub artifact: Artifact,
    pub last_chunk: bool,
}

/// One event of a `message/stream` response.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Task(Task),
    Status(TaskStatusUpdate),
    Artifact(TaskArtifactUpdate),
}

// --- Agent card ---

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    pub streaming: bool,
    pub push_notifications: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// Self-description published at `/.well-known/agent-card.json`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    pub version: String,
    pub protocol_version: &'static str,
    pub url: String,
    pub preferred_transport: &'static str,
    pub capabilities: AgentCapabilities,
    pub default_input_modes: Vec<String>,
    pub default_output_modes: Vec<String>,
    pub skills: Vec<AgentSkill>,
}

impl AgentCard {
    pub fn for_agent(descriptor: &AgentDescriptor, url: impl Into<String>) -> Self {
        let (skill_name, tags) = match descriptor.kind {
            AgentKind::Echo => ("Echo", vec!["echo"]),
            AgentKind::Llm => ("Chat", vec!["chat", "llm"]),
            AgentKind::Mcp => ("Tool use", vec!["tools", "mcp"]),
        };
        let description = if descriptor.description.is_empty() {
            format!("{} agent '{}'", descriptor.kind, descriptor.name)
        } else {
            descriptor.description.clone()
        };

        Self {
            name: descriptor.name.clone(),
            description: description.clone(),
            version: env!("CARGO_PKG_VERSION").into(),
            protocol_version: PROTOCOL_VERSION,
            url: url.into(),
            preferred_transport: "JSONRPC",
            capabilities: AgentCapabilities {
                streaming: true,
                push_notifications: false,
            },
            default_input_modes: vec!["text".into()],
            default_output_modes: vec!["text".into()],
            skills: vec![AgentSkill {
                id: descriptor.kind.to_string(),
                name: skill_name.into(),
                description,
                tags: tags.into_iter().map(String::from).collect(),
            }],
        }
    }
}

// --- Conversation memory ---

/// Bounded per-context transcript.
///
/// Each context keeps its most recent turns, and the least recently used
/// context is evicted when the store is full.
struct ContextStore {
    inner: Mutex<ContextMap>,
}

#[derive(Default)]
struct ContextMap {
    turns: HashMap<String, Vec<Turn>>,
    order: VecDeque<String>,
}

impl ContextStore {
    fn new() -> Self {
        Self {
            inner: Mutex::new(ContextMap::default()),
        }
    }

    fn history(&self, context_id: &str) -> Vec<Turn> {
        match self.inner.lock() {
            Ok(map) => map.turns.get(context_id).cloned().unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    fn record(&self, context_id: &str, user: Turn, answer: Turn) {
        let Ok(mut map) = self.inner.lock() else {
            return;
        };
        if map.turns.contains_key(context_id) {
            if let Some(pos) = map.order.iter().position(|id| id == context_id) {
                map.order.remove(pos);
            }
        } else if map.order.len() >= MAX_CONTEXTS {
            if let Some(stale) = map.order.pop_front() {
                map.turns.remove(&stale);
            }
        }
        map.order.push_back(context_id.to_string());

        let turns = map.turns.entry(context_id.to_string()).or_default();
        turns.push(user);
        turns.push(answer);
        if turns.len() > MAX_TURNS_PER_CONTEXT {
            let excess = turns.len() - MAX_TURNS_PER_CONTEXT;
            turns.drain(..excess);
        }
    }
}

// --- Progress sink ---

/// Records progress into a task and, for streaming requests, forwards each
/// update to the response stream.
struct TaskSink {
    task: Mutex<Task>,
    events: Option<mpsc::UnboundedSender<StreamEvent>>,
}

impl TaskSink {
    fn new(task: Task, events: Option<mpsc::UnboundedSender<StreamEvent>>) -> Self {
        Self {
            task: Mutex::new(task),
            events,
        }
    }

    fn snapshot(&self) -> Option<Task> {
        self.task.lock().ok().map(|task| task.clone())
    }

    fn forward(&self, event: StreamEvent) {
        if let Some(tx) = &self.events {
            // The client may have gone away; the request still runs to completion.
            if tx.send(event).is_err() {
                debug!("Stream receiver dropped");
            }
        }
    }

    fn set_status(&self, state: TaskState, text: &str, is_final: bool) {
        let update = {
            let Ok(mut task) = self.task.lock() else {
                return;
            };
            let message = WireMessage::agent(text, &task.id, &task.context_id);
            task.history.push(message.clone());
            task.status = TaskStatus::new(state, Some(message));
            TaskStatusUpdate {
                task_id: task.id.clone(),
                context_id: task.context_id.clone(),
                kind: "status-update",
                status: task.status.clone(),
                is_final,
            }
        };
        self.forward(StreamEvent::Status(update));
    }
}

#[async_trait]
impl ProgressSink for TaskSink {
    async fn notify(&self, text: &str, is_final: bool) {
        let state = if is_final {
            TaskState::Completed
        } else {
            TaskState::Working
        };
        self.set_status(state, text, is_final);
    }

    async fn complete(&self, text: &str) {
        let update = {
            let Ok(mut task) = self.task.lock() else {
                return;
            };
            let artifact = Artifact {
                artifact_id: new_id(),
                name: "response".into(),
                parts: vec![Part::text(text)],
            };
            task.artifacts.push(artifact.clone());
            TaskArtifactUpdate {
                task_id: task.id.clone(),
                context_id: task.context_id.clone(),
                kind: "artifact-update",
                artifact,
                last_chunk: true,
            }
        };
        self.forward(StreamEvent::Artifact(update));
        self.set_status(TaskState::Completed, COMPLETED_MESSAGE, true);
    }

    async fn fail(&self, text: &str) {
        self.set_status(TaskState::Failed, text, true);
    }
}

// --- Router ---

/// Shared state of one agent's listener.
pub struct A2aState {
    runtime: Arc<dyn AgentRuntime>,
    card: AgentCard,
    contexts: ContextStore,
}

impl A2aState {
    pub fn new(runtime: Arc<dyn AgentRuntime>, url: impl Into<String>) -> Self {
        let card = AgentCard::for_agent(runtime.descriptor(), url);
        Self {
            runtime,
            card,
            contexts: ContextStore::new(),
        }
    }

    /// Build the request context and the initial task for an inbound message.
    fn begin(&self, mut message: WireMessage) -> (RequestContext, Task) {
        let context_id = message.context_id.clone().unwrap_or_else(new_id);
        let task_id = new_id();
        message.context_id = Some(context_id.clone());
        message.task_id = Some(task_id.clone());

        let ctx = RequestContext {
            task_id: task_id.clone(),
            context_id: context_id.clone(),
            current_message: message.parts.clone(),
            prior_turns: self.contexts.history(&context_id),
        };
        let task = Task {
            id: task_id,
            context_id,
            kind: "task",
            status: TaskStatus::new(TaskState::Submitted, None),
            artifacts: Vec::new(),
            history: vec![message],
        };
        (ctx, task)
    }

    async fn execute(&self, ctx: &RequestContext, sink: &TaskSink) {
        // Failures have already been reported through the sink.
        if let Ok(Some(answer)) = self.runtime.execute(ctx, sink).await {
            let user = Turn {
                role: TurnRole::User,
                parts: ctx.current_message.clone(),
            };
            self.contexts.record(&ctx.context_id, user, Turn::agent(answer));
        }
    }
}

type SharedState = Arc<A2aState>;

/// Build the router for one agent.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", post(rpc_handler))
        .route("/.well-known/agent-card.json", get(card_handler))
        .route("/health", get(health_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn card_handler(State(state): State<SharedState>) -> Json<AgentCard> {
    Json(state.card.clone())
}

async fn health_handler(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "agent": state.card.name,
    }))
}

async fn rpc_handler(State(state): State<SharedState>, body: Bytes) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "Unparseable JSON-RPC body");
            return Json(JsonRpcResponse::failure(Value::Null, PARSE_ERROR, "Parse error")).into_response();
        }
    };
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            return Json(JsonRpcResponse::failure(
                Value::Null,
                INVALID_REQUEST,
                format!("Invalid Request: {e}"),
            ))
            .into_response();
        }
    };

    let id = request.id;
    match request.method.as_str() {
        "message/send" | "message/stream" => {}
        other => {
            warn!(agent = %state.card.name, method = %other, "Unknown JSON-RPC method");
            return Json(JsonRpcResponse::failure(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            ))
            .into_response();
        }
    }

    let params: MessageSendParams = match serde_json::from_value(request.params) {
        Ok(p) => p,
        Err(e) => {
            return Json(JsonRpcResponse::failure(id, INVALID_PARAMS, format!("Invalid params: {e}")))
                .into_response();
        }
    };

    if request.method == "message/stream" {
        message_stream(state, id, params.message)
    } else {
        message_send(state, id, params.message).await
    }
}

async fn message_send(state: SharedState, id: Value, message: WireMessage) -> Response {
    let (ctx, task) = state.begin(message);
    let sink = TaskSink::new(task, None);
    state.execute(&ctx, &sink).await;

    match sink.snapshot() {
        Some(task) => Json(JsonRpcResponse::success(id, task)).into_response(),
        None => Json(JsonRpcResponse::failure(id, INTERNAL_ERROR, "Internal error")).into_response(),
    }
}

fn message_stream(state: SharedState, id: Value, message: WireMessage) -> Response {
    let (tx, rx) = mpsc::unbounded_channel();
    let (ctx, task) = state.begin(message);
    let _ = tx.send(StreamEvent::Task(task.clone()));

    let sink = TaskSink::new(task, Some(tx));
    tokio::spawn(async move {
        state.execute(&ctx, &sink).await;
    });

    let stream = UnboundedReceiverStream::new(rx)
        .map(move |event| Event::default().json_data(JsonRpcResponse::success(id.clone(), event)));
    Sse::new(stream).into_response()
}
