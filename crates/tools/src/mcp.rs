//! MCP over HTTP: tool discovery and invocation.
//!
//! Speaks JSON-RPC 2.0 to each configured endpoint. Each client performs the
//! `initialize` handshake once and echoes the server's `Mcp-Session-Id` on
//! every later request. Servers may answer with a plain JSON body or with a
//! `text/event-stream` body whose `data:` lines carry the JSON-RPC response.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use agentmux_config::McpServerConfig;
use agentmux_core::error::ToolError;
use agentmux_core::tool::{ToolOutput, ToolTransport};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcNotification {
    jsonrpc: &'static str,
    method: &'static str,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Tool information as listed by an MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<McpTool>,
}

/// Header carrying the session assigned by the server during `initialize`.
const SESSION_HEADER: &str = "Mcp-Session-Id";

const PROTOCOL_VERSION: &str = "2025-03-26";

/// Client for one MCP endpoint.
///
/// The `initialize` handshake runs lazily before the first request. A failed
/// handshake is not remembered, so the next request tries again.
pub struct McpClient {
    name: String,
    url: String,
    api_key: Option<String>,
    client: Client,
    request_id: AtomicU64,
    session: OnceCell<Option<String>>,
}

impl McpClient {
    pub fn new(config: &McpServerConfig) -> Result<Self, ToolError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ToolError::Transport {
                endpoint: config.name.clone(),
                reason: format!("failed to create HTTP client: {e}"),
            })?;
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());

        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            api_key,
            client,
            request_id: AtomicU64::new(0),
            session: OnceCell::new(),
        })
    }

    fn transport_error(&self, reason: impl ToString) -> ToolError {
        ToolError::Transport {
            endpoint: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    fn post(&self, body: &impl Serialize, session: Option<&str>) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(&self.url)
            .header("Accept", "application/json, text/event-stream")
            .json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if let Some(id) = session {
            builder = builder.header(SESSION_HEADER, id);
        }
        builder
    }

    /// The session id for this endpoint, shaking hands on first use.
    async fn session(&self) -> Result<Option<&str>, ToolError> {
        let session = self.session.get_or_try_init(|| self.initialize()).await?;
        Ok(session.as_deref())
    }

    /// `initialize` followed by `notifications/initialized`.
    async fn initialize(&self) -> Result<Option<String>, ToolError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "agentmux", "version": env!("CARGO_PKG_VERSION") },
        });
        let (result, session) = self.exchange("initialize", Some(params), None).await?;
        info!(
            endpoint = %self.name,
            protocol = result.get("protocolVersion").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
            session = session.is_some(),
            "MCP session initialized"
        );

        let notification = JsonRpcNotification {
            jsonrpc: "2.0",
            method: "notifications/initialized",
        };
        match self.post(&notification, session.as_deref()).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!(endpoint = %self.name, status = %response.status(), "initialized notification rejected")
            }
            Err(e) => warn!(endpoint = %self.name, error = %e, "initialized notification failed"),
        }
        Ok(session)
    }

    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value, ToolError> {
        let session = self.session().await?;
        let (result, _) = self.exchange(method, params, session).await?;
        Ok(result)
    }

    /// One JSON-RPC round trip. Returns the result and any session header.
    async fn exchange(
        &self,
        method: &str,
        params: Option<Value>,
        session: Option<&str>,
    ) -> Result<(Value, Option<String>), ToolError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.request_id.fetch_add(1, Ordering::Relaxed) + 1,
            method,
            params,
        };

        let response = self
            .post(&request, session)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.transport_error(format!("HTTP {status}: {text}")));
        }

        let headers = response.headers();
        let assigned = headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let is_sse = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        let rpc = if is_sse {
            parse_sse_response(&body).ok_or_else(|| self.transport_error("no JSON-RPC response in event stream"))?
        } else {
            serde_json::from_str::<JsonRpcResponse>(&body)
                .map_err(|e| self.transport_error(format!("invalid JSON-RPC response: {e}")))?
        };

        if let Some(error) = rpc.error {
            return Err(ToolError::Remote {
                endpoint: self.name.clone(),
                code: error.code,
                message: error.message,
            });
        }

        let result = rpc
            .result
            .ok_or_else(|| self.transport_error("response carried neither result nor error"))?;
        Ok((result, assigned))
    }

    /// `tools/list`
    pub async fn list_tools(&self) -> Result<Vec<McpTool>, ToolError> {
        let result = self.send_request("tools/list", Some(json!({}))).await?;
        let list: ListToolsResult =
            serde_json::from_value(result).map_err(|e| self.transport_error(format!("invalid tools/list result: {e}")))?;
        Ok(list.tools)
    }

    /// `tools/call`
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, ToolError> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.send_request("tools/call", Some(params)).await?;
        serde_json::from_value(result).map_err(|e| self.transport_error(format!("invalid tools/call result: {e}")))
    }
}

/// Pick the first `data:` payload that decodes as a JSON-RPC response.
fn parse_sse_response(body: &str) -> Option<JsonRpcResponse> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty())
        .filter_map(|data| serde_json::from_str::<JsonRpcResponse>(data).ok())
        .find(|rpc| rpc.result.is_some() || rpc.error.is_some())
}

/// Lists the tools offered by named endpoints.
#[async_trait]
pub trait ToolDiscovery: Send + Sync {
    /// Tools grouped by endpoint. Endpoints that fail are left out.
    async fn discover(&self, endpoints: &[String]) -> Vec<(String, Vec<McpTool>)>;
}

/// Every configured MCP endpoint, shared by all agents.
pub struct McpPool {
    clients: HashMap<String, McpClient>,
}

impl McpPool {
    pub fn new(configs: &[McpServerConfig]) -> Result<Self, ToolError> {
        let clients = configs
            .iter()
            .map(|c| Ok((c.name.clone(), McpClient::new(c)?)))
            .collect::<Result<_, ToolError>>()?;
        Ok(Self { clients })
    }

    pub fn endpoint_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ToolDiscovery for McpPool {
    /// List tools on the named endpoints concurrently.
    ///
    /// An endpoint that cannot be reached is logged and contributes nothing.
    async fn discover(&self, endpoints: &[String]) -> Vec<(String, Vec<McpTool>)> {
        let lookups = endpoints.iter().map(|name| async move {
            let Some(client) = self.clients.get(name) else {
                warn!(endpoint = %name, "Unknown MCP endpoint, skipping");
                return None;
            };
            match client.list_tools().await {
                Ok(tools) => {
                    info!(endpoint = %name, tools = tools.len(), "Discovered MCP tools");
                    for tool in &tools {
                        debug!(endpoint = %name, tool = %tool.name, "  tool");
                    }
                    Some((name.clone(), tools))
                }
                Err(e) => {
                    warn!(endpoint = %name, error = %e, "Tool discovery failed");
                    None
                }
            }
        });

        futures::future::join_all(lookups)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}

#[async_trait]
impl ToolTransport for McpPool {
    async fn call(&self, endpoint: &str, tool_name: &str, arguments: Value) -> Result<ToolOutput, ToolError> {
        let client = self.clients.get(endpoint).ok_or_else(|| ToolError::Transport {
            endpoint: endpoint.to_string(),
            reason: "endpoint is not configured".into(),
        })?;
        client.call_tool(tool_name, arguments).await
    }
}
