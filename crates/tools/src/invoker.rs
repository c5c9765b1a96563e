//! Tool invocation with failure containment.

use std::sync::Arc;
use std::time::Instant;

use agentmux_core::error::ToolError;
use agentmux_core::tool::{ToolCallRequest, ToolCallResult, ToolOutput, ToolTransport};
use tracing::{debug, warn};

use crate::catalog::ToolCatalog;

/// Resolves catalog keys and calls the owning endpoint.
///
/// `invoke` never returns an error: an unknown key, a transport failure and
/// a remote error all come back as an `is_error` result with a JSON error
/// message, so one bad call cannot end the loop.
#[derive(Clone)]
pub struct ToolInvoker {
    catalog: Arc<ToolCatalog>,
    transport: Arc<dyn ToolTransport>,
}

impl ToolInvoker {
    pub fn new(catalog: Arc<ToolCatalog>, transport: Arc<dyn ToolTransport>) -> Self {
        Self { catalog, transport }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Execute one tool call.
    pub async fn invoke(&self, request: &ToolCallRequest) -> ToolCallResult {
        let Some(entry) = self.catalog.get(&request.tool_key) else {
            warn!(tool = %request.tool_key, "Tool not found in catalog");
            return error_result(&request.id, &ToolError::NotFound(request.tool_key.clone()));
        };

        let start = Instant::now();
        let outcome = self
            .transport
            .call(&entry.endpoint, &entry.tool_name, request.arguments.clone())
            .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                debug!(
                    tool = %request.tool_key,
                    duration_ms = elapsed_ms,
                    is_error = output.is_error,
                    "Tool call returned"
                );
                ToolCallResult {
                    tool_call_id: request.id.clone(),
                    content: normalize_output(&output),
                    is_error: output.is_error,
                }
            }
            Err(e) => {
                warn!(tool = %request.tool_key, duration_ms = elapsed_ms, error = %e, "Tool call failed");
                error_result(&request.id, &e)
            }
        }
    }
}

/// An error result whose content is `{"error": "<message>"}`.
pub fn error_result(tool_call_id: &str, error: &ToolError) -> ToolCallResult {
    ToolCallResult {
        tool_call_id: tool_call_id.to_string(),
        content: serde_json::json!({ "error": error.to_string() }).to_string(),
        is_error: true,
    }
}

/// Flatten a raw tool output to text.
///
/// Structured output wins; otherwise text blocks are joined with newlines.
pub fn normalize_output(output: &ToolOutput) -> String {
    if let Some(structured) = &output.structured_content {
        return structured.to_string();
    }

    if output.content.is_empty() {
        return "Tool executed successfully (no output)".into();
    }

    let texts: Vec<&str> = output.content.iter().filter_map(|b| b.as_text()).collect();
    if texts.is_empty() {
        "Tool executed successfully".into()
    } else {
        texts.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::McpTool;
    use agentmux_core::tool::ContentBlock;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Transport answering from a fixed closure and recording every call.
    struct FakeTransport {
        calls: Mutex<Vec<(String, String, serde_json::Value)>>,
        respond: fn(&str) -> Result<ToolOutput, ToolError>,
    }

    #[async_trait]
    impl ToolTransport for FakeTransport {
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
            (self.respond)(tool_name)
        }
    }

    fn invoker(respond: fn(&str) -> Result<ToolOutput, ToolError>) -> (ToolInvoker, Arc<FakeTransport>) {
        let catalog = ToolCatalog::new(vec![(
            "calc".into(),
            vec![McpTool {
                name: "add".into(),
                description: Some("Add".into()),
                input_schema: None,
            }],
        )]);
        let transport = Arc::new(FakeTransport {
            calls: Mutex::new(Vec::new()),
            respond,
        });
        (ToolInvoker::new(Arc::new(catalog), transport.clone()), transport)
    }

    fn request(key: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: "call_1".into(),
            tool_key: key.into(),
            arguments: json!({ "a": 2, "b": 3 }),
        }
    }

    #[tokio::test]
    async fn routes_to_owning_endpoint() {
        let (invoker, transport) = invoker(|_| Ok(ToolOutput::text("5")));
        let result = invoker.invoke(&request("calc:add")).await;
        assert_eq!(result.tool_call_id, "call_1");
        assert_eq!(result.content, "5");
        assert!(!result.is_error);

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "calc");
        assert_eq!(calls[0].1, "add");
        assert_eq!(calls[0].2, json!({ "a": 2, "b": 3 }));
    }

    #[tokio::test]
    async fn unknown_key_is_error_result() {
        let (invoker, transport) = invoker(|_| Ok(ToolOutput::text("unused")));
        let result = invoker.invoke(&request("calc:sub")).await;
        assert!(result.is_error);
        let body: serde_json::Value = serde_json::from_str(&result.content).unwrap();
        assert_eq!(body["error"], "Tool 'calc:sub' not found in catalog");
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_failure_is_contained() {
        let (invoker, _) = invoker(|_| {
            Err(ToolError::Transport {
                endpoint: "calc".into(),
                reason: "connection refused".into(),
            })
        });
        let result = invoker.invoke(&request("calc:add")).await;
        assert!(result.is_error);
        assert!(result.content.contains("connection refused"));
    }

    #[tokio::test]
    async fn remote_error_flag_is_kept() {
        let (invoker, _) = invoker(|_| {
            Ok(ToolOutput {
                is_error: true,
                ..ToolOutput::text("division by zero")
            })
        });
        let result = invoker.invoke(&request("calc:add")).await;
        assert!(result.is_error);
        assert_eq!(result.content, "division by zero");
    }

    #[test]
    fn structured_output_preferred() {
        let output = ToolOutput {
            content: vec![ContentBlock::Text { text: "ignored".into() }],
            structured_content: Some(json!({ "sum": 5 })),
            is_error: false,
        };
        assert_eq!(normalize_output(&output), r#"{"sum":5}"#);
    }

    #[test]
    fn text_blocks_joined_in_order() {
        let output = ToolOutput {
            content: vec![
                ContentBlock::Text { text: "one".into() },
                ContentBlock::Image {
                    data: "AAAA".into(),
                    mime_type: Some("image/png".into()),
                },
                ContentBlock::Text { text: "two".into() },
            ],
            ..ToolOutput::default()
        };
        assert_eq!(normalize_output(&output), "one\ntwo");
    }

    #[test]
    fn neutral_messages_without_text() {
        assert_eq!(
            normalize_output(&ToolOutput::default()),
            "Tool executed successfully (no output)"
        );
        let images_only = ToolOutput {
            content: vec![ContentBlock::Unsupported],
            ..ToolOutput::default()
        };
        assert_eq!(normalize_output(&images_only), "Tool executed successfully");
    }
}
