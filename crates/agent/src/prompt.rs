//! Prompt-encoded tool calling.
//!
//! The model is shown a tool listing and asked to request tools with a
//! single fenced JSON block:
//!
//! ~~~text
//! ```json
//! {"tool": "calc:add", "arguments": {"a": 2, "b": 3}}
//! ```
//! ~~~
//!
//! The block may also hold an array of such objects, or an object of the
//! form `{"tool_calls": [...]}`. The first fenced block tagged `json` (or
//! untagged) is used; without one, the whole reply is tried when it starts
//! with `{` or `[`. Anything that does not fit this grammar means "no tool
//! calls" and the reply is taken as the final answer.

use agentmux_core::tool::{ToolCallRequest, ToolCallResult};
use agentmux_tools::ToolCatalog;
use serde_json::{Value, json};
use tracing::debug;

/// Used when an agent has no system prompt of its own.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant with access to tools.";

const CALL_INSTRUCTIONS: &str = r#"To call a tool, reply with exactly one fenced JSON block and nothing else:

```json
{"tool": "<tool key>", "arguments": {"<name>": <value>}}
```

To call several tools at once, put an array of such objects in the block. The results will be sent back to you in the next message. When you have enough information, reply with the final answer in plain text, without any JSON block."#;

/// The system prompt for prompt-convention agents: the base prompt, the
/// tool listing, then the calling instructions.
pub fn build_system_prompt(base: &str, catalog: &ToolCatalog) -> String {
    if catalog.is_empty() {
        return format!("{base}\n\nNo tools are currently available. Answer directly.");
    }
    format!(
        "{base}\n\nYou have access to the following tools:\n\n{}\n{CALL_INSTRUCTIONS}",
        catalog.prompt_listing()
    )
}

/// Parse tool calls out of a model reply.
///
/// Call ids are synthesized as `call_<iteration>_<index>`.
pub fn parse_tool_calls(text: &str, iteration: usize) -> Vec<ToolCallRequest> {
    let Some(payload) = payload(text) else {
        return Vec::new();
    };

    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "Reply is not a tool call block");
            return Vec::new();
        }
    };

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("tool_calls") {
            Some(Value::Array(items)) => items,
            Some(_) => return Vec::new(),
            None => vec![Value::Object(obj)],
        },
        _ => return Vec::new(),
    };

    let mut calls = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match parse_call(item, iteration, index) {
            Some(call) => calls.push(call),
            None => {
                debug!(index, "Malformed tool call entry, treating reply as final answer");
                return Vec::new();
            }
        }
    }
    calls
}

fn parse_call(item: Value, iteration: usize, index: usize) -> Option<ToolCallRequest> {
    let Value::Object(mut obj) = item else {
        return None;
    };
    let tool_key = match obj.remove("tool")? {
        Value::String(key) if !key.trim().is_empty() => key.trim().to_string(),
        _ => return None,
    };
    let arguments = obj.remove("arguments").unwrap_or_else(|| json!({}));

    Some(ToolCallRequest {
        id: format!("call_{iteration}_{index}"),
        tool_key,
        arguments,
    })
}

fn payload(text: &str) -> Option<&str> {
    if let Some(block) = fenced_block(text) {
        return Some(block.trim());
    }
    let trimmed = text.trim();
    (trimmed.starts_with('{') || trimmed.starts_with('[')).then_some(trimmed)
}

/// Body of the first fenced block tagged `json` or untagged.
///
/// Fences may span lines, with the tag on the opening line, or sit on one
/// line as in ```` ```json {...}``` ````. Every backtick run is tried as an
/// opener in turn, so a stray inline fence cannot hide a later block. Only
/// bodies that start like JSON are returned.
fn fenced_block(text: &str) -> Option<&str> {
    let mut offset = 0;
    while let Some(found) = text[offset..].find("```") {
        let after = &text[offset + found + 3..];
        offset += found + 3;

        let Some(end) = after.find("```") else {
            return None;
        };
        let inner = &after[..end];
        let (tag, body) = match inner.find('\n') {
            Some(newline) => (inner[..newline].trim(), &inner[newline + 1..]),
            None => one_line_fence(inner),
        };
        let looks_like_json = body.trim_start().starts_with(['{', '[']);
        if (tag.is_empty() || tag.eq_ignore_ascii_case("json")) && looks_like_json {
            return Some(body);
        }
    }
    None
}

/// Split ```` ```json {...}``` ```` into tag and body.
fn one_line_fence(inner: &str) -> (&str, &str) {
    let inner = inner.trim_start();
    if inner.starts_with(['{', '[']) {
        return ("", inner);
    }
    inner.split_once(char::is_whitespace).unwrap_or((inner, ""))
}

/// Render tool results as the user message that follows a tool round.
pub fn format_tool_results(calls: &[ToolCallRequest], results: &[ToolCallResult]) -> String {
    let mut out = String::from("Tool results:\n");
    for (n, (call, result)) in calls.iter().zip(results).enumerate() {
        let status = if result.is_error { "failed" } else { "succeeded" };
        out.push_str(&format!("\n[{}] {} ({status})\n{}\n", n + 1, call.tool_key, result.content));
    }
    out.push_str("\nContinue with another tool call block, or reply with the final answer.");
    out
}
