//! Tool catalog: one key space over every discovered endpoint.

use std::collections::BTreeMap;

use agentmux_core::provider::ToolDefinition;
use agentmux_core::tool::ToolDescriptor;
use tracing::warn;

use crate::mcp::McpTool;

/// A resolved catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    /// Endpoint that owns the tool
    pub endpoint: String,
    /// Tool name as the endpoint knows it
    pub tool_name: String,
    pub descriptor: ToolDescriptor,
}

/// Maps `"<endpoint>:<tool-name>"` keys to their owning endpoint.
///
/// Building a catalog never fails. Missing descriptions and schemas get
/// defaults at render time, and a key collision keeps the first entry.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl ToolCatalog {
    /// Build a catalog from raw tool lists grouped by endpoint name.
    pub fn new(endpoints: Vec<(String, Vec<McpTool>)>) -> Self {
        let mut entries = BTreeMap::new();

        for (endpoint, tools) in endpoints {
            for tool in tools {
                let key = format!("{endpoint}:{}", tool.name);
                if entries.contains_key(&key) {
                    warn!(key = %key, "Duplicate tool key, keeping the first registration");
                    continue;
                }
                let descriptor = ToolDescriptor {
                    key: key.clone(),
                    description: tool.description.unwrap_or_default(),
                    input_schema: tool.input_schema,
                };
                entries.insert(
                    key,
                    CatalogEntry {
                        endpoint: endpoint.clone(),
                        tool_name: tool.name,
                        descriptor,
                    },
                );
            }
        }

        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&CatalogEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All descriptors, ordered by key.
    pub fn descriptors(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.entries.values().map(|e| &e.descriptor)
    }

    /// Structured definitions for native tool calling.
    ///
    /// A declared object schema is passed through untouched; anything else
    /// becomes an empty-object schema.
    pub fn native_definitions(&self) -> Vec<ToolDefinition> {
        self.descriptors()
            .map(|d| ToolDefinition {
                name: d.key.clone(),
                description: describe(d),
                parameters: input_schema(d),
            })
            .collect()
    }

    /// Textual listing for prompt-encoded tool calling.
    pub fn prompt_listing(&self) -> String {
        let mut listing = String::new();
        for d in self.descriptors() {
            listing.push_str(&format!("- {}: {}\n", d.key, describe(d)));
            listing.push_str(&format!("  Arguments schema: {}\n", input_schema(d)));
        }
        listing
    }
}

fn describe(descriptor: &ToolDescriptor) -> String {
    if descriptor.description.trim().is_empty() {
        format!("Tool: {}", descriptor.key)
    } else {
        descriptor.description.clone()
    }
}

fn input_schema(descriptor: &ToolDescriptor) -> serde_json::Value {
    match &descriptor.input_schema {
        Some(schema) if schema.is_object() => schema.clone(),
        _ => serde_json::json!({ "type": "object", "properties": {} }),
    }
}
