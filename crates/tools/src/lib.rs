//! Remote tools for agentmux.
//!
//! Tools live on MCP endpoints. [`McpPool`] discovers and calls them,
//! [`ToolCatalog`] gives them globally unique keys and renders them for
//! either calling convention, and [`ToolInvoker`] turns every call, failed
//! or not, into a text result the loop can feed back to the model.

pub mod catalog;
pub mod invoker;
pub mod mcp;

pub use catalog::{CatalogEntry, ToolCatalog};
pub use invoker::ToolInvoker;
pub use mcp::{McpClient, McpPool, McpTool, ToolDiscovery};
