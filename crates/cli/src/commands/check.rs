//! `agentmux check`: validate the configuration.

use std::path::Path;

use agentmux_config::{AppConfig, ConfigError};
use agentmux_core::agent::AgentKind;

pub fn run(path: &Path, loaded: Result<AppConfig, ConfigError>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating {}...", path.display());

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ {e}");
            return Err(format!("invalid configuration: {}", path.display()).into());
        }
    };
    println!("   ✅ Config parsed and validated");

    let warnings = warnings(&config);
    for w in &warnings {
        println!("   ⚠️  {w}");
    }

    println!();
    println!("   Agents:      {}", config.agents.len());
    println!("   MCP servers: {}", config.mcp_servers.len());
    println!("   Model:       {}", config.llm.model);
    Ok(())
}

/// Problems that do not stop the process from starting.
fn warnings(config: &AppConfig) -> Vec<String> {
    let mut out = Vec::new();
    if config.agents.is_empty() {
        out.push("No agents configured; `serve` will exit immediately".to_string());
    }
    if config.needs_model() && config.llm.api_key.is_none() {
        out.push("No model API key set (llm.api_key or AGENTMUX_API_KEY)".to_string());
    }
    for agent in &config.agents {
        if agent.kind == AgentKind::Mcp && config.mcp_servers_for(agent).is_empty() {
            out.push(format!("Agent '{}' uses tools but no MCP servers are configured", agent.name));
        }
    }
    out
}
