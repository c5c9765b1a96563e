//! `agentmux serve`: start every configured agent and run until a
//! termination signal arrives.

use std::sync::Arc;

use agentmux_config::AppConfig;
use agentmux_gateway::ProcessSupervisor;

pub async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = agentmux_gateway::build_registry(&config)?;

    println!("🤖 agentmux");
    println!("   Agents:      {}", config.agents.len());
    println!("   MCP servers: {}", config.mcp_servers.len());
    if config.needs_model() {
        println!("   Model:       {} @ {}", config.llm.model, config.llm.base_url);
    }
    println!("   Press Ctrl-C to stop\n");

    let supervisor = Arc::new(ProcessSupervisor::new(Arc::new(registry)));
    supervisor.run().await?;
    Ok(())
}
