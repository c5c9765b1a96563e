//! Network surface for agentmux.
//!
//! Every configured agent gets its own A2A-style HTTP listener. The
//! [`ListenerRegistry`] owns the set of running listeners, and the
//! [`ProcessSupervisor`] ties their lifetime to the process: start all,
//! wait for a termination signal, stop all.
//!
//! Built on Axum; each listener is an independent task.

pub mod a2a;
pub mod registry;
pub mod supervisor;

pub use a2a::{A2aState, AgentCard};
pub use registry::{ListenerRegistry, StartReport};
pub use supervisor::ProcessSupervisor;

use std::sync::Arc;
use std::time::Duration;

use agentmux_agent::{AgentRuntime, RuntimeDeps, build_runtime};
use agentmux_config::AppConfig;
use agentmux_core::Result;
use agentmux_core::event::EventBus;
use agentmux_core::provider::Provider;
use agentmux_providers::OpenAiCompatProvider;
use agentmux_tools::McpPool;
use tracing::info;

/// Build every configured agent's runtime and the registry that serves them.
///
/// The model client is only constructed when some agent needs it, so an
/// echo-only configuration runs without model credentials.
pub fn build_registry(config: &AppConfig) -> Result<ListenerRegistry> {
    let event_bus = Arc::new(EventBus::default());

    let provider: Option<Arc<dyn Provider>> = if config.needs_model() {
        Some(Arc::new(OpenAiCompatProvider::from_config(&config.llm)?))
    } else {
        None
    };

    let pool = Arc::new(McpPool::new(&config.mcp_servers)?);
    info!(
        agents = config.agents.len(),
        mcp_servers = pool.endpoint_names().len(),
        "Building agent runtimes"
    );

    let deps = RuntimeDeps {
        provider,
        discovery: pool.clone(),
        transport: pool,
        event_bus: event_bus.clone(),
    };
    let runtimes = config
        .agents
        .iter()
        .map(|agent| build_runtime(agent, config, &deps))
        .collect::<Result<Vec<Arc<dyn AgentRuntime>>>>()?;

    Ok(ListenerRegistry::new(
        runtimes,
        Duration::from_millis(config.server.shutdown_grace_ms),
        event_bus,
    ))
}
