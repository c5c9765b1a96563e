//! `agentmux agents`: list configured agents.

use agentmux_config::AppConfig;
use agentmux_core::agent::AgentKind;

pub fn run(config: &AppConfig) {
    print!("{}", render(config));
}

fn render(config: &AppConfig) -> String {
    if config.agents.is_empty() {
        return "No agents configured.\n".into();
    }

    let mut out = format!(
        "{:<16} {:<5} {:<22} {:<8} {}\n",
        "NAME", "KIND", "ADDRESS", "CALLING", "TOOLS"
    );
    for agent in &config.agents {
        let tools = match agent.kind {
            AgentKind::Mcp => {
                let servers: Vec<String> = config.mcp_servers_for(agent).into_iter().map(|s| s.name).collect();
                if servers.is_empty() {
                    "(none)".to_string()
                } else {
                    servers.join(", ")
                }
            }
            _ => "-".to_string(),
        };
        let calling = match agent.kind {
            AgentKind::Mcp => format!("{:?}", agent.calling_convention).to_lowercase(),
            _ => "-".to_string(),
        };
        out.push_str(&format!(
            "{:<16} {:<5} {:<22} {:<8} {}\n",
            agent.name,
            agent.kind.to_string(),
            agent.bind_addr(),
            calling,
            tools
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmux_config::McpServerConfig;
    use agentmux_core::agent::{AgentDescriptor, CallingConvention};

    #[test]
    fn empty_config() {
        assert_eq!(render(&AppConfig::default()), "No agents configured.\n");
    }

    #[test]
    fn lists_each_agent() {
        let mut config = AppConfig::default();
        config.mcp_servers.push(McpServerConfig {
            name: "calc".into(),
            url: "http://127.0.0.1:8931/mcp".into(),
            timeout_secs: 30,
            api_key_env: None,
        });
        config.agents.push(AgentDescriptor::new("echo", AgentKind::Echo, 9001));
        let mut math = AgentDescriptor::new("math", AgentKind::Mcp, 9002);
        math.calling_convention = CallingConvention::Prompt;
        config.agents.push(math);

        let text = render(&config);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("echo"));
        assert!(lines[1].contains("127.0.0.1:9001"));
        assert!(lines[2].contains("mcp"));
        assert!(lines[2].contains("prompt"));
        assert!(lines[2].ends_with("calc"));
    }
}
