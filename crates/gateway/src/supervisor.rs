//! Process-level lifecycle: start everything, wait for a termination
//! signal, stop everything.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use agentmux_core::{Error, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::registry::{ListenerRegistry, StartReport};

pub struct ProcessSupervisor {
    registry: Arc<ListenerRegistry>,
    shutdown_requested: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl ProcessSupervisor {
    pub fn new(registry: Arc<ListenerRegistry>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry,
            shutdown_requested: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    /// Ask the supervisor to shut down, as a termination signal would.
    ///
    /// Returns `true` only for the call that initiated shutdown; later calls
    /// are ignored.
    pub fn request_shutdown(&self) -> bool {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            info!("Shutdown already in progress");
            return false;
        }
        info!("Shutdown requested");
        self.shutdown_tx.send_replace(true);
        true
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|requested| *requested).await;
    }

    /// Translate SIGINT and SIGTERM (Ctrl-C elsewhere) into shutdown requests.
    pub fn install_signal_handlers(self: &Arc<Self>) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                if let Err(e) = termination_signal().await {
                    error!(error = %e, "Failed to listen for termination signals");
                    return;
                }
                supervisor.request_shutdown();
            }
        })
    }

    /// Start all agents, serve until shutdown is requested, then stop them all.
    ///
    /// Signal handlers are installed before any listener starts, so a signal
    /// that arrives during startup still leads to a full teardown.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        if self.registry.is_empty() {
            warn!("No agents configured, nothing to serve");
            return Ok(());
        }

        let signals = self.install_signal_handlers();
        let outcome = self.serve().await;
        signals.abort();
        outcome
    }

    async fn serve(&self) -> Result<()> {
        let report = self.registry.start_all().await;
        self.log_status(&report);
        if report.iter().all(|(_, result)| result.is_err()) {
            return Err(Error::Internal("no agent listener could be started".into()));
        }

        self.wait_for_shutdown().await;

        info!("Shutting down all agents");
        self.registry.stop_all().await;
        info!("All agents stopped");
        Ok(())
    }

    fn log_status(&self, report: &StartReport) {
        let started = report.iter().filter(|(_, r)| r.is_ok()).count();
        info!(started, configured = report.len(), "Agent startup complete");
        for descriptor in self.registry.descriptors() {
            let outcome = report.iter().find(|(name, _)| *name == descriptor.name);
            match outcome {
                Some((_, Ok(addr))) => info!(
                    agent = %descriptor.name,
                    kind = %descriptor.kind,
                    url = %format!("http://{addr}/"),
                    "running"
                ),
                Some((_, Err(e))) => warn!(agent = %descriptor.name, kind = %descriptor.kind, error = %e, "not running"),
                None => {}
            }
        }
    }
}

#[cfg(unix)]
async fn termination_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = interrupt.recv() => info!("Received SIGINT"),
        _ = terminate.recv() => info!("Received SIGTERM"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn termination_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentmux_agent::{AgentRuntime, EchoAgent};
    use agentmux_core::agent::{AgentDescriptor, AgentKind};
    use agentmux_core::event::EventBus;
    use std::time::Duration;

    fn supervisor(agents: Vec<Arc<dyn AgentRuntime>>) -> Arc<ProcessSupervisor> {
        let registry = ListenerRegistry::new(agents, Duration::from_millis(50), Arc::new(EventBus::default()));
        Arc::new(ProcessSupervisor::new(Arc::new(registry)))
    }

    fn echo(name: &str) -> Arc<dyn AgentRuntime> {
        Arc::new(EchoAgent::new(AgentDescriptor::new(name, AgentKind::Echo, 0)))
    }

    #[test]
    fn request_shutdown_is_idempotent() {
        let sup = supervisor(vec![]);
        assert!(!sup.is_shutdown_requested());
        assert!(sup.request_shutdown());
        assert!(!sup.request_shutdown());
        assert!(sup.is_shutdown_requested());
    }

    #[tokio::test]
    async fn run_without_agents_returns_immediately() {
        let sup = supervisor(vec![]);
        sup.run().await.unwrap();
    }

    #[tokio::test]
    async fn run_serves_until_shutdown() {
        let sup = supervisor(vec![echo("a"), echo("b")]);
        let runner = {
            let sup = sup.clone();
            tokio::spawn(async move { sup.run().await })
        };

        for _ in 0..100 {
            if sup.registry().running_agents().await.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sup.registry().running_agents().await, vec!["a", "b"]);

        assert!(sup.request_shutdown());
        runner.await.unwrap().unwrap();
        assert!(sup.registry().running_agents().await.is_empty());
    }

    #[tokio::test]
    async fn shutdown_during_startup_still_tears_down() {
        let sup = supervisor(vec![echo("a"), echo("b")]);
        assert!(sup.request_shutdown());

        tokio::time::timeout(Duration::from_secs(5), sup.run())
            .await
            .unwrap()
            .unwrap();
        assert!(sup.registry().running_agents().await.is_empty());
    }

    #[tokio::test]
    async fn repeated_requests_during_teardown_are_ignored() {
        let sup = supervisor(vec![echo("a"), echo("b"), echo("c")]);
        let runner = {
            let sup = sup.clone();
            tokio::spawn(async move { sup.run().await })
        };
        for _ in 0..100 {
            if sup.registry().running_agents().await.len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let requests = (0..20).map(|_| {
            let sup = sup.clone();
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                sup.request_shutdown()
            })
        });
        let accepted = futures::future::join_all(requests)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();
        assert_eq!(accepted, 1);

        runner.await.unwrap().unwrap();
        assert!(sup.registry().running_agents().await.is_empty());
        assert!(!sup.request_shutdown());
    }

    #[tokio::test]
    async fn shutdown_before_wait_is_not_lost() {
        let sup = supervisor(vec![]);
        sup.request_shutdown();
        tokio::time::timeout(Duration::from_secs(1), sup.wait_for_shutdown())
            .await
            .unwrap();
    }
}
