//! The set of running agent listeners.
//!
//! Each agent moves `STOPPED -> RUNNING -> STOPPED`. All mutations go
//! through one async mutex, so concurrent `start`/`stop` calls for the same
//! name cannot race each other.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use agentmux_agent::AgentRuntime;
use agentmux_core::agent::AgentDescriptor;
use agentmux_core::error::ListenerError;
use agentmux_core::event::{DomainEvent, EventBus};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::a2a::{self, A2aState};

/// A listener in the `RUNNING` state.
struct ListenerHandle {
    local_addr: SocketAddr,
    started_at: DateTime<Utc>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Outcome of [`ListenerRegistry::start_all`], one entry per configured agent.
pub type StartReport = Vec<(String, Result<SocketAddr, ListenerError>)>;

pub struct ListenerRegistry {
    runtimes: BTreeMap<String, Arc<dyn AgentRuntime>>,
    listeners: Mutex<HashMap<String, ListenerHandle>>,
    grace: Duration,
    event_bus: Arc<EventBus>,
}

impl ListenerRegistry {
    pub fn new(runtimes: Vec<Arc<dyn AgentRuntime>>, grace: Duration, event_bus: Arc<EventBus>) -> Self {
        let runtimes = runtimes
            .into_iter()
            .map(|r| (r.descriptor().name.clone(), r))
            .collect();
        Self {
            runtimes,
            listeners: Mutex::new(HashMap::new()),
            grace,
            event_bus,
        }
    }

    /// Descriptors of every configured agent, sorted by name.
    pub fn descriptors(&self) -> Vec<&AgentDescriptor> {
        self.runtimes.values().map(|r| r.descriptor()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }

    /// Bind and begin serving one agent.
    ///
    /// The socket is bound before this returns, so a busy port is reported
    /// here rather than from the serving task.
    pub async fn start(&self, name: &str) -> Result<SocketAddr, ListenerError> {
        let mut listeners = self.listeners.lock().await;
        if listeners.contains_key(name) {
            return Err(ListenerError::AlreadyRunning(name.to_string()));
        }
        let runtime = self
            .runtimes
            .get(name)
            .ok_or_else(|| ListenerError::UnknownAgent(name.to_string()))?;
        let descriptor = runtime.descriptor();

        let bind_addr = descriptor.bind_addr();
        let listener = match TcpListener::bind(&bind_addr).await {
            Ok(l) => l,
            Err(e) => return Err(self.bind_failed(name, &bind_addr, e.to_string())),
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => return Err(self.bind_failed(name, &bind_addr, e.to_string())),
        };

        let url = format!("http://{local_addr}/");
        let app = a2a::router(Arc::new(A2aState::new(runtime.clone(), url)));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let agent = name.to_string();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                error!(agent = %agent, error = %e, "Listener terminated with error");
            }
        });

        listeners.insert(
            name.to_string(),
            ListenerHandle {
                local_addr,
                started_at: Utc::now(),
                shutdown: shutdown_tx,
                task,
            },
        );

        info!(agent = %name, addr = %local_addr, kind = %descriptor.kind, "Agent listener started");
        self.event_bus.publish(DomainEvent::ListenerStarted {
            agent: name.to_string(),
            addr: local_addr.to_string(),
            timestamp: Utc::now(),
        });
        Ok(local_addr)
    }

    fn bind_failed(&self, name: &str, addr: &str, reason: String) -> ListenerError {
        let err = ListenerError::Bind {
            name: name.to_string(),
            addr: addr.to_string(),
            reason,
        };
        error!(agent = %name, error = %err, "Agent listener failed to start");
        self.event_bus.publish(DomainEvent::ListenerFailed {
            agent: name.to_string(),
            error_message: err.to_string(),
            timestamp: Utc::now(),
        });
        err
    }

    /// Start every configured agent concurrently.
    ///
    /// One agent failing to start does not affect the others; each outcome
    /// is reported in the returned list, in name order.
    pub async fn start_all(&self) -> StartReport {
        if self.runtimes.is_empty() {
            warn!("No agents configured");
            return Vec::new();
        }
        let names: Vec<&String> = self.runtimes.keys().collect();
        let results = join_all(names.iter().map(|name| self.start(name))).await;
        names.into_iter().cloned().zip(results).collect()
    }

    /// Stop one agent; a warning and no-op when it is not running.
    ///
    /// Returns whether a listener was stopped.
    pub async fn stop(&self, name: &str) -> bool {
        let mut listeners = self.listeners.lock().await;
        let Some(handle) = listeners.remove(name) else {
            warn!(agent = %name, "Agent is not running");
            return false;
        };
        self.shutdown(name, handle).await;
        true
    }

    /// Stop every running agent concurrently. The registry is empty afterwards.
    pub async fn stop_all(&self) {
        let mut listeners = self.listeners.lock().await;
        let running: Vec<(String, ListenerHandle)> = listeners.drain().collect();
        if running.is_empty() {
            debug!("No running agents to stop");
            return;
        }
        info!(count = running.len(), "Stopping all agent listeners");
        join_all(running.into_iter().map(|(name, handle)| async move {
            self.shutdown(&name, handle).await;
        }))
        .await;
    }

    /// Stop accepting, give in-flight requests the grace interval, then let go.
    ///
    /// The serving task is not aborted: requests still running after the
    /// grace interval finish in the background.
    async fn shutdown(&self, name: &str, mut handle: ListenerHandle) {
        if handle.shutdown.send(()).is_err() {
            debug!(agent = %name, "Listener task already exited");
        }
        if tokio::time::timeout(self.grace, &mut handle.task).await.is_err() {
            debug!(agent = %name, "Grace interval elapsed with requests in flight");
        }
        let uptime = Utc::now() - handle.started_at;
        info!(agent = %name, uptime_secs = uptime.num_seconds(), "Agent listener stopped");
        self.event_bus.publish(DomainEvent::ListenerStopped {
            agent: name.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub async fn is_running(&self, name: &str) -> bool {
        self.listeners.lock().await.contains_key(name)
    }

    /// Names of running agents, sorted.
    pub async fn running_agents(&self) -> Vec<String> {
        let mut names: Vec<String> = self.listeners.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// The bound address of a running agent.
    pub async fn local_addr(&self, name: &str) -> Option<SocketAddr> {
        self.listeners.lock().await.get(name).map(|h| h.local_addr)
    }
}
