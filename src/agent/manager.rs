//! In-process agent layer: each launched agent serves a mailbox from its own
//! task until its manager stops it.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::behavior::Agent;
use crate::error::WorkError;
use crate::task::{short_id, Output, WorkItem};

const MAILBOX_CAPACITY: usize = 100;

struct Envelope {
    item: WorkItem,
    reply: oneshot::Sender<Result<Output, WorkError>>,
}

/// Address of a launched agent
#[derive(Debug, Clone)]
pub struct AgentHandle {
    name: String,
    mailbox: mpsc::Sender<Envelope>,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope").field("item", &self.item.id).finish()
    }
}

impl AgentHandle {
    /// Name given at launch, `<kind>-<id>`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send `item` to the agent and wait for its answer
    pub async fn call(&self, item: WorkItem) -> Result<Output, WorkError> {
        let (reply, answer) = oneshot::channel();
        self.mailbox
            .send(Envelope { item, reply })
            .await
            .map_err(|_| WorkError::unavailable(&self.name, "mailbox closed"))?;
        answer
            .await
            .map_err(|_| WorkError::unavailable(&self.name, "agent dropped the call"))?
    }
}

struct Running {
    name: String,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Launches agents into mailbox tasks and shuts them down again.
///
/// Dropping the manager without `shutdown` still stops every agent, but their
/// shutdown hooks then run unobserved.
pub struct Manager {
    name: String,
    agents: Mutex<Vec<Running>>,
}

impl Manager {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agents: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Agents launched and not yet shut down
    pub async fn running_count(&self) -> usize {
        self.agents.lock().await.len()
    }

    /// Run the agent's startup hook, then start serving its mailbox
    pub async fn launch(&self, mut agent: Agent) -> Result<AgentHandle> {
        let name = short_id(agent.kind());
        agent
            .on_startup()
            .await
            .with_context(|| format!("Failed to start {}", name))?;

        let (mailbox, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(serve(name.clone(), Arc::new(agent), rx, stop_rx));

        info!(manager = %self.name, agent = %name, "agent launched");
        self.agents.lock().await.push(Running {
            name: name.clone(),
            stop,
            task,
        });
        Ok(AgentHandle { name, mailbox })
    }

    /// Stop every agent and wait for its shutdown hook
    pub async fn shutdown(&self) {
        let agents: Vec<Running> = self.agents.lock().await.drain(..).collect();
        for running in &agents {
            debug!(manager = %self.name, agent = %running.name, "stopping agent");
        }
        let mut tasks = Vec::with_capacity(agents.len());
        for running in agents {
            let _ = running.stop.send(());
            tasks.push((running.name, running.task));
        }
        for (name, task) in tasks {
            if let Err(e) = task.await {
                warn!(manager = %self.name, agent = %name, error = %e, "agent task failed");
            }
        }
        info!(manager = %self.name, "manager shut down");
    }
}

// The caller of a panicked call only sees its reply dropped
fn log_call_panic(agent: &str, joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        warn!(agent, error = %e, "agent call panicked");
    }
}

async fn serve(
    name: String,
    agent: Arc<Agent>,
    mut rx: mpsc::Receiver<Envelope>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut calls = JoinSet::new();
    loop {
        tokio::select! {
            // a dropped manager also ends the loop
            _ = &mut stop => break,
            envelope = rx.recv() => {
                let Some(Envelope { item, reply }) = envelope else { break };
                let agent = Arc::clone(&agent);
                let name = name.clone();
                calls.spawn(async move {
                    debug!(agent = %name, item = %item.id, action = item.action.name(), "handling call");
                    let mut reply = reply;
                    tokio::select! {
                        result = agent.handle(item) => {
                            let _ = reply.send(result);
                        }
                        _ = reply.closed() => {
                            debug!(agent = %name, "caller went away, call cancelled");
                        }
                    }
                });
            }
            Some(joined) = calls.join_next(), if !calls.is_empty() => {
                log_call_panic(&name, joined);
            }
        }
    }

    rx.close();
    while let Ok(Envelope { reply, .. }) = rx.try_recv() {
        let _ = reply.send(Err(WorkError::unavailable(&name, "agent is shutting down")));
    }
    while let Some(joined) = calls.join_next().await {
        log_call_panic(&name, joined);
    }

    agent.on_shutdown().await;
    debug!(agent = %name, "agent stopped");
}
