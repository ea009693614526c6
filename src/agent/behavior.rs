//! Agent definitions: a Simulator, a Director that owns a slot pool, and an
//! Orchestrator that gathers estimates from its simulators.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use futures_util::future::BoxFuture;
use tracing::info;

use super::manager::Manager;
use super::pool::LocalPool;
use super::tools;
use crate::dispatch::{Aggregation, Dispatcher, WorkerHandle};
use crate::error::WorkError;
use crate::task::{short_id, Action, Output, WorkItem};

/// Closed set of agent kinds a [`Manager`] can launch
pub enum Agent {
    Simulator(Simulator),
    Director(Director),
    Orchestrator(Orchestrator),
}

impl Agent {
    /// Prefix of the names a [`Manager`] gives this kind of agent
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Simulator(_) => "simulator",
            Self::Director(_) => "director",
            Self::Orchestrator(_) => "orchestrator",
        }
    }

    /// Acquire whatever the agent needs before it takes calls
    pub fn on_startup(&mut self) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            match self {
                Self::Simulator(_) => Ok(()),
                Self::Director(director) => {
                    director.on_startup();
                    Ok(())
                }
                Self::Orchestrator(orchestrator) => orchestrator.on_startup().await,
            }
        })
    }

    pub fn handle(&self, item: WorkItem) -> BoxFuture<'_, Result<Output, WorkError>> {
        Box::pin(async move {
            match self {
                Self::Simulator(simulator) => simulator.handle(item).await,
                Self::Director(director) => director.handle(item).await,
                Self::Orchestrator(orchestrator) => orchestrator.handle(item).await,
            }
        })
    }

    /// Release what `on_startup` acquired
    pub fn on_shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            match self {
                Self::Simulator(_) => {}
                Self::Director(director) => director.on_shutdown(),
                Self::Orchestrator(orchestrator) => orchestrator.on_shutdown().await,
            }
        })
    }
}

/// Answers `simulate_pi`
#[derive(Debug, Clone, Copy, Default)]
pub struct Simulator;

impl Simulator {
    async fn handle(&self, item: WorkItem) -> Result<Output, WorkError> {
        match item.action {
            Action::SimulatePi { .. } => tools::run(&item.action, "simulator").await,
            other => Err(WorkError::unsupported("simulator", other.name())),
        }
    }
}

/// Runs md_sim calls on a slot pool it owns for its whole lifetime
pub struct Director {
    slots: usize,
    dispatcher: Dispatcher,
    pool: Option<Arc<LocalPool>>,
}

impl Director {
    pub fn new(slots: usize) -> Self {
        Self {
            slots,
            dispatcher: Dispatcher::new(),
            pool: None,
        }
    }

    /// Size the pool from a node list: one host per non-blank line,
    /// `workers_per_node` slots on each.
    pub fn from_nodefile(nodefile: &Path, workers_per_node: usize) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(nodefile)
            .with_context(|| format!("Failed to read nodefile {}", nodefile.display()))?;
        let nodes = content.lines().filter(|l| !l.trim().is_empty()).count();
        if nodes == 0 {
            bail!("Nodefile {} lists no nodes", nodefile.display());
        }
        info!(nodefile = %nodefile.display(), nodes, workers_per_node, "director sized from nodefile");
        Ok(Self::new(nodes * workers_per_node.max(1)))
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    fn on_startup(&mut self) {
        self.pool = Some(Arc::new(LocalPool::new(short_id("slots"), self.slots)));
    }

    fn on_shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.close();
        }
    }

    async fn handle(&self, item: WorkItem) -> Result<Output, WorkError> {
        let pool = self
            .pool
            .clone()
            .ok_or_else(|| WorkError::unavailable("director", "not started"))?;

        match item.action {
            Action::MdSim { .. } => pool.submit(item).await,
            Action::MdSimBatch {
                iterations,
                duration_ms,
            } => {
                let items = (0..iterations).map(|_| WorkItem::md_sim(duration_ms)).collect();
                self.dispatcher
                    .gather("director", &[WorkerHandle::Local(pool)], items, &Aggregation::sim_log())
                    .await
            }
            other => Err(WorkError::unsupported("director", other.name())),
        }
    }
}

/// Gathers pi estimates from simulators and answers `process` with their mean.
///
/// Simulators are either handed in up front or launched by the orchestrator's
/// own manager when it starts.
pub struct Orchestrator {
    simulators: Vec<WorkerHandle>,
    spawn: usize,
    rounds: u64,
    seed: Option<u64>,
    dispatcher: Dispatcher,
    manager: Option<Manager>,
}

impl Orchestrator {
    pub fn with_simulators(simulators: Vec<WorkerHandle>, rounds: u64) -> Self {
        Self {
            simulators,
            spawn: 0,
            rounds,
            seed: None,
            dispatcher: Dispatcher::new(),
            manager: None,
        }
    }

    /// Launch `count` simulators on startup
    pub fn spawning(count: usize, rounds: u64) -> Self {
        Self {
            spawn: count,
            ..Self::with_simulators(Vec::new(), rounds)
        }
    }

    /// Simulator `i` gets `seed + i`, wrapping at `u64::MAX`
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    async fn on_startup(&mut self) -> anyhow::Result<()> {
        if self.spawn == 0 {
            return Ok(());
        }
        let manager = Manager::new(short_id("orchestrator-manager"));
        for _ in 0..self.spawn {
            match manager.launch(Agent::Simulator(Simulator)).await {
                Ok(handle) => self.simulators.push(WorkerHandle::Agent(handle)),
                Err(e) => {
                    manager.shutdown().await;
                    return Err(e);
                }
            }
        }
        info!(simulators = self.simulators.len(), "orchestrator launched its simulators");
        self.manager = Some(manager);
        Ok(())
    }

    async fn on_shutdown(&self) {
        if let Some(manager) = &self.manager {
            manager.shutdown().await;
        }
    }

    async fn handle(&self, item: WorkItem) -> Result<Output, WorkError> {
        match item.action {
            Action::Process => {
                // distinct seeds so seeded simulators don't all agree
                let items: Vec<WorkItem> = (0..self.simulators.len())
                    .map(|i| {
                        let seed = self.seed.map(|s| s.wrapping_add(i as u64));
                        WorkItem::simulate_pi(self.rounds, seed)
                    })
                    .collect();
                self.dispatcher
                    .gather("orchestrator", &self.simulators, items, &Aggregation::Mean)
                    .await
            }
            other => Err(WorkError::unsupported("orchestrator", other.name())),
        }
    }
}
