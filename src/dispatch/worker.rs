//! Worker handles: the things a batch can be issued to, including
//! composites that are dispatchers in their own right.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::debug;

use super::aggregate::Aggregation;
use super::batch::Dispatcher;
use crate::agent::{AgentHandle, LocalPool, ProcessEndpoint};
use crate::error::WorkError;
use crate::task::{Output, WorkItem};

/// Anything a batch can be issued to.
///
/// Every variant answers `submit(item)` with a future result; the dispatcher
/// never needs to know which kind of worker it is talking to.
#[derive(Clone)]
pub enum WorkerHandle {
    /// Bounded pool of local execution slots
    Local(Arc<LocalPool>),
    /// Mailbox of a launched agent
    Agent(AgentHandle),
    /// Child-process endpoint speaking JSON over stdin/stdout
    Endpoint(ProcessEndpoint),
    /// A worker that is itself a dispatcher over sub-workers
    Composite(Arc<Composite>),
}

impl WorkerHandle {
    /// Display name used in outcomes and logs
    pub fn name(&self) -> &str {
        match self {
            Self::Local(pool) => pool.name(),
            Self::Agent(handle) => handle.name(),
            Self::Endpoint(endpoint) => endpoint.name(),
            Self::Composite(composite) => composite.name(),
        }
    }

    // Boxed so composites can recurse into nested dispatches.
    pub fn submit(&self, item: WorkItem) -> BoxFuture<'_, Result<Output, WorkError>> {
        match self {
            Self::Local(pool) => Box::pin(pool.submit(item)),
            Self::Agent(handle) => Box::pin(handle.call(item)),
            Self::Endpoint(endpoint) => Box::pin(endpoint.submit(item)),
            Self::Composite(composite) => Box::pin(composite.submit(item)),
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WorkerHandle").field(&self.name()).finish()
    }
}

/// In-process hierarchical worker: broadcasts each item to its sub-workers
/// and answers with the aggregate of their results.
pub struct Composite {
    name: String,
    workers: Vec<WorkerHandle>,
    dispatcher: Dispatcher,
    aggregation: Aggregation,
}

impl Composite {
    pub fn new(name: impl Into<String>, workers: Vec<WorkerHandle>, aggregation: Aggregation) -> Self {
        Self {
            name: name.into(),
            workers,
            dispatcher: Dispatcher::new(),
            aggregation,
        }
    }

    /// Policy, timeout and retries for the nested batch
    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sub-workers, in the order their results are aggregated
    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    /// Broadcast `item` to every sub-worker and aggregate once all have answered
    pub async fn submit(&self, item: WorkItem) -> Result<Output, WorkError> {
        debug!(composite = %self.name, sub_workers = self.workers.len(), item = %item.id, "fanning out");
        self.dispatcher
            .gather(&self.name, &self.workers, vec![item], &self.aggregation)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_composite_without_workers_fails() {
        let composite = Composite::new("empty", vec![], Aggregation::Mean);
        let err = composite.submit(WorkItem::md_sim(1)).await.unwrap_err();
        assert!(matches!(
            err,
            WorkError::Unavailable { worker, reason } if worker == "empty" && reason.contains("no workers")
        ));
    }

    #[tokio::test]
    async fn test_composite_surfaces_sub_failure() {
        let pool = WorkerHandle::Local(Arc::new(LocalPool::new("slots", 2)));
        let composite = Composite::new("director", vec![pool], Aggregation::Mean);

        let err = composite.submit(WorkItem::simulate_pi(0, None)).await.unwrap_err();
        let WorkError::Nested { failures } = err else {
            panic!("expected nested failure");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].worker, "slots");
        assert!(matches!(failures[0].error, WorkError::Execution { .. }));
    }

    #[tokio::test]
    async fn test_nested_composites() {
        let leaf = |name: &str| WorkerHandle::Local(Arc::new(LocalPool::new(name, 1)));
        let inner = WorkerHandle::Composite(Arc::new(Composite::new(
            "inner",
            vec![leaf("a"), leaf("b")],
            Aggregation::lines(),
        )));
        let outer = Composite::new("outer", vec![inner, leaf("c")], Aggregation::lines());

        let out = outer.submit(WorkItem::echo("hi", 1)).await.unwrap();
        assert_eq!(out, Output::Text("hi\nhi\nhi".into()));
    }

    #[test]
    fn test_worker_names() {
        let pool = WorkerHandle::Local(Arc::new(LocalPool::new("node-pool", 2)));
        let composite = WorkerHandle::Composite(Arc::new(Composite::new(
            "director-0",
            vec![pool.clone()],
            Aggregation::Mean,
        )));
        assert_eq!(pool.name(), "node-pool");
        assert_eq!(composite.name(), "director-0");
        assert_eq!(format!("{:?}", composite), r#"WorkerHandle("director-0")"#);
    }
}
