//! Batch dispatch: issue every (worker, item) pair, join them all, keep issuance order.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::aggregate::Aggregation;
use super::worker::WorkerHandle;
use crate::error::{AggregateError, BatchError, PairFailure, WorkError};
use crate::task::{short_id, ItemStatus, Output, WorkItem};

/// What happens to the rest of a batch when one pair fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Cancel outstanding pairs and report the failure
    #[default]
    FailFast,
    /// Let every pair finish, mark failures per item
    CollectAll,
}

/// How items were mapped onto workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignment {
    OneToOne,
    Broadcast,
    RoundRobin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pair {
    pub index: usize,
    pub worker: usize,
    pub item: usize,
}

/// Map `items` onto `workers`.
///
/// Equal counts pair one-to-one, a single item is broadcast to every worker,
/// anything else goes round-robin.
pub fn plan_pairs(workers: usize, items: usize) -> Result<(Assignment, Vec<Pair>), BatchError> {
    if items == 0 {
        return Ok((Assignment::OneToOne, Vec::new()));
    }
    if workers == 0 {
        return Err(BatchError::NoWorkers { items });
    }

    if workers == items {
        let pairs = (0..items)
            .map(|i| Pair { index: i, worker: i, item: i })
            .collect();
        Ok((Assignment::OneToOne, pairs))
    } else if items == 1 {
        let pairs = (0..workers)
            .map(|w| Pair { index: w, worker: w, item: 0 })
            .collect();
        Ok((Assignment::Broadcast, pairs))
    } else {
        let pairs = (0..items)
            .map(|i| Pair { index: i, worker: i % workers, item: i })
            .collect();
        Ok((Assignment::RoundRobin, pairs))
    }
}

/// Final state of one issued pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub index: usize,
    pub worker: String,
    pub item_id: String,
    pub action: String,
    pub attempts: u32,
    pub status: ItemStatus,
    pub result: Result<Output, WorkError>,
    pub completed_at: DateTime<Utc>,
}

impl ItemOutcome {
    fn finished(
        index: usize,
        worker: &WorkerHandle,
        item: &WorkItem,
        attempts: u32,
        result: Result<Output, WorkError>,
    ) -> Self {
        let status = match &result {
            Ok(_) => ItemStatus::Completed,
            Err(WorkError::Cancelled) => ItemStatus::Cancelled,
            Err(_) => ItemStatus::Failed,
        };
        Self {
            index,
            worker: worker.name().to_string(),
            item_id: item.id.clone(),
            action: item.action.name().to_string(),
            attempts,
            status,
            result,
            completed_at: Utc::now(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.status == ItemStatus::Failed
    }

    fn failure(&self) -> Option<PairFailure> {
        match &self.result {
            Err(error) if self.is_failure() => Some(PairFailure {
                index: self.index,
                worker: self.worker.clone(),
                item_id: self.item_id.clone(),
                error: error.clone(),
            }),
            _ => None,
        }
    }
}

/// All outcomes of a batch, in issuance order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub id: String,
    pub assignment: Assignment,
    pub outcomes: Vec<ItemOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    /// Number of issued pairs
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Failed pairs in issuance order; cancelled pairs are not failures
    pub fn failures(&self) -> Vec<PairFailure> {
        self.outcomes.iter().filter_map(ItemOutcome::failure).collect()
    }

    /// Every pair completed
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.status == ItemStatus::Completed)
    }

    /// Successful outputs in order; any failed pair makes the batch unreducible
    pub fn outputs(&self) -> Result<Vec<Output>, AggregateError> {
        self.outcomes
            .iter()
            .map(|o| match &o.result {
                Ok(output) => Ok(output.clone()),
                Err(e) => Err(AggregateError::Failed {
                    index: o.index,
                    reason: e.to_string(),
                }),
            })
            .collect()
    }

    /// Reduce the outputs with one of the built-in aggregations
    pub fn reduce(&self, aggregation: &Aggregation) -> Result<Output, AggregateError> {
        aggregation.apply(&self.outputs()?)
    }

    /// Reduce the outputs with a caller-supplied function
    pub fn reduce_with<T, F>(&self, reduce: F) -> Result<T, AggregateError>
    where
        F: FnOnce(&[Output]) -> Result<T, AggregateError>,
    {
        reduce(&self.outputs()?)
    }
}

/// Hierarchical batch dispatcher
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    policy: FailurePolicy,
    item_timeout: Option<Duration>,
    retries: u32,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Per-attempt limit; `None` waits as long as the worker takes
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.item_timeout = timeout;
        self
    }

    /// Extra attempts for transient failures
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Issue every pair concurrently, then wait for all of them.
    ///
    /// Under [`FailurePolicy::FailFast`] the first failed pair drops every
    /// outstanding call and the batch returns [`BatchError::Aborted`].
    /// Under [`FailurePolicy::CollectAll`] failures stay in the report.
    pub async fn dispatch(
        &self,
        workers: &[WorkerHandle],
        items: Vec<WorkItem>,
    ) -> Result<BatchReport, BatchError> {
        let id = short_id("batch");
        let started_at = Utc::now();
        let (assignment, pairs) = plan_pairs(workers.len(), items.len())?;

        info!(
            batch = %id,
            workers = workers.len(),
            items = items.len(),
            pairs = pairs.len(),
            ?assignment,
            policy = ?self.policy,
            "dispatching batch"
        );

        let mut slots: Vec<Option<ItemOutcome>> = (0..pairs.len()).map(|_| None).collect();
        let mut in_flight = FuturesUnordered::new();
        for pair in &pairs {
            in_flight.push(self.run_pair(pair.index, &workers[pair.worker], &items[pair.item]));
        }

        let mut aborted = false;
        while let Some(outcome) = in_flight.next().await {
            let index = outcome.index;
            let failed = outcome.is_failure();
            slots[index] = Some(outcome);
            if failed && self.policy == FailurePolicy::FailFast {
                aborted = true;
                break;
            }
        }

        let cancelled = in_flight.len();
        // dropping the remaining futures cancels them
        drop(in_flight);

        let outcomes: Vec<ItemOutcome> = slots
            .into_iter()
            .zip(&pairs)
            .map(|(slot, pair)| {
                slot.unwrap_or_else(|| {
                    ItemOutcome::finished(
                        pair.index,
                        &workers[pair.worker],
                        &items[pair.item],
                        0,
                        Err(WorkError::Cancelled),
                    )
                })
            })
            .collect();

        if aborted {
            let failures: Vec<PairFailure> =
                outcomes.iter().filter_map(ItemOutcome::failure).collect();
            warn!(batch = %id, failed = failures.len(), cancelled, "batch aborted");
            return Err(BatchError::Aborted {
                failures,
                cancelled,
            });
        }

        let report = BatchReport {
            id,
            assignment,
            outcomes,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            batch = %report.id,
            completed = report.outcomes.iter().filter(|o| o.status == ItemStatus::Completed).count(),
            failed = report.failures().len(),
            "batch complete"
        );
        Ok(report)
    }

    /// Run a nested batch on behalf of `owner` and reduce it to one result.
    ///
    /// Sub-worker failures come back as [`WorkError::Nested`] with their
    /// own errors intact, so the parent batch only retries them when every
    /// one of them is transient.
    pub async fn gather(
        &self,
        owner: &str,
        workers: &[WorkerHandle],
        items: Vec<WorkItem>,
        aggregation: &Aggregation,
    ) -> Result<Output, WorkError> {
        let report = self
            .dispatch(workers, items)
            .await
            .map_err(|e| WorkError::from_batch(owner, e))?;
        let failures = report.failures();
        if !failures.is_empty() {
            for failure in &failures {
                warn!(owner, %failure, "sub-worker failed");
            }
            return Err(WorkError::Nested { failures });
        }
        Ok(report.reduce(aggregation)?)
    }

    async fn run_pair(&self, index: usize, worker: &WorkerHandle, item: &WorkItem) -> ItemOutcome {
        let mut attempts = 0;
        loop {
            attempts += 1;
            debug!(index, worker = worker.name(), item = %item.id, attempts, "issuing");

            let call = worker.submit(item.clone());
            let result = match self.item_timeout {
                Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                    Err(WorkError::Timeout {
                        after_ms: limit.as_millis() as u64,
                    })
                }),
                None => call.await,
            };

            match result {
                Err(ref e) if e.is_transient() && attempts <= self.retries => {
                    warn!(index, worker = worker.name(), item = %item.id, error = %e, "retrying");
                }
                result => return ItemOutcome::finished(index, worker, item, attempts, result),
            }
        }
    }
}
