//! Error types for work items, batches and their aggregation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a single (worker, item) pair produced no result
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkError {
    /// The call reached the worker and the work itself failed
    #[error("execution failed: {reason}")]
    Execution { reason: String },

    /// The worker could not be reached (closed pool, dead mailbox, spawn failure)
    #[error("worker '{worker}' unavailable: {reason}")]
    Unavailable { worker: String, reason: String },

    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// Dropped before completion because another pair failed
    #[error("cancelled")]
    Cancelled,

    #[error("worker '{worker}' does not support action '{action}'")]
    Unsupported { worker: String, action: String },

    /// Sub-workers of a hierarchical worker failed; each keeps its own error
    #[error("{} sub-result(s) failed [{}]", .failures.len(), summarize(.failures))]
    Nested { failures: Vec<PairFailure> },

    /// Every sub-result arrived but they could not be combined
    #[error("aggregation failed: {reason}")]
    Aggregate { reason: String },
}

impl WorkError {
    pub fn execution(reason: impl Into<String>) -> Self {
        Self::Execution {
            reason: reason.into(),
        }
    }

    pub fn unavailable(worker: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            worker: worker.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(worker: impl Into<String>, action: impl Into<String>) -> Self {
        Self::Unsupported {
            worker: worker.into(),
            action: action.into(),
        }
    }

    /// Failure of a nested batch run on behalf of `owner`
    pub fn from_batch(owner: &str, err: BatchError) -> Self {
        match err {
            BatchError::NoWorkers { .. } => Self::unavailable(owner, err.to_string()),
            BatchError::Aborted { failures, .. } => Self::Nested { failures },
        }
    }

    /// Failures worth another attempt under a retry budget.
    ///
    /// A nested failure is transient only when every inner failure is.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Execution { .. } | Self::Timeout { .. } => true,
            Self::Nested { failures } => {
                !failures.is_empty() && failures.iter().all(|f| f.error.is_transient())
            }
            _ => false,
        }
    }
}

impl From<AggregateError> for WorkError {
    fn from(err: AggregateError) -> Self {
        Self::Aggregate {
            reason: err.to_string(),
        }
    }
}

/// Reduction over a finished batch failed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregateError {
    #[error("cannot aggregate an empty result set")]
    Empty,

    #[error("result #{index} is not numeric")]
    NotNumeric { index: usize },

    #[error("result #{index} is not text")]
    NotText { index: usize },

    #[error("result #{index} failed: {reason}")]
    Failed { index: usize, reason: String },
}

/// One failed pair in a batch, with enough context to report it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairFailure {
    pub index: usize,
    pub worker: String,
    pub item_id: String,
    pub error: WorkError,
}

impl std::fmt::Display for PairFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{} {} <- {}: {}",
            self.index, self.worker, self.item_id, self.error
        )
    }
}

/// Why a batch as a whole produced no report
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchError {
    #[error("no workers to dispatch {items} item(s) to")]
    NoWorkers { items: usize },

    #[error(
        "batch aborted: {} failed, {cancelled} cancelled [{}]",
        .failures.len(),
        summarize(.failures)
    )]
    Aborted {
        failures: Vec<PairFailure>,
        cancelled: usize,
    },
}

fn summarize(failures: &[PairFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
