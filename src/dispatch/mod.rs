//! Hierarchical batch dispatch over worker handles.

mod aggregate;
mod batch;
mod worker;

pub use aggregate::{concat, mean, sum, Aggregation};
pub use batch::{plan_pairs, Assignment, BatchReport, Dispatcher, FailurePolicy, ItemOutcome};
pub use worker::{Composite, WorkerHandle};
