//! Blueprints for composing agents with local and remote execution back-ends.
//!
//! The core is [`dispatch::Dispatcher`]: it issues work items to a set of
//! [`dispatch::WorkerHandle`]s, joins every call and hands back the outcomes
//! in issuance order. A worker may itself dispatch to sub-workers, which is
//! how the hierarchical blueprints fan work out across directors and slots.

pub mod agent;
pub mod blueprint;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod task;
