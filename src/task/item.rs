//! Work items and the results they produce.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Short random id with a prefix, e.g. `item-1a2b3c4d`
pub fn short_id(prefix: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &uuid[..8])
}

/// Named action plus its arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Monte-Carlo estimate of pi from `rounds` random points
    SimulatePi {
        rounds: u64,
        #[serde(default)]
        seed: Option<u64>,
    },
    /// Mock molecular-dynamics tool: hold a slot for `duration_ms`, report the node
    MdSim { duration_ms: u64 },
    /// Fan `iterations` md_sim calls over the worker's own slot pool
    MdSimBatch { iterations: usize, duration_ms: u64 },
    /// Orchestrator entry point: gather estimates from its simulators
    Process,
    /// Run an external program, result is its trimmed stdout
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Return `message` after `delay_ms`
    Echo { message: String, delay_ms: u64 },
}

impl Action {
    /// Wire name of the action
    pub fn name(&self) -> &'static str {
        match self {
            Self::SimulatePi { .. } => "simulate_pi",
            Self::MdSim { .. } => "md_sim",
            Self::MdSimBatch { .. } => "md_sim_batch",
            Self::Process => "process",
            Self::Command { .. } => "command",
            Self::Echo { .. } => "echo",
        }
    }
}

/// One unit of work. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub action: Action,
    pub created_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(action: Action) -> Self {
        Self {
            id: short_id("item"),
            action,
            created_at: Utc::now(),
        }
    }

    pub fn simulate_pi(rounds: u64, seed: Option<u64>) -> Self {
        Self::new(Action::SimulatePi { rounds, seed })
    }

    pub fn md_sim(duration_ms: u64) -> Self {
        Self::new(Action::MdSim { duration_ms })
    }

    pub fn echo(message: impl Into<String>, delay_ms: u64) -> Self {
        Self::new(Action::Echo {
            message: message.into(),
            delay_ms,
        })
    }
}

/// Value returned by a completed work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Output {
    Number(f64),
    Text(String),
    Record(serde_json::Value),
}

impl Output {
    /// The numeric value, if this is a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
            Self::Record(v) => write!(f, "{}", v),
        }
    }
}

/// Terminal state of an issued pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Completed,
    Failed,
    Cancelled,
}

impl ItemStatus {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }
}
