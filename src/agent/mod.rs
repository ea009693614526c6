//! Execution back-ends and the agents that own them.

mod behavior;
mod manager;
mod pool;
mod runner;
pub mod tools;

pub use behavior::{Agent, Director, Orchestrator, Simulator};
pub use manager::{AgentHandle, Manager};
pub use pool::LocalPool;
pub use runner::{serve_stdin, ProcessEndpoint};
