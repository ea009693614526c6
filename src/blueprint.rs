//! The runnable blueprints: each wires agents, back-ends and the dispatcher
//! together for one workload, then tears everything down again.

use anyhow::Result;
use tracing::info;

use crate::agent::{Agent, AgentHandle, Director, Manager, Orchestrator, ProcessEndpoint, Simulator};
use crate::config::BlueprintConfig;
use crate::dispatch::{Aggregation, BatchReport, WorkerHandle};
use crate::task::{Action, Output, WorkItem};

/// Outcome of one blueprint run
#[derive(Debug, Clone)]
pub struct BlueprintRun {
    pub name: &'static str,
    pub report: BatchReport,
    pub summary: Output,
}

/// Client -> orchestrator -> N simulators, answered with the mean estimate.
///
/// With `remote`, simulators are child-process endpoints instead of agents.
pub async fn federated_pi(config: &BlueprintConfig, remote: bool) -> Result<BlueprintRun> {
    let manager = Manager::new("client");
    let run = run_federated_pi(&manager, config, remote).await;
    manager.shutdown().await;
    run
}

async fn run_federated_pi(
    manager: &Manager,
    config: &BlueprintConfig,
    remote: bool,
) -> Result<BlueprintRun> {
    let mut simulators = Vec::with_capacity(config.workers);
    for i in 0..config.workers {
        let simulator = if remote {
            WorkerHandle::Endpoint(ProcessEndpoint::current_exe(format!("endpoint-{}", i))?)
        } else {
            WorkerHandle::Agent(manager.launch(Agent::Simulator(Simulator)).await?)
        };
        simulators.push(simulator);
    }

    let orchestrator = Orchestrator::with_simulators(simulators, config.rounds)
        .with_seed(config.seed)
        .with_dispatcher(config.dispatcher());
    let orchestrator = manager.launch(Agent::Orchestrator(orchestrator)).await?;

    let (report, summary) = ask_orchestrator(config, orchestrator).await?;
    info!(pi_estimate = %summary, "orchestrator finished");
    Ok(BlueprintRun {
        name: "pi",
        report,
        summary,
    })
}

/// Client -> orchestrator, which launches its own simulators on startup
pub async fn spawning_pi(config: &BlueprintConfig) -> Result<BlueprintRun> {
    let manager = Manager::new("client");
    let run = run_spawning_pi(&manager, config).await;
    manager.shutdown().await;
    run
}

async fn run_spawning_pi(manager: &Manager, config: &BlueprintConfig) -> Result<BlueprintRun> {
    let orchestrator = Orchestrator::spawning(config.workers, config.rounds)
        .with_seed(config.seed)
        .with_dispatcher(config.dispatcher());
    let orchestrator = manager.launch(Agent::Orchestrator(orchestrator)).await?;

    let (report, summary) = ask_orchestrator(config, orchestrator).await?;
    info!(pi_estimate = %summary, "pi estimate from the orchestration");
    Ok(BlueprintRun {
        name: "spawn-pi",
        report,
        summary,
    })
}

async fn ask_orchestrator(
    config: &BlueprintConfig,
    orchestrator: AgentHandle,
) -> Result<(BatchReport, Output)> {
    let report = config
        .dispatcher()
        .dispatch(&[WorkerHandle::Agent(orchestrator)], vec![WorkItem::new(Action::Process)])
        .await?;
    let summary = report.reduce(&Aggregation::Mean)?;
    Ok((report, summary))
}

/// Directors each run a batch of `iterations` md_sim calls over their own slots
pub async fn hierarchical_md(config: &BlueprintConfig) -> Result<BlueprintRun> {
    let manager = Manager::new("client");
    let run = run_directors(
        &manager,
        config,
        "md-sim",
        Action::MdSimBatch {
            iterations: config.iterations,
            duration_ms: config.duration_ms,
        },
    )
    .await;
    manager.shutdown().await;
    run
}

/// Directors each run a single md_sim call
pub async fn minimal_md(config: &BlueprintConfig) -> Result<BlueprintRun> {
    let manager = Manager::new("client");
    let run = run_directors(
        &manager,
        config,
        "minimal",
        Action::MdSim {
            duration_ms: config.duration_ms,
        },
    )
    .await;
    manager.shutdown().await;
    run
}

async fn run_directors(
    manager: &Manager,
    config: &BlueprintConfig,
    name: &'static str,
    action: Action,
) -> Result<BlueprintRun> {
    let mut directors = Vec::new();
    for director in plan_directors(config)? {
        let director = director.with_dispatcher(config.dispatcher());
        directors.push(WorkerHandle::Agent(manager.launch(Agent::Director(director)).await?));
    }

    // one item, broadcast to every director
    let report = config
        .dispatcher()
        .dispatch(&directors, vec![WorkItem::new(action)])
        .await?;
    for outcome in &report.outcomes {
        if let Ok(result) = &outcome.result {
            info!(director = %outcome.worker, "experiment results: {}", result);
        }
    }

    let summary = report.reduce(&Aggregation::lines())?;
    Ok(BlueprintRun {
        name,
        report,
        summary,
    })
}

/// One director per nodefile when any are configured, otherwise `workers`
/// directors of `slots` slots each
fn plan_directors(config: &BlueprintConfig) -> Result<Vec<Director>> {
    if config.nodefiles.is_empty() {
        info!(directors = config.workers, slots = config.slots, "starting directors");
        return Ok((0..config.workers).map(|_| Director::new(config.slots)).collect());
    }
    info!(directors = config.nodefiles.len(), "starting directors from nodefiles");
    config
        .nodefiles
        .iter()
        .map(|nodefile| Director::from_nodefile(nodefile, config.workers_per_node))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::FailurePolicy;

    fn config() -> BlueprintConfig {
        BlueprintConfig {
            workers: 2,
            rounds: 1_000,
            iterations: 3,
            slots: 2,
            duration_ms: 5,
            seed: Some(11),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_federated_pi() {
        let run = federated_pi(&config(), false).await.unwrap();
        assert_eq!(run.name, "pi");
        assert_eq!(run.report.len(), 1);
        let estimate = run.summary.as_number().unwrap();
        assert!((0.0..=4.0).contains(&estimate));
    }

    #[tokio::test]
    async fn test_federated_pi_is_seeded() {
        let a = federated_pi(&config(), false).await.unwrap();
        let b = federated_pi(&config(), false).await.unwrap();
        assert_eq!(a.summary, b.summary);
    }

    #[tokio::test]
    async fn test_spawning_pi() {
        let run = spawning_pi(&config()).await.unwrap();
        assert_eq!(run.name, "spawn-pi");
        assert!((0.0..=4.0).contains(&run.summary.as_number().unwrap()));
    }

    #[tokio::test]
    async fn test_spawning_matches_federated_for_same_seed() {
        let federated = federated_pi(&config(), false).await.unwrap();
        let spawning = spawning_pi(&config()).await.unwrap();
        assert_eq!(federated.summary, spawning.summary);
    }

    #[tokio::test]
    async fn test_hierarchical_md() {
        let run = hierarchical_md(&config()).await.unwrap();
        assert_eq!(run.report.len(), 2);

        for outcome in &run.report.outcomes {
            let log = outcome.result.as_ref().unwrap().as_text().unwrap().to_string();
            assert!(log.starts_with("SIMS \n"));
            // header line plus one line per iteration
            assert_eq!(log.lines().count(), 4);
        }
    }

    #[tokio::test]
    async fn test_minimal_md() {
        let run = minimal_md(&config()).await.unwrap();
        assert_eq!(run.report.len(), 2);
        assert_eq!(run.summary.as_text().unwrap().lines().count(), 2);
    }

    #[tokio::test]
    async fn test_directors_follow_nodefiles() {
        let dir = tempfile::tempdir().unwrap();
        let slices: Vec<_> = ["node_slice.00", "node_slice.01", "node_slice.02"]
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                std::fs::write(&path, "n0\nn1\n").unwrap();
                path
            })
            .collect();
        let config = BlueprintConfig {
            nodefiles: slices,
            workers_per_node: 3,
            ..config()
        };

        let directors = plan_directors(&config).unwrap();
        assert_eq!(directors.iter().map(Director::slots).collect::<Vec<_>>(), vec![6, 6, 6]);

        // three directors even though `workers` is 2
        let run = hierarchical_md(&config).await.unwrap();
        assert_eq!(run.report.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_nodefile_fails_before_dispatch() {
        let config = BlueprintConfig {
            nodefiles: vec!["/nonexistent/node_slice.00".into()],
            ..config()
        };
        let err = minimal_md(&config).await.unwrap_err();
        assert!(err.to_string().contains("nodefile"));
    }

    #[tokio::test]
    async fn test_zero_rounds_fails_fast() {
        let config = BlueprintConfig {
            rounds: 0,
            ..config()
        };
        let err = federated_pi(&config, false).await.unwrap_err();
        assert!(err.to_string().contains("batch aborted"));
    }

    #[tokio::test]
    async fn test_zero_rounds_collected() {
        let config = BlueprintConfig {
            rounds: 0,
            policy: FailurePolicy::CollectAll,
            ..config()
        };
        // the orchestrator's own batch fails, so the client sees one failed pair
        let err = federated_pi(&config, false).await.unwrap_err();
        assert!(err.to_string().contains("result #0 failed"));
    }
}
