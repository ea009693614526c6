//! Built-in tools a local execution slot can run.

use std::process::Stdio;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::process::Command;

use crate::error::WorkError;
use crate::task::{Action, Output};

/// Fraction of uniform points in [-1, 1]² landing inside the unit circle, times 4
pub fn estimate_pi<R: Rng>(rounds: u64, rng: &mut R) -> f64 {
    let mut inside = 0u64;
    for _ in 0..rounds {
        let x: f64 = rng.random_range(-1.0..=1.0);
        let y: f64 = rng.random_range(-1.0..=1.0);
        if x * x + y * y <= 1.0 {
            inside += 1;
        }
    }
    4.0 * (inside as f64 / rounds as f64)
}

/// Seeded when `seed` is given, otherwise drawn from OS entropy
pub fn simulate_pi(rounds: u64, seed: Option<u64>) -> Result<f64, WorkError> {
    if rounds == 0 {
        return Err(WorkError::execution("simulate_pi: rounds must be positive"));
    }
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    Ok(estimate_pi(rounds, &mut rng))
}

/// Name of the node this process runs on
pub fn node_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".into())
}

/// Mock MD tool: occupy the slot for `duration`, then report where it ran
pub async fn md_sim(duration: Duration) -> String {
    tokio::time::sleep(duration).await;
    node_name()
}

pub async fn run_command(program: &str, args: &[String]) -> Result<String, WorkError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| WorkError::execution(format!("failed to start {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WorkError::execution(format!(
            "{} exited with {:?}: {}",
            program,
            output.status.code(),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run one slot-level action. Agent-level actions are rejected.
pub async fn run(action: &Action, worker: &str) -> Result<Output, WorkError> {
    match action {
        Action::SimulatePi { rounds, seed } => {
            let (rounds, seed) = (*rounds, *seed);
            tokio::task::spawn_blocking(move || simulate_pi(rounds, seed))
                .await
                .map_err(|e| WorkError::execution(format!("simulate_pi panicked: {}", e)))?
                .map(Output::Number)
        }
        Action::MdSim { duration_ms } => {
            Ok(Output::Text(md_sim(Duration::from_millis(*duration_ms)).await))
        }
        Action::Command { program, args } => run_command(program, args).await.map(Output::Text),
        Action::Echo { message, delay_ms } => {
            tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
            Ok(Output::Text(message.clone()))
        }
        Action::MdSimBatch { .. } | Action::Process => {
            Err(WorkError::unsupported(worker, action.name()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_within_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        for rounds in [1, 10, 100, 1_000] {
            let estimate = estimate_pi(rounds, &mut rng);
            assert!((0.0..=4.0).contains(&estimate));
        }
    }

    #[test]
    fn test_seeded_simulation_is_repeatable() {
        assert_eq!(simulate_pi(500, Some(3)), simulate_pi(500, Some(3)));
    }

    #[test]
    fn test_zero_rounds_rejected() {
        assert!(matches!(simulate_pi(0, Some(1)), Err(WorkError::Execution { .. })));
    }

    #[test]
    fn test_node_name_not_empty() {
        assert!(!node_name().is_empty());
    }

    #[tokio::test]
    async fn test_run_command_trims_stdout() {
        let out = run_command("echo", &["  node-7  ".to_string()]).await.unwrap();
        assert_eq!(out, "node-7");
    }

    #[tokio::test]
    async fn test_run_command_failure() {
        let err = run_command("sh", &["-c".into(), "echo nope >&2; exit 3".into()])
            .await
            .unwrap_err();
        let WorkError::Execution { reason } = err else {
            panic!("expected execution error");
        };
        assert!(reason.contains("Some(3)"));
        assert!(reason.contains("nope"));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = run_command("definitely-not-a-real-binary-7f3a", &[]).await.unwrap_err();
        assert!(matches!(err, WorkError::Execution { .. }));
    }

    #[tokio::test]
    async fn test_agent_actions_unsupported() {
        let err = run(&Action::Process, "slot-0").await.unwrap_err();
        assert_eq!(err, WorkError::unsupported("slot-0", "process"));
    }
}
