use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::{info, Level};

use blueprints::blueprint::{self, BlueprintRun};
use blueprints::config::BlueprintConfig;
use blueprints::dispatch::FailurePolicy;
use blueprints::task::{BatchRecord, ReportStore};

/// Hierarchical agent + executor blueprints for simulation workloads
#[derive(Debug, Parser)]
#[command(name = "blueprint", version, about)]
struct Cli {
    /// Directory holding config.json (default: ./.blueprints, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Orchestrator averages pi estimates from N simulators
    Pi {
        #[command(flatten)]
        dispatch: DispatchArgs,
        /// Random points per estimate
        #[arg(long)]
        rounds: Option<u64>,
        /// Run simulators as child-process endpoints instead of agents
        #[arg(long)]
        remote: bool,
    },
    /// Orchestrator launches its own simulators, then averages their estimates
    SpawnPi {
        #[command(flatten)]
        dispatch: DispatchArgs,
        #[arg(long)]
        rounds: Option<u64>,
    },
    /// Directors each run a batch of mock MD simulations over local slots
    MdSim {
        #[command(flatten)]
        dispatch: DispatchArgs,
        /// md_sim calls per director
        #[arg(long)]
        iterations: Option<usize>,
        /// Local execution slots per director
        #[arg(long)]
        slots: Option<usize>,
        #[command(flatten)]
        nodes: NodeArgs,
        #[arg(long)]
        duration_ms: Option<u64>,
    },
    /// Directors each run a single mock MD simulation
    Minimal {
        #[command(flatten)]
        dispatch: DispatchArgs,
        #[arg(long)]
        slots: Option<usize>,
        #[command(flatten)]
        nodes: NodeArgs,
        #[arg(long)]
        duration_ms: Option<u64>,
    },
    /// Endpoint side: read one work item from stdin, write the reply to stdout
    #[command(hide = true)]
    Exec,
}

/// Overrides shared by every blueprint
#[derive(Debug, Default, Args)]
struct DispatchArgs {
    /// Top-level workers (simulators or directors)
    #[arg(short = 'n', long)]
    workers: Option<usize>,
    #[arg(long, value_enum)]
    policy: Option<FailurePolicy>,
    /// Per-item timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Extra attempts for failed or timed-out items
    #[arg(long)]
    retries: Option<u32>,
    #[arg(long)]
    seed: Option<u64>,
    /// Write a JSON record of the batch here
    #[arg(long)]
    run_dir: Option<PathBuf>,
}

impl DispatchArgs {
    fn apply(&self, config: &mut BlueprintConfig) {
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(policy) = self.policy {
            config.policy = policy;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.item_timeout_ms = Some(timeout_ms);
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if let Some(run_dir) = &self.run_dir {
            config.run_dir = Some(run_dir.clone());
        }
    }
}

/// Director sizing from node lists
#[derive(Debug, Default, Args)]
struct NodeArgs {
    /// Node list for one director (repeat for more); overrides -n and --slots
    #[arg(long = "nodefile")]
    nodefiles: Vec<PathBuf>,
    #[arg(long)]
    workers_per_node: Option<usize>,
}

impl NodeArgs {
    fn apply(&self, config: &mut BlueprintConfig) {
        if !self.nodefiles.is_empty() {
            config.nodefiles = self.nodefiles.clone();
        }
        if let Some(workers_per_node) = self.workers_per_node {
            config.workers_per_node = workers_per_node;
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool, default: Level) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => default,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Merge CLI overrides into the loaded config
fn resolve(command: &Command, mut config: BlueprintConfig) -> BlueprintConfig {
    match command {
        Command::Pi {
            dispatch, rounds, ..
        }
        | Command::SpawnPi { dispatch, rounds } => {
            dispatch.apply(&mut config);
            if let Some(rounds) = rounds {
                config.rounds = *rounds;
            }
        }
        Command::MdSim {
            dispatch,
            iterations,
            slots,
            nodes,
            duration_ms,
        } => {
            dispatch.apply(&mut config);
            nodes.apply(&mut config);
            if let Some(iterations) = iterations {
                config.iterations = *iterations;
            }
            if let Some(slots) = slots {
                config.slots = *slots;
            }
            if let Some(duration_ms) = duration_ms {
                config.duration_ms = *duration_ms;
            }
        }
        Command::Minimal {
            dispatch,
            slots,
            nodes,
            duration_ms,
        } => {
            dispatch.apply(&mut config);
            nodes.apply(&mut config);
            if let Some(slots) = slots {
                config.slots = *slots;
            }
            if let Some(duration_ms) = duration_ms {
                config.duration_ms = *duration_ms;
            }
        }
        Command::Exec => {}
    }
    config
}

fn save_record(config: &BlueprintConfig, run: &BlueprintRun) -> anyhow::Result<()> {
    let Some(run_dir) = &config.run_dir else {
        return Ok(());
    };
    let store = ReportStore::new(run_dir)?;
    let record = BatchRecord::new(run.name, run.report.clone(), Some(run.summary.clone()));
    let path = store.save(&record)?;
    info!(path = %path.display(), "batch record saved");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::Exec = cli.command {
        // stdout carries the reply, keep the child quiet
        init_tracing(cli.verbose, cli.quiet, Level::WARN);
        return blueprints::agent::serve_stdin().await;
    }
    init_tracing(cli.verbose, cli.quiet, Level::INFO);

    let config_dir = cli.config.clone().unwrap_or_else(BlueprintConfig::default_dir);
    let config = resolve(&cli.command, BlueprintConfig::load(&config_dir)?);
    info!(config_dir = %config_dir.display(), ?config, "configuration loaded");

    let run = match &cli.command {
        Command::Pi { remote, .. } => blueprint::federated_pi(&config, *remote).await?,
        Command::SpawnPi { .. } => blueprint::spawning_pi(&config).await?,
        Command::MdSim { .. } => blueprint::hierarchical_md(&config).await?,
        Command::Minimal { .. } => blueprint::minimal_md(&config).await?,
        Command::Exec => return Ok(()),
    };

    save_record(&config, &run)?;
    println!("{}", run.summary);
    Ok(())
}
