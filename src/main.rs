//! Thin CLI wrapper over the `coordination` library — exercises C1–C9 end
//! to end without requiring a real LLM-backed agent. Subcommands mirror the
//! three driven subsystems: routing, refinement, and auto-debug.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use coordination::config::Config;
use coordination::routing::{OrchestrationState, RoutingPlanner};
use coordination::verifier::QualityGateVerifier;
use coordination::{autodebug, refinement::RefinementLoopController, Phase};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "coordinator", about = "Multi-agent workflow orchestrator CLI")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Root directory for persisted state (overrides COORD_STATE_ROOT).
    #[arg(long, global = true)]
    state_root: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Produce a routing decision for a task description and domain list.
    Route {
        /// Free-text task description.
        description: String,
        /// Comma-separated domain list, e.g. "frontend,backend,database".
        #[arg(long, value_delimiter = ',')]
        domains: Vec<String>,
    },
    /// Drive the refinement loop against a local artifact using the
    /// built-in reference verifier.
    Refine {
        artifact_path: PathBuf,
        #[arg(long, value_enum, default_value = "implementation")]
        phase: CliPhase,
        #[arg(long, default_value = "code")]
        artifact_type: String,
        /// Spec file checked for alignment; read fresh on every iteration.
        #[arg(long)]
        spec_path: Option<PathBuf>,
    },
    /// Run an auto-debug session against a captured stack trace.
    Debug {
        code_path: PathBuf,
        stack_trace_path: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliPhase {
    Specification,
    Planning,
    Implementation,
    Validation,
}

impl From<CliPhase> for Phase {
    fn from(value: CliPhase) -> Self {
        match value {
            CliPhase::Specification => Phase::Specification,
            CliPhase::Planning => Phase::Planning,
            CliPhase::Implementation => Phase::Implementation,
            CliPhase::Validation => Phase::Validation,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::from_env();
    let state_root = args.state_root.unwrap_or_else(|| config.state_root.clone());

    match args.command {
        Command::Route { description, domains } => {
            let planner = RoutingPlanner::new(state_root.join("routing").join("decisions"));
            let task_id = Uuid::new_v4();
            let decision = planner.plan(task_id, &description, &domains, &OrchestrationState::default())?;
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        Command::Refine {
            artifact_path,
            phase,
            artifact_type,
            spec_path,
        } => {
            let verifier: Arc<dyn coordination::Agent> = Arc::new(QualityGateVerifier::new(config.clone()));
            let controller = RefinementLoopController::new(config, state_root.join("refinement-state"));
            let task_id = Uuid::new_v4();
            let context = spec_path.map(|path| {
                coordination::Context::new().with_spec_path(path.to_string_lossy().into_owned())
            });
            let outcome = controller
                .run(task_id, phase.into(), &artifact_path, &artifact_type, verifier, context, None, None)
                .await?;
            println!("task {task_id}: ema_quality={:.3}", outcome.state().ema_quality);
        }
        Command::Debug { code_path, stack_trace_path } => {
            let code = std::fs::read_to_string(&code_path)?;
            let stack_trace = std::fs::read_to_string(&stack_trace_path)?;
            let session = autodebug::debug(Uuid::new_v4(), &code, &stack_trace, None, None)?;
            println!("{}", serde_json::to_string_pretty(&session)?);
        }
    }

    Ok(())
}
