use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use step_engine::prelude::*;
use step_engine::queue::{self, JobHandle};
use step_engine::RerunError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "step-engine")]
#[command(about = "Run dependency-aware test step plans", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a plan file
    Run {
        /// Path to the plan YAML or JSON file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Path to an engine config YAML file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Maximum number of concurrently executing steps (overrides config)
        #[arg(short, long)]
        parallel: Option<usize>,

        /// Only abort the run when a blocking step fails (overrides config)
        #[arg(long)]
        respect_blocking: bool,

        /// Re-run failed steps and their dependents once if the run fails
        #[arg(long)]
        rerun_failed: bool,
    },

    /// Validate a plan file without running it
    Validate {
        /// Path to the plan YAML or JSON file
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// List built-in step executors
    Executors,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        "step_engine=debug"
    } else {
        "step_engine=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Commands::Run {
            file,
            config,
            parallel,
            respect_blocking,
            rerun_failed,
        } => {
            let mut config = match config {
                Some(path) => EngineConfig::load(path)?,
                None => EngineConfig::default(),
            };
            if let Some(parallel) = parallel {
                config = config.with_max_concurrent_steps(parallel);
            }
            if respect_blocking {
                config = config.with_failure_policy(FailurePolicy::RespectBlocking);
            }
            run_plan(&file, config, rerun_failed).await
        }
        Commands::Validate { file } => validate(&file),
        Commands::Executors => {
            for name in StepExecutorRegistry::with_builtins().names() {
                println!("{}", name);
            }
            Ok(true)
        }
    }
}

async fn run_plan(file: &Path, config: EngineConfig, rerun_failed: bool) -> anyhow::Result<bool> {
    let plan = PlanLoader::load_file(file)?;
    println!("Running plan: {} ({} steps)\n", file.display(), plan.len());

    let store = Arc::new(MemoryStore::new());
    let steps = Arc::new(MemoryStepSource::new(store.clone()));
    steps.add_plan(&plan).await;

    let engine = ExecutionEngine::new(
        Arc::new(StepExecutorRegistry::with_builtins()),
        store.clone(),
        config.clone(),
    );

    let handle = engine.submit(plan.clone()).await?;
    let token = handle.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling execution");
            token.cancel();
        }
    });

    let result = handle.wait().await?;
    print_result(&plan, &result);

    if result.is_success() || !rerun_failed || result.cancelled {
        return Ok(result.is_success());
    }

    let (job_queue, worker) = queue::from_config(&config.queue, engine);
    let resolver = RerunResolver::new(store, steps, job_queue);
    let rerun = match resolver.rerun_failed(result.execution_id).await {
        Ok(rerun) => rerun,
        Err(RerunError::NothingToRerun(_)) => {
            println!("\nNo failed step records to re-run");
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    };
    println!("\nRe-running failed steps as {}\n", rerun.execution_id);

    let rerun_result = match (rerun.handle, worker) {
        (JobHandle::Detached(_), Some(worker)) => worker
            .run_next()
            .await?
            .ok_or_else(|| anyhow::anyhow!("rerun plan was not delivered to the worker"))?,
        (handle, _) => handle.wait().await?,
    };
    print_result(&plan, &rerun_result);

    Ok(rerun_result.is_success())
}

fn validate(file: &Path) -> anyhow::Result<bool> {
    let plan = PlanLoader::load_file(file)?;
    let levels = plan.execution_levels();

    println!(
        "✓ {} is valid: {} steps, {} execution levels",
        file.display(),
        plan.len(),
        levels.len()
    );
    for (i, level) in levels.iter().enumerate() {
        println!("  Level {}: [{}]", i, level.join(", "));
    }

    Ok(true)
}

fn print_result(plan: &Plan, result: &ExecutionResult) {
    println!("=== Execution Result ===\n");
    println!("Status: {}", result.status);
    println!("Execution ID: {}", result.execution_id);
    if result.cancelled {
        println!("Cancelled: YES");
    }
    println!();

    for step in plan.steps() {
        match result.step_results.get(&step.id) {
            Some(r) if r.success => println!("  ✓ {}", step.id),
            Some(r) => {
                println!("  ✗ {}", step.id);
                if let Some(err) = &r.error {
                    println!("      Error: {}", err);
                }
            }
            None => println!("  - {} (not run)", step.id),
        }
    }
}
