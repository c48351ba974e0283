//! CLI binary for running and validating Trellis timelines.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use trellis_engine::{
    load_description_file, validate, validate_or_raise, EngineConfig, Environment, Severity,
    SimulatedExecutor, TimelineDescription, TimelineEvent, TimelineNode,
};
use trellis_types::NodeStatus;

#[derive(Parser)]
#[command(name = "trellis", version, about = "Runner for declarative experiment timelines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a timeline from a JSON file with simulated trials
    Run {
        /// Path to the timeline .json file
        timeline: PathBuf,

        /// Seed for sampling and randomized ordering
        #[arg(long)]
        seed: Option<u64>,

        /// Print lifecycle events as they happen
        #[arg(long)]
        events: bool,
    },

    /// Print the naive trial count of a timeline
    Count {
        /// Path to the timeline .json file
        timeline: PathBuf,
    },

    /// Validate a timeline JSON file
    Validate {
        /// Path to the timeline .json file
        timeline: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            timeline,
            seed,
            events,
        } => {
            cmd_run(&timeline, seed, events).await?;
        }
        Commands::Count { timeline } => {
            cmd_count(&timeline)?;
        }
        Commands::Validate { timeline } => {
            cmd_validate(&timeline)?;
        }
    }

    Ok(())
}

fn load_timeline(path: &Path) -> anyhow::Result<TimelineDescription> {
    Ok(load_description_file(path)?)
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let description = load_timeline(path)?;
    let diagnostics = validate(&description);

    if diagnostics.is_empty() {
        println!("Timeline is valid");
        return Ok(());
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        println!("[{}] {} at {}: {}", severity, diag.rule, diag.path, diag.message);
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_count(path: &Path) -> anyhow::Result<()> {
    let description = load_timeline(path)?;
    println!("{}", trellis_engine::naive_trial_count(&description));
    Ok(())
}

async fn cmd_run(path: &Path, seed: Option<u64>, print_events: bool) -> anyhow::Result<()> {
    let description = load_timeline(path)?;
    validate_or_raise(&description)?;

    let config = EngineConfig {
        seed,
        ..EngineConfig::default()
    };
    let env = Environment::from_config(Arc::new(SimulatedExecutor), &config);
    if print_events {
        let mut rx = env.events().subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                print_event(&event);
            }
        });
    }

    let root = TimelineNode::new(description, env);
    tracing::info!(
        timeline = %path.display(),
        estimated_trials = root.naive_trial_count(),
        "Running timeline"
    );

    let mut run = tokio::spawn(root.clone().run());
    tokio::select! {
        outcome = &mut run => outcome??,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted; aborting after the current trial");
            root.abort();
            // The run task settles once the in-flight trial does.
            run.await??;
        }
    }

    println!("{}", serde_json::to_string_pretty(&root.results())?);
    println!("Status: {}", root.status());
    println!("Progress: {:.0}%", root.progress() * 100.0);

    if root.status() == NodeStatus::Aborted {
        std::process::exit(130);
    }
    Ok(())
}

fn print_event(event: &TimelineEvent) {
    match serde_json::to_string(event) {
        Ok(line) => eprintln!("{line}"),
        Err(err) => tracing::warn!(error = %err, "Could not serialize event"),
    }
}
