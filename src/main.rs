//! Ghostflow CLI entry point

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ghostflow::core::{Dispatcher, Scheduler, StepRef, Workflow, WorkflowRunResult};
use ghostflow::lint::{has_errors, lint};
use ghostflow::prompt::TerminalPrompt;
use ghostflow::report::{render_lint, render_preview, Reporter};
use ghostflow::snapshot::{select, RerunMode, RunSnapshot};
use ghostflow::ExecConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "ghostflow", version, about = "Run YAML shell workflows under resource limits")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Preview, then run a workflow
    Run {
        file: PathBuf,
        /// Start at this step (name or 1-based index)
        #[arg(long, value_parser = parse_step_ref)]
        from: Option<StepRef>,
        /// Preview and lint only
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the step table
    Preview { file: PathBuf },
    /// Static checks; exits 1 on any error
    Lint { file: PathBuf },
    /// Run again from the last-run snapshot
    Rerun {
        #[command(subcommand)]
        mode: RerunCommand,
        /// Workflow file (defaults to the one recorded in the snapshot)
        #[arg(long, global = true)]
        file: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
enum RerunCommand {
    /// Steps that failed last time
    Failed {
        /// Also soft-failed steps
        #[arg(long)]
        include_soft: bool,
    },
    /// Steps whose definition changed since last time
    Changed {
        /// Also their transitive needs
        #[arg(long)]
        with_deps: bool,
    },
    /// Everything from this step on
    From {
        #[arg(value_parser = parse_step_ref)]
        step: StepRef,
    },
}

fn parse_step_ref(s: &str) -> Result<StepRef, String> {
    s.parse().map_err(|e: std::convert::Infallible| match e {})
}

fn load(path: &Path) -> Result<Workflow> {
    Workflow::from_file(path).with_context(|| format!("cannot load workflow {}", path.display()))
}

fn snapshot_path() -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("cannot determine current directory")?;
    Ok(RunSnapshot::path_in(&cwd))
}

/// Run `workflow`, stream events to the console and save the snapshot
async fn execute(full: &Workflow, workflow: &Workflow) -> Result<WorkflowRunResult> {
    let config = Arc::new(ExecConfig::from_env()?);
    let dispatcher = Arc::new(Dispatcher::new(config, Arc::new(TerminalPrompt)));
    let (scheduler, mut events) = Scheduler::with_events(dispatcher);

    let printer = tokio::spawn(async move {
        let reporter = Reporter::new();
        while let Some(event) = events.recv().await {
            reporter.event(&event);
        }
    });

    let run = scheduler.run(workflow).await;
    drop(scheduler);
    if let Err(e) = printer.await {
        log::warn!("event printer stopped: {}", e);
    }

    Reporter::new().summary(&run);

    let path = snapshot_path()?;
    if let Err(e) = RunSnapshot::from_run(full, &run).save(&path) {
        log::warn!("could not save run snapshot: {:#}", e);
    }
    Ok(run)
}

async fn run_command(command: Command) -> Result<bool> {
    match command {
        Command::Run {
            file,
            from,
            dry_run,
        } => {
            let full = load(&file)?;
            let workflow = match &from {
                Some(step) => full.starting_at(step)?,
                None => full.clone(),
            };
            print!("{}", render_preview(&workflow));
            if dry_run {
                let issues = lint(&full);
                print!("{}", render_lint(&issues));
                return Ok(!has_errors(&issues));
            }
            Ok(execute(&full, &workflow).await?.ok())
        }
        Command::Preview { file } => {
            print!("{}", render_preview(&load(&file)?));
            Ok(true)
        }
        Command::Lint { file } => {
            let issues = lint(&load(&file)?);
            print!("{}", render_lint(&issues));
            Ok(!has_errors(&issues))
        }
        Command::Rerun { mode, file } => {
            let snapshot = RunSnapshot::load(&snapshot_path()?)?;
            let file = match file.or_else(|| snapshot.file_path.clone()) {
                Some(file) => file,
                None => bail!("the last run recorded no workflow file; pass --file"),
            };
            let full = load(&file)?;
            if snapshot.is_stale(&full) {
                log::warn!(
                    "{} changed since run {}; selection uses the current file",
                    file.display(),
                    snapshot.run_id
                );
            }

            let mode = match mode {
                RerunCommand::Failed { include_soft } => RerunMode::Failed { include_soft },
                RerunCommand::Changed { with_deps } => RerunMode::Changed { with_deps },
                RerunCommand::From { step } => RerunMode::From(step),
            };
            let plan = select(&full, &snapshot, &mode)?;
            if plan.is_empty() {
                println!("nothing to rerun");
                return Ok(true);
            }
            for (step, reason) in &plan.reasons {
                println!("  {} ({})", step, reason);
            }
            print!("{}", render_preview(&plan.workflow));
            Ok(execute(&full, &plan.workflow).await?.ok())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    log::debug!("ghostflow v{}", env!("CARGO_PKG_VERSION"));

    if !run_command(cli.command).await? {
        std::process::exit(1);
    }
    Ok(())
}
