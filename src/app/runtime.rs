use std::io::{self, IsTerminal};
use std::sync::atomic::Ordering;

use anyhow::Result;
use clap::Parser;
use ingest_core::RunSummary;
use ingest_core::pipeline::{Collaborators, ItemOutcome, Orchestrator, RunPlan};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ProcessExit;
use crate::app::{config_manager, exit_handler, progress_manager, terminal};
use crate::cli::Args;

pub(crate) async fn run_ingest() -> Result<ProcessExit> {
    let args = Args::parse();
    terminal::init_tracing(terminal::resolve_default_log_level(args.quiet, args.verbose));

    debug!(?args, "CLI arguments parsed");
    info!("basemap-ingest starting");

    let config = config_manager::resolve_pipeline(&args)?;
    let paths = config_manager::resolve_paths(&args);
    let collaborators = Collaborators::from_config(&config)?;
    let cancel = CancellationToken::new();
    let orchestrator = Orchestrator::new(config, paths, collaborators, cancel.clone())?;

    if args.dry_run {
        let plan = orchestrator.plan().await?;
        print_plan(&plan);
        return Ok(ProcessExit::Success);
    }

    let shutdown = ShutdownSignals::install();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if let Some(signal) = shutdown.recv().await {
            warn!(signal, "Shutdown requested; aborting in-flight items");
            signal_token.cancel();
        }
    });

    let use_spinner = terminal::should_use_spinner(
        io::stderr().is_terminal(),
        args.quiet,
        terminal::is_dumb_terminal(),
    );
    let (progress_handle, progress_stop) =
        progress_manager::spawn_progress_ui(use_spinner, orchestrator.stats());

    let result = orchestrator.run().await;

    progress_stop.store(true, Ordering::SeqCst);
    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }

    let summary = match result {
        Ok(summary) => summary,
        Err(e) if cancel.is_cancelled() => {
            warn!(error = %e, "Interrupted before any item started");
            return Ok(ProcessExit::Interrupted);
        }
        Err(e) => return Err(e.into()),
    };

    print_summary(&summary);
    if summary.interrupted {
        warn!(
            completed = summary.completed,
            total = summary.total,
            "Interrupted. Run again to resume."
        );
    }

    Ok(exit_handler::determine_exit_outcome(&summary))
}

/// Signals that stop a run: Ctrl-C everywhere, plus SIGTERM on unix so a
/// container stop takes the same path.
struct ShutdownSignals {
    #[cfg(unix)]
    terminate: Option<tokio::signal::unix::Signal>,
}

impl ShutdownSignals {
    /// Registers handlers before the run starts.
    #[cfg(unix)]
    fn install() -> Self {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(terminate) => Self {
                terminate: Some(terminate),
            },
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM; only Ctrl-C stops the run");
                Self { terminate: None }
            }
        }
    }

    #[cfg(not(unix))]
    fn install() -> Self {
        Self {}
    }

    /// Waits for the first shutdown signal and returns its name.
    #[cfg(unix)]
    async fn recv(self) -> Option<&'static str> {
        let Some(mut terminate) = self.terminate else {
            return tokio::signal::ctrl_c().await.ok().map(|()| "SIGINT");
        };
        tokio::select! {
            interrupt = tokio::signal::ctrl_c() => interrupt.ok().map(|()| "SIGINT"),
            _ = terminate.recv() => Some("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    async fn recv(self) -> Option<&'static str> {
        tokio::signal::ctrl_c().await.ok().map(|()| "SIGINT")
    }
}

fn print_plan(plan: &RunPlan) {
    for item in &plan.items {
        let marker = if item.complete { "done" } else { "todo" };
        println!(
            "[{marker}] {:>4}  {}  -> {}",
            item.index,
            item.id,
            item.final_artifact.display()
        );
    }
    println!(
        "{} items, {} pending, {} already complete",
        plan.items.len(),
        plan.pending(),
        plan.items.len() - plan.pending()
    );
}

fn print_summary(summary: &RunSummary) {
    for report in &summary.items {
        if let ItemOutcome::Failed { kind, reason, .. } = &report.outcome {
            println!("  failed #{} {} ({kind}): {reason}", report.index, report.id);
        }
    }
    println!(
        "{} items: {} completed, {} skipped, {} failed, {} not started",
        summary.total, summary.completed, summary.skipped, summary.failed, summary.not_started
    );
}
