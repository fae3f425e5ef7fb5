use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::StageSpec;
use super::result::StageResult;
use super::template::{StageContext, render};

/// Executes one stage for one item.
///
/// A runner reports; it never retries. Re-running a failed stage is the
/// orchestrator's decision.
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Runs `stage` with arguments rendered from `context`.
    async fn run(
        &self,
        stage: &StageSpec,
        context: &StageContext,
        cancel: &CancellationToken,
    ) -> StageResult;
}

/// Runs stages as child processes.
///
/// The program is spawned directly (no shell). Standard error is captured as
/// the diagnostic text, falling back to standard output when stderr is empty.
/// The child is killed if the run is cancelled.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandStageRunner;

impl CommandStageRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StageRunner for CommandStageRunner {
    #[instrument(skip_all, fields(stage = %stage.name, index = context.index))]
    async fn run(
        &self,
        stage: &StageSpec,
        context: &StageContext,
        cancel: &CancellationToken,
    ) -> StageResult {
        let started = Instant::now();

        let args = match stage
            .args
            .iter()
            .map(|arg| render(arg, context))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(args) => args,
            Err(e) => {
                warn!(error = %e, "stage arguments could not be rendered");
                return StageResult::failed(&stage.name, None, &e.to_string(), started.elapsed());
            }
        };

        debug!(program = %stage.program, ?args, "running stage");

        let child = Command::new(&stage.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                let message = format!("failed to start `{}`: {e}", stage.program);
                warn!(error = %e, program = %stage.program, "stage could not be started");
                return StageResult::failed(&stage.name, None, &message, started.elapsed());
            }
        };

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            () = cancel.cancelled() => {
                warn!("stage cancelled; child process killed");
                return StageResult::cancelled(&stage.name, started.elapsed());
            }
            output = child.wait_with_output() => output,
        };

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                let message = format!("failed waiting for `{}`: {e}", stage.program);
                return StageResult::failed(&stage.name, None, &message, started.elapsed());
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        let diagnostics = if stderr.trim().is_empty() {
            String::from_utf8_lossy(&output.stdout).into_owned()
        } else {
            stderr.into_owned()
        };
        let elapsed = started.elapsed();

        match output.status.code() {
            Some(code) if code == stage.required_exit_code => {
                debug!(
                    exit_code = code,
                    elapsed_ms = elapsed.as_millis(),
                    diagnostics = %diagnostics.trim(),
                    "stage succeeded"
                );
                StageResult::succeeded(&stage.name, code, &diagnostics, context.output.clone(), elapsed)
            }
            code => {
                warn!(
                    exit_code = ?code,
                    required = stage.required_exit_code,
                    stderr = %diagnostics.trim(),
                    "stage failed"
                );
                StageResult::failed(&stage.name, code, &diagnostics, elapsed)
            }
        }
    }
}
