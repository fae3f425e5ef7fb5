//! Progress UI (spinner) for ingest runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use ingest_core::pipeline::RunStats;

/// Spawns the progress UI (spinner) when requested.
/// Returns (handle, stop) so the caller can signal stop and await the handle.
/// When `use_spinner` is false, returns (None, stop) with stop already true.
pub(crate) fn spawn_progress_ui(
    use_spinner: bool,
    stats: Arc<RunStats>,
) -> (Option<tokio::task::JoinHandle<()>>, Arc<AtomicBool>) {
    if !use_spinner {
        return (None, Arc::new(AtomicBool::new(true)));
    }
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_spinner_inner(stats, Arc::clone(&stop));
    (Some(handle), stop)
}

fn spawn_spinner_inner(stats: Arc<RunStats>, stop: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));

        while !stop.load(Ordering::SeqCst) {
            spinner.set_message(status_line(&stats));
            tokio::time::sleep(Duration::from_millis(120)).await;
        }

        spinner.finish_and_clear();
    })
}

fn status_line(stats: &RunStats) -> String {
    let total = stats.total();
    if total == 0 {
        return "Enumerating items...".to_string();
    }
    format!(
        "[{}/{}] {} downloading, {} failed",
        stats.done().min(total),
        total,
        stats.downloads_active(),
        stats.failed()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line_before_enumeration() {
        assert_eq!(status_line(&RunStats::new()), "Enumerating items...");
    }

    #[tokio::test]
    async fn test_spawn_progress_ui_when_disabled_returns_none_handle() {
        let (handle, stop) = spawn_progress_ui(false, Arc::new(RunStats::new()));

        assert!(handle.is_none());
        assert!(
            stop.load(Ordering::SeqCst),
            "stop signal should be true when spinner disabled"
        );
    }

    #[tokio::test]
    async fn test_spawn_progress_ui_stop_ends_task() {
        let (handle, stop) = spawn_progress_ui(true, Arc::new(RunStats::new()));
        assert!(handle.is_some());

        stop.store(true, Ordering::SeqCst);
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
