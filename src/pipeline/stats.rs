//! Run counters and the final summary.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::item::{ItemOutcome, ItemReport};

/// Live counters for one run.
///
/// Updated by workers as items finish; readable at any time (the progress
/// spinner polls them).
#[derive(Debug, Default)]
pub struct RunStats {
    total: AtomicUsize,
    completed: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    interrupted: AtomicUsize,
    downloads_active: AtomicUsize,
}

impl RunStats {
    /// Creates a tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Items in the work list.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Items processed and recorded complete in this run.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Items already complete before the run.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Items that failed (including interrupted ones).
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Items aborted by shutdown.
    #[must_use]
    pub fn interrupted(&self) -> usize {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Items that reached a terminal state.
    #[must_use]
    pub fn done(&self) -> usize {
        self.completed() + self.skipped() + self.failed()
    }

    /// Transfers currently holding a download slot.
    #[must_use]
    pub fn downloads_active(&self) -> usize {
        self.downloads_active.load(Ordering::SeqCst)
    }

    pub(crate) fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
    }

    pub(crate) fn record(&self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Skipped => self.skipped.fetch_add(1, Ordering::SeqCst),
            ItemOutcome::Completed { .. } => self.completed.fetch_add(1, Ordering::SeqCst),
            ItemOutcome::Failed { kind, .. } => {
                if *kind == super::ItemFailure::Interrupted {
                    self.interrupted.fetch_add(1, Ordering::SeqCst);
                }
                self.failed.fetch_add(1, Ordering::SeqCst)
            }
        };
    }

    pub(crate) fn download_started(&self) {
        self.downloads_active.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn download_finished(&self) {
        self.downloads_active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Aggregate over one finished run. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Items in the work list.
    pub total: usize,
    /// Processed and recorded complete in this run.
    pub completed: usize,
    /// Already complete before the run.
    pub skipped: usize,
    /// Failed, including interrupted items.
    pub failed: usize,
    /// Never started because shutdown was requested first.
    pub not_started: usize,
    /// Shutdown was requested during the run.
    pub interrupted: bool,
    /// Per-item reports, ordered by index.
    pub items: Vec<ItemReport>,
}

impl RunSummary {
    /// Builds a summary from per-item reports.
    #[must_use]
    pub fn from_reports(total: usize, mut items: Vec<ItemReport>, interrupted: bool) -> Self {
        items.sort_by_key(|report| report.index);
        let count = |pred: fn(&ItemOutcome) -> bool| items.iter().filter(|r| pred(&r.outcome)).count();
        let completed = count(|o| matches!(o, ItemOutcome::Completed { .. }));
        let skipped = count(|o| matches!(o, ItemOutcome::Skipped));
        let failed = count(|o| matches!(o, ItemOutcome::Failed { .. }));
        Self {
            total,
            completed,
            skipped,
            failed,
            not_started: total.saturating_sub(items.len()),
            interrupted,
            items,
        }
    }

    /// Report for item `id`, if it was reached.
    #[must_use]
    pub fn item(&self, id: &str) -> Option<&ItemReport> {
        self.items.iter().find(|report| report.id == id)
    }
}
