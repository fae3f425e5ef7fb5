//! Drives every item through resolve, download, and transform.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::error::PipelineError;
use super::item::{Item, ItemDirs, ItemFailure, ItemOutcome, ItemReport, ItemState};
use super::stats::{RunStats, RunSummary};
use crate::catalog::{Catalog, ManifestCatalog, StacCatalog, dedup_assets};
use crate::config::{BestEffortPolicy, CatalogConfig, PipelineConfig, SignerConfig};
use crate::download::{ConcurrencyGate, Fetcher, HttpDownloader};
use crate::progress::{DEFAULT_PROGRESS_FILE, ProgressStore};
use crate::retry::{FailureType, retry_with_backoff};
use crate::signer::{PassthroughSigner, SasTokenSigner, SignError, UrlSigner};
use crate::stage::{CommandStageRunner, StageContext, StageResult, StageRunner, StageSpec, render};
use crate::staging::ItemWorkspace;

/// Name of the staging directory created under the output directory by default.
pub const DEFAULT_STAGING_DIR: &str = "staging";

/// Filesystem locations used by one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    /// Where final artifacts land.
    pub output_dir: PathBuf,
    /// Where downloads and intermediates live while an item is in flight.
    pub staging_dir: PathBuf,
    /// The durable completion record.
    pub progress_file: PathBuf,
}

impl RunPaths {
    /// Default layout rooted at `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        Self {
            staging_dir: output_dir.join(DEFAULT_STAGING_DIR),
            progress_file: output_dir.join(DEFAULT_PROGRESS_FILE),
            output_dir,
        }
    }

    /// Overrides the staging directory.
    #[must_use]
    pub fn with_staging_dir(mut self, staging_dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = staging_dir.into();
        self
    }

    /// Overrides the progress record location.
    #[must_use]
    pub fn with_progress_file(mut self, progress_file: impl Into<PathBuf>) -> Self {
        self.progress_file = progress_file.into();
        self
    }

    fn item_dirs(&self) -> ItemDirs<'_> {
        ItemDirs {
            staging_dir: &self.staging_dir,
            output_dir: &self.output_dir,
        }
    }
}

/// The pluggable parts of a run.
#[derive(Clone)]
pub struct Collaborators {
    /// Source of the work list.
    pub catalog: Arc<dyn Catalog>,
    /// URL authorization.
    pub signer: Arc<dyn UrlSigner>,
    /// Asset transfer.
    pub fetcher: Arc<dyn Fetcher>,
    /// Stage execution.
    pub runner: Arc<dyn StageRunner>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("catalog", &self.catalog.name())
            .field("signer", &self.signer.name())
            .finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Builds the production collaborators described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Setup`] when an HTTP client cannot be built.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let catalog: Arc<dyn Catalog> = match &config.catalog {
            CatalogConfig::Stac(search) => Arc::new(StacCatalog::new(search.clone()).map_err(
                |e| PipelineError::Setup {
                    component: "catalog",
                    reason: e.to_string(),
                },
            )?),
            CatalogConfig::Manifest { path } => Arc::new(ManifestCatalog::new(path.clone())),
        };

        let signer: Arc<dyn UrlSigner> = match &config.signer {
            SignerConfig::None => Arc::new(PassthroughSigner),
            SignerConfig::SasToken { endpoint } => Arc::new(
                SasTokenSigner::new(endpoint.clone()).map_err(|e| PipelineError::Setup {
                    component: "signer",
                    reason: e.to_string(),
                })?,
            ),
        };

        let fetcher = HttpDownloader::new(config.download.options()).map_err(|e| {
            PipelineError::Setup {
                component: "downloader",
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            catalog,
            signer,
            fetcher: Arc::new(fetcher),
            runner: Arc::new(CommandStageRunner::new()),
        })
    }
}

/// One entry of a dry-run plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedItem {
    /// 1-based position in the work list.
    pub index: usize,
    /// Item identifier.
    pub id: String,
    /// Raw asset URL.
    pub source_href: String,
    /// Where the final artifact would land.
    pub final_artifact: PathBuf,
    /// Already recorded complete.
    pub complete: bool,
}

/// What a run would do, without doing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    /// Every enumerated item, in work-list order.
    pub items: Vec<PlannedItem>,
}

impl RunPlan {
    /// Items a run would process.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.items.iter().filter(|item| !item.complete).count()
    }
}

/// Runs the batch.
///
/// Items are processed by a fixed set of workers. Transfers are bounded by the
/// download gate and transform chains by the transform gate, so the number of
/// workers only decides how far the next item can get while others wait.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: PipelineConfig,
    paths: RunPaths,
    collaborators: Collaborators,
    download_gate: ConcurrencyGate,
    transform_gate: ConcurrencyGate,
    cancel: CancellationToken,
    stats: Arc<RunStats>,
}

/// Stage run that did not succeed; carried through the retry loop.
struct FailedStage(StageResult);

impl fmt::Display for FailedStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.exit_code {
            Some(code) => write!(f, "stage `{}` exited with {code}", self.0.stage),
            None => write!(f, "stage `{}` did not finish", self.0.stage),
        }
    }
}

struct ChainFailure {
    kind: ItemFailure,
    reason: String,
    stages: Vec<StageResult>,
}

impl ChainFailure {
    fn interrupted(stages: Vec<StageResult>) -> Self {
        Self {
            kind: ItemFailure::Interrupted,
            reason: "shutdown requested".to_string(),
            stages,
        }
    }
}

impl Orchestrator {
    /// Creates an orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Gate`] when a configured concurrency is outside
    /// the supported range.
    pub fn new(
        config: PipelineConfig,
        paths: RunPaths,
        collaborators: Collaborators,
        cancel: CancellationToken,
    ) -> Result<Self, PipelineError> {
        let download_gate = ConcurrencyGate::new(config.download.concurrency)?;
        let transform_gate = ConcurrencyGate::new(config.transform_concurrency)?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                paths,
                collaborators,
                download_gate,
                transform_gate,
                cancel,
                stats: Arc::new(RunStats::new()),
            }),
        })
    }

    /// Live counters, shared with the running workers.
    #[must_use]
    pub fn stats(&self) -> Arc<RunStats> {
        Arc::clone(&self.inner.stats)
    }

    /// Token that stops the run when cancelled.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Enumerates the work list and reports which items a run would process.
    ///
    /// Reads the progress record without locking it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the catalog fails or returns nothing.
    pub async fn plan(&self) -> Result<RunPlan, PipelineError> {
        let store = ProgressStore::inspect(&self.inner.paths.progress_file).await;
        let items = self.inner.enumerate().await?;
        let mut planned = Vec::with_capacity(items.len());
        for item in items {
            planned.push(PlannedItem {
                complete: store.is_complete(&item.id).await,
                index: item.index,
                id: item.id,
                source_href: item.source_href,
                final_artifact: item.final_artifact,
            });
        }
        Ok(RunPlan { items: planned })
    }

    /// Processes every item not already recorded complete.
    ///
    /// Item failures do not fail the run; they are reported in the summary and
    /// retried by the next run.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the progress record cannot be opened,
    /// the catalog fails or is empty, or the directories cannot be created.
    #[instrument(skip(self), fields(output_dir = %self.inner.paths.output_dir.display()))]
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let inner = &self.inner;
        let store = Arc::new(ProgressStore::open(&inner.paths.progress_file).await?);
        let recorded = store.len().await;
        info!(progress = %store.path().display(), recorded, "progress record opened");

        for dir in [&inner.paths.output_dir, &inner.paths.staging_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| PipelineError::Workspace {
                    path: dir.clone(),
                    source,
                })?;
        }

        let items = inner.enumerate().await?;
        let total = items.len();
        inner.stats.set_total(total);

        let workers = inner.config.worker_count().clamp(1, total);
        info!(
            total,
            workers,
            download_slots = inner.download_gate.capacity(),
            transform_slots = inner.transform_gate.capacity(),
            "starting run"
        );

        let queue = Arc::new(Mutex::new(VecDeque::from(items)));
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let inner = Arc::clone(inner);
            let queue = Arc::clone(&queue);
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                inner.worker(worker, &queue, &store).await
            }));
        }

        let mut reports = Vec::with_capacity(total);
        for handle in handles {
            match handle.await {
                Ok(mut worker_reports) => reports.append(&mut worker_reports),
                // A panicked worker loses its in-flight item; the rest of the run continues.
                Err(e) => warn!(error = %e, "worker task panicked"),
            }
        }

        let summary = RunSummary::from_reports(total, reports, inner.cancel.is_cancelled());
        info!(
            total = summary.total,
            completed = summary.completed,
            skipped = summary.skipped,
            failed = summary.failed,
            not_started = summary.not_started,
            interrupted = summary.interrupted,
            "run finished"
        );
        Ok(summary)
    }
}

impl Inner {
    async fn enumerate(&self) -> Result<Vec<Item>, PipelineError> {
        let catalog = &self.collaborators.catalog;
        let assets = catalog.assets().await?;
        let found = assets.len();
        let assets = dedup_assets(assets);
        if assets.is_empty() {
            return Err(PipelineError::NoItems);
        }
        info!(
            catalog = catalog.name(),
            found,
            unique = assets.len(),
            "work list enumerated"
        );

        let dirs = self.paths.item_dirs();
        assets
            .into_iter()
            .enumerate()
            .map(|(i, asset)| {
                Item::from_asset(
                    i + 1,
                    asset,
                    &self.config.source_path,
                    &self.config.final_output,
                    &dirs,
                )
                .map_err(|e| PipelineError::ItemPath {
                    template: format!("{} | {}", self.config.source_path, self.config.final_output),
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    async fn worker(
        &self,
        worker: usize,
        queue: &Mutex<VecDeque<Item>>,
        store: &ProgressStore,
    ) -> Vec<ItemReport> {
        let mut reports = Vec::new();
        loop {
            if self.cancel.is_cancelled() {
                debug!(worker, "shutdown requested; worker stopping");
                break;
            }
            let Some(item) = queue.lock().await.pop_front() else {
                break;
            };

            let (index, id) = (item.index, item.id.clone());
            let outcome = self.process_item(item, store).await;
            self.stats.record(&outcome);
            info!(
                index,
                item = %id,
                state = %outcome.state(),
                done = self.stats.done(),
                total = self.stats.total(),
                "item finished"
            );
            reports.push(ItemReport { index, id, outcome });
        }
        reports
    }

    #[instrument(skip_all, fields(item = %item.id, index = item.index))]
    async fn process_item(&self, mut item: Item, store: &ProgressStore) -> ItemOutcome {
        let mut state = ItemState::Pending;
        if store.is_complete(&item.id).await {
            info!("already complete; skipping");
            return ItemOutcome::Skipped;
        }

        let mut workspace = ItemWorkspace::new(item.final_artifact.clone());

        advance(&mut state, ItemState::Resolving);
        match self.resolve(&item.source_href).await {
            Ok(url) => item.resolved_url = Some(url),
            Err((kind, reason)) => return failed(kind, reason, 0, Vec::new()),
        }

        advance(&mut state, ItemState::Downloading);
        let download_attempts = match self.download(&item, &mut workspace).await {
            Ok(attempts) => attempts,
            Err((kind, reason, attempts)) => {
                workspace.discard_all().await;
                return failed(kind, reason, attempts, Vec::new());
            }
        };
        advance(&mut state, ItemState::Downloaded);

        let Ok(permit) = self.transform_gate.acquire_or_cancel(&self.cancel).await else {
            workspace.discard_all().await;
            return failed(
                ItemFailure::Interrupted,
                "shutdown requested".to_string(),
                download_attempts,
                Vec::new(),
            );
        };
        advance(&mut state, ItemState::Transforming);
        let chain = self.run_chain(&item, &mut workspace).await;
        permit.release();

        let stages = match chain {
            Ok(stages) => stages,
            Err(failure) => {
                workspace.discard_all().await;
                return failed(failure.kind, failure.reason, download_attempts, failure.stages);
            }
        };

        if !tokio::fs::try_exists(&item.final_artifact)
            .await
            .unwrap_or(false)
        {
            workspace.discard_all().await;
            return failed(
                ItemFailure::Stage,
                format!(
                    "chain finished but {} was not produced",
                    item.final_artifact.display()
                ),
                download_attempts,
                stages,
            );
        }

        let removed = workspace.clean_intermediates().await;
        debug!(removed, "intermediates cleaned");

        // The final artifact is kept on a persist failure; the next run rebuilds it.
        if let Err(e) = store.mark_complete(&item.id).await {
            return failed(ItemFailure::Persist, e.to_string(), download_attempts, stages);
        }

        advance(&mut state, ItemState::Complete);
        ItemOutcome::Completed {
            download_attempts,
            stages,
        }
    }

    async fn resolve(&self, href: &str) -> Result<String, (ItemFailure, String)> {
        let signer = &self.collaborators.signer;
        let result = retry_with_backoff(
            &self.config.signing.policy(),
            &self.cancel,
            "sign",
            SignError::failure_type,
            |_| async move {
                tokio::select! {
                    () = self.cancel.cancelled() => Err(SignError::Cancelled { url: href.to_string() }),
                    signed = signer.sign(href) => signed,
                }
            },
        )
        .await;

        match result {
            Ok((url, attempts)) => {
                debug!(signer = signer.name(), attempts, "url resolved");
                Ok(url)
            }
            Err(exhausted) if exhausted.cancelled => {
                Err((ItemFailure::Interrupted, "shutdown requested".to_string()))
            }
            Err(exhausted) => Err((ItemFailure::Resolve, exhausted.error.to_string())),
        }
    }

    async fn download(
        &self,
        item: &Item,
        workspace: &mut ItemWorkspace,
    ) -> Result<u32, (ItemFailure, String, u32)> {
        let Ok(permit) = self.download_gate.acquire_or_cancel(&self.cancel).await else {
            return Err((ItemFailure::Interrupted, "shutdown requested".to_string(), 0));
        };

        workspace.track(&item.source_path);
        self.stats.download_started();
        let started = Instant::now();
        let fetched = self
            .collaborators
            .fetcher
            .fetch(item.download_url(), &item.source_path, &self.cancel)
            .await;
        self.stats.download_finished();
        permit.release();

        match fetched {
            Ok(fetched) => {
                info!(
                    bytes = fetched.bytes,
                    attempts = fetched.attempts,
                    elapsed_ms = started.elapsed().as_millis(),
                    "download complete"
                );
                Ok(fetched.attempts)
            }
            Err(failure) if failure.is_cancelled() => Err((
                ItemFailure::Interrupted,
                failure.error.to_string(),
                failure.attempts,
            )),
            Err(failure) => Err((
                ItemFailure::Download,
                failure.error.to_string(),
                failure.attempts,
            )),
        }
    }

    async fn run_chain(
        &self,
        item: &Item,
        workspace: &mut ItemWorkspace,
    ) -> Result<Vec<StageResult>, ChainFailure> {
        let mut results = Vec::with_capacity(self.config.stages.len());
        let mut input = item.source_path.clone();
        let mut best_effort_failed = false;

        for stage in &self.config.stages {
            if self.cancel.is_cancelled() {
                return Err(ChainFailure::interrupted(results));
            }
            if stage.best_effort
                && best_effort_failed
                && self.config.best_effort_policy == BestEffortPolicy::SkipAfterFailure
            {
                info!(stage = %stage.name, "skipping best-effort stage after earlier failure");
                continue;
            }

            let mut context = StageContext {
                input: input.clone(),
                output: None,
                source: item.source_path.clone(),
                final_artifact: item.final_artifact.clone(),
                index: item.index,
                key: item.key.clone(),
                year: item.year,
                staging_dir: self.paths.staging_dir.clone(),
                output_dir: self.paths.output_dir.clone(),
            };
            if let Some(template) = &stage.output {
                let output = match render(template, &context) {
                    Ok(rendered) => PathBuf::from(rendered),
                    Err(e) => {
                        return Err(ChainFailure {
                            kind: ItemFailure::Stage,
                            reason: format!("stage `{}`: {e}", stage.name),
                            stages: results,
                        });
                    }
                };
                workspace.track(&output);
                context.output = Some(output);
            }
            if !workspace.final_claimed()
                && (stage.touches_final() || context.output.as_ref() == Some(&item.final_artifact))
            {
                debug!(stage = %stage.name, "stage writes the final artifact");
                workspace.claim_final();
            }

            let result = self.run_stage(stage, &context).await;
            if result.cancelled {
                results.push(result);
                return Err(ChainFailure::interrupted(results));
            }

            if result.success {
                debug!(
                    stage = %stage.name,
                    duration_ms = result.duration.as_millis(),
                    diagnostics = %result.diagnostics,
                    "stage succeeded"
                );
                if let Some(output) = &result.output {
                    input.clone_from(output);
                }
            } else if stage.best_effort {
                warn!(
                    stage = %stage.name,
                    exit_code = ?result.exit_code,
                    diagnostics = %result.diagnostics,
                    "best-effort stage failed; continuing"
                );
                best_effort_failed = true;
            } else {
                warn!(
                    stage = %stage.name,
                    exit_code = ?result.exit_code,
                    diagnostics = %result.diagnostics,
                    "stage failed"
                );
                let reason = FailedStage(result.clone()).to_string();
                results.push(result);
                return Err(ChainFailure {
                    kind: ItemFailure::Stage,
                    reason,
                    stages: results,
                });
            }
            results.push(result);
        }

        Ok(results)
    }

    async fn run_stage(&self, stage: &StageSpec, context: &StageContext) -> StageResult {
        let runner = &self.collaborators.runner;
        let started = Instant::now();
        let outcome = retry_with_backoff(
            &self.config.stage_retry_policy(stage),
            &self.cancel,
            &stage.name,
            |last: &FailedStage| {
                if last.0.cancelled {
                    FailureType::Cancelled
                } else {
                    FailureType::Transient
                }
            },
            |_| async move {
                let result = runner.run(stage, context, &self.cancel).await;
                if result.success {
                    Ok(result)
                } else {
                    Err(FailedStage(result))
                }
            },
        )
        .await;

        match outcome {
            Ok((result, _)) => result,
            Err(exhausted) if exhausted.cancelled => {
                StageResult::cancelled(stage.name.clone(), started.elapsed())
            }
            Err(exhausted) => exhausted.error.0,
        }
    }
}

fn advance(state: &mut ItemState, next: ItemState) {
    debug!(from = %state, to = %next, "state transition");
    *state = next;
}

fn failed(
    kind: ItemFailure,
    reason: String,
    download_attempts: u32,
    stages: Vec<StageResult>,
) -> ItemOutcome {
    warn!(kind = %kind, reason = %reason, download_attempts, "item failed");
    ItemOutcome::Failed {
        kind,
        reason,
        download_attempts,
        stages,
    }
}
