//! Instrumented stand-ins for the pipeline's collaborators.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ingest_core::catalog::{Catalog, CatalogAsset, CatalogError};
use ingest_core::config::{BestEffortPolicy, CatalogConfig, PipelineConfig, SignerConfig};
use ingest_core::download::{DownloadError, FetchFailure, Fetched, Fetcher};
use ingest_core::pipeline::{Collaborators, Orchestrator, RunPaths};
use ingest_core::retry::{FailureType, RetryPolicy, retry_with_backoff};
use ingest_core::signer::{SignError, UrlSigner};
use ingest_core::stage::{StageContext, StageResult, StageRunner, StageSpec};
use tokio_util::sync::CancellationToken;

/// Catalog returning a fixed list.
pub struct StaticCatalog(pub Vec<CatalogAsset>);

impl StaticCatalog {
    pub fn hrefs(hrefs: &[&str]) -> Self {
        Self(hrefs.iter().map(|h| CatalogAsset::from_href(*h)).collect())
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    fn name(&self) -> &str {
        "static"
    }

    async fn assets(&self) -> Result<Vec<CatalogAsset>, CatalogError> {
        Ok(self.0.clone())
    }
}

/// Signer that appends a token and can be told to fail for some URLs.
#[derive(Default)]
pub struct ScriptedSigner {
    failing: Vec<String>,
    pub calls: AtomicUsize,
}

impl ScriptedSigner {
    pub fn failing_for(url: &str) -> Self {
        Self {
            failing: vec![url.to_string()],
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl UrlSigner for ScriptedSigner {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn sign(&self, url: &str) -> Result<String, SignError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.iter().any(|f| f == url) {
            return Err(SignError::HttpStatus {
                url: url.to_string(),
                status: 503,
            });
        }
        Ok(format!("{url}?sig=test"))
    }
}

/// Fetcher that writes a small file after a delay, counts concurrency, and
/// fails scripted URLs a set number of times before succeeding.
pub struct FakeFetcher {
    policy: RetryPolicy,
    delay: Duration,
    failures: Mutex<HashMap<String, u32>>,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            policy: RetryPolicy::fixed(max_attempts, Duration::ZERO),
            delay: Duration::from_millis(40),
            failures: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Makes every URL starting with `prefix` fail `times` attempts.
    pub fn fail(self, prefix: &str, times: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(prefix.to_string(), times);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn take_failure(&self, url: &str) -> bool {
        let mut failures = self.failures.lock().unwrap();
        for (prefix, remaining) in failures.iter_mut() {
            if url.starts_with(prefix.as_str()) && *remaining > 0 {
                *remaining -= 1;
                return true;
            }
        }
        false
    }

    async fn attempt(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let result = tokio::select! {
            () = cancel.cancelled() => Err(DownloadError::cancelled(url)),
            () = tokio::time::sleep(self.delay) => {
                if self.take_failure(url) {
                    Err(DownloadError::http_status(url, 503))
                } else {
                    tokio::fs::write(destination, b"raster bytes")
                        .await
                        .map(|()| 12)
                        .map_err(|e| DownloadError::io(destination, e))
                }
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(
        &self,
        url: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<Fetched, FetchFailure> {
        let outcome = retry_with_backoff(
            &self.policy,
            cancel,
            "fake-fetch",
            |e: &DownloadError| {
                if e.is_cancelled() {
                    FailureType::Cancelled
                } else {
                    FailureType::Transient
                }
            },
            |_| self.attempt(url, destination, cancel),
        )
        .await;

        match outcome {
            Ok((bytes, attempts)) => Ok(Fetched {
                path: destination.to_path_buf(),
                bytes,
                attempts,
            }),
            Err(exhausted) => {
                let _ = tokio::fs::remove_file(destination).await;
                Err(FetchFailure {
                    error: exhausted.error,
                    attempts: exhausted.attempts,
                })
            }
        }
    }
}

/// One recorded stage invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub stage: String,
    pub index: usize,
    pub input: PathBuf,
    pub output: Option<PathBuf>,
}

/// Stage runner that writes its declared output and fails scripted
/// `(stage, item index)` pairs.
#[derive(Default)]
pub struct ScriptedRunner {
    failing: Vec<(String, usize)>,
    pub invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn failing(pairs: &[(&str, usize)]) -> Self {
        Self {
            failing: pairs.iter().map(|(s, i)| ((*s).to_string(), *i)).collect(),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn count(&self, stage: &str) -> usize {
        self.invocations()
            .iter()
            .filter(|inv| inv.stage == stage)
            .count()
    }
}

#[async_trait]
impl StageRunner for ScriptedRunner {
    async fn run(
        &self,
        stage: &StageSpec,
        context: &StageContext,
        _cancel: &CancellationToken,
    ) -> StageResult {
        self.invocations.lock().unwrap().push(Invocation {
            stage: stage.name.clone(),
            index: context.index,
            input: context.input.clone(),
            output: context.output.clone(),
        });

        if self
            .failing
            .iter()
            .any(|(name, index)| *name == stage.name && *index == context.index)
        {
            return StageResult::failed(&stage.name, Some(1), "ERROR 1: scripted failure", Duration::ZERO);
        }

        if let Some(output) = &context.output {
            tokio::fs::write(output, b"derived").await.unwrap();
        }
        StageResult::succeeded(&stage.name, 0, "", context.output.clone(), Duration::ZERO)
    }
}

/// Three-stage chain: an intermediate, the final artifact, then a best-effort
/// in-place step.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        catalog: CatalogConfig::Manifest {
            path: PathBuf::from("unused.json"),
        },
        signer: SignerConfig::None,
        workers: Some(3),
        stage_retry_delay_secs: 0,
        // Index-named paths keep assertions readable; the default templates use `{key}`.
        source_path: "{staging_dir}/input_{index}.tif".to_string(),
        final_output: "{output_dir}/tile_{index}.mbtiles".to_string(),
        best_effort_policy: BestEffortPolicy::Independent,
        stages: vec![
            StageSpec::new("warp", "gdalwarp")
                .args(["{input}", "{output}"])
                .output("{staging_dir}/warped_{index}.tif"),
            StageSpec::new("tiles", "gdal_translate")
                .args(["{input}", "{output}"])
                .output("{final}"),
            StageSpec::new("overviews", "gdaladdo")
                .args(["{final}"])
                .best_effort(),
        ],
        ..PipelineConfig::default()
    }
}

/// Collaborators wired for a test, kept so tests can inspect them.
pub struct Harness {
    pub fetcher: Arc<FakeFetcher>,
    pub runner: Arc<ScriptedRunner>,
    pub signer: Arc<ScriptedSigner>,
    pub catalog: Arc<StaticCatalog>,
}

impl Harness {
    pub fn new(catalog: StaticCatalog, fetcher: FakeFetcher, runner: ScriptedRunner) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            runner: Arc::new(runner),
            signer: Arc::new(ScriptedSigner::default()),
            catalog: Arc::new(catalog),
        }
    }

    pub fn with_signer(mut self, signer: ScriptedSigner) -> Self {
        self.signer = Arc::new(signer);
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            catalog: self.catalog.clone(),
            signer: self.signer.clone(),
            fetcher: self.fetcher.clone(),
            runner: self.runner.clone(),
        }
    }

    pub fn orchestrator(
        &self,
        config: PipelineConfig,
        output_dir: &Path,
        cancel: CancellationToken,
    ) -> Orchestrator {
        Orchestrator::new(config, RunPaths::new(output_dir), self.collaborators(), cancel).unwrap()
    }
}
