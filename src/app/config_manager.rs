//! Pipeline description and run paths resolved from CLI arguments.

use anyhow::{Context, Result};
use ingest_core::config::{CatalogConfig, PipelineConfig};
use ingest_core::pipeline::RunPaths;
use tracing::debug;

use crate::cli::Args;

/// Loads the pipeline file (or the built-in pipeline) and applies CLI overrides.
pub(crate) fn resolve_pipeline(args: &Args) -> Result<PipelineConfig> {
    let mut config = match args.config.as_deref() {
        Some(path) => PipelineConfig::load(Some(path))
            .with_context(|| format!("failed to load pipeline {}", path.display()))?,
        None => PipelineConfig::load(None).context("built-in pipeline is invalid")?,
    };
    apply_cli_overrides(&mut config, args);
    config
        .validate()
        .context("invalid pipeline after applying command-line overrides")?;
    Ok(config)
}

/// Applies flags the user passed; unset flags leave the file values alone.
pub(crate) fn apply_cli_overrides(config: &mut PipelineConfig, args: &Args) {
    if let Some(concurrency) = args.concurrency {
        config.download.concurrency = usize::from(concurrency);
    }
    if let Some(attempts) = args.max_retries {
        config.download.max_attempts = u32::from(attempts);
    }
    if let Some(secs) = args.stall_timeout {
        config.download.stall_timeout_secs = secs;
    }
    if let Some(secs) = args.retry_step {
        config.download.retry_step_secs = secs;
    }
    if let Some(manifest) = &args.manifest {
        debug!(manifest = %manifest.display(), "work list from manifest");
        config.catalog = CatalogConfig::Manifest {
            path: manifest.clone(),
        };
    }
}

pub(crate) fn resolve_paths(args: &Args) -> RunPaths {
    let mut paths = RunPaths::new(&args.output_dir);
    if let Some(staging_dir) = &args.staging_dir {
        paths = paths.with_staging_dir(staging_dir);
    }
    if let Some(progress_file) = &args.progress_file {
        paths = paths.with_progress_file(progress_file);
    }
    paths
}
