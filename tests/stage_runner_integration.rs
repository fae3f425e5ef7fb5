//! Runs full items through real child processes.
#![cfg(unix)]

use std::sync::Arc;

use ingest_core::config::PipelineConfig;
use ingest_core::pipeline::{Collaborators, ItemFailure, ItemOutcome, Orchestrator, RunPaths};
use ingest_core::stage::{CommandStageRunner, StageSpec};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

mod support;
use support::fakes::{FakeFetcher, ScriptedSigner, StaticCatalog, test_config};

const A: &str = "https://assets/a.tif";

fn orchestrator(config: PipelineConfig, temp_dir: &TempDir) -> Orchestrator {
    let collaborators = Collaborators {
        catalog: Arc::new(StaticCatalog::hrefs(&[A])),
        signer: Arc::new(ScriptedSigner::default()),
        fetcher: Arc::new(FakeFetcher::new(1)),
        runner: Arc::new(CommandStageRunner::new()),
    };
    Orchestrator::new(
        config,
        RunPaths::new(temp_dir.path()),
        collaborators,
        CancellationToken::new(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_chain_of_real_programs_produces_final_artifact() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut config = test_config();
    config.stages = vec![
        StageSpec::new("copy", "cp")
            .args(["{input}", "{output}"])
            .output("{staging_dir}/copy_{index}.tif"),
        StageSpec::new("publish", "cp")
            .args(["{input}", "{output}"])
            .output("{final}"),
        StageSpec::new("annotate", "sh")
            .args(["-c", "echo 'no metadata table' >&2; exit 3"])
            .best_effort(),
    ];

    let summary = orchestrator(config, &temp_dir).run().await.unwrap();

    let report = summary.item(A).unwrap();
    let ItemOutcome::Completed { stages, .. } = &report.outcome else {
        panic!("expected completion, got {:?}", report.outcome);
    };
    assert_eq!(stages.len(), 3);
    assert!(!stages[2].success);
    assert_eq!(stages[2].exit_code, Some(3));
    assert!(stages[2].diagnostics.contains("no metadata table"));

    let final_artifact = temp_dir.path().join("tile_1.mbtiles");
    assert_eq!(std::fs::read(&final_artifact).unwrap(), b"raster bytes");
    assert!(!temp_dir.path().join("staging/copy_1.tif").exists());
    assert!(!temp_dir.path().join("staging/input_1.tif").exists());
}

#[tokio::test]
async fn test_missing_program_fails_item_with_diagnostics() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut config = test_config();
    config.stages = vec![
        StageSpec::new("publish", "basemap-ingest-no-such-tool")
            .args(["{input}", "{output}"])
            .output("{final}"),
    ];

    let summary = orchestrator(config, &temp_dir).run().await.unwrap();

    let report = summary.item(A).unwrap();
    assert_eq!(report.outcome.failure(), Some(ItemFailure::Stage));
    let ItemOutcome::Failed { stages, .. } = &report.outcome else {
        panic!("expected failure");
    };
    assert_eq!(stages[0].exit_code, None);
    assert!(stages[0].diagnostics.contains("failed to start"));
    assert!(!temp_dir.path().join("tile_1.mbtiles").exists());
}

#[tokio::test]
async fn test_declared_exit_code_counts_as_success() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut config = test_config();
    let mut publish = StageSpec::new("publish", "sh")
        .args(["-c", "cp \"$0\" \"$1\"; exit 2", "{input}", "{output}"])
        .output("{final}");
    publish.required_exit_code = 2;
    config.stages = vec![publish];

    let summary = orchestrator(config, &temp_dir).run().await.unwrap();

    assert_eq!(summary.completed, 1);
    assert!(temp_dir.path().join("tile_1.mbtiles").exists());
}

#[tokio::test]
async fn test_stage_that_skips_final_output_fails_item() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut config = test_config();
    config.stages = vec![StageSpec::new("publish", "true").output("{final}")];

    let summary = orchestrator(config, &temp_dir).run().await.unwrap();

    let report = summary.item(A).unwrap();
    assert_eq!(report.outcome.failure(), Some(ItemFailure::Stage));
    assert_eq!(summary.completed, 0);
}
