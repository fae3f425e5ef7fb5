//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Resumable batch ingestion of aerial imagery into tiled basemaps.
///
/// Enumerates assets from a catalog, downloads each one, runs it through the
/// configured chain of external tools, and records completion so that an
/// interrupted batch resumes where it stopped.
#[derive(Parser, Debug)]
#[command(name = "basemap-ingest")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Pipeline description (JSON). The built-in pipeline is used when omitted.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory receiving final artifacts
    #[arg(short = 'o', long, env = "OUTPUT_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Directory for downloads and intermediates [default: <OUTPUT_DIR>/staging]
    #[arg(long, value_name = "PATH")]
    pub staging_dir: Option<PathBuf>,

    /// Completion record [default: <OUTPUT_DIR>/download_progress.json]
    #[arg(long, value_name = "PATH")]
    pub progress_file: Option<PathBuf>,

    /// Read the work list from a local JSON manifest instead of the catalog
    #[arg(long, value_name = "PATH")]
    pub manifest: Option<PathBuf>,

    /// Maximum concurrent downloads (1-16)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub concurrency: Option<u8>,

    /// Download attempts per item, including the first (1-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub max_retries: Option<u8>,

    /// Abort a transfer after this many seconds without data
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub stall_timeout: Option<u64>,

    /// Linear backoff step between download attempts, in seconds
    #[arg(long, value_name = "SECS")]
    pub retry_step: Option<u64>,

    /// List pending and already-complete items, then exit
    #[arg(long)]
    pub dry_run: bool,
}
