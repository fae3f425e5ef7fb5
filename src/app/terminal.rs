//! Terminal detection and tracing setup.

use tracing_subscriber::EnvFilter;

/// Priority: `RUST_LOG` > `--quiet` > `-v`/`-vv` > info.
pub(crate) fn resolve_default_log_level(quiet: bool, verbose: u8) -> &'static str {
    if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

pub(crate) fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

pub(crate) fn is_dumb_terminal() -> bool {
    std::env::var("TERM").is_ok_and(|term| term == "dumb")
}

pub(crate) fn should_use_spinner(stderr_is_terminal: bool, quiet: bool, dumb: bool) -> bool {
    stderr_is_terminal && !quiet && !dumb
}
