use std::path::PathBuf;
use std::time::Duration;

/// Maximum bytes of captured diagnostic text kept per stage run (8 KiB).
pub const DIAGNOSTICS_LIMIT: usize = 8 * 1024;

/// Outcome of one stage run.
///
/// `output` is only set when the run succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    /// Stage name.
    pub stage: String,
    /// True when the exit status matched the stage's required code.
    pub success: bool,
    /// Exit status, if the process ran to completion.
    pub exit_code: Option<i32>,
    /// Captured diagnostic output, truncated to [`DIAGNOSTICS_LIMIT`].
    pub diagnostics: String,
    /// Path the stage produced, when it declared one and succeeded.
    pub output: Option<PathBuf>,
    /// Wall-clock run time.
    pub duration: Duration,
    /// The run was aborted by a shutdown request.
    pub cancelled: bool,
}

impl StageResult {
    /// A successful run.
    #[must_use]
    pub fn succeeded(
        stage: impl Into<String>,
        exit_code: i32,
        diagnostics: &str,
        output: Option<PathBuf>,
        duration: Duration,
    ) -> Self {
        Self {
            stage: stage.into(),
            success: true,
            exit_code: Some(exit_code),
            diagnostics: truncate_diagnostics(diagnostics),
            output,
            duration,
            cancelled: false,
        }
    }

    /// A failed run. `exit_code` is `None` when the process never finished.
    #[must_use]
    pub fn failed(
        stage: impl Into<String>,
        exit_code: Option<i32>,
        diagnostics: &str,
        duration: Duration,
    ) -> Self {
        Self {
            stage: stage.into(),
            success: false,
            exit_code,
            diagnostics: truncate_diagnostics(diagnostics),
            output: None,
            duration,
            cancelled: false,
        }
    }

    /// A run aborted by shutdown.
    #[must_use]
    pub fn cancelled(stage: impl Into<String>, duration: Duration) -> Self {
        Self {
            cancelled: true,
            ..Self::failed(stage, None, "cancelled", duration)
        }
    }
}

/// Keeps the last [`DIAGNOSTICS_LIMIT`] bytes of `text`, on a char boundary.
///
/// The tail is kept: tools print the reason for failing last.
#[must_use]
pub fn truncate_diagnostics(text: &str) -> String {
    let text = text.trim_end();
    if text.len() <= DIAGNOSTICS_LIMIT {
        return text.to_string();
    }
    let mut start = text.len() - DIAGNOSTICS_LIMIT;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_result_has_no_output() {
        let result = StageResult::failed("warp", Some(1), "boom", Duration::ZERO);
        assert!(!result.success);
        assert!(result.output.is_none());
        assert_eq!(result.exit_code, Some(1));
    }

    #[test]
    fn test_truncate_diagnostics_keeps_tail() {
        let long = format!("{}ERROR: disk full", "x".repeat(DIAGNOSTICS_LIMIT * 2));
        let truncated = truncate_diagnostics(&long);
        assert!(truncated.ends_with("ERROR: disk full"));
        assert!(truncated.len() <= DIAGNOSTICS_LIMIT + 3);
    }

    #[test]
    fn test_truncate_diagnostics_multibyte_boundary() {
        let long = "é".repeat(DIAGNOSTICS_LIMIT);
        let truncated = truncate_diagnostics(&long);
        assert!(truncated.starts_with("..."));
    }

    #[test]
    fn test_cancelled_result() {
        let result = StageResult::cancelled("tiles", Duration::ZERO);
        assert!(result.cancelled);
        assert!(!result.success);
    }
}
