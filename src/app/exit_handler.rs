use ingest_core::RunSummary;

use crate::ProcessExit;

/// Item failures do not fail the process; the next run retries them.
pub(crate) fn determine_exit_outcome(summary: &RunSummary) -> ProcessExit {
    if summary.interrupted {
        ProcessExit::Interrupted
    } else {
        ProcessExit::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_success_with_item_failures() {
        let summary = RunSummary::from_reports(3, Vec::new(), false);
        assert_eq!(determine_exit_outcome(&summary), ProcessExit::Success);
    }

    #[test]
    fn test_exit_interrupted() {
        let summary = RunSummary::from_reports(3, Vec::new(), true);
        assert_eq!(determine_exit_outcome(&summary), ProcessExit::Interrupted);
        assert_eq!(ProcessExit::Interrupted.code(), 130);
    }
}
