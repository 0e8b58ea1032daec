//! Text summary builder for CLI output.
//!
//! Formats a completed run record into human-readable lines for text mode.

use crate::model::RunRecord;

/// Failure reasons shown before collapsing the rest into a count.
const MAX_FAILURE_LINES: usize = 5;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary from a finished run record.
pub(crate) fn build_text_summary(record: &RunRecord) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!(
        "Campaign: {} recipient(s), batch size {}, budget {}",
        record.queue_size,
        record.batch_size,
        humantime::format_duration(record.duration_budget)
    ));
    lines.push(format!("Started:  {}", record.started_at_utc));
    lines.push(format!("Finished: {}", record.finished_at_utc));
    lines.push(format!(
        "Delivered: {}  Failed: {}  Untried: {}",
        record.sent,
        record.failed,
        record.untried()
    ));

    if !record.failures.is_empty() {
        lines.push("Failures:".to_string());
        for failure in record.failures.iter().take(MAX_FAILURE_LINES) {
            lines.push(format!("  {}: {}", failure.identifier, failure.reason));
        }
        let hidden = record.failures.len().saturating_sub(MAX_FAILURE_LINES);
        if hidden > 0 {
            lines.push(format!("  … and {hidden} more"));
        }
    }

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FailureEntry, Lifecycle};
    use std::time::Duration;

    #[test]
    fn summary_reports_counts_and_failures() {
        let record = RunRecord {
            started_at_utc: "2026-08-26T12:00:00Z".into(),
            finished_at_utc: "2026-08-26T12:05:00Z".into(),
            message_text: "hi".into(),
            batch_size: 3,
            duration_budget: Duration::from_secs(3600),
            lifecycle: Lifecycle::Completed,
            sent: 5,
            failed: 1,
            queue_size: 8,
            successes: vec!["a".into(); 5],
            failures: vec![FailureEntry {
                identifier: "5511999990000".into(),
                reason: "simulated transport rejection".into(),
            }],
        };
        let summary = build_text_summary(&record);
        assert!(summary
            .lines
            .iter()
            .any(|l| l == "Delivered: 5  Failed: 1  Untried: 2"));
        assert!(summary
            .lines
            .iter()
            .any(|l| l.contains("5511999990000: simulated transport rejection")));
    }
}
