//! CLI output formatting and display helpers.

use patent_core::{QueryReport, QueryStatus, RecordStatus, RunReport, RunSummary};

/// Message when no query was provided at all.
pub const NO_INPUT_GUIDANCE: &str = "No query provided. Pass queries as arguments, via --query-file, or pipe them on stdin.";

/// Example for passing a query as an argument.
pub const INPUT_ARG_EXAMPLE: &str = "Example: patent-downloader 'title:neural AND abstract:pruning'";

/// Example for piping queries.
pub const INPUT_PIPE_EXAMPLE: &str = "Example: printf 'CL=battery\\nTI=anode\\n' | patent-downloader -n 20";

/// Returns terminal width from COLUMNS, or 80 if unset/invalid.
pub fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|width| *width >= 20)
        .unwrap_or(80)
}

/// Truncates text to at most `width` chars, appending ellipsis if truncated.
pub fn truncate_to_width(text: &str, width: usize) -> String {
    let text_len = text.chars().count();
    if text_len <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    if width == 1 {
        return "…".to_string();
    }

    let mut output: String = text.chars().take(width - 1).collect();
    output.push('…');
    output
}

/// Lines shown when there is nothing to do.
pub fn quick_start_guidance_lines(width: usize) -> Vec<String> {
    [NO_INPUT_GUIDANCE, INPUT_ARG_EXAMPLE, INPUT_PIPE_EXAMPLE]
        .iter()
        .map(|line| truncate_to_width(line, width))
        .collect()
}

/// Splits query input into queries: one per non-blank line, `#` lines skipped.
pub fn split_query_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn status_label(status: &QueryStatus) -> String {
    match status {
        QueryStatus::Completed => "completed".to_string(),
        QueryStatus::Defect { marker } => format!("query defect ({marker})"),
        QueryStatus::Failed { error, .. } => format!("failed: {error}"),
        QueryStatus::Interrupted => "interrupted".to_string(),
    }
}

fn record_label(status: &RecordStatus) -> &'static str {
    match status {
        RecordStatus::Listed => "listed",
        RecordStatus::Downloaded => "downloaded",
        RecordStatus::SkippedExists => "exists",
        RecordStatus::NoArtifact => "no pdf",
        RecordStatus::ResolveFailed { .. } => "resolve failed",
        RecordStatus::DownloadFailed { .. } => "download failed",
        RecordStatus::Cancelled => "cancelled",
    }
}

/// Lines describing one query.
pub fn query_lines(report: &QueryReport, width: usize) -> Vec<String> {
    let total = report
        .total_result_count
        .map_or_else(|| "unknown".to_string(), |t| t.to_string());
    let mut lines = vec![truncate_to_width(
        &format!(
            "{} -> {} [{}] total: {}",
            report.query.original(),
            report.query.as_str(),
            status_label(&report.status),
            total
        ),
        width,
    )];
    for record in &report.records {
        let detail = match &record.status {
            RecordStatus::ResolveFailed { reason } | RecordStatus::DownloadFailed { reason } => reason.clone(),
            _ => record.title.clone(),
        };
        lines.push(truncate_to_width(
            &format!("  {:<16} {:<15} {}", record.patent_id, record_label(&record.status), detail),
            width,
        ));
    }
    lines
}

/// One-line run summary.
pub fn summary_line(summary: &RunSummary) -> String {
    let mut line = format!(
        "{} quer{}: {} downloaded, {} already present, {} without PDF, {} failed",
        summary.queries,
        if summary.queries == 1 { "y" } else { "ies" },
        summary.downloaded,
        summary.skipped_exists,
        summary.no_artifact,
        summary.resolve_failed + summary.download_failed,
    );
    if summary.listed > 0 {
        line.push_str(&format!(", {} listed", summary.listed));
    }
    if summary.cancelled > 0 {
        line.push_str(&format!(", {} cancelled", summary.cancelled));
    }
    if summary.defects > 0 {
        line.push_str(&format!(", {} query defect(s)", summary.defects));
    }
    if summary.failed_queries > 0 {
        line.push_str(&format!(", {} failed quer(ies)", summary.failed_queries));
    }
    line
}

/// Prints per-query details and the summary to stdout.
pub fn print_run_report(report: &RunReport) {
    let width = terminal_width();
    for query in &report.queries {
        for line in query_lines(query, width) {
            println!("{line}");
        }
    }
    println!("{}", summary_line(&report.summary));
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use patent_core::engine::RecordOutcome;
    use patent_core::executor::ExecutorStats;
    use patent_core::{ResultRecord, normalize};

    use super::*;

    #[test]
    fn test_truncate_to_width() {
        assert_eq!(truncate_to_width("abcdef", 10), "abcdef");
        assert_eq!(truncate_to_width("abcdef", 4), "abc…");
        assert_eq!(truncate_to_width("abcdef", 1), "…");
        assert_eq!(truncate_to_width("abcdef", 0), "");
    }

    #[test]
    fn test_split_query_lines_skips_blank_and_comments() {
        let queries = split_query_lines("  title:neural \n\n# later\nCL=battery\n");
        assert_eq!(queries, vec!["title:neural", "CL=battery"]);
    }

    #[test]
    fn test_quick_start_guidance_lines_truncated() {
        let lines = quick_start_guidance_lines(30);
        assert_eq!(lines.len(), 3);
        assert!(lines.iter().all(|l| l.chars().count() <= 30));
    }

    #[test]
    fn test_query_lines_show_rewrite_and_records() {
        let mut report = QueryReport::new(normalize("title:neural"));
        report.total_result_count = Some(7);
        report.records = vec![RecordOutcome::new(
            &ResultRecord {
                patent_id: "US1".to_string(),
                title: "Neural thing".to_string(),
                detail_url: "https://patents.google.com/patent/US1/en".to_string(),
                raw_fields: BTreeMap::new(),
            },
            RecordStatus::NoArtifact,
        )];
        let lines = query_lines(&report, 200);
        assert_eq!(lines[0], "title:neural -> TI=neural [completed] total: 7");
        assert!(lines[1].contains("US1"));
        assert!(lines[1].contains("no pdf"));
    }

    #[test]
    fn test_summary_line_mentions_defects_and_cancellations() {
        let summary = RunSummary {
            queries: 2,
            downloaded: 3,
            cancelled: 1,
            defects: 1,
            ..RunSummary::from_reports(&[], &ExecutorStats::default(), 0)
        };
        let line = summary_line(&summary);
        assert!(line.starts_with("2 queries: 3 downloaded"));
        assert!(line.contains("1 cancelled"));
        assert!(line.contains("1 query defect(s)"));
    }
}
