//! Markdown and JSON report generation.
//!
//! The Markdown report is built section by section from a [`Report`];
//! the JSON report is the same structure serialized as-is.

use crate::analysis::{dominant_channel, top_sessions};
use crate::config::ReportConfig;
use crate::models::{Report, ReportMetadata, RiskCategory, RiskSummary, SessionKey, SessionRow};
use anyhow::Result;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report, config: &ReportConfig) -> String {
    let mut output = String::new();

    output.push_str("# Riskwatch Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_summary_section(&report.summary));
    output.push_str(&generate_highlights_section(&report.sessions, config.top_sessions));
    output.push_str(&generate_sessions_section(&report.sessions, config.include_sub_scores));
    output.push_str(&generate_unscored_section(&report.unscored));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Scoring Backend:** `{}`\n", metadata.backend_url));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Sessions:** {} assessed of {}\n",
        metadata.sessions_assessed, metadata.sessions_total
    ));
    section.push_str(&format!("- **Passes:** {}\n", metadata.passes));
    section.push_str(&format!("- **Last Pass:** {}\n", metadata.pass_status));
    section.push_str(&format!("- **Duration:** {:.1}s\n", metadata.duration_seconds));
    section.push('\n');

    section
}

fn generate_summary_section(summary: &RiskSummary) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str(&format!(
        "| {} High | {} Medium | {} Low | **Total** |\n",
        RiskCategory::High.emoji(),
        RiskCategory::Medium.emoji(),
        RiskCategory::Low.emoji(),
    ));
    section.push_str("|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | **{}** |\n\n",
        summary.high, summary.medium, summary.low, summary.total
    ));

    if summary.total == 0 {
        return section;
    }

    section.push_str(&format!("**Mean score:** {:.2}", summary.mean_score));
    if summary.live_overlays > 0 {
        section.push_str(&format!(" | **Live overlays:** {}", summary.live_overlays));
    }
    section.push_str("\n\n");

    section.push_str("### Mean Sub-Scores\n\n");
    section.push_str("| Channel | Mean |\n");
    section.push_str("|:---|:---:|\n");
    for (name, value) in summary.mean_sub_scores.labeled() {
        section.push_str(&format!("| {} | {:.2} |\n", name, value));
    }
    section.push('\n');

    if let Some((name, value)) = dominant_channel(&summary.mean_sub_scores) {
        section.push_str(&format!(
            "> Highest average channel: **{}** ({:.2})\n\n",
            name, value
        ));
    }

    section
}

fn generate_highlights_section(rows: &[SessionRow], n: usize) -> String {
    let top = top_sessions(rows, n);
    if top.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Riskiest Sessions\n\n");
    for (i, row) in top.iter().enumerate() {
        section.push_str(&format!(
            "{}. {} `{}` - {:.2}",
            i + 1,
            row.assessment.category.emoji(),
            row.key,
            row.assessment.score
        ));
        if !row.assessment.description.is_empty() {
            section.push_str(&format!(": {}", row.assessment.description));
        }
        section.push('\n');
    }
    section.push('\n');

    section
}

fn generate_sessions_section(rows: &[SessionRow], include_sub_scores: bool) -> String {
    let mut section = String::new();

    section.push_str("## Sessions\n\n");

    if rows.is_empty() {
        section.push_str("No sessions were assessed.\n\n");
        return section;
    }

    if include_sub_scores {
        section.push_str("| Session | Created | Category | Score ");
        section.push_str("| Touch | Motion | Context | Location | Time | Source |\n");
        section.push_str("|:---|:---|:---:|:---:|:---:|:---:|:---:|:---:|:---:|:---:|\n");
    } else {
        section.push_str("| Session | Created | Category | Score | Source |\n");
        section.push_str("|:---|:---|:---:|:---:|:---:|\n");
    }

    for row in rows {
        let created = row
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let source = if row.live { "live" } else { "batch" };
        let a = &row.assessment;

        section.push_str(&format!(
            "| `{}` | {} | {} {} | {:.2} |",
            row.key,
            created,
            a.category.emoji(),
            a.category,
            a.score
        ));
        if include_sub_scores {
            for (_, value) in a.sub_scores.labeled() {
                section.push_str(&format!(" {:.2} |", value));
            }
        }
        section.push_str(&format!(" {} |\n", source));
    }
    section.push('\n');

    section
}

fn generate_unscored_section(unscored: &[SessionKey]) -> String {
    if unscored.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Unscored Sessions\n\n");
    section.push_str("The last pass could not score these sessions:\n\n");
    for key in unscored {
        section.push_str(&format!("- `{}`\n", key));
    }
    section.push('\n');

    section
}

fn generate_footer() -> String {
    format!("---\n\n*Report generated by riskwatch v{}*\n", env!("CARGO_PKG_VERSION"))
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RiskAssessment, SubScores};
    use chrono::Utc;

    fn row(id: &str, score: f64, live: bool) -> SessionRow {
        SessionRow {
            key: SessionKey::Id(id.to_string()),
            created_at: Some(Utc::now()),
            assessment: RiskAssessment::new(
                score,
                format!("desc {}", id),
                SubScores::uniform(score),
            ),
            live,
        }
    }

    fn create_test_report() -> Report {
        let sessions = vec![row("s-high", 0.9, true), row("s-low", 0.1, false)];
        Report {
            metadata: ReportMetadata {
                backend_url: "http://localhost:8700".to_string(),
                generated_at: Utc::now(),
                sessions_total: 3,
                sessions_assessed: 2,
                pass_status: "completed with 1 failure(s)".to_string(),
                passes: 1,
                duration_seconds: 1.5,
            },
            summary: RiskSummary::from_rows(&sessions),
            sessions,
            unscored: vec![SessionKey::Position(2)],
        }
    }

    #[test]
    fn test_generate_markdown_report() {
        let report = create_test_report();
        let markdown = generate_markdown_report(&report, &ReportConfig::default());

        assert!(markdown.contains("# Riskwatch Report"));
        assert!(markdown.contains("## Metadata"));
        assert!(markdown.contains("## Summary"));
        assert!(markdown.contains("## Riskiest Sessions"));
        assert!(markdown.contains("1. 🔴 `s-high` - 0.90: desc s-high"));
        assert!(markdown.contains("| Touch |"));
        assert!(markdown.contains("**Live overlays:** 1"));
        assert!(markdown.contains("## Unscored Sessions"));
        assert!(markdown.contains("- `#2`"));
    }

    #[test]
    fn test_markdown_without_sub_scores() {
        let report = create_test_report();
        let config = ReportConfig {
            top_sessions: 0,
            include_sub_scores: false,
        };
        let markdown = generate_markdown_report(&report, &config);

        assert!(!markdown.contains("| Touch |"));
        assert!(!markdown.contains("## Riskiest Sessions"));
    }

    #[test]
    fn test_empty_report() {
        let mut report = create_test_report();
        report.sessions.clear();
        report.unscored.clear();
        report.summary = RiskSummary::from_rows(&[]);

        let markdown = generate_markdown_report(&report, &ReportConfig::default());
        assert!(markdown.contains("No sessions were assessed."));
        assert!(!markdown.contains("### Mean Sub-Scores"));
    }

    #[test]
    fn test_generate_json_report() {
        let json = generate_json_report(&create_test_report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["summary"]["high"], 1);
        assert_eq!(value["sessions"][0]["key"], "s-high");
        assert_eq!(value["unscored"][0], 2);
    }
}
