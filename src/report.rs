use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{OverallSeverity, SourceFinding};

/// One-line summary for CLI output.
pub fn summary_line(finding: &SourceFinding) -> String {
    format!(
        "- {} ({}) [{}] {} incidents, {} files, {} rows",
        finding.source_name,
        finding.source_id,
        finding.overall_severity.as_str().to_uppercase(),
        finding.incidents.len(),
        finding.today_file_count,
        finding.today_total_rows
    )
}

fn write_section<'a>(
    output: &mut String,
    title: &str,
    findings: impl Iterator<Item = &'a SourceFinding>,
) {
    let mut wrote_header = false;
    for finding in findings {
        if !wrote_header {
            let _ = writeln!(output, "{title}");
            wrote_header = true;
        }
        let _ = writeln!(
            output,
            "  Source: {} (id: {})",
            finding.source_name, finding.source_id
        );
        let _ = writeln!(
            output,
            "  Files: {}, Rows: {}",
            finding.today_file_count, finding.today_total_rows
        );
        for incident in &finding.incidents {
            let _ = writeln!(
                output,
                "    [{}] {}: {}",
                incident.severity.as_str().to_uppercase(),
                incident.kind.label(),
                incident.details
            );
        }
        let _ = writeln!(output);
    }
}

/// Renders the aggregated findings as structured plain text, grouped by
/// overall severity. This text is the sole contract with the downstream
/// report generator, so every count, filename, and percentage the
/// detectors produced is carried through literally.
pub fn format_findings_for_report(
    findings: &BTreeMap<String, SourceFinding>,
    execution_date: NaiveDate,
) -> String {
    let mut output = String::new();

    let _ = writeln!(
        output,
        "INCIDENT DETECTION FINDINGS FOR {} ({})",
        execution_date,
        execution_date.format("%A")
    );
    let _ = writeln!(output, "{}", "=".repeat(60));
    let _ = writeln!(output);

    let by_severity = |severity: OverallSeverity| {
        findings
            .values()
            .filter(move |f| f.overall_severity == severity)
    };
    let urgent_count = by_severity(OverallSeverity::Urgent).count();
    let attention_count = by_severity(OverallSeverity::Attention).count();
    let ok_count = by_severity(OverallSeverity::Ok).count();

    let _ = writeln!(
        output,
        "SUMMARY: {urgent_count} urgent, {attention_count} attention, {ok_count} ok"
    );
    let _ = writeln!(output);

    write_section(&mut output, "URGENT SOURCES:", by_severity(OverallSeverity::Urgent));
    write_section(
        &mut output,
        "ATTENTION SOURCES:",
        by_severity(OverallSeverity::Attention),
    );

    if ok_count > 0 {
        let _ = writeln!(output, "OK SOURCES:");
        for finding in by_severity(OverallSeverity::Ok) {
            let _ = writeln!(
                output,
                "  {} (id: {}): {} files, {} rows - Normal",
                finding.source_name,
                finding.source_id,
                finding.today_file_count,
                finding.today_total_rows
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Incident, IncidentKind, Severity};

    fn finding(
        source_id: &str,
        overall: OverallSeverity,
        incidents: Vec<Incident>,
    ) -> SourceFinding {
        SourceFinding {
            source_id: source_id.to_string(),
            source_name: format!("Source {source_id}"),
            incidents,
            overall_severity: overall,
            today_file_count: 4,
            today_total_rows: 152_000,
        }
    }

    fn missing_incident() -> Incident {
        Incident {
            kind: IncidentKind::MissingFiles {
                expected_count: 18,
                received_count: 4,
                missing_count: 14,
                last_weekday_count: 18,
            },
            severity: Severity::Urgent,
            details: "Only 4 of 18 expected files received. Minimum expected: 16. \
                      Last Mon: 18 files."
                .to_string(),
        }
    }

    fn sample_findings() -> BTreeMap<String, SourceFinding> {
        let mut findings = BTreeMap::new();
        findings.insert(
            "220505".to_string(),
            finding("220505", OverallSeverity::Urgent, vec![missing_incident()]),
        );
        findings.insert(
            "207936".to_string(),
            finding(
                "207936",
                OverallSeverity::Attention,
                vec![Incident {
                    kind: IncidentKind::UnexpectedEmptyFile {
                        filename: "BR_web_daily.csv".to_string(),
                        expected_empty_mean: 0.1,
                    },
                    severity: Severity::Attention,
                    details: "File 'BR_web_daily.csv' has 0 records. \
                              Expected empty files for Mon: mean=0.1"
                        .to_string(),
                }],
            ),
        );
        findings.insert(
            "228036".to_string(),
            finding("228036", OverallSeverity::Ok, Vec::new()),
        );
        findings
    }

    #[test]
    fn report_groups_by_severity_with_summary() {
        let date = NaiveDate::from_ymd_opt(2025, 9, 8).unwrap();
        let text = format_findings_for_report(&sample_findings(), date);

        assert!(text.starts_with("INCIDENT DETECTION FINDINGS FOR 2025-09-08 (Monday)"));
        assert!(text.contains("SUMMARY: 1 urgent, 1 attention, 1 ok"));
        assert!(text.contains("URGENT SOURCES:"));
        assert!(text.contains("ATTENTION SOURCES:"));
        assert!(text.contains("OK SOURCES:"));
        assert!(text.contains("  Source: Source 220505 (id: 220505)"));
        assert!(text.contains("[URGENT] missing_files: Only 4 of 18 expected files received."));
        assert!(text.contains("[ATTENTION] unexpected_empty_file:"));
        assert!(text.contains("  Source 228036 (id: 228036): 4 files, 152000 rows - Normal"));
    }

    #[test]
    fn report_omits_empty_sections() {
        let mut findings = BTreeMap::new();
        findings.insert(
            "228036".to_string(),
            finding("228036", OverallSeverity::Ok, Vec::new()),
        );
        let date = NaiveDate::from_ymd_opt(2025, 9, 9).unwrap();
        let text = format_findings_for_report(&findings, date);

        assert!(text.contains("SUMMARY: 0 urgent, 0 attention, 1 ok"));
        assert!(!text.contains("URGENT SOURCES:"));
        assert!(!text.contains("ATTENTION SOURCES:"));
        assert!(text.contains("OK SOURCES:"));
    }

    #[test]
    fn summary_line_carries_counts() {
        let line = summary_line(&finding(
            "220505",
            OverallSeverity::Urgent,
            vec![missing_incident()],
        ));
        assert_eq!(
            line,
            "- Source 220505 (220505) [URGENT] 1 incidents, 4 files, 152000 rows"
        );
    }
}
