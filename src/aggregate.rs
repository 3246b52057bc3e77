use std::collections::BTreeMap;

use chrono::NaiveDate;
use sqlx::PgPool;
use tracing::warn;

use crate::db;
use crate::detect::{
    detect_duplicated_failed, detect_late_upload, detect_missing_files, detect_previous_period,
    detect_unexpected_empty, detect_volume_variation,
};
use crate::models::{DailyFacts, Incident, OverallSeverity, Severity, SourceFinding, SourceProfile};
use crate::policy::DetectionPolicy;

/// How many attention incidents escalate a source to urgent overall.
const ATTENTION_ESCALATION_COUNT: usize = 3;

/// Runs the six detectors in their fixed order and concatenates the
/// incidents. Detectors that need a baseline are skipped when the profile
/// is absent; the facts-only detectors still run.
pub fn evaluate_source(
    profile: Option<&SourceProfile>,
    facts: &DailyFacts,
    policy: &DetectionPolicy,
) -> Vec<Incident> {
    let mut incidents = Vec::new();

    if let Some(profile) = profile {
        incidents.extend(detect_missing_files(profile, facts, policy));
    }
    incidents.extend(detect_duplicated_failed(facts));
    if let Some(profile) = profile {
        incidents.extend(detect_unexpected_empty(profile, facts, policy));
        incidents.extend(detect_volume_variation(profile, facts, policy));
        incidents.extend(detect_late_upload(profile, facts, policy));
    }
    incidents.extend(detect_previous_period(facts, policy));

    incidents
}

/// Derives the per-source severity: urgent on any urgent incident or on an
/// attention pile-up, attention on any attention incident, otherwise ok.
pub fn overall_severity(incidents: &[Incident]) -> OverallSeverity {
    let urgent_count = incidents
        .iter()
        .filter(|i| i.severity == Severity::Urgent)
        .count();
    let attention_count = incidents
        .iter()
        .filter(|i| i.severity == Severity::Attention)
        .count();

    if urgent_count > 0 || attention_count > ATTENTION_ESCALATION_COUNT {
        OverallSeverity::Urgent
    } else if attention_count > 0 {
        OverallSeverity::Attention
    } else {
        OverallSeverity::Ok
    }
}

fn finding_for(source_id: &str, source_name: &str, facts: &DailyFacts, incidents: Vec<Incident>) -> SourceFinding {
    let overall = overall_severity(&incidents);
    SourceFinding {
        source_id: source_id.to_string(),
        source_name: source_name.to_string(),
        incidents,
        overall_severity: overall,
        today_file_count: facts.today_file_count(),
        today_total_rows: facts.today_total_rows(),
    }
}

/// Evaluates every registered source for one execution date.
///
/// Always returns a complete mapping covering every known source. A store
/// failure for one source is logged and degrades that source to an
/// empty-incident finding rather than aborting the batch. Given identical
/// inputs the output is identical, incident ordering included.
pub async fn run_all_detectors(
    pool: &PgPool,
    execution_date: NaiveDate,
    policy: &DetectionPolicy,
) -> anyhow::Result<BTreeMap<String, SourceFinding>> {
    let sources = db::fetch_sources(pool).await?;
    let mut findings = BTreeMap::new();

    for source in sources {
        let profile = match db::fetch_profile(pool, &source.source_id).await {
            Ok(profile) => profile,
            Err(error) => {
                warn!(source_id = %source.source_id, %error, "profile load failed; evaluating without baseline");
                None
            }
        };
        if profile.is_none() {
            warn!(source_id = %source.source_id, "no profile on record; baseline detectors skipped");
        }

        let facts = match db::fetch_daily_facts(pool, &source.source_id, execution_date).await {
            Ok(facts) => facts,
            Err(error) => {
                warn!(source_id = %source.source_id, %error, "daily facts load failed; reporting degraded finding");
                let empty = DailyFacts {
                    execution_date,
                    ..Default::default()
                };
                findings.insert(
                    source.source_id.clone(),
                    finding_for(&source.source_id, &source.display_name, &empty, Vec::new()),
                );
                continue;
            }
        };

        let incidents = evaluate_source(profile.as_ref(), &facts, policy);
        findings.insert(
            source.source_id.clone(),
            finding_for(&source.source_id, &source.display_name, &facts, incidents),
        );
    }

    Ok(findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        DeliveredFile, FileCountStats, FileStatus, IncidentKind, RowVolumeStats,
    };
    use chrono::{TimeZone, Utc, Weekday};
    use std::collections::HashMap;

    fn incident(severity: Severity) -> Incident {
        Incident {
            kind: IncidentKind::FailedFile {
                filename: "x.csv".to_string(),
                status: FileStatus::Failure,
                is_duplicate: false,
            },
            severity,
            details: "File 'x.csv' has status 'failure'".to_string(),
        }
    }

    #[test]
    fn overall_severity_escalation_rules() {
        let two_urgent = vec![incident(Severity::Urgent), incident(Severity::Urgent)];
        assert_eq!(overall_severity(&two_urgent), OverallSeverity::Urgent);

        let four_attention = vec![incident(Severity::Attention); 4];
        assert_eq!(overall_severity(&four_attention), OverallSeverity::Urgent);

        let three_attention = vec![incident(Severity::Attention); 3];
        assert_eq!(overall_severity(&three_attention), OverallSeverity::Attention);

        let one_attention = vec![incident(Severity::Attention)];
        assert_eq!(overall_severity(&one_attention), OverallSeverity::Attention);

        assert_eq!(overall_severity(&[]), OverallSeverity::Ok);

        let info_only = vec![incident(Severity::Info)];
        assert_eq!(overall_severity(&info_only), OverallSeverity::Ok);
    }

    fn busy_monday() -> (SourceProfile, DailyFacts) {
        let mut profile = SourceProfile {
            source_id: "220505".to_string(),
            source_name: "Payments BR Settlement".to_string(),
            file_count_by_weekday: HashMap::new(),
            upload_window_by_weekday: HashMap::new(),
            row_volume_by_weekday: HashMap::new(),
            outcomes: Default::default(),
            notes: String::new(),
        };
        profile.file_count_by_weekday.insert(
            Weekday::Mon,
            FileCountStats {
                mean: 18.0,
                median: 18.0,
                mode: 18.0,
                stdev: 2.0,
                min: 16.0,
                max: 22.0,
            },
        );
        profile.row_volume_by_weekday.insert(
            Weekday::Mon,
            RowVolumeStats {
                min: 400_000.0,
                max: 900_000.0,
                mean: 612_000.0,
                median: 600_000.0,
                empty_mean: 0.1,
                empty_mode: 0,
            },
        );

        let failed = DeliveredFile {
            filename: "settlement_2025-07-01.csv".to_string(),
            row_count: 0,
            uploaded_at: Utc.with_ymd_and_hms(2025, 9, 8, 7, 0, 0).unwrap(),
            status: FileStatus::Failure,
            is_duplicate: false,
        };

        let facts = DailyFacts {
            execution_date: chrono::NaiveDate::from_ymd_opt(2025, 9, 8).unwrap(),
            today_files: vec![failed],
            last_week_files: Vec::new(),
        };
        (profile, facts)
    }

    #[test]
    fn evaluate_source_runs_detectors_in_fixed_order() {
        let (profile, facts) = busy_monday();
        let policy = DetectionPolicy::default();

        let incidents = evaluate_source(Some(&profile), &facts, &policy);
        let labels: Vec<&str> = incidents.iter().map(|i| i.kind.label()).collect();
        assert_eq!(
            labels,
            vec![
                "missing_files",
                "failed_file",
                "unexpected_empty_file",
                "unexpected_volume_low",
                "previous_period_upload",
            ]
        );
    }

    #[test]
    fn evaluate_source_is_deterministic() {
        let (profile, facts) = busy_monday();
        let policy = DetectionPolicy::default();

        let first = evaluate_source(Some(&profile), &facts, &policy);
        let second = evaluate_source(Some(&profile), &facts, &policy);

        let first_json = serde_json::to_string(&first).unwrap();
        let second_json = serde_json::to_string(&second).unwrap();
        assert_eq!(first_json, second_json);
        assert_eq!(overall_severity(&first), overall_severity(&second));
    }

    #[test]
    fn evaluate_source_without_profile_keeps_facts_only_detectors() {
        let (_, facts) = busy_monday();
        let policy = DetectionPolicy::default();

        let incidents = evaluate_source(None, &facts, &policy);
        let labels: Vec<&str> = incidents.iter().map(|i| i.kind.label()).collect();
        assert_eq!(labels, vec!["failed_file", "previous_period_upload"]);
    }
}
