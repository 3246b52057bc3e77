use std::sync::OnceLock;

use chrono::{NaiveDate, Timelike};
use regex::Regex;

use crate::models::{
    weekday_abbr, DailyFacts, FileStatus, Incident, IncidentKind, Severity, SourceProfile,
};
use crate::policy::DetectionPolicy;

/// Detects days where fewer files arrived than the weekday baseline allows.
///
/// A weekday with no expectation at all (absent entry, or mean and min both
/// zero) never produces an incident, whatever was actually received.
pub fn detect_missing_files(
    profile: &SourceProfile,
    facts: &DailyFacts,
    policy: &DetectionPolicy,
) -> Vec<Incident> {
    let day = facts.weekday();
    let Some(stats) = profile.file_count_by_weekday.get(&day) else {
        return Vec::new();
    };
    if stats.mean == 0.0 && stats.min == 0.0 {
        return Vec::new();
    }

    let received = facts.today_file_count() as i64;
    if (received as f64) >= stats.min {
        return Vec::new();
    }

    let expected = stats.mean.round() as i64;
    let missing = (expected - received).max(0);
    let severity = if (received as f64) < stats.mean * policy.urgent_missing_ratio {
        Severity::Urgent
    } else {
        Severity::Attention
    };
    let last_weekday_count = facts.last_week_file_count() as i64;

    vec![Incident {
        kind: IncidentKind::MissingFiles {
            expected_count: expected,
            received_count: received,
            missing_count: missing,
            last_weekday_count,
        },
        severity,
        details: format!(
            "Only {received} of {expected} expected files received. \
             Minimum expected: {:.0}. Last {}: {last_weekday_count} files.",
            stats.min,
            weekday_abbr(day),
        ),
    }]
}

/// Flags duplicated and failed deliveries. Per file, first match wins:
/// duplicate with a broken status outranks a plain failure, which outranks
/// a duplicate that was merely stopped. Deleted files and duplicates that
/// still processed cleanly are left alone.
pub fn detect_duplicated_failed(facts: &DailyFacts) -> Vec<Incident> {
    if facts.today_duplicate_count() == 0 && facts.today_failed_count() == 0 {
        return Vec::new();
    }

    let mut incidents = Vec::new();
    for file in &facts.today_files {
        if file.is_duplicate
            && matches!(file.status, FileStatus::Stopped | FileStatus::Failure)
        {
            incidents.push(Incident {
                kind: IncidentKind::DuplicatedFile {
                    filename: file.filename.clone(),
                    status: file.status,
                },
                severity: Severity::Urgent,
                details: format!(
                    "File '{}' is duplicated with status '{}'",
                    file.filename, file.status
                ),
            });
        } else if file.status == FileStatus::Failure {
            incidents.push(Incident {
                kind: IncidentKind::FailedFile {
                    filename: file.filename.clone(),
                    status: file.status,
                    is_duplicate: file.is_duplicate,
                },
                severity: Severity::Attention,
                details: format!("File '{}' has status 'failure'", file.filename),
            });
        } else if file.is_duplicate && file.status == FileStatus::Stopped {
            incidents.push(Incident {
                kind: IncidentKind::DuplicatedFile {
                    filename: file.filename.clone(),
                    status: file.status,
                },
                severity: Severity::Attention,
                details: format!("File '{}' is a duplicate (stopped)", file.filename),
            });
        }
    }

    incidents
}

/// Flags zero-row files that are empty against the source's own history.
///
/// Three independent pieces of "this is normal" evidence suppress the
/// incident: a known always-empty entity name, a weekday that is normally
/// dominated by empty files, and a source-wide high empty baseline.
pub fn detect_unexpected_empty(
    profile: &SourceProfile,
    facts: &DailyFacts,
    policy: &DetectionPolicy,
) -> Vec<Incident> {
    if facts.today_empty_count() == 0 {
        return Vec::new();
    }

    let day = facts.weekday();
    let expected_empty_mean = profile
        .row_volume_by_weekday
        .get(&day)
        .map(|stats| stats.empty_mean)
        .unwrap_or(0.0);

    if expected_empty_mean > policy.empty_day_mean_threshold {
        return Vec::new();
    }
    if profile.outcomes.empty_pct > policy.empty_overall_pct_threshold {
        return Vec::new();
    }

    let mut incidents = Vec::new();
    for file in facts.today_files.iter().filter(|f| f.row_count == 0) {
        if policy.is_known_empty(&profile.source_id, &file.filename) {
            continue;
        }
        incidents.push(Incident {
            kind: IncidentKind::UnexpectedEmptyFile {
                filename: file.filename.clone(),
                expected_empty_mean,
            },
            severity: Severity::Attention,
            details: format!(
                "File '{}' has 0 records. Expected empty files for {}: mean={expected_empty_mean:.1}",
                file.filename,
                weekday_abbr(day),
            ),
        });
    }

    incidents
}

/// Compares today's total rows against the weekday volume baseline.
/// At most one incident per run: high and low are mutually exclusive.
pub fn detect_volume_variation(
    profile: &SourceProfile,
    facts: &DailyFacts,
    policy: &DetectionPolicy,
) -> Vec<Incident> {
    let day = facts.weekday();
    let Some(stats) = profile.row_volume_by_weekday.get(&day) else {
        return Vec::new();
    };
    if stats.mean == 0.0 && stats.median == 0.0 {
        return Vec::new();
    }
    if stats.mean <= 0.0 {
        return Vec::new();
    }

    let today_rows = facts.today_total_rows();
    let last_weekday_rows = facts.last_week_total_rows();
    let day_normally_empty =
        stats.empty_mean > policy.empty_day_mean_threshold && stats.median == 0.0;

    if today_rows == 0 {
        if day_normally_empty {
            return Vec::new();
        }
        return vec![Incident {
            kind: IncidentKind::UnexpectedVolumeLow {
                today_rows: 0,
                expected_mean: stats.mean,
                expected_min: stats.min,
                expected_max: stats.max,
                deviation_pct: -100.0,
                last_weekday_rows,
            },
            severity: Severity::Urgent,
            details: format!(
                "ZERO records received. Expected mean: {:.0}. Last {}: {last_weekday_rows} rows.",
                stats.mean,
                weekday_abbr(day),
            ),
        }];
    }

    let deviation_pct = ((today_rows as f64) - stats.mean) / stats.mean * 100.0;
    let range_details = format!(
        "Volume {today_rows} rows is {deviation_pct:+.1}% vs expected mean {:.0}. \
         Range: {:.0}-{:.0}. Last {}: {last_weekday_rows} rows.",
        stats.mean,
        stats.min,
        stats.max,
        weekday_abbr(day),
    );

    if (today_rows as f64) > stats.max * policy.volume_high_max_factor
        && deviation_pct.abs() > policy.volume_high_deviation_pct
    {
        return vec![Incident {
            kind: IncidentKind::UnexpectedVolumeHigh {
                today_rows,
                expected_mean: stats.mean,
                expected_min: stats.min,
                expected_max: stats.max,
                deviation_pct,
                last_weekday_rows,
            },
            severity: Severity::Attention,
            details: range_details,
        }];
    }

    if (today_rows as f64) < stats.min * policy.volume_low_min_factor && stats.min > 0.0 {
        let severity = if deviation_pct < policy.volume_low_urgent_deviation_pct {
            Severity::Urgent
        } else {
            Severity::Attention
        };
        return vec![Incident {
            kind: IncidentKind::UnexpectedVolumeLow {
                today_rows,
                expected_mean: stats.mean,
                expected_min: stats.min,
                expected_max: stats.max,
                deviation_pct,
                last_weekday_rows,
            },
            severity,
            details: range_details,
        }];
    }

    Vec::new()
}

/// Flags files uploaded well past the weekday's expected window end.
/// Never urgent: a late file still arrived.
pub fn detect_late_upload(
    profile: &SourceProfile,
    facts: &DailyFacts,
    policy: &DetectionPolicy,
) -> Vec<Incident> {
    let day = facts.weekday();
    let Some(window) = profile.upload_window_by_weekday.get(&day) else {
        return Vec::new();
    };
    let window_end_minutes =
        (window.window_end.hour() * 60 + window.window_end.minute()) as i64;

    let mut incidents = Vec::new();
    for file in &facts.today_files {
        let upload_time = file.uploaded_at.time();
        let upload_minutes = (upload_time.hour() * 60 + upload_time.minute()) as i64;
        let delay_minutes = upload_minutes - window_end_minutes;

        if delay_minutes > policy.late_threshold_minutes {
            let delay_hours = (delay_minutes as f64 / 60.0 * 10.0).round() / 10.0;
            incidents.push(Incident {
                kind: IncidentKind::LateUpload {
                    filename: file.filename.clone(),
                    uploaded_at: file.uploaded_at,
                    delay_hours,
                },
                severity: Severity::Attention,
                details: format!(
                    "File '{}' uploaded {delay_hours:.1}h after expected window ({}-{} UTC)",
                    file.filename,
                    window.window_start.format("%H:%M"),
                    window.window_end.format("%H:%M"),
                ),
            });
        }
    }

    incidents
}

fn filename_date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\d{4})[-_](\d{2})[-_](\d{2})").expect("valid filename date pattern")
    })
}

/// Flags files whose embedded filename date lags the execution date by more
/// than the backfill threshold. Never urgent: backfills are usually
/// intentional catch-up uploads. A filename carrying several date-like
/// substrings yields one incident per plausible date.
pub fn detect_previous_period(facts: &DailyFacts, policy: &DetectionPolicy) -> Vec<Incident> {
    let mut incidents = Vec::new();

    for file in &facts.today_files {
        for capture in filename_date_pattern().captures_iter(&file.filename) {
            let parsed = (
                capture[1].parse::<i32>().ok(),
                capture[2].parse::<u32>().ok(),
                capture[3].parse::<u32>().ok(),
            );
            let (Some(year), Some(month), Some(day)) = parsed else {
                continue;
            };
            let Some(file_date) = NaiveDate::from_ymd_opt(year, month, day) else {
                continue;
            };

            let lag_days = (facts.execution_date - file_date).num_days();
            if lag_days > policy.backfill_lag_days {
                incidents.push(Incident {
                    kind: IncidentKind::PreviousPeriodUpload {
                        filename: file.filename.clone(),
                        file_date,
                        lag_days,
                    },
                    severity: Severity::Attention,
                    details: format!(
                        "File from {file_date} uploaded today ({lag_days} days lag). \
                         Possible backfill.",
                    ),
                });
            }
        }
    }

    incidents
}
