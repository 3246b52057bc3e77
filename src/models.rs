use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// One upstream data provider registered in the pipeline.
#[derive(Debug, Clone)]
pub struct Source {
    pub source_id: String,
    pub display_name: String,
}

/// Expected file counts for one weekday.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FileCountStats {
    pub mean: f64,
    pub median: f64,
    pub mode: f64,
    pub stdev: f64,
    pub min: f64,
    pub max: f64,
}

/// Expected upload window for one weekday, hours in UTC.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UploadWindow {
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
    pub mean_hour: Option<NaiveTime>,
    pub median_hour: Option<NaiveTime>,
    pub mode_hour: Option<NaiveTime>,
    pub stdev_minutes: Option<f64>,
}

/// Expected row volume for one weekday, including the empty-file pattern.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RowVolumeStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub empty_mean: f64,
    pub empty_mode: i64,
}

/// Aggregate processing-outcome percentages over the source's history.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OutcomeStats {
    pub processed_pct: f64,
    pub empty_pct: f64,
    pub failed_pct: f64,
    pub stopped_pct: f64,
    pub duplicated_pct: f64,
    pub processed_count: i64,
    pub empty_count: i64,
    pub failed_count: i64,
    pub stopped_count: i64,
    pub duplicated_count: i64,
}

/// Statistical baseline of normal behavior for one source, broken down by
/// day of week. Built by the profile-extraction collaborator and read-only
/// for the detectors. A weekday absent from a map means "no expectation";
/// a zero-valued entry is a valid quiet day.
#[derive(Debug, Clone)]
pub struct SourceProfile {
    pub source_id: String,
    pub source_name: String,
    pub file_count_by_weekday: HashMap<Weekday, FileCountStats>,
    pub upload_window_by_weekday: HashMap<Weekday, UploadWindow>,
    pub row_volume_by_weekday: HashMap<Weekday, RowVolumeStats>,
    pub outcomes: OutcomeStats,
    pub notes: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Processed,
    Failure,
    Stopped,
    Deleted,
    Other,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Processed => "processed",
            FileStatus::Failure => "failure",
            FileStatus::Stopped => "stopped",
            FileStatus::Deleted => "deleted",
            FileStatus::Other => "other",
        }
    }

    /// Lenient parse for inventory feeds; unrecognized statuses land in
    /// `Other` rather than failing the row.
    pub fn parse(value: &str) -> FileStatus {
        match value.trim().to_ascii_lowercase().as_str() {
            "processed" => FileStatus::Processed,
            "failure" | "failed" => FileStatus::Failure,
            "stopped" => FileStatus::Stopped,
            "deleted" => FileStatus::Deleted,
            _ => FileStatus::Other,
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed file instance from the inventory feed.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveredFile {
    pub filename: String,
    pub row_count: i64,
    pub uploaded_at: DateTime<Utc>,
    pub status: FileStatus,
    pub is_duplicate: bool,
}

/// Observed facts for one (source, execution date): today's deliveries and
/// the deliveries from the same weekday one week earlier.
#[derive(Debug, Clone, Default)]
pub struct DailyFacts {
    pub execution_date: NaiveDate,
    pub today_files: Vec<DeliveredFile>,
    pub last_week_files: Vec<DeliveredFile>,
}

impl DailyFacts {
    pub fn weekday(&self) -> Weekday {
        self.execution_date.weekday()
    }

    pub fn today_file_count(&self) -> usize {
        self.today_files.len()
    }

    pub fn today_total_rows(&self) -> i64 {
        self.today_files.iter().map(|f| f.row_count).sum()
    }

    pub fn today_empty_count(&self) -> usize {
        self.today_files.iter().filter(|f| f.row_count == 0).count()
    }

    pub fn today_duplicate_count(&self) -> usize {
        self.today_files.iter().filter(|f| f.is_duplicate).count()
    }

    pub fn today_failed_count(&self) -> usize {
        self.today_files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::Failure | FileStatus::Stopped))
            .count()
    }

    pub fn last_week_file_count(&self) -> usize {
        self.last_week_files.len()
    }

    pub fn last_week_total_rows(&self) -> i64 {
        self.last_week_files.iter().map(|f| f.row_count).sum()
    }
}

/// Incident severity. Ordered so that `Urgent` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Attention,
    Urgent,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Attention => "attention",
            Severity::Urgent => "urgent",
        }
    }
}

/// Derived per-source severity after aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallSeverity {
    Ok,
    Attention,
    Urgent,
}

impl OverallSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallSeverity::Ok => "ok",
            OverallSeverity::Attention => "attention",
            OverallSeverity::Urgent => "urgent",
        }
    }
}

/// Type-specific payload of a detected anomaly.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncidentKind {
    MissingFiles {
        expected_count: i64,
        received_count: i64,
        missing_count: i64,
        last_weekday_count: i64,
    },
    DuplicatedFile {
        filename: String,
        status: FileStatus,
    },
    FailedFile {
        filename: String,
        status: FileStatus,
        is_duplicate: bool,
    },
    UnexpectedEmptyFile {
        filename: String,
        expected_empty_mean: f64,
    },
    UnexpectedVolumeHigh {
        today_rows: i64,
        expected_mean: f64,
        expected_min: f64,
        expected_max: f64,
        deviation_pct: f64,
        last_weekday_rows: i64,
    },
    UnexpectedVolumeLow {
        today_rows: i64,
        expected_mean: f64,
        expected_min: f64,
        expected_max: f64,
        deviation_pct: f64,
        last_weekday_rows: i64,
    },
    LateUpload {
        filename: String,
        uploaded_at: DateTime<Utc>,
        delay_hours: f64,
    },
    PreviousPeriodUpload {
        filename: String,
        file_date: NaiveDate,
        lag_days: i64,
    },
}

impl IncidentKind {
    pub fn label(&self) -> &'static str {
        match self {
            IncidentKind::MissingFiles { .. } => "missing_files",
            IncidentKind::DuplicatedFile { .. } => "duplicated_file",
            IncidentKind::FailedFile { .. } => "failed_file",
            IncidentKind::UnexpectedEmptyFile { .. } => "unexpected_empty_file",
            IncidentKind::UnexpectedVolumeHigh { .. } => "unexpected_volume_high",
            IncidentKind::UnexpectedVolumeLow { .. } => "unexpected_volume_low",
            IncidentKind::LateUpload { .. } => "late_upload",
            IncidentKind::PreviousPeriodUpload { .. } => "previous_period_upload",
        }
    }
}

/// One flagged anomaly. Value object: created by a detector, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    #[serde(flatten)]
    pub kind: IncidentKind,
    pub severity: Severity,
    pub details: String,
}

/// Terminal artifact of the engine for one (source, execution date).
#[derive(Debug, Clone, Serialize)]
pub struct SourceFinding {
    pub source_id: String,
    pub source_name: String,
    pub incidents: Vec<Incident>,
    pub overall_severity: OverallSeverity,
    pub today_file_count: usize,
    pub today_total_rows: i64,
}

/// Three-letter weekday label used in incident details and reports.
pub fn weekday_abbr(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn file(rows: i64, status: FileStatus, dup: bool) -> DeliveredFile {
        DeliveredFile {
            filename: "orders_2025-09-08.csv".to_string(),
            row_count: rows,
            uploaded_at: Utc.with_ymd_and_hms(2025, 9, 8, 8, 30, 0).unwrap(),
            status,
            is_duplicate: dup,
        }
    }

    #[test]
    fn daily_facts_aggregates() {
        let facts = DailyFacts {
            execution_date: NaiveDate::from_ymd_opt(2025, 9, 8).unwrap(),
            today_files: vec![
                file(100, FileStatus::Processed, false),
                file(0, FileStatus::Failure, true),
                file(50, FileStatus::Stopped, false),
            ],
            last_week_files: vec![file(200, FileStatus::Processed, false)],
        };

        assert_eq!(facts.weekday(), Weekday::Mon);
        assert_eq!(facts.today_file_count(), 3);
        assert_eq!(facts.today_total_rows(), 150);
        assert_eq!(facts.today_empty_count(), 1);
        assert_eq!(facts.today_duplicate_count(), 1);
        assert_eq!(facts.today_failed_count(), 2);
        assert_eq!(facts.last_week_file_count(), 1);
        assert_eq!(facts.last_week_total_rows(), 200);
    }

    #[test]
    fn severity_orders_urgent_highest() {
        assert!(Severity::Urgent > Severity::Attention);
        assert!(Severity::Attention > Severity::Info);
        assert!(OverallSeverity::Urgent > OverallSeverity::Attention);
        assert!(OverallSeverity::Attention > OverallSeverity::Ok);
    }

    #[test]
    fn status_parse_is_lenient() {
        assert_eq!(FileStatus::parse("FAILED"), FileStatus::Failure);
        assert_eq!(FileStatus::parse("processed"), FileStatus::Processed);
        assert_eq!(FileStatus::parse("weird"), FileStatus::Other);
    }

    #[test]
    fn incident_serializes_with_type_tag() {
        let incident = Incident {
            kind: IncidentKind::PreviousPeriodUpload {
                filename: "orders_2025-08-01.csv".to_string(),
                file_date: NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(),
                lag_days: 38,
            },
            severity: Severity::Attention,
            details: "File from 2025-08-01 uploaded today (38 days lag). Possible backfill."
                .to_string(),
        };

        let value = serde_json::to_value(&incident).unwrap();
        assert_eq!(value["type"], "previous_period_upload");
        assert_eq!(value["severity"], "attention");
        assert_eq!(value["lag_days"], 38);
    }
}
