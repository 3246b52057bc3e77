use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Tunable thresholds behind the detection rules.
///
/// The defaults were calibrated against the historical September dataset
/// the engine was first validated on; operators can override any subset
/// from a JSON policy file, including the known-empty entity table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionPolicy {
    /// Missing-files severity escalates to urgent below this fraction of
    /// the weekday mean.
    pub urgent_missing_ratio: f64,
    /// Volume counts as high only above weekday max times this factor.
    pub volume_high_max_factor: f64,
    /// ... and only when the absolute deviation from the mean exceeds this.
    pub volume_high_deviation_pct: f64,
    /// Volume counts as low below weekday min times this factor.
    pub volume_low_min_factor: f64,
    /// Low volume escalates to urgent below this (negative) deviation.
    pub volume_low_urgent_deviation_pct: f64,
    /// Weekday empty-file mean above which empties are normal for the day.
    pub empty_day_mean_threshold: f64,
    /// Aggregate empty percentage above which the source is empty-heavy.
    pub empty_overall_pct_threshold: f64,
    /// Uploads later than this many minutes past the window end are late.
    pub late_threshold_minutes: i64,
    /// Filename dates older than this many days count as backfills.
    pub backfill_lag_days: i64,
    /// Entities that are empty by design, keyed by source id. An empty
    /// file whose name contains one of the fragments (case-insensitive)
    /// is never flagged.
    pub known_empty: HashMap<String, Vec<String>>,
}

impl Default for DetectionPolicy {
    fn default() -> Self {
        DetectionPolicy {
            urgent_missing_ratio: 0.5,
            volume_high_max_factor: 1.5,
            volume_high_deviation_pct: 50.0,
            volume_low_min_factor: 0.5,
            volume_low_urgent_deviation_pct: -70.0,
            empty_day_mean_threshold: 0.5,
            empty_overall_pct_threshold: 20.0,
            late_threshold_minutes: 240,
            backfill_lag_days: 7,
            known_empty: default_known_empty(),
        }
    }
}

/// Structurally-empty entities observed in production: POS channel feeds
/// that never carry rows and a handful of pilot entities.
fn default_known_empty() -> HashMap<String, Vec<String>> {
    let table = [
        ("207936", vec!["POS"]),
        ("207938", vec!["POS_MARKETPLACE"]),
        ("220504", vec!["Innovation", "POC", "safemode"]),
    ];

    table
        .into_iter()
        .map(|(source_id, fragments)| {
            (
                source_id.to_string(),
                fragments.into_iter().map(str::to_string).collect(),
            )
        })
        .collect()
}

impl DetectionPolicy {
    pub fn from_file(path: &Path) -> anyhow::Result<DetectionPolicy> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read policy file {}", path.display()))?;
        let policy: DetectionPolicy = serde_json::from_str(&raw)
            .with_context(|| format!("invalid policy file {}", path.display()))?;
        Ok(policy)
    }

    /// True when the filename matches a known always-empty entity for
    /// this source.
    pub fn is_known_empty(&self, source_id: &str, filename: &str) -> bool {
        let Some(fragments) = self.known_empty.get(source_id) else {
            return false;
        };
        let lowered = filename.to_lowercase();
        fragments
            .iter()
            .any(|fragment| lowered.contains(&fragment.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let policy = DetectionPolicy::default();
        assert_eq!(policy.late_threshold_minutes, 240);
        assert_eq!(policy.backfill_lag_days, 7);
        assert!((policy.urgent_missing_ratio - 0.5).abs() < f64::EPSILON);
        assert!((policy.volume_high_max_factor - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn known_empty_matches_are_case_insensitive() {
        let policy = DetectionPolicy::default();
        assert!(policy.is_known_empty("207936", "BR_pos_daily_2025-09-08.csv"));
        assert!(policy.is_known_empty("220504", "acme_SAFEMODE_feed.csv"));
        assert!(!policy.is_known_empty("207936", "BR_web_daily.csv"));
        assert!(!policy.is_known_empty("999999", "anything_POS.csv"));
    }

    #[test]
    fn partial_policy_file_overrides_keep_defaults() {
        let policy: DetectionPolicy =
            serde_json::from_str(r#"{"backfill_lag_days": 14}"#).unwrap();
        assert_eq!(policy.backfill_lag_days, 14);
        assert_eq!(policy.late_threshold_minutes, 240);
        assert!(policy.is_known_empty("207936", "pos_feed.csv"));
    }
}
