use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use sqlx::{PgPool, Row};
use tracing::warn;
use uuid::Uuid;

use crate::models::{
    DailyFacts, DeliveredFile, FileCountStats, FileStatus, OutcomeStats, RowVolumeStats, Source,
    SourceProfile, UploadWindow,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn weekday_index(day: Weekday) -> i16 {
    day.num_days_from_monday() as i16
}

fn weekday_from_index(index: i16) -> Option<Weekday> {
    match index {
        0 => Some(Weekday::Mon),
        1 => Some(Weekday::Tue),
        2 => Some(Weekday::Wed),
        3 => Some(Weekday::Thu),
        4 => Some(Weekday::Fri),
        5 => Some(Weekday::Sat),
        6 => Some(Weekday::Sun),
        _ => None,
    }
}

/// Registry of known sources, ordered by id for deterministic batches.
pub async fn fetch_sources(pool: &PgPool) -> anyhow::Result<Vec<Source>> {
    let rows = sqlx::query("SELECT id, display_name FROM file_watch.sources ORDER BY id")
        .fetch_all(pool)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| Source {
            source_id: row.get("id"),
            display_name: row.get("display_name"),
        })
        .collect())
}

/// Loads the statistical baseline for one source. `None` when the source
/// is unknown or no profile has been imported for it yet.
pub async fn fetch_profile(pool: &PgPool, source_id: &str) -> anyhow::Result<Option<SourceProfile>> {
    let source_row = sqlx::query("SELECT display_name FROM file_watch.sources WHERE id = $1")
        .bind(source_id)
        .fetch_optional(pool)
        .await?;
    let Some(source_row) = source_row else {
        return Ok(None);
    };

    let weekday_rows = sqlx::query(
        "SELECT weekday, mean_files, median_files, mode_files, stdev_files, min_files, max_files, \
         window_start, window_end, mean_hour, median_hour, mode_hour, hour_stdev_minutes, \
         min_rows, max_rows, mean_rows, median_rows, empty_mean, empty_mode \
         FROM file_watch.profile_weekdays WHERE source_id = $1 ORDER BY weekday",
    )
    .bind(source_id)
    .fetch_all(pool)
    .await?;

    let outcome_row = sqlx::query(
        "SELECT processed_pct, empty_pct, failed_pct, stopped_pct, duplicated_pct, \
         processed_count, empty_count, failed_count, stopped_count, duplicated_count, notes \
         FROM file_watch.profile_outcomes WHERE source_id = $1",
    )
    .bind(source_id)
    .fetch_optional(pool)
    .await?;

    if weekday_rows.is_empty() && outcome_row.is_none() {
        return Ok(None);
    }

    let mut profile = SourceProfile {
        source_id: source_id.to_string(),
        source_name: source_row.get("display_name"),
        file_count_by_weekday: Default::default(),
        upload_window_by_weekday: Default::default(),
        row_volume_by_weekday: Default::default(),
        outcomes: OutcomeStats::default(),
        notes: String::new(),
    };

    for row in weekday_rows {
        let Some(day) = weekday_from_index(row.get("weekday")) else {
            continue;
        };

        profile.file_count_by_weekday.insert(
            day,
            FileCountStats {
                mean: row.get("mean_files"),
                median: row.get("median_files"),
                mode: row.get("mode_files"),
                stdev: row.get("stdev_files"),
                min: row.get("min_files"),
                max: row.get("max_files"),
            },
        );

        let window_start: Option<NaiveTime> = row.get("window_start");
        let window_end: Option<NaiveTime> = row.get("window_end");
        if let (Some(window_start), Some(window_end)) = (window_start, window_end) {
            profile.upload_window_by_weekday.insert(
                day,
                UploadWindow {
                    window_start,
                    window_end,
                    mean_hour: row.get("mean_hour"),
                    median_hour: row.get("median_hour"),
                    mode_hour: row.get("mode_hour"),
                    stdev_minutes: row.get("hour_stdev_minutes"),
                },
            );
        }

        profile.row_volume_by_weekday.insert(
            day,
            RowVolumeStats {
                min: row.get("min_rows"),
                max: row.get("max_rows"),
                mean: row.get("mean_rows"),
                median: row.get("median_rows"),
                empty_mean: row.get("empty_mean"),
                empty_mode: row.get("empty_mode"),
            },
        );
    }

    if let Some(row) = outcome_row {
        profile.outcomes = OutcomeStats {
            processed_pct: row.get("processed_pct"),
            empty_pct: row.get("empty_pct"),
            failed_pct: row.get("failed_pct"),
            stopped_pct: row.get("stopped_pct"),
            duplicated_pct: row.get("duplicated_pct"),
            processed_count: row.get("processed_count"),
            empty_count: row.get("empty_count"),
            failed_count: row.get("failed_count"),
            stopped_count: row.get("stopped_count"),
            duplicated_count: row.get("duplicated_count"),
        };
        profile.notes = row.get("notes");
    }

    Ok(Some(profile))
}

async fn fetch_files_for_date(
    pool: &PgPool,
    source_id: &str,
    date: NaiveDate,
) -> anyhow::Result<Vec<DeliveredFile>> {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    let end = start + Duration::days(1);

    let rows = sqlx::query(
        "SELECT filename, row_count, uploaded_at, status, is_duplicate \
         FROM file_watch.delivered_files \
         WHERE source_id = $1 AND uploaded_at >= $2 AND uploaded_at < $3 \
         ORDER BY uploaded_at, filename",
    )
    .bind(source_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| DeliveredFile {
            filename: row.get("filename"),
            row_count: row.get("row_count"),
            uploaded_at: row.get("uploaded_at"),
            status: FileStatus::parse(row.get::<&str, _>("status")),
            is_duplicate: row.get("is_duplicate"),
        })
        .collect())
}

/// Observed deliveries for the execution date plus the comparable prior
/// weekday (seven days earlier). "Today" is calendar-date equality on the
/// upload timestamp in UTC; a day with no deliveries yields empty facts,
/// which is exactly what the missing-files rule needs to see.
pub async fn fetch_daily_facts(
    pool: &PgPool,
    source_id: &str,
    execution_date: NaiveDate,
) -> anyhow::Result<DailyFacts> {
    let today_files = fetch_files_for_date(pool, source_id, execution_date).await?;
    let last_week_files =
        fetch_files_for_date(pool, source_id, execution_date - Duration::days(7)).await?;

    Ok(DailyFacts {
        execution_date,
        today_files,
        last_week_files,
    })
}

#[derive(Debug, Default)]
pub struct ImportOutcome {
    pub inserted: usize,
    pub skipped: usize,
}

/// Imports the delivered-file inventory from a CSV feed. Malformed rows
/// (bad timestamps, missing columns) are logged and skipped rather than
/// failing the import.
pub async fn import_files_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
) -> anyhow::Result<ImportOutcome> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        source_id: String,
        display_name: Option<String>,
        filename: String,
        row_count: i64,
        uploaded_at: DateTime<Utc>,
        status: String,
        is_duplicate: bool,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut outcome = ImportOutcome::default();

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = match result {
            Ok(row) => row,
            Err(error) => {
                warn!(line = line + 2, %error, "skipping malformed inventory row");
                outcome.skipped += 1;
                continue;
            }
        };

        let display_name = row.display_name.unwrap_or_else(|| row.source_id.clone());
        sqlx::query(
            "INSERT INTO file_watch.sources (id, display_name) VALUES ($1, $2) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&row.source_id)
        .bind(&display_name)
        .execute(pool)
        .await?;

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));
        let status = FileStatus::parse(&row.status);

        let result = sqlx::query(
            "INSERT INTO file_watch.delivered_files \
             (id, source_id, filename, row_count, uploaded_at, status, is_duplicate, source_key) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (source_key) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(&row.source_id)
        .bind(&row.filename)
        .bind(row.row_count)
        .bind(row.uploaded_at)
        .bind(status.as_str())
        .bind(row.is_duplicate)
        .bind(&source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            outcome.inserted += 1;
        } else {
            outcome.skipped += 1;
        }
    }

    Ok(outcome)
}

/// Imports source profiles produced by the profile-extraction collaborator.
/// The document is a JSON array of per-source profiles; re-importing a
/// source replaces its weekday baselines.
pub async fn import_profiles_json(
    pool: &PgPool,
    json_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct WeekdayDoc {
        weekday: String,
        #[serde(default)]
        files: FileCountStats,
        upload: Option<UploadWindow>,
        #[serde(default)]
        rows: RowVolumeStats,
    }

    #[derive(serde::Deserialize)]
    struct ProfileDoc {
        source_id: String,
        source_name: String,
        #[serde(default)]
        notes: String,
        #[serde(default)]
        weekdays: Vec<WeekdayDoc>,
        outcomes: Option<OutcomeStats>,
    }

    let raw = std::fs::read_to_string(json_path)
        .with_context(|| format!("failed to read {}", json_path.display()))?;
    let docs: Vec<ProfileDoc> = serde_json::from_str(&raw)
        .with_context(|| format!("invalid profile document {}", json_path.display()))?;

    for doc in &docs {
        sqlx::query(
            "INSERT INTO file_watch.sources (id, display_name) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET display_name = EXCLUDED.display_name",
        )
        .bind(&doc.source_id)
        .bind(&doc.source_name)
        .execute(pool)
        .await?;

        sqlx::query("DELETE FROM file_watch.profile_weekdays WHERE source_id = $1")
            .bind(&doc.source_id)
            .execute(pool)
            .await?;

        for entry in &doc.weekdays {
            let day: Weekday = entry.weekday.parse().map_err(|_| {
                anyhow::anyhow!(
                    "invalid weekday '{}' in profile for source {}",
                    entry.weekday,
                    doc.source_id
                )
            })?;

            sqlx::query(
                "INSERT INTO file_watch.profile_weekdays \
                 (source_id, weekday, mean_files, median_files, mode_files, stdev_files, \
                  min_files, max_files, window_start, window_end, mean_hour, median_hour, \
                  mode_hour, hour_stdev_minutes, min_rows, max_rows, mean_rows, median_rows, \
                  empty_mean, empty_mode) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                  $17, $18, $19, $20)",
            )
            .bind(&doc.source_id)
            .bind(weekday_index(day))
            .bind(entry.files.mean)
            .bind(entry.files.median)
            .bind(entry.files.mode)
            .bind(entry.files.stdev)
            .bind(entry.files.min)
            .bind(entry.files.max)
            .bind(entry.upload.map(|w| w.window_start))
            .bind(entry.upload.map(|w| w.window_end))
            .bind(entry.upload.and_then(|w| w.mean_hour))
            .bind(entry.upload.and_then(|w| w.median_hour))
            .bind(entry.upload.and_then(|w| w.mode_hour))
            .bind(entry.upload.and_then(|w| w.stdev_minutes))
            .bind(entry.rows.min)
            .bind(entry.rows.max)
            .bind(entry.rows.mean)
            .bind(entry.rows.median)
            .bind(entry.rows.empty_mean)
            .bind(entry.rows.empty_mode)
            .execute(pool)
            .await?;
        }

        let outcomes = doc.outcomes.unwrap_or_default();
        sqlx::query(
            "INSERT INTO file_watch.profile_outcomes \
             (source_id, processed_pct, empty_pct, failed_pct, stopped_pct, duplicated_pct, \
              processed_count, empty_count, failed_count, stopped_count, duplicated_count, notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (source_id) DO UPDATE SET \
              processed_pct = EXCLUDED.processed_pct, empty_pct = EXCLUDED.empty_pct, \
              failed_pct = EXCLUDED.failed_pct, stopped_pct = EXCLUDED.stopped_pct, \
              duplicated_pct = EXCLUDED.duplicated_pct, processed_count = EXCLUDED.processed_count, \
              empty_count = EXCLUDED.empty_count, failed_count = EXCLUDED.failed_count, \
              stopped_count = EXCLUDED.stopped_count, duplicated_count = EXCLUDED.duplicated_count, \
              notes = EXCLUDED.notes",
        )
        .bind(&doc.source_id)
        .bind(outcomes.processed_pct)
        .bind(outcomes.empty_pct)
        .bind(outcomes.failed_pct)
        .bind(outcomes.stopped_pct)
        .bind(outcomes.duplicated_pct)
        .bind(outcomes.processed_count)
        .bind(outcomes.empty_count)
        .bind(outcomes.failed_count)
        .bind(outcomes.stopped_count)
        .bind(outcomes.duplicated_count)
        .bind(&doc.notes)
        .execute(pool)
        .await?;
    }

    Ok(docs.len())
}

/// Loads a small realistic dataset: two sources with weekday baselines and
/// one Monday of deliveries, enough to exercise every detector locally.
pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let sources = [
        ("220505", "Payments BR Settlement"),
        ("207936", "Acme Retail POS Feed"),
    ];
    for (id, name) in sources {
        sqlx::query(
            "INSERT INTO file_watch.sources (id, display_name) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET display_name = EXCLUDED.display_name",
        )
        .bind(id)
        .bind(name)
        .execute(pool)
        .await?;
    }

    // (source_id, weekdays, file stats (mean, min, max), window, row stats
    // (mean, median, min, max, empty_mean))
    let six = NaiveTime::from_hms_opt(6, 0, 0).context("invalid time")?;
    let nine = NaiveTime::from_hms_opt(9, 0, 0).context("invalid time")?;
    let five = NaiveTime::from_hms_opt(5, 0, 0).context("invalid time")?;
    let seven = NaiveTime::from_hms_opt(7, 0, 0).context("invalid time")?;

    let profiles: [(&str, std::ops::RangeInclusive<i16>, (f64, f64, f64), (NaiveTime, NaiveTime), (f64, f64, f64, f64, f64)); 2] = [
        (
            "220505",
            0..=4,
            (18.0, 16.0, 22.0),
            (six, nine),
            (612_000.0, 600_000.0, 400_000.0, 900_000.0, 0.1),
        ),
        (
            "207936",
            0..=6,
            (6.0, 4.0, 8.0),
            (five, seven),
            (80_000.0, 75_000.0, 20_000.0, 150_000.0, 0.2),
        ),
    ];

    for (source_id, weekdays, files, window, rows) in profiles {
        for weekday in weekdays {
            sqlx::query(
                "INSERT INTO file_watch.profile_weekdays \
                 (source_id, weekday, mean_files, median_files, mode_files, stdev_files, \
                  min_files, max_files, window_start, window_end, \
                  min_rows, max_rows, mean_rows, median_rows, empty_mean, empty_mode) \
                 VALUES ($1, $2, $3, $3, $3, 2, $4, $5, $6, $7, $8, $9, $10, $11, $12, 0) \
                 ON CONFLICT (source_id, weekday) DO NOTHING",
            )
            .bind(source_id)
            .bind(weekday)
            .bind(files.0)
            .bind(files.1)
            .bind(files.2)
            .bind(window.0)
            .bind(window.1)
            .bind(rows.2)
            .bind(rows.3)
            .bind(rows.0)
            .bind(rows.1)
            .bind(rows.4)
            .execute(pool)
            .await?;
        }
    }

    let outcomes = [
        ("220505", 92.5, 2.1, 3.4, 1.2, 0.8, "Settlement batches arrive in one morning burst."),
        ("207936", 81.0, 14.5, 2.5, 1.0, 1.0, "POS entity files are empty by design."),
    ];
    for (source_id, processed, empty, failed, stopped, duplicated, notes) in outcomes {
        sqlx::query(
            "INSERT INTO file_watch.profile_outcomes \
             (source_id, processed_pct, empty_pct, failed_pct, stopped_pct, duplicated_pct, notes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (source_id) DO NOTHING",
        )
        .bind(source_id)
        .bind(processed)
        .bind(empty)
        .bind(failed)
        .bind(stopped)
        .bind(duplicated)
        .bind(notes)
        .execute(pool)
        .await?;
    }

    // One Monday of deliveries (2025-09-08) plus the comparable prior
    // Monday, covering a short delivery, a failure, a late upload, a
    // known-empty POS file, and a backfill.
    let files = [
        ("seed-001", "220505", "settlement_2025-09-08_a.csv", 152_000_i64, "2025-09-08T06:30:00Z", "processed", false),
        ("seed-002", "220505", "settlement_2025-09-08_b.csv", 148_000, "2025-09-08T06:45:00Z", "processed", false),
        ("seed-003", "220505", "settlement_2025-09-08_c.csv", 0, "2025-09-08T07:10:00Z", "failure", false),
        ("seed-004", "220505", "settlement_2025-09-08_d.csv", 95_000, "2025-09-08T14:10:00Z", "processed", false),
        ("seed-005", "220505", "settlement_2025-09-01_a.csv", 300_000, "2025-09-01T06:20:00Z", "processed", false),
        ("seed-006", "220505", "settlement_2025-09-01_b.csv", 310_000, "2025-09-01T06:40:00Z", "processed", false),
        ("seed-007", "207936", "BR_POS_daily_2025-09-08.csv", 0, "2025-09-08T05:30:00Z", "processed", false),
        ("seed-008", "207936", "BR_web_daily_2025-09-08.csv", 45_000, "2025-09-08T05:35:00Z", "processed", false),
        ("seed-009", "207936", "BR_web_daily_2025-08-15.csv", 12_000, "2025-09-08T05:40:00Z", "processed", false),
        ("seed-010", "207936", "BR_store_daily_2025-09-08.csv", 30_000, "2025-09-08T05:45:00Z", "stopped", true),
        ("seed-011", "207936", "BR_web_daily_2025-09-01.csv", 52_000, "2025-09-01T05:30:00Z", "processed", false),
    ];

    for (source_key, source_id, filename, rows, uploaded_at, status, is_duplicate) in files {
        let uploaded_at = DateTime::parse_from_rfc3339(uploaded_at)
            .context("invalid seed timestamp")?
            .with_timezone(&Utc);

        sqlx::query(
            "INSERT INTO file_watch.delivered_files \
             (id, source_id, filename, row_count, uploaded_at, status, is_duplicate, source_key) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (source_key) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(source_id)
        .bind(filename)
        .bind(rows)
        .bind(uploaded_at)
        .bind(status)
        .bind(is_duplicate)
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    Ok(())
}
