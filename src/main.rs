use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod aggregate;
mod db;
mod detect;
mod models;
mod policy;
mod report;

use policy::DetectionPolicy;

#[derive(Parser)]
#[command(name = "file-watch")]
#[command(about = "Daily file-delivery anomaly detection for the payments pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import the delivered-file inventory from a CSV feed
    ImportFiles {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Import source profiles from a JSON document
    ImportProfiles {
        #[arg(long)]
        json: PathBuf,
    },
    /// Run all detectors for one execution date
    Detect {
        #[arg(long)]
        date: NaiveDate,
        /// Override detection thresholds from a JSON policy file
        #[arg(long)]
        policy: Option<PathBuf>,
        /// Emit the findings map as JSON instead of the summary
        #[arg(long)]
        json: bool,
    },
    /// Write the findings report text for one execution date
    Report {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        policy: Option<PathBuf>,
        #[arg(long, default_value = "findings.txt")]
        out: PathBuf,
    },
}

fn load_policy(path: Option<&PathBuf>) -> anyhow::Result<DetectionPolicy> {
    match path {
        Some(path) => DetectionPolicy::from_file(path),
        None => Ok(DetectionPolicy::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportFiles { csv } => {
            let outcome = db::import_files_csv(&pool, &csv).await?;
            println!(
                "Inserted {} files from {} ({} skipped).",
                outcome.inserted,
                csv.display(),
                outcome.skipped
            );
        }
        Commands::ImportProfiles { json } => {
            let imported = db::import_profiles_json(&pool, &json).await?;
            println!("Imported {imported} profiles from {}.", json.display());
        }
        Commands::Detect { date, policy, json } => {
            let policy = load_policy(policy.as_ref())?;
            let findings = aggregate::run_all_detectors(&pool, date, &policy).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&findings)?);
                return Ok(());
            }

            if findings.is_empty() {
                println!("No sources registered.");
                return Ok(());
            }

            println!("Findings for {date}:");
            for finding in findings.values() {
                println!("{}", report::summary_line(finding));
                for incident in &finding.incidents {
                    println!(
                        "    [{}] {}: {}",
                        incident.severity.as_str().to_uppercase(),
                        incident.kind.label(),
                        incident.details
                    );
                }
            }
        }
        Commands::Report { date, policy, out } => {
            let policy = load_policy(policy.as_ref())?;
            let findings = aggregate::run_all_detectors(&pool, date, &policy).await?;
            let text = report::format_findings_for_report(&findings, date);
            std::fs::write(&out, text)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
