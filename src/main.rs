use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

mod aggregate;
mod api;
mod calendar;
mod config;
mod db;
mod enroll;
mod error;
mod models;
mod query;
mod report;
mod store;

use crate::config::Config;
use crate::db::PgStore;
use crate::enroll::EnrollmentService;
use crate::models::Cohort;
use crate::query::QueryService;
use crate::store::MemoryStore;

#[derive(Parser)]
#[command(name = "attendance-report")]
#[command(about = "Attendance aggregation and reporting for face-recognition gates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo directory and a morning of scans
    Seed {
        /// Day to place the demo scans on (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Append recognition events from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Upsert directory entries from a CSV file
    ImportPeople {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Print raw recognition records for a day
    Records {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        batch: Option<Cohort>,
        #[arg(long)]
        person_id: Option<String>,
        /// Use the built-in demo data instead of Postgres
        #[arg(long)]
        demo: bool,
    },
    /// Build an attendance report for a day
    Report {
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        batch: Option<Cohort>,
        /// Write markdown here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
        /// Emit JSON instead of markdown
        #[arg(long)]
        json: bool,
        #[arg(long)]
        demo: bool,
    },
    /// Serve the HTTP API
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("invalid ATTENDANCE_* configuration")?;
    let today = calendar::today(config.utc_offset);

    match cli.command {
        Commands::InitDb => {
            let store = connect(&config).await?;
            db::init_db(store.pool()).await?;
            println!("Schema ready.");
        }
        Commands::Seed { date } => {
            let store = connect(&config).await?;
            let window = calendar::DayWindow::new(date.unwrap_or(today), config.utc_offset);
            let inserted = db::seed(&store, &window).await?;
            println!("Seed data inserted ({inserted} events on {}).", window.date);
        }
        Commands::Import { csv } => {
            let store = connect(&config).await?;
            let inserted = db::import_events_csv(&store, &csv).await?;
            println!("Inserted {inserted} events from {}.", csv.display());
        }
        Commands::ImportPeople { csv } => {
            let store = connect(&config).await?;
            let upserted = db::import_people_csv(&store, &csv).await?;
            println!("Upserted {upserted} people from {}.", csv.display());
        }
        Commands::Records {
            date,
            batch,
            person_id,
            demo,
        } => {
            let date = date.unwrap_or(today);
            let service = query_service(&config, date, demo).await?;
            let records = service
                .get_records(date, batch, person_id.as_deref())
                .await?;

            if records.is_empty() {
                println!("No recognition events for {date}.");
                return Ok(());
            }

            for record in records.iter() {
                println!(
                    "- {} {} ({}, {}) via {} confidence {:.1}",
                    record.timestamp.with_timezone(&config.utc_offset).format("%H:%M:%S"),
                    record.name.as_deref().unwrap_or("unknown"),
                    record.person_id,
                    record
                        .batch
                        .map(|cohort| cohort.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    record.device_id,
                    record.confidence
                );
            }
        }
        Commands::Report {
            date,
            batch,
            out,
            json,
            demo,
        } => {
            let date = date.unwrap_or(today);
            let service = query_service(&config, date, demo).await?;
            let report = service.get_report(date, batch).await?;

            let rendered = if json {
                serde_json::to_string_pretty(&serde_json::json!({ "report": report }))?
            } else {
                report::render_markdown(&report, config.utc_offset)
            };

            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)?;
                    println!("Report written to {}.", path.display());
                }
                None => print!("{rendered}"),
            }
        }
        Commands::Serve => {
            let store = Arc::new(connect(&config).await?);
            let state = api::AppState {
                query: QueryService::new(
                    store.clone(),
                    store.clone(),
                    config.confidence,
                    config.utc_offset,
                ),
                enrollment: EnrollmentService::new(store.clone(), store),
                max_enroll_bytes: config.max_enroll_bytes,
            };
            api::serve(config.listen_addr, state).await?;
        }
    }

    Ok(())
}

async fn connect(config: &Config) -> anyhow::Result<PgStore> {
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_db_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(PgStore::new(pool))
}

async fn query_service(
    config: &Config,
    date: NaiveDate,
    demo: bool,
) -> anyhow::Result<QueryService> {
    if demo {
        let window = calendar::DayWindow::new(date, config.utc_offset);
        let store = Arc::new(MemoryStore::demo(&window));
        return Ok(QueryService::new(
            store.clone(),
            store,
            config.confidence,
            config.utc_offset,
        ));
    }

    let store = Arc::new(connect(config).await?);
    Ok(QueryService::new(
        store.clone(),
        store,
        config.confidence,
        config.utc_offset,
    ))
}
