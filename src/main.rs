use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use authsentry::config::AppConfig;
use authsentry::dispatch::FailureLog;
use authsentry::ingest::csv_file::CsvFileSource;
use authsentry::ingest::synthetic::SyntheticSource;
use authsentry::ingest::EventSource;
use authsentry::pipeline::{RunState, RunSummary, WatchOptions};
use authsentry::storage::{self, AlertRow};

#[derive(Parser)]
#[command(
    name = "authsentry",
    about = "Anomaly detection and alert dispatch for identity event streams",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (AUTHSENTRY_CONFIG sets the default path)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a CSV export and dispatch alerts for what it contains
    Scan {
        /// CSV file, login-event or threat-feed flavor
        #[arg(long)]
        input: PathBuf,

        /// Alert database path (overrides configuration)
        #[arg(long)]
        db: Option<PathBuf>,

        /// JSON summary for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Watch a live event stream and alert as events arrive
    Watch {
        /// Replay a CSV file instead of generating synthetic events
        #[arg(long)]
        input: Option<PathBuf>,

        /// Stop after this many events
        #[arg(long)]
        count: Option<u64>,

        /// Milliseconds between ingestion ticks (overrides configuration)
        #[arg(long)]
        tick_ms: Option<u64>,

        /// Alert database path (overrides configuration)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// List recent alerts from the sink
    Alerts {
        /// Maximum rows to show
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Alert database path (overrides configuration)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Export every alert to this CSV file instead of listing
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Show recorded delivery failures
    Failures {
        /// Maximum records to show
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Failure log path (overrides configuration)
        #[arg(long)]
        log: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Scan { input, db, json } => {
            if let Some(db) = db {
                config.storage.database_path = db;
            }
            let pool = storage::open_pool(&config.storage.database_path)?;
            let summary = authsentry::scan(&input, &config, &pool).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
            if summary.state == RunState::Aborted {
                anyhow::bail!("scan aborted before completion");
            }
        }

        Commands::Watch {
            input,
            count,
            tick_ms,
            db,
        } => {
            if let Some(db) = db {
                config.storage.database_path = db;
            }
            if let Some(tick_ms) = tick_ms {
                config.stream.tick_ms = tick_ms;
            }
            let pool = storage::open_pool(&config.storage.database_path)?;

            let source: Box<dyn EventSource> = match &input {
                Some(path) => {
                    tracing::info!(input = %path.display(), "Starting watch (replay)");
                    Box::new(CsvFileSource::open(path)?)
                }
                None => {
                    tracing::info!("Starting watch (synthetic events)");
                    Box::new(SyntheticSource::new())
                }
            };
            let mut options = WatchOptions::from_config(&config);
            options.budget = count;

            let (stop, shutdown) = tokio::sync::oneshot::channel();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = stop.send(());
                }
            });

            let summary = authsentry::watch(source, &config, &pool, shutdown, options).await?;
            print_summary(&summary);
        }

        Commands::Alerts { limit, db, csv } => {
            if let Some(db) = db {
                config.storage.database_path = db;
            }
            let pool = storage::open_pool(&config.storage.database_path)?;

            if let Some(csv) = csv {
                let exported = storage::export_alerts_csv(&pool, &csv)?;
                println!("Exported {} alerts to {}.", exported, csv.display());
            } else {
                let rows = storage::list_recent_alerts(&pool, limit)?;
                if rows.is_empty() {
                    println!("No alerts recorded.");
                } else {
                    println!(
                        "{:<17} | {:<5} | {:<6} | {:<25} | Details",
                        "Type", "Score", "Status", "Dispatched"
                    );
                    println!(
                        "{:-<17}-|-{:-<5}-|-{:-<6}-|-{:-<25}-|-{:-<40}",
                        "", "", "", "", ""
                    );
                    for row in rows {
                        println!(
                            "{:<17} | {:<5} | {:<6} | {:<25} | {}",
                            row.alert_type,
                            row.risk_score,
                            row.status,
                            row.dispatched_at,
                            describe_row(&row)
                        );
                    }
                }
            }
        }

        Commands::Failures { limit, log } => {
            let path = log.unwrap_or_else(|| config.storage.failure_log_path.clone());
            let records = FailureLog::read_all(&path)?;
            if records.is_empty() {
                println!("No delivery failures recorded.");
            } else {
                println!(
                    "Showing {} of {} failures from {}:\n",
                    limit.min(records.len()),
                    records.len(),
                    path.display()
                );
                for record in records.iter().rev().take(limit) {
                    println!(
                        "{} | {} | {}",
                        record.timestamp.to_rfc3339(),
                        record.alert_summary,
                        record.error_reason
                    );
                }
            }
        }
    }

    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\n=== AuthSentry Run Summary ===");
    println!("State:           {}", summary.state.as_str());
    println!("Events ingested: {}", summary.events_ingested);
    println!("Rows dropped:    {}", summary.rows_dropped);
    println!("Findings:        {}", summary.findings);
    println!("Alerts sent:     {}", summary.alerts_sent);
    println!("Suppressed:      {}", summary.alerts_suppressed);
    println!("Below threshold: {}", summary.alerts_below_threshold);
    println!("Failed:          {}", summary.alerts_failed);
    println!("==============================\n");
    if summary.is_quiet() {
        println!("No alerts raised.");
    }
}

fn describe_row(row: &AlertRow) -> String {
    match row.alert_type.as_str() {
        "high_frequency" => format!(
            "{} hit {} times during {}",
            row.ip_address.as_deref().unwrap_or("?"),
            row.count.map(|v| v.to_string()).unwrap_or_else(|| "?".into()),
            row.hour.as_deref().unwrap_or("?")
        ),
        "impossible_travel" => format!(
            "{} seen in {} countries on {}",
            row.user_id.as_deref().unwrap_or("?"),
            row.countries.map(|v| v.to_string()).unwrap_or_else(|| "?".into()),
            row.date.as_deref().unwrap_or("?")
        ),
        "threat" => format!(
            "{} from {} (confidence {})",
            row.threat_type.as_deref().unwrap_or("?"),
            row.ip_address.as_deref().unwrap_or("?"),
            row.confidence.map(|v| v.to_string()).unwrap_or_else(|| "?".into())
        ),
        _ => String::new(),
    }
}
