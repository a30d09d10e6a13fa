use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use bulwark::aggregation::ReportRecord;
use bulwark::app::App;
use bulwark::config::Config;
use bulwark::logging;
use bulwark::models::{
    AttackIpStat, AttackTypeStat, DefendLogDocument, ReportKind, TargetUrlStat, WafLogEntry,
};
use bulwark::report::{
    purge_before, ReportError, ReportService, RetentionOutcome, RETENTION_SCOPE,
};
use bulwark::time::StatisticsWindow;

#[derive(Parser)]
#[command(name = "bulwark-admin")]
#[command(about = "WAF attack report maintenance CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    AttackType,
    AttackIp,
    TargetUrl,
}

impl From<KindArg> for ReportKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::AttackType => ReportKind::AttackType,
            KindArg::AttackIp => ReportKind::AttackIp,
            KindArg::TargetUrl => ReportKind::TargetUrl,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create report and lock tables
    Init,
    /// Generate today's report once, under the same lock as the scheduler
    Run {
        #[arg(value_enum)]
        kind: KindArg,
        /// Print the generated rows as JSON instead of persisting them
        #[arg(long)]
        print: bool,
    },
    /// Delete source documents and report rows older than the given age
    Purge {
        /// Age in days (defaults to RETENTION_DAYS)
        #[arg(long)]
        days: Option<i64>,
    },
    /// Index WAF log entries from a JSON array file
    Ingest {
        /// Path to a JSON file holding an array of log entries
        path: String,
        /// Top-level domain id owning the entries
        #[arg(long)]
        top_domain_id: String,
        /// Sub-domain id owning the entries
        #[arg(long)]
        sub_domain_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let app = App::build(&config, None).await?;

    match cli.command {
        Commands::Init => {
            println!("✓ Database schema is ready");
        }
        Commands::Run { kind, print } => {
            let kind = ReportKind::from(kind);
            let now = Utc::now();
            let window = StatisticsWindow::day_of(now);
            let key = format!("{}:{}", config.lock.key_prefix, kind);
            let app = &app;

            let outcome = app
                .guard
                .run_guarded(&key, config.lock.wait(), || async move {
                    if print {
                        print_report(&app.service, kind, window).await.map(|_| 0)
                    } else {
                        persist_report(&app, kind, window).await
                    }
                })
                .await?;

            match outcome {
                Some(_) if print => {}
                Some(written) => println!("✓ Wrote {written} {kind} rows"),
                None => println!("⚠ Lock '{key}' is held by another instance, nothing done"),
            }
        }
        Commands::Purge { days } => {
            let days = days.unwrap_or(config.report.retention_days);
            let cutoff = Utc::now() - ChronoDuration::days(days);
            let key = format!("{}:{}", config.lock.key_prefix, RETENTION_SCOPE);

            let outcome = purge_before(
                &app.guard,
                &app.service,
                app.store.as_ref(),
                &key,
                config.lock.wait(),
                cutoff,
            )
            .await?;

            match outcome {
                Some(RetentionOutcome { documents, reports }) => println!(
                    "✓ Removed {documents} documents and {reports} report rows older than {days} days"
                ),
                None => println!("⚠ Lock '{key}' is held by another instance, nothing done"),
            }
        }
        Commands::Ingest {
            path,
            top_domain_id,
            sub_domain_id,
        } => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {path}"))?;
            let entries: Vec<WafLogEntry> =
                serde_json::from_str(&raw).with_context(|| format!("invalid log entries in {path}"))?;

            let total = entries.len();
            let mut documents = Vec::with_capacity(total);
            for entry in entries {
                match DefendLogDocument::from_entry(entry, &top_domain_id, &sub_domain_id) {
                    Ok(document) => documents.push(document),
                    Err(e) => println!("⚠ Skipping entry with bad timestamps: {e}"),
                }
            }

            let indexed = app.index.insert_logs(documents).await?;
            println!("✓ Indexed {indexed} of {total} entries");
        }
    }

    Ok(())
}

async fn persist_report(
    app: &App,
    kind: ReportKind,
    window: StatisticsWindow,
) -> Result<u64, ReportError> {
    let now = Utc::now();
    let store = app.store.as_ref();
    match kind {
        ReportKind::AttackType => {
            app.service
                .run_and_persist::<AttackTypeStat>(store, window, now)
                .await
        }
        ReportKind::AttackIp => {
            app.service
                .run_and_persist::<AttackIpStat>(store, window, now)
                .await
        }
        ReportKind::TargetUrl => {
            app.service
                .run_and_persist::<TargetUrlStat>(store, window, now)
                .await
        }
    }
}

async fn print_report(
    service: &ReportService,
    kind: ReportKind,
    window: StatisticsWindow,
) -> Result<(), ReportError> {
    match kind {
        ReportKind::AttackType => print_records::<AttackTypeStat>(service, window).await,
        ReportKind::AttackIp => print_records::<AttackIpStat>(service, window).await,
        ReportKind::TargetUrl => print_records::<TargetUrlStat>(service, window).await,
    }
}

async fn print_records<R: ReportRecord + Serialize>(
    service: &ReportService,
    window: StatisticsWindow,
) -> Result<(), ReportError> {
    let report = service.generate::<R>(window, Utc::now()).await?;
    match serde_json::to_string_pretty(&report.records) {
        Ok(json) => println!("{json}"),
        Err(e) => println!("⚠ Failed to render rows: {e}"),
    }
    Ok(())
}
