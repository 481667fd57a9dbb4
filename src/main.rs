use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

mod config;
mod db;
mod engine;
mod error;
mod ingest;
mod metrics;
mod models;
mod opportunity;
mod report;
mod significance;
mod tiers;

#[cfg(test)]
mod test_support;

#[derive(Parser)]
#[command(name = "win-rate-drivers")]
#[command(about = "Win rate driver analysis over a snapshot of sales deals", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Markdown,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small set of sample deals
    Seed,
    /// Import deals from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Rank win rate drivers, opportunities and rep tiers
    Analyze {
        /// Read deals from this CSV instead of Postgres
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Only consider deals still open or closed on/after this date (Postgres source)
        #[arg(long, conflicts_with = "csv")]
        since: Option<NaiveDate>,
        #[command(flatten)]
        engine: config::EngineArgs,
        #[arg(long, value_enum, default_value_t = Format::Markdown)]
        format: Format,
        /// Write the report here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
        /// Store the report in Postgres
        #[arg(long)]
        persist: bool,
    },
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            let inserted = db::seed(&pool).await?;
            println!("Inserted {inserted} sample deals.");
        }
        Commands::Import { csv } => {
            let pool = connect().await?;
            let (inserted, issues) = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} deals from {}.", csv.display());
            if !issues.is_empty() {
                println!("{} rows had data quality issues:", issues.len());
                for issue in issues {
                    println!("- {issue}");
                }
            }
        }
        Commands::Analyze {
            csv,
            since,
            engine: engine_args,
            format,
            out,
            persist,
        } => {
            let config = engine_args.into_config()?;
            let pool = if persist || csv.is_none() {
                Some(connect().await?)
            } else {
                None
            };

            let deals = match (&csv, &pool) {
                (Some(path), _) => ingest::load_csv(path)?.deals,
                (None, Some(pool)) => db::fetch_deals(pool, since).await?,
                (None, None) => anyhow::bail!("no deal source: pass --csv or set DATABASE_URL"),
            };

            let summary = ingest::summarize(&deals);
            tracing::info!(
                total = summary.total_deals,
                won = summary.won,
                lost = summary.lost,
                open = summary.open,
                reps = summary.unique_reps,
                regions = summary.unique_regions,
                industries = summary.unique_industries,
                earliest_created = ?summary.earliest_created,
                latest_closed = ?summary.latest_closed,
                overall_win_rate = ?summary.overall_win_rate,
                avg_deal_amount = ?summary.avg_deal_amount,
                avg_cycle_days = ?summary.avg_cycle_days,
                "deal table summary"
            );

            let driver_report = engine::analyze(&deals, &config)?;
            let rendered = match format {
                Format::Markdown => report::render_markdown(&driver_report),
                Format::Json => report::to_json(&driver_report)?,
            };

            match out {
                Some(path) => {
                    std::fs::write(&path, rendered)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    println!("Report written to {}.", path.display());
                }
                None => println!("{rendered}"),
            }

            if let (true, Some(pool)) = (persist, &pool) {
                let run_id = db::save_report(pool, &driver_report).await?;
                tracing::info!(%run_id, "report stored");
            }
        }
    }

    Ok(())
}
