use std::process::ExitCode;
use std::sync::Arc;

use amt_storage::{PgStore, TrackerStore};
use amt_sync::{CrawlConfig, CrawlReport, CrawlSource};
use amt_web::{AppState, WebConfig};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Exit status an external scheduler watches for a crawl whose error rate
/// exceeded the threshold.
const EXIT_THRESHOLD_EXCEEDED: u8 = 2;

#[derive(Debug, Parser)]
#[command(name = "amt-cli")]
#[command(about = "AI Model Tracker crawlers and read API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Snapshot trending Hugging Face models for every tracked pipeline tag.
    CrawlModels,
    /// Import recent arXiv papers for every tracked category.
    CrawlPapers,
    /// Import leaderboard artifacts not yet stored.
    CrawlRankings,
    /// Apply pending database migrations.
    Migrate,
    /// Serve the read API.
    Serve,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let source = match cli.command {
        Commands::CrawlModels => CrawlSource::Models,
        Commands::CrawlPapers => CrawlSource::Papers,
        Commands::CrawlRankings => CrawlSource::Rankings,
        Commands::Migrate => {
            let config = CrawlConfig::from_env();
            let store = PgStore::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            store.migrate().await.context("applying migrations")?;
            println!("migrations applied");
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Serve => {
            let config = CrawlConfig::from_env();
            let web = WebConfig::from_env();
            let store: Arc<dyn TrackerStore> = Arc::new(
                PgStore::connect_lazy(&config.database_url).context("configuring database pool")?,
            );
            let state = AppState::new(store).with_window_page_size(web.window_page_size);
            amt_web::serve(state, web.port).await?;
            return Ok(ExitCode::SUCCESS);
        }
    };

    let config = CrawlConfig::from_env();
    let store: Arc<dyn TrackerStore> = Arc::new(
        PgStore::connect(&config.database_url)
            .await
            .context("connecting to database")?,
    );
    let report = amt_sync::run_crawl(source, &config, store).await?;
    print_report(&report);
    Ok(ExitCode::from(exit_status(&report)))
}

/// Process status for a finished crawl: the threshold breach is the only
/// non-zero outcome of a run that reached the end.
fn exit_status(report: &CrawlReport) -> u8 {
    if report.threshold_exceeded() {
        EXIT_THRESHOLD_EXCEEDED
    } else {
        0
    }
}

fn print_report(report: &CrawlReport) {
    println!(
        "crawl complete: run_id={} source={} partitions={} failed_partitions={} ok={} errors={} skipped={} error_rate={:.1}%",
        report.run_id,
        report.source_id,
        report.partitions,
        report.failed_partitions,
        report.tally.ok,
        report.tally.errors,
        report.tally.skipped,
        report.error_rate() * 100.0
    );
}
