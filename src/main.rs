use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

mod cli;

use cli::Cli;
use nse_reports::config::{Config, RendererKind};
use nse_reports::crawler::Crawler;
use nse_reports::http::HttpFetcher;
use nse_reports::models::{Company, FailedItemsReport, RunStats};
use nse_reports::render::{HttpRenderer, PageRenderer, WebDriverRenderer};
use nse_reports::roster;
use nse_reports::storage::{StorageManager, CORRUPTED_LOG, FAILED_ITEMS_REPORT, LOG_FILE, ROSTER_SNAPSHOT};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    cli.apply(&mut config);
    config.validate()?;

    // Set default log level to INFO if not specified
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "nse_reports=info");
    }

    // Log to both console and <output>/scraper.log
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let file_appender = tracing_appender::rolling::never(&config.output_dir, LOG_FILE);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(EnvFilter::from_default_env()),
        )
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_filter(EnvFilter::from_default_env()),
        )
        .init();

    info!("Output directory: {}", config.output_dir.display());
    info!("Max companies: {}", config.max_companies.map_or("All".to_string(), |n| n.to_string()));
    info!(
        "Company attempts: {}, download attempts: {}",
        config.retry.company_attempts, config.retry.download_attempts
    );
    info!(
        "Wait times: initial={}ms, content={}ms",
        config.waits.initial_wait_ms, config.waits.content_wait_ms
    );

    let fetcher = HttpFetcher::new(&config).context("Failed to build HTTP client")?;
    fetcher.warm_up().await;

    let previous = if config.retry_only { load_previous_failures(&config).await } else { None };
    let companies = match previous {
        Some(_) => Vec::new(),
        None => roster::load_companies(&fetcher, config.roster_path.as_deref()).await,
    };

    tokio::select! {
        stats = run_crawl(fetcher, &config, companies, previous) => {
            let stats = stats?;
            print_summary(&stats, &config);
            print_recommendations(&stats);
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Scraping interrupted by user");
        }
    }

    Ok(())
}

/// The failed-items report a retry-only run works from. Without a usable
/// report the run falls back to a full crawl.
async fn load_previous_failures(config: &Config) -> Option<FailedItemsReport> {
    info!("RETRY ONLY mode - loading failed items from previous run...");
    match StorageManager::new(&config.output_dir).load_failed_items().await {
        Ok(Some(report)) => Some(report),
        Ok(None) => {
            warn!(
                "No failed items report found at {}, continuing with normal scraping",
                config.output_dir.join(FAILED_ITEMS_REPORT).display()
            );
            None
        }
        Err(e) => {
            error!("Error loading failed items report: {}, continuing with normal scraping", e);
            None
        }
    }
}

async fn run_crawl(
    fetcher: HttpFetcher,
    config: &Config,
    companies: Vec<Company>,
    previous: Option<FailedItemsReport>,
) -> Result<RunStats> {
    match config.render.kind {
        RendererKind::WebDriver => {
            info!("Rendering pages through WebDriver at {}", config.render.webdriver_url);
            let renderer = WebDriverRenderer::new(config).context("Failed to build WebDriver client")?;
            Ok(crawl(renderer, fetcher, config, companies, previous).await)
        }
        RendererKind::Http => {
            warn!("Rendering pages without a browser; script-driven listings may come back empty");
            let renderer = HttpRenderer::new(fetcher.client().clone());
            Ok(crawl(renderer, fetcher, config, companies, previous).await)
        }
    }
}

async fn crawl<R: PageRenderer>(
    renderer: R,
    fetcher: HttpFetcher,
    config: &Config,
    companies: Vec<Company>,
    previous: Option<FailedItemsReport>,
) -> RunStats {
    let mut crawler = Crawler::new(renderer, fetcher, config);
    match previous {
        Some(report) => crawler.retry_report(report).await,
        None => crawler.run(companies, config.max_companies).await,
    }
}

fn rate_line(label: &str, part: usize, whole: usize) {
    if let Some(rate) = RunStats::rate(part, whole) {
        println!("  {}: {}%", label, rate);
    }
}

fn print_summary(stats: &RunStats, config: &Config) {
    let rule = "=".repeat(70);
    println!("\n{}", rule);
    println!("NSE ANNUAL REPORTS - FINAL SUMMARY");
    println!("{}", rule);

    println!("BASIC STATISTICS:");
    println!("  Companies discovered: {}", stats.companies_discovered);
    println!("  Companies processed: {}", stats.companies_processed);
    println!("  Companies with reports: {}", stats.companies_with_reports);
    println!("  Reports found: {}", stats.reports_found);
    println!("  Documents downloaded: {}", stats.documents_downloaded);
    println!("  Already complete: {}", stats.already_complete);
    println!("  Metadata saved: {}", stats.metadata_saved);
    println!("  Skipped reports: {}", stats.skipped_reports);
    println!("  Errors: {}", stats.errors);

    let artifacts = &stats.artifacts;
    println!("\nARCHIVE ANALYSIS:");
    println!("  Total ZIP attempts: {}", artifacts.total_zip_attempts);
    println!("  Successful extractions: {}", artifacts.successful_extractions);
    println!("  Corrupted ZIP files: {}", artifacts.corrupted_zips);
    println!("  Misnamed PDFs (fixed): {}", artifacts.misnamed_pdfs);
    println!("  Server error pages: {}", artifacts.server_errors);
    rate_line("ZIP success rate", artifacts.successful_extractions, artifacts.total_zip_attempts);
    rate_line("ZIP corruption rate", artifacts.corrupted_zips, artifacts.total_zip_attempts);

    let retry_attempts = stats.retry_successes + stats.retry_failures;
    println!("\nRETRY STATISTICS:");
    println!("  Failed downloads: {}", stats.failed_downloads);
    println!("  Retry attempts: {}", retry_attempts);
    println!("  Retry successes: {}", stats.retry_successes);
    println!("  Retry failures: {}", stats.retry_failures);
    rate_line("Retry success rate", stats.retry_successes, retry_attempts);

    let total = stats.duration_seconds as u64;
    println!("\nPERFORMANCE:");
    println!("  Total time: {}h {}m {}s", total / 3600, (total % 3600) / 60, total % 60);
    println!("  Avg time per company: {:.1}s", stats.average_seconds_per_company);
    rate_line("Processing success rate", stats.companies_with_reports, stats.companies_processed);
    rate_line("Download success rate", stats.documents_downloaded, stats.reports_found);

    let out = &config.output_dir;
    println!("\nOUTPUT:");
    println!("  Output directory: {}", out.display());
    println!("  Companies list: {}", out.join(ROSTER_SNAPSHOT).display());
    println!("  Main log: {}", out.join(LOG_FILE).display());
    println!("  Corruption log: {}", out.join(CORRUPTED_LOG).display());
    println!("  Failed items report: {}", out.join(FAILED_ITEMS_REPORT).display());
    println!("{}", rule);
}

fn print_recommendations(stats: &RunStats) {
    let artifacts = &stats.artifacts;
    println!("\nRECOMMENDATIONS:");

    if artifacts.corrupted_zips > 0 {
        println!("  Found {} corrupted ZIP files on the exchange server", artifacts.corrupted_zips);
        println!("  Check {} for details", CORRUPTED_LOG);
    }
    if artifacts.server_errors > 0 {
        println!("  Encountered {} server error pages", artifacts.server_errors);
        println!("  These may be temporary - try again later");
    }
    if artifacts.misnamed_pdfs > 0 {
        println!("  Fixed {} misnamed PDF files", artifacts.misnamed_pdfs);
    }

    let corruption_rate = RunStats::rate(artifacts.corrupted_zips, artifacts.total_zip_attempts).unwrap_or(0.0);
    if corruption_rate > 20.0 {
        println!("  High corruption rate detected - this is a server-side issue");
        println!("  Use --skip-corrupted for faster processing");
    } else if corruption_rate > 10.0 {
        println!("  Moderate corruption rate - some files may be temporarily unavailable");
    } else {
        println!("  Low corruption rate - server files are mostly healthy");
    }
}
