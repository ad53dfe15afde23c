//! The per-company pipeline and the run loop around it

use chrono::Local;
use tracing::{error, info, warn};

use crate::config::{Config, WaitConfig};
use crate::downloader::{Downloaded, Downloader};
use crate::errors::{Result, ScraperError};
use crate::extract::{extract_filings, select_downloadable};
use crate::http::ArtifactFetcher;
use crate::models::{
    ArtifactStats, Company, CompanyStats, FailedCompany, FailedDownload, FailedItemsReport, Filing,
    FilingMetadata, RunStats,
};
use crate::page;
use crate::render::{company_page_url, PageRenderer};
use crate::storage::StorageManager;

const PROGRESS_EVERY: usize = 5;

/// A download that failed in the main loop and gets one more pass
struct PendingDownload {
    filing: Filing,
    company: Company,
}

pub struct Crawler<R: PageRenderer, F: ArtifactFetcher> {
    renderer: R,
    downloader: Downloader<F>,
    storage: StorageManager,
    waits: WaitConfig,
    company_attempts: u32,
    min_bytes: u64,
    failed_companies: Vec<FailedCompany>,
    pending: Vec<PendingDownload>,
    artifacts: ArtifactStats,
}

impl<R: PageRenderer, F: ArtifactFetcher> Crawler<R, F> {
    pub fn new(renderer: R, fetcher: F, config: &Config) -> Self {
        Self {
            renderer,
            downloader: Downloader::new(fetcher, config),
            storage: StorageManager::new(&config.output_dir),
            waits: config.waits.clone(),
            company_attempts: config.retry.company_attempts.max(1),
            min_bytes: config.min_artifact_bytes,
            failed_companies: Vec::new(),
            pending: Vec::new(),
            artifacts: ArtifactStats::default(),
        }
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    fn record_failed_company(&mut self, company: &Company, reason: &str) {
        self.failed_companies.push(FailedCompany {
            ticker: company.ticker.clone(),
            company_name: company.company_name.clone(),
            reason: reason.to_string(),
            failed_at: Local::now().to_rfc3339(),
        });
    }

    /// Render the filings page, retrying until it validates and a quick probe
    /// finds document links. The last rendered page is used even when it
    /// does not validate.
    pub async fn load_company_page(&mut self, company: &Company) -> Result<String> {
        let ticker = &company.ticker;
        let url = company_page_url(ticker)?;

        for attempt in 0..self.company_attempts {
            let last_attempt = attempt + 1 == self.company_attempts;
            info!("Loading page for {} (attempt {}/{})", ticker, attempt + 1, self.company_attempts);

            let html = match self.renderer.render(&url, attempt).await {
                Ok(html) => html,
                Err(e) => {
                    error!("Failed to load page for {} on attempt {}: {}", ticker, attempt + 1, e);
                    if !last_attempt {
                        info!("Retrying {} in {:?}...", ticker, self.waits.company_retry_delay());
                        tokio::time::sleep(self.waits.company_retry_delay()).await;
                    }
                    continue;
                }
            };

            if !page::validate_page(&html, ticker) {
                warn!("Page loaded but no annual reports content for {} on attempt {}", ticker, attempt + 1);
                if last_attempt {
                    self.record_failed_company(company, "invalid_content");
                    return Ok(html);
                }
                tokio::time::sleep(self.waits.company_retry_delay()).await;
                continue;
            }

            info!("Successfully loaded valid content for {} on attempt {}", ticker, attempt + 1);
            tokio::time::sleep(self.waits.extraction_wait()).await;

            let probed = page::quick_probe(&html);
            if probed > 0 {
                info!("Confirmed {} document links for {} on attempt {}", probed, ticker, attempt + 1);
                return Ok(html);
            }

            warn!("Page loaded but 0 reports extracted for {} on attempt {}", ticker, attempt + 1);
            if last_attempt {
                self.record_failed_company(company, "no_reports_found");
                return Ok(html);
            }
            tokio::time::sleep(self.waits.company_retry_delay()).await;
        }

        self.record_failed_company(company, "page_load_failed");
        error!("Failed to load page for {} after {} attempts", ticker, self.company_attempts);
        Err(ScraperError::PageUnavailable {
            ticker: ticker.clone(),
            attempts: self.company_attempts,
        })
    }

    /// Write the sidecar for a stored artifact
    async fn save_metadata(&self, filing: &Filing, company: &Company, downloaded: Downloaded) -> Result<()> {
        let metadata = FilingMetadata::new(filing, company, downloaded.kind(), downloaded.size());
        self.storage.save_metadata(&metadata).await?;
        Ok(())
    }

    async fn process_filing(&mut self, filing: Filing, company: &Company, stats: &mut CompanyStats) -> Result<()> {
        if self.storage.is_complete(&filing.ticker, &filing.year, self.min_bytes).await? {
            info!("Already complete: {} {}", filing.ticker, filing.year);
            stats.already_complete += 1;
            return Ok(());
        }

        match self.downloader.download(&filing, &self.storage, &mut self.artifacts).await {
            Ok(downloaded) => {
                if matches!(downloaded, Downloaded::Saved { .. }) {
                    stats.documents_downloaded += 1;
                }
                self.save_metadata(&filing, company, downloaded).await?;
                stats.metadata_saved += 1;
            }
            Err(e) => {
                warn!("Download failed for {} {}: {}", filing.ticker, filing.year, e);
                stats.failed_downloads += 1;
                self.pending.push(PendingDownload {
                    filing,
                    company: company.clone(),
                });
            }
        }
        Ok(())
    }

    /// Load, extract and persist everything advertised for one company
    pub async fn process_company(&mut self, company: &Company) -> CompanyStats {
        let mut stats = CompanyStats::default();

        let html = match self.load_company_page(company).await {
            Ok(html) => html,
            Err(e) => {
                warn!("Could not load page for {}: {}", company.ticker, e);
                stats.errors += 1;
                return stats;
            }
        };

        page::log_structure(&html, &company.ticker);
        let filings = extract_filings(&html, company);
        if filings.is_empty() {
            warn!("No reports found for {} - performing deep analysis...", company.ticker);
            page::log_missing_reports(&html, &company.ticker);
            return stats;
        }
        stats.reports_found = filings.len();

        let selection = select_downloadable(filings);
        stats.skipped_reports = selection.skipped;

        for filing in selection.accepted {
            let label = format!("{} {}", filing.ticker, filing.year);
            if let Err(e) = self.process_filing(filing, company, &mut stats).await {
                error!("Error processing report {}: {}", label, e);
                stats.errors += 1;
            }
        }

        stats
    }

    /// Give every download that failed in the main loop one more try
    pub async fn retry_failed_downloads(&mut self, stats: &mut RunStats) -> Vec<FailedDownload> {
        let pending = std::mem::take(&mut self.pending);
        let mut still_failed = Vec::new();

        if pending.is_empty() {
            info!("No failed downloads to retry");
            return still_failed;
        }
        info!("Retrying {} failed downloads...", pending.len());

        for PendingDownload { filing, company } in pending {
            info!("Retrying download for {} {}", filing.ticker, filing.year);

            let outcome = match self.downloader.download(&filing, &self.storage, &mut self.artifacts).await {
                Ok(downloaded) => {
                    let saved = matches!(downloaded, Downloaded::Saved { .. });
                    self.save_metadata(&filing, &company, downloaded).await.map(|()| saved)
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(saved) => {
                    info!("Retry successful for {} {}", filing.ticker, filing.year);
                    stats.retry_successes += 1;
                    if saved {
                        stats.documents_downloaded += 1;
                    }
                    stats.metadata_saved += 1;
                }
                Err(e) => {
                    warn!("Retry failed for {} {}: {}", filing.ticker, filing.year, e);
                    stats.retry_failures += 1;
                    still_failed.push(FailedDownload {
                        filing,
                        company,
                        reason: e.to_string(),
                        failed_at: Local::now().to_rfc3339(),
                    });
                }
            }
        }

        still_failed
    }

    async fn save_failed_items(&self, failed_downloads: Vec<FailedDownload>) {
        let report = FailedItemsReport {
            generated_at: Local::now().to_rfc3339(),
            total_failed_companies: self.failed_companies.len(),
            total_failed_downloads: failed_downloads.len(),
            failed_companies: self.failed_companies.clone(),
            failed_downloads,
        };
        if let Err(e) = self.storage.save_failed_items(&report).await {
            error!("Error saving failed items report: {}", e);
        }
    }

    /// Retry only what an earlier run left in its failed-items report.
    /// Failed companies are carried over into the rewritten report.
    pub async fn retry_report(&mut self, report: FailedItemsReport) -> RunStats {
        let mut stats = RunStats::started_now();
        info!("Retry-only run: {} failed downloads from {}", report.failed_downloads.len(), report.generated_at);

        stats.failed_downloads = report.failed_downloads.len();
        self.failed_companies = report.failed_companies;
        self.pending = report
            .failed_downloads
            .into_iter()
            .map(|failed| PendingDownload {
                filing: failed.filing,
                company: failed.company,
            })
            .collect();

        let failed_downloads = self.retry_failed_downloads(&mut stats).await;
        self.save_failed_items(failed_downloads).await;

        stats.artifacts = self.artifacts.clone();
        stats.finish();
        info!("Retry-only run completed in {:.1}s", stats.duration_seconds);
        stats
    }

    /// Crawl `companies` in order, stopping after `max_companies` when set
    pub async fn run(&mut self, mut companies: Vec<Company>, max_companies: Option<usize>) -> RunStats {
        let mut stats = RunStats::started_now();
        info!("Starting NSE annual reports crawl");

        stats.companies_discovered = companies.len();
        if let Err(e) = self.storage.save_roster(&companies).await {
            error!("Error saving companies list: {}", e);
        }

        if let Some(max) = max_companies {
            companies.truncate(max);
            info!("Processing limited set: {} companies", companies.len());
        }

        let complete = self.storage.scan_completed();
        if complete > 0 {
            info!("{} report folders already complete in {}", complete, self.storage.base_dir().display());
        }

        let total = companies.len();
        for (i, company) in companies.iter().enumerate() {
            info!("Processing {}/{}: {}", i + 1, total, company.ticker);
            let company_stats = self.process_company(company).await;
            stats.absorb(&company_stats);

            if (i + 1) % PROGRESS_EVERY == 0 {
                info!("Progress: {}/{} companies processed", i + 1, total);
                info!("Stats - Reports: {}, Downloads: {}", stats.reports_found, stats.documents_downloaded);
            }
        }

        info!("Starting retry phase for failed downloads...");
        let failed_downloads = self.retry_failed_downloads(&mut stats).await;
        self.save_failed_items(failed_downloads).await;

        stats.artifacts = self.artifacts.clone();
        stats.finish();
        info!("Crawl completed in {:.1}s", stats.duration_seconds);
        stats
    }
}
