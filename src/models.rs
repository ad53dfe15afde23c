use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// A listed company as published in the exchange roster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Company {
    pub ticker: String,
    pub company_name: String,
    pub isin_number: String,
    pub date_of_listing: String,
    pub face_value: String,
    pub series: String,
    pub paid_up_value: String,
    pub market_lot: String,
}

impl Company {
    /// Company with only the identifying fields known
    pub fn named(ticker: &str, company_name: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            company_name: company_name.to_string(),
            isin_number: String::new(),
            date_of_listing: String::new(),
            face_value: String::new(),
            series: String::new(),
            paid_up_value: String::new(),
            market_lot: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Table,
    Link,
}

/// A report entry recovered from a company's filings page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filing {
    pub ticker: String,
    /// Financial year label such as `2023-24`; `unknown` when it could not be derived
    pub year: String,
    pub url: String,
    pub subject: String,
    /// Best date for the record (filing, broadcast, or year end)
    pub date: String,
    pub filing_date: String,
    pub broadcast_date: String,
    pub from_year: String,
    pub to_year: String,
    pub submission_type: String,
    pub method: ExtractionMethod,
}

impl Filing {
    pub fn has_known_year(&self) -> bool {
        !self.year.is_empty() && self.year != UNKNOWN
    }

    /// Whether the URL can be fetched at all
    pub fn has_usable_url(&self) -> bool {
        !self.url.is_empty() && self.url != UNKNOWN && !self.url.to_uppercase().contains("RSS")
    }
}

pub const UNKNOWN: &str = "unknown";

/// Kind of artifact retained in a report folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Pdf,
    Zip,
}

impl ArtifactKind {
    pub fn file_extension(&self) -> &'static str {
        match self {
            ArtifactKind::Pdf => "pdf",
            ArtifactKind::Zip => "zip",
        }
    }

    pub fn file_name(&self) -> String {
        format!("document.{}", self.file_extension())
    }

    pub fn other(&self) -> ArtifactKind {
        match self {
            ArtifactKind::Pdf => ArtifactKind::Zip,
            ArtifactKind::Zip => ArtifactKind::Pdf,
        }
    }
}

/// Sidecar written as `document_meta.json` next to the artifact
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilingMetadata {
    pub date: String,
    pub ticker: String,
    pub year: String,
    pub url: String,
    pub subject: String,
    pub company_name: String,
    pub isin_number: String,
    pub date_of_listing: String,
    pub filing_date: String,
    pub broadcast_date: String,
    pub from_year: String,
    pub to_year: String,
    pub submission_type: String,
    pub face_value: String,
    pub series: String,
    pub paid_up_value: String,
    pub market_lot: String,
    pub artifact: String,
    pub file_size: u64,
    pub downloaded_at: String,
}

impl FilingMetadata {
    pub fn new(filing: &Filing, company: &Company, kind: ArtifactKind, file_size: u64) -> Self {
        Self {
            date: filing.date.clone(),
            ticker: filing.ticker.clone(),
            year: filing.year.clone(),
            url: filing.url.clone(),
            subject: filing.subject.clone(),
            company_name: company.company_name.clone(),
            isin_number: company.isin_number.clone(),
            date_of_listing: company.date_of_listing.clone(),
            filing_date: filing.filing_date.clone(),
            broadcast_date: filing.broadcast_date.clone(),
            from_year: filing.from_year.clone(),
            to_year: filing.to_year.clone(),
            submission_type: filing.submission_type.clone(),
            face_value: company.face_value.clone(),
            series: company.series.clone(),
            paid_up_value: company.paid_up_value.clone(),
            market_lot: company.market_lot.clone(),
            artifact: kind.file_name(),
            file_size,
            downloaded_at: Local::now().to_rfc3339(),
        }
    }
}

/// Counters describing the quality of what the server handed back
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ArtifactStats {
    pub total_zip_attempts: usize,
    pub successful_extractions: usize,
    pub corrupted_zips: usize,
    pub misnamed_pdfs: usize,
    pub server_errors: usize,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CompanyStats {
    pub reports_found: usize,
    pub documents_downloaded: usize,
    pub already_complete: usize,
    pub metadata_saved: usize,
    pub failed_downloads: usize,
    pub skipped_reports: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub duration_seconds: f64,
    pub average_seconds_per_company: f64,
    pub companies_discovered: usize,
    pub companies_processed: usize,
    pub companies_with_reports: usize,
    pub reports_found: usize,
    pub documents_downloaded: usize,
    pub already_complete: usize,
    pub metadata_saved: usize,
    pub failed_downloads: usize,
    pub skipped_reports: usize,
    pub errors: usize,
    pub retry_successes: usize,
    pub retry_failures: usize,
    pub artifacts: ArtifactStats,
}

impl RunStats {
    pub fn started_now() -> Self {
        Self {
            start_time: Local::now(),
            end_time: None,
            duration_seconds: 0.0,
            average_seconds_per_company: 0.0,
            companies_discovered: 0,
            companies_processed: 0,
            companies_with_reports: 0,
            reports_found: 0,
            documents_downloaded: 0,
            already_complete: 0,
            metadata_saved: 0,
            failed_downloads: 0,
            skipped_reports: 0,
            errors: 0,
            retry_successes: 0,
            retry_failures: 0,
            artifacts: ArtifactStats::default(),
        }
    }

    pub fn absorb(&mut self, company: &CompanyStats) {
        self.companies_processed += 1;
        if company.reports_found > 0 {
            self.companies_with_reports += 1;
        }
        self.reports_found += company.reports_found;
        self.documents_downloaded += company.documents_downloaded;
        self.already_complete += company.already_complete;
        self.metadata_saved += company.metadata_saved;
        self.failed_downloads += company.failed_downloads;
        self.skipped_reports += company.skipped_reports;
        self.errors += company.errors;
    }

    pub fn finish(&mut self) {
        let end = Local::now();
        let elapsed = (end - self.start_time).num_milliseconds() as f64 / 1000.0;
        self.duration_seconds = elapsed.max(0.0);
        self.average_seconds_per_company = if self.companies_processed > 0 {
            self.duration_seconds / self.companies_processed as f64
        } else {
            0.0
        };
        self.end_time = Some(end);
    }

    /// Percentage of `part` in `whole`, rounded to one decimal
    pub fn rate(part: usize, whole: usize) -> Option<f64> {
        if whole == 0 {
            None
        } else {
            Some((part as f64 / whole as f64 * 1000.0).round() / 10.0)
        }
    }
}

/// A company whose filings page never loaded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedCompany {
    pub ticker: String,
    pub company_name: String,
    pub reason: String,
    pub failed_at: String,
}

/// A download that exhausted its attempts. The filing and its company are
/// kept whole so a later `--retry-only` run can write the sidecar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedDownload {
    pub filing: Filing,
    pub company: Company,
    pub reason: String,
    pub failed_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedItemsReport {
    pub generated_at: String,
    pub failed_companies: Vec<FailedCompany>,
    pub failed_downloads: Vec<FailedDownload>,
    pub total_failed_companies: usize,
    pub total_failed_downloads: usize,
}
