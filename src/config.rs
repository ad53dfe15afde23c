//! Centralized configuration management for nse-reports

use std::path::PathBuf;
use std::time::Duration;
use anyhow::{Result, Context};

/// Site endpoints used by the crawler
pub struct NseSite;

impl NseSite {
    /// Base URL used to resolve relative document links
    pub const BASE_URL: &'static str = "https://www.nseindia.com";
    /// Annual reports listing page (takes `?symbol=<TICKER>`)
    pub const ANNUAL_REPORTS_URL: &'static str =
        "https://www.nseindia.com/companies-listing/corporate-filings-annual-reports";
    /// Published equity roster
    pub const SECURITIES_CSV_URL: &'static str =
        "https://nsearchives.nseindia.com/content/equities/EQUITY_L.csv";
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the `<TICKER>/<YEAR>/` tree
    pub output_dir: PathBuf,
    /// Local roster CSV; the published roster is downloaded when unset
    pub roster_path: Option<PathBuf>,
    /// Stop after this many companies
    pub max_companies: Option<usize>,
    /// Only retry the downloads listed in the previous failed-items report
    pub retry_only: bool,
    /// Smallest artifact ever kept on disk (bytes)
    pub min_artifact_bytes: u64,
    pub retry: RetryConfig,
    pub waits: WaitConfig,
    pub http: HttpConfig,
    pub render: RenderConfig,
}

/// Fixed-count retry settings
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Filings page load attempts per company
    pub company_attempts: u32,
    /// Download attempts per artifact
    pub download_attempts: u32,
}

/// Pauses between steps, in milliseconds
#[derive(Debug, Clone)]
pub struct WaitConfig {
    pub request_delay_ms: u64,
    pub initial_wait_ms: u64,
    pub content_wait_ms: u64,
    pub extraction_wait_ms: u64,
    pub download_prep_wait_ms: u64,
    pub company_retry_delay_ms: u64,
    pub download_retry_delay_ms: u64,
    /// Extra growth per retry attempt for the page waits
    pub initial_wait_step_ms: u64,
    pub content_wait_step_ms: u64,
    pub download_retry_step_ms: u64,
    /// Pause after each scroll used to trigger lazy loading
    pub scroll_pause_ms: u64,
    /// Base of the final dynamic-content wait after scrolling
    pub settle_wait_ms: u64,
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Timeout for page and roster requests, in seconds
    pub timeout_seconds: u64,
    /// Timeout for artifact downloads, in seconds
    pub download_timeout_seconds: u64,
    /// User agent string
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RendererKind {
    /// Drive a headless browser through a WebDriver endpoint
    WebDriver,
    /// Plain GET of the page markup
    Http,
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub kind: RendererKind,
    pub webdriver_url: String,
    /// Upper bound for each element wait, in seconds
    pub element_timeout_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            company_attempts: 4,
            download_attempts: 4,
        }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: 800,
            initial_wait_ms: 6_000,
            content_wait_ms: 5_000,
            extraction_wait_ms: 3_000,
            download_prep_wait_ms: 2_000,
            company_retry_delay_ms: 7_000,
            download_retry_delay_ms: 3_000,
            initial_wait_step_ms: 3_000,
            content_wait_step_ms: 2_000,
            download_retry_step_ms: 2_000,
            scroll_pause_ms: 2_000,
            settle_wait_ms: 5_000,
        }
    }
}

impl WaitConfig {
    /// Longer pauses for a slow or throttling server
    pub fn extra_patient() -> Self {
        Self {
            initial_wait_ms: 8_000,
            content_wait_ms: 7_000,
            extraction_wait_ms: 5_000,
            download_prep_wait_ms: 3_000,
            company_retry_delay_ms: 10_000,
            ..Self::default()
        }
    }

    /// No pauses at all
    #[cfg(test)]
    pub(crate) fn instant() -> Self {
        Self {
            request_delay_ms: 0,
            initial_wait_ms: 0,
            content_wait_ms: 0,
            extraction_wait_ms: 0,
            download_prep_wait_ms: 0,
            company_retry_delay_ms: 0,
            download_retry_delay_ms: 0,
            initial_wait_step_ms: 0,
            content_wait_step_ms: 0,
            download_retry_step_ms: 0,
            scroll_pause_ms: 0,
            settle_wait_ms: 0,
        }
    }

    /// Initial wait after navigation; grows with each attempt
    pub fn initial_wait(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.initial_wait_ms + self.initial_wait_step_ms * attempt as u64)
    }

    /// Wait for rendered content; grows with each attempt
    pub fn content_wait(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.content_wait_ms + self.content_wait_step_ms * attempt as u64)
    }

    /// Final wait for late AJAX content; grows with each attempt
    pub fn settle_wait(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.settle_wait_ms + self.content_wait_step_ms * attempt as u64)
    }

    /// Delay before download attempt `attempt` (0-based)
    pub fn download_attempt_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::from_millis(self.request_delay_ms)
        } else {
            Duration::from_millis(
                self.download_retry_delay_ms + self.download_retry_step_ms * attempt as u64,
            )
        }
    }

    pub fn extraction_wait(&self) -> Duration {
        Duration::from_millis(self.extraction_wait_ms)
    }

    pub fn download_prep_wait(&self) -> Duration {
        Duration::from_millis(self.download_prep_wait_ms)
    }

    pub fn company_retry_delay(&self) -> Duration {
        Duration::from_millis(self.company_retry_delay_ms)
    }

    pub fn scroll_pause(&self) -> Duration {
        Duration::from_millis(self.scroll_pause_ms)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            download_timeout_seconds: 35,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            kind: RendererKind::WebDriver,
            webdriver_url: "http://localhost:9515".to_string(),
            element_timeout_seconds: 25,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("nse_annual_reports"),
            roster_path: None,
            max_companies: None,
            retry_only: false,
            min_artifact_bytes: 10_000,
            retry: RetryConfig::default(),
            waits: WaitConfig::default(),
            http: HttpConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

impl Config {
    /// Load configuration from environment variables and defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let output_dir = std::env::var("NSE_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);

        let retry = RetryConfig {
            company_attempts: parse_env_var("NSE_COMPANY_ATTEMPTS")?
                .unwrap_or(defaults.retry.company_attempts),
            download_attempts: parse_env_var("NSE_DOWNLOAD_ATTEMPTS")?
                .unwrap_or(defaults.retry.download_attempts),
        };

        let waits = WaitConfig {
            request_delay_ms: parse_env_var("NSE_REQUEST_DELAY_MS")?
                .unwrap_or(defaults.waits.request_delay_ms),
            ..defaults.waits
        };

        let http = HttpConfig {
            timeout_seconds: parse_env_var("NSE_HTTP_TIMEOUT_SECONDS")?
                .unwrap_or(defaults.http.timeout_seconds),
            download_timeout_seconds: parse_env_var("NSE_DOWNLOAD_TIMEOUT_SECONDS")?
                .unwrap_or(defaults.http.download_timeout_seconds),
            user_agent: std::env::var("NSE_USER_AGENT").unwrap_or(defaults.http.user_agent),
        };

        let render = RenderConfig {
            webdriver_url: std::env::var("NSE_WEBDRIVER_URL")
                .unwrap_or(defaults.render.webdriver_url),
            ..defaults.render
        };

        Ok(Config {
            output_dir,
            roster_path: None,
            max_companies: None,
            retry_only: false,
            min_artifact_bytes: parse_env_var("NSE_MIN_ARTIFACT_BYTES")?
                .unwrap_or(defaults.min_artifact_bytes),
            retry,
            waits,
            http,
            render,
        })
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_seconds)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.http.download_timeout_seconds)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.render.element_timeout_seconds)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.retry.company_attempts == 0 || self.retry.download_attempts == 0 {
            return Err(anyhow::anyhow!("Retry attempts must be at least 1"));
        }

        if self.render.kind == RendererKind::WebDriver
            && url::Url::parse(&self.render.webdriver_url).is_err()
        {
            return Err(anyhow::anyhow!(
                "Invalid WebDriver URL: {}",
                self.render.webdriver_url
            ));
        }

        if let Some(roster) = &self.roster_path {
            if !roster.exists() {
                return Err(anyhow::anyhow!("Roster file does not exist: {}", roster.display()));
            }
        }

        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Cannot create output directory: {}", self.output_dir.display()))?;

        Ok(())
    }
}

/// Helper function to parse environment variable as a specific type
fn parse_env_var<T>(var_name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display + Send + Sync + std::error::Error + 'static,
{
    match std::env::var(var_name) {
        Ok(val) => val.parse().map(Some).with_context(|| {
            format!("Failed to parse environment variable {} = '{}'", var_name, val)
        }),
        Err(_) => Ok(None),
    }
}
