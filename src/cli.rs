use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use nse_reports::config::{Config, RendererKind, WaitConfig};

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
pub enum RendererArg {
    /// Headless browser behind a WebDriver endpoint
    Webdriver,
    /// Plain HTTP GET, no script execution
    Http,
}

#[derive(Parser, Debug)]
#[command(name = "nse-reports")]
#[command(about = "Download annual report filings for every company listed on the NSE")]
#[command(version)]
pub struct Cli {
    /// Output directory for the <TICKER>/<YEAR>/ tree
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Process only the first N companies of the roster
    #[arg(short, long)]
    pub max_companies: Option<usize>,

    /// Page load attempts per company
    #[arg(long)]
    pub company_attempts: Option<u32>,

    /// Download attempts per report
    #[arg(long)]
    pub download_attempts: Option<u32>,

    /// Use longer waits for a slow or throttling server
    #[arg(long)]
    pub extra_patient: bool,

    /// Give up on broken archives sooner (2 download attempts)
    #[arg(long)]
    pub skip_corrupted: bool,

    /// Only retry the failed downloads recorded by the previous run
    #[arg(long)]
    pub retry_only: bool,

    /// Local roster CSV instead of the published equity list
    #[arg(long)]
    pub roster: Option<PathBuf>,

    /// How the filings pages are rendered
    #[arg(long, value_enum, default_value = "webdriver")]
    pub renderer: RendererArg,

    /// WebDriver endpoint (e.g. a running chromedriver)
    #[arg(long)]
    pub webdriver_url: Option<String>,
}

impl Cli {
    /// Apply command line overrides on top of the environment configuration
    pub fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        config.max_companies = self.max_companies;
        config.roster_path = self.roster.clone();

        if self.extra_patient {
            config.waits = WaitConfig {
                request_delay_ms: config.waits.request_delay_ms,
                ..WaitConfig::extra_patient()
            };
        }
        config.retry_only = self.retry_only;

        if let Some(attempts) = self.company_attempts {
            config.retry.company_attempts = attempts;
        }
        if let Some(attempts) = self.download_attempts {
            config.retry.download_attempts = attempts;
        }
        if self.skip_corrupted {
            config.retry.download_attempts = 2;
        }

        config.render.kind = match self.renderer {
            RendererArg::Webdriver => RendererKind::WebDriver,
            RendererArg::Http => RendererKind::Http,
        };
        if let Some(url) = &self.webdriver_url {
            config.render.webdriver_url = url.clone();
        }
    }
}
