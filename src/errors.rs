//! Error types for the annual report pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP error status {status} for {url}")]
    HttpStatus {
        status: u16,
        url: String,
    },

    #[error("WebDriver command '{command}' failed: {message}")]
    WebDriver {
        command: String,
        message: String,
    },

    #[error("Could not load filings page for '{ticker}' after {attempts} attempts")]
    PageUnavailable {
        ticker: String,
        attempts: u32,
    },

    #[error("Rejected artifact from {url}: {reason}")]
    InvalidArtifact {
        url: String,
        reason: String,
    },

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Roster parse error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl ScraperError {
    pub fn webdriver(command: &str, message: impl Into<String>) -> Self {
        ScraperError::WebDriver {
            command: command.to_string(),
            message: message.into(),
        }
    }

    /// Whether another attempt at the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ScraperError::Http(_) | ScraperError::WebDriver { .. } => true,
            ScraperError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            ScraperError::InvalidArtifact { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScraperError>;
