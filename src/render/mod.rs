//! Rendering of the script-driven filings page
//!
//! The annual reports listing is filled in by JavaScript, so the default
//! renderer drives a headless browser through a WebDriver endpoint. A plain
//! HTTP renderer is kept for environments without a browser.

pub mod http;
pub mod webdriver;

use async_trait::async_trait;
use url::Url;

use crate::config::NseSite;
use crate::errors::Result;

pub use self::http::HttpRenderer;
pub use self::webdriver::WebDriverRenderer;

/// Produces the final markup of a page
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Render `url`. `attempt` is 0-based and lets implementations wait
    /// longer on each retry.
    async fn render(&self, url: &str, attempt: u32) -> Result<String>;
}

/// Filings page for one ticker, with the symbol query-encoded
pub fn company_page_url(ticker: &str) -> Result<String> {
    let url = Url::parse_with_params(NseSite::ANNUAL_REPORTS_URL, &[("symbol", ticker)])?;
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_company_page_url_encodes_symbol() {
        assert_eq!(
            company_page_url("TCS").unwrap(),
            "https://www.nseindia.com/companies-listing/corporate-filings-annual-reports?symbol=TCS"
        );
        assert!(company_page_url("M&M").unwrap().ends_with("?symbol=M%26M"));
    }
}
