use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::PageRenderer;
use crate::errors::{Result, ScraperError};

/// Fetches page markup without executing scripts
pub struct HttpRenderer {
    client: Client,
}

impl HttpRenderer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    async fn render(&self, url: &str, attempt: u32) -> Result<String> {
        debug!("Fetching {} without a browser (attempt {})", url, attempt + 1);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScraperError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }
}
