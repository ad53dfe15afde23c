//! HTTP access to the exchange site

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::{Config, NseSite};
use crate::errors::{Result, ScraperError};

/// Raw response body plus the headers used to classify it
#[derive(Debug, Clone, Default)]
pub struct FetchedPayload {
    pub content_type: String,
    pub content_disposition: String,
    pub bytes: Vec<u8>,
}

/// Source of raw bytes for rosters and artifacts
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPayload>;
}

/// Browser-like reqwest session with a cookie jar
pub struct HttpFetcher {
    client: Client,
    download_timeout: std::time::Duration,
}

pub fn build_client(config: &Config) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
    );
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers.insert("DNT", HeaderValue::from_static("1"));

    let client = Client::builder()
        .user_agent(&config.http.user_agent)
        .default_headers(headers)
        .cookie_store(true)
        .timeout(config.http_timeout())
        .build()?;
    Ok(client)
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            download_timeout: config.download_timeout(),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Visit the home page once so the server hands out its session cookies
    pub async fn warm_up(&self) {
        match self.client.get(NseSite::BASE_URL).send().await {
            Ok(response) if response.status().is_success() => info!("Session initialized successfully"),
            Ok(response) => warn!("Session initialization returned HTTP {}", response.status()),
            Err(e) => warn!("Session initialization warning: {}", e),
        }
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPayload> {
        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/zip, application/pdf, application/octet-stream, */*")
            .timeout(self.download_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScraperError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let header_value = |name: header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        let content_type = header_value(header::CONTENT_TYPE).to_lowercase();
        let content_disposition = header_value(header::CONTENT_DISPOSITION);

        debug!(
            "Response headers - Content-Type: {}, Content-Disposition: {}",
            content_type, content_disposition
        );

        let bytes = response.bytes().await?.to_vec();
        Ok(FetchedPayload {
            content_type,
            content_disposition,
            bytes,
        })
    }
}
