//! On-disk layout: `<output>/<TICKER>/<YEAR>/document.<ext>` plus its
//! `document_meta.json` sidecar, and the run-level report files.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::errors::Result;
use crate::models::{ArtifactKind, Company, FailedItemsReport, FilingMetadata, UNKNOWN};

pub const METADATA_FILE: &str = "document_meta.json";
pub const ROSTER_SNAPSHOT: &str = "companies_list.json";
pub const CORRUPTED_LOG: &str = "corrupted_files.log";
pub const FAILED_ITEMS_REPORT: &str = "failed_items_report.json";
pub const LOG_FILE: &str = "scraper.log";

pub struct StorageManager {
    base_dir: PathBuf,
}

/// Make a ticker or year usable as a single path component
fn sanitize_component(value: &str) -> String {
    let cleaned = value.trim().replace("..", "_").replace(['/', '\\'], "_");
    if cleaned.is_empty() {
        UNKNOWN.to_string()
    } else {
        cleaned
    }
}

impl StorageManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn report_dir(&self, ticker: &str, year: &str) -> PathBuf {
        self.base_dir
            .join(sanitize_component(ticker))
            .join(sanitize_component(year))
    }

    pub fn artifact_path(&self, ticker: &str, year: &str, kind: ArtifactKind) -> PathBuf {
        self.report_dir(ticker, year).join(kind.file_name())
    }

    pub fn metadata_path(&self, ticker: &str, year: &str) -> PathBuf {
        self.report_dir(ticker, year).join(METADATA_FILE)
    }

    /// The artifact already stored for a report, if it is large enough.
    /// Undersized leftovers are deleted.
    pub async fn existing_artifact(
        &self,
        ticker: &str,
        year: &str,
        min_bytes: u64,
    ) -> Result<Option<(ArtifactKind, u64)>> {
        for kind in [ArtifactKind::Pdf, ArtifactKind::Zip] {
            let path = self.artifact_path(ticker, year, kind);
            let size = match fs::metadata(&path).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            if size >= min_bytes {
                return Ok(Some((kind, size)));
            }
            warn!("Removed small existing file: {} ({} bytes)", path.display(), size);
            fs::remove_file(&path).await?;
        }
        Ok(None)
    }

    /// Both a valid artifact and its sidecar are present
    pub async fn is_complete(&self, ticker: &str, year: &str, min_bytes: u64) -> Result<bool> {
        if !fs::try_exists(self.metadata_path(ticker, year)).await? {
            return Ok(false);
        }
        Ok(self.existing_artifact(ticker, year, min_bytes).await?.is_some())
    }

    /// Write an artifact through a `.part` file, leaving it as the only
    /// artifact in its folder
    pub async fn save_artifact(&self, ticker: &str, year: &str, kind: ArtifactKind, bytes: &[u8]) -> Result<PathBuf> {
        let dir = self.report_dir(ticker, year);
        fs::create_dir_all(&dir).await?;

        let target = dir.join(kind.file_name());
        let partial = dir.join(format!("{}.part", kind.file_name()));
        fs::write(&partial, bytes).await?;
        fs::rename(&partial, &target).await?;

        let stale = dir.join(kind.other().file_name());
        match fs::remove_file(&stale).await {
            Ok(()) => debug!("Removed stale {}", stale.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(target)
    }

    /// Write the sidecar for an artifact that is already on disk
    pub async fn save_metadata(&self, metadata: &FilingMetadata) -> Result<PathBuf> {
        let dir = self.report_dir(&metadata.ticker, &metadata.year);
        let artifact = dir.join(&metadata.artifact);
        if !fs::try_exists(&artifact).await? {
            return Err(std::io::Error::new(
                ErrorKind::NotFound,
                format!("refusing to write metadata without {}", artifact.display()),
            )
            .into());
        }

        let path = dir.join(METADATA_FILE);
        let json = serde_json::to_string_pretty(metadata)?;
        fs::write(&path, json).await?;
        debug!("Saved metadata: {}", path.display());
        Ok(path)
    }

    async fn write_json<T: Serialize>(&self, file_name: &str, value: &T) -> Result<PathBuf> {
        fs::create_dir_all(&self.base_dir).await?;
        let path = self.base_dir.join(file_name);
        fs::write(&path, serde_json::to_string_pretty(value)?).await?;
        Ok(path)
    }

    /// Snapshot of the roster used for this run
    pub async fn save_roster(&self, companies: &[Company]) -> Result<PathBuf> {
        let path = self.write_json(ROSTER_SNAPSHOT, &companies).await?;
        info!("Saved {} companies to {}", companies.len(), path.display());
        Ok(path)
    }

    pub async fn save_failed_items(&self, report: &FailedItemsReport) -> Result<PathBuf> {
        let path = self.write_json(FAILED_ITEMS_REPORT, report).await?;
        info!("Failed items report saved: {}", path.display());
        Ok(path)
    }

    /// The failed-items report left by an earlier run, if there is one
    pub async fn load_failed_items(&self) -> Result<Option<FailedItemsReport>> {
        let path = self.base_dir.join(FAILED_ITEMS_REPORT);
        let json = match fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let report: FailedItemsReport = serde_json::from_str(&json)?;
        info!(
            "Loaded {} failed downloads and {} failed companies from {}",
            report.failed_downloads.len(),
            report.failed_companies.len(),
            path.display()
        );
        Ok(Some(report))
    }

    /// Append a line about an archive that was kept without extraction
    pub async fn append_corrupted(&self, target: &Path, size: u64, reason: &str) -> Result<()> {
        fs::create_dir_all(&self.base_dir).await?;
        let path = self.base_dir.join(CORRUPTED_LOG);
        let line = format!(
            "{}: CORRUPTED ZIP - Target: {}, Size: {} bytes, Reason: {}\n",
            Local::now().to_rfc3339(),
            target.display(),
            size,
            reason
        );

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        warn!("Logged corrupted ZIP to {}", path.display());
        Ok(())
    }

    /// Count `<TICKER>/<YEAR>` folders that already hold an artifact and its sidecar
    pub fn scan_completed(&self) -> usize {
        WalkDir::new(&self.base_dir)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_dir())
            .filter(|entry| {
                let dir = entry.path();
                dir.join(METADATA_FILE).is_file()
                    && [ArtifactKind::Pdf, ArtifactKind::Zip]
                        .iter()
                        .any(|kind| dir.join(kind.file_name()).is_file())
            })
            .count()
    }
}
