//! Artifact download with payload validation and ZIP unpacking

use std::io::{Cursor, Read};

use tracing::{debug, error, info, warn};
use zip::ZipArchive;

use crate::config::{Config, WaitConfig};
use crate::errors::{Result, ScraperError};
use crate::http::{ArtifactFetcher, FetchedPayload};
use crate::models::{ArtifactKind, ArtifactStats, Filing};
use crate::storage::StorageManager;

/// Archives smaller than this cannot hold a report
const MIN_ARCHIVE_BYTES: usize = 1_000;
/// Direct payloads this large are kept even without a PDF header
const LARGE_PAYLOAD_BYTES: usize = 50_000;
const SAMPLE_BYTES: usize = 1_024;

/// Outcome of inspecting a ZIP archive
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveStatus {
    /// Index of the first PDF entry
    Valid(usize),
    Empty,
    NoPdf,
    Corrupted(String),
}

impl ArchiveStatus {
    fn label(&self) -> &'static str {
        match self {
            ArchiveStatus::Valid(_) => "valid",
            ArchiveStatus::Empty => "empty",
            ArchiveStatus::NoPdf => "no_pdf",
            ArchiveStatus::Corrupted(_) => "corrupted",
        }
    }
}

/// What to do with a fetched payload
#[derive(Debug, PartialEq)]
pub enum Classified {
    /// A PDF ready to store
    Pdf(Vec<u8>),
    /// A real archive that would not yield a usable PDF; kept as is
    UnreadableArchive { bytes: Vec<u8>, reason: String },
    /// Not worth keeping; another attempt may do better
    Rejected(String),
}

/// Result of a successful download call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Downloaded {
    /// A valid artifact was already on disk
    AlreadyPresent { kind: ArtifactKind, size: u64 },
    Saved { kind: ArtifactKind, size: u64 },
}

impl Downloaded {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Downloaded::AlreadyPresent { kind, .. } | Downloaded::Saved { kind, .. } => *kind,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Downloaded::AlreadyPresent { size, .. } | Downloaded::Saved { size, .. } => *size,
        }
    }
}

fn looks_like_html(sample: &[u8]) -> bool {
    let lower = String::from_utf8_lossy(sample).to_lowercase();
    lower.contains("<html") || lower.contains("<!doctype")
}

fn log_server_error(sample: &[u8]) {
    let text = String::from_utf8_lossy(sample);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| {
            let lower = line.to_lowercase();
            lower.contains("error") || lower.contains("not found")
        })
        .take(3)
        .collect();
    if !lines.is_empty() {
        error!("Server error details: {}", lines.join("; "));
    }
}

/// Read every entry to verify CRCs, then locate the first PDF
pub fn inspect_archive(bytes: &[u8]) -> ArchiveStatus {
    let mut archive = match ZipArchive::new(Cursor::new(bytes)) {
        Ok(archive) => archive,
        Err(e) => return ArchiveStatus::Corrupted(e.to_string()),
    };
    if archive.len() == 0 {
        return ArchiveStatus::Empty;
    }

    let mut first_pdf = None;
    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(entry) => entry,
            Err(e) => return ArchiveStatus::Corrupted(e.to_string()),
        };
        if let Err(e) = std::io::copy(&mut entry, &mut std::io::sink()) {
            return ArchiveStatus::Corrupted(format!("{}: {}", entry.name(), e));
        }
        if first_pdf.is_none() && !entry.is_dir() && entry.name().to_lowercase().ends_with(".pdf") {
            if entry.size() == 0 {
                return ArchiveStatus::Corrupted(format!("{} is empty", entry.name()));
            }
            first_pdf = Some(i);
        }
    }

    match first_pdf {
        Some(index) => ArchiveStatus::Valid(index),
        None => ArchiveStatus::NoPdf,
    }
}

/// Unpack entry `index` of an archive already checked by [`inspect_archive`]
pub fn read_entry(bytes: &[u8], index: usize) -> Result<Vec<u8>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut entry = archive.by_index(index)?;
    let mut content = Vec::new();
    entry.read_to_end(&mut content)?;
    debug!("Extracted {} ({} bytes)", entry.name(), content.len());
    Ok(content)
}

/// Decide what a payload is. `min_bytes` is the smallest PDF ever kept.
pub fn classify_payload(payload: &FetchedPayload, url: &str, min_bytes: usize, stats: &mut ArtifactStats) -> Classified {
    let bytes = &payload.bytes;
    let sample = &bytes[..bytes.len().min(SAMPLE_BYTES)];

    let advertised_zip = payload.content_type.contains("zip") || url.to_lowercase().ends_with(".zip");
    if !advertised_zip {
        return classify_direct(bytes, min_bytes, stats);
    }

    stats.total_zip_attempts += 1;
    debug!("Downloaded {} bytes for ZIP analysis", bytes.len());

    if bytes.len() < MIN_ARCHIVE_BYTES {
        return Classified::Rejected(format!("ZIP too small ({} bytes)", bytes.len()));
    }

    if !sample.starts_with(b"PK") {
        if sample.starts_with(b"%PDF") {
            info!("File with .zip extension is actually a PDF, saving directly");
            stats.misnamed_pdfs += 1;
            return if bytes.len() >= min_bytes {
                Classified::Pdf(bytes.clone())
            } else {
                Classified::Rejected(format!("misnamed PDF too small ({} bytes)", bytes.len()))
            };
        }
        if looks_like_html(sample) {
            error!("Server returned HTML error page instead of ZIP file");
            stats.server_errors += 1;
            log_server_error(sample);
            return Classified::Rejected("server returned an HTML error page".to_string());
        }
        stats.corrupted_zips += 1;
        let head: Vec<u8> = sample.iter().take(50).copied().collect();
        error!("File doesn't have ZIP signature. First 50 bytes: {:?}", String::from_utf8_lossy(&head));
        return Classified::Rejected("missing ZIP signature".to_string());
    }

    if bytes.len() < min_bytes {
        return Classified::Rejected(format!("ZIP too small ({} bytes)", bytes.len()));
    }

    let unreadable = |stats: &mut ArtifactStats, reason: String, corrupt: bool| {
        if corrupt {
            stats.corrupted_zips += 1;
        }
        error!("ZIP file could not be unpacked: {}", reason);
        Classified::UnreadableArchive { bytes: bytes.clone(), reason }
    };

    let index = match inspect_archive(bytes) {
        ArchiveStatus::Valid(index) => index,
        ArchiveStatus::NoPdf => return unreadable(stats, "no_pdf".to_string(), false),
        status @ (ArchiveStatus::Empty | ArchiveStatus::Corrupted(_)) => {
            let reason = match &status {
                ArchiveStatus::Corrupted(detail) => format!("{}: {}", status.label(), detail),
                _ => status.label().to_string(),
            };
            return unreadable(stats, reason, true);
        }
    };

    let pdf = match read_entry(bytes, index) {
        Ok(pdf) => pdf,
        Err(e) => return unreadable(stats, format!("corrupted: {}", e), true),
    };
    if pdf.len() < min_bytes {
        return unreadable(stats, format!("extracted PDF too small ({} bytes)", pdf.len()), false);
    }
    if !pdf.starts_with(b"%PDF") {
        return unreadable(stats, "extracted file is not a PDF".to_string(), false);
    }

    stats.successful_extractions += 1;
    Classified::Pdf(pdf)
}

fn classify_direct(bytes: &[u8], min_bytes: usize, stats: &mut ArtifactStats) -> Classified {
    if bytes.len() < min_bytes {
        return Classified::Rejected(format!("content too small ({} bytes)", bytes.len()));
    }
    let sample = &bytes[..bytes.len().min(SAMPLE_BYTES)];
    if looks_like_html(sample) && !sample.starts_with(b"%PDF") {
        stats.server_errors += 1;
        log_server_error(sample);
        return Classified::Rejected("server returned an HTML page".to_string());
    }
    if bytes.starts_with(b"%PDF") || bytes.len() > LARGE_PAYLOAD_BYTES {
        Classified::Pdf(bytes.to_vec())
    } else {
        Classified::Rejected("content doesn't appear to be a PDF".to_string())
    }
}

/// Fetches, validates and stores one artifact per filing
pub struct Downloader<F: ArtifactFetcher> {
    fetcher: F,
    waits: WaitConfig,
    attempts: u32,
    min_bytes: u64,
}

impl<F: ArtifactFetcher> Downloader<F> {
    pub fn new(fetcher: F, config: &Config) -> Self {
        Self {
            fetcher,
            waits: config.waits.clone(),
            attempts: config.retry.download_attempts.max(1),
            min_bytes: config.min_artifact_bytes,
        }
    }

    /// Store the artifact for `filing`, unless a valid one is already there
    pub async fn download(
        &self,
        filing: &Filing,
        storage: &StorageManager,
        stats: &mut ArtifactStats,
    ) -> Result<Downloaded> {
        if let Some((kind, size)) = storage
            .existing_artifact(&filing.ticker, &filing.year, self.min_bytes)
            .await?
        {
            info!("Valid file already exists for {} {} ({} bytes)", filing.ticker, filing.year, size);
            return Ok(Downloaded::AlreadyPresent { kind, size });
        }

        tokio::time::sleep(self.waits.download_prep_wait()).await;

        let mut last_error = None;
        for attempt in 0..self.attempts {
            tokio::time::sleep(self.waits.download_attempt_delay(attempt)).await;
            info!("Downloading {} (attempt {}/{})", filing.url, attempt + 1, self.attempts);

            match self.attempt(filing, storage, stats).await {
                Ok(downloaded) => return Ok(downloaded),
                Err(e) => {
                    warn!("Download attempt {} failed for {}: {}", attempt + 1, filing.url, e);
                    if let ScraperError::HttpStatus { status, .. } = &e {
                        if *status >= 500 {
                            stats.server_errors += 1;
                        }
                    }
                    if !e.is_transient() {
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }

        error!("Failed to download after {} attempts: {}", self.attempts, filing.url);
        Err(last_error.unwrap_or_else(|| ScraperError::InvalidArtifact {
            url: filing.url.clone(),
            reason: "no download attempt was made".to_string(),
        }))
    }

    async fn attempt(&self, filing: &Filing, storage: &StorageManager, stats: &mut ArtifactStats) -> Result<Downloaded> {
        let payload = self.fetcher.fetch(&filing.url).await?;
        debug!(
            "Response headers - Content-Type: {}, Content-Disposition: {}",
            payload.content_type, payload.content_disposition
        );

        match classify_payload(&payload, &filing.url, self.min_bytes as usize, stats) {
            Classified::Pdf(pdf) => {
                let path = storage
                    .save_artifact(&filing.ticker, &filing.year, ArtifactKind::Pdf, &pdf)
                    .await?;
                info!("Successfully downloaded: {} ({} bytes)", path.display(), pdf.len());
                Ok(Downloaded::Saved { kind: ArtifactKind::Pdf, size: pdf.len() as u64 })
            }
            Classified::UnreadableArchive { bytes, reason } => {
                let path = storage
                    .save_artifact(&filing.ticker, &filing.year, ArtifactKind::Zip, &bytes)
                    .await?;
                warn!("Keeping original archive {} ({})", path.display(), reason);
                if let Err(e) = storage.append_corrupted(&path, bytes.len() as u64, &reason).await {
                    debug!("Could not log corrupted ZIP info: {}", e);
                }
                Ok(Downloaded::Saved { kind: ArtifactKind::Zip, size: bytes.len() as u64 })
            }
            Classified::Rejected(reason) => Err(ScraperError::InvalidArtifact {
                url: filing.url.clone(),
                reason,
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::ExtractionMethod;
    use crate::storage::CORRUPTED_LOG;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use zip::write::FileOptions;

    pub(crate) fn pdf_bytes(len: usize) -> Vec<u8> {
        let mut pdf = b"%PDF-1.7\n".to_vec();
        pdf.resize(len, b'x');
        pdf
    }

    pub(crate) fn zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn payload(content_type: &str, bytes: Vec<u8>) -> FetchedPayload {
        FetchedPayload {
            content_type: content_type.to_string(),
            content_disposition: String::new(),
            bytes,
        }
    }

    #[test]
    fn test_zip_with_pdf_is_extracted() {
        let pdf = pdf_bytes(20_000);
        let archive = zip_with(&[("notes.txt", &b"hello"[..]), ("AR_2024.pdf", &pdf[..])]);
        assert_eq!(inspect_archive(&archive), ArchiveStatus::Valid(1));

        let mut stats = ArtifactStats::default();
        let classified = classify_payload(&payload("application/zip", archive), "https://x/AR.zip", 10_000, &mut stats);
        assert_eq!(classified, Classified::Pdf(pdf));
        assert_eq!(stats.total_zip_attempts, 1);
        assert_eq!(stats.successful_extractions, 1);
    }

    #[test]
    fn test_misnamed_pdf() {
        let mut stats = ArtifactStats::default();
        let pdf = pdf_bytes(12_000);
        let classified = classify_payload(&payload("application/octet-stream", pdf.clone()), "https://x/AR.zip", 10_000, &mut stats);
        assert_eq!(classified, Classified::Pdf(pdf));
        assert_eq!(stats.misnamed_pdfs, 1);
    }

    #[test]
    fn test_html_error_page_is_rejected() {
        let mut stats = ArtifactStats::default();
        let mut page = b"<!DOCTYPE html><html><body>\n<h1>Error 403</h1>\n".to_vec();
        page.resize(5_000, b' ');
        let classified = classify_payload(&payload("application/zip", page), "https://x/AR.zip", 10_000, &mut stats);
        assert!(matches!(classified, Classified::Rejected(_)));
        assert_eq!(stats.server_errors, 1);
    }

    #[test]
    fn test_archive_without_pdf_is_kept() {
        let archive = zip_with(&[("readme.txt", &[b'a'; 4_000][..])]);
        assert_eq!(inspect_archive(&archive), ArchiveStatus::NoPdf);

        let mut stats = ArtifactStats::default();
        let classified = classify_payload(&payload("application/zip", archive.clone()), "https://x/AR.zip", 1_000, &mut stats);
        assert_eq!(
            classified,
            Classified::UnreadableArchive { bytes: archive, reason: "no_pdf".to_string() }
        );
    }

    #[test]
    fn test_corrupted_archive_detected() {
        let pdf = pdf_bytes(20_000);
        let mut archive = zip_with(&[("AR_2024.pdf", &pdf[..])]);
        // Flip a byte inside the stored data so the CRC no longer matches
        let pos = archive
            .windows(4)
            .position(|w| w == b"%PDF")
            .unwrap()
            + 100;
        archive[pos] ^= 0xff;

        assert!(matches!(inspect_archive(&archive), ArchiveStatus::Corrupted(_)));
    }

    #[test]
    fn test_small_and_garbage_payloads() {
        let mut stats = ArtifactStats::default();
        assert!(matches!(
            classify_payload(&payload("application/zip", vec![b'P', b'K', 0, 0]), "https://x/a.zip", 10_000, &mut stats),
            Classified::Rejected(_)
        ));
        assert!(matches!(
            classify_payload(&payload("application/zip", vec![7u8; 2_000]), "https://x/a.zip", 10_000, &mut stats),
            Classified::Rejected(_)
        ));
        assert_eq!(stats.corrupted_zips, 1);

        assert!(matches!(
            classify_payload(&payload("application/pdf", pdf_bytes(500)), "https://x/a.pdf", 10_000, &mut stats),
            Classified::Rejected(_)
        ));
        assert!(matches!(
            classify_payload(&payload("application/octet-stream", vec![1u8; 60_000]), "https://x/a", 10_000, &mut stats),
            Classified::Pdf(_)
        ));
        assert!(matches!(
            classify_payload(&payload("text/plain", vec![1u8; 20_000]), "https://x/a", 10_000, &mut stats),
            Classified::Rejected(_)
        ));
    }

    /// Serves one fixed answer for every URL and counts the requests
    enum Answer {
        Body(&'static str, Vec<u8>),
        Status(u16),
    }

    struct ScriptedFetcher {
        answer: Answer,
        calls: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn new(answer: Answer) -> Self {
            Self { answer, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl ArtifactFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPayload> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.answer {
                Answer::Body(content_type, bytes) => Ok(payload(content_type, bytes.clone())),
                Answer::Status(status) => Err(ScraperError::HttpStatus { status: *status, url: url.to_string() }),
            }
        }
    }

    fn filing(url: &str) -> Filing {
        Filing {
            ticker: "TCS".to_string(),
            year: "2023-24".to_string(),
            url: url.to_string(),
            subject: "Annual Report".to_string(),
            date: "2024-06-01".to_string(),
            filing_date: String::new(),
            broadcast_date: "01-JUN-2024 10:00:00".to_string(),
            from_year: "2023".to_string(),
            to_year: "2024".to_string(),
            submission_type: String::new(),
            method: ExtractionMethod::Table,
        }
    }

    fn downloader(answer: Answer, output_dir: &std::path::Path) -> Downloader<ScriptedFetcher> {
        let config = Config {
            output_dir: output_dir.to_path_buf(),
            waits: WaitConfig::instant(),
            ..Config::default()
        };
        Downloader::new(ScriptedFetcher::new(answer), &config)
    }

    const ZIP_URL: &str = "https://nsearchives.nseindia.com/annual_reports/AR_TCS_2023_2024.zip";

    #[tokio::test]
    async fn test_unpackable_archive_is_kept_once() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageManager::new(temp_dir.path());
        let archive = zip_with(&[("readme.txt", &[b'a'; 20_000][..])]);
        let downloader = downloader(Answer::Body("application/zip", archive.clone()), temp_dir.path());

        let mut stats = ArtifactStats::default();
        let downloaded = downloader.download(&filing(ZIP_URL), &storage, &mut stats).await.unwrap();

        assert_eq!(downloaded, Downloaded::Saved { kind: ArtifactKind::Zip, size: archive.len() as u64 });
        assert_eq!(downloader.fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(storage.artifact_path("TCS", "2023-24", ArtifactKind::Zip)).unwrap(), archive);
        assert!(!storage.artifact_path("TCS", "2023-24", ArtifactKind::Pdf).exists());

        let log = std::fs::read_to_string(temp_dir.path().join(CORRUPTED_LOG)).unwrap();
        assert_eq!(log.lines().count(), 1);
        assert!(log.contains("Reason: no_pdf"));
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageManager::new(temp_dir.path());
        let downloader = downloader(Answer::Status(404), temp_dir.path());

        let mut stats = ArtifactStats::default();
        let err = downloader.download(&filing(ZIP_URL), &storage, &mut stats).await.unwrap_err();

        assert!(matches!(err, ScraperError::HttpStatus { status: 404, .. }));
        assert_eq!(downloader.fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(stats.server_errors, 0);
        assert!(!storage.report_dir("TCS", "2023-24").exists());
    }

    #[tokio::test]
    async fn test_server_errors_use_every_attempt() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageManager::new(temp_dir.path());
        let downloader = downloader(Answer::Status(503), temp_dir.path());

        let mut stats = ArtifactStats::default();
        assert!(downloader.download(&filing(ZIP_URL), &storage, &mut stats).await.is_err());

        let attempts = Config::default().retry.download_attempts as usize;
        assert_eq!(downloader.fetcher.calls.load(Ordering::SeqCst), attempts);
        assert_eq!(stats.server_errors, attempts);
    }

    #[tokio::test]
    async fn test_existing_artifact_is_not_fetched() {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageManager::new(temp_dir.path());
        storage
            .save_artifact("TCS", "2023-24", ArtifactKind::Pdf, &pdf_bytes(20_000))
            .await
            .unwrap();
        let downloader = downloader(Answer::Status(503), temp_dir.path());

        let mut stats = ArtifactStats::default();
        let downloaded = downloader.download(&filing(ZIP_URL), &storage, &mut stats).await.unwrap();

        assert_eq!(downloaded, Downloaded::AlreadyPresent { kind: ArtifactKind::Pdf, size: 20_000 });
        assert_eq!(downloader.fetcher.calls.load(Ordering::SeqCst), 0);
    }
}
