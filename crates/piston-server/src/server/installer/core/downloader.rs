use crate::error::{Result, SetupError};
use crate::server::installer::config::{RetryPolicy, SetupConfig};
use crate::server::installer::types::ProgressReporter;
use futures::future::BoxFuture;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use sha1::Sha1;
use sha2::{Digest, Sha512};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::{create_dir_all, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Hash a download is expected to match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedHash {
    Sha1(String),
    Sha512(String),
}

impl ExpectedHash {
    pub fn value(&self) -> &str {
        match self {
            ExpectedHash::Sha1(v) | ExpectedHash::Sha512(v) => v,
        }
    }

    fn hasher(&self) -> StreamHasher {
        match self {
            ExpectedHash::Sha1(_) => StreamHasher::Sha1(Sha1::new()),
            ExpectedHash::Sha512(_) => StreamHasher::Sha512(Sha512::new()),
        }
    }

    fn matches(&self, computed: &str) -> bool {
        self.value().eq_ignore_ascii_case(computed)
    }
}

enum StreamHasher {
    Sha1(Sha1),
    Sha512(Sha512),
}

impl StreamHasher {
    fn update(&mut self, bytes: &[u8]) {
        match self {
            StreamHasher::Sha1(h) => h.update(bytes),
            StreamHasher::Sha512(h) => h.update(bytes),
        }
    }

    fn finish(self) -> String {
        match self {
            StreamHasher::Sha1(h) => format!("{:x}", h.finalize()),
            StreamHasher::Sha512(h) => format!("{:x}", h.finalize()),
        }
    }
}

/// One file to fetch. `urls` holds the primary source followed by mirrors.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadTask {
    pub urls: Vec<String>,
    pub destination: PathBuf,
    pub expected_size: Option<u64>,
    pub expected_hash: Option<ExpectedHash>,
    /// Attempts per URL for transient failures
    pub retries: u32,
}

impl DownloadTask {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            urls: vec![url.into()],
            destination: destination.into(),
            expected_size: None,
            expected_hash: None,
            retries: RetryPolicy::default().attempts,
        }
    }

    pub fn with_mirrors(mut self, mirrors: impl IntoIterator<Item = String>) -> Self {
        self.urls.extend(mirrors);
        self
    }

    pub fn with_sha1(mut self, sha1: Option<String>) -> Self {
        self.expected_hash = sha1.map(ExpectedHash::Sha1);
        self
    }

    pub fn with_hash(mut self, hash: Option<ExpectedHash>) -> Self {
        self.expected_hash = hash;
        self
    }

    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.expected_size = size.filter(|s| *s > 0);
        self
    }

    pub fn primary_url(&self) -> &str {
        self.urls.first().map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded { bytes: u64 },
    /// Destination already existed and verified; no request was made.
    AlreadyPresent,
}

/// Anything that can turn a `DownloadTask` into a verified file on disk.
pub trait ArtifactDownloader: Send + Sync {
    fn download<'a>(
        &'a self,
        task: &'a DownloadTask,
        reporter: &'a dyn ProgressReporter,
    ) -> BoxFuture<'a, Result<DownloadOutcome>>;
}

/// Outcome of a single attempt against a single URL.
enum AttemptError {
    /// Worth retrying (connection reset, timeout, 5xx, 429)
    Transient(String),
    /// This URL will not work (4xx); try the next mirror
    Rejected(String),
    /// Stop immediately (integrity failure, cancellation, local I/O)
    Fatal(SetupError),
}

/// reqwest-backed downloader with retry, verification and atomic rename.
#[derive(Clone)]
pub struct HttpDownloader {
    client: Client,
    retry: RetryPolicy,
    progress_interval: Duration,
}

impl HttpDownloader {
    pub fn new(client: Client, retry: RetryPolicy, progress_interval: Duration) -> Self {
        Self {
            client,
            retry,
            progress_interval,
        }
    }

    pub fn from_config(config: &SetupConfig) -> Result<Self> {
        Ok(Self::new(
            config.build_client()?,
            config.retry,
            config.progress_interval,
        ))
    }

    /// Download a file to a path with progress reporting, hash validation, and retry logic
    pub async fn fetch(
        &self,
        task: &DownloadTask,
        reporter: &dyn ProgressReporter,
    ) -> Result<DownloadOutcome> {
        let path = &task.destination;
        log::debug!("Downloading: {} -> {:?}", task.primary_url(), path);

        if reporter.is_cancelled() {
            return Err(SetupError::Cancelled);
        }

        if task.urls.is_empty() {
            return Err(SetupError::DownloadFailed {
                url: String::new(),
                attempts: 0,
                cause: format!("No download URLs provided for {:?}", path),
            });
        }

        if verify_existing(task).await? {
            log::debug!("File exists and verifies, skipping: {:?}", path);
            return Ok(DownloadOutcome::AlreadyPresent);
        }

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            create_dir_all(parent).await?;
        }

        let attempts = task.retries.max(1);
        let mut last_cause = String::from("no attempt made");
        let mut made = 0;

        for url in &task.urls {
            for attempt in 1..=attempts {
                made += 1;
                match self.download_once(url, task, reporter).await {
                    Ok(bytes) => {
                        log::debug!("Download complete: {:?}", path);
                        return Ok(DownloadOutcome::Downloaded { bytes });
                    }
                    Err(AttemptError::Fatal(e)) => return Err(e),
                    Err(AttemptError::Rejected(cause)) => {
                        log::warn!("Download rejected by {}: {}", url, cause);
                        last_cause = cause;
                        break;
                    }
                    Err(AttemptError::Transient(cause)) => {
                        log::warn!(
                            "Download failed (attempt {}/{}) : {}. Retrying...",
                            attempt,
                            attempts,
                            cause
                        );
                        last_cause = cause;
                        if attempt < attempts {
                            tokio::time::sleep(self.retry.delay_for(attempt)).await;
                        }
                    }
                }
            }
        }

        log::error!(
            "Download failed after {} attempts: {} ({})",
            made,
            task.primary_url(),
            last_cause
        );
        Err(SetupError::DownloadFailed {
            url: task.primary_url().to_string(),
            attempts: made,
            cause: last_cause,
        })
    }

    async fn download_once(
        &self,
        url: &str,
        task: &DownloadTask,
        reporter: &dyn ProgressReporter,
    ) -> std::result::Result<u64, AttemptError> {
        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AttemptError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let cause = format!("HTTP error {}: {}", status, url);
            return Err(if is_transient_status(status) {
                AttemptError::Transient(cause)
            } else {
                AttemptError::Rejected(cause)
            });
        }

        let total_size = response.content_length().or(task.expected_size);

        // Write to a temporary file first, then atomically rename to the final path.
        let tmp_path = part_path(&task.destination);
        let mut file = File::create(&tmp_path)
            .await
            .map_err(|e| AttemptError::Fatal(e.into()))?;
        let mut downloaded: u64 = 0;
        let mut hasher = task.expected_hash.as_ref().map(ExpectedHash::hasher);
        let mut last_report = Instant::now();

        let mut stream = response.bytes_stream();
        while let Some(chunk_result) = stream.next().await {
            if reporter.is_cancelled() {
                log::warn!("Download cancelled: {:?}", task.destination);
                drop(file);
                discard(&tmp_path).await;
                return Err(AttemptError::Fatal(SetupError::Cancelled));
            }

            while reporter.is_paused() {
                if reporter.is_cancelled() {
                    drop(file);
                    discard(&tmp_path).await;
                    return Err(AttemptError::Fatal(SetupError::Cancelled));
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }

            let chunk = match chunk_result {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    discard(&tmp_path).await;
                    return Err(AttemptError::Transient(e.to_string()));
                }
            };

            file.write_all(&chunk)
                .await
                .map_err(|e| AttemptError::Fatal(e.into()))?;
            if let Some(h) = hasher.as_mut() {
                h.update(&chunk);
            }
            downloaded += chunk.len() as u64;

            if last_report.elapsed() >= self.progress_interval {
                reporter.update_bytes(downloaded, total_size);
                last_report = Instant::now();
            }
        }
        reporter.update_bytes(downloaded, total_size);

        file.flush().await.map_err(|e| AttemptError::Fatal(e.into()))?;
        file.sync_all()
            .await
            .map_err(|e| AttemptError::Fatal(e.into()))?;
        drop(file);

        if let Some(expected) = task.expected_size {
            if downloaded != expected {
                discard(&tmp_path).await;
                return Err(AttemptError::Fatal(SetupError::Integrity {
                    path: task.destination.clone(),
                    expected: format!("{} bytes", expected),
                    actual: format!("{} bytes", downloaded),
                }));
            }
        }

        if let (Some(expected), Some(h)) = (task.expected_hash.as_ref(), hasher) {
            let computed = h.finish();
            if !expected.matches(&computed) {
                // Delete invalid temp file
                discard(&tmp_path).await;
                return Err(AttemptError::Fatal(SetupError::Integrity {
                    path: task.destination.clone(),
                    expected: expected.value().to_lowercase(),
                    actual: computed,
                }));
            }
            log::debug!("Hash validated: {}", computed);
        }

        // Atomic move into place
        tokio::fs::rename(&tmp_path, &task.destination)
            .await
            .map_err(|e| AttemptError::Fatal(e.into()))?;

        let secs = start.elapsed().as_secs_f64();
        let throughput = (downloaded as f64 / 1024.0 / 1024.0) / secs.max(0.001);
        log::info!(
            "Download stats: url={}, size={} bytes, time={:.2}s, throughput={:.2} MB/s",
            url,
            downloaded,
            secs,
            throughput
        );

        Ok(downloaded)
    }
}

impl ArtifactDownloader for HttpDownloader {
    fn download<'a>(
        &'a self,
        task: &'a DownloadTask,
        reporter: &'a dyn ProgressReporter,
    ) -> BoxFuture<'a, Result<DownloadOutcome>> {
        Box::pin(self.fetch(task, reporter))
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn part_path(path: &Path) -> PathBuf {
    let tmp_name = format!(
        "{}.part",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("download")
    );
    path.with_file_name(tmp_name)
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Failed to remove partial file {:?}: {}", path, e);
        }
    }
}

/// Whether the destination already satisfies the task.
///
/// With a hash, the hash decides. Without one, a matching size (when known)
/// or mere presence counts.
pub async fn verify_existing(task: &DownloadTask) -> Result<bool> {
    let path = &task.destination;
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta,
        _ => return Ok(false),
    };

    if let Some(expected) = task.expected_size {
        if meta.len() != expected {
            log::info!(
                "File exists but size mismatches ({} != {}), re-downloading: {:?}",
                meta.len(),
                expected,
                path
            );
            return Ok(false);
        }
    }

    match &task.expected_hash {
        Some(expected) => {
            let computed = hash_file(path, expected).await?;
            if expected.matches(&computed) {
                Ok(true)
            } else {
                log::info!(
                    "File exists but hash mismatches ({} != {}), re-downloading: {:?}",
                    computed,
                    expected.value(),
                    path
                );
                Ok(false)
            }
        }
        None => Ok(true),
    }
}

async fn hash_file(path: &Path, kind: &ExpectedHash) -> Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = kind.hasher();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finish())
}

/// SHA-1 of a file on disk, lowercase hex.
pub async fn sha1_file(path: &Path) -> Result<String> {
    hash_file(path, &ExpectedHash::Sha1(String::new())).await
}

/// Fetch a small text document, retrying transient failures.
/// Returns `Ok(None)` when the server says the document does not exist (4xx).
pub async fn fetch_text(client: &Client, url: &str, retry: RetryPolicy) -> Result<Option<String>> {
    let attempts = retry.attempts.max(1);
    let mut last_cause = String::new();

    for attempt in 1..=attempts {
        match client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    match response.text().await {
                        Ok(body) => return Ok(Some(body)),
                        Err(e) => last_cause = e.to_string(),
                    }
                } else if is_transient_status(status) {
                    last_cause = format!("HTTP error {}", status);
                } else {
                    log::debug!("{} answered {}", url, status);
                    return Ok(None);
                }
            }
            Err(e) => last_cause = e.to_string(),
        }

        log::warn!(
            "Metadata request failed (attempt {}/{}): {} - {}",
            attempt,
            attempts,
            url,
            last_cause
        );
        if attempt < attempts {
            tokio::time::sleep(retry.delay_for(attempt)).await;
        }
    }

    Err(SetupError::UpstreamUnavailable {
        url: url.to_string(),
        reason: last_cause,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sha1_hex(bytes: &[u8]) -> String {
        let mut h = Sha1::new();
        h.update(bytes);
        format!("{:x}", h.finalize())
    }

    #[tokio::test]
    async fn verify_existing_accepts_matching_hash() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("server.jar");
        std::fs::write(&path, b"jar-bytes").unwrap();

        let task = DownloadTask::new("http://unused", &path)
            .with_sha1(Some(sha1_hex(b"jar-bytes").to_uppercase()))
            .with_size(Some(9));
        assert!(verify_existing(&task).await.unwrap());
    }

    #[tokio::test]
    async fn verify_existing_rejects_wrong_size_or_hash() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("mod.jar");
        std::fs::write(&path, b"abc").unwrap();

        let wrong_size = DownloadTask::new("http://unused", &path).with_size(Some(4));
        assert!(!verify_existing(&wrong_size).await.unwrap());

        let wrong_hash =
            DownloadTask::new("http://unused", &path).with_sha1(Some(sha1_hex(b"abd")));
        assert!(!verify_existing(&wrong_hash).await.unwrap());

        let missing = DownloadTask::new("http://unused", tmp.path().join("nope.jar"));
        assert!(!verify_existing(&missing).await.unwrap());
    }

    #[tokio::test]
    async fn sha512_hashes_are_checked() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("a.bin");
        std::fs::write(&path, b"hello").unwrap();

        let mut h = Sha512::new();
        h.update(b"hello");
        let expected = format!("{:x}", h.finalize());

        let task = DownloadTask::new("http://unused", &path)
            .with_hash(Some(ExpectedHash::Sha512(expected)));
        assert!(verify_existing(&task).await.unwrap());
    }

    #[test]
    fn part_path_sits_next_to_destination() {
        let p = part_path(Path::new("/srv/mc/mods/foo.jar"));
        assert_eq!(p, PathBuf::from("/srv/mc/mods/foo.jar.part"));
    }

    #[test]
    fn zero_size_is_treated_as_unknown() {
        let task = DownloadTask::new("u", "d").with_size(Some(0));
        assert_eq!(task.expected_size, None);
    }
}
