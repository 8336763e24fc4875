//! Single-URL resumable fetch: range resume, retry/backoff, checksum and
//! size verification.
//!
//! Built on `reqwest`, generalized from the teacher's upload-streaming use
//! of it in `backup-agent/src/executor/mod.rs` into a resumable download,
//! with the retry/backoff shape additionally grounded on
//! `other_examples/4a80fd24_oferchen-rsync__crates-core-src-client-mod.rs.rs`.
//! Byte counting during the streaming write is delegated to
//! [`crate::download::progress_stream::ProgressStream`].

use crate::error::CoreError;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RANGE};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

const DEFAULT_RETRIES: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_secs(1);
const USER_AGENT: &str = "airgap-sync/1.0";

pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub dest: PathBuf,
    pub expected_sha256: Option<String>,
    pub expected_size: Option<u64>,
    pub retries: Option<u32>,
    pub headers: Vec<(String, String)>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        DownloadRequest {
            url: url.into(),
            dest: dest.into(),
            expected_sha256: None,
            expected_size: None,
            retries: None,
            headers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub dest: PathBuf,
    pub size: u64,
    pub sha256: String,
    pub resumed: bool,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Jitter is replaceable so retry-delay tests stay deterministic.
type JitterFn = Arc<dyn Fn(Duration) -> Duration + Send + Sync>;

fn default_jitter(base: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let extra: f64 = rng.gen_range(0.0..0.5);
    base + Duration::from_secs_f64(base.as_secs_f64() * extra)
}

#[derive(Clone)]
pub struct DownloadClient {
    http: reqwest::Client,
    jitter: JitterFn,
}

impl Default for DownloadClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadClient {
    pub fn new() -> Self {
        DownloadClient {
            http: reqwest::Client::new(),
            jitter: Arc::new(default_jitter),
        }
    }

    pub fn with_jitter_fn(mut self, jitter: JitterFn) -> Self {
        self.jitter = jitter;
        self
    }

    pub async fn fetch(
        &self,
        req: &DownloadRequest,
        cancel: &CancellationToken,
        on_progress: Option<ProgressCallback>,
    ) -> Result<DownloadOutcome, CoreError> {
        let retries = req.retries.unwrap_or(DEFAULT_RETRIES);
        let start = Instant::now();
        let mut attempts = 0u32;
        let mut delay = BASE_BACKOFF;

        loop {
            attempts += 1;
            if cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }

            match self.attempt(req, cancel, on_progress.clone()).await {
                Ok((size, sha256, resumed)) => {
                    return Ok(DownloadOutcome {
                        dest: req.dest.clone(),
                        size,
                        sha256,
                        resumed,
                        attempts,
                        elapsed: start.elapsed(),
                    });
                }
                Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
                Err(e) if !e.is_retryable() => {
                    if matches!(e, CoreError::Http { .. }) {
                        fs::remove_file(&req.dest).await.ok();
                    }
                    return Err(e);
                }
                Err(e) if attempts > retries => return Err(e),
                Err(_) => {
                    let wait = (self.jitter)(delay);
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = cancel.cancelled() => return Err(CoreError::Cancelled),
                    }
                    delay *= 2;
                }
            }
        }
    }

    /// Steps 1-8 of the fetch algorithm, one attempt.
    async fn attempt(
        &self,
        req: &DownloadRequest,
        cancel: &CancellationToken,
        on_progress: Option<ProgressCallback>,
    ) -> Result<(u64, String, bool), CoreError> {
        let mut resumed = false;
        let mut start_offset = 0u64;

        if let Ok(meta) = fs::metadata(&req.dest).await {
            let existing = meta.len();
            match req.expected_size {
                Some(expected) if existing < expected => {
                    start_offset = existing;
                    resumed = true;
                }
                _ => {
                    fs::remove_file(&req.dest).await.ok();
                }
            }
        }

        if let Some(parent) = req.dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        for (k, v) in &req.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(v),
            ) {
                headers.insert(name, value);
            }
        }
        if resumed {
            headers.insert(
                RANGE,
                HeaderValue::from_str(&format!("bytes={start_offset}-")).unwrap(),
            );
        }

        let response = self
            .http
            .get(&req.url)
            .headers(headers)
            .send()
            .await
            .map_err(CoreError::from)?;

        let status = response.status();
        if status.as_u16() == 206 {
            // server honored the range, append.
        } else if status.is_success() {
            if resumed {
                start_offset = 0;
                resumed = false;
            }
        } else {
            let body_excerpt = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(500)
                .collect::<String>();
            return Err(CoreError::Http {
                status: status.as_u16(),
                message: format!("{} - {body_excerpt}", status.canonical_reason().unwrap_or("")),
            });
        }

        let mut file = if resumed {
            OpenOptions::new().append(true).open(&req.dest).await?
        } else {
            File::create(&req.dest).await?
        };

        let total_hint = req.expected_size.unwrap_or(0);
        let mut stream = crate::download::progress_stream::ProgressStream::new(
            response.bytes_stream(),
            start_offset,
            total_hint,
            on_progress.clone(),
        );
        use futures_util::StreamExt;

        loop {
            tokio::select! {
                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            file.write_all(&bytes).await?;
                        }
                        Some(Err(e)) => return Err(CoreError::from(e)),
                        None => break,
                    }
                }
                _ = cancel.cancelled() => return Err(CoreError::Cancelled),
            }
        }
        file.flush().await?;
        drop(file);

        let (final_size, digest) = hash_entire_file(&req.dest).await?;

        if let Some(expected) = &req.expected_sha256 {
            if &digest != expected {
                fs::remove_file(&req.dest).await.ok();
                return Err(CoreError::Integrity(format!(
                    "sha256 mismatch: expected {expected}, got {digest}"
                )));
            }
            if let Some(expected_size) = req.expected_size {
                if final_size != expected_size {
                    tracing::warn!(
                        url = %req.url,
                        expected_size,
                        final_size,
                        "downloaded size differs from expected size, but checksum matches; accepting"
                    );
                }
            }
        } else if let Some(expected_size) = req.expected_size {
            if final_size != expected_size {
                fs::remove_file(&req.dest).await.ok();
                return Err(CoreError::Integrity(format!(
                    "size mismatch: expected {expected_size}, got {final_size}"
                )));
            }
        }

        Ok((final_size, digest, resumed))
    }
}

async fn hash_entire_file(path: &Path) -> Result<(u64, String), CoreError> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((total, hex::encode(hasher.finalize())))
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    async fn spawn_server(
        handler: impl Fn(usize, Option<String>) -> (u16, Vec<(&'static str, String)>, Vec<u8>)
            + Send
            + Sync
            + 'static,
    ) -> (SocketAddr, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(handler);

        let counter_clone = counter.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                let handler = handler.clone();
                let counter = counter_clone.clone();
                tokio::spawn(async move {
                    let _ = serve_one(stream, handler, counter).await;
                });
            }
        });

        (addr, counter)
    }

    async fn serve_one(
        mut stream: tokio::net::TcpStream,
        handler: Arc<
            impl Fn(usize, Option<String>) -> (u16, Vec<(&'static str, String)>, Vec<u8>) + Send + Sync,
        >,
        counter: Arc<AtomicUsize>,
    ) -> Result<(), Infallible> {
        use tokio::io::{AsyncBufReadExt, BufReader};
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut request_line = String::new();
        reader.read_line(&mut request_line).await.ok();

        let mut range_header = None;
        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await.unwrap_or(0);
            if n == 0 || line == "\r\n" {
                break;
            }
            if let Some(v) = line.strip_prefix("Range: ") {
                range_header = Some(v.trim().to_string());
            }
        }

        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        let (status, headers, body) = handler(attempt, range_header);
        let reason = match status {
            200 => "OK",
            206 => "Partial Content",
            429 => "Too Many Requests",
            503 => "Service Unavailable",
            _ => "Error",
        };
        let mut response = format!("HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\n", body.len());
        for (k, v) in headers {
            response.push_str(&format!("{k}: {v}\r\n"));
        }
        response.push_str("\r\n");
        writer.write_all(response.as_bytes()).await.ok();
        writer.write_all(&body).await.ok();
        Ok(())
    }

    #[tokio::test]
    async fn resume_downloads_only_the_remaining_bytes() {
        let full: &[u8] = b"0123456789abcdefghij0123456789ab"; // 32 bytes, but scenario uses 52
        let full = {
            let mut v = full.to_vec();
            while v.len() < 52 {
                v.push(b'x');
            }
            v
        };
        let full_for_handler = full.clone();

        let (addr, _counter) = spawn_server(move |_attempt, range| {
            if let Some(range) = range {
                let start: usize = range
                    .trim_start_matches("bytes=")
                    .trim_end_matches('-')
                    .parse()
                    .unwrap();
                (206, vec![], full_for_handler[start..].to_vec())
            } else {
                (200, vec![], full_for_handler.clone())
            }
        })
        .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        tokio::fs::write(&dest, &full[..20]).await.unwrap();

        let digest = {
            let mut hasher = Sha256::new();
            hasher.update(&full);
            hex::encode(hasher.finalize())
        };

        let client = DownloadClient::new();
        let req = DownloadRequest {
            url: format!("http://{addr}/file"),
            dest: dest.clone(),
            expected_sha256: Some(digest.clone()),
            expected_size: Some(52),
            retries: Some(3),
            headers: vec![],
        };

        let outcome = client
            .fetch(&req, &CancellationToken::new(), None)
            .await
            .unwrap();

        assert!(outcome.resumed);
        assert_eq!(outcome.size, 52);
        assert_eq!(outcome.sha256, digest);
    }

    #[tokio::test]
    async fn checksum_failure_cleans_up_destination() {
        let body = b"Original file content".to_vec();
        let (addr, _counter) = spawn_server(move |_attempt, _range| (200, vec![], body.clone())).await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");

        let client = DownloadClient::new();
        let req = DownloadRequest {
            url: format!("http://{addr}/file"),
            dest: dest.clone(),
            expected_sha256: Some("0".repeat(64)),
            expected_size: None,
            retries: Some(0),
            headers: vec![],
        };

        let result = client.fetch(&req, &CancellationToken::new(), None).await;
        assert!(result.is_err());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn non_retryable_status_deletes_the_destination() {
        // Use expected_size so the existing partial file is treated as
        // resumable (kept, not pre-emptively deleted) before the request
        // that actually returns the non-retryable status.
        let (addr, counter) = spawn_server(move |_attempt, _range| (404, vec![], vec![])).await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");
        tokio::fs::write(&dest, b"partial content from a prior attempt").await.unwrap();

        let client = DownloadClient::new();
        let req = DownloadRequest {
            url: format!("http://{addr}/file"),
            dest: dest.clone(),
            expected_sha256: None,
            expected_size: Some(1_000),
            retries: Some(3),
            headers: vec![],
        };

        let result = client.fetch(&req, &CancellationToken::new(), None).await;
        assert!(result.is_err());
        assert!(!dest.exists());
        assert_eq!(counter.load(Ordering::SeqCst), 1, "must not retry a 404");
    }

    #[tokio::test]
    async fn retries_recover_after_transient_server_errors() {
        let body = b"Content after retries".to_vec();
        let (addr, counter) = spawn_server(move |attempt, _range| {
            if attempt < 2 {
                (503, vec![], vec![])
            } else {
                (200, vec![], body.clone())
            }
        })
        .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.bin");

        let client = DownloadClient::new().with_jitter_fn(Arc::new(|_| Duration::from_millis(1)));
        let req = DownloadRequest {
            url: format!("http://{addr}/file"),
            dest: dest.clone(),
            expected_sha256: None,
            expected_size: None,
            retries: Some(3),
            headers: vec![],
        };

        let outcome = client
            .fetch(&req, &CancellationToken::new(), None)
            .await
            .unwrap();

        assert_eq!(outcome.attempts, 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
