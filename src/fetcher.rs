use anyhow::{Context, Result};
use futures::StreamExt;
use reqwest::{Client, ClientBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::html_parser::PageDocument;
use crate::log_sink::LogSink;

pub const USER_AGENT: &str = concat!("WebsiteCloner/", env!("CARGO_PKG_VERSION"));

/// Timeouts and retry behaviour for every request a clone makes.
///
/// The defaults are the fixed policy of the tool; front-ends do not expose
/// them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPolicy {
    pub page_timeout: Duration,
    pub asset_timeout: Duration,
    /// Total tries per asset, the first one included.
    pub asset_attempts: u32,
    /// Pause after a failed asset attempt, skipped after the last one.
    pub retry_backoff: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            page_timeout: Duration::from_secs(15),
            asset_timeout: Duration::from_secs(15),
            asset_attempts: 3,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

pub fn build_http_client() -> Result<Client> {
    let client = ClientBuilder::new()
        .use_rustls_tls()
        .user_agent(USER_AGENT)
        .cookie_store(true)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    Ok(client)
}

/// Fetches and parses HTML pages.
#[derive(Clone)]
pub struct PageFetcher {
    client: Client,
    timeout: Duration,
    sink: Arc<dyn LogSink>,
}

impl PageFetcher {
    pub fn new(client: Client, timeout: Duration, sink: Arc<dyn LogSink>) -> Self {
        Self {
            client,
            timeout,
            sink,
        }
    }

    /// One GET, no retries. Transport errors and non-success statuses are
    /// returned as errors for the caller to report.
    pub async fn fetch(&self, url: &Url) -> Result<PageDocument> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("Request failed for {}", url))?
            .error_for_status()
            .with_context(|| format!("Bad response for {}", url))?;

        let final_url = response.url().clone();
        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !is_html_content_type(content_type) {
                self.sink.log(&format!(
                    "⚠️  {} is {}, parsing it as HTML anyway",
                    url, content_type
                ));
            }
        }

        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body of {}", url))?;

        Ok(PageDocument::parse(url.clone(), final_url, &body))
    }
}

/// What happened to one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetOutcome {
    /// Fetched and written during this call.
    Downloaded,
    /// The file was already on disk; no request was made.
    Reused,
    /// Every attempt failed. Nothing was left on disk.
    Failed,
}

/// Downloads assets to disk with bounded retries.
#[derive(Clone)]
pub struct AssetFetcher {
    client: Client,
    timeout: Duration,
    attempts: u32,
    backoff: Duration,
    sink: Arc<dyn LogSink>,
}

impl AssetFetcher {
    pub fn new(client: Client, policy: &FetchPolicy, sink: Arc<dyn LogSink>) -> Self {
        Self {
            client,
            timeout: policy.asset_timeout,
            attempts: policy.asset_attempts.max(1),
            backoff: policy.retry_backoff,
            sink,
        }
    }

    /// Makes sure `url` is stored at `local_path`.
    ///
    /// An existing file is trusted as-is. Otherwise the body is streamed to a
    /// `.part` file that only replaces `local_path` once complete, so a
    /// failed download never looks like a cached one.
    pub async fn fetch(&self, url: &Url, local_path: &Path) -> AssetOutcome {
        if local_path.exists() {
            tracing::debug!(%url, path = %local_path.display(), "asset already on disk");
            return AssetOutcome::Reused;
        }

        self.sink.log(&format!("⬇️  Downloading asset: {}", url));

        for attempt in 1..=self.attempts {
            match self.download(url, local_path).await {
                Ok(bytes) => {
                    tracing::debug!(%url, bytes, attempt, "asset saved");
                    return AssetOutcome::Downloaded;
                }
                Err(e) if attempt < self.attempts => {
                    tracing::debug!(
                        %url,
                        attempt,
                        error = %format!("{:#}", e),
                        "asset attempt failed, retrying"
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => {
                    self.sink.log(&format!(
                        "❌ Failed to download {} after {} attempts: {:#}",
                        url, self.attempts, e
                    ));
                }
            }
        }

        AssetOutcome::Failed
    }

    async fn download(&self, url: &Url, local_path: &Path) -> Result<u64> {
        let partial = partial_path(local_path);

        let result = match self.stream_to(url, &partial).await {
            Ok(written) => tokio::fs::rename(&partial, local_path)
                .await
                .map(|_| written)
                .with_context(|| format!("Failed to move {:?} into place", partial)),
            Err(e) => Err(e),
        };

        if result.is_err() {
            let _ = tokio::fs::remove_file(&partial).await;
        }
        result
    }

    async fn stream_to(&self, url: &Url, path: &Path) -> Result<u64> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("Request failed for {}", url))?
            .error_for_status()
            .with_context(|| format!("Bad response for {}", url))?;

        let mut file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("Failed to create file: {:?}", path))?;

        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("Failed to read body of {}", url))?;
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write to file: {:?}", path))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .with_context(|| format!("Failed to write to file: {:?}", path))?;

        Ok(written)
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn is_html_content_type(content_type: &str) -> bool {
    match content_type.parse::<mime::Mime>() {
        Ok(mime) => {
            (mime.type_() == mime::TEXT && mime.subtype() == mime::HTML)
                || mime.essence_str() == "application/xhtml+xml"
        }
        Err(_) => false,
    }
}
