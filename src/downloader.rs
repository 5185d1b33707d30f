use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::fetcher::{build_http_client, AssetFetcher, AssetOutcome, FetchPolicy, PageFetcher};
use crate::file_manager::{output_dir_name, FileManager};
use crate::frontier::Frontier;
use crate::html_parser::PageDocument;
use crate::log_sink::{ConsoleSink, LogSink};
use crate::naming::{authority, strip_fragment, NamingIndex};

/// Lifecycle of a clone job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Everything that can go wrong during a clone. Only `SeedUnreachable`,
/// `OutputUnavailable` and `WorkerLost` fail the job; the rest are recorded
/// and the crawl carries on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CloneError {
    SeedUnreachable { url: String, reason: String },
    OutputUnavailable { path: PathBuf, reason: String },
    PageFetchFailed { url: String, reason: String },
    AssetFetchFailed { url: String, page: String },
    CancelledByUser,
    WorkerLost { reason: String },
}

impl fmt::Display for CloneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloneError::SeedUnreachable { url, reason } => {
                write!(f, "seed {} is unreachable: {}", url, reason)
            }
            CloneError::OutputUnavailable { path, reason } => {
                write!(f, "cannot write to {:?}: {}", path, reason)
            }
            CloneError::PageFetchFailed { url, reason } => {
                write!(f, "page {} skipped: {}", url, reason)
            }
            CloneError::AssetFetchFailed { url, page } => {
                write!(f, "asset {} referenced by {} was not downloaded", url, page)
            }
            CloneError::CancelledByUser => write!(f, "cancelled by user"),
            CloneError::WorkerLost { reason } => write!(f, "clone worker stopped: {}", reason),
        }
    }
}

impl std::error::Error for CloneError {}

/// Settings for one clone.
#[derive(Debug, Clone)]
pub struct CloneOptions {
    pub seed_url: String,
    /// Directory the `<domain>/` output folder is created in.
    pub output_root: PathBuf,
    /// Crawl every same-domain page reachable from the seed, instead of the
    /// seed alone.
    pub follow_all: bool,
    pub policy: FetchPolicy,
}

impl CloneOptions {
    pub fn new(seed_url: impl Into<String>) -> Self {
        Self {
            seed_url: seed_url.into(),
            output_root: PathBuf::from("."),
            follow_all: true,
            policy: FetchPolicy::default(),
        }
    }

    pub fn output_root(mut self, output_root: impl Into<PathBuf>) -> Self {
        self.output_root = output_root.into();
        self
    }

    pub fn follow_all(mut self, follow_all: bool) -> Self {
        self.follow_all = follow_all;
        self
    }

    pub fn policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Outcome of a clone job.
#[derive(Debug, Clone, Serialize)]
pub struct CloneReport {
    pub state: CloneState,
    pub seed_url: String,
    /// Set only when the job completed.
    pub output_dir: Option<PathBuf>,
    pub pages_saved: usize,
    pub pages_failed: usize,
    pub assets_downloaded: usize,
    pub assets_reused: usize,
    pub assets_failed: usize,
    pub elapsed_secs: f64,
    /// Why the job failed or stopped.
    pub error: Option<CloneError>,
    /// Recoverable problems met along the way.
    pub failures: Vec<CloneError>,
}

impl CloneReport {
    fn new(seed_url: &str) -> Self {
        Self {
            state: CloneState::Idle,
            seed_url: seed_url.to_string(),
            output_dir: None,
            pages_saved: 0,
            pages_failed: 0,
            assets_downloaded: 0,
            assets_reused: 0,
            assets_failed: 0,
            elapsed_secs: 0.0,
            error: None,
            failures: Vec::new(),
        }
    }

    fn failed(seed_url: &str, error: CloneError) -> Self {
        Self {
            state: CloneState::Failed,
            error: Some(error),
            ..Self::new(seed_url)
        }
    }
}

/// Clones one website: crawls its pages breadth-first, downloads the assets
/// they need and saves self-contained copies.
///
/// The frontier, visited set and naming index live only for the duration of
/// [`WebsiteMirror::mirror_website`], so independent mirrors never share
/// state.
pub struct WebsiteMirror {
    options: CloneOptions,
    sink: Arc<dyn LogSink>,
    cancel: CancellationToken,
    state: CloneState,
}

impl WebsiteMirror {
    pub fn new(options: CloneOptions) -> Self {
        Self {
            options,
            sink: Arc::new(ConsoleSink::new()),
            cancel: CancellationToken::new(),
            state: CloneState::Idle,
        }
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> CloneState {
        self.state
    }

    pub fn options(&self) -> &CloneOptions {
        &self.options
    }

    /// Runs the clone on a dedicated worker thread with its own runtime, so
    /// the caller stays free to show progress and cancel.
    pub fn spawn(mut self) -> CloneHandle {
        let cancel = self.cancel.clone();
        let seed_url = self.options.seed_url.clone();
        let (tx, rx) = oneshot::channel();

        let spawned = std::thread::Builder::new()
            .name("clone-worker".to_string())
            .spawn(move || {
                let report = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(self.mirror_website()),
                    Err(e) => CloneReport::failed(
                        &self.options.seed_url,
                        CloneError::WorkerLost {
                            reason: e.to_string(),
                        },
                    ),
                };
                let _ = tx.send(report);
            });

        if let Err(e) = spawned {
            tracing::error!(error = %e, "failed to start clone worker");
        }

        CloneHandle {
            cancel,
            seed_url,
            report: rx,
        }
    }

    /// Runs the whole clone on the current task.
    ///
    /// The future is not `Send`: parsed pages are kept on the current thread
    /// while their assets download. Use [`WebsiteMirror::spawn`] to run it in
    /// the background.
    pub async fn mirror_website(&mut self) -> CloneReport {
        let started = Instant::now();
        let mut report = CloneReport::new(&self.options.seed_url);
        self.state = CloneState::Running;
        report.state = self.state;

        let seed = match Url::parse(self.options.seed_url.trim()) {
            Ok(url) => strip_fragment(&url),
            Err(e) => {
                let reason = format!("invalid URL: {}", e);
                return self.fail(report, started, self.seed_unreachable(reason));
            }
        };

        let client = match build_http_client() {
            Ok(client) => client,
            Err(e) => return self.fail(report, started, self.seed_unreachable(format!("{:#}", e))),
        };
        let pages = PageFetcher::new(
            client.clone(),
            self.options.policy.page_timeout,
            self.sink.clone(),
        );
        let assets = AssetFetcher::new(client, &self.options.policy, self.sink.clone());

        self.log(&format!("🚀 Cloning website: {}", seed));
        self.log(&format!("📥 Fetching: {}", seed));
        let seed_page = match pages.fetch(&seed).await {
            Ok(page) => page,
            Err(e) => {
                self.log(&format!("❌ Could not reach {}: {:#}", seed, e));
                return self.fail(report, started, self.seed_unreachable(format!("{:#}", e)));
            }
        };

        let domain = authority(&seed);
        let output_dir = self.options.output_root.join(output_dir_name(&seed));
        let files = match FileManager::new(&output_dir) {
            Ok(files) => files,
            Err(e) => {
                self.log(&format!("❌ {:#}", e));
                let error = CloneError::OutputUnavailable {
                    path: output_dir,
                    reason: format!("{:#}", e),
                };
                return self.fail(report, started, error);
            }
        };
        self.log(&format!("📁 Output directory: {}", files.base_dir().display()));

        let mut frontier = Frontier::new();
        let mut naming = NamingIndex::new();
        let mut failed_assets = HashSet::new();
        let mut prefetched = Some(seed_page);
        frontier.push(&seed);

        while !frontier.is_empty() {
            if self.cancel.is_cancelled() {
                self.rollback(&files);
                self.state = CloneState::Cancelled;
                report.state = self.state;
                report.error = Some(CloneError::CancelledByUser);
                report.elapsed_secs = started.elapsed().as_secs_f64();
                return report;
            }

            let Some(url) = frontier.pop() else {
                break;
            };
            if !frontier.mark_visited(&url) {
                tracing::trace!(%url, "already visited");
                continue;
            }

            // The seed is always popped first and was fetched above.
            let mut document = match prefetched.take() {
                Some(page) => page,
                None => {
                    self.log(&format!("📥 Fetching: {}", url));
                    match pages.fetch(&url).await {
                        Ok(page) => page,
                        Err(e) => {
                            self.log(&format!("❌ Skipping {}: {:#}", url, e));
                            report.pages_failed += 1;
                            report.failures.push(CloneError::PageFetchFailed {
                                url: url.to_string(),
                                reason: format!("{:#}", e),
                            });
                            continue;
                        }
                    }
                }
            };

            self.localize_assets(
                &mut document,
                &assets,
                &files,
                &mut naming,
                &mut failed_assets,
                &mut report,
            )
            .await;

            if self.options.follow_all {
                for link in document.internal_links(domain.as_deref()) {
                    if frontier.push(&link) {
                        tracing::debug!(%link, queued = frontier.len(), "queued page");
                    }
                }
            }

            document.rewrite_navigation(domain.as_deref());

            match files.save_page(&document.filename(), &document.to_html()) {
                Ok(path) => {
                    report.pages_saved += 1;
                    let shown = files.get_relative_path(&path).unwrap_or(path);
                    self.log(&format!("💾 Saved {} as {}", url, shown.display()));
                }
                Err(e) => {
                    self.log(&format!("❌ Failed to save {}: {:#}", url, e));
                    report.pages_failed += 1;
                    report.failures.push(CloneError::PageFetchFailed {
                        url: url.to_string(),
                        reason: format!("{:#}", e),
                    });
                }
            }

            if !self.options.follow_all {
                break;
            }
        }

        self.state = CloneState::Completed;
        report.state = self.state;
        report.output_dir = Some(files.base_dir().to_path_buf());
        report.elapsed_secs = started.elapsed().as_secs_f64();

        self.log(&format!(
            "✅ Cloned {} page(s), {} asset(s) into {} in {:.1}s",
            report.pages_saved,
            report.assets_downloaded + report.assets_reused,
            files.base_dir().display(),
            report.elapsed_secs
        ));
        if report.pages_failed > 0 || report.assets_failed > 0 {
            self.log(&format!(
                "⚠️  {} page(s) and {} asset(s) could not be fetched",
                report.pages_failed, report.assets_failed
            ));
        }

        report
    }

    /// Downloads every asset of `document` and points the references at the
    /// local copies. Failed downloads keep their remote URL, and an asset that
    /// failed once is not requested again for the rest of the run.
    async fn localize_assets(
        &self,
        document: &mut PageDocument,
        assets: &AssetFetcher,
        files: &FileManager,
        naming: &mut NamingIndex,
        failed: &mut HashSet<String>,
        report: &mut CloneReport,
    ) {
        let mut localized = HashMap::new();

        for reference in document.asset_references() {
            let key = reference.url.to_string();
            if localized.contains_key(&key) {
                continue;
            }
            if failed.contains(&key) {
                tracing::trace!(url = %key, "asset failed earlier in this run");
                continue;
            }

            let filename = naming.resolve(&reference.url);
            match assets.fetch(&reference.url, &files.asset_path(&filename)).await {
                AssetOutcome::Downloaded => {
                    report.assets_downloaded += 1;
                    localized.insert(key, files.asset_href(&filename));
                }
                AssetOutcome::Reused => {
                    report.assets_reused += 1;
                    localized.insert(key, files.asset_href(&filename));
                }
                AssetOutcome::Failed => {
                    report.assets_failed += 1;
                    report.failures.push(CloneError::AssetFetchFailed {
                        url: key.clone(),
                        page: document.url().to_string(),
                    });
                    failed.insert(key);
                }
            }
        }

        let rewritten = document.rewrite_assets(&localized);
        tracing::debug!(page = %document.url(), rewritten, "asset references localized");
    }

    fn rollback(&self, files: &FileManager) {
        self.log(&format!(
            "⚠️  Clone cancelled, removing {}",
            files.base_dir().display()
        ));
        if let Err(e) = files.remove_all() {
            self.log(&format!("❌ Cleanup failed: {:#}", e));
        }
    }

    fn fail(
        &mut self,
        mut report: CloneReport,
        started: Instant,
        error: CloneError,
    ) -> CloneReport {
        self.state = CloneState::Failed;
        report.state = self.state;
        report.error = Some(error);
        report.elapsed_secs = started.elapsed().as_secs_f64();
        report
    }

    fn seed_unreachable(&self, reason: String) -> CloneError {
        CloneError::SeedUnreachable {
            url: self.options.seed_url.clone(),
            reason,
        }
    }

    fn log(&self, line: &str) {
        self.sink.log(line);
    }
}

/// A clone running on its worker thread.
pub struct CloneHandle {
    cancel: CancellationToken,
    seed_url: String,
    report: oneshot::Receiver<CloneReport>,
}

impl CloneHandle {
    /// Requests cancellation. Takes effect before the next page starts;
    /// the partial output is then removed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> CloneReport {
        let CloneHandle { seed_url, report, .. } = self;
        report.await.unwrap_or_else(|_| worker_lost(&seed_url))
    }

    /// Blocking variant of [`CloneHandle::wait`] for callers outside an
    /// async runtime.
    pub fn wait_blocking(self) -> CloneReport {
        let CloneHandle { seed_url, report, .. } = self;
        report.blocking_recv().unwrap_or_else(|_| worker_lost(&seed_url))
    }
}

fn worker_lost(seed_url: &str) -> CloneReport {
    CloneReport::failed(
        seed_url,
        CloneError::WorkerLost {
            reason: "worker exited without a report".to_string(),
        },
    )
}

/// Clones `seed_url` into `./<domain>/` and returns that directory, or `None`
/// when the seed could not be fetched or the clone was cancelled.
///
/// Progress goes to `log_sink`, or to the console when none is given.
/// Setting `cancel` stops the crawl before the next page and removes
/// everything written so far.
pub async fn clone_website(
    seed_url: &str,
    log_sink: Option<Arc<dyn LogSink>>,
    follow_all: bool,
    cancel: Option<CancellationToken>,
) -> Option<PathBuf> {
    let mut mirror = WebsiteMirror::new(CloneOptions::new(seed_url).follow_all(follow_all));
    if let Some(sink) = log_sink {
        mirror = mirror.with_log_sink(sink);
    }
    if let Some(cancel) = cancel {
        mirror = mirror.with_cancel_token(cancel);
    }

    mirror.spawn().wait().await.output_dir
}
