//! Download Worker
//!
//! Handles exactly one URL: filter it, look for an existing copy, fetch it once,
//! validate, store, link, and book the outcome in the shared statistics.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use indicatif::ProgressBar;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::scraper::{
    AttemptStatus, Category, DedupError, DedupStore, FetchFailure, ImageFetcher, StatsAggregator,
    StoredImage, local_filename,
};

/// Images acquired so far for the class being scraped.
#[derive(Debug)]
pub struct ClassProgress {
    acquired: AtomicUsize,
    quota: usize,
}

impl ClassProgress {
    pub fn new(quota: usize) -> Self {
        Self {
            acquired: AtomicUsize::new(0),
            quota,
        }
    }

    pub fn current(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn quota_reached(&self) -> bool {
        self.current() >= self.quota
    }

    pub fn increment(&self) -> usize {
        self.acquired.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Everything a worker needs to know about the class being scraped.
pub struct ClassContext {
    pub wnid: String,
    pub store: DedupStore,
    pub progress: ClassProgress,
    pub progress_bar: ProgressBar,
}

impl ClassContext {
    pub fn new(wnid: impl Into<String>, store: DedupStore, quota: usize, progress_bar: ProgressBar) -> Self {
        Self {
            wnid: wnid.into(),
            store,
            progress: ClassProgress::new(quota),
            progress_bar,
        }
    }

    fn record_acquired(&self) {
        self.progress.increment();
        self.progress_bar.inc(1);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The URL line is empty or a single character.
    TooShortUrl,
    QuotaReached,
    /// Not flickr-hosted while only flickr is scraped.
    NotFlickr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessPath {
    /// The class already links this image; no request was made.
    AlreadyLinked,
    /// The file was stored by an earlier run that never linked it.
    Relinked,
    Downloaded,
}

#[derive(Error, Debug, Clone)]
pub enum FailureReason {
    #[error("no usable filename")]
    EmptyFilename,

    #[error("fetch failed: {0}")]
    Fetch(FetchFailure),

    #[error("not an image (content type {0:?})")]
    NotAnImage(Option<String>),

    #[error("image too small ({0} bytes)")]
    TooSmall(usize),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<DedupError> for FailureReason {
    fn from(e: DedupError) -> Self {
        FailureReason::Storage(e.to_string())
    }
}

impl From<std::io::Error> for FailureReason {
    fn from(e: std::io::Error) -> Self {
        FailureReason::Storage(e.to_string())
    }
}

/// What a dry run found for a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Simulated {
    AlreadyPresent,
    WouldDownload,
    WouldFail,
}

#[derive(Debug, Clone)]
pub enum WorkerOutcome {
    /// Filtered before counting as an attempt.
    Skipped(SkipReason),
    Succeeded(SuccessPath),
    Failed(FailureReason),
    Simulated(Simulated),
}

impl WorkerOutcome {
    #[cfg(test)]
    pub fn is_success(&self) -> bool {
        matches!(self, WorkerOutcome::Succeeded(_))
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub scrape_only_flickr: bool,
    pub min_image_bytes: usize,
    pub dry_run: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            scrape_only_flickr: true,
            min_image_bytes: 1000,
            dry_run: false,
        }
    }
}

/// Cheap to clone; one clone per spawned task.
#[derive(Clone)]
pub struct DownloadWorker {
    fetcher: Arc<dyn ImageFetcher>,
    stats: Arc<StatsAggregator>,
    settings: WorkerSettings,
}

impl DownloadWorker {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, stats: Arc<StatsAggregator>, settings: WorkerSettings) -> Self {
        Self {
            fetcher,
            stats,
            settings,
        }
    }

    /// Runs the whole contract for one URL. Never fails; failures end up in the stats.
    pub async fn process(&self, ctx: &ClassContext, url: &str) -> WorkerOutcome {
        if url.len() <= 1 {
            return WorkerOutcome::Skipped(SkipReason::TooShortUrl);
        }
        if ctx.progress.quota_reached() {
            return WorkerOutcome::Skipped(SkipReason::QuotaReached);
        }

        debug!("{}", url);

        let category = Category::of_url(url);
        if category == Category::NonFlickr && self.settings.scrape_only_flickr {
            return WorkerOutcome::Skipped(SkipReason::NotFlickr);
        }

        if self.settings.dry_run {
            return WorkerOutcome::Simulated(self.simulate(ctx, url).await);
        }

        let started = Instant::now();
        self.stats.register_attempt();

        match self.attempt(ctx, url).await {
            Ok(path) => {
                self.finish(category, started, AttemptStatus::Success);
                WorkerOutcome::Succeeded(path)
            }
            Err(reason) => {
                match &reason {
                    FailureReason::Fetch(f) if f.is_noteworthy() => {
                        warn!("{} for \"{}\": {}", f.reason, url, f.message)
                    }
                    FailureReason::Storage(e) => {
                        warn!("Could not store \"{}\" for {}: {}", url, ctx.wnid, e)
                    }
                    other => debug!("Failed \"{}\": {}", url, other),
                }
                self.finish(category, started, AttemptStatus::Failure);
                WorkerOutcome::Failed(reason)
            }
        }
    }

    fn finish(&self, category: Category, started: Instant, status: AttemptStatus) {
        self.stats.record_attempt(category, started.elapsed(), status);
    }

    async fn attempt(&self, ctx: &ClassContext, url: &str) -> Result<SuccessPath, FailureReason> {
        let name = local_filename(url).ok_or(FailureReason::EmptyFilename)?;
        let image = ctx.store.resolve(&name)?;

        if ctx.store.link_exists(&image).await {
            ctx.record_acquired();
            debug!("file already downloaded: {}", image.name);
            return Ok(SuccessPath::AlreadyLinked);
        }

        ctx.store.prepare(&image).await?;
        if ctx.store.physical_exists(&image).await {
            debug!("file already downloaded but not linked: {}", image.name);
            ctx.store.ensure_link(&image).await?;
            ctx.record_acquired();
            return Ok(SuccessPath::Relinked);
        }

        let fetched = self
            .fetcher
            .fetch_image(url)
            .await
            .map_err(FailureReason::Fetch)?;

        if !fetched.is_image() {
            return Err(FailureReason::NotAnImage(fetched.content_type));
        }
        if fetched.bytes.len() < self.settings.min_image_bytes {
            return Err(FailureReason::TooSmall(fetched.bytes.len()));
        }

        debug!(
            content_type = ?fetched.content_type,
            size = fetched.bytes.len(),
            "Saving image in {}",
            image.physical_path.display()
        );
        write_physical(&image, &fetched.bytes).await?;
        ctx.store.ensure_link(&image).await?;
        ctx.record_acquired();
        self.stats.log_debug_report();

        Ok(SuccessPath::Downloaded)
    }

    async fn simulate(&self, ctx: &ClassContext, url: &str) -> Simulated {
        let Some(image) = local_filename(url).and_then(|name| ctx.store.resolve(&name).ok()) else {
            return Simulated::WouldFail;
        };
        if ctx.store.link_exists(&image).await || ctx.store.physical_exists(&image).await {
            debug!("dry run: {} already present", image.name);
            Simulated::AlreadyPresent
        } else {
            debug!("dry run: would download {} as {}", url, image.name);
            Simulated::WouldDownload
        }
    }
}

/// Writes to a private temporary sibling first so readers never see a partial file.
async fn write_physical(image: &StoredImage, bytes: &[u8]) -> Result<(), FailureReason> {
    let temp_path = image
        .physical_path
        .with_file_name(format!(".{}.{}.part", image.name, Uuid::new_v4()));

    fs::write(&temp_path, bytes).await?;
    if let Err(e) = fs::rename(&temp_path, &image.physical_path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    Ok(())
}
