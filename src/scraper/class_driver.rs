//! Class Driver
//!
//! Scrapes the selected classes one after another. Within a class every URL
//! gets its own task, with a semaphore bounding how many run at once.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument};
use walkdir::WalkDir;

use crate::scraper::tui::class_progress_bar;
use crate::scraper::{
    ClassContext, ClassEntry, DedupStore, DownloadWorker, FetchFailure, ScrapeTarget, Simulated,
    UrlListSource, WorkerOutcome,
};

#[derive(Error, Debug)]
pub enum ClassDriverError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not fetch URL list for {wnid}: {source}")]
    UrlList {
        wnid: String,
        #[source]
        source: FetchFailure,
    },

    #[error("worker pool closed")]
    PoolClosed,
}

pub type ClassDriverResult<T> = Result<T, ClassDriverError>;

#[derive(Debug, Clone)]
pub struct ClassDriverSettings {
    pub images_per_class: usize,
    pub workers: usize,
    pub dry_run: bool,
    /// Pause before each URL list request.
    pub url_list_delay: Duration,
    pub show_progress: bool,
}

impl Default for ClassDriverSettings {
    fn default() -> Self {
        Self {
            images_per_class: 10,
            workers: 50,
            dry_run: false,
            url_list_delay: Duration::from_millis(50),
            show_progress: true,
        }
    }
}

/// What happened to one class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassSummary {
    pub wnid: String,
    pub urls: usize,
    /// Final value of the per-class progress counter.
    pub acquired: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub already_present: usize,
    pub would_download: usize,
}

impl ClassSummary {
    fn tally(&mut self, outcome: &WorkerOutcome) {
        match outcome {
            WorkerOutcome::Succeeded(_) => self.succeeded += 1,
            WorkerOutcome::Failed(_) => self.failed += 1,
            WorkerOutcome::Skipped(_) => self.skipped += 1,
            WorkerOutcome::Simulated(Simulated::AlreadyPresent) => self.already_present += 1,
            WorkerOutcome::Simulated(Simulated::WouldDownload) => self.would_download += 1,
            WorkerOutcome::Simulated(Simulated::WouldFail) => self.failed += 1,
        }
    }
}

/// Replaces characters that cannot appear in a folder name.
pub fn folder_component(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' | '\\' | '/' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// `<images_root>/<wnid>___<class name>`
pub fn class_folder(images_root: &Path, entry: &ClassEntry) -> PathBuf {
    images_root.join(format!("{}___{}", entry.wnid, folder_component(&entry.class_name)))
}

/// Number of class-view links already present from earlier runs.
pub fn count_existing_links(folder: &Path) -> usize {
    WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path_is_symlink())
        .count()
}

/// [`count_existing_links`] on the blocking pool.
pub async fn existing_links(folder: PathBuf) -> usize {
    match tokio::task::spawn_blocking(move || count_existing_links(&folder)).await {
        Ok(count) => count,
        Err(e) => {
            error!("Counting existing links failed: {}", e);
            0
        }
    }
}

pub struct ClassDriver {
    url_source: Arc<dyn UrlListSource>,
    worker: DownloadWorker,
    images_root: PathBuf,
    settings: ClassDriverSettings,
}

impl ClassDriver {
    pub fn new(
        url_source: Arc<dyn UrlListSource>,
        worker: DownloadWorker,
        images_root: impl Into<PathBuf>,
        settings: ClassDriverSettings,
    ) -> Self {
        Self {
            url_source,
            worker,
            images_root: images_root.into(),
            settings,
        }
    }

    /// Scrapes every class in order. A class whose URL list cannot be fetched is skipped.
    pub async fn run(&self, target: &ScrapeTarget) -> ClassDriverResult<Vec<ClassSummary>> {
        let total = target.len();
        let mut summaries = Vec::with_capacity(total);

        for (i, entry) in target.classes().iter().enumerate() {
            info!(
                "********************** ({:3}/{:4})   Scraping images for class: {}",
                i + 1,
                total,
                entry.class_name
            );
            match self.scrape_class(entry).await {
                Ok(summary) => summaries.push(summary),
                Err(ClassDriverError::UrlList { wnid, source }) => {
                    error!("Skipping class {}: could not fetch URL list: {}", wnid, source);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(summaries)
    }

    #[instrument(skip(self, entry), fields(wnid = %entry.wnid))]
    pub async fn scrape_class(&self, entry: &ClassEntry) -> ClassDriverResult<ClassSummary> {
        tokio::time::sleep(self.settings.url_list_delay).await;
        let urls = self
            .url_source
            .fetch_url_list(&entry.wnid)
            .await
            .map_err(|source| ClassDriverError::UrlList {
                wnid: entry.wnid.clone(),
                source,
            })?;
        info!("number of images for class: {}", urls.len());

        let folder = class_folder(&self.images_root, entry);
        if !self.settings.dry_run {
            tokio::fs::create_dir_all(&folder).await?;
        }
        let existing = existing_links(folder.clone()).await;
        if existing > 0 {
            info!("{} images already linked in {}", existing, folder.display());
        }

        let progress_bar = class_progress_bar(
            self.settings.images_per_class as u64,
            &entry.class_name,
            self.settings.show_progress,
        );
        let ctx = Arc::new(ClassContext::new(
            entry.wnid.clone(),
            DedupStore::new(folder),
            self.settings.images_per_class,
            progress_bar,
        ));

        info!("  Workers: {}", self.settings.workers);
        let mut summary = self.dispatch(ctx.clone(), urls).await?;
        ctx.progress_bar.finish();

        summary.wnid = entry.wnid.clone();
        summary.acquired = ctx.progress.current();
        if self.settings.dry_run {
            info!(
                "dry run: {} already present, {} would be downloaded, {} unusable",
                summary.already_present, summary.would_download, summary.failed
            );
        } else {
            info!(
                "class done: {} acquired, {} succeeded, {} failed",
                summary.acquired, summary.succeeded, summary.failed
            );
        }
        Ok(summary)
    }

    /// Feeds every URL to the worker pool and waits until all of them are done.
    pub async fn dispatch(&self, ctx: Arc<ClassContext>, urls: Vec<String>) -> ClassDriverResult<ClassSummary> {
        let semaphore = Arc::new(Semaphore::new(self.settings.workers.max(1)));
        let mut tasks = FuturesUnordered::new();
        let mut summary = ClassSummary {
            urls: urls.len(),
            ..ClassSummary::default()
        };

        for url in urls {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| ClassDriverError::PoolClosed)?;
            let worker = self.worker.clone();
            let ctx = ctx.clone();

            tasks.push(tokio::spawn(async move {
                let outcome = worker.process(&ctx, &url).await;
                drop(permit);
                outcome
            }));
        }

        while let Some(joined) = tasks.next().await {
            match joined {
                Ok(outcome) => summary.tally(&outcome),
                Err(e) => error!("Download task failed to complete: {}", e),
            }
        }

        Ok(summary)
    }
}
