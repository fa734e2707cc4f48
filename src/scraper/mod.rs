//! Scraper module for the ImageNet scraper
//! Contains the download engine: catalog selection, workers, dedup storage and stats

pub mod catalog;
pub mod class_driver;
pub mod config;
pub mod dedup_store;
pub mod download_worker;
pub mod fetcher;
pub mod logger;
pub mod stats;
pub(crate) mod tui;

#[cfg(test)]
mod tests;

// Re-export the types shared between components and the program
pub use config::{AppConfig, CliArgs, ConfigManager};

pub use catalog::{Catalog, CatalogSelector, ClassEntry, ScrapeTarget, SelectionCriteria};

pub use stats::{AttemptStatus, Category, DebugStatsLog, StatField, StatsAggregator};

pub use dedup_store::{DedupError, DedupStore, StoredImage, local_filename};

pub use fetcher::{FetchFailure, HttpFetcher, ImageFetcher, UrlListSource};

pub use download_worker::{ClassContext, DownloadWorker, Simulated, WorkerOutcome, WorkerSettings};

pub use class_driver::{ClassDriver, ClassDriverSettings};

pub use logger::init_logger;
