use std::env::current_dir;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Error, bail};
use console::{Term, style};
use tracing::{Instrument, info, info_span, trace, warn};
use uuid::Uuid;

use crate::scraper::{
    AppConfig, Catalog, CatalogSelector, Category, ClassDriver, ClassDriverSettings,
    DebugStatsLog, DownloadWorker, HttpFetcher, ScrapeTarget, SelectionCriteria, StatField,
    StatsAggregator, WorkerSettings,
};

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The authors who created the package.
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// A program class that handles the flow of a scrape run and its steps of execution.
pub(crate) struct Program {
    config: AppConfig,
}

impl Program {
    /// Creates a new instance of the program from a resolved config.
    pub(crate) fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Runs the scraper program.
    pub(crate) async fn run(&self) -> Result<(), Error> {
        let run_id = Uuid::new_v4();
        self.execute()
            .instrument(info_span!("run", id = %run_id))
            .await
    }

    async fn execute(&self) -> Result<(), Error> {
        Term::stdout().set_title("imagenet scraper");
        trace!("Starting imagenet scraper...");
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        trace!("Program Authors: {}", AUTHORS);
        if let Ok(dir) = current_dir() {
            trace!("Program Working Directory: {}", dir.display());
        }

        let config = &self.config;
        let catalog_path = Path::new(&config.paths.catalog_file);
        let catalog = Catalog::load(catalog_path)
            .with_context(|| format!("could not load class catalog {}", catalog_path.display()))?;
        if catalog.is_empty() {
            bail!("class catalog {} has no classes", catalog_path.display());
        }
        info!("Loaded {} classes from {}", catalog.len(), catalog_path.display());

        let target = self.pick_classes(&catalog)?;
        if target.is_empty() {
            warn!("No classes picked, nothing to scrape");
            return Ok(());
        }
        println!("Picked the following classes:");
        println!("{:?}", target.class_names());

        let images_root = config.images_root();
        if config.scrape.dry_run {
            info!("Dry run: nothing will be downloaded or written");
        } else if !images_root.exists() {
            tokio::fs::create_dir_all(&images_root).await?;
            trace!("Created {}", images_root.display());
        }

        let mut stats = StatsAggregator::new(config.logging.report_every);
        if config.logging.debug {
            stats = stats.with_debug_log(DebugStatsLog::open(Path::new(&config.paths.stats_csv))?);
        }
        let stats = Arc::new(stats);

        let http = Arc::new(HttpFetcher::new(
            &config.network.user_agent,
            &config.network.url_list_endpoint,
            config.image_timeout(),
            config.url_list_timeout(),
        )?);

        let worker = DownloadWorker::new(
            http.clone(),
            stats.clone(),
            WorkerSettings {
                scrape_only_flickr: config.scrape.scrape_only_flickr,
                min_image_bytes: config.network.min_image_bytes,
                dry_run: config.scrape.dry_run,
            },
        );
        let driver = ClassDriver::new(
            http,
            worker,
            images_root,
            ClassDriverSettings {
                images_per_class: config.scrape.images_per_class,
                workers: config.scrape.workers,
                dry_run: config.scrape.dry_run,
                url_list_delay: Duration::from_millis(config.network.url_list_delay_ms),
                show_progress: true,
            },
        );

        let summaries = driver.run(&target).await?;
        for summary in &summaries {
            trace!(
                "{}: {} urls, {} acquired, {} skipped",
                summary.wnid,
                summary.urls,
                summary.acquired,
                summary.skipped
            );
        }
        info!(
            "Finished {} of {} classes: {} of {} attempts succeeded",
            summaries.len(),
            target.len(),
            stats.read(Category::All, StatField::Success),
            stats.attempts()
        );

        println!("\n{}", style("Final scraping stats:").bold());
        println!("{}", stats.report());

        Ok(())
    }

    fn pick_classes(&self, catalog: &Catalog) -> Result<ScrapeTarget, Error> {
        let scrape = &self.config.scrape;
        let criteria = SelectionCriteria {
            number_of_classes: scrape.number_of_classes,
            images_per_class: scrape.images_per_class,
            scrape_only_flickr: scrape.scrape_only_flickr,
            ignore_image_count: scrape.ignore_image_count,
            class_list: scrape
                .use_class_list
                .then(|| scrape.class_list.clone()),
        };

        let target = CatalogSelector::new(catalog).select(&criteria, &mut rand::rng())?;
        Ok(target)
    }
}
