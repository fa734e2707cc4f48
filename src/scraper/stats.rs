//! Scrape statistics shared by every download worker
//!
//! Counters are kept per source category and always updated under one lock,
//! so a snapshot never shows more successes than attempts.

use std::fmt;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use console::style;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type StatsResult<T> = Result<T, StatsError>;

/// Source category a URL is counted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    All,
    Flickr,
    NonFlickr,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::All, Category::Flickr, Category::NonFlickr];

    /// Flickr-hosted when the URL mentions flickr anywhere.
    pub fn of_url(url: &str) -> Self {
        if url.contains("flickr") {
            Category::Flickr
        } else {
            Category::NonFlickr
        }
    }

    fn index(self) -> usize {
        match self {
            Category::All => 0,
            Category::Flickr => 1,
            Category::NonFlickr => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::All => "all",
            Category::Flickr => "is_flickr",
            Category::NonFlickr => "not_flickr",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatField {
    Tried,
    Success,
    TimeSpent,
}

/// Counters for one category.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatBucket {
    pub tried: u64,
    pub success: u64,
    pub time_spent_secs: f64,
}

impl StatBucket {
    fn get(&self, field: StatField) -> f64 {
        match field {
            StatField::Tried => self.tried as f64,
            StatField::Success => self.success as f64,
            StatField::TimeSpent => self.time_spent_secs,
        }
    }

    /// Successes are capped at the number of tries, so book `Tried` first.
    fn add(&mut self, field: StatField, delta: f64) {
        match field {
            StatField::Tried => self.tried += delta as u64,
            StatField::Success => self.success = (self.success + delta as u64).min(self.tried),
            StatField::TimeSpent => self.time_spent_secs += delta,
        }
    }
}

/// Final status of one attempted URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Success,
    Failure,
}

/// Derived numbers for one category at one point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryReport {
    pub category: Category,
    pub tried: u64,
    pub success: u64,
    /// Percentage, absent when nothing was tried.
    pub success_rate: Option<f64>,
    /// Wall-clock adjusted seconds per successful image, absent without successes.
    pub secs_per_success: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct StatsReport {
    pub categories: Vec<CategoryReport>,
}

impl StatsReport {
    #[cfg(test)]
    pub fn get(&self, category: Category) -> Option<&CategoryReport> {
        self.categories.iter().find(|r| r.category == category)
    }
}

impl fmt::Display for CategoryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "STATS For class {}:", self.category)?;
        write!(f, " tried {} urls with {} successes", self.tried, self.success)?;
        if let Some(rate) = self.success_rate {
            write!(f, "\n{}% success rate for {} urls ", rate, self.category)?;
        }
        if let Some(secs) = self.secs_per_success {
            write!(
                f,
                "\n{} seconds spent per {} succesful image download",
                secs, self.category
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, report) in self.categories.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", report)?;
        }
        Ok(())
    }
}

/// Append-only CSV of raw counters, one row per report milestone.
pub struct DebugStatsLog {
    writer: Mutex<csv::Writer<std::fs::File>>,
}

impl DebugStatsLog {
    pub const HEADER: [&'static str; 9] = [
        "all_tried",
        "all_success",
        "all_time_spent",
        "is_flickr_tried",
        "is_flickr_success",
        "is_flickr_time_spent",
        "not_flickr_tried",
        "not_flickr_success",
        "not_flickr_time_spent",
    ];

    /// Opens the file for appending and writes the header row.
    pub fn open(path: &Path) -> StatsResult<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer.write_record(Self::HEADER)?;
        writer.flush()?;
        Ok(Self {
            writer: Mutex::new(writer),
        })
    }

    pub fn append(&self, buckets: &[StatBucket; 3]) -> StatsResult<()> {
        let row: Vec<String> = Category::ALL
            .iter()
            .flat_map(|c| {
                let b = buckets[c.index()];
                [
                    b.tried.to_string(),
                    b.success.to_string(),
                    b.time_spent_secs.to_string(),
                ]
            })
            .collect();

        let mut writer = self.writer.lock();
        writer.write_record(&row)?;
        writer.flush()?;
        Ok(())
    }
}

/// Process-wide attempt counters, shared by every worker through an `Arc`.
pub struct StatsAggregator {
    buckets: Mutex<[StatBucket; 3]>,
    attempts: AtomicU64,
    report_every: u64,
    started: Instant,
    debug_log: Option<DebugStatsLog>,
}

impl StatsAggregator {
    pub fn new(report_every: u64) -> Self {
        Self {
            buckets: Mutex::new([StatBucket::default(); 3]),
            attempts: AtomicU64::new(0),
            report_every: report_every.max(1),
            started: Instant::now(),
            debug_log: None,
        }
    }

    pub fn with_debug_log(mut self, log: DebugStatsLog) -> Self {
        self.debug_log = Some(log);
        self
    }

    /// Adds `delta` to one field of one category. Workers book whole attempts
    /// through [`StatsAggregator::record_attempt`] instead.
    #[cfg(test)]
    pub fn increment(&self, category: Category, field: StatField, delta: f64) {
        self.buckets.lock()[category.index()].add(field, delta);
    }

    pub fn read(&self, category: Category, field: StatField) -> f64 {
        self.buckets.lock()[category.index()].get(field)
    }

    #[cfg(test)]
    pub fn snapshot(&self, category: Category) -> StatBucket {
        self.buckets.lock()[category.index()]
    }

    pub fn snapshot_all(&self) -> [StatBucket; 3] {
        *self.buckets.lock()
    }

    /// Books one finished attempt under its category and under `All` in a single step.
    pub fn record_attempt(&self, category: Category, elapsed: Duration, status: AttemptStatus) {
        let secs = elapsed.as_secs_f64();
        let mut buckets = self.buckets.lock();

        let mut targets = vec![category.index()];
        if category != Category::All {
            targets.push(Category::All.index());
        }
        for i in targets {
            let bucket = &mut buckets[i];
            bucket.add(StatField::TimeSpent, secs);
            bucket.add(StatField::Tried, 1.0);
            if status == AttemptStatus::Success {
                bucket.add(StatField::Success, 1.0);
            }
        }
    }

    /// Counts a URL that made it past filtering; prints the report on every milestone.
    pub fn register_attempt(&self) -> u64 {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if n % self.report_every == 0 {
            println!("\n{}", style("Scraping stats:").bold());
            println!("{}", self.report());

            if let Some(log) = &self.debug_log {
                if let Err(e) = log.append(&self.snapshot_all()) {
                    warn!("Failed to append stats row: {}", e);
                }
            }
        }
        n
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn report(&self) -> StatsReport {
        self.report_with_elapsed(self.started.elapsed())
    }

    /// Builds the report as if `wall` had passed since the aggregator was created.
    pub fn report_with_elapsed(&self, wall: Duration) -> StatsReport {
        let buckets = self.snapshot_all();
        let worker_time = buckets[Category::All.index()].time_spent_secs;

        // Summed worker time overstates wall time when workers run in parallel
        let ratio = if worker_time == 0.0 {
            1.0
        } else {
            wall.as_secs_f64() / worker_time
        };

        let categories = [Category::Flickr, Category::NonFlickr, Category::All]
            .into_iter()
            .map(|category| {
                let b = buckets[category.index()];
                CategoryReport {
                    category,
                    tried: b.tried,
                    success: b.success,
                    success_rate: (b.tried > 0).then(|| 100.0 * b.success as f64 / b.tried as f64),
                    secs_per_success: (b.success > 0)
                        .then(|| b.time_spent_secs * ratio / b.success as f64),
                }
            })
            .collect();

        StatsReport { categories }
    }

    pub fn log_debug_report(&self) {
        for report in self.report().categories {
            debug!(
                category = %report.category,
                tried = report.tried,
                success = report.success,
                success_rate = ?report.success_rate,
                secs_per_success = ?report.secs_per_success,
                "Scraping stats"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_url_category() {
        assert_eq!(Category::of_url("http://farm3.static.flickr.com/1/a.jpg"), Category::Flickr);
        assert_eq!(Category::of_url("http://www.example.com/flickrish.jpg"), Category::Flickr);
        assert_eq!(Category::of_url("http://www.example.com/a.jpg"), Category::NonFlickr);
    }

    #[test]
    fn test_increment_and_read() {
        let stats = StatsAggregator::new(250);
        stats.increment(Category::Flickr, StatField::Tried, 2.0);
        stats.increment(Category::Flickr, StatField::TimeSpent, 0.5);
        stats.increment(Category::Flickr, StatField::TimeSpent, 0.25);

        assert_eq!(stats.read(Category::Flickr, StatField::Tried), 2.0);
        assert_eq!(stats.read(Category::Flickr, StatField::TimeSpent), 0.75);
        assert_eq!(stats.read(Category::NonFlickr, StatField::Tried), 0.0);
        assert_eq!(stats.read(Category::All, StatField::Tried), 0.0);
    }

    #[test]
    fn test_success_never_exceeds_tried() {
        let stats = StatsAggregator::new(250);
        stats.increment(Category::Flickr, StatField::Success, 3.0);
        assert_eq!(stats.read(Category::Flickr, StatField::Success), 0.0);

        stats.increment(Category::Flickr, StatField::Tried, 2.0);
        stats.increment(Category::Flickr, StatField::Success, 3.0);
        assert_eq!(stats.read(Category::Flickr, StatField::Success), 2.0);
    }

    #[test]
    fn test_record_attempt_is_visible_through_read() {
        let stats = StatsAggregator::new(250);
        stats.record_attempt(Category::NonFlickr, Duration::from_millis(300), AttemptStatus::Success);

        for c in [Category::NonFlickr, Category::All] {
            assert_eq!(stats.read(c, StatField::Tried), 1.0);
            assert_eq!(stats.read(c, StatField::Success), 1.0);
            assert!((stats.read(c, StatField::TimeSpent) - 0.3).abs() < 1e-9);
        }
        assert_eq!(stats.read(Category::Flickr, StatField::Tried), 0.0);
    }

    #[test]
    fn test_record_attempt_counts_category_and_all() {
        let stats = StatsAggregator::new(250);
        stats.record_attempt(Category::Flickr, Duration::from_millis(500), AttemptStatus::Success);
        stats.record_attempt(Category::NonFlickr, Duration::from_millis(250), AttemptStatus::Failure);

        let all = stats.snapshot(Category::All);
        assert_eq!(all.tried, 2);
        assert_eq!(all.success, 1);
        assert!((all.time_spent_secs - 0.75).abs() < 1e-9);

        let flickr = stats.snapshot(Category::Flickr);
        assert_eq!((flickr.tried, flickr.success), (1, 1));
        let other = stats.snapshot(Category::NonFlickr);
        assert_eq!((other.tried, other.success), (1, 0));
    }

    #[test]
    fn test_concurrent_attempts_keep_tried_above_success() {
        let stats = Arc::new(StatsAggregator::new(1_000_000));
        let mut handles = Vec::new();

        for t in 0..8 {
            let stats = stats.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..500 {
                    let status = if (i + t) % 3 == 0 {
                        AttemptStatus::Failure
                    } else {
                        AttemptStatus::Success
                    };
                    stats.record_attempt(Category::Flickr, Duration::from_millis(1), status);
                    for c in Category::ALL {
                        let b = stats.snapshot(c);
                        assert!(b.tried >= b.success);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let all = stats.snapshot(Category::All);
        assert_eq!(all.tried, 4000);
        assert_eq!(stats.snapshot(Category::Flickr), all);
    }

    #[test]
    fn test_report_guards_zero_division() {
        let stats = StatsAggregator::new(250);
        let report = stats.report_with_elapsed(Duration::from_secs(10));
        for r in &report.categories {
            assert_eq!(r.success_rate, None);
            assert_eq!(r.secs_per_success, None);
        }
    }

    #[test]
    fn test_report_scales_worker_time_to_wall_time() {
        let stats = StatsAggregator::new(250);
        // Four workers each spend 2s in parallel: 8s of worker time
        for _ in 0..4 {
            stats.record_attempt(Category::Flickr, Duration::from_secs(2), AttemptStatus::Success);
        }
        let report = stats.report_with_elapsed(Duration::from_secs(2));

        let all = report.get(Category::All).unwrap();
        assert_eq!(all.success_rate, Some(100.0));
        // 8s * (2s / 8s) / 4 successes
        assert!((all.secs_per_success.unwrap() - 0.5).abs() < 1e-9);
        assert_eq!(report.get(Category::NonFlickr).unwrap().success_rate, None);
    }

    #[test]
    fn test_report_text() {
        let stats = StatsAggregator::new(250);
        stats.record_attempt(Category::NonFlickr, Duration::from_secs(1), AttemptStatus::Success);
        stats.record_attempt(Category::NonFlickr, Duration::from_secs(1), AttemptStatus::Failure);

        let text = stats.report_with_elapsed(Duration::from_secs(2)).to_string();
        assert!(text.contains("STATS For class not_flickr:"));
        assert!(text.contains(" tried 2 urls with 1 successes"));
        assert!(text.contains("50% success rate for not_flickr urls"));
    }

    #[test]
    fn test_milestone_writes_csv_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.csv");
        let log = DebugStatsLog::open(&path).unwrap();
        let stats = StatsAggregator::new(2).with_debug_log(log);

        for i in 1..=5 {
            stats.record_attempt(Category::Flickr, Duration::from_secs(1), AttemptStatus::Success);
            assert_eq!(stats.register_attempt(), i);
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        // header plus milestones 2 and 4
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], DebugStatsLog::HEADER.join(","));
        assert_eq!(lines[1].split(',').count(), 9);
        assert!(lines[1].starts_with("2,2,2,2,2,2,0,0,0"));
        assert!(lines[2].starts_with("4,4,4,"));
    }
}
