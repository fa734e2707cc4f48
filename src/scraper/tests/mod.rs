//! Scraper Tests Module
//!
//! Shared fakes for the network seams plus scenario tests that run the
//! class driver, workers and dedup store together.


use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::scraper::fetcher::{FetchFailureReason, FetchedImage};
use crate::scraper::{FetchFailure, ImageFetcher, UrlListSource};

/// Serves canned image responses and counts requests.
#[derive(Default)]
pub(crate) struct FakeFetcher {
    responses: Mutex<HashMap<String, Result<FetchedImage, FetchFailure>>>,
    requests: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeFetcher {
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub(crate) fn serve(&self, url: &str, content_type: &str, size: usize) {
        self.responses.lock().insert(
            url.to_string(),
            Ok(FetchedImage {
                content_type: Some(content_type.to_string()),
                bytes: vec![0xAB; size],
            }),
        );
    }

    pub(crate) fn fail(&self, url: &str, reason: FetchFailureReason) {
        self.responses
            .lock()
            .insert(url.to_string(), Err(FetchFailure::new(reason, "fake")));
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageFetcher for FakeFetcher {
    async fn fetch_image(&self, url: &str) -> Result<FetchedImage, FetchFailure> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .get(url)
            .cloned()
            .unwrap_or_else(|| Err(FetchFailure::new(FetchFailureReason::Connect, "unknown url")))
    }
}

/// URL lists keyed by wnid; unknown classes fail like an unreachable API.
#[derive(Default)]
pub(crate) struct FakeUrlList {
    lists: Mutex<HashMap<String, Vec<String>>>,
}

impl FakeUrlList {
    pub(crate) fn insert(&self, wnid: &str, urls: &[&str]) {
        self.lists
            .lock()
            .insert(wnid.to_string(), urls.iter().map(|u| u.to_string()).collect());
    }
}

#[async_trait]
impl UrlListSource for FakeUrlList {
    async fn fetch_url_list(&self, wnid: &str) -> Result<Vec<String>, FetchFailure> {
        self.lists
            .lock()
            .get(wnid)
            .cloned()
            .ok_or_else(|| FetchFailure::new(FetchFailureReason::Connect, "connection refused"))
    }
}
