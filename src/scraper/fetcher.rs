//! HTTP access for the scraper
//!
//! Image fetches are a single attempt with a short timeout. Every transport
//! problem becomes a [`FetchFailure`] carrying a reason tag; nothing is retried.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;

/// Why a fetch did not produce a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailureReason {
    Timeout,
    Connect,
    Redirect,
    InvalidUrl,
    Decode,
    Body,
    Other,
}

impl fmt::Display for FetchFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FetchFailureReason::Timeout => "timeout",
            FetchFailureReason::Connect => "connection error",
            FetchFailureReason::Redirect => "too many redirects",
            FetchFailureReason::InvalidUrl => "invalid url",
            FetchFailureReason::Decode => "decoding error",
            FetchFailureReason::Body => "body error",
            FetchFailureReason::Other => "request error",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone)]
#[error("{reason}: {message}")]
pub struct FetchFailure {
    pub reason: FetchFailureReason,
    pub message: String,
}

impl FetchFailure {
    pub fn new(reason: FetchFailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    /// Decoding-type failures hint at odd servers rather than dead links.
    pub fn is_noteworthy(&self) -> bool {
        matches!(self.reason, FetchFailureReason::Decode | FetchFailureReason::Body)
    }
}

impl From<reqwest::Error> for FetchFailure {
    fn from(e: reqwest::Error) -> Self {
        let reason = if e.is_timeout() {
            FetchFailureReason::Timeout
        } else if e.is_connect() {
            FetchFailureReason::Connect
        } else if e.is_redirect() {
            FetchFailureReason::Redirect
        } else if e.is_builder() {
            FetchFailureReason::InvalidUrl
        } else if e.is_decode() {
            FetchFailureReason::Decode
        } else if e.is_body() {
            FetchFailureReason::Body
        } else {
            FetchFailureReason::Other
        };
        Self::new(reason, e.to_string())
    }
}

/// Response of a successful image request; not yet validated.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FetchedImage {
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("image"))
    }
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch_image(&self, url: &str) -> Result<FetchedImage, FetchFailure>;
}

#[async_trait]
pub trait UrlListSource: Send + Sync {
    /// Image URLs known for a class, one per line of the remote listing.
    async fn fetch_url_list(&self, wnid: &str) -> Result<Vec<String>, FetchFailure>;
}

/// Splits a URL listing into lines, keeping blank ones out.
pub fn parse_url_list(body: &str) -> Vec<String> {
    body.lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Both fetchers over pooled reqwest clients. Image requests time out per
/// connect and per read, so a slow but steady transfer still completes.
#[derive(Clone)]
pub struct HttpFetcher {
    image_client: Client,
    list_client: Client,
    url_list_endpoint: String,
    url_list_timeout: Duration,
}

impl HttpFetcher {
    pub fn new(
        user_agent: &str,
        url_list_endpoint: &str,
        image_timeout: Duration,
        url_list_timeout: Duration,
    ) -> Result<Self, FetchFailure> {
        let image_client = Client::builder()
            .user_agent(user_agent)
            .gzip(true)
            .tcp_nodelay(true)
            .connect_timeout(image_timeout)
            .read_timeout(image_timeout)
            .build()?;
        let list_client = Client::builder()
            .user_agent(user_agent)
            .gzip(true)
            .build()?;

        Ok(Self {
            image_client,
            list_client,
            url_list_endpoint: url_list_endpoint.to_string(),
            url_list_timeout,
        })
    }

    pub fn url_list_url(&self, wnid: &str) -> String {
        self.url_list_endpoint.replace("{wnid}", wnid)
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch_image(&self, url: &str) -> Result<FetchedImage, FetchFailure> {
        let response = self.image_client.get(url).send().await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = response.bytes().await?.to_vec();

        Ok(FetchedImage {
            content_type,
            bytes,
        })
    }
}

#[async_trait]
impl UrlListSource for HttpFetcher {
    async fn fetch_url_list(&self, wnid: &str) -> Result<Vec<String>, FetchFailure> {
        let response = self
            .list_client
            .get(self.url_list_url(wnid))
            .timeout(self.url_list_timeout)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        Ok(parse_url_list(&body))
    }
}
