//! HTTP client for the upstream prefix feed.

use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, IF_MODIFIED_SINCE};
use reqwest::{Client, StatusCode};
use std::io::Write;
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::store::Store;

/// Upper bound for one feed download (64 MB).
/// The published ip-ranges.json is a few MB, so this only trips on a broken upstream
const MAX_FEED_SIZE: u64 = 64 * 1024 * 1024;

/// What a conditional fetch produced
#[derive(Debug)]
pub enum FeedDownload {
    /// Fresh bytes, staged next to the cached copy and not yet committed
    Modified(NamedTempFile),
    /// Upstream reported 304; the cached copy is current
    NotModified,
}

/// HTTP client for fetching ip-ranges.json
pub struct Fetcher {
    client: Client,
    url: String,
}

impl Fetcher {
    /// Create a fetcher with one overall timeout per request
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent())
            .build()
            .map_err(|e| Error::FeedFetch(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Conditionally download the feed.
    ///
    /// Sends `If-Modified-Since` with the cached copy's mtime when there is
    /// one. A 200 body is streamed into a staging file inside the store.
    pub async fn fetch(&self, store: &Store) -> Result<FeedDownload> {
        let mut request = self
            .client
            .get(&self.url)
            .header(ACCEPT, "application/json");

        if let Some(modified) = store.feed_modified() {
            let since = http_date(modified);
            debug!("Requesting {} if modified since {}", self.url, since);
            request = request.header(IF_MODIFIED_SINCE, since);
        }

        let mut response = request
            .send()
            .await
            .map_err(|e| Error::FeedFetch(format!("{}: {}", self.url, e)))?;

        match response.status() {
            StatusCode::OK => {
                info!("Change detected, downloading new ip-ranges.json");
            }
            StatusCode::NOT_MODIFIED => {
                info!("No change found, reloading cached ip-ranges.json");
                return Ok(FeedDownload::NotModified);
            }
            status => {
                warn!("Unexpected http response: {}", status);
                return Err(Error::FeedFetch(format!("unexpected http response: {}", status)));
            }
        }

        if let Some(length) = response.content_length() {
            if length > MAX_FEED_SIZE {
                return Err(Error::FeedFetch(format!(
                    "response too large: {} bytes (max: {} bytes)",
                    length, MAX_FEED_SIZE
                )));
            }
        }

        let mut staged = store.feed_staging()?;
        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::FeedFetch(format!("failed to read response body: {}", e)))?
        {
            written += chunk.len() as u64;
            if written > MAX_FEED_SIZE {
                return Err(Error::FeedFetch(format!(
                    "downloaded content too large: more than {} bytes",
                    MAX_FEED_SIZE
                )));
            }
            staged
                .write_all(&chunk)
                .map_err(|e| Error::persistence(staged.path(), e))?;
        }
        staged
            .flush()
            .map_err(|e| Error::persistence(staged.path(), e))?;

        debug!("Downloaded {} bytes from {}", written, self.url);
        Ok(FeedDownload::Modified(staged))
    }
}

/// `User-Agent` sent with every request
pub fn user_agent() -> String {
    format!("awsrangeroute/{}", env!("CARGO_PKG_VERSION"))
}

/// Format a timestamp as an RFC 7231 HTTP-date
pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
