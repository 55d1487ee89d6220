//! Network side of the cache: downloading a remote video into a local file.
//!
//! [`VideoFetcher`] is the seam the cache store downloads through;
//! [`HttpFetcher`] is the production implementation on top of `reqwest`.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Request headers sent with a video download, and handed to the player
/// alongside remote URLs.
pub type RequestHeaders = BTreeMap<String, String>;

/// Write buffer for downloads (64 KB).
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Accept header value for video downloads.
pub const VIDEO_ACCEPT: &str = "video/*";

/// Build the headers for fetching a video with an optional bearer token.
#[must_use]
pub fn request_headers(auth_token: Option<&str>) -> RequestHeaders {
    let mut headers = RequestHeaders::new();
    if let Some(token) = auth_token.filter(|t| !t.is_empty()) {
        headers.insert("Authorization".to_string(), format!("Bearer {token}"));
    }
    headers.insert("Accept".to_string(), VIDEO_ACCEPT.to_string());
    headers
}

/// Downloads a remote resource into a local file.
#[async_trait]
pub trait VideoFetcher: Send + Sync {
    /// Fetch `url` with `headers` and write the body to `dest`, creating or
    /// truncating it.
    ///
    /// Returns the number of bytes written. On error `dest` may hold a partial
    /// body; the caller is responsible for removing it.
    async fn fetch_to(&self, url: &str, headers: &RequestHeaders, dest: &Path) -> Result<u64>;
}

/// HTTP(S) fetcher using a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with the HTTP stack's default timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        Self::with_connect_timeout(None)
    }

    /// Create a fetcher with an optional connect timeout.
    ///
    /// No overall request timeout is applied: a slow download stays in flight
    /// while playback streams from the network.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_connect_timeout(connect_timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            Error::Io(std::io::Error::other(format!(
                "Failed to create HTTP client: {e}"
            )))
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl VideoFetcher for HttpFetcher {
    async fn fetch_to(&self, url: &str, headers: &RequestHeaders, dest: &Path) -> Result<u64> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let mut response = request
            .send()
            .await
            .map_err(|e| Error::download_incomplete(url, format!("request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::download_incomplete(
                url,
                format!("authorization rejected ({status})"),
            ));
        }
        if !status.is_success() {
            return Err(Error::download_incomplete(url, format!("HTTP status {status}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !content_type.is_empty() && !content_type.starts_with("video/") {
            warn!("Unexpected content type for {}: {}", url, content_type);
        }
        let expected_len = response.content_length();

        let file = File::create(dest)
            .await
            .map_err(|e| Error::storage(dest, &e))?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
        let mut written: u64 = 0;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::download_incomplete(url, format!("transfer interrupted: {e}")))?
        {
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| Error::storage(dest, &e))?;
            written += chunk.len() as u64;
        }
        writer.flush().await.map_err(|e| Error::storage(dest, &e))?;

        if let Some(expected) = expected_len
            && expected != written
        {
            return Err(Error::download_incomplete(
                url,
                format!("received {written} of {expected} bytes"),
            ));
        }

        debug!("Fetched {} bytes from {}", written, url);
        Ok(written)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_request_headers_with_token() {
        let headers = request_headers(Some("abc123"));
        assert_eq!(headers.get("Authorization").unwrap(), "Bearer abc123");
        assert_eq!(headers.get("Accept").unwrap(), "video/*");
    }

    #[test]
    fn test_request_headers_without_token() {
        let headers = request_headers(None);
        assert!(!headers.contains_key("Authorization"));
        assert_eq!(headers.len(), 1);

        let headers = request_headers(Some(""));
        assert!(!headers.contains_key("Authorization"));
    }

    #[test]
    fn test_http_fetcher_builds() {
        assert!(HttpFetcher::new().is_ok());
        assert!(HttpFetcher::with_connect_timeout(Some(Duration::from_secs(5))).is_ok());
    }
}
