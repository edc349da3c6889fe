//! # Ranged Fetcher
//!
//! Issues `Range` requests for consecutive byte windows of a remote resource.

use std::sync::Arc;
use std::time::Duration;

use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, RetryPolicy};
use bytes::Bytes;
use tracing::{debug, instrument, warn};

use crate::error::{PlaybackError, Result};

/// Fetches half-open byte ranges `[start, end)` of one URL.
#[derive(Clone)]
pub struct RangeFetcher {
    http: Arc<dyn HttpClient>,
    url: String,
    retry: RetryPolicy,
    timeout: Duration,
}

impl std::fmt::Debug for RangeFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeFetcher")
            .field("url", &core_runtime::logging::redact_url(&self.url))
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RangeFetcher {
    pub fn new(
        http: Arc<dyn HttpClient>,
        url: impl Into<String>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            url: url.into(),
            retry,
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch `[start, end)`.
    ///
    /// A `206` body is returned as-is (servers may send less than asked near
    /// the end of the resource). A `200` means the range was ignored; the
    /// requested window is sliced out of the full body.
    #[instrument(skip(self), fields(url = %core_runtime::logging::redact_url(&self.url)))]
    pub async fn fetch(&self, start: u64, end: u64) -> Result<Bytes> {
        if end <= start {
            return Ok(Bytes::new());
        }

        let request = HttpRequest::new(HttpMethod::Get, self.url.clone())
            .range(start, end)
            .timeout(self.timeout);

        let response = self
            .http
            .execute_with_retry(request, self.retry.clone())
            .await
            .map_err(|err| PlaybackError::FetchFailure {
                status: None,
                message: err.to_string(),
            })?;

        if response.is_partial_content() {
            debug!(bytes = response.body.len(), "Range response received");
            return Ok(response.body);
        }

        if response.is_success() {
            let body = response.body;
            let from = usize::try_from(start).unwrap_or(usize::MAX).min(body.len());
            let to = usize::try_from(end).unwrap_or(usize::MAX).min(body.len());
            warn!(
                status = response.status,
                bytes = body.len(),
                "Server ignored range request, slicing full body"
            );
            return Ok(body.slice(from..to));
        }

        Err(PlaybackError::FetchFailure {
            status: Some(response.status),
            message: format!("unexpected status {} for bytes {}-{}", response.status, start, end),
        })
    }
}
