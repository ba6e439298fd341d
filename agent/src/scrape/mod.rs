use crate::callbacks::{Callback, ProgressEvent};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::time::Duration;

mod clean;
mod http;

pub use clean::html_to_markdown;
pub use http::HttpFetcher;

#[derive(Clone, Debug)]
pub struct FetcherConfig {
    pub request_timeout: Duration,
    /// Attempts per URL, including the first one.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Pages fetched at the same time.
    pub concurrency: usize,
    /// Text blocks shorter than this are pruned from the extracted content.
    pub min_words: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(15_000),
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
            concurrency: 6,
            min_words: 30,
        }
    }
}

/// Delay before retry number `attempt + 1`: `base * 2^(attempt - 1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

#[derive(Clone, Debug, Default)]
pub struct FetchResult {
    pub url: String,
    pub markdown: Option<String>,
    pub success: bool,
    pub elapsed_ms: f64,
    pub error: Option<String>,
    pub status_code: Option<u16>,
}

impl FetchResult {
    pub fn failed(url: &str, error: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn chars(&self) -> usize {
        self.markdown.as_deref().map_or(0, |m| m.chars().count())
    }
}

#[async_trait]
pub trait PageFetcher {
    /// Fetch one page. Failures are reported inside the result, not as errors.
    async fn fetch(&self, url: &str) -> FetchResult;
}

/// Fetch every URL concurrently and report each one as it finishes.
/// Results come back in completion order.
pub async fn fetch_many(
    fetcher: &(dyn PageFetcher + Send + Sync),
    urls: &[String],
    callback: &dyn Callback,
) -> Vec<FetchResult> {
    let total = urls.len();
    let mut pending: FuturesUnordered<_> = urls.iter().map(|url| fetcher.fetch(url)).collect();
    let mut results = Vec::with_capacity(total);

    while let Some(result) = pending.next().await {
        callback.on_event(&ProgressEvent::ScrapeProgress {
            url: result.url.clone(),
            success: result.success,
            chars: result.chars(),
            elapsed_ms: result.elapsed_ms,
            completed: results.len() + 1,
            total,
            error: result.error.clone(),
        });
        results.push(result);
    }

    results
}
