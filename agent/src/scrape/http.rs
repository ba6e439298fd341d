use crate::Result;
use crate::scrape::{FetchResult, FetcherConfig, PageFetcher, backoff_delay, html_to_markdown};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Instant;
use tokio::sync::Semaphore;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/126.0 Safari/537.36";

/// Plain HTTP page fetcher with retries, exponential backoff and a
/// concurrency ceiling shared by every fetch on this instance.
pub struct HttpFetcher {
    client: reqwest::Client,
    semaphore: Semaphore,
    config: FetcherConfig,
}

enum Attempt {
    Done(FetchResult),
    Retry(String),
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            semaphore: Semaphore::new(config.concurrency.max(1)),
            config,
        })
    }

    async fn attempt(&self, url: &str) -> Attempt {
        let Ok(_permit) = self.semaphore.acquire().await else {
            return Attempt::Done(FetchResult::failed(url, "fetcher closed"));
        };

        let start = Instant::now();
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Attempt::Retry(format!(
                    "Timeout ({} ms)",
                    self.config.request_timeout.as_millis()
                ));
            }
            Err(e) => return Attempt::Retry(e.to_string()),
        };

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let mut failed =
                FetchResult::failed(url, format!("HTTP {} for {}", status.as_u16(), url));
            failed.status_code = Some(status.as_u16());
            failed.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            return Attempt::Done(failed);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .to_ascii_lowercase();
        if !content_type.contains("html") && !content_type.starts_with("text/") {
            let mut failed =
                FetchResult::failed(url, format!("Unsupported content type: {}", content_type));
            failed.status_code = Some(status.as_u16());
            return Attempt::Done(failed);
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Attempt::Retry(e.to_string()),
        };
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let markdown = if content_type.contains("html") {
            html_to_markdown(&body, self.config.min_words)
        } else {
            body.trim().to_string()
        };

        if markdown.is_empty() {
            let mut failed = FetchResult::failed(url, "Empty content");
            failed.status_code = Some(status.as_u16());
            failed.elapsed_ms = elapsed_ms;
            return Attempt::Done(failed);
        }

        tracing::info!(url, elapsed_ms, chars = markdown.len(), "fetched page");
        Attempt::Done(FetchResult {
            url: url.to_string(),
            markdown: Some(markdown),
            success: true,
            elapsed_ms,
            error: None,
            status_code: Some(status.as_u16()),
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> FetchResult {
        let attempts = self.config.max_retries.max(1);
        let mut last_error = String::from("Unknown fetch error");

        for attempt in 1..=attempts {
            tracing::debug!(url, attempt, attempts, "fetching");

            match self.attempt(url).await {
                Attempt::Done(result) => {
                    if let Some(error) = &result.error {
                        tracing::warn!(url, error = %error, "fetch failed");
                    }
                    return result;
                }
                Attempt::Retry(error) => {
                    tracing::warn!(url, attempt, error = %error, "fetch attempt failed");
                    last_error = error;
                }
            }

            if attempt < attempts {
                tokio::time::sleep(backoff_delay(self.config.retry_backoff, attempt)).await;
            }
        }

        FetchResult::failed(url, last_error)
    }
}
