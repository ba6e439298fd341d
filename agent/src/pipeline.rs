use crate::callbacks::{Callback, ProgressEvent, Stage};
use crate::llm;
use crate::scrape::{self, PageFetcher};
use crate::search::{SearchEngine, Searcher, SearcherConfig};
use crate::{Error, Result};
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Instant;

/// Per-page cap on kept content, in characters.
pub const MAX_CONTENT_CHARS: usize = 100_000;

#[derive(Clone, Debug, Default)]
pub struct ResearchOutcome {
    pub topic: String,
    pub queries: Vec<String>,
    pub urls: Vec<String>,
    /// URL to extracted content, in the order pages finished.
    pub scraped: IndexMap<String, String>,
    /// URL to error message for pages that could not be used.
    pub errors: IndexMap<String, String>,
    pub elapsed_ms: f64,
}

fn truncate_chars(text: String, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text,
    }
}

/// Two straight-line stages: search for URLs, then scrape them.
pub struct Pipeline {
    searcher: Searcher,
    fetcher: Arc<dyn PageFetcher + Send + Sync>,
}

impl Pipeline {
    async fn scrape(
        &self,
        urls: &[String],
        callback: &dyn Callback,
    ) -> (IndexMap<String, String>, IndexMap<String, String>) {
        let mut scraped = IndexMap::new();
        let mut errors = IndexMap::new();

        if urls.is_empty() {
            tracing::warn!("no URLs to scrape, search returned empty results");
            return (scraped, errors);
        }

        tracing::info!(count = urls.len(), "scraping pages");
        for result in scrape::fetch_many(self.fetcher.as_ref(), urls, callback).await {
            match result.markdown {
                Some(markdown) if result.success && !markdown.is_empty() => {
                    scraped.insert(result.url, truncate_chars(markdown, MAX_CONTENT_CHARS));
                }
                _ => {
                    let error = result.error.unwrap_or_else(|| "Empty content".to_string());
                    errors.insert(result.url, error);
                }
            }
        }

        tracing::info!(
            succeeded = scraped.len(),
            failed = errors.len(),
            "scrape complete"
        );
        (scraped, errors)
    }

    pub async fn run(&self, topic: &str, callback: &dyn Callback) -> Result<ResearchOutcome> {
        let start = Instant::now();

        callback.on_event(&ProgressEvent::status(
            Stage::Searching,
            "Generating search queries...",
        ));
        let report = self.searcher.search(topic, callback).await?;

        callback.on_event(&ProgressEvent::status(
            Stage::Scraping,
            format!("Scraping {} pages...", report.unique_urls.len()),
        ));
        let (scraped, errors) = self.scrape(&report.unique_urls, callback).await;

        Ok(ResearchOutcome {
            topic: topic.to_string(),
            queries: report.queries,
            urls: report.unique_urls,
            scraped,
            errors,
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }
}

pub struct PipelineBuilder {
    llm: Option<Arc<dyn llm::LLM + Send + Sync>>,
    engine: Option<Arc<dyn SearchEngine + Send + Sync>>,
    fetcher: Option<Arc<dyn PageFetcher + Send + Sync>>,
    searcher_config: SearcherConfig,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            llm: None,
            engine: None,
            fetcher: None,
            searcher_config: SearcherConfig::default(),
        }
    }

    pub fn llm(mut self, llm: Arc<dyn llm::LLM + Send + Sync>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn search_engine(mut self, engine: Arc<dyn SearchEngine + Send + Sync>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn PageFetcher + Send + Sync>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn searcher_config(mut self, config: SearcherConfig) -> Self {
        self.searcher_config = config;
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let llm = self
            .llm
            .ok_or(Error::MissingArg("llm is required for pipeline".to_string()))?;
        let engine = self.engine.ok_or(Error::MissingArg(
            "search engine is required for pipeline".to_string(),
        ))?;

        Ok(Pipeline {
            searcher: Searcher::new(llm, engine, self.searcher_config),
            fetcher: self.fetcher.ok_or(Error::MissingArg(
                "fetcher is required for pipeline".to_string(),
            ))?,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionRequest, CompletionResponse, LLM};
    use crate::scrape::FetchResult;
    use crate::search::SearchHit;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct MockLLM(&'static str);

    #[async_trait]
    impl LLM for MockLLM {
        async fn completion<'a>(&self, _: CompletionRequest<'a>) -> Result<CompletionResponse> {
            Ok(CompletionResponse {
                content: self.0.to_string(),
            })
        }

        async fn models(&self) -> Result<Vec<String>> {
            Ok(vec!["mock".to_string()])
        }
    }

    struct MockEngine(Vec<&'static str>);

    #[async_trait]
    impl SearchEngine for MockEngine {
        async fn search(&self, _: &str, _: usize) -> Result<Vec<SearchHit>> {
            Ok(self
                .0
                .iter()
                .map(|url| SearchHit {
                    title: String::new(),
                    url: url.to_string(),
                    snippet: String::new(),
                })
                .collect())
        }
    }

    struct MockFetcher;

    #[async_trait]
    impl PageFetcher for MockFetcher {
        async fn fetch(&self, url: &str) -> FetchResult {
            if url.contains("broken") {
                return FetchResult::failed(url, "HTTP 503");
            }
            FetchResult {
                url: url.to_string(),
                markdown: Some("x".repeat(MAX_CONTENT_CHARS + 10)),
                success: true,
                ..Default::default()
            }
        }
    }

    fn pipeline(urls: Vec<&'static str>) -> Result<Pipeline> {
        PipelineBuilder::new()
            .llm(Arc::new(MockLLM(r#"["one query"]"#)))
            .search_engine(Arc::new(MockEngine(urls)))
            .fetcher(Arc::new(MockFetcher))
            .build()
    }

    #[tokio::test]
    async fn test_pipeline_runs_both_stages() -> Result<()> {
        let pipeline = pipeline(vec!["https://ok.com", "https://broken.com"])?;
        let events = Mutex::new(Vec::new());
        let callback = |e: &ProgressEvent| events.lock().unwrap().push(e.name());

        let outcome = pipeline.run("topic", &callback).await?;

        assert_eq!(outcome.topic, "topic");
        assert_eq!(outcome.queries, vec!["one query"]);
        assert_eq!(outcome.urls.len(), 2);
        assert_eq!(outcome.scraped["https://ok.com"].len(), MAX_CONTENT_CHARS);
        assert_eq!(outcome.errors["https://broken.com"], "HTTP 503");

        assert_eq!(
            events.into_inner().unwrap(),
            vec![
                "status",
                "queries_generated",
                "url_found",
                "url_found",
                "status",
                "scrape_progress",
                "scrape_progress",
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_pipeline_without_urls_skips_scrape() -> Result<()> {
        let pipeline = pipeline(vec![])?;
        let outcome = pipeline.run("nothing", &|_: &ProgressEvent| {}).await?;
        assert!(outcome.urls.is_empty());
        assert!(outcome.scraped.is_empty());
        assert!(outcome.errors.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_pipeline_propagates_query_failure() -> Result<()> {
        let pipeline = PipelineBuilder::new()
            .llm(Arc::new(MockLLM("")))
            .search_engine(Arc::new(MockEngine(vec![])))
            .fetcher(Arc::new(MockFetcher))
            .build()?;

        let err = pipeline.run("t", &|_: &ProgressEvent| {}).await.unwrap_err();
        assert!(matches!(err, Error::QueryParseError(_)));
        Ok(())
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let err = PipelineBuilder::new().build().err().unwrap();
        assert!(matches!(err, Error::MissingArg(_)));
    }

    #[test]
    fn test_truncate_chars_is_char_safe() {
        assert_eq!(truncate_chars("héllo".to_string(), 2), "hé");
        assert_eq!(truncate_chars("hi".to_string(), 5), "hi");
    }
}
