use crate::Result;
use crate::callbacks::{Callback, ProgressEvent};
use crate::llm::LLM;
use async_trait::async_trait;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

mod duckduckgo;
mod queries;

pub use duckduckgo::{DuckDuckGo, parse_results};
pub use queries::{QueryGenerator, parse_queries};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SafeSearch {
    Strict,
    Moderate,
    Off,
}

impl SafeSearch {
    /// Value of DuckDuckGo's `kp` parameter.
    pub fn code(&self) -> &'static str {
        match self {
            SafeSearch::Strict => "1",
            SafeSearch::Moderate => "-1",
            SafeSearch::Off => "-2",
        }
    }
}

impl FromStr for SafeSearch {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "on" | "strict" => Ok(SafeSearch::Strict),
            "moderate" => Ok(SafeSearch::Moderate),
            "off" => Ok(SafeSearch::Off),
            other => Err(format!("unknown safesearch level: {}", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeLimit {
    Day,
    Week,
    Month,
    Year,
}

impl TimeLimit {
    pub fn code(&self) -> &'static str {
        match self {
            TimeLimit::Day => "d",
            TimeLimit::Week => "w",
            TimeLimit::Month => "m",
            TimeLimit::Year => "y",
        }
    }
}

impl FromStr for TimeLimit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "d" => Ok(TimeLimit::Day),
            "w" => Ok(TimeLimit::Week),
            "m" => Ok(TimeLimit::Month),
            "y" => Ok(TimeLimit::Year),
            other => Err(format!("time limit must be one of d, w, m, y (got {})", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SearcherConfig {
    pub num_queries: usize,
    /// Higher values give more diverse queries.
    pub temperature: f32,
    pub results_per_query: usize,
    pub region: String,
    pub safesearch: SafeSearch,
    pub timelimit: Option<TimeLimit>,
    pub max_concurrent_searches: usize,
}

impl Default for SearcherConfig {
    fn default() -> Self {
        Self {
            num_queries: 3,
            temperature: 0.7,
            results_per_query: 3,
            region: "wt-wt".to_string(),
            safesearch: SafeSearch::Moderate,
            timelimit: None,
            max_concurrent_searches: 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait SearchEngine {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
}

pub struct SearchReport {
    pub queries: Vec<String>,
    /// Every hit in query order, paired with the query that found it.
    pub hits: Vec<(String, SearchHit)>,
    pub unique_urls: Vec<String>,
    pub elapsed_ms: f64,
}

/// Key used to decide whether two URLs point at the same page.
pub fn normalize_url(url: &str) -> String {
    url.trim_end_matches('/').to_lowercase()
}

/// Generates queries, runs them concurrently and deduplicates the result URLs.
pub struct Searcher {
    generator: QueryGenerator,
    engine: Arc<dyn SearchEngine + Send + Sync>,
    config: SearcherConfig,
}

impl Searcher {
    pub fn new(
        llm: Arc<dyn LLM + Send + Sync>,
        engine: Arc<dyn SearchEngine + Send + Sync>,
        config: SearcherConfig,
    ) -> Self {
        Self {
            generator: QueryGenerator::new(llm, config.num_queries, config.temperature),
            engine,
            config,
        }
    }

    async fn run_single_search(&self, query: &str, semaphore: &Semaphore) -> Vec<SearchHit> {
        let Ok(_permit) = semaphore.acquire().await else {
            return Vec::new();
        };

        tracing::debug!(query, "searching");
        match self
            .engine
            .search(query, self.config.results_per_query)
            .await
        {
            Ok(hits) => {
                tracing::debug!(query, count = hits.len(), "search results");
                hits
            }
            Err(e) => {
                tracing::warn!(query, error = %e, "search failed");
                Vec::new()
            }
        }
    }

    pub async fn search(&self, topic: &str, callback: &dyn Callback) -> Result<SearchReport> {
        let start = Instant::now();

        tracing::info!(topic, "generating search queries");
        let queries = self.generator.generate(topic).await?;
        callback.on_event(&ProgressEvent::QueriesGenerated {
            queries: queries.clone(),
        });

        tracing::info!(count = queries.len(), "executing searches");
        let semaphore = Semaphore::new(self.config.max_concurrent_searches.max(1));
        let batches = futures::future::join_all(
            queries
                .iter()
                .map(|q| self.run_single_search(q, &semaphore)),
        )
        .await;

        let mut hits = Vec::new();
        let mut seen = HashSet::new();
        let mut unique_urls = Vec::new();

        for (query, batch) in queries.iter().zip(batches) {
            for hit in batch {
                if seen.insert(normalize_url(&hit.url)) {
                    unique_urls.push(hit.url.clone());
                    callback.on_event(&ProgressEvent::UrlFound {
                        url: hit.url.clone(),
                        title: hit.title.clone(),
                        query: query.clone(),
                    });
                }
                hits.push((query.clone(), hit));
            }
        }

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        tracing::info!(
            total = hits.len(),
            unique = unique_urls.len(),
            elapsed_ms,
            "search complete"
        );

        Ok(SearchReport {
            queries,
            hits,
            unique_urls,
            elapsed_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::llm::{CompletionRequest, CompletionResponse};
    use std::sync::Mutex;

    struct MockLLM;

    #[async_trait]
    impl LLM for MockLLM {
        async fn completion<'a>(&self, _: CompletionRequest<'a>) -> Result<CompletionResponse> {
            Ok(CompletionResponse {
                content: r#"{"queries": ["first", "second", "broken"]}"#.to_string(),
            })
        }

        async fn models(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
    }

    struct MockEngine;

    fn hit(url: &str) -> SearchHit {
        SearchHit {
            title: format!("title of {}", url),
            url: url.to_string(),
            snippet: String::new(),
        }
    }

    #[async_trait]
    impl SearchEngine for MockEngine {
        async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
            assert_eq!(max_results, 3);
            match query {
                "first" => Ok(vec![hit("https://a.com/x"), hit("https://b.com")]),
                "second" => Ok(vec![hit("https://A.com/x/"), hit("https://c.com")]),
                _ => Err(Error::LLMResponseError("search exploded".to_string())),
            }
        }
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("https://Example.com/Path/"), "https://example.com/path");
        assert_eq!(normalize_url("https://example.com"), "https://example.com");
    }

    #[test]
    fn test_flag_parsing() {
        assert_eq!("moderate".parse::<SafeSearch>(), Ok(SafeSearch::Moderate));
        assert_eq!("OFF".parse::<SafeSearch>(), Ok(SafeSearch::Off));
        assert!("sometimes".parse::<SafeSearch>().is_err());
        assert_eq!("w".parse::<TimeLimit>(), Ok(TimeLimit::Week));
        assert!("x".parse::<TimeLimit>().is_err());
    }

    #[tokio::test]
    async fn test_search_dedupes_and_reports() -> Result<()> {
        let searcher = Searcher::new(
            Arc::new(MockLLM),
            Arc::new(MockEngine),
            SearcherConfig::default(),
        );

        let events = Mutex::new(Vec::new());
        let callback = |e: &ProgressEvent| events.lock().unwrap().push(e.clone());
        let report = searcher.search("anything", &callback).await?;

        assert_eq!(report.queries, vec!["first", "second", "broken"]);
        assert_eq!(report.hits.len(), 4);
        assert_eq!(
            report.unique_urls,
            vec!["https://a.com/x", "https://b.com", "https://c.com"]
        );

        let events = events.into_inner().unwrap();
        assert_eq!(events.len(), 4);
        assert!(matches!(
            &events[0],
            ProgressEvent::QueriesGenerated { queries } if queries.len() == 3
        ));
        assert!(matches!(&events[3], ProgressEvent::UrlFound { url, query, .. }
            if url == "https://c.com" && query == "second"));
        Ok(())
    }
}
