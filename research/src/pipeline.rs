use crate::Result;
use crate::config::ResearchConfig;
use crate::runner::{PipelineOutput, ResearchPipeline, ResearchRequest};
use crate::store::{ReportStats, ReportStore};
use agent::callbacks::{Callback, ProgressEvent, Stage};
use agent::llm::OpenAI;
use agent::scrape::HttpFetcher;
use agent::search::{DuckDuckGo, SearcherConfig};
use agent::{Pipeline, PipelineBuilder, report};
use async_trait::async_trait;
use std::sync::Arc;

/// Per-run overrides on top of the process configuration.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    pub model: Option<String>,
    pub num_queries: Option<usize>,
    pub results_per_query: Option<usize>,
}

impl From<&ResearchRequest> for RunOptions {
    fn from(request: &ResearchRequest) -> Self {
        Self {
            model: request.model.clone(),
            num_queries: request.num_queries,
            results_per_query: request.results_per_query,
        }
    }
}

/// Wire the Ollama client, DuckDuckGo and the HTTP fetcher into a pipeline.
pub fn build_pipeline(config: &ResearchConfig, options: &RunOptions) -> Result<Pipeline> {
    let model = options
        .model
        .clone()
        .unwrap_or_else(|| config.ollama_model.clone());
    let llm = OpenAI::ollama(model, &config.ollama_host, config.ollama_timeout)?;

    let search = SearcherConfig {
        num_queries: options.num_queries.unwrap_or(config.search.num_queries),
        results_per_query: options
            .results_per_query
            .unwrap_or(config.search.results_per_query),
        ..config.search.clone()
    };
    let engine = DuckDuckGo::new(search.region.clone(), search.safesearch, search.timelimit)?;
    let fetcher = HttpFetcher::new(config.fetcher.clone())?;

    Ok(PipelineBuilder::new()
        .llm(llm)
        .search_engine(Arc::new(engine))
        .fetcher(Arc::new(fetcher))
        .searcher_config(search)
        .build()?)
}

/// Runs a research job end to end and saves the report under the job id.
pub struct StoredResearch {
    config: ResearchConfig,
    store: ReportStore,
}

impl StoredResearch {
    pub fn new(config: ResearchConfig, store: ReportStore) -> Self {
        Self { config, store }
    }
}

#[async_trait]
impl ResearchPipeline for StoredResearch {
    async fn run(
        &self,
        job_id: &str,
        request: &ResearchRequest,
        callback: &dyn Callback,
    ) -> Result<PipelineOutput> {
        let pipeline = build_pipeline(&self.config, &RunOptions::from(request))?;
        let outcome = pipeline.run(&request.topic, callback).await?;

        callback.on_event(&ProgressEvent::status(
            Stage::Generating,
            "Generating report...",
        ));
        let markdown = report::render(&outcome);

        let stats = ReportStats {
            urls_found: outcome.urls.len(),
            pages_scraped: outcome.scraped.len(),
            pages_failed: outcome.errors.len(),
            elapsed_ms: outcome.elapsed_ms,
        };
        let store = self.store.clone();
        let report_id = job_id.to_string();
        let topic = outcome.topic.clone();
        let summary = tokio::task::spawn_blocking(move || {
            store.save(&report_id, &topic, &markdown, stats)
        })
        .await??;

        Ok(PipelineOutput {
            report_id: summary.id,
            urls_found: stats.urls_found,
            pages_scraped: stats.pages_scraped,
            pages_failed: stats.pages_failed,
            elapsed_ms: stats.elapsed_ms,
        })
    }
}
