#![allow(dead_code)]

use agent::callbacks::{Callback, ProgressEvent, Stage};
use async_trait::async_trait;
use research::runner::{
    JobRunner, JobStatus, PipelineOutput, ResearchPipeline, ResearchRequest, RunnerConfig,
};
use research::{Error, JobSnapshot, Result, Subscription};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const WAIT: Duration = Duration::from_secs(5);

/// Scripted pipeline driven by the job topic:
///
/// - `fail...`: emits one status event, then errors
/// - `panic...`: panics
/// - `burst...`: emits 100 `url_found` events 1 ms apart
/// - anything else: emits two events, waits for [`MockPipeline::release`],
///   then emits two more and succeeds
pub struct MockPipeline {
    gate: Semaphore,
    started: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockPipeline {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            started: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        })
    }

    /// Let `n` gated jobs finish.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Job ids in the order their runs began.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResearchPipeline for MockPipeline {
    async fn run(
        &self,
        job_id: &str,
        request: &ResearchRequest,
        callback: &dyn Callback,
    ) -> Result<PipelineOutput> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);
        self.started.lock().unwrap().push(job_id.to_string());

        let topic = request.topic.as_str();
        if topic.starts_with("fail") {
            callback.on_event(&ProgressEvent::status(
                Stage::Searching,
                "Generating search queries...",
            ));
            return Err(Error::Pipeline(agent::Error::LLMResponseError(
                "model went away".to_string(),
            )));
        }
        if topic.starts_with("panic") {
            panic!("pipeline exploded");
        }
        if topic.starts_with("burst") {
            for i in 0..100 {
                callback.on_event(&ProgressEvent::UrlFound {
                    url: format!("https://example.com/{}", i),
                    title: String::new(),
                    query: "burst".to_string(),
                });
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            return Ok(PipelineOutput {
                report_id: job_id.to_string(),
                urls_found: 100,
                ..Default::default()
            });
        }

        callback.on_event(&ProgressEvent::status(Stage::Searching, "Generating search queries..."));
        callback.on_event(&ProgressEvent::QueriesGenerated {
            queries: vec![topic.to_string()],
        });

        self.gate
            .acquire()
            .await
            .map_err(|e| Error::InvalidInput(e.to_string()))?
            .forget();

        callback.on_event(&ProgressEvent::UrlFound {
            url: "https://example.com/a".to_string(),
            title: "A".to_string(),
            query: topic.to_string(),
        });
        callback.on_event(&ProgressEvent::ScrapeProgress {
            url: "https://example.com/a".to_string(),
            success: true,
            chars: 120,
            elapsed_ms: 3.0,
            completed: 1,
            total: 1,
            error: None,
        });

        Ok(PipelineOutput {
            report_id: job_id.to_string(),
            urls_found: 1,
            pages_scraped: 1,
            pages_failed: 0,
            elapsed_ms: 5.0,
        })
    }
}

pub fn runner(pipeline: Arc<MockPipeline>) -> JobRunner {
    runner_with(pipeline, RunnerConfig::default())
}

pub fn runner_with(pipeline: Arc<MockPipeline>, config: RunnerConfig) -> JobRunner {
    JobRunner::start(pipeline, config)
}

pub async fn wait_for(runner: &JobRunner, job_id: &str, status: JobStatus) -> JobSnapshot {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let job = runner.get_status(job_id).unwrap();
        if job.status == status {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} stuck in {:?}, expected {:?}",
            job_id,
            job.status,
            status
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Drain a subscription until it closes. Fails the test if it hangs.
pub async fn collect(mut sub: Subscription) -> Result<Vec<ProgressEvent>> {
    tokio::time::timeout(WAIT, async move {
        let mut events = Vec::new();
        while let Some(event) = sub.recv().await? {
            events.push(event);
        }
        Ok::<_, Error>(events)
    })
    .await
    .expect("subscription did not close")
}

pub fn names(events: &[ProgressEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}

pub const GATED_RUN: [&str; 5] = [
    "status",
    "queries_generated",
    "url_found",
    "scrape_progress",
    "complete",
];
