//! Single-slot job runner with per-subscriber progress fan-out.
//!
//! Jobs are queued FIFO and executed one at a time by a dispatcher task.
//! Every progress event a job emits is appended to that job's backlog and
//! pushed to each attached [`Subscription`], so late subscribers replay the
//! history and live ones keep receiving events as they happen.

use crate::{Error, Result};
use agent::callbacks::{Callback, ProgressEvent, Stage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const MAX_TOPIC_CHARS: usize = 500;
pub const MAX_MODEL_CHARS: usize = 100;
pub const MAX_QUERIES: usize = 10;
pub const MAX_RESULTS_PER_QUERY: usize = 10;

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Job records kept in memory. Only finished jobs are evicted.
    pub max_jobs: usize,
    /// Jobs allowed to wait for the execution slot. Treated as at least 1.
    pub max_pending: usize,
    /// Events buffered per subscriber before it is dropped as overrun.
    pub subscriber_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_jobs: 20,
            max_pending: 8,
            subscriber_capacity: 256,
        }
    }
}

/// A research job request. Unset parameters use the process configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub topic: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub num_queries: Option<usize>,
    #[serde(default)]
    pub results_per_query: Option<usize>,
}

fn check_range(field: &str, value: Option<usize>, max: usize) -> Result<()> {
    match value {
        Some(v) if !(1..=max).contains(&v) => Err(Error::InvalidInput(format!(
            "{} must be between 1 and {}",
            field, max
        ))),
        _ => Ok(()),
    }
}

impl ResearchRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    /// Check the request and return it with the topic and model trimmed.
    pub fn validate(self) -> Result<Self> {
        let topic = self.topic.trim().to_string();
        if topic.is_empty() {
            return Err(Error::InvalidInput("Topic cannot be empty".to_string()));
        }
        if topic.chars().count() > MAX_TOPIC_CHARS {
            return Err(Error::InvalidInput(format!(
                "Topic must be at most {} characters",
                MAX_TOPIC_CHARS
            )));
        }

        let model = self.model.map(|m| m.trim().to_string());
        if let Some(m) = &model {
            if m.is_empty() || m.chars().count() > MAX_MODEL_CHARS {
                return Err(Error::InvalidInput(format!(
                    "Model name must be between 1 and {} characters",
                    MAX_MODEL_CHARS
                )));
            }
        }

        check_range("num_queries", self.num_queries, MAX_QUERIES)?;
        check_range(
            "results_per_query",
            self.results_per_query,
            MAX_RESULTS_PER_QUERY,
        )?;

        Ok(Self {
            topic,
            model,
            ..self
        })
    }
}

/// What a successful pipeline run hands back to the runner.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PipelineOutput {
    pub report_id: String,
    pub urls_found: usize,
    pub pages_scraped: usize,
    pub pages_failed: usize,
    pub elapsed_ms: f64,
}

/// The work a job performs. Progress goes through `callback`; the terminal
/// `complete`/`error` event is emitted by the runner, not the pipeline.
#[async_trait]
pub trait ResearchPipeline: Send + Sync {
    async fn run(
        &self,
        job_id: &str,
        request: &ResearchRequest,
        callback: &dyn Callback,
    ) -> Result<PipelineOutput>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Point-in-time copy of a job record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub topic: String,
    pub model: Option<String>,
    pub num_queries: Option<usize>,
    pub results_per_query: Option<usize>,
    pub stage: Option<Stage>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub report_id: Option<String>,
    pub error: Option<String>,
    pub elapsed_ms: f64,
    pub urls_found: usize,
    pub pages_scraped: usize,
    pub pages_failed: usize,
}

struct Subscriber {
    tx: mpsc::Sender<ProgressEvent>,
    overrun: Arc<AtomicBool>,
}

struct Job {
    snapshot: JobSnapshot,
    request: ResearchRequest,
    started: Option<Instant>,
    backlog: Vec<ProgressEvent>,
    subscribers: Vec<Subscriber>,
}

impl Job {
    fn is_finished(&self) -> bool {
        self.snapshot.status.is_finished()
    }

    fn publish(&mut self, event: ProgressEvent) {
        match &event {
            ProgressEvent::Status { stage, .. } => self.snapshot.stage = Some(*stage),
            ProgressEvent::UrlFound { .. } => self.snapshot.urls_found += 1,
            ProgressEvent::ScrapeProgress { success: true, .. } => self.snapshot.pages_scraped += 1,
            ProgressEvent::ScrapeProgress { success: false, .. } => self.snapshot.pages_failed += 1,
            _ => {}
        }

        let job_id = &self.snapshot.job_id;
        self.subscribers
            .retain(|sub| match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(job_id = %job_id, "dropping subscriber that fell behind");
                    sub.overrun.store(true, Ordering::SeqCst);
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });

        let terminal = event.is_terminal();
        self.backlog.push(event);
        if terminal {
            // closes every live subscription once its queue drains
            self.subscribers.clear();
        }
    }

    fn finish(&mut self, outcome: std::result::Result<PipelineOutput, String>) {
        let now = Utc::now();
        self.snapshot.completed_at = Some(now);

        match outcome {
            Ok(output) => {
                self.snapshot.status = JobStatus::Completed;
                self.snapshot.report_id = Some(output.report_id.clone());
                self.snapshot.urls_found = output.urls_found;
                self.snapshot.pages_scraped = output.pages_scraped;
                self.snapshot.pages_failed = output.pages_failed;
                self.snapshot.elapsed_ms = output.elapsed_ms;
                self.publish(ProgressEvent::Complete {
                    report_id: output.report_id,
                    elapsed_ms: output.elapsed_ms,
                    urls_found: output.urls_found,
                    pages_scraped: output.pages_scraped,
                    pages_failed: output.pages_failed,
                });
            }
            Err(message) => {
                self.snapshot.status = JobStatus::Failed;
                self.snapshot.error = Some(message.clone());
                self.snapshot.elapsed_ms = self
                    .started
                    .map(|s| s.elapsed().as_secs_f64() * 1000.0)
                    .unwrap_or(0.0);
                self.publish(ProgressEvent::Error { message });
            }
        }
    }
}

#[derive(Default)]
struct RunnerState {
    /// Insertion order doubles as age order for eviction.
    jobs: IndexMap<String, Job>,
    pending: VecDeque<String>,
    running: Option<String>,
}

impl RunnerState {
    fn evict(&mut self, max_jobs: usize) {
        while self.jobs.len() >= max_jobs.max(1) {
            let Some(oldest) = self
                .jobs
                .iter()
                .find(|(_, job)| job.is_finished())
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            tracing::debug!(job_id = %oldest, "evicting finished job");
            self.jobs.shift_remove(&oldest);
        }
    }

    fn new_job_id(&self) -> String {
        loop {
            let id = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
            if !self.jobs.contains_key(&id) {
                return id;
            }
        }
    }
}

struct Inner {
    state: Mutex<RunnerState>,
    wake: Notify,
    cancel: CancellationToken,
    config: RunnerConfig,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, RunnerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move the oldest pending job into the execution slot.
    fn start_next(&self) -> Option<(String, ResearchRequest)> {
        let mut state = self.state();
        if state.running.is_some() {
            return None;
        }
        let job_id = state.pending.pop_front()?;
        let job = state.jobs.get_mut(&job_id)?;
        job.snapshot.status = JobStatus::Running;
        job.snapshot.started_at = Some(Utc::now());
        job.started = Some(Instant::now());
        let request = job.request.clone();
        state.running = Some(job_id.clone());
        Some((job_id, request))
    }

    fn finish(&self, job_id: &str, outcome: std::result::Result<PipelineOutput, String>) {
        let mut state = self.state();
        if state.running.as_deref() == Some(job_id) {
            state.running = None;
        }
        if let Some(job) = state.jobs.get_mut(job_id) {
            job.finish(outcome);
        }
    }

    fn abandon_pending(&self) {
        let mut state = self.state();
        let pending: Vec<String> = state.pending.drain(..).collect();
        for job_id in pending {
            if let Some(job) = state.jobs.get_mut(&job_id) {
                tracing::info!(job_id = %job_id, "dropping queued job on shutdown");
                job.finish(Err("Runner shut down before the job started".to_string()));
            }
        }
    }
}

/// Relays a running job's progress into the runner state.
struct JobSink {
    inner: Arc<Inner>,
    job_id: String,
}

impl Callback for JobSink {
    fn on_event(&self, event: &ProgressEvent) {
        if event.is_terminal() {
            tracing::warn!(
                job_id = %self.job_id,
                event = event.name(),
                "ignoring terminal event from pipeline"
            );
            return;
        }
        let mut state = self.inner.state();
        if let Some(job) = state.jobs.get_mut(&self.job_id) {
            job.publish(event.clone());
        }
    }
}

/// Live view of one job's events: the backlog recorded when subscribing,
/// then whatever the job emits afterwards.
pub struct Subscription {
    backlog: VecDeque<ProgressEvent>,
    rx: Option<mpsc::Receiver<ProgressEvent>>,
    overrun: Arc<AtomicBool>,
}

impl Subscription {
    /// Next event, or `None` once the stream is closed after the terminal
    /// event. A subscriber that fell behind gets `SubscriberOverrun` after
    /// the events it had already been sent.
    pub async fn recv(&mut self) -> Result<Option<ProgressEvent>> {
        if let Some(event) = self.backlog.pop_front() {
            return Ok(Some(event));
        }
        let Some(rx) = self.rx.as_mut() else {
            return Ok(None);
        };
        match rx.recv().await {
            Some(event) => Ok(Some(event)),
            None => {
                self.rx = None;
                if self.overrun.load(Ordering::SeqCst) {
                    Err(Error::SubscriberOverrun)
                } else {
                    Ok(None)
                }
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<ProgressEvent>> + Send {
        futures::stream::unfold(Some(self), |sub| async move {
            let mut sub = sub?;
            match sub.recv().await {
                Ok(Some(event)) => Some((Ok(event), Some(sub))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

/// Handle to the job runner. Clones share the same job table and dispatcher.
#[derive(Clone)]
pub struct JobRunner {
    inner: Arc<Inner>,
    dispatcher: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl JobRunner {
    /// Start the dispatcher on the current tokio runtime.
    pub fn start(pipeline: Arc<dyn ResearchPipeline>, config: RunnerConfig) -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(RunnerState::default()),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            config,
        });
        let handle = tokio::spawn(dispatch(inner.clone(), pipeline));

        Self {
            inner,
            dispatcher: Arc::new(Mutex::new(Some(handle))),
        }
    }

    pub fn submit(&self, request: ResearchRequest) -> Result<JobSnapshot> {
        let request = request.validate()?;

        let snapshot = {
            let mut state = self.inner.state();
            if self.inner.cancel.is_cancelled() {
                return Err(Error::ShuttingDown);
            }
            if state.pending.len() >= self.inner.config.max_pending.max(1) {
                return Err(Error::QueueFull);
            }
            state.evict(self.inner.config.max_jobs);

            let job_id = state.new_job_id();
            let snapshot = JobSnapshot {
                job_id: job_id.clone(),
                status: JobStatus::Pending,
                topic: request.topic.clone(),
                model: request.model.clone(),
                num_queries: request.num_queries,
                results_per_query: request.results_per_query,
                stage: None,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
                report_id: None,
                error: None,
                elapsed_ms: 0.0,
                urls_found: 0,
                pages_scraped: 0,
                pages_failed: 0,
            };
            state.jobs.insert(
                job_id.clone(),
                Job {
                    snapshot: snapshot.clone(),
                    request,
                    started: None,
                    backlog: Vec::new(),
                    subscribers: Vec::new(),
                },
            );
            state.pending.push_back(job_id);
            snapshot
        };

        tracing::info!(job_id = %snapshot.job_id, topic = %snapshot.topic, "research job queued");
        self.inner.wake.notify_one();
        Ok(snapshot)
    }

    pub fn get_status(&self, job_id: &str) -> Result<JobSnapshot> {
        self.inner
            .state()
            .jobs
            .get(job_id)
            .map(|job| job.snapshot.clone())
            .ok_or_else(|| Error::not_found("Job", job_id))
    }

    /// Every job still in the table, oldest first.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        self.inner
            .state()
            .jobs
            .values()
            .map(|job| job.snapshot.clone())
            .collect()
    }

    pub fn subscribe(&self, job_id: &str) -> Result<Subscription> {
        let mut state = self.inner.state();
        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| Error::not_found("Job", job_id))?;

        let backlog: VecDeque<ProgressEvent> = job.backlog.iter().cloned().collect();
        let overrun = Arc::new(AtomicBool::new(false));
        if job.is_finished() {
            return Ok(Subscription {
                backlog,
                rx: None,
                overrun,
            });
        }

        let (tx, rx) = mpsc::channel(self.inner.config.subscriber_capacity.max(1));
        job.subscribers.push(Subscriber {
            tx,
            overrun: overrun.clone(),
        });
        Ok(Subscription {
            backlog,
            rx: Some(rx),
            overrun,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.inner.state().running.is_some()
    }

    /// Stop accepting work, wait for the in-flight job, and fail the jobs
    /// still waiting in the queue.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "job dispatcher failed");
            }
        }
        self.inner.abandon_pending();
    }
}

async fn dispatch(inner: Arc<Inner>, pipeline: Arc<dyn ResearchPipeline>) {
    tracing::debug!("job dispatcher started");

    while !inner.cancel.is_cancelled() {
        let Some((job_id, request)) = inner.start_next() else {
            tokio::select! {
                _ = inner.cancel.cancelled() => {}
                _ = inner.wake.notified() => {}
            }
            continue;
        };

        tracing::info!(job_id = %job_id, topic = %request.topic, "research job started");
        let sink = JobSink {
            inner: inner.clone(),
            job_id: job_id.clone(),
        };
        let task = tokio::spawn({
            let pipeline = pipeline.clone();
            let job_id = job_id.clone();
            async move { pipeline.run(&job_id, &request, &sink).await }
        });

        let outcome = match task.await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) if e.is_panic() => Err("Research job crashed unexpectedly".to_string()),
            Err(e) => Err(e.to_string()),
        };

        match &outcome {
            Ok(output) => tracing::info!(
                job_id = %job_id,
                report_id = %output.report_id,
                elapsed_ms = output.elapsed_ms,
                "research job completed"
            ),
            Err(error) => tracing::error!(job_id = %job_id, error = %error, "research job failed"),
        }
        inner.finish(&job_id, outcome);
    }

    tracing::debug!("job dispatcher stopped");
}
