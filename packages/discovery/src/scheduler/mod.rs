//! Queue-connected concurrent execution of the discovery pipeline.
//!
//! Stages run as independent workers joined by bounded channels; a full
//! downstream queue blocks the upstream worker on enqueue, which is the
//! backpressure bounding memory when a slow stage falls behind. Jobs are
//! retried whole (not per stage) a small fixed number of times, then
//! marked failed with the triggering error recorded. Cancellation lets
//! the in-flight stage finish and skips the downstream enqueue.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{DiscoveryError, Result};
use crate::pipeline::{DiscoveryEngine, RunState};
use crate::types::request::{DiscoveryRequest, DiscoveryResponse};

/// Pipeline stages a job moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Search,
    Validate,
    Classify,
    Price,
    Completed,
    Failed,
}

impl JobStage {
    const WORK_STAGES: [JobStage; 4] = [
        JobStage::Search,
        JobStage::Validate,
        JobStage::Classify,
        JobStage::Price,
    ];

    fn next(self) -> JobStage {
        match self {
            JobStage::Search => JobStage::Validate,
            JobStage::Validate => JobStage::Classify,
            JobStage::Classify => JobStage::Price,
            JobStage::Price => JobStage::Completed,
            terminal => terminal,
        }
    }

    fn index(self) -> usize {
        match self {
            JobStage::Search => 0,
            JobStage::Validate => 1,
            JobStage::Classify => 2,
            JobStage::Price => 3,
            _ => unreachable!("terminal stages have no queue"),
        }
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStage::Search => "search",
            JobStage::Validate => "validate",
            JobStage::Classify => "classify",
            JobStage::Price => "price",
            JobStage::Completed => "completed",
            JobStage::Failed => "failed",
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Capacity of each stage queue
    pub queue_capacity: usize,

    /// Workers for the search/validate/classify stages
    pub stage_workers: usize,

    /// Workers for the price stage (most latency-heavy)
    pub price_workers: usize,

    /// Job-level retries on transient failure
    pub max_retries: u32,

    /// Deadline per stage execution
    pub stage_timeout: Duration,

    /// Deadline for enqueueing a new submission
    pub submit_timeout: Duration,

    /// Completed jobs kept before garbage collection
    pub max_completed_jobs: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 100,
            stage_workers: 1,
            price_workers: 2,
            max_retries: 2,
            stage_timeout: Duration::from_secs(60),
            submit_timeout: Duration::from_secs(5),
            max_completed_jobs: 50,
        }
    }
}

/// A job flowing through the pipeline (owned by whichever worker holds it).
struct Job {
    id: Uuid,
    request: DiscoveryRequest,
    state: RunState,
    stage: JobStage,
    retries: u32,
    created_at: DateTime<Utc>,
    started: Instant,
    cancel: CancellationToken,
}

/// Queryable snapshot of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: Uuid,
    pub stage: String,
    pub retries: u32,
    pub created_at: DateTime<Utc>,

    /// Depth of each stage queue at the moment this job was enqueued to it
    pub queue_depth_at_enqueue: HashMap<String, usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal outcome of a job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub id: Uuid,
    pub stage: JobStage,
    pub retries: u32,
    pub response: Option<DiscoveryResponse>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Point-in-time scheduler metrics.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerMetrics {
    pub jobs_submitted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_active: usize,
    pub avg_processing_time_ms: u64,
    pub queue_depths: HashMap<String, usize>,
    pub running: bool,
}

struct Tracked {
    status: JobStatus,
    cancel: CancellationToken,
}

struct Shared {
    engine: Arc<DiscoveryEngine>,
    config: SchedulerConfig,
    senders: Vec<mpsc::Sender<Job>>,
    active: RwLock<HashMap<Uuid, Tracked>>,
    completed: RwLock<HashMap<Uuid, JobOutcome>>,
    running: AtomicBool,
    jobs_submitted: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    processing_ms_total: AtomicU64,
}

/// The pipeline scheduler.
///
/// Construct, [`start`](Self::start), submit jobs, then
/// [`shutdown`](Self::shutdown) when the process stops.
pub struct PipelineScheduler {
    shared: Arc<Shared>,
    receivers: Vec<Arc<Mutex<mpsc::Receiver<Job>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

const DEQUEUE_POLL: Duration = Duration::from_millis(250);
const RESULT_POLL: Duration = Duration::from_millis(50);

impl PipelineScheduler {
    /// Create a scheduler over an engine.
    pub fn new(engine: Arc<DiscoveryEngine>, config: SchedulerConfig) -> Self {
        let mut senders = Vec::with_capacity(JobStage::WORK_STAGES.len());
        let mut receivers = Vec::with_capacity(JobStage::WORK_STAGES.len());
        for _ in JobStage::WORK_STAGES {
            let (tx, rx) = mpsc::channel(config.queue_capacity);
            senders.push(tx);
            receivers.push(Arc::new(Mutex::new(rx)));
        }
        info!(
            "PipelineScheduler initialized: queue_capacity={}, price_workers={}, max_retries={}",
            config.queue_capacity, config.price_workers, config.max_retries
        );
        Self {
            shared: Arc::new(Shared {
                engine,
                config,
                senders,
                active: RwLock::new(HashMap::new()),
                completed: RwLock::new(HashMap::new()),
                running: AtomicBool::new(false),
                jobs_submitted: AtomicU64::new(0),
                jobs_completed: AtomicU64::new(0),
                jobs_failed: AtomicU64::new(0),
                processing_ms_total: AtomicU64::new(0),
            }),
            receivers,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Start the stage workers.
    pub async fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            warn!("Pipeline is already running");
            return;
        }
        let mut workers = self.workers.lock().await;
        for stage in JobStage::WORK_STAGES {
            let count = if stage == JobStage::Price {
                self.shared.config.price_workers
            } else {
                self.shared.config.stage_workers
            };
            for i in 0..count {
                let shared = self.shared.clone();
                let receiver = self.receivers[stage.index()].clone();
                workers.push(tokio::spawn(async move {
                    stage_worker(shared, receiver, stage, i).await;
                }));
            }
            debug!("Started {} workers for {}", count, stage.as_str());
        }
        info!("Pipeline scheduler started");
    }

    /// Stop the workers and drain nothing further.
    pub async fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut workers = self.workers.lock().await;
        for worker in workers.drain(..) {
            if let Err(e) = worker.await {
                if !e.is_cancelled() {
                    error!("Stage worker panicked: {}", e);
                }
            }
        }
        info!("Pipeline scheduler stopped");
    }

    /// Submit one job; returns its id for tracking.
    pub async fn submit(&self, request: DiscoveryRequest) -> Result<Uuid> {
        // Reject malformed markets before anything is queued
        let state = RunState::new(&request)?;
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let job = Job {
            id,
            request,
            state,
            stage: JobStage::Search,
            retries: 0,
            created_at: Utc::now(),
            started: Instant::now(),
            cancel: cancel.clone(),
        };

        let depth = queue_depth(&self.shared.senders[JobStage::Search.index()]);
        let mut status = JobStatus {
            id,
            stage: JobStage::Search.as_str().to_string(),
            retries: 0,
            created_at: job.created_at,
            queue_depth_at_enqueue: HashMap::new(),
            error: None,
        };
        status
            .queue_depth_at_enqueue
            .insert(JobStage::Search.as_str().to_string(), depth);

        self.shared
            .active
            .write()
            .await
            .insert(id, Tracked { status, cancel });

        let send = self.shared.senders[JobStage::Search.index()].send(job);
        match tokio::time::timeout(self.shared.config.submit_timeout, send).await {
            Ok(Ok(())) => {
                self.shared.jobs_submitted.fetch_add(1, Ordering::Relaxed);
                info!("Submitted job {}", id);
                Ok(id)
            }
            _ => {
                self.shared.active.write().await.remove(&id);
                Err(DiscoveryError::PipelineSaturated)
            }
        }
    }

    /// Submit a batch of jobs, returning one handle per request.
    pub async fn submit_batch(&self, requests: Vec<DiscoveryRequest>) -> Vec<Result<Uuid>> {
        let mut handles = Vec::with_capacity(requests.len());
        for request in requests {
            handles.push(self.submit(request).await);
        }
        handles
    }

    /// Cancel a job: its in-flight stage finishes, downstream is skipped.
    pub async fn cancel(&self, id: Uuid) -> bool {
        match self.shared.active.read().await.get(&id) {
            Some(tracked) => {
                tracked.cancel.cancel();
                info!("Cancellation requested for job {}", id);
                true
            }
            None => false,
        }
    }

    /// Snapshot of a job's current stage and queue position.
    pub async fn status(&self, id: Uuid) -> Option<JobStatus> {
        if let Some(tracked) = self.shared.active.read().await.get(&id) {
            return Some(tracked.status.clone());
        }
        self.shared.completed.read().await.get(&id).map(|outcome| JobStatus {
            id: outcome.id,
            stage: outcome.stage.as_str().to_string(),
            retries: outcome.retries,
            created_at: outcome.created_at,
            queue_depth_at_enqueue: HashMap::new(),
            error: outcome.error.clone(),
        })
    }

    /// Wait for a job's terminal outcome, up to `timeout`.
    pub async fn await_result(&self, id: Uuid, timeout: Duration) -> Option<JobOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(outcome) = self.shared.completed.read().await.get(&id) {
                return Some(outcome.clone());
            }
            if Instant::now() >= deadline {
                warn!("Job {} timed out after {:?}", id, timeout);
                return None;
            }
            tokio::time::sleep(RESULT_POLL).await;
        }
    }

    /// Current metrics: counters, queue depths, average latency.
    pub async fn metrics(&self) -> SchedulerMetrics {
        let completed = self.shared.jobs_completed.load(Ordering::Relaxed);
        let total_ms = self.shared.processing_ms_total.load(Ordering::Relaxed);
        let mut queue_depths = HashMap::new();
        for stage in JobStage::WORK_STAGES {
            queue_depths.insert(
                stage.as_str().to_string(),
                queue_depth(&self.shared.senders[stage.index()]),
            );
        }
        SchedulerMetrics {
            jobs_submitted: self.shared.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: completed,
            jobs_failed: self.shared.jobs_failed.load(Ordering::Relaxed),
            jobs_active: self.shared.active.read().await.len(),
            avg_processing_time_ms: if completed > 0 { total_ms / completed } else { 0 },
            queue_depths,
            running: self.shared.running.load(Ordering::SeqCst),
        }
    }
}

fn queue_depth(sender: &mpsc::Sender<Job>) -> usize {
    sender.max_capacity().saturating_sub(sender.capacity())
}

async fn stage_worker(
    shared: Arc<Shared>,
    receiver: Arc<Mutex<mpsc::Receiver<Job>>>,
    stage: JobStage,
    index: usize,
) {
    debug!("Started {}_worker_{}", stage.as_str(), index);
    while shared.running.load(Ordering::SeqCst) {
        let job = {
            let mut rx = receiver.lock().await;
            match tokio::time::timeout(DEQUEUE_POLL, rx.recv()).await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(_) => continue,
            }
        };
        process_job_stage(&shared, job, stage).await;
    }
    debug!("Stopped {}_worker_{}", stage.as_str(), index);
}

async fn process_job_stage(shared: &Arc<Shared>, mut job: Job, stage: JobStage) {
    debug!("Processing job {} in stage {}", job.id, stage.as_str());

    let timed = {
        let run = async {
            match stage {
                JobStage::Search => shared.engine.stage_search(&mut job.state).await,
                JobStage::Validate => shared.engine.stage_validate(&mut job.state).await,
                JobStage::Classify => shared.engine.stage_classify(&mut job.state).await,
                JobStage::Price => shared.engine.stage_price(&mut job.state).await,
                _ => Ok(()),
            }
        };
        tokio::time::timeout(shared.config.stage_timeout, run).await
    };

    let result = match timed {
        Ok(result) => result,
        Err(_) => Err(DiscoveryError::JobFailed {
            retries: job.retries,
            reason: format!("timeout in {}", stage.as_str()),
        }),
    };

    match result {
        Ok(()) => {
            if job.cancel.is_cancelled() {
                finalize(shared, job, JobStage::Failed, None, Some("job cancelled".into())).await;
                return;
            }
            let next = stage.next();
            if next == JobStage::Completed {
                let elapsed = job.started.elapsed().as_millis() as u64;
                let response = job.state.take_response(elapsed);
                finalize(shared, job, JobStage::Completed, Some(response), None).await;
            } else {
                advance(shared, job, next).await;
            }
        }
        Err(e) => handle_job_error(shared, job, stage, e).await,
    }
}

async fn advance(shared: &Arc<Shared>, mut job: Job, next: JobStage) {
    job.stage = next;
    let depth = queue_depth(&shared.senders[next.index()]);
    if let Some(tracked) = shared.active.write().await.get_mut(&job.id) {
        tracked.status.stage = next.as_str().to_string();
        tracked
            .status
            .queue_depth_at_enqueue
            .insert(next.as_str().to_string(), depth);
    }
    let id = job.id;
    // Blocks when the downstream queue is full: backpressure
    if shared.senders[next.index()].send(job).await.is_err() {
        error!("Stage queue closed, dropping job {}", id);
    }
}

async fn handle_job_error(shared: &Arc<Shared>, mut job: Job, stage: JobStage, error: DiscoveryError) {
    error!("Job {} failed in stage {}: {}", job.id, stage.as_str(), error);
    job.retries += 1;

    if job.retries <= shared.config.max_retries && !job.cancel.is_cancelled() {
        info!(
            "Retrying job {} from the start (attempt {}/{})",
            job.id, job.retries, shared.config.max_retries
        );
        // Job-level retry: back to the first stage with fresh state
        job.state = RunState::new(&job.request).expect("validated at submit");
        job.stage = JobStage::Search;
        if let Some(tracked) = shared.active.write().await.get_mut(&job.id) {
            tracked.status.retries = job.retries;
            tracked.status.stage = JobStage::Search.as_str().to_string();
        }
        let id = job.id;
        if shared.senders[JobStage::Search.index()].send(job).await.is_err() {
            error!("Search queue closed, dropping job {}", id);
        }
    } else {
        let reason = error.to_string();
        finalize(shared, job, JobStage::Failed, None, Some(reason)).await;
    }
}

async fn finalize(
    shared: &Arc<Shared>,
    job: Job,
    stage: JobStage,
    response: Option<DiscoveryResponse>,
    error: Option<String>,
) {
    let elapsed = job.started.elapsed().as_millis() as u64;
    match stage {
        JobStage::Completed => {
            shared.jobs_completed.fetch_add(1, Ordering::Relaxed);
            shared.processing_ms_total.fetch_add(elapsed, Ordering::Relaxed);
            info!("Job {} completed in {}ms", job.id, elapsed);
        }
        _ => {
            shared.jobs_failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Job {} failed permanently after {} retries: {:?}",
                job.id, job.retries, error
            );
        }
    }

    shared.active.write().await.remove(&job.id);
    let outcome = JobOutcome {
        id: job.id,
        stage,
        retries: job.retries,
        response,
        error,
        created_at: job.created_at,
    };
    let mut completed = shared.completed.write().await;
    completed.insert(job.id, outcome);

    // Retention window: keep only the most recent completed jobs
    if completed.len() > shared.config.max_completed_jobs {
        let mut by_age: Vec<(Uuid, DateTime<Utc>)> = completed
            .iter()
            .map(|(id, o)| (*id, o.created_at))
            .collect();
        by_age.sort_by(|a, b| b.1.cmp(&a.1));
        let keep: std::collections::HashSet<Uuid> = by_age
            .iter()
            .take(shared.config.max_completed_jobs)
            .map(|(id, _)| *id)
            .collect();
        let before = completed.len();
        completed.retain(|id, _| keep.contains(id));
        info!(
            "Cleaned up {} old completed jobs (kept {})",
            before - completed.len(),
            completed.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ContentCache, ContentCacheConfig};
    use crate::pipeline::EngineConfig;
    use crate::stores::{MemoryKeyValueCache, MemoryPageRepository};
    use crate::testing::{MockCrawlService, MockLanguageModel};
    use crate::traits::searcher::MockSearcher;
    use crate::types::page::PageContent;
    use serde_json::json;

    fn engine(model: MockLanguageModel, searcher: MockSearcher, crawler: MockCrawlService) -> Arc<DiscoveryEngine> {
        let cache = Arc::new(ContentCache::new(
            Arc::new(MemoryKeyValueCache::new()),
            Arc::new(MemoryPageRepository::new()),
            Arc::new(crawler),
            ContentCacheConfig::default(),
        ));
        Arc::new(DiscoveryEngine::new(
            Arc::new(model),
            Arc::new(searcher),
            cache,
            EngineConfig::default(),
        ))
    }

    fn happy_engine() -> Arc<DiscoveryEngine> {
        // Model down -> raw-phrase query + pattern-only validation; search
        // returns a local product URL; crawler serves its page
        let searcher = MockSearcher::new()
            .with_urls("wireless mouse", &["https://tienda.com.uy/producto/123456"]);
        let crawler = MockCrawlService::new().with_content(
            "https://tienda.com.uy/producto/123456",
            PageContent::new("Mouse inalambrico $U 990"),
        );
        engine(MockLanguageModel::new().fail_all(), searcher, crawler)
    }

    #[tokio::test]
    async fn test_job_lifecycle_completes() {
        let scheduler = PipelineScheduler::new(happy_engine(), SchedulerConfig::default());
        scheduler.start().await;

        let id = scheduler
            .submit(DiscoveryRequest::new("wireless mouse"))
            .await
            .unwrap();
        let outcome = scheduler
            .await_result(id, Duration::from_secs(10))
            .await
            .expect("job should finish");

        assert_eq!(outcome.stage, JobStage::Completed);
        let response = outcome.response.unwrap();
        assert!(response.success);
        assert_eq!(response.geographic_validated_urls, 1);

        let metrics = scheduler.metrics().await;
        assert_eq!(metrics.jobs_completed, 1);
        assert_eq!(metrics.jobs_failed, 0);
        assert_eq!(metrics.jobs_active, 0);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_request_rejected_at_submit() {
        let scheduler = PipelineScheduler::new(happy_engine(), SchedulerConfig::default());
        scheduler.start().await;
        let err = scheduler
            .submit(DiscoveryRequest::new("mouse").with_country("ZZ"))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidRequest { .. }));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_job_retries_then_fails() {
        // Every search query fails -> stage 1 aborts -> job retried from
        // the start, then marked failed
        let scheduler = PipelineScheduler::new(
            engine(
                MockLanguageModel::new().fail_all(),
                MockSearcher::new().fail_all(),
                MockCrawlService::new(),
            ),
            SchedulerConfig::default(),
        );
        scheduler.start().await;

        let id = scheduler
            .submit(DiscoveryRequest::new("wireless mouse"))
            .await
            .unwrap();
        let outcome = scheduler
            .await_result(id, Duration::from_secs(10))
            .await
            .expect("job should reach a terminal state");

        assert_eq!(outcome.stage, JobStage::Failed);
        assert_eq!(outcome.retries, 3); // 1 initial + 2 retries counted
        assert!(outcome.error.unwrap().contains("search"));
        assert_eq!(scheduler.metrics().await.jobs_failed, 1);

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_batch_submission_returns_handles() {
        let scheduler = PipelineScheduler::new(happy_engine(), SchedulerConfig::default());
        scheduler.start().await;

        let handles = scheduler
            .submit_batch(vec![
                DiscoveryRequest::new("wireless mouse"),
                DiscoveryRequest::new("wireless mouse"),
            ])
            .await;
        assert_eq!(handles.len(), 2);
        for handle in handles {
            let id = handle.unwrap();
            let outcome = scheduler.await_result(id, Duration::from_secs(10)).await;
            assert!(outcome.is_some());
        }

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancellation_skips_downstream() {
        let scheduler = PipelineScheduler::new(happy_engine(), SchedulerConfig::default());
        scheduler.start().await;

        let id = scheduler
            .submit(DiscoveryRequest::new("wireless mouse"))
            .await
            .unwrap();
        scheduler.cancel(id).await;

        let outcome = scheduler
            .await_result(id, Duration::from_secs(10))
            .await
            .expect("cancelled job reaches a terminal state");
        // Either it was cancelled between stages, or it raced to completion
        match outcome.stage {
            JobStage::Failed => {
                assert_eq!(outcome.error.as_deref(), Some("job cancelled"));
            }
            JobStage::Completed => {}
            other => panic!("unexpected terminal stage {:?}", other),
        }

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_reports_stage() {
        let scheduler = PipelineScheduler::new(happy_engine(), SchedulerConfig::default());
        scheduler.start().await;

        let id = scheduler
            .submit(DiscoveryRequest::new("wireless mouse"))
            .await
            .unwrap();
        let status = scheduler.status(id).await.expect("job is tracked");
        assert!(!status.stage.is_empty());
        assert!(status.queue_depth_at_enqueue.contains_key("search"));

        scheduler.await_result(id, Duration::from_secs(10)).await;
        let status = scheduler.status(id).await.unwrap();
        assert_eq!(status.stage, "completed");

        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_completed_job_retention() {
        let config = SchedulerConfig {
            max_completed_jobs: 2,
            ..SchedulerConfig::default()
        };
        let scheduler = PipelineScheduler::new(happy_engine(), config);
        scheduler.start().await;

        for _ in 0..4 {
            let id = scheduler
                .submit(DiscoveryRequest::new("wireless mouse"))
                .await
                .unwrap();
            scheduler.await_result(id, Duration::from_secs(10)).await;
        }
        assert!(scheduler.shared.completed.read().await.len() <= 2);

        scheduler.shutdown().await;
    }
}
