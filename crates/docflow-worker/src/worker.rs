//! Job dispatch: handler registry, per-type concurrency, memory preflight,
//! attempt timeout, health.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use docflow_core::{Error, MemoryManager, Result, WorkerConfig};
use docflow_ingest::{PipelineController, ProcessingStats, ProgressEvent};
use serde::Serialize;
use tokio::sync::{broadcast, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::job::{Job, JobFailure, JobKind, JobResult};
use crate::queue::{JobQueue, QueuedJob};

/// Runs one decoded job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> Result<ProcessingStats>;
}

/// Routes each job variant to the matching controller operation.
pub struct PipelineHandler {
    controller: Arc<PipelineController>,
}

impl PipelineHandler {
    pub fn new(controller: Arc<PipelineController>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl JobHandler for PipelineHandler {
    async fn handle(&self, job: Job) -> Result<ProcessingStats> {
        match job {
            Job::ProcessDocument(req) => self.controller.process_document(&req).await,
            Job::GenerateEmbeddings(req) => self.controller.generate_embeddings(&req).await,
            Job::ReprocessChunks(req) => self.controller.reprocess_chunks(&req).await,
        }
    }
}

struct Registration {
    handler: Arc<dyn JobHandler>,
    slots: Arc<Semaphore>,
}

/// Worker health as reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerHealth {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
    pub paused: bool,
    pub is_healthy: bool,
}

pub struct Worker {
    queue: Arc<dyn JobQueue>,
    memory: Arc<dyn MemoryManager>,
    config: WorkerConfig,
    handlers: BTreeMap<JobKind, Registration>,
    /// source id → job id, for routing pipeline progress to the queue.
    active_sources: Arc<DashMap<String, String>>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        memory: Arc<dyn MemoryManager>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            memory,
            config,
            handlers: BTreeMap::new(),
            active_sources: Arc::new(DashMap::new()),
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Worker with all three pipeline job types registered at their
    /// configured concurrency.
    pub fn for_pipeline(
        queue: Arc<dyn JobQueue>,
        memory: Arc<dyn MemoryManager>,
        config: WorkerConfig,
        controller: Arc<PipelineController>,
    ) -> Self {
        let handler: Arc<dyn JobHandler> = Arc::new(PipelineHandler::new(controller));
        let (docs, embeds, reprocess) = (
            config.process_document_concurrency,
            config.generate_embeddings_concurrency,
            config.reprocess_chunks_concurrency,
        );
        Self::new(queue, memory, config)
            .register(JobKind::ProcessDocument, docs, handler.clone())
            .register(JobKind::GenerateEmbeddings, embeds, handler.clone())
            .register(JobKind::ReprocessChunks, reprocess, handler)
    }

    pub fn register(
        mut self,
        kind: JobKind,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        info!(job_type = %kind, concurrency, "Registered job handler");
        self.handlers.insert(
            kind,
            Registration {
                handler,
                slots: Arc::new(Semaphore::new(concurrency.max(1))),
            },
        );
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    /// Process jobs until `shutdown` flips to true, then wait for in-flight jobs.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(handlers = self.handlers.len(), "Worker started");
        let mut tasks = JoinSet::new();
        while !*shutdown.borrow() {
            if self.dispatch(&mut tasks).await {
                continue;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => reap(joined),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        while let Some(joined) = tasks.join_next().await {
            reap(joined);
        }
        info!("Worker stopped");
    }

    /// Process jobs until nothing is waiting, delayed, or in flight.
    /// Returns early if the queue is paused with work left.
    pub async fn run_until_idle(&self) {
        let mut tasks = JoinSet::new();
        loop {
            if self.dispatch(&mut tasks).await {
                continue;
            }
            if tasks.is_empty() {
                let counts = self.queue.counts().await;
                if counts.paused || counts.waiting + counts.delayed == 0 {
                    break;
                }
                tokio::time::sleep(self.poll_interval).await;
            } else {
                tokio::select! {
                    Some(joined) = tasks.join_next() => reap(joined),
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }
    }

    /// Start every job that has a free slot. Returns whether any started.
    async fn dispatch(&self, tasks: &mut JoinSet<()>) -> bool {
        let mut started = false;
        loop {
            let handlers = &self.handlers;
            // Unregistered tags are accepted so they fail fast instead of
            // sitting in the queue forever.
            let accept = |tag: &str| match JobKind::parse(tag).and_then(|k| handlers.get(&k)) {
                Some(reg) => reg.slots.available_permits() > 0,
                None => true,
            };
            let Some(job) = self.queue.next(&accept).await else {
                break;
            };

            let permit = match JobKind::parse(job.tag().unwrap_or("")).and_then(|k| self.handlers.get(&k)) {
                Some(reg) => match reg.slots.clone().try_acquire_owned() {
                    Ok(permit) => Some(permit),
                    Err(_) => reg.slots.clone().acquire_owned().await.ok(),
                },
                None => None,
            };
            let runner = self.runner();
            tasks.spawn(async move {
                runner.process(job, permit).await;
            });
            started = true;
        }
        started
    }

    fn runner(&self) -> JobRunner {
        JobRunner {
            queue: self.queue.clone(),
            memory: self.memory.clone(),
            handlers: self
                .handlers
                .iter()
                .map(|(kind, reg)| (*kind, reg.handler.clone()))
                .collect(),
            active_sources: self.active_sources.clone(),
            timeout: Duration::from_millis(self.config.job_timeout_ms),
        }
    }

    /// Run a single job to completion and report it to the queue.
    pub async fn process(&self, job: QueuedJob) -> JobResult {
        self.runner().process(job, None).await
    }

    /// Forward pipeline progress for active jobs to the queue.
    pub fn forward_progress(&self, mut events: broadcast::Receiver<ProgressEvent>) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let active = self.active_sources.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let job_id = active.get(&event.source_id).map(|id| id.value().clone());
                        if let Some(job_id) = job_id {
                            queue.update_progress(&job_id, event.percentage).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Progress forwarder lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn health(&self) -> WorkerHealth {
        let counts = self.queue.counts().await;
        let is_healthy = !counts.paused
            && counts.active <= self.config.max_active
            && counts.waiting <= self.config.max_waiting;
        WorkerHealth {
            waiting: counts.waiting,
            active: counts.active,
            completed: counts.completed,
            failed: counts.failed,
            delayed: counts.delayed,
            paused: counts.paused,
            is_healthy,
        }
    }
}

fn reap(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!("Job task panicked: {}", e);
    }
}

/// Everything a spawned job task needs, detached from the worker.
struct JobRunner {
    queue: Arc<dyn JobQueue>,
    memory: Arc<dyn MemoryManager>,
    handlers: BTreeMap<JobKind, Arc<dyn JobHandler>>,
    active_sources: Arc<DashMap<String, String>>,
    timeout: Duration,
}

impl JobRunner {
    async fn process(self, queued: QueuedJob, _permit: Option<OwnedSemaphorePermit>) -> JobResult {
        let started = Instant::now();
        let job_id = queued.id.clone();

        let job = match Job::from_payload(&queued.payload) {
            Ok(job) => job,
            Err(e) => {
                warn!(job_id = %job_id, "Rejecting job: {}", e);
                let result = failed_result("", "", started, &e);
                self.queue.fail(&job_id, JobFailure::from(&e)).await;
                return result;
            }
        };
        let source_id = job.source_id().to_string();
        let organization_id = job.organization_id().to_string();

        let outcome = self.execute(&job_id, job).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(stats) => {
                info!(
                    job_id = %job_id,
                    source_id = %source_id,
                    elapsed_ms,
                    chunks = stats.chunks_created,
                    "Job completed"
                );
                let result = JobResult {
                    success: true,
                    source_id,
                    organization_id,
                    processing_time_ms: elapsed_ms,
                    stats: Some(stats),
                    error: None,
                };
                self.queue.complete(&job_id, result.clone()).await;
                result
            }
            Err(e) => {
                error!(job_id = %job_id, source_id = %source_id, elapsed_ms, "Job failed: {}", e);
                let result = failed_result(&source_id, &organization_id, started, &e);
                self.queue.fail(&job_id, JobFailure::from(&e)).await;
                result
            }
        }
    }

    async fn execute(&self, job_id: &str, job: Job) -> Result<ProcessingStats> {
        let kind = job.kind();
        let handler = self
            .handlers
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("no handler registered for {}", kind)))?;

        self.memory.check_memory()?;
        let before = self.memory.snapshot();
        debug!(
            job_id,
            job_type = %kind,
            rss_mb = before.rss_bytes / (1024 * 1024),
            "Starting job"
        );

        let source_id = job.source_id().to_string();
        self.active_sources
            .insert(source_id.clone(), job_id.to_string());
        let outcome = tokio::time::timeout(self.timeout, handler.handle(job)).await;
        self.active_sources
            .remove_if(&source_id, |_, active| active == job_id);

        let after = self.memory.snapshot();
        debug!(
            job_id,
            rss_delta_mb = (after.rss_bytes as i64 - before.rss_bytes as i64) / (1024 * 1024),
            "Job memory"
        );

        match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::Internal(format!(
                "job timed out after {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}

fn failed_result(source_id: &str, organization_id: &str, started: Instant, e: &Error) -> JobResult {
    JobResult {
        success: false,
        source_id: source_id.to_string(),
        organization_id: organization_id.to_string(),
        processing_time_ms: started.elapsed().as_millis() as u64,
        stats: None,
        error: Some(e.to_string()),
    }
}
