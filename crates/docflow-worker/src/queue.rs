//! Queue contract consumed by the worker, and an in-process implementation.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use docflow_core::{Error, Result, WorkerConfig};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::job::{JobFailure, JobResult};
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
}

/// A job handed to the worker.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: String,
    pub payload: Value,
    /// Failed attempts so far.
    pub attempts_made: u32,
}

impl QueuedJob {
    /// The `type` tag, if present.
    pub fn tag(&self) -> Option<&str> {
        self.payload.get("type").and_then(Value::as_str)
    }
}

/// What the queue did with a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    Retrying { delay: Duration },
    Exhausted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub completed: usize,
    pub failed: usize,
    pub paused: bool,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a payload. Returns the job id.
    async fn add(&self, payload: Value) -> Result<String>;

    /// Take the next waiting job whose tag is accepted, marking it active.
    /// Returns `None` while paused.
    async fn next(
        &self,
        accept: &(dyn for<'a> Fn(&'a str) -> bool + Send + Sync),
    ) -> Option<QueuedJob>;

    async fn complete(&self, job_id: &str, result: JobResult);

    /// Record a failed attempt; the queue applies its retry policy.
    async fn fail(&self, job_id: &str, failure: JobFailure) -> FailOutcome;

    async fn update_progress(&self, job_id: &str, progress: u8);

    async fn counts(&self) -> QueueCounts;

    async fn pause(&self);

    async fn resume(&self);
}

/// Read-only view of a job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: String,
    pub state: JobState,
    pub attempts_made: u32,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
}

struct Entry {
    payload: Value,
    state: JobState,
    attempts_made: u32,
    progress: u8,
    ready_at: Option<Instant>,
    result: Option<JobResult>,
    failed_reason: Option<String>,
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<String, Entry>,
    waiting: VecDeque<String>,
    /// Finished job ids, oldest first, for retention.
    completed: VecDeque<String>,
    failed: VecDeque<String>,
    paused: bool,
}

impl QueueState {
    fn promote_due(&mut self, now: Instant) {
        let mut due: Vec<(Instant, String)> = self
            .jobs
            .iter()
            .filter(|(_, e)| e.state == JobState::Delayed)
            .filter_map(|(id, e)| e.ready_at.filter(|at| *at <= now).map(|at| (at, id.clone())))
            .collect();
        due.sort();
        for (_, id) in due {
            if let Some(entry) = self.jobs.get_mut(&id) {
                entry.state = JobState::Waiting;
                entry.ready_at = None;
                self.waiting.push_back(id);
            }
        }
    }

    fn count(&self, state: JobState) -> usize {
        self.jobs.values().filter(|e| e.state == state).count()
    }

    /// Drop the oldest finished jobs beyond `keep`.
    fn evict(&mut self, state: JobState, keep: usize) {
        let order = match state {
            JobState::Completed => &mut self.completed,
            JobState::Failed => &mut self.failed,
            _ => return,
        };
        while order.len() > keep {
            if let Some(id) = order.pop_front() {
                self.jobs.remove(&id);
                debug!(job_id = %id, "Evicted finished job");
            }
        }
    }
}

/// How many finished jobs the queue remembers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub keep_completed: usize,
    pub keep_failed: usize,
}

impl Default for Retention {
    fn default() -> Self {
        let config = WorkerConfig::default();
        Self {
            keep_completed: config.keep_completed,
            keep_failed: config.keep_failed,
        }
    }
}

/// In-process queue with bounded attempts and exponential backoff.
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    policy: RetryPolicy,
    retention: Retention,
}

impl MemoryQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            policy,
            retention: Retention::default(),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(RetryPolicy::from_config(config)).with_retention(Retention {
            keep_completed: config.keep_completed,
            keep_failed: config.keep_failed,
        })
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn get(&self, job_id: &str) -> Option<JobSnapshot> {
        let state = self.state.lock();
        state.jobs.get(job_id).map(|e| JobSnapshot {
            id: job_id.to_string(),
            state: e.state,
            attempts_made: e.attempts_made,
            progress: e.progress,
            result: e.result.clone(),
            failed_reason: e.failed_reason.clone(),
        })
    }

    /// Time until the earliest delayed job becomes due.
    pub fn next_due_in(&self) -> Option<Duration> {
        let now = Instant::now();
        let state = self.state.lock();
        state
            .jobs
            .values()
            .filter(|e| e.state == JobState::Delayed)
            .filter_map(|e| e.ready_at)
            .min()
            .map(|at| at.saturating_duration_since(now))
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn add(&self, payload: Value) -> Result<String> {
        if !payload.is_object() {
            return Err(Error::Validation("job payload must be an object".into()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let mut state = self.state.lock();
        state.jobs.insert(
            id.clone(),
            Entry {
                payload,
                state: JobState::Waiting,
                attempts_made: 0,
                progress: 0,
                ready_at: None,
                result: None,
                failed_reason: None,
            },
        );
        state.waiting.push_back(id.clone());
        debug!(job_id = %id, "Job enqueued");
        Ok(id)
    }

    async fn next(
        &self,
        accept: &(dyn for<'a> Fn(&'a str) -> bool + Send + Sync),
    ) -> Option<QueuedJob> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.promote_due(Instant::now());
        if state.paused {
            return None;
        }
        let jobs = &state.jobs;
        let pos = state.waiting.iter().position(|id| {
            jobs.get(id).is_some_and(|e| {
                accept(e.payload.get("type").and_then(Value::as_str).unwrap_or(""))
            })
        })?;
        let id = state.waiting.remove(pos)?;
        let entry = state.jobs.get_mut(&id)?;
        entry.state = JobState::Active;
        Some(QueuedJob {
            id,
            payload: entry.payload.clone(),
            attempts_made: entry.attempts_made,
        })
    }

    async fn complete(&self, job_id: &str, result: JobResult) {
        let mut state = self.state.lock();
        let Some(entry) = state.jobs.get_mut(job_id) else {
            return;
        };
        entry.state = JobState::Completed;
        entry.progress = 100;
        entry.result = Some(result);
        entry.failed_reason = None;
        state.completed.push_back(job_id.to_string());
        state.evict(JobState::Completed, self.retention.keep_completed);
    }

    async fn fail(&self, job_id: &str, failure: JobFailure) -> FailOutcome {
        let mut state = self.state.lock();
        let Some(entry) = state.jobs.get_mut(job_id) else {
            return FailOutcome::Exhausted;
        };
        entry.attempts_made += 1;
        entry.failed_reason = Some(failure.message.clone());

        if failure.retryable && self.policy.should_retry(entry.attempts_made) {
            let delay = self.policy.delay_for(entry.attempts_made);
            entry.state = JobState::Delayed;
            entry.ready_at = Some(Instant::now() + delay);
            info!(
                job_id,
                attempt = entry.attempts_made,
                max = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Job failed, will retry"
            );
            FailOutcome::Retrying { delay }
        } else {
            entry.state = JobState::Failed;
            entry.ready_at = None;
            warn!(
                job_id,
                attempt = entry.attempts_made,
                retryable = failure.retryable,
                "Job failed permanently: {}",
                failure.message
            );
            state.failed.push_back(job_id.to_string());
            state.evict(JobState::Failed, self.retention.keep_failed);
            FailOutcome::Exhausted
        }
    }

    async fn update_progress(&self, job_id: &str, progress: u8) {
        if let Some(entry) = self.state.lock().jobs.get_mut(job_id) {
            entry.progress = progress.min(100);
        }
    }

    async fn counts(&self) -> QueueCounts {
        let mut state = self.state.lock();
        state.promote_due(Instant::now());
        QueueCounts {
            waiting: state.count(JobState::Waiting),
            active: state.count(JobState::Active),
            delayed: state.count(JobState::Delayed),
            completed: state.count(JobState::Completed),
            failed: state.count(JobState::Failed),
            paused: state.paused,
        }
    }

    async fn pause(&self) {
        self.state.lock().paused = true;
        info!("Queue paused");
    }

    async fn resume(&self) {
        self.state.lock().paused = false;
        info!("Queue resumed");
    }
}
