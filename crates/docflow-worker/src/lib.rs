//! Docflow Worker — pulls tagged jobs from a queue and runs them against the
//! ingestion pipeline.
//!
//! The worker enforces a concurrency limit per job type, checks the memory
//! budget before every job, bounds each attempt with a timeout, and hands
//! handler failures back to the queue unchanged. Retry scheduling belongs to
//! the queue ([`MemoryQueue`] here, or any other [`JobQueue`]).

pub mod job;
pub mod queue;
pub mod retry;
pub mod worker;

pub use job::{Job, JobFailure, JobKind, JobResult};
pub use queue::{
    FailOutcome, JobQueue, JobSnapshot, JobState, MemoryQueue, QueueCounts, QueuedJob, Retention,
};
pub use retry::RetryPolicy;
pub use worker::{JobHandler, PipelineHandler, Worker, WorkerHealth};
