//! Periodic job interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

/// Context provided to a periodic job run.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Name of the job being run.
    pub job_name: String,
    /// 1-based run counter for this job since the worker started.
    pub attempt: u64,
    /// Consecutive failures before this run.
    pub consecutive_failures: u32,
    pub started_at: DateTime<Utc>,
}

impl JobContext {
    pub fn new(job_name: impl Into<String>, attempt: u64) -> Self {
        Self {
            job_name: job_name.into(),
            attempt,
            consecutive_failures: 0,
            started_at: Utc::now(),
        }
    }

    pub fn with_consecutive_failures(mut self, failures: u32) -> Self {
        self.consecutive_failures = failures;
        self
    }

    /// Whether this run is a retry after a failure.
    pub fn is_retry(&self) -> bool {
        self.consecutive_failures > 0
    }
}

/// Result of a job run.
#[derive(Debug)]
pub enum JobResult {
    /// Run completed with optional result data.
    Success(Option<JsonValue>),
    /// Run failed permanently; the worker moves on to the next interval.
    Failed(String),
    /// Run failed transiently and should be retried with backoff.
    Retry(String),
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// A job run on a fixed interval by the scheduler worker.
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    /// Stable name used in logs and events.
    fn name(&self) -> &str;

    async fn execute(&self, ctx: JobContext) -> JobResult;
}

/// Job that always succeeds. Useful for wiring tests.
pub struct NoOpJob {
    name: String,
}

impl NoOpJob {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl PeriodicJob for NoOpJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        JobResult::Success(None)
    }
}
