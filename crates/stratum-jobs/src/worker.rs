//! Scheduler worker running periodic jobs on a fixed interval.
//!
//! Failed runs are retried with exponential backoff. After `alert_after`
//! consecutive failures the worker escalates at ERROR, emits
//! [`WorkerEvent::JobAlert`] and falls back to the normal interval.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use stratum_core::defaults::{
    EVENT_BUS_CAPACITY, JOB_TIMEOUT_SECS, RECURRENCE_ALERT_AFTER, RECURRENCE_BACKOFF_BASE_SECS,
    RECURRENCE_BACKOFF_MAX_SECS, RECURRENCE_INTERVAL_SECS,
};
use stratum_core::{Error, Result};

use crate::handler::{JobContext, JobResult, PeriodicJob};

/// Configuration for the scheduler worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Period between successful runs.
    pub interval: Duration,
    /// First retry delay after a failure.
    pub backoff_base: Duration,
    /// Retry delay ceiling.
    pub backoff_max: Duration,
    /// Consecutive failures before escalating.
    pub alert_after: u32,
    /// Maximum runtime of a single run.
    pub job_timeout: Duration,
    /// Run every job immediately at startup instead of after one interval.
    pub run_on_start: bool,
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(RECURRENCE_INTERVAL_SECS),
            backoff_base: Duration::from_secs(RECURRENCE_BACKOFF_BASE_SECS),
            backoff_max: Duration::from_secs(RECURRENCE_BACKOFF_MAX_SECS),
            alert_after: RECURRENCE_ALERT_AFTER,
            job_timeout: Duration::from_secs(JOB_TIMEOUT_SECS),
            run_on_start: true,
            enabled: true,
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `RECURRENCE_ENABLED` | `true` | Enable/disable the scheduler |
    /// | `RECURRENCE_INTERVAL_SECS` | `3600` | Tick period |
    /// | `RECURRENCE_BACKOFF_BASE_SECS` | `30` | First retry delay |
    /// | `RECURRENCE_BACKOFF_MAX_SECS` | `3600` | Retry delay ceiling |
    /// | `RECURRENCE_ALERT_AFTER` | `5` | Failures before escalation |
    pub fn from_env() -> Self {
        let enabled = std::env::var("RECURRENCE_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let interval = env_or("RECURRENCE_INTERVAL_SECS", RECURRENCE_INTERVAL_SECS).max(1);
        let base = env_or("RECURRENCE_BACKOFF_BASE_SECS", RECURRENCE_BACKOFF_BASE_SECS).max(1);
        let max = env_or("RECURRENCE_BACKOFF_MAX_SECS", RECURRENCE_BACKOFF_MAX_SECS).max(base);
        let alert_after = env_or("RECURRENCE_ALERT_AFTER", RECURRENCE_ALERT_AFTER).max(1);

        Self {
            interval: Duration::from_secs(interval),
            backoff_base: Duration::from_secs(base),
            backoff_max: Duration::from_secs(max),
            alert_after,
            enabled,
            ..Default::default()
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn with_alert_after(mut self, failures: u32) -> Self {
        self.alert_after = failures.max(1);
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    /// Enable or disable the worker.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Retry delay after `consecutive_failures` failures: base × 2^(n-1), capped.
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.max(1) - 1;
        2u32.checked_pow(exponent)
            .and_then(|factor| self.backoff_base.checked_mul(factor))
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

/// Event emitted by the scheduler worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    WorkerStarted,
    WorkerStopped,
    JobStarted {
        job: String,
        attempt: u64,
    },
    JobCompleted {
        job: String,
        duration_ms: u64,
    },
    /// A run failed and will be retried after `retry_in`.
    JobFailed {
        job: String,
        error: String,
        consecutive_failures: u32,
        retry_in: Duration,
    },
    /// A job failed `consecutive_failures` times in a row.
    JobAlert {
        job: String,
        error: String,
        consecutive_failures: u32,
    },
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

struct JobSlot {
    job: Arc<dyn PeriodicJob>,
    next_run: Instant,
    runs: u64,
    failures: u32,
}

/// Runs registered periodic jobs until shut down.
pub struct SchedulerWorker {
    config: WorkerConfig,
    jobs: Vec<Arc<dyn PeriodicJob>>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl SchedulerWorker {
    pub fn new(config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            config,
            jobs: Vec::new(),
            event_tx,
        }
    }

    /// Register a job.
    pub fn with_job<J: PeriodicJob + 'static>(self, job: J) -> Self {
        self.with_shared_job(Arc::new(job))
    }

    /// Register a job that is also used elsewhere.
    pub fn with_shared_job(mut self, job: Arc<dyn PeriodicJob>) -> Self {
        debug!(job_name = job.name(), "Registered periodic job");
        self.jobs.push(job);
        self
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Scheduler worker is disabled, not starting");
            return;
        }

        info!(
            subsystem = "jobs",
            component = "scheduler_worker",
            interval_secs = self.config.interval.as_secs(),
            alert_after = self.config.alert_after,
            job_count = self.jobs.len(),
            "Scheduler worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let first_run = if self.config.run_on_start {
            Instant::now()
        } else {
            Instant::now() + self.config.interval
        };
        let mut slots: Vec<JobSlot> = self
            .jobs
            .iter()
            .map(|job| JobSlot {
                job: job.clone(),
                next_run: first_run,
                runs: 0,
                failures: 0,
            })
            .collect();

        loop {
            let Some(next) = slots.iter().map(|s| s.next_run).min() else {
                warn!("No periodic jobs registered");
                let _ = shutdown_rx.recv().await;
                break;
            };

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Scheduler worker received shutdown signal");
                    break;
                }
                _ = sleep_until(next) => {}
            }

            let now = Instant::now();
            for slot in slots.iter_mut().filter(|s| s.next_run <= now) {
                self.run_slot(slot).await;
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Scheduler worker stopped");
    }

    async fn run_slot(&self, slot: &mut JobSlot) {
        slot.runs += 1;
        let job = slot.job.name().to_string();
        let ctx = JobContext::new(job.clone(), slot.runs).with_consecutive_failures(slot.failures);

        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job: job.clone(),
            attempt: slot.runs,
        });

        let start = Instant::now();
        let result = match tokio::time::timeout(self.config.job_timeout, slot.job.execute(ctx)).await
        {
            Ok(result) => result,
            Err(_) => JobResult::Retry(format!(
                "Job exceeded timeout of {}s",
                self.config.job_timeout.as_secs()
            )),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            JobResult::Success(data) => {
                slot.failures = 0;
                slot.next_run = Instant::now() + self.config.interval;
                info!(
                    subsystem = "jobs",
                    component = "scheduler_worker",
                    job_name = %job,
                    duration_ms,
                    result = ?data,
                    "Periodic job completed"
                );
                let _ = self
                    .event_tx
                    .send(WorkerEvent::JobCompleted { job, duration_ms });
            }
            JobResult::Retry(error) => self.record_failure(slot, job, error, true),
            JobResult::Failed(error) => self.record_failure(slot, job, error, false),
        }
    }

    fn record_failure(&self, slot: &mut JobSlot, job: String, error: String, retry: bool) {
        slot.failures += 1;
        let consecutive_failures = slot.failures;

        if consecutive_failures >= self.config.alert_after {
            error!(
                subsystem = "jobs",
                component = "scheduler_worker",
                job_name = %job,
                consecutive_failures,
                alert = true,
                error = %error,
                "Periodic job keeps failing, skipping to next interval"
            );
            slot.failures = 0;
            slot.next_run = Instant::now() + self.config.interval;
            let _ = self.event_tx.send(WorkerEvent::JobAlert {
                job,
                error,
                consecutive_failures,
            });
            return;
        }

        let retry_in = if retry {
            self.config.backoff_delay(consecutive_failures)
        } else {
            self.config.interval
        };
        warn!(
            subsystem = "jobs",
            component = "scheduler_worker",
            job_name = %job,
            consecutive_failures,
            retry_in_secs = retry_in.as_secs(),
            error = %error,
            "Periodic job failed"
        );
        slot.next_run = Instant::now() + retry_in;
        let _ = self.event_tx.send(WorkerEvent::JobFailed {
            job,
            error,
            consecutive_failures,
            retry_in,
        });
    }
}
