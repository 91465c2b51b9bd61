//! # stratum-jobs
//!
//! Recurrence scheduler and periodic job worker for stratum.
//!
//! This crate provides:
//! - Next-due-date calculation and successor creation for recurring tasks
//! - A lease-guarded recurrence scan safe to run from several processes
//! - A scheduler worker with exponential backoff and failure escalation
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use stratum_db::{create_pool, PgRecurrenceStore};
//! use stratum_jobs::{RecurrenceScheduler, SchedulerWorker, WorkerConfig};
//!
//! let pool = create_pool("postgres://...").await?;
//! let scheduler = RecurrenceScheduler::new(Arc::new(PgRecurrenceStore::new(pool)));
//!
//! let handle = SchedulerWorker::new(WorkerConfig::from_env())
//!     .with_job(scheduler)
//!     .start();
//!
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! handle.shutdown().await?;
//! ```

pub mod handler;
pub mod recurrence;
pub mod worker;

// Re-export core types
pub use stratum_core::*;

pub use handler::{JobContext, JobResult, NoOpJob, PeriodicJob};
pub use recurrence::{
    calculate_next_due_date, create_new_task_instance, should_create_new_instance,
    RecurrenceScheduler, ScanOutcome,
};
pub use worker::{SchedulerWorker, WorkerConfig, WorkerEvent, WorkerHandle};
