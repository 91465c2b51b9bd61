//! Structured logging schema and field name constants for stratum.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same names across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic retry or fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), scan completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration (candidate tags, scanned tasks) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "search", "jobs", "worker"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "recurrence", "tag_engine", "scheduler_worker"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "process_recurring_tasks", "resolve_entities_by_tags", "suggest_tags"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Tenant UUID scoping the operation.
pub const TENANT_ID: &str = "tenant_id";

/// Task UUID being operated on.
pub const TASK_ID: &str = "task_id";

/// Tag UUID being operated on.
pub const TAG_ID: &str = "tag_id";

/// Periodic job name.
pub const JOB_NAME: &str = "job_name";

/// Suggestion query text.
pub const QUERY: &str = "query";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned by a query.
pub const RESULT_COUNT: &str = "result_count";

/// Number of recurring tasks examined by a scan.
pub const SCANNED_COUNT: &str = "scanned_count";

/// Number of task instances created by a scan.
pub const CREATED_COUNT: &str = "created_count";

/// Number of filter groups in a tag query.
pub const GROUP_COUNT: &str = "group_count";

/// Consecutive failure count of a periodic job.
pub const FAILURE_COUNT: &str = "failure_count";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Escalation marker for failures that need operator attention.
pub const ALERT: &str = "alert";
