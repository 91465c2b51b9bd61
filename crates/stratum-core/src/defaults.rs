//! Centralized default constants for stratum.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic numbers.

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for task listings.
pub const PAGE_LIMIT: i64 = 10;

/// Maximum page size accepted for task listings.
pub const PAGE_LIMIT_MAX: i64 = 100;

/// Default page size for tag listings by type.
pub const TAG_PAGE_LIMIT: i64 = 50;

/// Default page size for tag autocomplete.
pub const PAGE_LIMIT_AUTOCOMPLETE: i64 = 10;

/// Default page size for tagged entity listings.
pub const ENTITY_PAGE_LIMIT: i64 = 10;

/// Internal "fetch everything" limit for candidate scans.
pub const INTERNAL_FETCH_LIMIT: i64 = 10_000;

/// Default page offset.
pub const PAGE_OFFSET: i64 = 0;

// =============================================================================
// TAGS
// =============================================================================

/// Tag type used when none is given.
pub const DEFAULT_TAG_TYPE: &str = "default";

/// Maximum tag name length in characters.
pub const TAG_NAME_MAX_LENGTH: usize = 100;

/// Queries shorter than this use substring matching instead of fuzzy scoring.
pub const FUZZY_MIN_QUERY_LENGTH: usize = 3;

/// Minimum fuzzy score (0-100) for a tag to be suggested.
pub const FUZZY_SCORE_CUTOFF: f64 = 60.0;

// =============================================================================
// RECURRENCE
// =============================================================================

/// Scheduler tick period. Hourly, matching the production beat schedule.
pub const RECURRENCE_INTERVAL_SECS: u64 = 3600;

/// First retry delay after a failed recurrence scan.
pub const RECURRENCE_BACKOFF_BASE_SECS: u64 = 30;

/// Ceiling for the retry delay.
pub const RECURRENCE_BACKOFF_MAX_SECS: u64 = 3600;

/// Consecutive failures before the scheduler escalates and skips to the next tick.
pub const RECURRENCE_ALERT_AFTER: u32 = 5;

/// Monthly recurrence clamps the day of month to this value.
pub const MONTHLY_MAX_DAY: u32 = 28;

/// Advisory lock key guarding the recurrence scan ("recurrence scan" lease).
pub const RECURRENCE_SCAN_LOCK_KEY: i64 = 0x5354_5241_5245_4355;

/// Maximum runtime of a single periodic job before it is treated as failed.
pub const JOB_TIMEOUT_SECS: u64 = 300;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// OBJECT STORAGE
// =============================================================================

/// Maximum object key length.
pub const OBJECT_KEY_MAX_LENGTH: usize = 512;

/// Maximum media step upload size.
pub const MAX_UPLOAD_SIZE_BYTES: usize = 50 * 1024 * 1024;
