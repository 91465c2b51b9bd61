//! Recurring task instance generation.
//!
//! Recurrence is driven off completion time: a completed recurring task whose
//! due date has passed spawns its next instance once the period has elapsed
//! since `completed_at`. The next due date is computed from the scan time.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use stratum_core::defaults::MONTHLY_MAX_DAY;
use stratum_core::{
    RecurrenceScan, RecurrenceStore, RecurrenceType, Result, Step, Subtask, Task, TaskStatus,
};

use crate::handler::{JobContext, JobResult, PeriodicJob};

/// Whether a recurring task is due to spawn its next instance at `now`.
pub fn should_create_new_instance(task: &Task, now: DateTime<Utc>) -> bool {
    if task.status != TaskStatus::Completed {
        return false;
    }
    let (Some(due_date), Some(completed_at)) = (task.due_date, task.completed_at) else {
        return false;
    };
    if due_date >= now {
        return false;
    }

    match task.recurrence_type {
        RecurrenceType::None => false,
        RecurrenceType::Daily => true,
        RecurrenceType::Weekly => (now - completed_at).num_days() >= 7,
        RecurrenceType::Monthly => {
            now.month() != completed_at.month() || now.year() != completed_at.year()
        }
        RecurrenceType::Yearly => now.year() != completed_at.year(),
    }
}

fn at_time_of(date: NaiveDate, time_of: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(
        date.year(),
        date.month(),
        date.day(),
        time_of.hour(),
        time_of.minute(),
        0,
    )
    .single()
}

/// Due date of the next instance, or `None` when the task has no due date.
///
/// Monthly clamps the day to 28. Yearly keeps month and day, moving Feb 29
/// to Feb 28 in non-leap years. Both keep the original hour and minute.
pub fn calculate_next_due_date(task: &Task, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let due_date = task.due_date?;

    match task.recurrence_type {
        RecurrenceType::None => None,
        RecurrenceType::Daily => Some(now + Duration::days(1)),
        RecurrenceType::Weekly => Some(now + Duration::days(7)),
        RecurrenceType::Monthly => {
            let (year, month) = if now.month() == 12 {
                (now.year() + 1, 1)
            } else {
                (now.year(), now.month() + 1)
            };
            let day = due_date.day().min(MONTHLY_MAX_DAY);
            at_time_of(NaiveDate::from_ymd_opt(year, month, day)?, due_date)
        }
        RecurrenceType::Yearly => {
            let year = now.year() + 1;
            let date = NaiveDate::from_ymd_opt(year, due_date.month(), due_date.day())
                .or_else(|| NaiveDate::from_ymd_opt(year, due_date.month(), 28))?;
            at_time_of(date, due_date)
        }
    }
}

/// Build the next instance of `original`.
///
/// Subtasks restart as not started; steps are copied with order and content
/// unchanged. Assignee sets are copied by identifier. `original` is not touched.
pub fn create_new_task_instance(original: &Task, now: DateTime<Utc>) -> Task {
    let id = Uuid::now_v7();

    let subtasks = original
        .subtasks
        .iter()
        .map(|s| Subtask {
            id: Uuid::now_v7(),
            parent_task_id: id,
            title: s.title.clone(),
            description: s.description.clone(),
            status: TaskStatus::NotStarted,
            completed_at: None,
            created_at: now,
            updated_at: now,
        })
        .collect();

    let steps = original
        .steps
        .iter()
        .map(|s| Step {
            id: Uuid::now_v7(),
            task_id: id,
            order: s.order,
            content_type: s.content_type,
            content: s.content.clone(),
            created_at: now,
            updated_at: now,
        })
        .collect();

    Task {
        id,
        tenant_id: original.tenant_id,
        created_by: original.created_by,
        title: original.title.clone(),
        description: original.description.clone(),
        status: TaskStatus::NotStarted,
        due_date: calculate_next_due_date(original, now),
        recurrence_type: original.recurrence_type,
        recurrence_config: original.recurrence_config.clone(),
        completed_at: None,
        recurrence_source_id: Some(original.id),
        recurrence_source_completed_at: original.completed_at,
        user_assignees: original.user_assignees.clone(),
        role_assignees: original.role_assignees.clone(),
        subtasks,
        steps,
        created_at: now,
        updated_at: now,
    }
}

/// Result of one recurrence scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOutcome {
    /// Recurring tasks examined.
    pub scanned: usize,
    /// Instances created.
    pub created: usize,
    /// The scan lease was held by another run; nothing was examined.
    pub skipped_locked: bool,
}

/// Spawns due instances of recurring tasks.
pub struct RecurrenceScheduler {
    store: Arc<dyn RecurrenceStore>,
}

impl RecurrenceScheduler {
    pub fn new(store: Arc<dyn RecurrenceStore>) -> Self {
        Self { store }
    }

    /// Run one scan at the current time.
    pub async fn process_recurring_tasks(&self) -> Result<ScanOutcome> {
        self.process_recurring_tasks_at(Utc::now()).await
    }

    /// Run one scan as of `now`.
    ///
    /// All instances are created in a single unit of work. Any error rolls
    /// back every instance of this scan and is returned.
    pub async fn process_recurring_tasks_at(&self, now: DateTime<Utc>) -> Result<ScanOutcome> {
        let start = Instant::now();

        let Some(mut scan) = self.store.begin_scan().await? else {
            info!(
                subsystem = "jobs",
                component = "recurrence",
                op = "process_recurring_tasks",
                "Recurrence scan already running elsewhere, skipping"
            );
            return Ok(ScanOutcome {
                skipped_locked: true,
                ..Default::default()
            });
        };

        let outcome = match spawn_due_instances(scan.as_mut(), now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "recurrence",
                    op = "process_recurring_tasks",
                    error = %e,
                    "Recurrence scan failed, rolling back"
                );
                if let Err(rollback) = scan.rollback().await {
                    warn!(error = %rollback, "Recurrence scan rollback failed");
                }
                return Err(e);
            }
        };

        scan.commit().await?;

        info!(
            subsystem = "jobs",
            component = "recurrence",
            op = "process_recurring_tasks",
            scanned_count = outcome.scanned,
            created_count = outcome.created,
            duration_ms = start.elapsed().as_millis() as u64,
            "Recurrence scan complete"
        );
        Ok(outcome)
    }
}

async fn spawn_due_instances(
    scan: &mut dyn RecurrenceScan,
    now: DateTime<Utc>,
) -> Result<ScanOutcome> {
    let tasks = scan.recurring_tasks().await?;
    let mut outcome = ScanOutcome {
        scanned: tasks.len(),
        ..Default::default()
    };

    for task in &tasks {
        if !should_create_new_instance(task, now) {
            trace!(task_id = %task.id, recurrence = %task.recurrence_type, "Not due");
            continue;
        }
        let instance = create_new_task_instance(task, now);
        debug!(
            tenant_id = %task.tenant_id,
            task_id = %task.id,
            instance_id = %instance.id,
            next_due = ?instance.due_date,
            "Spawning recurring task instance"
        );
        scan.insert_instance(&instance).await?;
        outcome.created += 1;
    }

    Ok(outcome)
}

#[async_trait]
impl PeriodicJob for RecurrenceScheduler {
    fn name(&self) -> &str {
        "recurrence"
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        match self.process_recurring_tasks().await {
            Ok(outcome) => JobResult::Success(serde_json::to_value(outcome).ok()),
            Err(e) => JobResult::Retry(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use stratum_core::{
        CreateStepRequest, CreateSubtaskRequest, CreateTaskRequest, Error, StepContentType,
        TaskRepository,
    };
    use stratum_db::MemoryStore;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn recurring(
        recurrence_type: RecurrenceType,
        due: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Task {
        let mut task = Task::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            CreateTaskRequest {
                title: "Recurring".into(),
                due_date: Some(due),
                recurrence_type,
                ..Default::default()
            },
            completed_at,
        )
        .unwrap();
        task.set_status(TaskStatus::Completed, completed_at);
        task
    }

    #[test]
    fn test_incomplete_or_undated_tasks_never_recur() {
        let now = utc(2025, 3, 10, 12, 0);
        let mut task =
            recurring(RecurrenceType::Daily, utc(2025, 3, 1, 9, 0), utc(2025, 3, 2, 9, 0));
        assert!(should_create_new_instance(&task, now));

        task.set_status(TaskStatus::InProgress, now);
        assert!(!should_create_new_instance(&task, now));

        let mut undated =
            recurring(RecurrenceType::Daily, utc(2025, 3, 1, 9, 0), utc(2025, 3, 2, 9, 0));
        undated.due_date = None;
        assert!(!should_create_new_instance(&undated, now));

        let mut not_recurring =
            recurring(RecurrenceType::Daily, utc(2025, 3, 1, 9, 0), utc(2025, 3, 2, 9, 0));
        not_recurring.recurrence_type = RecurrenceType::None;
        assert!(!should_create_new_instance(&not_recurring, now));
    }

    #[test]
    fn test_future_due_date_does_not_recur() {
        let now = utc(2025, 3, 10, 12, 0);
        let task = recurring(RecurrenceType::Daily, utc(2025, 3, 11, 9, 0), utc(2025, 3, 9, 9, 0));
        assert!(!should_create_new_instance(&task, now));

        let at_now = recurring(RecurrenceType::Daily, now, utc(2025, 3, 9, 9, 0));
        assert!(!should_create_new_instance(&at_now, now));
    }

    #[test]
    fn test_daily_recurs_as_soon_as_due_date_passes() {
        let completed = utc(2025, 3, 10, 8, 0);
        let task = recurring(RecurrenceType::Daily, utc(2025, 3, 10, 9, 0), completed);
        assert!(should_create_new_instance(&task, utc(2025, 3, 10, 9, 1)));
    }

    #[test]
    fn test_weekly_waits_seven_days_after_completion() {
        let completed = utc(2025, 3, 3, 10, 0);
        let task = recurring(RecurrenceType::Weekly, utc(2025, 3, 3, 9, 0), completed);
        assert!(!should_create_new_instance(&task, utc(2025, 3, 3, 11, 0)));
        assert!(!should_create_new_instance(&task, utc(2025, 3, 10, 9, 59)));
        assert!(should_create_new_instance(&task, utc(2025, 3, 10, 10, 0)));
    }

    #[test]
    fn test_monthly_waits_for_next_calendar_month() {
        let completed = utc(2025, 3, 20, 10, 0);
        let task = recurring(RecurrenceType::Monthly, utc(2025, 3, 15, 9, 0), completed);
        assert!(!should_create_new_instance(&task, utc(2025, 3, 31, 23, 0)));
        assert!(should_create_new_instance(&task, utc(2025, 4, 1, 0, 0)));

        // Same month number, different year.
        assert!(should_create_new_instance(&task, utc(2026, 3, 5, 0, 0)));
    }

    #[test]
    fn test_yearly_waits_for_next_calendar_year() {
        let completed = utc(2025, 6, 1, 10, 0);
        let task = recurring(RecurrenceType::Yearly, utc(2025, 5, 1, 9, 0), completed);
        assert!(!should_create_new_instance(&task, utc(2025, 12, 31, 23, 59)));
        assert!(should_create_new_instance(&task, utc(2026, 1, 1, 0, 0)));
    }

    #[test]
    fn test_next_due_date_daily_and_weekly_follow_now() {
        let now = utc(2025, 3, 10, 12, 30);
        let daily = recurring(RecurrenceType::Daily, utc(2025, 3, 1, 9, 0), now);
        assert_eq!(calculate_next_due_date(&daily, now), Some(utc(2025, 3, 11, 12, 30)));

        let weekly = recurring(RecurrenceType::Weekly, utc(2025, 3, 1, 9, 0), now);
        assert_eq!(calculate_next_due_date(&weekly, now), Some(utc(2025, 3, 17, 12, 30)));

        let mut undated = daily.clone();
        undated.due_date = None;
        assert_eq!(calculate_next_due_date(&undated, now), None);
    }

    #[test]
    fn test_next_due_date_monthly_clamps_day() {
        let due = utc(2025, 1, 31, 9, 0);
        let now = utc(2025, 1, 31, 12, 0);
        let task = recurring(RecurrenceType::Monthly, due, now);
        assert_eq!(calculate_next_due_date(&task, now), Some(utc(2025, 2, 28, 9, 0)));
    }

    #[test]
    fn test_next_due_date_monthly_rolls_year_and_drops_seconds() {
        let due = Utc.with_ymd_and_hms(2025, 11, 15, 14, 45, 33).unwrap();
        let now = utc(2025, 12, 20, 8, 0);
        let task = recurring(RecurrenceType::Monthly, due, now);
        assert_eq!(calculate_next_due_date(&task, now), Some(utc(2026, 1, 15, 14, 45)));
    }

    #[test]
    fn test_next_due_date_yearly_handles_leap_day() {
        let due = utc(2024, 2, 29, 7, 15);
        let now = utc(2024, 3, 1, 0, 0);
        let task = recurring(RecurrenceType::Yearly, due, now);
        assert_eq!(calculate_next_due_date(&task, now), Some(utc(2025, 2, 28, 7, 15)));

        let now = utc(2027, 3, 1, 0, 0);
        assert_eq!(calculate_next_due_date(&task, now), Some(utc(2028, 2, 29, 7, 15)));
    }

    #[test]
    fn test_instance_copies_children_and_resets_state() {
        let completed = utc(2025, 3, 2, 9, 0);
        let user = Uuid::new_v4();
        let role = Uuid::new_v4();
        let mut original = Task::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            CreateTaskRequest {
                title: "Inspect site".into(),
                description: Some("Full walkthrough".into()),
                due_date: Some(utc(2025, 3, 1, 9, 0)),
                recurrence_type: RecurrenceType::Daily,
                recurrence_config: Some(serde_json::json!({"shift": "early"})),
                user_assignees: BTreeSet::from([user]),
                role_assignees: BTreeSet::from([role]),
                subtasks: vec![
                    CreateSubtaskRequest {
                        title: "Gate".into(),
                        status: TaskStatus::Completed,
                        ..Default::default()
                    },
                    CreateSubtaskRequest {
                        title: "Roof".into(),
                        ..Default::default()
                    },
                ],
                steps: ["a", "b", "c"]
                    .iter()
                    .map(|c| CreateStepRequest {
                        order: None,
                        content_type: StepContentType::Text,
                        content: c.to_string(),
                    })
                    .collect(),
                ..Default::default()
            },
            completed,
        )
        .unwrap();
        original.set_status(TaskStatus::Completed, completed);
        let snapshot = original.clone();

        let now = utc(2025, 3, 5, 10, 0);
        let instance = create_new_task_instance(&original, now);

        assert_eq!(original, snapshot);
        assert_ne!(instance.id, original.id);
        assert_eq!(instance.recurrence_source_id, Some(original.id));
        assert_eq!(instance.tenant_id, original.tenant_id);
        assert_eq!(instance.created_by, original.created_by);
        assert_eq!(instance.title, "Inspect site");
        assert_eq!(instance.recurrence_config, original.recurrence_config);
        assert_eq!(instance.status, TaskStatus::NotStarted);
        assert!(instance.completed_at.is_none());
        assert_eq!(instance.due_date, Some(utc(2025, 3, 6, 10, 0)));
        assert_eq!(instance.user_assignees, BTreeSet::from([user]));
        assert_eq!(instance.role_assignees, BTreeSet::from([role]));

        assert_eq!(instance.subtasks.len(), 2);
        for sub in &instance.subtasks {
            assert_eq!(sub.parent_task_id, instance.id);
            assert_eq!(sub.status, TaskStatus::NotStarted);
            assert!(sub.completed_at.is_none());
        }

        let steps: Vec<(i32, &str)> = instance
            .steps
            .iter()
            .map(|s| (s.order, s.content.as_str()))
            .collect();
        assert_eq!(steps, vec![(0, "a"), (1, "b"), (2, "c")]);
        assert!(instance.steps.iter().all(|s| s.task_id == instance.id));
    }

    async fn seed_completed_daily(store: &MemoryStore) -> Uuid {
        let tenant = Uuid::new_v4();
        TaskRepository::insert(
            store,
            tenant,
            Uuid::new_v4(),
            CreateTaskRequest {
                title: "Daily report".into(),
                status: TaskStatus::Completed,
                due_date: Some(Utc::now() - Duration::days(1)),
                recurrence_type: RecurrenceType::Daily,
                subtasks: vec![CreateSubtaskRequest {
                    title: "Draft".into(),
                    ..Default::default()
                }],
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_second_scan_creates_nothing() {
        let store = MemoryStore::new();
        seed_completed_daily(&store).await;
        let scheduler = RecurrenceScheduler::new(Arc::new(store.clone()));

        let first = scheduler.process_recurring_tasks().await.unwrap();
        assert_eq!(first.created, 1);
        assert_eq!(store.task_count().await, 2);

        let second = scheduler.process_recurring_tasks().await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.scanned, 1);
        assert_eq!(store.task_count().await, 2);
    }

    #[tokio::test]
    async fn test_scan_skips_while_lease_is_held() {
        let store = MemoryStore::new();
        seed_completed_daily(&store).await;
        let scheduler = RecurrenceScheduler::new(Arc::new(store.clone()));

        let held = store.begin_scan().await.unwrap().unwrap();
        let outcome = scheduler.process_recurring_tasks().await.unwrap();
        assert!(outcome.skipped_locked);
        assert_eq!(outcome.created, 0);
        held.rollback().await.unwrap();

        let outcome = scheduler.process_recurring_tasks().await.unwrap();
        assert_eq!(outcome.created, 1);
    }

    #[tokio::test]
    async fn test_recompleted_task_recurs_again() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let id = TaskRepository::insert(
            &store,
            tenant,
            Uuid::new_v4(),
            CreateTaskRequest {
                title: "Backup".into(),
                status: TaskStatus::Completed,
                due_date: Some(Utc::now() - Duration::days(1)),
                recurrence_type: RecurrenceType::Daily,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let scheduler = RecurrenceScheduler::new(Arc::new(store.clone()));

        assert_eq!(scheduler.process_recurring_tasks().await.unwrap().created, 1);
        assert_eq!(scheduler.process_recurring_tasks().await.unwrap().created, 0);

        store
            .update_status(tenant, id, TaskStatus::InProgress)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store
            .update_status(tenant, id, TaskStatus::Completed)
            .await
            .unwrap();

        assert_eq!(scheduler.process_recurring_tasks().await.unwrap().created, 1);
        assert_eq!(scheduler.process_recurring_tasks().await.unwrap().created, 0);
        assert_eq!(store.task_count().await, 3);
    }

    /// Store whose scans fail on the n-th instance insert.
    struct FailingStore {
        inner: MemoryStore,
        fail_on: usize,
    }

    struct FailingScan {
        inner: Box<dyn RecurrenceScan>,
        inserted: usize,
        fail_on: usize,
    }

    #[async_trait]
    impl RecurrenceStore for FailingStore {
        async fn begin_scan(&self) -> Result<Option<Box<dyn RecurrenceScan>>> {
            Ok(self.inner.begin_scan().await?.map(|inner| {
                Box::new(FailingScan {
                    inner,
                    inserted: 0,
                    fail_on: self.fail_on,
                }) as Box<dyn RecurrenceScan>
            }))
        }
    }

    #[async_trait]
    impl RecurrenceScan for FailingScan {
        async fn recurring_tasks(&mut self) -> Result<Vec<Task>> {
            self.inner.recurring_tasks().await
        }

        async fn insert_instance(&mut self, task: &Task) -> Result<()> {
            if self.inserted + 1 == self.fail_on {
                return Err(Error::Internal("insert failed".into()));
            }
            self.inner.insert_instance(task).await?;
            self.inserted += 1;
            Ok(())
        }

        async fn commit(self: Box<Self>) -> Result<()> {
            self.inner.commit().await
        }

        async fn rollback(self: Box<Self>) -> Result<()> {
            self.inner.rollback().await
        }
    }

    #[tokio::test]
    async fn test_failed_scan_creates_no_instances() {
        let store = MemoryStore::new();
        seed_completed_daily(&store).await;
        seed_completed_daily(&store).await;
        seed_completed_daily(&store).await;

        let failing = RecurrenceScheduler::new(Arc::new(FailingStore {
            inner: store.clone(),
            fail_on: 3,
        }));
        let err = failing.process_recurring_tasks().await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(store.task_count().await, 3);

        // The lease was released and a clean scan succeeds.
        let scheduler = RecurrenceScheduler::new(Arc::new(store.clone()));
        let outcome = scheduler.process_recurring_tasks().await.unwrap();
        assert_eq!(outcome.created, 3);
        assert_eq!(store.task_count().await, 6);
    }

    #[tokio::test]
    async fn test_periodic_job_reports_outcome() {
        let store = MemoryStore::new();
        seed_completed_daily(&store).await;
        let scheduler = RecurrenceScheduler::new(Arc::new(store));

        assert_eq!(scheduler.name(), "recurrence");
        match scheduler.execute(JobContext::new("recurrence", 1)).await {
            JobResult::Success(Some(value)) => assert_eq!(value["created"], 1),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
