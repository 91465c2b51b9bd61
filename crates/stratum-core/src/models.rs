//! Core data models for stratum.
//!
//! Typed records for tasks, subtasks, steps and tagged entities. Persistence
//! adapters convert rows/documents into these types at the store boundary.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// TASK ENUMS
// =============================================================================

/// Lifecycle status shared by tasks and subtasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Overdue,
}

impl TaskStatus {
    /// Whether this status is `Completed`.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Compute `completed_at` for a status write.
    ///
    /// A transition into `Completed` stamps `now`; re-asserting `Completed`
    /// keeps the original stamp; any other status clears it.
    pub fn resolve_completed_at(
        self,
        previous: TaskStatus,
        previous_completed_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        match (self, previous) {
            (Self::Completed, Self::Completed) => previous_completed_at.or(Some(now)),
            (Self::Completed, _) => Some(now),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Overdue => write!(f, "overdue"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "not_started" => Ok(Self::NotStarted),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "overdue" => Ok(Self::Overdue),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

/// Recurrence policy of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceType {
    #[default]
    None,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RecurrenceType {
    /// Whether a task with this policy is a recurrence template.
    pub fn is_recurring(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl std::fmt::Display for RecurrenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Daily => write!(f, "daily"),
            Self::Weekly => write!(f, "weekly"),
            Self::Monthly => write!(f, "monthly"),
            Self::Yearly => write!(f, "yearly"),
        }
    }
}

impl std::str::FromStr for RecurrenceType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            _ => Err(format!("Invalid recurrence type: {}", s)),
        }
    }
}

/// Kind of content held by a task step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepContentType {
    #[default]
    Text,
    Image,
    Video,
}

impl StepContentType {
    /// Media steps store an object-storage key as their content.
    pub fn is_media(&self) -> bool {
        matches!(self, Self::Image | Self::Video)
    }
}

impl std::fmt::Display for StepContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
        }
    }
}

impl std::str::FromStr for StepContentType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            _ => Err(format!("Invalid step content type: {}", s)),
        }
    }
}

// =============================================================================
// TASK RECORDS
// =============================================================================

/// A task with its subtasks and ordered steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub created_by: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub recurrence_type: RecurrenceType,
    /// Free-form recurrence settings, carried verbatim into new instances.
    pub recurrence_config: Option<JsonValue>,
    /// Set exactly while `status == Completed`.
    pub completed_at: Option<DateTime<Utc>>,
    /// The task this instance was spawned from, if it was created by recurrence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_source_id: Option<Uuid>,
    /// The source's `completed_at` at spawn time. One instance per completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_source_completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_assignees: BTreeSet<Uuid>,
    #[serde(default)]
    pub role_assignees: BTreeSet<Uuid>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    /// Steps sorted by `order`, which is dense `0..N-1`.
    #[serde(default)]
    pub steps: Vec<Step>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Build a new task from a create request, with steps in dense order.
    pub fn new(
        tenant_id: Uuid,
        created_by: Uuid,
        req: CreateTaskRequest,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let id = Uuid::now_v7();
        let title = normalize_title(&req.title)?;

        let subtasks = req
            .subtasks
            .iter()
            .map(|s| Subtask::new(id, s, now))
            .collect::<Result<Vec<_>>>()?;

        let mut steps = Vec::with_capacity(req.steps.len());
        for step in &req.steps {
            insert_step_ordered(&mut steps, id, step, now)?;
        }

        Ok(Self {
            id,
            tenant_id,
            created_by,
            title,
            description: req.description,
            status: req.status,
            due_date: req.due_date,
            recurrence_type: req.recurrence_type,
            recurrence_config: req.recurrence_config,
            completed_at: req
                .status
                .resolve_completed_at(TaskStatus::NotStarted, None, now),
            recurrence_source_id: None,
            recurrence_source_completed_at: None,
            user_assignees: req.user_assignees,
            role_assignees: req.role_assignees,
            subtasks,
            steps,
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether this task is a recurrence template.
    pub fn is_recurring(&self) -> bool {
        self.recurrence_type.is_recurring()
    }

    /// Apply a partial update in place, keeping `completed_at` consistent.
    pub fn apply_update(&mut self, req: UpdateTaskRequest, now: DateTime<Utc>) -> Result<()> {
        if let Some(title) = req.title {
            self.title = normalize_title(&title)?;
        }
        if let Some(description) = req.description {
            self.description = description;
        }
        if let Some(status) = req.status {
            self.set_status(status, now);
        }
        if let Some(due_date) = req.due_date {
            self.due_date = due_date;
        }
        if let Some(recurrence_type) = req.recurrence_type {
            self.recurrence_type = recurrence_type;
        }
        if let Some(config) = req.recurrence_config {
            self.recurrence_config = config;
        }
        if let Some(users) = req.user_assignees {
            self.user_assignees = users;
        }
        if let Some(roles) = req.role_assignees {
            self.role_assignees = roles;
        }
        self.updated_at = now;
        Ok(())
    }

    pub fn set_status(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        self.completed_at = status.resolve_completed_at(self.status, self.completed_at, now);
        self.status = status;
        self.updated_at = now;
    }
}

/// A subtask, exclusively owned by its parent task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: Uuid,
    pub parent_task_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subtask {
    pub fn new(task_id: Uuid, req: &CreateSubtaskRequest, now: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            id: Uuid::now_v7(),
            parent_task_id: task_id,
            title: normalize_title(&req.title)?,
            description: req.description.clone(),
            status: req.status,
            completed_at: req
                .status
                .resolve_completed_at(TaskStatus::NotStarted, None, now),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply_update(&mut self, req: UpdateSubtaskRequest, now: DateTime<Utc>) -> Result<()> {
        if let Some(title) = req.title {
            self.title = normalize_title(&title)?;
        }
        if let Some(description) = req.description {
            self.description = description;
        }
        if let Some(status) = req.status {
            self.completed_at = status.resolve_completed_at(self.status, self.completed_at, now);
            self.status = status;
        }
        self.updated_at = now;
        Ok(())
    }
}

/// An ordered unit of task content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub task_id: Uuid,
    pub order: i32,
    pub content_type: StepContentType,
    /// Text, or an object-storage key for media steps.
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Step {
    pub fn apply_update(&mut self, req: UpdateStepRequest, now: DateTime<Utc>) {
        if let Some(content_type) = req.content_type {
            self.content_type = content_type;
        }
        if let Some(content) = req.content {
            self.content = content;
        }
        self.updated_at = now;
    }
}

// =============================================================================
// TASK REQUESTS
// =============================================================================

/// Request for creating a task with optional subtasks and steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recurrence_type: RecurrenceType,
    pub recurrence_config: Option<JsonValue>,
    #[serde(default)]
    pub user_assignees: BTreeSet<Uuid>,
    #[serde(default)]
    pub role_assignees: BTreeSet<Uuid>,
    #[serde(default)]
    pub subtasks: Vec<CreateSubtaskRequest>,
    #[serde(default)]
    pub steps: Vec<CreateStepRequest>,
}

/// Request for creating a subtask.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSubtaskRequest {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
}

/// Request for creating a step. `order: None` appends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateStepRequest {
    pub order: Option<i32>,
    #[serde(default)]
    pub content_type: StepContentType,
    pub content: String,
}

/// Trim a task or subtask title, rejecting blank ones.
pub fn normalize_title(title: &str) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("title must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

/// Resolve where a new step lands among `count` existing steps.
///
/// `None` appends. An explicit order past the end is clamped to an append.
pub fn step_insert_position(requested: Option<i32>, count: usize) -> Result<i32> {
    let count = i32::try_from(count)
        .map_err(|_| Error::InvalidInput("too many steps".to_string()))?;
    match requested {
        None => Ok(count),
        Some(order) if order < 0 => Err(Error::InvalidInput(format!(
            "step order must be non-negative, got {}",
            order
        ))),
        Some(order) => Ok(order.min(count)),
    }
}

/// Insert a step at its resolved position, shifting later steps up by one.
pub fn insert_step_ordered(
    steps: &mut Vec<Step>,
    task_id: Uuid,
    req: &CreateStepRequest,
    now: DateTime<Utc>,
) -> Result<Step> {
    let order = step_insert_position(req.order, steps.len())?;
    for step in steps.iter_mut().filter(|s| s.order >= order) {
        step.order += 1;
    }
    let step = Step {
        id: Uuid::now_v7(),
        task_id,
        order,
        content_type: req.content_type,
        content: req.content.clone(),
        created_at: now,
        updated_at: now,
    };
    steps.push(step.clone());
    steps.sort_by_key(|s| s.order);
    Ok(step)
}

/// Renumber steps to a dense `0..N-1` sequence, keeping their relative order.
pub fn compact_step_orders(steps: &mut [Step]) {
    steps.sort_by_key(|s| s.order);
    for (i, step) in steps.iter_mut().enumerate() {
        step.order = i as i32;
    }
}

/// Partial task update. `None` leaves a field unchanged; the nested `Option`
/// on nullable fields distinguishes "clear" from "leave".
#[derive(Debug, Clone, Default)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub recurrence_type: Option<RecurrenceType>,
    pub recurrence_config: Option<Option<JsonValue>>,
    pub user_assignees: Option<BTreeSet<Uuid>>,
    pub role_assignees: Option<BTreeSet<Uuid>>,
}

/// Partial subtask update.
#[derive(Debug, Clone, Default)]
pub struct UpdateSubtaskRequest {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
}

/// Partial step update. Order changes go through delete/insert.
#[derive(Debug, Clone, Default)]
pub struct UpdateStepRequest {
    pub content_type: Option<StepContentType>,
    pub content: Option<String>,
}

/// Filter for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub due_date_from: Option<DateTime<Utc>>,
    pub due_date_to: Option<DateTime<Utc>>,
    /// Only tasks assigned to this user.
    pub user_assignee: Option<Uuid>,
    /// Only tasks assigned to this role.
    pub role_assignee: Option<Uuid>,
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

impl TaskFilter {
    /// Effective `(offset, limit)` with defaults and the page-size ceiling applied.
    pub fn page(&self) -> (i64, i64) {
        let offset = self.offset.unwrap_or(crate::defaults::PAGE_OFFSET).max(0);
        let limit = self
            .limit
            .unwrap_or(crate::defaults::PAGE_LIMIT)
            .clamp(1, crate::defaults::PAGE_LIMIT_MAX);
        (offset, limit)
    }

    /// Whether a task satisfies every non-pagination constraint.
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(from) = self.due_date_from {
            if !task.due_date.is_some_and(|d| d >= from) {
                return false;
            }
        }
        if let Some(to) = self.due_date_to {
            if !task.due_date.is_some_and(|d| d <= to) {
                return false;
            }
        }
        if let Some(user) = self.user_assignee {
            if !task.user_assignees.contains(&user) {
                return false;
            }
        }
        if let Some(role) = self.role_assignee {
            if !task.role_assignees.contains(&role) {
                return false;
            }
        }
        true
    }
}

/// One page of tasks plus the unpaginated total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub total: i64,
}

// =============================================================================
// TAGGED ENTITIES
// =============================================================================

/// Kind of entity that can carry tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    File,
    Event,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Event => write!(f, "event"),
        }
    }
}

/// An uploaded file whose bytes live in object storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub file_name: String,
    pub object_key: String,
    pub thumbnail_key: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tag_ids: Vec<Uuid>,
}

/// A tenant event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub event_name: String,
    pub description: Option<String>,
    pub event_date: Option<NaiveDate>,
    pub location: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tag_ids: Vec<Uuid>,
}

/// Request for registering an uploaded file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateFileRequest {
    pub file_name: String,
    pub object_key: String,
    pub thumbnail_key: Option<String>,
}

/// Request for creating an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateEventRequest {
    pub event_name: String,
    pub description: Option<String>,
    pub event_date: Option<NaiveDate>,
    pub location: Option<String>,
    pub status: Option<String>,
}

/// Kind-agnostic view of a tagged entity used by tag queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedEntity {
    pub id: Uuid,
    pub kind: EntityKind,
    pub tenant_id: Uuid,
    /// File name or event name.
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub tag_ids: Vec<Uuid>,
}

impl From<&FileRecord> for TaggedEntity {
    fn from(file: &FileRecord) -> Self {
        Self {
            id: file.id,
            kind: EntityKind::File,
            tenant_id: file.tenant_id,
            label: file.file_name.clone(),
            created_at: file.created_at,
            tag_ids: file.tag_ids.clone(),
        }
    }
}

impl From<&EventRecord> for TaggedEntity {
    fn from(event: &EventRecord) -> Self {
        Self {
            id: event.id,
            kind: EntityKind::Event,
            tenant_id: event.tenant_id,
            label: event.event_name.clone(),
            created_at: event.created_at,
            tag_ids: event.tag_ids.clone(),
        }
    }
}
