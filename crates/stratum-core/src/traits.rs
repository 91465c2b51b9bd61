//! Collaborator interfaces for stratum.
//!
//! The scheduler and the tag engine depend only on these traits. Concrete
//! stores (PostgreSQL, in-memory) live in `stratum-db` and are injected at
//! construction time.

use std::collections::HashSet;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;
use crate::tags::{Tag, TagLookup};

// =============================================================================
// TASK REPOSITORY TRAITS
// =============================================================================

/// Tenant-scoped task storage.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a task with its subtasks and steps in one unit of work.
    async fn insert(&self, tenant_id: Uuid, created_by: Uuid, req: CreateTaskRequest)
        -> Result<Uuid>;

    /// Fetch a task with subtasks and steps.
    async fn fetch(&self, tenant_id: Uuid, id: Uuid) -> Result<Task>;

    /// List tasks newest first, with the unpaginated total.
    async fn find_many(&self, tenant_id: Uuid, filter: TaskFilter) -> Result<TaskPage>;

    /// Apply a partial update. Status changes maintain `completed_at`.
    async fn update(&self, tenant_id: Uuid, id: Uuid, req: UpdateTaskRequest) -> Result<Task>;

    /// Set the status, stamping or clearing `completed_at`.
    async fn update_status(&self, tenant_id: Uuid, id: Uuid, status: TaskStatus) -> Result<Task>;

    /// Delete a task together with its subtasks and steps.
    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<()>;
}

/// Subtask storage, scoped through the parent task's tenant.
#[async_trait]
pub trait SubtaskRepository: Send + Sync {
    async fn add(&self, tenant_id: Uuid, task_id: Uuid, req: CreateSubtaskRequest)
        -> Result<Subtask>;

    async fn update(
        &self,
        tenant_id: Uuid,
        task_id: Uuid,
        subtask_id: Uuid,
        req: UpdateSubtaskRequest,
    ) -> Result<Subtask>;

    async fn delete(&self, tenant_id: Uuid, task_id: Uuid, subtask_id: Uuid) -> Result<()>;
}

/// Step storage. Orders stay dense `0..N-1` across every mutation.
#[async_trait]
pub trait StepRepository: Send + Sync {
    /// Add a step. `order: None` appends; an explicit order shifts later steps up.
    async fn add(&self, tenant_id: Uuid, task_id: Uuid, req: CreateStepRequest) -> Result<Step>;

    /// Update content and content type. The order is left unchanged.
    async fn update(
        &self,
        tenant_id: Uuid,
        task_id: Uuid,
        step_id: Uuid,
        req: UpdateStepRequest,
    ) -> Result<Step>;

    /// Remove a step and compact the orders after it. Returns the removed step.
    async fn delete(&self, tenant_id: Uuid, task_id: Uuid, step_id: Uuid) -> Result<Step>;

    /// Steps of a task sorted by order.
    async fn list_for_task(&self, tenant_id: Uuid, task_id: Uuid) -> Result<Vec<Step>>;

    /// Number of the tenant's steps whose content equals `content`.
    ///
    /// Recurring instances copy media steps by key, so one object can back
    /// several steps.
    async fn count_with_content(&self, tenant_id: Uuid, content: &str) -> Result<i64>;
}

// =============================================================================
// RECURRENCE TRAITS
// =============================================================================

/// Source of recurrence scans.
#[async_trait]
pub trait RecurrenceStore: Send + Sync {
    /// Open a scan holding the recurrence lease.
    ///
    /// Returns `None` when another scan currently holds the lease.
    async fn begin_scan(&self) -> Result<Option<Box<dyn RecurrenceScan>>>;
}

/// A single all-or-nothing recurrence scan across tenants.
///
/// Dropping a scan without calling [`RecurrenceScan::commit`] discards every
/// staged instance.
#[async_trait]
pub trait RecurrenceScan: Send {
    /// Recurring tasks whose current completion has not yet spawned an instance.
    async fn recurring_tasks(&mut self) -> Result<Vec<Task>>;

    /// Stage a new instance with all of its subtasks and steps.
    async fn insert_instance(&mut self, task: &Task) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

// =============================================================================
// TAG REPOSITORY TRAITS
// =============================================================================

/// Tenant-scoped tag storage.
#[async_trait]
pub trait TagRepository: Send + Sync {
    /// Tags matching a lookup in insertion order.
    async fn find_many(
        &self,
        tenant_id: Uuid,
        lookup: &TagLookup,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Tag>>;

    /// Return the tag with this `(type, name)`, creating it atomically if absent.
    async fn get_or_create(&self, tenant_id: Uuid, tag_type: &str, name: &str) -> Result<Tag>;

    /// Delete a tag and detach it from every entity.
    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<()>;
}

/// Storage for entities that carry tags (files, events).
#[async_trait]
pub trait TaggedEntityRepository: Send + Sync {
    fn kind(&self) -> EntityKind;

    /// Ids of entities carrying at least one of `tag_ids`.
    async fn ids_with_any_tag(&self, tenant_id: Uuid, tag_ids: &[Uuid]) -> Result<HashSet<Uuid>>;

    /// Entities among `ids`, newest first.
    async fn fetch_page(
        &self,
        tenant_id: Uuid,
        ids: &[Uuid],
        offset: i64,
        limit: i64,
    ) -> Result<Vec<TaggedEntity>>;

    /// Tag ids appearing on any entity that carries every tag in `required`.
    /// Empty when `required` is empty.
    async fn tag_ids_cooccurring_with_all(
        &self,
        tenant_id: Uuid,
        required: &[Uuid],
    ) -> Result<HashSet<Uuid>>;

    /// Attach one tag. A no-op when already attached.
    async fn add_tag(&self, tenant_id: Uuid, entity_id: Uuid, tag_id: Uuid) -> Result<()>;

    /// Detach one tag. A no-op when not attached.
    async fn remove_tag(&self, tenant_id: Uuid, entity_id: Uuid, tag_id: Uuid) -> Result<()>;

    /// Replace the entity's tag list.
    async fn set_tags(&self, tenant_id: Uuid, entity_id: Uuid, tag_ids: &[Uuid]) -> Result<()>;
}

// =============================================================================
// OBJECT STORAGE
// =============================================================================

/// Key-addressed binary storage for step media and uploads.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete an object. Missing objects are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;
}
