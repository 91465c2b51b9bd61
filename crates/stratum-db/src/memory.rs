//! In-memory document store.
//!
//! Records are kept the way a document database holds them: tasks embed their
//! subtasks and steps, files and events carry an ordered list of tag ids, and
//! tag membership is resolved by scanning those lists. Every trait in
//! `stratum_core::traits` is implemented here, so the scheduler and the tag
//! engine can run without PostgreSQL.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use stratum_core::{
    compact_step_orders, insert_step_ordered, normalize_tag_name, normalize_tag_type,
    normalize_title, CreateEventRequest, CreateFileRequest, CreateStepRequest, CreateSubtaskRequest,
    CreateTaskRequest, EntityKind, Error, EventRecord, FileRecord, RecurrenceScan,
    RecurrenceStore, Result, Step, StepRepository, Subtask, SubtaskRepository, Tag, TagLookup,
    TagRepository, TaggedEntity, TaggedEntityRepository, Task, TaskFilter, TaskPage,
    TaskRepository, TaskStatus, UpdateStepRequest, UpdateSubtaskRequest, UpdateTaskRequest,
};

#[derive(Debug, Default)]
struct MemoryState {
    tasks: Vec<Task>,
    tags: Vec<Tag>,
    files: Vec<FileRecord>,
    events: Vec<EventRecord>,
}

impl MemoryState {
    fn task(&self, tenant_id: Uuid, id: Uuid) -> Result<&Task> {
        self.tasks
            .iter()
            .find(|t| t.id == id && t.tenant_id == tenant_id)
            .ok_or(Error::TaskNotFound(id))
    }

    fn task_mut(&mut self, tenant_id: Uuid, id: Uuid) -> Result<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id && t.tenant_id == tenant_id)
            .ok_or(Error::TaskNotFound(id))
    }

    /// Whether the completion `(source_id, completed_at)` already spawned an instance.
    fn has_successor(&self, source_id: Uuid, completed_at: Option<DateTime<Utc>>) -> bool {
        completed_at.is_some()
            && self.tasks.iter().any(|t| {
                t.recurrence_source_id == Some(source_id)
                    && t.recurrence_source_completed_at == completed_at
            })
    }

    fn tag_exists(&self, tenant_id: Uuid, tag_id: Uuid) -> bool {
        self.tags
            .iter()
            .any(|t| t.id == tag_id && t.tenant_id == tenant_id)
    }

    /// Entities of one kind in insertion order.
    fn entities(&self, kind: EntityKind, tenant_id: Uuid) -> Vec<TaggedEntity> {
        match kind {
            EntityKind::File => self
                .files
                .iter()
                .filter(|f| f.tenant_id == tenant_id)
                .map(TaggedEntity::from)
                .collect(),
            EntityKind::Event => self
                .events
                .iter()
                .filter(|e| e.tenant_id == tenant_id)
                .map(TaggedEntity::from)
                .collect(),
        }
    }

    fn entity_tag_ids_mut(
        &mut self,
        kind: EntityKind,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<&mut Vec<Uuid>> {
        let tags = match kind {
            EntityKind::File => self
                .files
                .iter_mut()
                .find(|f| f.id == id && f.tenant_id == tenant_id)
                .map(|f| &mut f.tag_ids),
            EntityKind::Event => self
                .events
                .iter_mut()
                .find(|e| e.id == id && e.tenant_id == tenant_id)
                .map(|e| &mut e.tag_ids),
        };
        tags.ok_or_else(|| Error::NotFound(format!("{} {}", kind, id)))
    }
}

fn page<T>(items: impl Iterator<Item = T>, offset: i64, limit: i64) -> Vec<T> {
    items
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

/// Shared in-memory store. Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    scan_lease: Arc<Mutex<()>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// File view implementing [`TaggedEntityRepository`].
    pub fn files(&self) -> MemoryEntityStore {
        MemoryEntityStore {
            state: self.state.clone(),
            kind: EntityKind::File,
        }
    }

    /// Event view implementing [`TaggedEntityRepository`].
    pub fn events(&self) -> MemoryEntityStore {
        MemoryEntityStore {
            state: self.state.clone(),
            kind: EntityKind::Event,
        }
    }

    pub async fn create_file(&self, tenant_id: Uuid, req: CreateFileRequest) -> Result<FileRecord> {
        if req.file_name.trim().is_empty() {
            return Err(Error::InvalidInput("file name must not be empty".to_string()));
        }
        let file = FileRecord {
            id: Uuid::now_v7(),
            tenant_id,
            file_name: req.file_name,
            object_key: req.object_key,
            thumbnail_key: req.thumbnail_key,
            created_at: Utc::now(),
            tag_ids: Vec::new(),
        };
        self.state.lock().await.files.push(file.clone());
        Ok(file)
    }

    pub async fn create_event(
        &self,
        tenant_id: Uuid,
        req: CreateEventRequest,
    ) -> Result<EventRecord> {
        let event_name = normalize_title(&req.event_name)?;
        let event = EventRecord {
            id: Uuid::now_v7(),
            tenant_id,
            event_name,
            description: req.description,
            event_date: req.event_date,
            location: req.location,
            status: req.status.unwrap_or_else(|| "planned".to_string()),
            created_at: Utc::now(),
            tag_ids: Vec::new(),
        };
        self.state.lock().await.events.push(event.clone());
        Ok(event)
    }

    /// Number of tasks across all tenants.
    pub async fn task_count(&self) -> usize {
        self.state.lock().await.tasks.len()
    }
}

// =============================================================================
// TASKS
// =============================================================================

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn insert(
        &self,
        tenant_id: Uuid,
        created_by: Uuid,
        req: CreateTaskRequest,
    ) -> Result<Uuid> {
        let task = Task::new(tenant_id, created_by, req, Utc::now())?;
        let id = task.id;
        self.state.lock().await.tasks.push(task);
        debug!(subsystem = "db", component = "memory", op = "insert_task", task_id = %id, "Task inserted");
        Ok(id)
    }

    async fn fetch(&self, tenant_id: Uuid, id: Uuid) -> Result<Task> {
        let state = self.state.lock().await;
        state.task(tenant_id, id).cloned()
    }

    async fn find_many(&self, tenant_id: Uuid, filter: TaskFilter) -> Result<TaskPage> {
        let state = self.state.lock().await;
        let mut matching: Vec<&Task> = state
            .tasks
            .iter()
            .rev()
            .filter(|t| t.tenant_id == tenant_id && filter.matches(t))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as i64;
        let (offset, limit) = filter.page();
        let tasks = page(matching.into_iter().cloned(), offset, limit);
        Ok(TaskPage { tasks, total })
    }

    async fn update(&self, tenant_id: Uuid, id: Uuid, req: UpdateTaskRequest) -> Result<Task> {
        let mut state = self.state.lock().await;
        let task = state.task_mut(tenant_id, id)?;
        task.apply_update(req, Utc::now())?;
        Ok(task.clone())
    }

    async fn update_status(&self, tenant_id: Uuid, id: Uuid, status: TaskStatus) -> Result<Task> {
        let mut state = self.state.lock().await;
        let task = state.task_mut(tenant_id, id)?;
        task.set_status(status, Utc::now());
        Ok(task.clone())
    }

    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        state.task(tenant_id, id)?;
        state.tasks.retain(|t| t.id != id);
        for task in state.tasks.iter_mut() {
            if task.recurrence_source_id == Some(id) {
                task.recurrence_source_id = None;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SubtaskRepository for MemoryStore {
    async fn add(
        &self,
        tenant_id: Uuid,
        task_id: Uuid,
        req: CreateSubtaskRequest,
    ) -> Result<Subtask> {
        let mut state = self.state.lock().await;
        let task = state.task_mut(tenant_id, task_id)?;
        let subtask = Subtask::new(task_id, &req, Utc::now())?;
        task.subtasks.push(subtask.clone());
        Ok(subtask)
    }

    async fn update(
        &self,
        tenant_id: Uuid,
        task_id: Uuid,
        subtask_id: Uuid,
        req: UpdateSubtaskRequest,
    ) -> Result<Subtask> {
        let mut state = self.state.lock().await;
        let task = state.task_mut(tenant_id, task_id)?;
        let subtask = task
            .subtasks
            .iter_mut()
            .find(|s| s.id == subtask_id)
            .ok_or_else(|| Error::NotFound(format!("subtask {}", subtask_id)))?;
        subtask.apply_update(req, Utc::now())?;
        Ok(subtask.clone())
    }

    async fn delete(&self, tenant_id: Uuid, task_id: Uuid, subtask_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        let task = state.task_mut(tenant_id, task_id)?;
        let before = task.subtasks.len();
        task.subtasks.retain(|s| s.id != subtask_id);
        if task.subtasks.len() == before {
            return Err(Error::NotFound(format!("subtask {}", subtask_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl StepRepository for MemoryStore {
    async fn add(&self, tenant_id: Uuid, task_id: Uuid, req: CreateStepRequest) -> Result<Step> {
        let mut state = self.state.lock().await;
        let task = state.task_mut(tenant_id, task_id)?;
        insert_step_ordered(&mut task.steps, task_id, &req, Utc::now())
    }

    async fn update(
        &self,
        tenant_id: Uuid,
        task_id: Uuid,
        step_id: Uuid,
        req: UpdateStepRequest,
    ) -> Result<Step> {
        let mut state = self.state.lock().await;
        let task = state.task_mut(tenant_id, task_id)?;
        let step = task
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| Error::NotFound(format!("step {}", step_id)))?;
        step.apply_update(req, Utc::now());
        Ok(step.clone())
    }

    async fn delete(&self, tenant_id: Uuid, task_id: Uuid, step_id: Uuid) -> Result<Step> {
        let mut state = self.state.lock().await;
        let task = state.task_mut(tenant_id, task_id)?;
        let index = task
            .steps
            .iter()
            .position(|s| s.id == step_id)
            .ok_or_else(|| Error::NotFound(format!("step {}", step_id)))?;
        let removed = task.steps.remove(index);
        compact_step_orders(&mut task.steps);
        Ok(removed)
    }

    async fn list_for_task(&self, tenant_id: Uuid, task_id: Uuid) -> Result<Vec<Step>> {
        let state = self.state.lock().await;
        Ok(state.task(tenant_id, task_id)?.steps.clone())
    }

    async fn count_with_content(&self, tenant_id: Uuid, content: &str) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state
            .tasks
            .iter()
            .filter(|t| t.tenant_id == tenant_id)
            .flat_map(|t| t.steps.iter())
            .filter(|s| s.content == content)
            .count() as i64)
    }
}

// =============================================================================
// RECURRENCE
// =============================================================================

/// Scan over the in-memory store. Instances are staged and applied on commit.
pub struct MemoryRecurrenceScan {
    state: Arc<Mutex<MemoryState>>,
    staged: Vec<Task>,
    _lease: OwnedMutexGuard<()>,
}

#[async_trait]
impl RecurrenceStore for MemoryStore {
    async fn begin_scan(&self) -> Result<Option<Box<dyn RecurrenceScan>>> {
        let lease = match self.scan_lease.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => return Ok(None),
        };
        Ok(Some(Box::new(MemoryRecurrenceScan {
            state: self.state.clone(),
            staged: Vec::new(),
            _lease: lease,
        })))
    }
}

#[async_trait]
impl RecurrenceScan for MemoryRecurrenceScan {
    async fn recurring_tasks(&mut self) -> Result<Vec<Task>> {
        let state = self.state.lock().await;
        let staged_sources: HashSet<(Uuid, Option<DateTime<Utc>>)> = self
            .staged
            .iter()
            .filter_map(|t| Some((t.recurrence_source_id?, t.recurrence_source_completed_at)))
            .collect();
        Ok(state
            .tasks
            .iter()
            .filter(|t| t.is_recurring())
            .filter(|t| {
                !state.has_successor(t.id, t.completed_at)
                    && !staged_sources.contains(&(t.id, t.completed_at))
            })
            .cloned()
            .collect())
    }

    async fn insert_instance(&mut self, task: &Task) -> Result<()> {
        self.staged.push(task.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut state = this.state.lock().await;
        for task in &this.staged {
            if let Some(source) = task.recurrence_source_id {
                if state.has_successor(source, task.recurrence_source_completed_at) {
                    return Err(Error::Conflict(format!(
                        "task {} already has a successor for this completion",
                        source
                    )));
                }
            }
        }
        state.tasks.extend(this.staged);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// TAGS
// =============================================================================

#[async_trait]
impl TagRepository for MemoryStore {
    async fn find_many(
        &self,
        tenant_id: Uuid,
        lookup: &TagLookup,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Tag>> {
        let state = self.state.lock().await;
        let matching = state
            .tags
            .iter()
            .filter(|t| t.tenant_id == tenant_id && lookup.matches(t))
            .cloned();
        Ok(page(matching, offset, limit))
    }

    async fn get_or_create(&self, tenant_id: Uuid, tag_type: &str, name: &str) -> Result<Tag> {
        let name = normalize_tag_name(name)?;
        let tag_type = normalize_tag_type(tag_type);

        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .tags
            .iter()
            .find(|t| t.tenant_id == tenant_id && t.tag_type == tag_type && t.name == name)
        {
            return Ok(existing.clone());
        }

        let tag = Tag {
            id: Uuid::now_v7(),
            tenant_id,
            name,
            tag_type,
            created_at: Utc::now(),
        };
        state.tags.push(tag.clone());
        Ok(tag)
    }

    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.tag_exists(tenant_id, id) {
            return Err(Error::TagNotFound(id));
        }
        state.tags.retain(|t| t.id != id);
        for file in state.files.iter_mut() {
            file.tag_ids.retain(|t| *t != id);
        }
        for event in state.events.iter_mut() {
            event.tag_ids.retain(|t| *t != id);
        }
        Ok(())
    }
}

/// One entity collection (files or events) of a [`MemoryStore`].
#[derive(Clone)]
pub struct MemoryEntityStore {
    state: Arc<Mutex<MemoryState>>,
    kind: EntityKind,
}

#[async_trait]
impl TaggedEntityRepository for MemoryEntityStore {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    async fn ids_with_any_tag(&self, tenant_id: Uuid, tag_ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        let state = self.state.lock().await;
        Ok(state
            .entities(self.kind, tenant_id)
            .into_iter()
            .filter(|e| e.tag_ids.iter().any(|t| tag_ids.contains(t)))
            .map(|e| e.id)
            .collect())
    }

    async fn fetch_page(
        &self,
        tenant_id: Uuid,
        ids: &[Uuid],
        offset: i64,
        limit: i64,
    ) -> Result<Vec<TaggedEntity>> {
        let state = self.state.lock().await;
        let mut matching: Vec<TaggedEntity> = state
            .entities(self.kind, tenant_id)
            .into_iter()
            .rev()
            .filter(|e| ids.contains(&e.id))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(matching.into_iter(), offset, limit))
    }

    async fn tag_ids_cooccurring_with_all(
        &self,
        tenant_id: Uuid,
        required: &[Uuid],
    ) -> Result<HashSet<Uuid>> {
        if required.is_empty() {
            return Ok(HashSet::new());
        }
        let state = self.state.lock().await;
        Ok(state
            .entities(self.kind, tenant_id)
            .into_iter()
            .filter(|e| required.iter().all(|r| e.tag_ids.contains(r)))
            .flat_map(|e| e.tag_ids)
            .collect())
    }

    async fn add_tag(&self, tenant_id: Uuid, entity_id: Uuid, tag_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.tag_exists(tenant_id, tag_id) {
            return Err(Error::TagNotFound(tag_id));
        }
        let tags = state.entity_tag_ids_mut(self.kind, tenant_id, entity_id)?;
        if !tags.contains(&tag_id) {
            tags.push(tag_id);
        }
        Ok(())
    }

    async fn remove_tag(&self, tenant_id: Uuid, entity_id: Uuid, tag_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        let tags = state.entity_tag_ids_mut(self.kind, tenant_id, entity_id)?;
        tags.retain(|t| *t != tag_id);
        Ok(())
    }

    async fn set_tags(&self, tenant_id: Uuid, entity_id: Uuid, tag_ids: &[Uuid]) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(missing) = tag_ids.iter().find(|t| !state.tag_exists(tenant_id, **t)) {
            return Err(Error::TagNotFound(*missing));
        }
        let mut seen = HashSet::new();
        let deduped: Vec<Uuid> = tag_ids.iter().copied().filter(|t| seen.insert(*t)).collect();
        *state.entity_tag_ids_mut(self.kind, tenant_id, entity_id)? = deduped;
        Ok(())
    }
}
