//! Task and subtask repository implementations.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use stratum_core::{
    CreateSubtaskRequest, CreateTaskRequest, Error, Result, Step, Subtask, SubtaskRepository,
    Task, TaskFilter, TaskPage, TaskRepository, TaskStatus, UpdateSubtaskRequest,
    UpdateTaskRequest,
};

use crate::query::{bind_params, TaskFilterQueryBuilder};

pub(crate) const TASK_COLUMNS: &str = "t.id, t.tenant_id, t.created_by, t.title, t.description, \
     t.status, t.due_date, t.recurrence_type, t.recurrence_config, t.completed_at, \
     t.recurrence_source_id, t.recurrence_source_completed_at, t.created_at, t.updated_at";

const SUBTASK_COLUMNS: &str =
    "id, task_id, title, description, status, completed_at, created_at, updated_at";

pub(crate) const STEP_COLUMNS: &str =
    "id, task_id, step_order, content_type, content, created_at, updated_at";

/// Parse a TEXT column holding an enum value.
fn parse_column<T: FromStr<Err = String>>(row: &PgRow, column: &str) -> Result<T> {
    row.get::<String, _>(column)
        .parse::<T>()
        .map_err(Error::Serialization)
}

pub(crate) fn task_from_row(row: &PgRow) -> Result<Task> {
    Ok(Task {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        created_by: row.get("created_by"),
        title: row.get("title"),
        description: row.get("description"),
        status: parse_column(row, "status")?,
        due_date: row.get("due_date"),
        recurrence_type: parse_column(row, "recurrence_type")?,
        recurrence_config: row.get("recurrence_config"),
        completed_at: row.get("completed_at"),
        recurrence_source_id: row.get("recurrence_source_id"),
        recurrence_source_completed_at: row.get("recurrence_source_completed_at"),
        user_assignees: Default::default(),
        role_assignees: Default::default(),
        subtasks: Vec::new(),
        steps: Vec::new(),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn subtask_from_row(row: &PgRow) -> Result<Subtask> {
    Ok(Subtask {
        id: row.get("id"),
        parent_task_id: row.get("task_id"),
        title: row.get("title"),
        description: row.get("description"),
        status: parse_column(row, "status")?,
        completed_at: row.get("completed_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

pub(crate) fn step_from_row(row: &PgRow) -> Result<Step> {
    Ok(Step {
        id: row.get("id"),
        task_id: row.get("task_id"),
        order: row.get("step_order"),
        content_type: parse_column(row, "content_type")?,
        content: row.get("content"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Load subtasks, steps and assignees for `tasks` with one query per child table.
pub(crate) async fn hydrate_tx(
    tx: &mut Transaction<'_, Postgres>,
    tasks: &mut [Task],
) -> Result<()> {
    if tasks.is_empty() {
        return Ok(());
    }
    let ids: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
    let index: HashMap<Uuid, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let rows = sqlx::query(&format!(
        "SELECT {} FROM subtask WHERE task_id = ANY($1) ORDER BY created_at, id",
        SUBTASK_COLUMNS
    ))
    .bind(&ids)
    .fetch_all(&mut **tx)
    .await
    .map_err(Error::Database)?;
    for row in &rows {
        let subtask = subtask_from_row(row)?;
        if let Some(&i) = index.get(&subtask.parent_task_id) {
            tasks[i].subtasks.push(subtask);
        }
    }

    let rows = sqlx::query(&format!(
        "SELECT {} FROM task_step WHERE task_id = ANY($1) ORDER BY task_id, step_order",
        STEP_COLUMNS
    ))
    .bind(&ids)
    .fetch_all(&mut **tx)
    .await
    .map_err(Error::Database)?;
    for row in &rows {
        let step = step_from_row(row)?;
        if let Some(&i) = index.get(&step.task_id) {
            tasks[i].steps.push(step);
        }
    }

    let rows = sqlx::query("SELECT task_id, user_id FROM task_user_assignee WHERE task_id = ANY($1)")
        .bind(&ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)?;
    for row in &rows {
        if let Some(&i) = index.get(&row.get::<Uuid, _>("task_id")) {
            tasks[i].user_assignees.insert(row.get("user_id"));
        }
    }

    let rows = sqlx::query("SELECT task_id, role_id FROM task_role_assignee WHERE task_id = ANY($1)")
        .bind(&ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(Error::Database)?;
    for row in &rows {
        if let Some(&i) = index.get(&row.get::<Uuid, _>("task_id")) {
            tasks[i].role_assignees.insert(row.get("role_id"));
        }
    }

    Ok(())
}

async fn replace_assignees_tx(tx: &mut Transaction<'_, Postgres>, task: &Task) -> Result<()> {
    sqlx::query("DELETE FROM task_user_assignee WHERE task_id = $1")
        .bind(task.id)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;
    sqlx::query("DELETE FROM task_role_assignee WHERE task_id = $1")
        .bind(task.id)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

    let users: Vec<Uuid> = task.user_assignees.iter().copied().collect();
    let roles: Vec<Uuid> = task.role_assignees.iter().copied().collect();
    sqlx::query(
        "INSERT INTO task_user_assignee (task_id, user_id) SELECT $1, UNNEST($2::uuid[])",
    )
    .bind(task.id)
    .bind(&users)
    .execute(&mut **tx)
    .await
    .map_err(Error::Database)?;
    sqlx::query(
        "INSERT INTO task_role_assignee (task_id, role_id) SELECT $1, UNNEST($2::uuid[])",
    )
    .bind(task.id)
    .bind(&roles)
    .execute(&mut **tx)
    .await
    .map_err(Error::Database)?;
    Ok(())
}

pub(crate) async fn insert_subtask_tx(
    tx: &mut Transaction<'_, Postgres>,
    subtask: &Subtask,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO subtask (id, task_id, title, description, status, completed_at, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(subtask.id)
    .bind(subtask.parent_task_id)
    .bind(&subtask.title)
    .bind(&subtask.description)
    .bind(subtask.status.to_string())
    .bind(subtask.completed_at)
    .bind(subtask.created_at)
    .bind(subtask.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(Error::Database)?;
    Ok(())
}

pub(crate) async fn insert_step_tx(tx: &mut Transaction<'_, Postgres>, step: &Step) -> Result<()> {
    sqlx::query(
        "INSERT INTO task_step (id, task_id, step_order, content_type, content, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(step.id)
    .bind(step.task_id)
    .bind(step.order)
    .bind(step.content_type.to_string())
    .bind(&step.content)
    .bind(step.created_at)
    .bind(step.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(Error::Database)?;
    Ok(())
}

/// Write a fully built task with its subtasks, steps and assignees.
pub(crate) async fn write_task_tx(tx: &mut Transaction<'_, Postgres>, task: &Task) -> Result<()> {
    sqlx::query(
        "INSERT INTO task (id, tenant_id, created_by, title, description, status, due_date,
                           recurrence_type, recurrence_config, completed_at, recurrence_source_id,
                           recurrence_source_completed_at, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
    )
    .bind(task.id)
    .bind(task.tenant_id)
    .bind(task.created_by)
    .bind(&task.title)
    .bind(&task.description)
    .bind(task.status.to_string())
    .bind(task.due_date)
    .bind(task.recurrence_type.to_string())
    .bind(&task.recurrence_config)
    .bind(task.completed_at)
    .bind(task.recurrence_source_id)
    .bind(task.recurrence_source_completed_at)
    .bind(task.created_at)
    .bind(task.updated_at)
    .execute(&mut **tx)
    .await
    .map_err(Error::Database)?;

    replace_assignees_tx(tx, task).await?;
    for subtask in &task.subtasks {
        insert_subtask_tx(tx, subtask).await?;
    }
    for step in &task.steps {
        insert_step_tx(tx, step).await?;
    }
    Ok(())
}

/// Lock a tenant's task row, failing with `TaskNotFound` when it is not visible.
pub(crate) async fn lock_task_tx(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
    task_id: Uuid,
) -> Result<()> {
    sqlx::query("SELECT id FROM task WHERE id = $1 AND tenant_id = $2 FOR UPDATE")
        .bind(task_id)
        .bind(tenant_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?
        .ok_or(Error::TaskNotFound(task_id))?;
    Ok(())
}

/// PostgreSQL implementation of TaskRepository.
pub struct PgTaskRepository {
    pool: Pool<Postgres>,
}

impl PgTaskRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn fetch_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        id: Uuid,
        for_update: bool,
    ) -> Result<Task> {
        let sql = format!(
            "SELECT {} FROM task t WHERE t.id = $1 AND t.tenant_id = $2{}",
            TASK_COLUMNS,
            if for_update { " FOR UPDATE" } else { "" }
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(Error::Database)?
            .ok_or(Error::TaskNotFound(id))?;

        let mut tasks = vec![task_from_row(&row)?];
        hydrate_tx(tx, &mut tasks).await?;
        tasks.pop().ok_or(Error::TaskNotFound(id))
    }

    pub async fn find_many_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        filter: &TaskFilter,
    ) -> Result<TaskPage> {
        let (offset, limit) = filter.page();
        let (clause, params) = TaskFilterQueryBuilder::new(filter, 1).build();

        let count_sql = format!(
            "SELECT COUNT(*) AS count FROM task t WHERE t.tenant_id = $1 AND {}",
            clause
        );
        let count_row = bind_params(sqlx::query(&count_sql).bind(tenant_id), &params)
            .fetch_one(&mut **tx)
            .await
            .map_err(Error::Database)?;
        let total: i64 = count_row.get("count");

        let n = params.len();
        let page_sql = format!(
            "SELECT {} FROM task t WHERE t.tenant_id = $1 AND {}
             ORDER BY t.created_at DESC, t.id DESC OFFSET ${} LIMIT ${}",
            TASK_COLUMNS,
            clause,
            n + 2,
            n + 3
        );
        let rows = bind_params(sqlx::query(&page_sql).bind(tenant_id), &params)
            .bind(offset)
            .bind(limit)
            .fetch_all(&mut **tx)
            .await
            .map_err(Error::Database)?;

        let mut tasks = rows.iter().map(task_from_row).collect::<Result<Vec<_>>>()?;
        hydrate_tx(tx, &mut tasks).await?;
        Ok(TaskPage { tasks, total })
    }

    /// Persist the scalar columns (and assignees) of an already loaded task.
    async fn save_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        task: &Task,
        assignees_changed: bool,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE task SET title = $2, description = $3, status = $4, due_date = $5,
                             recurrence_type = $6, recurrence_config = $7, completed_at = $8,
                             updated_at = $9
             WHERE id = $1",
        )
        .bind(task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.to_string())
        .bind(task.due_date)
        .bind(task.recurrence_type.to_string())
        .bind(&task.recurrence_config)
        .bind(task.completed_at)
        .bind(task.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

        if assignees_changed {
            replace_assignees_tx(tx, task).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for PgTaskRepository {
    async fn insert(
        &self,
        tenant_id: Uuid,
        created_by: Uuid,
        req: CreateTaskRequest,
    ) -> Result<Uuid> {
        let task = Task::new(tenant_id, created_by, req, Utc::now())?;

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        write_task_tx(&mut tx, &task).await?;
        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "tasks",
            op = "insert",
            tenant_id = %tenant_id,
            task_id = %task.id,
            subtask_count = task.subtasks.len(),
            step_count = task.steps.len(),
            "Task inserted"
        );
        Ok(task.id)
    }

    async fn fetch(&self, tenant_id: Uuid, id: Uuid) -> Result<Task> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let task = self.fetch_tx(&mut tx, tenant_id, id, false).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(task)
    }

    async fn find_many(&self, tenant_id: Uuid, filter: TaskFilter) -> Result<TaskPage> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let page = self.find_many_tx(&mut tx, tenant_id, &filter).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(page)
    }

    async fn update(&self, tenant_id: Uuid, id: Uuid, req: UpdateTaskRequest) -> Result<Task> {
        let assignees_changed = req.user_assignees.is_some() || req.role_assignees.is_some();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut task = self.fetch_tx(&mut tx, tenant_id, id, true).await?;
        task.apply_update(req, Utc::now())?;
        self.save_tx(&mut tx, &task, assignees_changed).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(task)
    }

    async fn update_status(&self, tenant_id: Uuid, id: Uuid, status: TaskStatus) -> Result<Task> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let mut task = self.fetch_tx(&mut tx, tenant_id, id, true).await?;
        task.set_status(status, Utc::now());
        self.save_tx(&mut tx, &task, false).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(task)
    }

    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM task WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::TaskNotFound(id));
        }
        Ok(())
    }
}

/// PostgreSQL implementation of SubtaskRepository.
pub struct PgSubtaskRepository {
    pool: Pool<Postgres>,
}

impl PgSubtaskRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubtaskRepository for PgSubtaskRepository {
    async fn add(
        &self,
        tenant_id: Uuid,
        task_id: Uuid,
        req: CreateSubtaskRequest,
    ) -> Result<Subtask> {
        let subtask = Subtask::new(task_id, &req, Utc::now())?;
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        lock_task_tx(&mut tx, tenant_id, task_id).await?;
        insert_subtask_tx(&mut tx, &subtask).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(subtask)
    }

    async fn update(
        &self,
        tenant_id: Uuid,
        task_id: Uuid,
        subtask_id: Uuid,
        req: UpdateSubtaskRequest,
    ) -> Result<Subtask> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        lock_task_tx(&mut tx, tenant_id, task_id).await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM subtask WHERE id = $1 AND task_id = $2 FOR UPDATE",
            SUBTASK_COLUMNS
        ))
        .bind(subtask_id)
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("subtask {}", subtask_id)))?;

        let mut subtask = subtask_from_row(&row)?;
        subtask.apply_update(req, Utc::now())?;

        sqlx::query(
            "UPDATE subtask SET title = $2, description = $3, status = $4, completed_at = $5,
                                updated_at = $6
             WHERE id = $1",
        )
        .bind(subtask.id)
        .bind(&subtask.title)
        .bind(&subtask.description)
        .bind(subtask.status.to_string())
        .bind(subtask.completed_at)
        .bind(subtask.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(subtask)
    }

    async fn delete(&self, tenant_id: Uuid, task_id: Uuid, subtask_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        lock_task_tx(&mut tx, tenant_id, task_id).await?;
        let result = sqlx::query("DELETE FROM subtask WHERE id = $1 AND task_id = $2")
            .bind(subtask_id)
            .bind(task_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("subtask {}", subtask_id)));
        }
        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }
}
