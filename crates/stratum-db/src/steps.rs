//! Step repository implementation.
//!
//! Step orders are kept dense per task. Every mutation locks the parent task
//! row first so concurrent inserts and deletes on the same task serialize; the
//! `(task_id, step_order)` uniqueness constraint is deferred to commit, which
//! lets the bulk shifts pass through transient duplicates.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use stratum_core::{
    step_insert_position, CreateStepRequest, Error, Result, Step, StepRepository,
    UpdateStepRequest,
};

use crate::tasks::{insert_step_tx, lock_task_tx, step_from_row, STEP_COLUMNS};

/// PostgreSQL implementation of StepRepository.
pub struct PgStepRepository {
    pool: Pool<Postgres>,
}

impl PgStepRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StepRepository for PgStepRepository {
    async fn add(&self, tenant_id: Uuid, task_id: Uuid, req: CreateStepRequest) -> Result<Step> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        lock_task_tx(&mut tx, tenant_id, task_id).await?;

        let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM task_step WHERE task_id = $1")
            .bind(task_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::Database)?
            .get("count");
        let order = step_insert_position(req.order, count as usize)?;

        sqlx::query(
            "UPDATE task_step SET step_order = step_order + 1
             WHERE task_id = $1 AND step_order >= $2",
        )
        .bind(task_id)
        .bind(order)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let now = Utc::now();
        let step = Step {
            id: Uuid::now_v7(),
            task_id,
            order,
            content_type: req.content_type,
            content: req.content,
            created_at: now,
            updated_at: now,
        };
        insert_step_tx(&mut tx, &step).await?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(step)
    }

    async fn update(
        &self,
        tenant_id: Uuid,
        task_id: Uuid,
        step_id: Uuid,
        req: UpdateStepRequest,
    ) -> Result<Step> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        lock_task_tx(&mut tx, tenant_id, task_id).await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM task_step WHERE id = $1 AND task_id = $2",
            STEP_COLUMNS
        ))
        .bind(step_id)
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("step {}", step_id)))?;

        let mut step = step_from_row(&row)?;
        step.apply_update(req, Utc::now());

        sqlx::query(
            "UPDATE task_step SET content_type = $2, content = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(step.id)
        .bind(step.content_type.to_string())
        .bind(&step.content)
        .bind(step.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(step)
    }

    async fn delete(&self, tenant_id: Uuid, task_id: Uuid, step_id: Uuid) -> Result<Step> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        lock_task_tx(&mut tx, tenant_id, task_id).await?;

        let row = sqlx::query(&format!(
            "DELETE FROM task_step WHERE id = $1 AND task_id = $2 RETURNING {}",
            STEP_COLUMNS
        ))
        .bind(step_id)
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("step {}", step_id)))?;
        let removed = step_from_row(&row)?;

        sqlx::query(
            "UPDATE task_step SET step_order = step_order - 1
             WHERE task_id = $1 AND step_order > $2",
        )
        .bind(task_id)
        .bind(removed.order)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(removed)
    }

    async fn list_for_task(&self, tenant_id: Uuid, task_id: Uuid) -> Result<Vec<Step>> {
        let rows = sqlx::query(&format!(
            "SELECT s.{} FROM task_step s
             JOIN task t ON t.id = s.task_id
             WHERE s.task_id = $1 AND t.tenant_id = $2
             ORDER BY s.step_order",
            STEP_COLUMNS.replace(", ", ", s.")
        ))
        .bind(task_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        if rows.is_empty() {
            // Distinguish "no steps" from "no such task".
            let exists = sqlx::query("SELECT 1 FROM task WHERE id = $1 AND tenant_id = $2")
                .bind(task_id)
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Database)?;
            if exists.is_none() {
                return Err(Error::TaskNotFound(task_id));
            }
        }

        rows.iter().map(step_from_row).collect()
    }

    async fn count_with_content(&self, tenant_id: Uuid, content: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM task_step s
             JOIN task t ON t.id = s.task_id
             WHERE t.tenant_id = $1 AND s.content = $2",
        )
        .bind(tenant_id)
        .bind(content)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.get("count"))
    }
}
