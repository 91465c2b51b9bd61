//! PostgreSQL recurrence store.
//!
//! A scan is one transaction holding a transaction-scoped advisory lock on
//! [`RECURRENCE_SCAN_LOCK_KEY`]. The lock is released on commit or rollback,
//! including when the connection drops mid-scan.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::debug;

use stratum_core::defaults::RECURRENCE_SCAN_LOCK_KEY;
use stratum_core::{Error, RecurrenceScan, RecurrenceStore, Result, Task};

use crate::tasks::{hydrate_tx, task_from_row, write_task_tx, TASK_COLUMNS};

/// PostgreSQL implementation of RecurrenceStore.
pub struct PgRecurrenceStore {
    pool: Pool<Postgres>,
}

impl PgRecurrenceStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecurrenceStore for PgRecurrenceStore {
    async fn begin_scan(&self) -> Result<Option<Box<dyn RecurrenceScan>>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let acquired: bool = sqlx::query("SELECT pg_try_advisory_xact_lock($1) AS acquired")
            .bind(RECURRENCE_SCAN_LOCK_KEY)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::Database)?
            .get("acquired");

        if !acquired {
            tx.rollback().await.map_err(Error::Database)?;
            debug!(
                subsystem = "db",
                component = "recurrence",
                op = "begin_scan",
                "Recurrence scan lease held elsewhere"
            );
            return Ok(None);
        }

        Ok(Some(Box::new(PgRecurrenceScan { tx })))
    }
}

/// An open recurrence scan. Dropping it without commit rolls back.
pub struct PgRecurrenceScan {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RecurrenceScan for PgRecurrenceScan {
    async fn recurring_tasks(&mut self) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM task t
             WHERE t.recurrence_type <> 'none'
               AND NOT EXISTS (SELECT 1 FROM task s
                               WHERE s.recurrence_source_id = t.id
                                 AND s.recurrence_source_completed_at = t.completed_at)
             ORDER BY t.created_at, t.id",
            TASK_COLUMNS
        ))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(Error::Database)?;

        let mut tasks = rows.iter().map(task_from_row).collect::<Result<Vec<_>>>()?;
        hydrate_tx(&mut self.tx, &mut tasks).await?;
        Ok(tasks)
    }

    async fn insert_instance(&mut self, task: &Task) -> Result<()> {
        write_task_tx(&mut self.tx, task).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.map_err(Error::Database)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.map_err(Error::Database)
    }
}
