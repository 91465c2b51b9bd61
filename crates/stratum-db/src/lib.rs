//! # stratum-db
//!
//! Storage adapters for stratum.
//!
//! This crate provides:
//! - Connection pool management
//! - PostgreSQL repositories for tasks, subtasks, steps, tags, files and events
//! - The transactional recurrence scan with its advisory-lock lease
//! - An in-memory store implementing the same traits, for tests and embedding
//! - Filesystem object storage for step media
//!
//! ## Example
//!
//! ```rust,ignore
//! use stratum_db::{Database, TaskRepository, CreateTaskRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/stratum").await?;
//!
//!     let task_id = db.tasks.insert(tenant_id, user_id, CreateTaskRequest {
//!         title: "Water the plants".to_string(),
//!         ..Default::default()
//!     }).await?;
//!
//!     println!("Created task: {}", task_id);
//!     Ok(())
//! }
//! ```
pub mod entities;
pub mod media;
pub mod memory;
pub mod object_storage;
pub mod pool;
pub mod query;
pub mod recurrence;
pub mod steps;
pub mod tags;
pub mod tasks;

// Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

use std::sync::Arc;

// Re-export core types
pub use stratum_core::*;

/// Escape LIKE/ILIKE wildcard characters (`%`, `_`, `\`) in user input.
pub fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

pub use entities::{
    EntityTable, EventTable, FileTable, PgEntityRepository, PgEventRepository, PgFileRepository,
};
pub use memory::{MemoryEntityStore, MemoryRecurrenceScan, MemoryStore};
pub use object_storage::{validate_object_key, FilesystemObjectStore};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig, PoolStatus};
pub use query::{QueryParam, TagLookupQueryBuilder, TaskFilterQueryBuilder};
pub use recurrence::{PgRecurrenceScan, PgRecurrenceStore};
pub use steps::PgStepRepository;
pub use tags::PgTagRepository;
pub use tasks::{PgSubtaskRepository, PgTaskRepository};

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Task repository.
    pub tasks: PgTaskRepository,
    pub subtasks: PgSubtaskRepository,
    /// Step repository. Orders stay dense on every mutation.
    pub steps: PgStepRepository,
    /// Lease-guarded recurrence scans.
    pub recurrence: PgRecurrenceStore,
    pub tags: PgTagRepository,
    /// Tagged file records.
    pub files: PgFileRepository,
    /// Tagged event records.
    pub events: PgEventRepository,
    /// Object storage for media steps. Use `with_object_store` to configure.
    pub objects: Option<Arc<dyn ObjectStore>>,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            tasks: PgTaskRepository::new(pool.clone()),
            subtasks: PgSubtaskRepository::new(pool.clone()),
            steps: PgStepRepository::new(pool.clone()),
            recurrence: PgRecurrenceStore::new(pool.clone()),
            tags: PgTagRepository::new(pool.clone()),
            files: PgFileRepository::new(pool.clone()),
            events: PgEventRepository::new(pool.clone()),
            objects: None,
            pool,
        }
    }

    /// Attach an object store for media steps.
    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(store);
        self
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }

    /// Upload media and add a step referencing it.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_media_step(
        &self,
        tenant_id: uuid::Uuid,
        task_id: uuid::Uuid,
        content_type: StepContentType,
        order: Option<i32>,
        file_name: &str,
        data: &[u8],
    ) -> Result<Step> {
        let objects = self
            .objects
            .as_deref()
            .ok_or_else(|| Error::Config("object storage is not configured".to_string()))?;
        media::add_media_step(
            &self.steps,
            objects,
            tenant_id,
            task_id,
            content_type,
            order,
            file_name,
            data,
        )
        .await
    }

    /// Delete a step, removing its media object when it has one.
    pub async fn delete_step(
        &self,
        tenant_id: uuid::Uuid,
        task_id: uuid::Uuid,
        step_id: uuid::Uuid,
    ) -> Result<Step> {
        media::delete_step(
            &self.steps,
            self.objects.as_deref(),
            tenant_id,
            task_id,
            step_id,
        )
        .await
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        let mut db = Self::new(self.pool.clone());
        db.objects = self.objects.clone();
        db
    }
}
