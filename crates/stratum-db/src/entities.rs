//! File and event repositories (relational variant).
//!
//! Tag membership lives in a join table per entity kind, so tag→entity and
//! entity→tag lookups are both index scans. Single-element membership changes
//! are one statement each and need no read-modify-write.

use std::collections::HashSet;
use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row, Transaction};
use uuid::Uuid;

use stratum_core::{
    CreateEventRequest, CreateFileRequest, EntityKind, Error, EventRecord, FileRecord, Result,
    TaggedEntity, TaggedEntityRepository,
};

/// Table layout of one taggable entity kind.
pub trait EntityTable: Send + Sync + 'static {
    const KIND: EntityKind;
    const TABLE: &'static str;
    const JOIN_TABLE: &'static str;
    const FOREIGN_KEY: &'static str;
    const LABEL_COLUMN: &'static str;
}

pub struct FileTable;

impl EntityTable for FileTable {
    const KIND: EntityKind = EntityKind::File;
    const TABLE: &'static str = "file_record";
    const JOIN_TABLE: &'static str = "file_tag";
    const FOREIGN_KEY: &'static str = "file_id";
    const LABEL_COLUMN: &'static str = "file_name";
}

pub struct EventTable;

impl EntityTable for EventTable {
    const KIND: EntityKind = EntityKind::Event;
    const TABLE: &'static str = "event_record";
    const JOIN_TABLE: &'static str = "event_tag";
    const FOREIGN_KEY: &'static str = "event_id";
    const LABEL_COLUMN: &'static str = "event_name";
}

/// PostgreSQL tagged-entity repository for one entity kind.
pub struct PgEntityRepository<T: EntityTable> {
    pool: Pool<Postgres>,
    _table: PhantomData<T>,
}

pub type PgFileRepository = PgEntityRepository<FileTable>;
pub type PgEventRepository = PgEntityRepository<EventTable>;

impl<T: EntityTable> PgEntityRepository<T> {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            _table: PhantomData,
        }
    }

    fn not_found(id: Uuid) -> Error {
        Error::NotFound(format!("{} {}", T::KIND, id))
    }

    async fn ensure_entity_tx(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<()> {
        sqlx::query(&format!(
            "SELECT id FROM {} WHERE id = $1 AND tenant_id = $2 FOR UPDATE",
            T::TABLE
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Self::not_found(id))?;
        Ok(())
    }

    async fn ensure_tags_tx(
        tx: &mut Transaction<'_, Postgres>,
        tenant_id: Uuid,
        tag_ids: &[Uuid],
    ) -> Result<()> {
        let rows = sqlx::query("SELECT id FROM tag WHERE tenant_id = $1 AND id = ANY($2)")
            .bind(tenant_id)
            .bind(tag_ids)
            .fetch_all(&mut **tx)
            .await
            .map_err(Error::Database)?;
        let found: HashSet<Uuid> = rows.iter().map(|r| r.get("id")).collect();
        match tag_ids.iter().find(|id| !found.contains(id)) {
            Some(missing) => Err(Error::TagNotFound(*missing)),
            None => Ok(()),
        }
    }

    fn entity_from_row(row: &PgRow) -> TaggedEntity {
        TaggedEntity {
            id: row.get("id"),
            kind: T::KIND,
            tenant_id: row.get("tenant_id"),
            label: row.get("label"),
            created_at: row.get("created_at"),
            tag_ids: row.get("tag_ids"),
        }
    }
}

impl PgEntityRepository<FileTable> {
    /// Register an uploaded file.
    pub async fn create(&self, tenant_id: Uuid, req: CreateFileRequest) -> Result<FileRecord> {
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
        sqlx::query(
            "INSERT INTO file_record (id, tenant_id, file_name, object_key, thumbnail_key, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(file.id)
        .bind(file.tenant_id)
        .bind(&file.file_name)
        .bind(&file.object_key)
        .bind(&file.thumbnail_key)
        .bind(file.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(file)
    }
}

impl PgEntityRepository<EventTable> {
    pub async fn create(&self, tenant_id: Uuid, req: CreateEventRequest) -> Result<EventRecord> {
        let event = EventRecord {
            id: Uuid::now_v7(),
            tenant_id,
            event_name: stratum_core::normalize_title(&req.event_name)?,
            description: req.description,
            event_date: req.event_date,
            location: req.location,
            status: req.status.unwrap_or_else(|| "planned".to_string()),
            created_at: Utc::now(),
            tag_ids: Vec::new(),
        };
        sqlx::query(
            "INSERT INTO event_record (id, tenant_id, event_name, description, event_date, location, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(event.id)
        .bind(event.tenant_id)
        .bind(&event.event_name)
        .bind(&event.description)
        .bind(event.event_date)
        .bind(&event.location)
        .bind(&event.status)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(event)
    }
}

#[async_trait]
impl<T: EntityTable> TaggedEntityRepository for PgEntityRepository<T> {
    fn kind(&self) -> EntityKind {
        T::KIND
    }

    async fn ids_with_any_tag(&self, tenant_id: Uuid, tag_ids: &[Uuid]) -> Result<HashSet<Uuid>> {
        if tag_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT DISTINCT e.id FROM {table} e
             JOIN {join} j ON j.{fk} = e.id
             WHERE e.tenant_id = $1 AND j.tag_id = ANY($2)",
            table = T::TABLE,
            join = T::JOIN_TABLE,
            fk = T::FOREIGN_KEY
        ))
        .bind(tenant_id)
        .bind(tag_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    async fn fetch_page(
        &self,
        tenant_id: Uuid,
        ids: &[Uuid],
        offset: i64,
        limit: i64,
    ) -> Result<Vec<TaggedEntity>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT e.id, e.tenant_id, e.{label} AS label, e.created_at,
                    COALESCE(ARRAY_AGG(j.tag_id ORDER BY j.position)
                             FILTER (WHERE j.tag_id IS NOT NULL), '{{}}') AS tag_ids
             FROM {table} e
             LEFT JOIN {join} j ON j.{fk} = e.id
             WHERE e.tenant_id = $1 AND e.id = ANY($2)
             GROUP BY e.id
             ORDER BY e.created_at DESC, e.id DESC
             OFFSET $3 LIMIT $4",
            label = T::LABEL_COLUMN,
            table = T::TABLE,
            join = T::JOIN_TABLE,
            fk = T::FOREIGN_KEY
        ))
        .bind(tenant_id)
        .bind(ids)
        .bind(offset.max(0))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::entity_from_row).collect())
    }

    async fn tag_ids_cooccurring_with_all(
        &self,
        tenant_id: Uuid,
        required: &[Uuid],
    ) -> Result<HashSet<Uuid>> {
        if required.is_empty() {
            return Ok(HashSet::new());
        }
        let required: Vec<Uuid> = required
            .iter()
            .copied()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let rows = sqlx::query(&format!(
            "SELECT DISTINCT j.tag_id FROM {join} j
             JOIN {table} e ON e.id = j.{fk}
             WHERE e.tenant_id = $1
               AND j.{fk} IN (
                   SELECT r.{fk} FROM {join} r
                   WHERE r.tag_id = ANY($2)
                   GROUP BY r.{fk}
                   HAVING COUNT(DISTINCT r.tag_id) = $3
               )",
            table = T::TABLE,
            join = T::JOIN_TABLE,
            fk = T::FOREIGN_KEY
        ))
        .bind(tenant_id)
        .bind(&required)
        .bind(required.len() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(|r| r.get("tag_id")).collect())
    }

    async fn add_tag(&self, tenant_id: Uuid, entity_id: Uuid, tag_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        Self::ensure_entity_tx(&mut tx, tenant_id, entity_id).await?;
        Self::ensure_tags_tx(&mut tx, tenant_id, &[tag_id]).await?;
        sqlx::query(&format!(
            "INSERT INTO {join} ({fk}, tag_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            join = T::JOIN_TABLE,
            fk = T::FOREIGN_KEY
        ))
        .bind(entity_id)
        .bind(tag_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn remove_tag(&self, tenant_id: Uuid, entity_id: Uuid, tag_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        Self::ensure_entity_tx(&mut tx, tenant_id, entity_id).await?;
        sqlx::query(&format!(
            "DELETE FROM {join} WHERE {fk} = $1 AND tag_id = $2",
            join = T::JOIN_TABLE,
            fk = T::FOREIGN_KEY
        ))
        .bind(entity_id)
        .bind(tag_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn set_tags(&self, tenant_id: Uuid, entity_id: Uuid, tag_ids: &[Uuid]) -> Result<()> {
        let mut seen = HashSet::new();
        let deduped: Vec<Uuid> = tag_ids.iter().copied().filter(|t| seen.insert(*t)).collect();

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        Self::ensure_entity_tx(&mut tx, tenant_id, entity_id).await?;
        Self::ensure_tags_tx(&mut tx, tenant_id, &deduped).await?;

        sqlx::query(&format!(
            "DELETE FROM {join} WHERE {fk} = $1",
            join = T::JOIN_TABLE,
            fk = T::FOREIGN_KEY
        ))
        .bind(entity_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        sqlx::query(&format!(
            "INSERT INTO {join} ({fk}, tag_id)
             SELECT $1, u.tag_id FROM UNNEST($2::uuid[]) WITH ORDINALITY AS u(tag_id, ord)
             ORDER BY u.ord",
            join = T::JOIN_TABLE,
            fk = T::FOREIGN_KEY
        ))
        .bind(entity_id)
        .bind(&deduped)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }
}
