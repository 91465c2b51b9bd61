//! Tag repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use stratum_core::{
    normalize_tag_name, normalize_tag_type, Error, Result, Tag, TagLookup, TagRepository,
};

use crate::query::{bind_params, TagLookupQueryBuilder};

const TAG_COLUMNS: &str = "t.id, t.tenant_id, t.name, t.tag_type, t.created_at";

fn tag_from_row(row: &PgRow) -> Tag {
    Tag {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        name: row.get("name"),
        tag_type: row.get("tag_type"),
        created_at: row.get("created_at"),
    }
}

/// PostgreSQL implementation of TagRepository.
pub struct PgTagRepository {
    pool: Pool<Postgres>,
}

impl PgTagRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TagRepository for PgTagRepository {
    async fn find_many(
        &self,
        tenant_id: Uuid,
        lookup: &TagLookup,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Tag>> {
        let (clause, params) = TagLookupQueryBuilder::new(lookup, 1).build();
        let n = params.len();
        let sql = format!(
            "SELECT {} FROM tag t WHERE t.tenant_id = $1 AND {}
             ORDER BY t.created_at, t.id OFFSET ${} LIMIT ${}",
            TAG_COLUMNS,
            clause,
            n + 2,
            n + 3
        );

        let rows = bind_params(sqlx::query(&sql).bind(tenant_id), &params)
            .bind(offset.max(0))
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(rows.iter().map(tag_from_row).collect())
    }

    async fn get_or_create(&self, tenant_id: Uuid, tag_type: &str, name: &str) -> Result<Tag> {
        let name = normalize_tag_name(name)?;
        let tag_type = normalize_tag_type(tag_type);

        // The no-op update makes RETURNING yield the existing row on conflict.
        let row = sqlx::query(
            "INSERT INTO tag AS t (id, tenant_id, name, tag_type, created_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (tenant_id, tag_type, name) DO UPDATE SET name = EXCLUDED.name
             RETURNING t.id, t.tenant_id, t.name, t.tag_type, t.created_at",
        )
        .bind(Uuid::now_v7())
        .bind(tenant_id)
        .bind(&name)
        .bind(&tag_type)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(tag_from_row(&row))
    }

    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> Result<()> {
        // Join rows go with the tag through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM tag WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(Error::TagNotFound(id));
        }
        Ok(())
    }
}
