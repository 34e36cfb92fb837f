//! # SQL Index Store
//!
//! PostgreSQL implementation of [`IndexDataStore`] over the imaging metadata
//! schema:
//!
//! - `imaging_instances`: one row per stored instance
//!   (`watermark BIGINT PK`, `identifier`, `metadata JSONB`, `created_at`)
//! - `imaging_attributes`: searchable attribute registry
//!   (`attribute_id BIGSERIAL PK`, `path`, `value_type`, `status`,
//!   unique on `(path, value_type)`)
//! - `imaging_attribute_index`: derived index rows
//!   (`attribute_id`, `watermark`, `value`, PK on both ids)
//! - `imaging_attribute_operations`: per-run attribute progress rows
//!   (`attribute_id`, `operation_id`, `status`)
//! - `imaging_instance_fragments` / `imaging_frame_index`: stale derived
//!   rows and their migrated form, for the cleanup operation
//!
//! Queries are bound at runtime so the crate builds without a live
//! database. Every mutation is written to converge under re-execution:
//! upserts for index rows, `ON CONFLICT DO NOTHING` for progress rows,
//! `WHERE NOT EXISTS` read-checks for fragment migration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    AttributeDefinition, AttributeStatus, AttributeValueType, SearchableAttribute,
    WatermarkRange,
};
use crate::store::{IndexDataStore, StoreError, StoreResult, WatermarkFilter};

/// PostgreSQL-backed instance/attribute metadata store.
#[derive(Debug, Clone)]
pub struct SqlIndexStore {
    pool: PgPool,
}

impl SqlIndexStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn attribute_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<SearchableAttribute> {
        let value_type: String = row.try_get("value_type")?;
        let status: String = row.try_get("status")?;
        Ok(SearchableAttribute {
            attribute_id: row.try_get("attribute_id")?,
            path: row.try_get("path")?,
            value_type: value_type
                .parse::<AttributeValueType>()
                .map_err(StoreError::Contract)?,
            status: status
                .parse::<AttributeStatus>()
                .map_err(StoreError::Contract)?,
        })
    }
}

#[async_trait]
impl IndexDataStore for SqlIndexStore {
    async fn max_watermark(&self, filter: &WatermarkFilter) -> StoreResult<Option<i64>> {
        let max = match filter {
            WatermarkFilter::All => {
                sqlx::query_scalar::<_, Option<i64>>(
                    "SELECT MAX(watermark) FROM imaging_instances",
                )
                .fetch_one(&self.pool)
                .await?
            }
            WatermarkFilter::CreatedBefore(cutoff) => {
                sqlx::query_scalar::<_, Option<i64>>(
                    "SELECT MAX(watermark) FROM imaging_instances WHERE created_at < $1",
                )
                .bind(*cutoff)
                .fetch_one(&self.pool)
                .await?
            }
            WatermarkFilter::CreatedWithin { start, end } => {
                sqlx::query_scalar::<_, Option<i64>>(
                    "SELECT MAX(watermark) FROM imaging_instances \
                     WHERE created_at >= $1 AND created_at < $2",
                )
                .bind(*start)
                .bind(*end)
                .fetch_one(&self.pool)
                .await?
            }
        };
        Ok(max)
    }

    async fn watermark_bounds(
        &self,
        filter: &WatermarkFilter,
    ) -> StoreResult<Option<WatermarkRange>> {
        let row = match filter {
            WatermarkFilter::All => {
                sqlx::query("SELECT MIN(watermark) AS lo, MAX(watermark) AS hi FROM imaging_instances")
                    .fetch_one(&self.pool)
                    .await?
            }
            WatermarkFilter::CreatedBefore(cutoff) => {
                sqlx::query(
                    "SELECT MIN(watermark) AS lo, MAX(watermark) AS hi \
                     FROM imaging_instances WHERE created_at < $1",
                )
                .bind(*cutoff)
                .fetch_one(&self.pool)
                .await?
            }
            WatermarkFilter::CreatedWithin { start, end } => {
                sqlx::query(
                    "SELECT MIN(watermark) AS lo, MAX(watermark) AS hi \
                     FROM imaging_instances WHERE created_at >= $1 AND created_at < $2",
                )
                .bind(*start)
                .bind(*end)
                .fetch_one(&self.pool)
                .await?
            }
        };

        let lo: Option<i64> = row.try_get("lo")?;
        let hi: Option<i64> = row.try_get("hi")?;
        match (lo, hi) {
            (Some(lo), Some(hi)) => WatermarkRange::new(lo, hi)
                .map(Some)
                .map_err(|e| StoreError::Contract(e.to_string())),
            _ => Ok(None),
        }
    }

    async fn reindex_window(
        &self,
        range: WatermarkRange,
        attributes: &[SearchableAttribute],
    ) -> StoreResult<u64> {
        let mut touched = 0;
        for attribute in attributes {
            // Equal values are overwritten with themselves, which keeps the
            // statement idempotent without a separate read.
            let result = sqlx::query(
                "INSERT INTO imaging_attribute_index (attribute_id, watermark, value) \
                 SELECT $1, i.watermark, i.metadata ->> $2 \
                 FROM imaging_instances i \
                 WHERE i.watermark BETWEEN $3 AND $4 AND i.metadata ? $2 \
                 ON CONFLICT (attribute_id, watermark) \
                 DO UPDATE SET value = EXCLUDED.value",
            )
            .bind(attribute.attribute_id)
            .bind(attribute.path.as_str())
            .bind(range.start())
            .bind(range.end())
            .execute(&self.pool)
            .await?;
            touched += result.rows_affected();
        }
        Ok(touched)
    }

    async fn delete_attribute_index_window(
        &self,
        path: &str,
        value_type: AttributeValueType,
        range: WatermarkRange,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM imaging_attribute_index x \
             USING imaging_attributes a \
             WHERE x.attribute_id = a.attribute_id \
               AND a.path = $1 AND a.value_type = $2 \
               AND x.watermark BETWEEN $3 AND $4",
        )
        .bind(path)
        .bind(value_type.to_string())
        .bind(range.start())
        .bind(range.end())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn cleanup_window(
        &self,
        range: WatermarkRange,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;

        // Migrate first, with a read-check so a re-run of the same window
        // never duplicates frame rows.
        sqlx::query(
            "INSERT INTO imaging_frame_index (watermark, frame_offsets) \
             SELECT f.watermark, f.frame_offsets \
             FROM imaging_instance_fragments f \
             JOIN imaging_instances i ON i.watermark = f.watermark \
             WHERE f.watermark BETWEEN $1 AND $2 AND i.created_at < $3 \
               AND NOT EXISTS ( \
                   SELECT 1 FROM imaging_frame_index x WHERE x.watermark = f.watermark)",
        )
        .bind(range.start())
        .bind(range.end())
        .bind(stale_before)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query(
            "DELETE FROM imaging_instance_fragments f \
             USING imaging_instances i \
             WHERE i.watermark = f.watermark \
               AND f.watermark BETWEEN $1 AND $2 AND i.created_at < $3",
        )
        .bind(range.start())
        .bind(range.end())
        .bind(stale_before)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(deleted.rows_affected())
    }

    async fn register_attributes(
        &self,
        definitions: &[AttributeDefinition],
    ) -> StoreResult<Vec<SearchableAttribute>> {
        let mut attributes = Vec::with_capacity(definitions.len());
        for definition in definitions {
            // The no-op update makes RETURNING yield the existing row on
            // re-registration.
            let row = sqlx::query(
                "INSERT INTO imaging_attributes (path, value_type, status) \
                 VALUES ($1, $2, 'adding') \
                 ON CONFLICT (path, value_type) DO UPDATE SET path = EXCLUDED.path \
                 RETURNING attribute_id, path, value_type, status",
            )
            .bind(definition.path.as_str())
            .bind(definition.value_type.to_string())
            .fetch_one(&self.pool)
            .await?;
            attributes.push(Self::attribute_from_row(&row)?);
        }
        Ok(attributes)
    }

    async fn find_attribute(
        &self,
        path: &str,
        value_type: AttributeValueType,
    ) -> StoreResult<Option<SearchableAttribute>> {
        let row = sqlx::query(
            "SELECT attribute_id, path, value_type, status \
             FROM imaging_attributes WHERE path = $1 AND value_type = $2",
        )
        .bind(path)
        .bind(value_type.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::attribute_from_row).transpose()
    }

    async fn assign_reindex_operation(
        &self,
        operation_id: Uuid,
        attribute_ids: &[i64],
    ) -> StoreResult<()> {
        for attribute_id in attribute_ids {
            sqlx::query(
                "INSERT INTO imaging_attribute_operations (attribute_id, operation_id, status) \
                 VALUES ($1, $2, 'processing') \
                 ON CONFLICT (attribute_id, operation_id) DO NOTHING",
            )
            .bind(*attribute_id)
            .bind(operation_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn attributes_processing(
        &self,
        operation_id: Uuid,
    ) -> StoreResult<Vec<SearchableAttribute>> {
        let rows = sqlx::query(
            "SELECT a.attribute_id, a.path, a.value_type, a.status \
             FROM imaging_attributes a \
             JOIN imaging_attribute_operations o ON o.attribute_id = a.attribute_id \
             WHERE o.operation_id = $1 AND o.status = 'processing' \
             ORDER BY a.attribute_id",
        )
        .bind(operation_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::attribute_from_row).collect()
    }

    async fn complete_reindex(&self, operation_id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE imaging_attributes a SET status = 'ready' \
             FROM imaging_attribute_operations o \
             WHERE o.attribute_id = a.attribute_id \
               AND o.operation_id = $1 AND o.status = 'processing' \
               AND a.status = 'adding'",
        )
        .bind(operation_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE imaging_attribute_operations SET status = 'completed' \
             WHERE operation_id = $1 AND status = 'processing'",
        )
        .bind(operation_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn mark_attribute_deleting(
        &self,
        path: &str,
        value_type: AttributeValueType,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE imaging_attributes SET status = 'deleting' \
             WHERE path = $1 AND value_type = $2",
        )
        .bind(path)
        .bind(value_type.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_attribute(
        &self,
        path: &str,
        value_type: AttributeValueType,
    ) -> StoreResult<()> {
        // Progress rows cascade with the attribute row.
        sqlx::query("DELETE FROM imaging_attributes WHERE path = $1 AND value_type = $2")
            .bind(path)
            .bind(value_type.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
