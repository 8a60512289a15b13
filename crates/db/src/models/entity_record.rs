use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use thiserror::Error;
use utils::ids::format_timestamp;

use super::entity::{Entity, EntityId, Fields, ListQuery, merge_fields};

const RECORD_COLUMNS: &str = "collection, id, fields, revision, created_at, updated_at";

#[derive(Debug, Error)]
pub enum EntityRecordError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid fields json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("entity {0} not found")]
    NotFound(String),
    #[error("entity {0} already exists")]
    AlreadyExists(String),
}

/// One row of the `entities` table.
#[derive(Debug, Clone, FromRow)]
pub struct EntityRecord {
    pub collection: String,
    pub id: String,
    pub fields: String, // JSON-serialized Fields
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntityRecord {
    pub fn into_entity(self) -> Result<Entity, serde_json::Error> {
        let fields: Fields = serde_json::from_str(&self.fields)?;
        Ok(Entity::new(EntityId::new(self.id), fields).with_marker(self.updated_at, self.revision))
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        collection: &str,
        id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, EntityRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM entities WHERE collection = $1 AND id = $2"
        ))
        .bind(collection)
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// List a collection, oldest first unless the query orders by a field.
    pub async fn find_all(
        pool: &SqlitePool,
        collection: &str,
        query: &ListQuery,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {RECORD_COLUMNS} FROM entities WHERE collection = "
        ));
        builder.push_bind(collection.to_string());

        if let Some(filter) = &query.filter {
            builder.push(" AND json_extract(fields, ");
            builder.push_bind(json_path(&filter.field));
            builder.push(")");
            match &filter.value {
                Value::Null => {
                    builder.push(" IS NULL");
                }
                // json_extract yields 1/0 for JSON booleans
                Value::Bool(flag) => {
                    builder.push(" = ").push_bind(i64::from(*flag));
                }
                Value::Number(number) => match number.as_i64() {
                    Some(int) => {
                        builder.push(" = ").push_bind(int);
                    }
                    None => {
                        builder
                            .push(" = ")
                            .push_bind(number.as_f64().unwrap_or_default());
                    }
                },
                Value::String(text) => {
                    builder.push(" = ").push_bind(text.clone());
                }
                other => {
                    builder.push(" = json(").push_bind(other.to_string()).push(")");
                }
            }
        }

        match &query.order {
            Some(order) => {
                builder.push(" ORDER BY json_extract(fields, ");
                builder.push_bind(json_path(&order.field));
                builder.push(if order.descending { ") DESC" } else { ") ASC" });
                builder.push(", created_at ASC, id ASC");
            }
            None => {
                builder.push(" ORDER BY created_at ASC, id ASC");
            }
        }

        builder.build_query_as::<EntityRecord>().fetch_all(pool).await
    }

    pub async fn create(
        pool: &SqlitePool,
        collection: &str,
        id: &str,
        fields: &Fields,
    ) -> Result<Self, EntityRecordError> {
        let now = format_timestamp(Utc::now());
        let body = serde_json::to_string(fields)?;
        sqlx::query_as::<_, EntityRecord>(&format!(
            "INSERT INTO entities (collection, id, fields, revision, created_at, updated_at)
             VALUES ($1, $2, $3, 1, $4, $4)
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(collection)
        .bind(id)
        .bind(body)
        .bind(now)
        .fetch_one(pool)
        .await
        .map_err(|e| {
            let duplicate = e
                .as_database_error()
                .is_some_and(|db_err| db_err.is_unique_violation());
            if duplicate {
                EntityRecordError::AlreadyExists(id.to_string())
            } else {
                EntityRecordError::Database(e)
            }
        })
    }

    /// Merge `fields` into the stored entity, bumping its revision.
    pub async fn update(
        pool: &SqlitePool,
        collection: &str,
        id: &str,
        fields: &Fields,
    ) -> Result<Self, EntityRecordError> {
        let mut tx = pool.begin().await?;

        let existing = sqlx::query_as::<_, EntityRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM entities WHERE collection = $1 AND id = $2"
        ))
        .bind(collection)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EntityRecordError::NotFound(id.to_string()))?;

        let mut merged: Fields = serde_json::from_str(&existing.fields)?;
        merge_fields(&mut merged, fields);

        let record = sqlx::query_as::<_, EntityRecord>(&format!(
            "UPDATE entities
             SET fields = $3, revision = revision + 1, updated_at = $4
             WHERE collection = $1 AND id = $2
             RETURNING {RECORD_COLUMNS}"
        ))
        .bind(collection)
        .bind(id)
        .bind(serde_json::to_string(&merged)?)
        .bind(format_timestamp(Utc::now()))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    pub async fn delete(pool: &SqlitePool, collection: &str, id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM entities WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(pool: &SqlitePool, collection: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM entities WHERE collection = $1")
            .bind(collection)
            .fetch_one(pool)
            .await
    }
}

fn json_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('"', ""))
}
