//! File object rows: the pipeline's unit of work.
//!
//! Objects are never deleted and their `processed` / `generated_embeddings` /
//! `error` flags only ever move from false to true. The three background
//! workers partition objects by those flags, so the update statements here
//! deliberately never reset one.

use super::{Store, parse_timestamp, parse_uuid};
use crate::error::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A discovered, indexed file and its processing state.
#[derive(Debug, Clone)]
pub struct FileObject {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub object_type: String,
    pub path: String,
    pub name: String,
    /// Stable identity derived from the physical file (device + inode on
    /// Unix), unique across objects and ignored files.
    pub file_id: String,
    pub file_created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
    pub processed: bool,
    pub generated_embeddings: bool,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub error: bool,
    pub error_detail: Option<String>,
}

/// Fields the scanner supplies when materializing a new object.
#[derive(Debug, Clone)]
pub struct NewFileObject {
    pub object_type: String,
    pub path: String,
    pub name: String,
    pub file_id: String,
    pub file_created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

const OBJECT_COLUMNS: &str = "id, created_at, object_type, path, name, file_id, file_created_at, \
     metadata, processed, generated_embeddings, last_processed_at, error, error_detail";

pub(crate) type ObjectRow = (
    String,         // id
    String,         // created_at
    String,         // object_type
    String,         // path
    String,         // name
    String,         // file_id
    String,         // file_created_at
    Option<String>, // metadata
    bool,           // processed
    bool,           // generated_embeddings
    Option<String>, // last_processed_at
    bool,           // error
    Option<String>, // error_detail
);

pub(crate) fn object_from_row(row: ObjectRow) -> Result<FileObject> {
    let (
        id,
        created_at,
        object_type,
        path,
        name,
        file_id,
        file_created_at,
        metadata,
        processed,
        generated_embeddings,
        last_processed_at,
        error,
        error_detail,
    ) = row;

    let metadata = match metadata {
        Some(raw) => serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null),
        None => serde_json::Value::Null,
    };

    Ok(FileObject {
        id: parse_uuid(&id)?,
        created_at: parse_timestamp(&created_at)?,
        object_type,
        path,
        name,
        file_id,
        file_created_at: parse_timestamp(&file_created_at)?,
        metadata,
        processed,
        generated_embeddings,
        last_processed_at: last_processed_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()?,
        error,
        error_detail,
    })
}

impl Store {
    /// Insert a new file object with all pipeline flags cleared.
    pub async fn insert_object(&self, new: NewFileObject) -> Result<FileObject> {
        let object = FileObject {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            object_type: new.object_type,
            path: new.path,
            name: new.name,
            file_id: new.file_id,
            file_created_at: new.file_created_at,
            metadata: new.metadata,
            processed: false,
            generated_embeddings: false,
            last_processed_at: None,
            error: false,
            error_detail: None,
        };

        sqlx::query(
            "INSERT INTO objects (id, created_at, object_type, path, name, file_id, \
             file_created_at, metadata, processed, generated_embeddings, error) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, 0, 0)",
        )
        .bind(object.id.to_string())
        .bind(object.created_at.to_rfc3339())
        .bind(&object.object_type)
        .bind(&object.path)
        .bind(&object.name)
        .bind(&object.file_id)
        .bind(object.file_created_at.to_rfc3339())
        .bind(object.metadata.to_string())
        .execute(self.pool())
        .await?;

        Ok(object)
    }

    pub async fn get_object(&self, id: Uuid) -> Result<Option<FileObject>> {
        let row: Option<ObjectRow> = sqlx::query_as(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE id = ?1"
        ))
        .bind(id.to_string())
        .fetch_optional(self.pool())
        .await?;

        row.map(object_from_row).transpose()
    }

    pub async fn object_exists_by_file_id(&self, file_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM objects WHERE file_id = ?1")
            .bind(file_id)
            .fetch_one(self.pool())
            .await?;
        Ok(count > 0)
    }

    pub async fn count_objects(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM objects")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    /// One object awaiting analysis, picked uniformly at random:
    /// `processed = false AND error = false AND generated_embeddings = false`.
    pub async fn random_unprocessed_object(&self) -> Result<Option<FileObject>> {
        self.random_object_where("processed = 0 AND error = 0 AND generated_embeddings = 0")
            .await
    }

    /// One analyzed object awaiting embedding, picked uniformly at random:
    /// `generated_embeddings = false AND error = false AND processed = true`.
    pub async fn random_embeddable_object(&self) -> Result<Option<FileObject>> {
        self.random_object_where("generated_embeddings = 0 AND error = 0 AND processed = 1")
            .await
    }

    async fn random_object_where(&self, predicate: &str) -> Result<Option<FileObject>> {
        let row: Option<ObjectRow> = sqlx::query_as(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE {predicate} ORDER BY RANDOM() LIMIT 1"
        ))
        .fetch_optional(self.pool())
        .await?;

        row.map(object_from_row).transpose()
    }

    /// Mark an object as processed and stamp the processing time.
    pub async fn mark_processed(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE objects SET processed = 1, last_processed_at = ?2 WHERE id = ?1")
            .bind(id.to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Mark an object as failed, keeping the failure detail.
    pub async fn mark_error(&self, id: Uuid, detail: &str) -> Result<()> {
        sqlx::query("UPDATE objects SET error = 1, error_detail = ?2 WHERE id = ?1")
            .bind(id.to_string())
            .bind(detail)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Mark an object as embedded into the vector index.
    pub async fn mark_embedded(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE objects SET generated_embeddings = 1 WHERE id = ?1")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
