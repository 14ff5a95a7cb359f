//! Object definitions: analyzer output attached to a file object.
//! Append-only; rows are never mutated after insert.

use super::{Store, parse_timestamp, parse_uuid};
use crate::error::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A stored analysis result, e.g. a generated image description.
#[derive(Debug, Clone)]
pub struct Definition {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub object_id: Uuid,
    pub definition_type: String,
    pub content: String,
    pub processing_secs: f64,
    pub model: Option<String>,
}

/// What a processor hands back before the store assigns identity.
#[derive(Debug, Clone)]
pub struct DefinitionDraft {
    pub definition_type: String,
    pub content: String,
    pub processing_secs: f64,
    pub model: Option<String>,
}

type DefinitionRow = (String, String, String, String, String, f64, Option<String>);

fn definition_from_row(row: DefinitionRow) -> Result<Definition> {
    let (id, created_at, object_id, definition_type, content, processing_secs, model) = row;
    Ok(Definition {
        id: parse_uuid(&id)?,
        created_at: parse_timestamp(&created_at)?,
        object_id: parse_uuid(&object_id)?,
        definition_type,
        content,
        processing_secs,
        model,
    })
}

impl Store {
    pub async fn insert_definition(
        &self,
        object_id: Uuid,
        draft: DefinitionDraft,
    ) -> Result<Definition> {
        let definition = Definition {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            object_id,
            definition_type: draft.definition_type,
            content: draft.content,
            processing_secs: draft.processing_secs,
            model: draft.model,
        };

        sqlx::query(
            "INSERT INTO definitions (id, created_at, object_id, definition_type, content, \
             processing_secs, model) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(definition.id.to_string())
        .bind(definition.created_at.to_rfc3339())
        .bind(definition.object_id.to_string())
        .bind(&definition.definition_type)
        .bind(&definition.content)
        .bind(definition.processing_secs)
        .bind(&definition.model)
        .execute(self.pool())
        .await?;

        Ok(definition)
    }

    /// All definitions for an object in creation order.
    pub async fn definitions_for_object(&self, object_id: Uuid) -> Result<Vec<Definition>> {
        let rows: Vec<DefinitionRow> = sqlx::query_as(
            "SELECT id, created_at, object_id, definition_type, content, processing_secs, model \
             FROM definitions WHERE object_id = ?1 ORDER BY rowid ASC",
        )
        .bind(object_id.to_string())
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(definition_from_row).collect()
    }
}
