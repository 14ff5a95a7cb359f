//! LanceDB table management for object embeddings.
//!
//! One row per file object, keyed by the object id. Each row carries the
//! embedded document plus a pointer (path, name, file identity) sufficient
//! to audit the index without reading the object store. Upserts are
//! delete-then-append, so re-embedding an object is idempotent.

use crate::embed::{TextEmbedder, embed_one};
use crate::error::{Result, VectorError};
use crate::store::FileObject;
use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{Array, RecordBatchIterator};
use futures::TryStreamExt;
use std::sync::Arc;
use uuid::Uuid;

const TABLE_NAME: &str = "object_embeddings";

/// Index-side metadata stored beside an embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPointer {
    pub path: String,
    pub name: String,
    pub file_id: String,
}

impl From<&FileObject> for ObjectPointer {
    fn from(object: &FileObject) -> Self {
        Self {
            path: object.path.clone(),
            name: object.name.clone(),
            file_id: object.file_id.clone(),
        }
    }
}

/// One nearest-neighbor hit, ascending distance order.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: Uuid,
    pub pointer: ObjectPointer,
    pub distance: f32,
}

/// LanceDB-backed similarity index over embedded object documents.
pub struct VectorIndex {
    table: lancedb::Table,
    embedder: Arc<dyn TextEmbedder>,
    dimension: i32,
}

impl VectorIndex {
    /// Open the existing table or create a new one.
    ///
    /// If the table exists but is corrupted (e.g. process killed
    /// mid-write), it is dropped and recreated.
    pub async fn open_or_create(
        connection: &lancedb::Connection,
        embedder: Arc<dyn TextEmbedder>,
    ) -> Result<Self> {
        let dimension = embedder.dimension() as i32;

        match connection.open_table(TABLE_NAME).execute().await {
            Ok(table) => {
                return Ok(Self {
                    table,
                    embedder,
                    dimension,
                });
            }
            Err(error) => {
                tracing::debug!(%error, "failed to open object_embeddings table, will create");
            }
        }

        match Self::create_empty_table(connection, dimension).await {
            Ok(table) => {
                return Ok(Self {
                    table,
                    embedder,
                    dimension,
                });
            }
            Err(error) => {
                tracing::warn!(
                    %error,
                    "failed to create object_embeddings table, attempting recovery from corrupted state"
                );
            }
        }

        // Both open and create failed: table data exists but is corrupted.
        if let Err(error) = connection.drop_table(TABLE_NAME, &[]).await {
            tracing::warn!(%error, "drop_table failed during recovery, proceeding anyway");
        }

        let table = Self::create_empty_table(connection, dimension).await?;
        tracing::info!("object_embeddings table recovered, objects will need re-embedding");

        Ok(Self {
            table,
            embedder,
            dimension,
        })
    }

    async fn create_empty_table(
        connection: &lancedb::Connection,
        dimension: i32,
    ) -> Result<lancedb::Table> {
        let schema = Self::schema(dimension);
        let batches = RecordBatchIterator::new(vec![].into_iter().map(Ok), Arc::new(schema));

        connection
            .create_table(TABLE_NAME, Box::new(batches))
            .execute()
            .await
            .map_err(|e| VectorError::LanceDb(e.to_string()).into())
    }

    /// Upsert one object's document under its id.
    pub async fn upsert(&self, id: Uuid, document: &str, pointer: &ObjectPointer) -> Result<()> {
        let embedding = embed_one(&self.embedder, document).await?;
        if embedding.len() != self.dimension as usize {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension as usize,
                got: embedding.len(),
            }
            .into());
        }

        // Replace any existing row for this id so re-runs stay idempotent.
        self.delete(id).await?;

        use arrow_array::{FixedSizeListArray, RecordBatch, StringArray};

        let schema = Self::schema(self.dimension);

        let id_array = StringArray::from(vec![id.to_string()]);
        let document_array = StringArray::from(vec![document]);
        let path_array = StringArray::from(vec![pointer.path.as_str()]);
        let name_array = StringArray::from(vec![pointer.name.as_str()]);
        let file_id_array = StringArray::from(vec![pointer.file_id.as_str()]);

        let embedding_array = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            vec![Some(embedding.iter().map(|v| Some(*v)).collect::<Vec<_>>())],
            self.dimension,
        );

        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(id_array) as arrow_array::ArrayRef,
                Arc::new(document_array) as arrow_array::ArrayRef,
                Arc::new(path_array) as arrow_array::ArrayRef,
                Arc::new(name_array) as arrow_array::ArrayRef,
                Arc::new(file_id_array) as arrow_array::ArrayRef,
                Arc::new(embedding_array) as arrow_array::ArrayRef,
            ],
        )
        .map_err(|e| VectorError::LanceDb(e.to_string()))?;

        let batches =
            RecordBatchIterator::new(vec![Ok(batch)], Arc::new(Self::schema(self.dimension)));

        self.table
            .add(Box::new(batches))
            .execute()
            .await
            .map_err(|e| VectorError::LanceDb(e.to_string()))?;

        Ok(())
    }

    /// Delete an object's row by id.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let predicate = format!("id = '{id}'");
        self.table
            .delete(&predicate)
            .await
            .map_err(|e| VectorError::LanceDb(e.to_string()))?;
        Ok(())
    }

    /// Nearest-neighbor lookup for free text, ascending by distance.
    pub async fn query(&self, text: &str, limit: usize) -> Result<Vec<VectorHit>> {
        let embedding = embed_one(&self.embedder, text).await?;
        if embedding.len() != self.dimension as usize {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension as usize,
                got: embedding.len(),
            }
            .into());
        }

        use lancedb::query::{ExecutableQuery, QueryBase};

        let results: Vec<arrow_array::RecordBatch> = self
            .table
            .query()
            .nearest_to(embedding.as_slice())
            .map_err(|e| VectorError::LanceDb(e.to_string()))?
            .limit(limit)
            .execute()
            .await
            .map_err(|e| VectorError::LanceDb(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| VectorError::LanceDb(e.to_string()))?;

        let mut hits = Vec::new();
        for batch in results {
            if let (Some(id_col), Some(path_col), Some(name_col), Some(file_id_col), Some(dist_col)) = (
                batch.column_by_name("id"),
                batch.column_by_name("path"),
                batch.column_by_name("name"),
                batch.column_by_name("file_id"),
                batch.column_by_name("_distance"),
            ) {
                let ids: &arrow_array::StringArray = id_col.as_string::<i32>();
                let paths: &arrow_array::StringArray = path_col.as_string::<i32>();
                let names: &arrow_array::StringArray = name_col.as_string::<i32>();
                let file_ids: &arrow_array::StringArray = file_id_col.as_string::<i32>();
                let distances: &arrow_array::PrimitiveArray<Float32Type> =
                    dist_col.as_primitive();

                for i in 0..ids.len() {
                    if !ids.is_valid(i) || !distances.is_valid(i) {
                        continue;
                    }
                    let raw_id = ids.value(i);
                    let Ok(id) = Uuid::parse_str(raw_id) else {
                        tracing::warn!(id = raw_id, "skipping index row with non-uuid id");
                        continue;
                    };
                    hits.push(VectorHit {
                        id,
                        pointer: ObjectPointer {
                            path: paths.value(i).to_string(),
                            name: names.value(i).to_string(),
                            file_id: file_ids.value(i).to_string(),
                        },
                        distance: distances.value(i),
                    });
                }
            }
        }

        Ok(hits)
    }

    /// Create the ANN index on the embedding column, tolerating "already
    /// exists" style errors.
    pub async fn create_index(&self) -> Result<()> {
        match self
            .table
            .create_index(&["embedding"], lancedb::index::Index::Auto)
            .execute()
            .await
        {
            Ok(()) => {
                tracing::debug!("vector index created on embedding column");
                Ok(())
            }
            Err(error) => {
                let message = error.to_string();
                if message.contains("already") || message.contains("index") {
                    tracing::trace!("vector index already exists");
                    Ok(())
                } else {
                    Err(VectorError::LanceDb(format!(
                        "failed to create vector index: {message}"
                    ))
                    .into())
                }
            }
        }
    }

    /// Count all rows in the table.
    pub async fn count(&self) -> Result<usize> {
        use lancedb::query::{ExecutableQuery, QueryBase};

        let results: Vec<arrow_array::RecordBatch> = self
            .table
            .query()
            .select(lancedb::query::Select::columns(&["id"]))
            .execute()
            .await
            .map_err(|e| VectorError::LanceDb(e.to_string()))?
            .try_collect()
            .await
            .map_err(|e| VectorError::LanceDb(e.to_string()))?;

        Ok(results.iter().map(|b| b.num_rows()).sum())
    }

    fn schema(dimension: i32) -> arrow_schema::Schema {
        arrow_schema::Schema::new(vec![
            arrow_schema::Field::new("id", arrow_schema::DataType::Utf8, false),
            arrow_schema::Field::new("document", arrow_schema::DataType::Utf8, false),
            arrow_schema::Field::new("path", arrow_schema::DataType::Utf8, false),
            arrow_schema::Field::new("name", arrow_schema::DataType::Utf8, false),
            arrow_schema::Field::new("file_id", arrow_schema::DataType::Utf8, false),
            arrow_schema::Field::new(
                "embedding",
                arrow_schema::DataType::FixedSizeList(
                    Arc::new(arrow_schema::Field::new(
                        "item",
                        arrow_schema::DataType::Float32,
                        true,
                    )),
                    dimension,
                ),
                false,
            ),
        ])
    }
}
