//! Saved queries and their persisted results: the search history.

use super::objects::FileObject;
use super::{Store, parse_timestamp, parse_uuid};
use crate::error::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A saved search and its parameters.
#[derive(Debug, Clone)]
pub struct SavedQuery {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub query_text: String,
    pub n_results: usize,
    pub max_distance: f32,
    pub returned_results: usize,
}

/// Sort key for the saved-query listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuerySort {
    CreatedAt,
    ReturnedResults,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// One page of the saved-query listing.
#[derive(Debug, Clone)]
pub struct QueryPage {
    pub queries: Vec<SavedQuery>,
    pub page: u32,
    pub page_size: u32,
    pub pages: u32,
    pub total: u64,
}

type QueryRow = (String, String, String, i64, f64, i64);

fn query_from_row(row: QueryRow) -> Result<SavedQuery> {
    let (id, created_at, query_text, n_results, max_distance, returned_results) = row;
    Ok(SavedQuery {
        id: parse_uuid(&id)?,
        created_at: parse_timestamp(&created_at)?,
        query_text,
        n_results: n_results.max(0) as usize,
        max_distance: max_distance as f32,
        returned_results: returned_results.max(0) as usize,
    })
}

const QUERY_COLUMNS: &str =
    "id, created_at, query_text, n_results, max_distance, returned_results";

impl Store {
    pub async fn insert_query(
        &self,
        query_text: &str,
        n_results: usize,
        max_distance: f32,
        returned_results: usize,
    ) -> Result<SavedQuery> {
        let query = SavedQuery {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            query_text: query_text.to_string(),
            n_results,
            max_distance,
            returned_results,
        };

        sqlx::query(
            "INSERT INTO queries (id, created_at, query_text, n_results, max_distance, \
             returned_results) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(query.id.to_string())
        .bind(query.created_at.to_rfc3339())
        .bind(&query.query_text)
        .bind(query.n_results as i64)
        .bind(f64::from(query.max_distance))
        .bind(query.returned_results as i64)
        .execute(self.pool())
        .await?;

        Ok(query)
    }

    pub async fn insert_query_result(
        &self,
        query_id: Uuid,
        object_id: Uuid,
        distance: f32,
    ) -> Result<()> {
        sqlx::query("INSERT INTO query_results (query_id, object_id, distance) VALUES (?1, ?2, ?3)")
            .bind(query_id.to_string())
            .bind(object_id.to_string())
            .bind(f64::from(distance))
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn get_query(&self, id: Uuid) -> Result<Option<SavedQuery>> {
        let row: Option<QueryRow> =
            sqlx::query_as(&format!("SELECT {QUERY_COLUMNS} FROM queries WHERE id = ?1"))
                .bind(id.to_string())
                .fetch_optional(self.pool())
                .await?;

        row.map(query_from_row).transpose()
    }

    /// The persisted results of a saved query, ascending by distance.
    pub async fn query_results(&self, query_id: Uuid) -> Result<Vec<(FileObject, f32)>> {
        type JoinedRow = (
            String,
            String,
            String,
            String,
            String,
            String,
            String,
            Option<String>,
            bool,
            bool,
            Option<String>,
            bool,
            Option<String>,
            f64,
        );

        let rows: Vec<JoinedRow> = sqlx::query_as(
            "SELECT o.id, o.created_at, o.object_type, o.path, o.name, o.file_id, \
             o.file_created_at, o.metadata, o.processed, o.generated_embeddings, \
             o.last_processed_at, o.error, o.error_detail, r.distance \
             FROM query_results r JOIN objects o ON o.id = r.object_id \
             WHERE r.query_id = ?1 ORDER BY r.distance ASC",
        )
        .bind(query_id.to_string())
        .fetch_all(self.pool())
        .await?;

        rows.into_iter()
            .map(|row| {
                let distance = row.13 as f32;
                let object = super::objects::object_from_row((
                    row.0, row.1, row.2, row.3, row.4, row.5, row.6, row.7, row.8, row.9, row.10,
                    row.11, row.12,
                ))?;
                Ok((object, distance))
            })
            .collect()
    }

    pub async fn count_queries(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queries")
            .fetch_one(self.pool())
            .await?;
        Ok(count.max(0) as u64)
    }

    /// A page of the saved-query listing, sorted as requested.
    pub async fn list_queries(
        &self,
        page: u32,
        page_size: u32,
        sort: QuerySort,
        direction: SortDirection,
    ) -> Result<QueryPage> {
        let page = page.max(1);
        let page_size = page_size.max(1);

        let order = match (sort, direction) {
            (QuerySort::CreatedAt, SortDirection::Ascending) => "created_at ASC",
            (QuerySort::CreatedAt, SortDirection::Descending) => "created_at DESC",
            (QuerySort::ReturnedResults, SortDirection::Ascending) => "returned_results ASC",
            (QuerySort::ReturnedResults, SortDirection::Descending) => "returned_results DESC",
        };

        let total = self.count_queries().await?;
        let pages = total.div_ceil(u64::from(page_size)) as u32;

        let offset = i64::from(page - 1) * i64::from(page_size);
        let rows: Vec<QueryRow> = sqlx::query_as(&format!(
            "SELECT {QUERY_COLUMNS} FROM queries ORDER BY {order} LIMIT ?1 OFFSET ?2"
        ))
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        let queries = rows
            .into_iter()
            .map(query_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(QueryPage {
            queries,
            page,
            page_size,
            pages,
            total,
        })
    }
}
