//! The query engine: similarity search reconciled against the object
//! store, plus the persisted search history.

use crate::config::QueryConfig;
use crate::error::{Error, Result};
use crate::store::{
    ErrorEvent, FileObject, MetricEvent, QueryPage, QuerySort, SavedQuery, SortDirection, Store,
};
use crate::vector::VectorIndex;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// One surviving search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub object: FileObject,
    pub distance: f32,
}

/// Executes similarity searches and owns the search history.
#[derive(Clone)]
pub struct QueryEngine {
    store: Store,
    index: Arc<VectorIndex>,
    defaults: QueryConfig,
}

impl QueryEngine {
    pub fn new(store: Store, index: Arc<VectorIndex>, defaults: QueryConfig) -> Self {
        Self {
            store,
            index,
            defaults,
        }
    }

    /// Run a similarity search.
    ///
    /// Hits beyond the distance threshold are dropped; hits whose id no
    /// longer resolves in the object store are logged and skipped without
    /// failing the request. The query and its surviving results are
    /// persisted before returning.
    pub async fn search(
        &self,
        query_text: &str,
        n_results: usize,
        max_distance: Option<f32>,
    ) -> Result<(SavedQuery, Vec<SearchHit>)> {
        let query_text = query_text.trim();
        if query_text.is_empty() {
            return Err(Error::EmptyQuery);
        }

        let max_distance = max_distance.unwrap_or(self.defaults.max_distance);
        let n_results = if n_results == 0 {
            self.defaults.default_n_results
        } else {
            n_results
        };

        tracing::info!(query = query_text, n_results, max_distance, "querying objects");
        let started = Instant::now();

        let hits = self.index.query(query_text, n_results).await?;

        let mut results = Vec::new();
        for hit in hits {
            if hit.distance > max_distance {
                continue;
            }

            match self.store.get_object(hit.id).await? {
                Some(object) => results.push(SearchHit {
                    object,
                    distance: hit.distance,
                }),
                None => {
                    tracing::error!(id = %hit.id, "vector hit has no matching object");
                    if let Err(error) = self
                        .store
                        .record_error(
                            ErrorEvent::ObjectNotFoundWhileQuerying,
                            "Object not found while querying",
                            Some(&format!("object '{}' does not exist", hit.id)),
                            None,
                            Some(serde_json::json!({
                                "id": hit.id.to_string(),
                                "path": hit.pointer.path,
                                "name": hit.pointer.name,
                                "file_id": hit.pointer.file_id,
                            })),
                        )
                        .await
                    {
                        tracing::warn!(%error, "failed to record stale-hit error");
                    }
                }
            }
        }

        let saved = self
            .store
            .insert_query(query_text, n_results, max_distance, results.len())
            .await?;
        for hit in &results {
            self.store
                .insert_query_result(saved.id, hit.object.id, hit.distance)
                .await?;
        }

        let secs = started.elapsed().as_secs_f64();
        if let Err(error) = self
            .store
            .record_time_metric(
                MetricEvent::Query,
                secs,
                Some("Query objects"),
                Some(&format!("queried objects with '{query_text}'")),
            )
            .await
        {
            tracing::warn!(%error, "failed to record query metric");
        }
        tracing::info!(
            returned = results.len(),
            elapsed_secs = format!("{secs:.2}"),
            "query complete"
        );

        Ok((saved, results))
    }

    /// Re-read the persisted results of a saved query. Does not touch the
    /// vector index. Fails with [`Error::QueryNotFound`] for unknown ids.
    pub async fn saved_query_results(&self, id: Uuid) -> Result<(SavedQuery, Vec<SearchHit>)> {
        let Some(query) = self.store.get_query(id).await? else {
            return Err(Error::QueryNotFound(id));
        };

        let results = self
            .store
            .query_results(id)
            .await?
            .into_iter()
            .map(|(object, distance)| SearchHit { object, distance })
            .collect();

        Ok((query, results))
    }

    /// Paginated listing of the search history.
    pub async fn list_queries(
        &self,
        page: u32,
        page_size: u32,
        sort: QuerySort,
        direction: SortDirection,
    ) -> Result<QueryPage> {
        self.store.list_queries(page, page_size, sort, direction).await
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}
