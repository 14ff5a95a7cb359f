//! Query API handlers: similarity search, saved-query listing, and
//! saved-result lookup.

use super::state::ApiState;
use crate::error::Error;
use crate::search::SearchHit;
use crate::store::{Definition, FileObject, QuerySort, SavedQuery, SortDirection};

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Deserialize)]
pub(super) struct SearchParams {
    query: String,
    #[serde(default)]
    n_results: usize,
    #[serde(default)]
    max_distance: Option<f32>,
}

#[derive(Deserialize)]
pub(super) struct ListParams {
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_page_size")]
    page_size: u32,
    #[serde(default)]
    sort_by: Option<String>,
    #[serde(default)]
    sort_direction: Option<String>,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    25
}

#[derive(Deserialize)]
pub(super) struct ResultsParams {
    id: Uuid,
}

#[derive(Serialize)]
struct ObjectPayload {
    id: String,
    created_at: String,
    #[serde(rename = "type")]
    object_type: String,
    path: String,
    name: String,
    file_id: String,
    file_created_at: String,
    metadata: serde_json::Value,
    processed: bool,
    generated_embeddings: bool,
    error: bool,
    error_detail: Option<String>,
}

impl From<&FileObject> for ObjectPayload {
    fn from(object: &FileObject) -> Self {
        Self {
            id: object.id.to_string(),
            created_at: object.created_at.to_rfc3339(),
            object_type: object.object_type.clone(),
            path: object.path.clone(),
            name: object.name.clone(),
            file_id: object.file_id.clone(),
            file_created_at: object.file_created_at.to_rfc3339(),
            metadata: object.metadata.clone(),
            processed: object.processed,
            generated_embeddings: object.generated_embeddings,
            error: object.error,
            error_detail: object.error_detail.clone(),
        }
    }
}

#[derive(Serialize)]
struct DefinitionPayload {
    id: String,
    created_at: String,
    #[serde(rename = "type")]
    definition_type: String,
    content: String,
    processing_secs: f64,
    model: Option<String>,
}

impl From<&Definition> for DefinitionPayload {
    fn from(definition: &Definition) -> Self {
        Self {
            id: definition.id.to_string(),
            created_at: definition.created_at.to_rfc3339(),
            definition_type: definition.definition_type.clone(),
            content: definition.content.clone(),
            processing_secs: definition.processing_secs,
            model: definition.model.clone(),
        }
    }
}

#[derive(Serialize)]
struct HitPayload {
    object: ObjectPayload,
    distance: f32,
    definitions: Vec<DefinitionPayload>,
}

#[derive(Serialize)]
struct QueryPayload {
    id: String,
    created_at: String,
    query: String,
    n_results: usize,
    max_distance: f32,
    returned_results: usize,
}

impl From<&SavedQuery> for QueryPayload {
    fn from(query: &SavedQuery) -> Self {
        Self {
            id: query.id.to_string(),
            created_at: query.created_at.to_rfc3339(),
            query: query.query_text.clone(),
            n_results: query.n_results,
            max_distance: query.max_distance,
            returned_results: query.returned_results,
        }
    }
}

pub(super) async fn search(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<SearchParams>,
) -> Response {
    match state
        .engine
        .search(&params.query, params.n_results, params.max_distance)
        .await
    {
        Ok((saved, hits)) => match hits_payload(&state, &hits).await {
            Ok(results) => Json(serde_json::json!({
                "query_id": saved.id.to_string(),
                "results": results,
            }))
            .into_response(),
            Err(error) => error_response(error),
        },
        Err(error) => error_response(error),
    }
}

pub(super) async fn list_queries(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<ListParams>,
) -> Response {
    let sort = match params.sort_by.as_deref() {
        Some("results") => QuerySort::ReturnedResults,
        _ => QuerySort::CreatedAt,
    };
    let direction = match params.sort_direction.as_deref() {
        Some("ascending") => SortDirection::Ascending,
        _ => SortDirection::Descending,
    };

    match state
        .engine
        .list_queries(params.page, params.page_size, sort, direction)
        .await
    {
        Ok(page) => {
            let queries: Vec<QueryPayload> = page.queries.iter().map(QueryPayload::from).collect();
            Json(serde_json::json!({
                "results": queries,
                "page": page.page,
                "page_size": page.page_size,
                "pages": page.pages,
                "total": page.total,
            }))
            .into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(super) async fn saved_results(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<ResultsParams>,
) -> Response {
    match state.engine.saved_query_results(params.id).await {
        Ok((saved, hits)) => match hits_payload(&state, &hits).await {
            Ok(results) => Json(serde_json::json!({
                "query": QueryPayload::from(&saved),
                "results": results,
            }))
            .into_response(),
            Err(error) => error_response(error),
        },
        Err(error) => error_response(error),
    }
}

/// Attach each hit's definitions to its payload.
async fn hits_payload(state: &ApiState, hits: &[SearchHit]) -> crate::Result<Vec<HitPayload>> {
    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
        let definitions = state.store.definitions_for_object(hit.object.id).await?;
        results.push(HitPayload {
            object: ObjectPayload::from(&hit.object),
            distance: hit.distance,
            definitions: definitions.iter().map(DefinitionPayload::from).collect(),
        });
    }
    Ok(results)
}

fn error_response(error: Error) -> Response {
    let status = match &error {
        Error::QueryNotFound(_) => StatusCode::NOT_FOUND,
        Error::EmptyQuery => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(%error, "request failed");
    }
    (
        status,
        Json(serde_json::json!({ "error": error.to_string() })),
    )
        .into_response()
}
