//! HTTP API serving documents, permission-filtered search and published
//! ACL resources.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use share_index_core::{
    acl::AclSet,
    adaptor::{DocResponse, ShareAdaptor},
    docid::CanonicalDocId,
    error::AdaptorError,
    index::{AclIndex, Subject},
    named::NamedResourceId,
    search::SearchIndex,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub adaptor: Arc<ShareAdaptor>,
    pub acl_index: Arc<AclIndex>,
    pub search: Arc<SearchIndex>,
}

#[derive(Deserialize)]
struct IdParams {
    id: String,
}

#[derive(Deserialize)]
struct SearchParams {
    q: String,
    user: String,
    /// Comma separated group names
    #[serde(default)]
    groups: Option<String>,
    limit: Option<usize>,
}

#[derive(Serialize, Deserialize)]
pub struct SearchResult {
    pub id: CanonicalDocId,
    pub name: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/doc", get(get_doc))
        .route("/search", get(search_docs))
        .route("/resource", get(get_resource))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

fn status_for(err: &AdaptorError) -> StatusCode {
    match err {
        AdaptorError::NotFound(_) | AdaptorError::Identity(_) => StatusCode::NOT_FOUND,
        AdaptorError::PermissionRead(_) => StatusCode::SERVICE_UNAVAILABLE,
        AdaptorError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn get_doc(
    State(state): State<AppState>,
    Query(params): Query<IdParams>,
) -> Result<Json<DocResponse>, StatusCode> {
    let indexed_kind = CanonicalDocId::from_string(params.id.as_str())
        .ok()
        .and_then(|id| state.acl_index.indexed_kind(&id));
    let adaptor = state.adaptor.clone();
    let requested = params.id.clone();
    let result =
        tokio::task::spawn_blocking(move || adaptor.get_doc_content(&requested, indexed_kind))
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    match result {
        Ok(doc) => Ok(Json(doc)),
        Err(e) => {
            let status = status_for(&e);
            if status == StatusCode::NOT_FOUND {
                warn!(document = %params.id, "not found: {e}");
            } else {
                error!(document = %params.id, "failed to serve document: {e}");
            }
            Err(status)
        }
    }
}

async fn search_docs(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchResult>>, StatusCode> {
    let limit = params.limit.unwrap_or(10);
    let groups = params
        .groups
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty());
    let subject = Subject::new(params.user, groups);
    let ids = state
        .search
        .search(&params.q, limit)
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let results = ids
        .into_iter()
        .filter(|id| state.acl_index.evaluate(id, &subject).is_permit())
        .map(|id| SearchResult {
            name: id.name().to_string(),
            id,
        })
        .collect();
    Ok(Json(results))
}

async fn get_resource(
    State(state): State<AppState>,
    Query(params): Query<IdParams>,
) -> Result<Json<AclSet>, StatusCode> {
    let id = NamedResourceId::parse(&params.id).ok_or(StatusCode::NOT_FOUND)?;
    state
        .acl_index
        .resource(&id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
