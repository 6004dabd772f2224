// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP API.
//!
//! JSON endpoints over a shared [`ReplicationService`]. Other nodes sync
//! into this one through the same truth endpoints local clients use, so a
//! node is both a sync source and a sync target.
//!
//! # Errors
//!
//! Every failure is returned as `{"error": "<message>"}`:
//!
//! | Error | Status |
//! |-------|--------|
//! | `Validation`, malformed body or path | 400 |
//! | missing/malformed bearer token | 401 |
//! | unknown bearer token | 403 |
//! | `NotFound` | 404 |
//! | `Conflict` | 409 |
//! | sync transport failure | 502 |
//! | store/internal | 500 |
//!
//! # Authorisation
//!
//! With an empty `auth.allowed_tokens` list the API is open. Otherwise the
//! handshake and receive endpoints require a listed bearer token, and any
//! other request that presents an `Authorization` header must present a
//! listed one.

use crate::config::{AuthConfig, MAX_PAGE_LIMIT};
use crate::error::ReplicationError;
use crate::metrics;
use crate::model::{NodeId, Truth, TruthId, TruthPayload};
use crate::peer::PeerConnector;
use crate::service::{HealthCheck, ReplicationService, SearchKind};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, Request, State,
    },
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

type SharedService<C> = Arc<ReplicationService<C>>;

const HANDSHAKE_PATH: &str = "/api/replication/handshake";
const RECEIVE_PATH: &str = "/api/replication/receive";

const DEFAULT_SEARCH_LIMIT: usize = 5;
const DEFAULT_TOPIC_LIMIT: usize = 10;

// ============================================================================
// Errors
// ============================================================================

/// A failed request.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Service(#[from] ReplicationError),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Unauthorized")]
    Forbidden,
}

impl ApiError {
    fn invalid(e: impl std::fmt::Display) -> Self {
        Self::Service(ReplicationError::validation(e.to_string()))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Service(e) => match e {
                ReplicationError::Validation(_) => StatusCode::BAD_REQUEST,
                ReplicationError::NotFound { .. } => StatusCode::NOT_FOUND,
                ReplicationError::Conflict { .. } => StatusCode::CONFLICT,
                ReplicationError::Store(_)
                | ReplicationError::Config(_)
                | ReplicationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
        }
    }

    fn kind_label(&self) -> &'static str {
        match self {
            Self::Service(e) => e.kind_label(),
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden => "forbidden",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            debug!(status = status.as_u16(), error = %self, "Request rejected");
        }
        metrics::record_error(self.kind_label());
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn accept<T, R: std::fmt::Display>(extracted: Result<T, R>) -> ApiResult<T> {
    extracted.map_err(ApiError::invalid)
}

// ============================================================================
// Authorisation
// ============================================================================

/// Check the bearer token in `headers` against `auth`.
///
/// `required` is set for endpoints that must not be reached anonymously
/// once an allow-list exists.
pub fn authorize(headers: &HeaderMap, auth: &AuthConfig, required: bool) -> ApiResult<()> {
    if auth.is_open() {
        return Ok(());
    }

    let value = match headers.get(header::AUTHORIZATION) {
        Some(value) => value,
        None if required => return Err(ApiError::Unauthorized("Missing bearer token".into())),
        None => return Ok(()),
    };

    let token = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    match token {
        Some(token) if auth.allows(token) => Ok(()),
        Some(_) => Err(ApiError::Forbidden),
        None => Err(ApiError::Unauthorized("Malformed authorization header".into())),
    }
}

async fn check_bearer<C: PeerConnector>(
    State(service): State<SharedService<C>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    let required = path == HANDSHAKE_PATH || path == RECEIVE_PATH;

    if let Err(e) = authorize(request.headers(), &service.config().auth, required) {
        return e.into_response();
    }
    next.run(request).await
}

// ============================================================================
// Router
// ============================================================================

/// Build the full API router over `service`.
pub fn router<C: PeerConnector>(service: SharedService<C>) -> Router {
    Router::new()
        .merge(truth_routes::<C>())
        .merge(replication_routes::<C>())
        .layer(middleware::from_fn_with_state(service.clone(), check_bearer::<C>))
        .with_state(service)
        .layer(TraceLayer::new_for_http())
}

/// Serve the API on `listener` until `shutdown` resolves.
pub async fn serve<C, F>(service: SharedService<C>, listener: TcpListener, shutdown: F) -> std::io::Result<()>
where
    C: PeerConnector,
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, node_id = %service.node_id(), "API listening");
    }
    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown)
        .await
}

// ============================================================================
// Truth Routes
// ============================================================================

fn truth_routes<C: PeerConnector>() -> Router<SharedService<C>> {
    Router::new()
        .route("/api/truth/add", post(add_truth::<C>))
        .route("/api/truth/search", get(search_truths::<C>))
        .route("/api/truth/by-topic/:topic", get(truths_by_topic::<C>))
        .route("/api/truth/delete/:id", delete(delete_truth::<C>))
        .route("/api/truth/all", get(list_truths::<C>))
        .route("/api/truth/topics", get(list_topics::<C>))
        .route("/api/truth/:id", get(get_truth::<C>))
        .route("/api/truth/:id/topics", post(append_topics::<C>))
}

#[derive(Debug, Deserialize)]
struct AddTruthRequest {
    content: Option<String>,
    source: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
}

async fn add_truth<C: PeerConnector>(
    State(service): State<SharedService<C>>,
    body: Result<Json<AddTruthRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = accept(body)?;
    let content = req.content.unwrap_or_default();

    let truth = service
        .add_truth(&content, req.source.as_deref(), &req.topics)
        .await?;

    Ok(Json(json!({
        "id": truth.id,
        "message": "Truth added successfully",
        "topics": truth.topics,
    })))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    limit: Option<usize>,
}

async fn search_truths<C: PeerConnector>(
    State(service): State<SharedService<C>>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(params) = accept(params)?;
    let kind = SearchKind::parse(params.kind.as_deref())?;
    let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);

    let results = service
        .search_truths(params.query.as_deref().unwrap_or_default(), kind, limit)
        .await?;
    Ok(Json(json!({ "results": results })))
}

#[derive(Debug, Deserialize)]
struct LimitParams {
    limit: Option<usize>,
}

async fn truths_by_topic<C: PeerConnector>(
    State(service): State<SharedService<C>>,
    topic: Result<Path<String>, PathRejection>,
    params: Result<Query<LimitParams>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Path(topic) = accept(topic)?;
    let Query(params) = accept(params)?;

    let results = service
        .truths_by_topic(&topic, params.limit.unwrap_or(DEFAULT_TOPIC_LIMIT))
        .await?;
    Ok(Json(json!({ "topic": topic, "results": results })))
}

async fn get_truth<C: PeerConnector>(
    State(service): State<SharedService<C>>,
    id: Result<Path<TruthId>, PathRejection>,
) -> ApiResult<Json<Truth>> {
    let Path(id) = accept(id)?;
    Ok(Json(service.get_truth(id).await?))
}

#[derive(Debug, Deserialize)]
struct AppendTopicsRequest {
    #[serde(default)]
    topics: Vec<String>,
}

async fn append_topics<C: PeerConnector>(
    State(service): State<SharedService<C>>,
    id: Result<Path<TruthId>, PathRejection>,
    body: Result<Json<AppendTopicsRequest>, JsonRejection>,
) -> ApiResult<Json<Truth>> {
    let Path(id) = accept(id)?;
    let Json(req) = accept(body)?;
    if req.topics.iter().all(|t| t.trim().is_empty()) {
        return Err(ApiError::invalid("Topics are required"));
    }

    Ok(Json(service.append_topics(id, &req.topics).await?))
}

async fn delete_truth<C: PeerConnector>(
    State(service): State<SharedService<C>>,
    id: Result<Path<TruthId>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(id) = accept(id)?;
    service.delete_truth(id).await?;
    Ok(Json(json!({ "message": "Truth deleted successfully" })))
}

#[derive(Debug, Deserialize)]
struct PageParams {
    offset: Option<usize>,
    limit: Option<usize>,
}

async fn list_truths<C: PeerConnector>(
    State(service): State<SharedService<C>>,
    params: Result<Query<PageParams>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(params) = accept(params)?;

    let truths = match (params.offset, params.limit) {
        (None, None) => service.list_truths().await?,
        (offset, limit) => {
            let limit = limit.unwrap_or(MAX_PAGE_LIMIT).min(MAX_PAGE_LIMIT);
            service.list_truths_page(offset.unwrap_or(0), limit).await?
        }
    };
    Ok(Json(json!({ "truths": truths })))
}

async fn list_topics<C: PeerConnector>(State(service): State<SharedService<C>>) -> ApiResult<Json<Value>> {
    let topics = service.list_topics().await?;
    Ok(Json(json!({ "topics": topics })))
}

// ============================================================================
// Replication Routes
// ============================================================================

fn replication_routes<C: PeerConnector>() -> Router<SharedService<C>> {
    Router::new()
        .route("/api/replication/nodes", get(list_nodes::<C>).post(add_node::<C>))
        .route("/api/replication/nodes/:id", delete(delete_node::<C>))
        .route("/api/replication/sync/:id", post(sync_node::<C>))
        .route(HANDSHAKE_PATH, get(handshake::<C>))
        .route(RECEIVE_PATH, post(receive_truths::<C>))
        .route("/api/replication/health", get(health::<C>))
}

async fn list_nodes<C: PeerConnector>(State(service): State<SharedService<C>>) -> ApiResult<Json<Value>> {
    let nodes = service.list_nodes().await?;
    Ok(Json(json!({ "nodes": nodes })))
}

#[derive(Debug, Deserialize)]
struct AddNodeRequest {
    name: Option<String>,
    endpoint: Option<String>,
    api_key: Option<String>,
}

/// Node status is derived from sync results, so a body naming `status`
/// is refused even when the value is `null`.
async fn add_node<C: PeerConnector>(
    State(service): State<SharedService<C>>,
    body: Result<Json<Map<String, Value>>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = accept(body)?;
    if body.contains_key("status") {
        return Err(ApiError::invalid("Node status is derived from sync results and cannot be set"));
    }
    let req: AddNodeRequest = accept(serde_json::from_value(Value::Object(body)))?;
    let (name, endpoint) = match (req.name, req.endpoint) {
        (Some(name), Some(endpoint)) => (name, endpoint),
        _ => return Err(ApiError::invalid("Name and endpoint are required")),
    };

    let node = service
        .add_node(&name, &endpoint, req.api_key.as_deref())
        .await?;
    Ok(Json(json!({
        "id": node.id,
        "message": "Node added successfully",
    })))
}

async fn delete_node<C: PeerConnector>(
    State(service): State<SharedService<C>>,
    id: Result<Path<NodeId>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(id) = accept(id)?;
    service.delete_node(id).await?;
    Ok(Json(json!({ "message": "Node deleted successfully" })))
}

async fn sync_node<C: PeerConnector>(
    State(service): State<SharedService<C>>,
    id: Result<Path<NodeId>, PathRejection>,
) -> ApiResult<Response> {
    let Path(id) = accept(id)?;
    let result = service.sync_node(id).await?;

    let response = match result.error {
        None => (
            StatusCode::OK,
            Json(json!({
                "message": "Sync successful",
                "synced_truths": result.synced_count,
            })),
        ),
        Some(error) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": error,
                "synced_truths": result.synced_count,
            })),
        ),
    };
    Ok(response.into_response())
}

async fn handshake<C: PeerConnector>(State(service): State<SharedService<C>>) -> Json<Value> {
    Json(json!({
        "node_id": service.node_id(),
        "message": "Handshake successful",
    }))
}

/// Inbound entry. Extra fields a peer sends (`id`, timestamps) are ignored.
#[derive(Debug, Deserialize)]
struct InboundTruth {
    #[serde(default)]
    content: String,
    source: Option<String>,
    #[serde(default)]
    topics: BTreeSet<String>,
}

#[derive(Debug, Deserialize)]
struct ReceiveRequest {
    #[serde(default)]
    truths: Vec<InboundTruth>,
}

async fn receive_truths<C: PeerConnector>(
    State(service): State<SharedService<C>>,
    body: Result<Json<ReceiveRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = accept(body)?;
    let batch = req
        .truths
        .into_iter()
        .map(|t| TruthPayload {
            content: t.content,
            source: t.source,
            topics: t.topics,
        })
        .collect();

    let summary = service.receive_truths(batch).await?;
    Ok(Json(json!({
        "message": format!("Successfully received {} truths", summary.received),
        "received": summary.received,
        "created": summary.created,
    })))
}

async fn health<C: PeerConnector>(State(service): State<SharedService<C>>) -> Json<HealthCheck> {
    Json(service.health().await)
}
