//! HTTP surface for the platform core
//!
//! Four endpoints: multipart document upload, transactional document
//! delete, knowledge base search, and the streaming agent chat. The
//! non-streaming handlers run under a short request timeout; the chat
//! stream is governed only by client disconnect.

use crate::config::PlatformConfig;
use crate::error::PlatformError;
use crate::ingest::IngestService;
use crate::runner::{sse_frames, AgentMessageRequest, AgentRunner};
use crate::search::{SearchResponse, SearchService};
use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub ingest: IngestService,
    pub search: Arc<SearchService>,
    pub runner: AgentRunner,
    pub config: Arc<PlatformConfig>,
}

/// Build the core API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/knowledge/{id}/documents", post(upload_document))
        .route(
            "/api/v1/knowledge/{id}/documents/{documentId}",
            delete(delete_document),
        )
        .route("/api/v1/knowledge/{id}/search", post(search_knowledge_base))
        .route("/api/v1/agents/chat", post(agent_chat))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Platform error wrapper carrying the stable code to the client
#[derive(Debug)]
pub struct ApiError(PlatformError);

impl From<PlatformError> for ApiError {
    fn from(error: PlatformError) -> Self {
        ApiError(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        // repository details stay server-side; the client sees the code
        let message = match &self.0 {
            PlatformError::Database(_) => "database error".to_string(),
            other => other.to_string(),
        };
        let body = Json(json!({"code": self.0.code(), "message": message}));
        (status, body).into_response()
    }
}

fn user_id_from_headers(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or_else(|| ApiError(PlatformError::Config("missing or invalid X-User-Id".to_string())))
}

/// Wrap a non-streaming operation in the short request timeout
async fn with_timeout<T>(
    seconds: u64,
    operation: impl std::future::Future<Output = Result<T, PlatformError>>,
) -> Result<T, ApiError> {
    tokio::time::timeout(Duration::from_secs(seconds), operation)
        .await
        .map_err(|_| ApiError(PlatformError::Internal("request timed out".to_string())))?
        .map_err(ApiError)
}

async fn upload_document(
    State(state): State<AppState>,
    Path(kb_id): Path<Uuid>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user_id_from_headers(&headers)?;

    let mut file_name = None;
    let mut bytes = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError(PlatformError::FileLoad(e.to_string())))?
    {
        if field.name() == Some("file") {
            file_name = field.file_name().map(String::from);
            bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| ApiError(PlatformError::FileLoad(e.to_string())))?,
            );
            break;
        }
    }
    let file_name =
        file_name.ok_or_else(|| ApiError(PlatformError::FileLoad("missing file field".to_string())))?;
    let bytes =
        bytes.ok_or_else(|| ApiError(PlatformError::FileLoad("missing file field".to_string())))?;

    info!("upload {} ({} bytes) into kb {}", file_name, bytes.len(), kb_id);
    let timeout = state.config.http.request_timeout_secs;
    let document = with_timeout(
        timeout,
        state.ingest.ingest(kb_id, user_id, &file_name, bytes.to_vec()),
    )
    .await?;
    Ok(Json(document))
}

async fn delete_document(
    State(state): State<AppState>,
    Path((kb_id, document_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let timeout = state.config.http.request_timeout_secs;
    with_timeout(
        timeout,
        state.ingest.delete_document(kb_id, user_id, document_id),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
}

async fn search_knowledge_base(
    State(state): State<AppState>,
    Path(kb_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let timeout = state.config.http.request_timeout_secs;
    let response = with_timeout(
        timeout,
        state.search.search(kb_id, user_id, &request.query),
    )
    .await?;
    Ok(Json(response))
}

/// The streaming chat endpoint. The response is a long-lived
/// `text/event-stream`; there is no server-side timeout, the stream ends
/// on `[DONE]`, `[ERROR]` or client disconnect (which cancels the
/// producer through the frame stream's drop guard).
async fn agent_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AgentMessageRequest>,
) -> Result<Response, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    info!("agent chat for agent {}", request.agent_id);

    let token = CancellationToken::new();
    let (data_rx, err_rx) = state.runner.run(token.clone(), user_id, request);
    let heartbeat = Duration::from_secs(state.config.http.heartbeat_secs);
    let frames = sse_frames(token, data_rx, err_rx, heartbeat)
        .map(Ok::<_, Infallible>);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(frames))
        .map_err(|e| ApiError(PlatformError::Internal(e.to_string())))?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_header_parsing() {
        let mut headers = HeaderMap::new();
        assert!(user_id_from_headers(&headers).is_err());

        headers.insert("x-user-id", "not-a-uuid".parse().unwrap());
        assert!(user_id_from_headers(&headers).is_err());

        let id = Uuid::new_v4();
        headers.insert("x-user-id", id.to_string().parse().unwrap());
        assert_eq!(user_id_from_headers(&headers).unwrap(), id);
    }

    #[test]
    fn test_api_error_hides_database_details() {
        let error = ApiError(PlatformError::Database(sqlx::Error::PoolTimedOut));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let error = ApiError(PlatformError::KnowledgeBaseNotFound);
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
