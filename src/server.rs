//! HTTP API server.
//!
//! Exposes the ingestion pipeline and chat orchestrator over axum with a
//! permissive CORS layer. Every JSON endpoint answers with the same
//! envelope: `{ code, info, data? }`, where `"0000"` is success, `"0400"`
//! a client error, and `"0500"` a server error. Internal error details go
//! to the log; the envelope only carries a short summary.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Form, Json, Router};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::chat::OllamaChat;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::fetch::RepoFetcher;
use crate::ingest::{IngestError, IngestPipeline, IngestReport, SourceFile};
use crate::orchestrate::{ChatOrchestrator, ChatRequest};
use crate::registry::TagRegistry;
use crate::store::{QdrantStore, VectorStore};

/// Largest accepted upload body (all files combined).
const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

const CODE_OK: &str = "0000";
const CODE_CLIENT_ERROR: &str = "0400";
const CODE_SERVER_ERROR: &str = "0500";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestPipeline>,
    pub orchestrator: Arc<ChatOrchestrator>,
    pub registry: TagRegistry,
    pub default_model: String,
}

impl AppState {
    /// Wire the full production stack from config.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let store = QdrantStore::new(&config.vector, embedder)?;
        store
            .ensure_collection()
            .await
            .context("Failed to prepare vector collection")?;
        let store: Arc<dyn VectorStore> = Arc::new(store);

        let registry = TagRegistry::from_config(&config.registry).await?;
        let fetcher = RepoFetcher::new(&config.fetch);
        let pipeline = Arc::new(IngestPipeline::new(
            Arc::clone(&store),
            registry.clone(),
            fetcher,
            config.chunking.clone(),
            config.ingest.clone(),
        ));
        let chat = Arc::new(OllamaChat::new(&config.chat)?);
        let orchestrator = Arc::new(ChatOrchestrator::new(store, chat, config.retrieval.top_k));

        Ok(Self {
            pipeline,
            orchestrator,
            registry,
            default_model: config.chat.default_model.clone(),
        })
    }
}

/// Uniform response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: String,
    pub info: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            code: CODE_OK.to_string(),
            info: "success".to_string(),
            data: Some(data),
        })
    }
}

/// Error half of the envelope, carrying the HTTP status to answer with.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    info: String,
}

impl ApiError {
    fn client(info: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: CODE_CLIENT_ERROR,
            info: info.into(),
        }
    }

    fn server(info: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: CODE_SERVER_ERROR,
            info: info.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ApiResponse::<()> {
            code: self.code.to_string(),
            info: self.info,
            data: None,
        });
        (self.status, body).into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        if err.is_client_error() {
            ApiError::client(err.to_string())
        } else {
            tracing::error!("ingestion failed: {err:#}");
            ApiError::server("ingestion failed")
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("request failed: {err:#}");
        ApiError::server("internal error")
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/rag/tags", get(list_tags))
        .route("/api/v1/rag/tags/{tag}", delete(delete_tag))
        .route("/api/v1/rag/upload", post(upload))
        .route("/api/v1/rag/repository", post(analyze_repository))
        .route("/api/v1/chat/generate", get(generate))
        .route("/api/v1/chat/generate_stream", get(generate_stream))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn run_server(bind: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    tracing::info!(bind, "rag-harness API listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn list_tags(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<String>>>, ApiError> {
    let tags = state.registry.list().await?;
    Ok(ApiResponse::ok(tags))
}

async fn delete_tag(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Result<Json<ApiResponse<usize>>, ApiError> {
    let removed = state.pipeline.delete_tag(&tag).await?;
    Ok(ApiResponse::ok(removed))
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<IngestReport>>, ApiError> {
    let mut tag = String::new();
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::client(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("ragTag") => {
                tag = field
                    .text()
                    .await
                    .map_err(|e| ApiError::client(format!("invalid ragTag field: {e}")))?;
            }
            Some("files") => {
                let filename = field
                    .file_name()
                    .unwrap_or("upload.bin")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::client(format!("invalid file field: {e}")))?;
                files.push(SourceFile {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    let report = state.pipeline.ingest(&tag, files).await?;
    Ok(ApiResponse::ok(report))
}

#[derive(Debug, Deserialize)]
struct RepositoryRequest {
    #[serde(rename = "repoUrl")]
    repo_url: String,
}

/// Body extractor accepting either a urlencoded form or a JSON object,
/// dispatched on the request's content type.
struct FormOrJson<T>(T);

impl<S, T> FromRequest<S> for FormOrJson<T>
where
    S: Send + Sync,
    T: serde::de::DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim_start().starts_with("application/json"));

        if is_json {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|e| ApiError::client(format!("invalid JSON body: {e}")))?;
            Ok(Self(value))
        } else {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|e| ApiError::client(format!("invalid form body: {e}")))?;
            Ok(Self(value))
        }
    }
}

async fn analyze_repository(
    State(state): State<AppState>,
    FormOrJson(request): FormOrJson<RepositoryRequest>,
) -> Result<Json<ApiResponse<IngestReport>>, ApiError> {
    if request.repo_url.trim().is_empty() {
        return Err(ApiError::client("repoUrl must not be blank"));
    }
    let report = state.pipeline.ingest_repository(&request.repo_url).await?;
    Ok(ApiResponse::ok(report))
}

#[derive(Debug, Deserialize)]
struct GenerateParams {
    model: Option<String>,
    message: String,
}

async fn generate(
    State(state): State<AppState>,
    Query(params): Query<GenerateParams>,
) -> Result<Json<ApiResponse<String>>, ApiError> {
    let model = params.model.unwrap_or_else(|| state.default_model.clone());
    let answer = state.orchestrator.complete(&model, &params.message).await?;
    Ok(ApiResponse::ok(answer))
}

#[derive(Debug, Deserialize)]
struct GenerateStreamParams {
    model: Option<String>,
    message: String,
    #[serde(rename = "ragTag", default)]
    rag_tag: String,
    #[serde(rename = "memoryId", default)]
    memory_id: String,
}

async fn generate_stream(
    State(state): State<AppState>,
    Query(params): Query<GenerateStreamParams>,
) -> Result<Response, ApiError> {
    let model = params.model.unwrap_or_else(|| state.default_model.clone());
    let request =
        ChatRequest::from_parts(model, params.message, params.rag_tag, params.memory_id);
    let stream = state.orchestrator.respond(request).await?;

    // Dropping the body on client disconnect drops the model stream too.
    let body = Body::from_stream(
        stream.map(|fragment| fragment.map(Bytes::from).map_err(axum::BoxError::from)),
    );
    Response::builder()
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(body)
        .map_err(|e| ApiError::server(format!("failed to build response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post_body(content_type: &str, body: &str) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .uri("/api/v1/rag/repository")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn repository_body_parses_as_form() {
        let req = post_body(
            "application/x-www-form-urlencoded",
            "repoUrl=https%3A%2F%2Fgit.example.com%2Facme%2Fwidgets.git",
        );
        let FormOrJson(parsed) = FormOrJson::<RepositoryRequest>::from_request(req, &())
            .await
            .unwrap();
        assert_eq!(parsed.repo_url, "https://git.example.com/acme/widgets.git");
    }

    #[tokio::test]
    async fn repository_body_parses_as_json() {
        let req = post_body(
            "application/json; charset=utf-8",
            r#"{"repoUrl":"https://git.example.com/acme/widgets.git"}"#,
        );
        let FormOrJson(parsed) = FormOrJson::<RepositoryRequest>::from_request(req, &())
            .await
            .unwrap();
        assert_eq!(parsed.repo_url, "https://git.example.com/acme/widgets.git");
    }

    #[tokio::test]
    async fn malformed_json_body_is_a_client_error() {
        let req = post_body("application/json", "{not json");
        let err = FormOrJson::<RepositoryRequest>::from_request(req, &())
            .await
            .map(|_| ())
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, CODE_CLIENT_ERROR);
    }
}
