use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use studio_core::{
    AssistantPatch, AssistantRecord, Document, IngestionReceipt, NewAssistant, MAX_UPLOAD_BYTES,
};
use studio_error::StudioError;
use studio_ingest::{BatchSnapshot, IngestionPipeline};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::assistants::AssistantService;

type ApiResult<T> = std::result::Result<Json<T>, StudioError>;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestionPipeline>,
    pub assistants: Arc<AssistantService>,
    pub upload_timeout: Duration,
}

pub fn build_router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/api/upload-file", post(upload_file))
        .route("/api/ingestion/:batch_id", get(ingestion_status))
        .route("/api/create-assistant", post(create_assistant))
        .route("/api/create-demo", get(create_demo))
        .route("/api/assistants", get(list_assistants))
        .route(
            "/api/assistants/:id",
            get(get_assistant)
                .patch(update_assistant)
                .delete(delete_assistant),
        )
        .route("/api/verify-access", post(verify_access))
        .route("/api/health", get(health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Serialize)]
struct UploadResponse {
    file: IngestionReceipt,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

/// 请求体超过 body limit 时 axum 报 413，保持为 TooLarge；其余解析错误是 400
fn multipart_error(err: MultipartError, read: u64) -> StudioError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        warn!(read, "upload exceeded request body limit");
        return StudioError::TooLarge {
            size: read.max(MAX_UPLOAD_BYTES + 1),
            limit: MAX_UPLOAD_BYTES,
        };
    }
    StudioError::InvalidRequest {
        reason: format!("Failed to read multipart data: {}", err),
    }
}

/// 取出 `file` 字段；其他字段忽略
///
/// 按块读取，超过上传上限后只计数不再缓存。
async fn read_document(multipart: &mut Multipart) -> Result<Option<Document>, StudioError> {
    let mut document = None;
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, 0))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let mime_type = field
            .content_type()
            .map(str::to_string)
            .filter(|m| !m.is_empty());

        let mut size: u64 = 0;
        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, size))? {
            size += chunk.len() as u64;
            if size <= MAX_UPLOAD_BYTES {
                bytes.extend_from_slice(&chunk);
            }
        }
        if size > MAX_UPLOAD_BYTES {
            warn!(%filename, size, "upload rejected before ingestion");
            return Err(StudioError::TooLarge {
                size,
                limit: MAX_UPLOAD_BYTES,
            });
        }
        document = Some(Document::new(bytes, &filename, mime_type));
    }
    Ok(document)
}

async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<UploadResponse> {
    let document = read_document(&mut multipart).await?;
    let mut receipt = tokio::time::timeout(
        state.upload_timeout,
        state.pipeline.submit_document_for_ingestion(document),
    )
    .await
    .map_err(|_| StudioError::Timeout {
        operation: "upload_file".to_string(),
        timeout_ms: state.upload_timeout.as_millis() as u64,
    })??;

    let warning = receipt.warning.take();
    Ok(Json(UploadResponse {
        file: receipt,
        warning,
    }))
}

async fn ingestion_status(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> ApiResult<BatchSnapshot> {
    state
        .pipeline
        .registry()
        .snapshot(&batch_id)
        .await
        .map(Json)
        .ok_or_else(|| StudioError::NotFound {
            resource: format!("file batch {}", batch_id),
        })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateAssistantResponse {
    assistant_id: String,
    shareable_url: String,
    db_record: AssistantRecord,
}

async fn create_assistant(
    State(state): State<AppState>,
    Json(req): Json<NewAssistant>,
) -> ApiResult<CreateAssistantResponse> {
    let record = state.assistants.create(req).await?;
    Ok(Json(CreateAssistantResponse {
        assistant_id: record.id.clone(),
        shareable_url: record.shareable_url.clone(),
        db_record: record,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DemoResponse {
    assistant_id: String,
    assistant: AssistantRecord,
}

/// 幂等：已有演示助手时直接返回它
async fn create_demo(State(state): State<AppState>) -> ApiResult<DemoResponse> {
    let assistant = state.assistants.ensure_demo().await?;
    Ok(Json(DemoResponse {
        assistant_id: assistant.id.clone(),
        assistant,
    }))
}

async fn list_assistants(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let assistants = state.assistants.list().await?;
    Ok(Json(json!({ "assistants": assistants })))
}

async fn get_assistant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    let assistant = state.assistants.get(&id).await?;
    Ok(Json(json!({ "assistant": assistant })))
}

async fn update_assistant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<AssistantPatch>,
) -> ApiResult<serde_json::Value> {
    let assistant = state.assistants.update(&id, &patch).await?;
    Ok(Json(json!({ "success": true, "assistant": assistant })))
}

async fn delete_assistant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    state.assistants.delete(&id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Educational roleplay deleted successfully"
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyAccessReq {
    #[serde(default)]
    assistant_id: String,
    #[serde(default)]
    access_code: String,
}

async fn verify_access(
    State(state): State<AppState>,
    Json(req): Json<VerifyAccessReq>,
) -> ApiResult<serde_json::Value> {
    let record = state
        .assistants
        .verify_access(&req.assistant_id, &req.access_code)
        .await?;
    info!(id = %record.id, "access verified");
    Ok(Json(json!({
        "verified": true,
        "assistant": { "id": record.id, "name": record.name }
    })))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "activePollers": state.pipeline.registry().active_count().await,
    }))
}
