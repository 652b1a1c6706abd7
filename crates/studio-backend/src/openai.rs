use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{multipart, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use studio_core::{
    BatchStatus, ExpiryAnchor, ExpiryPolicy, FilePurpose, IngestionBatch, KnowledgeContainer,
    RemoteFile,
};

use crate::{AssistantBackend, AssistantSpec, AssistantUpdate, Result, StudioError};

const PROVIDER: &str = "openai_compat";

// ========== OpenAI-compatible assistants v2 ==========

#[derive(Clone)]
pub struct OpenAiCompatConfig {
    pub base_url: String, // e.g. https://api.openai.com
    pub api_key: String,  // Bearer token
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct OpenAiCompatClient {
    http: Client,
    cfg: OpenAiCompatConfig,
}

impl OpenAiCompatClient {
    pub fn new(cfg: OpenAiCompatConfig) -> Result<Self> {
        let http = Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self { http, cfg })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.cfg.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder, operation: &str) -> Result<T> {
        let resp = self.authed(req).send().await.map_err(|e| {
            if e.is_timeout() {
                StudioError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: self.cfg.timeout.as_millis() as u64,
                }
            } else {
                StudioError::Network {
                    operation: operation.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let txt = resp.text().await.unwrap_or_default();
            return Err(remote_error(status, &txt, retry_after));
        }

        resp.json::<T>().await.map_err(|e| StudioError::Serialization {
            format: "json".to_string(),
            message: format!("{}: {}", operation, e),
        })
    }
}

/// 优先取 `{"error": {"message": ...}}` 中的消息，否则回退为原始响应体
fn remote_error(status: u16, body: &str, retry_after: Option<Duration>) -> StudioError {
    let message = serde_json::from_str::<OaiErrorResp>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| format!("status={} body={}", status, body));
    StudioError::RemoteService {
        provider: PROVIDER.to_string(),
        status,
        message,
        retry_after,
    }
}

fn timestamp(secs: Option<i64>) -> DateTime<Utc> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
        .unwrap_or_else(Utc::now)
}

#[derive(Deserialize)]
struct OaiErrorBody {
    message: String,
}

#[derive(Deserialize)]
struct OaiErrorResp {
    error: OaiErrorBody,
}

#[derive(Serialize)]
struct OaiExpiresAfter {
    anchor: ExpiryAnchor,
    days: u32,
}

#[derive(Serialize)]
struct OaiVectorStoreReq<'a> {
    name: &'a str,
    expires_after: OaiExpiresAfter,
}

#[derive(Deserialize)]
struct OaiVectorStoreResp {
    id: String,
    name: Option<String>,
    created_at: Option<i64>,
}

#[derive(Deserialize)]
struct OaiFileResp {
    id: String,
    filename: Option<String>,
    bytes: Option<u64>,
}

#[derive(Serialize)]
struct OaiFileBatchReq<'a> {
    file_ids: &'a [String],
}

#[derive(Deserialize)]
struct OaiFileBatchResp {
    id: String,
    vector_store_id: Option<String>,
    status: BatchStatus,
}

#[derive(Serialize)]
struct OaiTool {
    r#type: &'static str,
}

#[derive(Serialize)]
struct OaiFileSearchResources {
    vector_store_ids: Vec<String>,
}

#[derive(Serialize)]
struct OaiToolResources {
    file_search: OaiFileSearchResources,
}

#[derive(Serialize)]
struct OaiAssistantReq<'a> {
    name: &'a str,
    instructions: &'a str,
    model: &'a str,
    tools: Vec<OaiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_resources: Option<OaiToolResources>,
}

#[derive(Serialize)]
struct OaiAssistantUpdateReq<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Deserialize)]
struct OaiAssistantResp {
    id: String,
}

#[derive(Deserialize)]
struct OaiDeleteResp {
    deleted: bool,
}

#[async_trait]
impl AssistantBackend for OpenAiCompatClient {
    #[instrument(skip(self))]
    async fn create_container(
        &self,
        name: &str,
        expiry: ExpiryPolicy,
    ) -> Result<KnowledgeContainer> {
        let body = OaiVectorStoreReq {
            name,
            expires_after: OaiExpiresAfter {
                anchor: expiry.anchor,
                days: expiry.days,
            },
        };
        let data: OaiVectorStoreResp = self
            .send(
                self.http.post(self.url("vector_stores")).json(&body),
                "create_vector_store",
            )
            .await?;
        debug!(container_id = %data.id, "vector store created");
        Ok(KnowledgeContainer {
            id: data.id,
            name: data.name.unwrap_or_else(|| name.to_string()),
            created_at: timestamp(data.created_at),
            expiry,
        })
    }

    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        mime_type: &str,
        purpose: FilePurpose,
    ) -> Result<RemoteFile> {
        let size = bytes.len() as u64;
        let part = multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime_type)
            .map_err(|e| StudioError::InvalidRequest {
                reason: format!("invalid mime type {}: {}", mime_type, e),
            })?;
        let form = multipart::Form::new()
            .text("purpose", purpose.as_str())
            .part("file", part);

        let data: OaiFileResp = self
            .send(
                self.http.post(self.url("files")).multipart(form),
                "upload_file",
            )
            .await?;
        Ok(RemoteFile {
            id: data.id,
            filename: data.filename.unwrap_or_else(|| filename.to_string()),
            bytes: data.bytes.unwrap_or(size),
            purpose,
        })
    }

    #[instrument(skip(self))]
    async fn create_ingestion_batch(
        &self,
        container_id: &str,
        file_ids: &[String],
    ) -> Result<IngestionBatch> {
        let url = self.url(&format!("vector_stores/{}/file_batches", container_id));
        let data: OaiFileBatchResp = self
            .send(
                self.http.post(url).json(&OaiFileBatchReq { file_ids }),
                "create_file_batch",
            )
            .await?;
        Ok(IngestionBatch {
            id: data.id,
            container_id: data
                .vector_store_id
                .unwrap_or_else(|| container_id.to_string()),
            file_ids: file_ids.to_vec(),
            status: data.status,
        })
    }

    #[instrument(skip(self))]
    async fn get_ingestion_batch_status(
        &self,
        container_id: &str,
        batch_id: &str,
    ) -> Result<BatchStatus> {
        let url = self.url(&format!(
            "vector_stores/{}/file_batches/{}",
            container_id, batch_id
        ));
        let data: OaiFileBatchResp = self
            .send(self.http.get(url), "retrieve_file_batch")
            .await?;
        Ok(data.status)
    }

    #[instrument(skip(self, spec), fields(name = %spec.name, model = %spec.model))]
    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<String> {
        let tool_resources = if spec.vector_store_ids.is_empty() {
            None
        } else {
            Some(OaiToolResources {
                file_search: OaiFileSearchResources {
                    vector_store_ids: spec.vector_store_ids.clone(),
                },
            })
        };
        let body = OaiAssistantReq {
            name: &spec.name,
            instructions: &spec.instructions,
            model: &spec.model,
            tools: vec![OaiTool {
                r#type: "file_search",
            }],
            tool_resources,
        };
        let data: OaiAssistantResp = self
            .send(
                self.http.post(self.url("assistants")).json(&body),
                "create_assistant",
            )
            .await?;
        Ok(data.id)
    }

    #[instrument(skip(self, update))]
    async fn update_assistant(&self, assistant_id: &str, update: &AssistantUpdate) -> Result<()> {
        let body = OaiAssistantUpdateReq {
            name: update.name.as_deref(),
            instructions: update.instructions.as_deref(),
            model: update.model.as_deref(),
        };
        let _: OaiAssistantResp = self
            .send(
                self.http
                    .post(self.url(&format!("assistants/{}", assistant_id)))
                    .json(&body),
                "update_assistant",
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_assistant(&self, assistant_id: &str) -> Result<()> {
        let data: OaiDeleteResp = self
            .send(
                self.http
                    .delete(self.url(&format!("assistants/{}", assistant_id))),
                "delete_assistant",
            )
            .await?;
        if !data.deleted {
            return Err(StudioError::RemoteService {
                provider: PROVIDER.to_string(),
                status: 200,
                message: format!("assistant {} was not deleted", assistant_id),
                retry_after: None,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> OpenAiCompatClient {
        OpenAiCompatClient::new(OpenAiCompatConfig {
            base_url: base.to_string(),
            api_key: "sk-test".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        let c = client("https://api.openai.com/");
        assert_eq!(
            c.url("vector_stores/vs_1/file_batches"),
            "https://api.openai.com/v1/vector_stores/vs_1/file_batches"
        );
    }

    #[test]
    fn test_remote_error_prefers_vendor_message() {
        let err = remote_error(
            400,
            r#"{"error":{"message":"Invalid file format","type":"invalid_request_error"}}"#,
            None,
        );
        match err {
            StudioError::RemoteService {
                status, message, ..
            } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid file format");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let err = remote_error(502, "bad gateway", Some(Duration::from_secs(2)));
        assert!(err.to_string().contains("bad gateway"));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_vector_store_request_shape() {
        let body = OaiVectorStoreReq {
            name: "notes - 2024-01-01T00:00:00.000Z",
            expires_after: OaiExpiresAfter {
                anchor: ExpiryAnchor::LastActiveAt,
                days: 30,
            },
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["expires_after"]["anchor"], "last_active_at");
        assert_eq!(v["expires_after"]["days"], 30);
    }

    #[test]
    fn test_file_batch_response_parses_status() {
        let data: OaiFileBatchResp = serde_json::from_str(
            r#"{"id":"vsfb_1","object":"vector_store.file_batch","vector_store_id":"vs_1","status":"in_progress","file_counts":{"in_progress":1}}"#,
        )
        .unwrap();
        assert_eq!(data.id, "vsfb_1");
        assert_eq!(data.status, BatchStatus::InProgress);
    }

    #[test]
    fn test_assistant_request_includes_vector_stores() {
        let body = OaiAssistantReq {
            name: "Tutor",
            instructions: "Be helpful",
            model: "gpt-4-turbo-preview",
            tools: vec![OaiTool {
                r#type: "file_search",
            }],
            tool_resources: Some(OaiToolResources {
                file_search: OaiFileSearchResources {
                    vector_store_ids: vec!["vs_1".into()],
                },
            }),
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["tools"][0]["type"], "file_search");
        assert_eq!(v["tool_resources"]["file_search"]["vector_store_ids"][0], "vs_1");
    }
}
