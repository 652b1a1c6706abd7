use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub use studio_error::{Result, StudioError};

use studio_core::{
    BatchStatus, ExpiryPolicy, FilePurpose, IngestionBatch, KnowledgeContainer, RemoteFile,
};

mod openai;

pub use openai::{OpenAiCompatClient, OpenAiCompatConfig};

/// 远端助手服务的能力接口：知识容器、文件、索引批次与助手本身
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    /// 创建知识容器（vector store）
    async fn create_container(
        &self,
        name: &str,
        expiry: ExpiryPolicy,
    ) -> Result<KnowledgeContainer>;

    /// 上传文件，返回远端文件标识
    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        mime_type: &str,
        purpose: FilePurpose,
    ) -> Result<RemoteFile>;

    /// 将文件加入容器，立即返回批次，不等待索引完成
    async fn create_ingestion_batch(
        &self,
        container_id: &str,
        file_ids: &[String],
    ) -> Result<IngestionBatch>;

    async fn get_ingestion_batch_status(
        &self,
        container_id: &str,
        batch_id: &str,
    ) -> Result<BatchStatus>;

    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<String>;

    async fn update_assistant(&self, assistant_id: &str, update: &AssistantUpdate) -> Result<()>;

    async fn delete_assistant(&self, assistant_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantSpec {
    pub name: String,
    pub instructions: String,
    pub model: String,
    pub vector_store_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssistantUpdate {
    pub name: Option<String>,
    pub instructions: Option<String>,
    pub model: Option<String>,
}

impl AssistantUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.instructions.is_none() && self.model.is_none()
    }
}

// ========== Provider Factory & Config ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum BackendConfig {
    #[serde(rename = "openai_compat")]
    OpenAiCompat {
        base_url: String,
        api_key: String,
        timeout_secs: Option<u64>,
    },
}

pub fn make_backend(cfg: BackendConfig) -> Result<Arc<dyn AssistantBackend>> {
    match cfg {
        BackendConfig::OpenAiCompat {
            base_url,
            api_key,
            timeout_secs,
        } => {
            if api_key.trim().is_empty() {
                return Err(StudioError::Configuration {
                    key: "backend.api_key".to_string(),
                    reason: "empty api key".to_string(),
                });
            }
            let client = OpenAiCompatClient::new(OpenAiCompatConfig {
                base_url,
                api_key,
                timeout: Duration::from_secs(timeout_secs.unwrap_or(60)),
            })?;
            Ok(Arc::new(client))
        }
    }
}
