use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use studio_backend::{AssistantBackend, AssistantSpec, AssistantUpdate};
use studio_core::{
    BatchStatus, ExpiryPolicy, FilePurpose, IngestionBatch, KnowledgeContainer, RemoteFile,
};
use studio_error::{Result, StudioError};

/// 内存中的远端服务替身，可预设失败与批次状态序列；用于测试与本地演示
#[derive(Default)]
pub struct MockBackend {
    fail_container: bool,
    fail_upload: Option<String>,
    fail_batch: bool,
    fail_assistant_delete: bool,
    initial_batch_status: Option<BatchStatus>,
    statuses: Mutex<VecDeque<Result<BatchStatus>>>,
    container_names: Mutex<Vec<String>>,
    uploaded_mime_types: Mutex<Vec<String>>,
    assistants: Mutex<HashMap<String, AssistantSpec>>,
    container_calls: AtomicUsize,
    upload_calls: AtomicUsize,
    batch_calls: AtomicUsize,
    status_calls: AtomicUsize,
    seq: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_container(mut self) -> Self {
        self.fail_container = true;
        self
    }

    pub fn failing_upload(mut self, message: &str) -> Self {
        self.fail_upload = Some(message.to_string());
        self
    }

    pub fn failing_batch(mut self) -> Self {
        self.fail_batch = true;
        self
    }

    pub fn failing_assistant_delete(mut self) -> Self {
        self.fail_assistant_delete = true;
        self
    }

    /// 新建批次的初始状态，默认 in_progress
    pub fn with_initial_status(mut self, status: BatchStatus) -> Self {
        self.initial_batch_status = Some(status);
        self
    }

    /// 依次返回的状态检查结果；用完后一直返回 in_progress
    pub fn with_statuses(self, statuses: Vec<Result<BatchStatus>>) -> Self {
        *self.statuses.lock().unwrap_or_else(|p| p.into_inner()) = statuses.into();
        self
    }

    pub fn transient_error() -> StudioError {
        StudioError::Network {
            operation: "retrieve_file_batch".to_string(),
            message: "connection reset".to_string(),
        }
    }

    pub fn container_calls(&self) -> usize {
        self.container_calls.load(Ordering::SeqCst)
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn remote_calls(&self) -> usize {
        self.container_calls() + self.upload_calls() + self.batch_calls() + self.status_calls()
    }

    pub fn container_names(&self) -> Vec<String> {
        self.container_names
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn uploaded_mime_types(&self) -> Vec<String> {
        self.uploaded_mime_types
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn assistant(&self, id: &str) -> Option<AssistantSpec> {
        self.assistants
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .cloned()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.seq.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn unavailable(operation: &str) -> StudioError {
        StudioError::RemoteService {
            provider: "mock".to_string(),
            status: 503,
            message: format!("{} unavailable", operation),
            retry_after: None,
        }
    }
}

#[async_trait]
impl AssistantBackend for MockBackend {
    async fn create_container(
        &self,
        name: &str,
        expiry: ExpiryPolicy,
    ) -> Result<KnowledgeContainer> {
        self.container_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_container {
            return Err(Self::unavailable("create_container"));
        }
        self.container_names
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(name.to_string());
        Ok(KnowledgeContainer {
            id: self.next_id("vs"),
            name: name.to_string(),
            created_at: Utc::now(),
            expiry,
        })
    }

    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        mime_type: &str,
        purpose: FilePurpose,
    ) -> Result<RemoteFile> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_upload {
            return Err(StudioError::RemoteService {
                provider: "mock".to_string(),
                status: 400,
                message: message.clone(),
                retry_after: None,
            });
        }
        self.uploaded_mime_types
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(mime_type.to_string());
        Ok(RemoteFile {
            id: self.next_id("file"),
            filename: filename.to_string(),
            bytes: bytes.len() as u64,
            purpose,
        })
    }

    async fn create_ingestion_batch(
        &self,
        container_id: &str,
        file_ids: &[String],
    ) -> Result<IngestionBatch> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_batch {
            return Err(Self::unavailable("create_file_batch"));
        }
        Ok(IngestionBatch {
            id: self.next_id("vsfb"),
            container_id: container_id.to_string(),
            file_ids: file_ids.to_vec(),
            status: self.initial_batch_status.unwrap_or(BatchStatus::InProgress),
        })
    }

    async fn get_ingestion_batch_status(
        &self,
        _container_id: &str,
        _batch_id: &str,
    ) -> Result<BatchStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .unwrap_or(Ok(BatchStatus::InProgress))
    }

    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<String> {
        let id = self.next_id("asst");
        self.assistants
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(id.clone(), spec.clone());
        Ok(id)
    }

    async fn update_assistant(&self, assistant_id: &str, update: &AssistantUpdate) -> Result<()> {
        let mut assistants = self.assistants.lock().unwrap_or_else(|p| p.into_inner());
        let spec = assistants
            .get_mut(assistant_id)
            .ok_or_else(|| StudioError::RemoteService {
                provider: "mock".to_string(),
                status: 404,
                message: format!("No assistant found with id '{}'", assistant_id),
                retry_after: None,
            })?;
        if let Some(name) = &update.name {
            spec.name = name.clone();
        }
        if let Some(instructions) = &update.instructions {
            spec.instructions = instructions.clone();
        }
        if let Some(model) = &update.model {
            spec.model = model.clone();
        }
        Ok(())
    }

    async fn delete_assistant(&self, assistant_id: &str) -> Result<()> {
        if self.fail_assistant_delete {
            return Err(Self::unavailable("delete_assistant"));
        }
        self.assistants
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(assistant_id);
        Ok(())
    }
}
