use std::sync::Arc;
use studio_backend::AssistantBackend;
use studio_core::{Document, ExpiryPolicy, IngestionReceipt};
use studio_error::{ErrorMetadataBuilder, Result, StudioError};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::enqueuer::BatchEnqueuer;
use crate::intake::validate_upload;
use crate::poller::{BatchPoller, PollerConfig};
use crate::provisioner::ContainerProvisioner;
use crate::registry::{PollerHandle, PollerRegistry};
use crate::submitter::UploadSubmitter;

#[derive(Debug, Clone, Default)]
pub struct IngestionConfig {
    pub poller: PollerConfig,
    pub expiry: ExpiryPolicy,
}

/// 上传管线：校验 -> 新建容器 -> 上传文件 -> 创建批次 -> 后台轮询
pub struct IngestionPipeline {
    provisioner: ContainerProvisioner,
    submitter: UploadSubmitter,
    enqueuer: BatchEnqueuer,
    registry: PollerRegistry,
}

impl IngestionPipeline {
    pub fn new(backend: Arc<dyn AssistantBackend>, config: IngestionConfig) -> Self {
        Self {
            provisioner: ContainerProvisioner::new(backend.clone(), config.expiry),
            submitter: UploadSubmitter::new(backend.clone()),
            enqueuer: BatchEnqueuer::new(backend.clone()),
            registry: PollerRegistry::new(BatchPoller::new(backend, config.poller)),
        }
    }

    pub fn registry(&self) -> &PollerRegistry {
        &self.registry
    }

    pub async fn submit_document_for_ingestion(
        &self,
        document: Option<Document>,
    ) -> Result<IngestionReceipt> {
        let (receipt, _) = self.submit_tracked(document).await?;
        Ok(receipt)
    }

    /// 同 `submit_document_for_ingestion`，额外返回后台轮询任务的句柄
    ///
    /// 批次创建失败不会让请求失败：文件与容器已存在，回执带 warning 返回。
    pub async fn submit_tracked(
        &self,
        document: Option<Document>,
    ) -> Result<(IngestionReceipt, Option<PollerHandle>)> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("ingest", %request_id);
        self.run(document, &request_id.to_string())
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        document: Option<Document>,
        request_id: &str,
    ) -> Result<(IngestionReceipt, Option<PollerHandle>)> {
        let document = validate_upload(document)?;
        let filename = document.filename.clone();
        let mime_type = document.effective_mime_type().to_string();
        let bytes = document.size();

        let container = self.provisioner.provision(&filename).await?;
        let file = self.submitter.submit(document).await?;

        let mut receipt = IngestionReceipt {
            remote_file_id: file.id.clone(),
            container_id: container.id.clone(),
            container_name: container.name.clone(),
            batch_id: None,
            batch_status: None,
            filename,
            bytes,
            mime_type,
            warning: None,
        };

        let batch = match self.enqueuer.enqueue(&container.id, &file.id).await {
            Ok(batch) => batch,
            Err(e @ StudioError::IngestionDegraded { .. }) => {
                let metadata = ErrorMetadataBuilder::new("studio-ingest")
                    .operation("create_file_batch")
                    .request_id(request_id)
                    .context("file_id", &file.id)
                    .build(&e);
                e.log(&metadata);
                receipt.warning = Some(e.user_message());
                return Ok((receipt, None));
            }
            Err(e) => return Err(e),
        };

        receipt.batch_id = Some(batch.id.clone());
        receipt.batch_status = Some(batch.status);

        let handle = if batch.status.is_terminal() {
            if !batch.status.is_success() {
                warn!(batch_id = %batch.id, status = batch.status.as_str(), "file batch already failed");
            }
            None
        } else {
            Some(self.registry.spawn(&batch).await)
        };

        info!(
            container_id = %receipt.container_id,
            file_id = %receipt.remote_file_id,
            batch_id = %batch.id,
            "document submitted for ingestion"
        );
        Ok((receipt, handle))
    }
}
