use std::sync::Arc;
use studio_backend::AssistantBackend;
use studio_core::IngestionBatch;
use studio_error::{Result, StudioError};
use tracing::{info, instrument, warn};

use crate::provisioner::remote_message;

/// 创建只含一个文件的索引批次，立即返回，不等待完成
pub struct BatchEnqueuer {
    backend: Arc<dyn AssistantBackend>,
}

impl BatchEnqueuer {
    pub fn new(backend: Arc<dyn AssistantBackend>) -> Self {
        Self { backend }
    }

    /// 失败时返回 `IngestionDegraded`，由管线降级为 warning
    #[instrument(skip(self))]
    pub async fn enqueue(&self, container_id: &str, file_id: &str) -> Result<IngestionBatch> {
        let file_ids = vec![file_id.to_string()];
        match self
            .backend
            .create_ingestion_batch(container_id, &file_ids)
            .await
        {
            Ok(batch) => {
                info!(batch_id = %batch.id, status = batch.status.as_str(), "file batch created");
                Ok(batch)
            }
            Err(e) => {
                warn!(error = %e, "file batch creation failed");
                Err(StudioError::IngestionDegraded {
                    container_id: container_id.to_string(),
                    message: remote_message(&e),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use studio_core::BatchStatus;

    #[tokio::test]
    async fn test_batch_references_exactly_one_file() {
        let backend = Arc::new(MockBackend::new());
        let enqueuer = BatchEnqueuer::new(backend);
        let batch = enqueuer.enqueue("vs_1", "file_1").await.unwrap();
        assert_eq!(batch.container_id, "vs_1");
        assert_eq!(batch.file_ids, vec!["file_1".to_string()]);
        assert_eq!(batch.status, BatchStatus::InProgress);
    }

    #[tokio::test]
    async fn test_failure_is_degraded_not_fatal() {
        let backend = Arc::new(MockBackend::new().failing_batch());
        let enqueuer = BatchEnqueuer::new(backend);
        let err = enqueuer.enqueue("vs_1", "file_1").await.unwrap_err();
        assert!(matches!(err, StudioError::IngestionDegraded { .. }));
        assert_eq!(err.to_http_status(), 200);
    }
}
