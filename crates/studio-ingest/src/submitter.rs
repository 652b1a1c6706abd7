use std::sync::Arc;
use studio_backend::AssistantBackend;
use studio_core::{Document, FilePurpose, RemoteFile};
use studio_error::{Result, StudioError};
use tracing::{error, info, instrument};

use crate::provisioner::remote_message;

/// 把文件字节转交给远端服务；单次调用，不自动重试
pub struct UploadSubmitter {
    backend: Arc<dyn AssistantBackend>,
}

impl UploadSubmitter {
    pub fn new(backend: Arc<dyn AssistantBackend>) -> Self {
        Self { backend }
    }

    #[instrument(skip(self, document), fields(filename = %document.filename, size = document.size()))]
    pub async fn submit(&self, document: Document) -> Result<RemoteFile> {
        let mime_type = document.effective_mime_type().to_string();
        let started = std::time::Instant::now();
        let result = self
            .backend
            .upload_file(
                document.bytes,
                &document.filename,
                &mime_type,
                FilePurpose::Assistants,
            )
            .await;

        match result {
            Ok(file) => {
                info!(
                    file_id = %file.id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "file uploaded"
                );
                Ok(file)
            }
            Err(e) => {
                error!(filename = %document.filename, error = %e, "file upload failed");
                Err(StudioError::UploadFailed {
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

    #[tokio::test]
    async fn test_missing_mime_defaults_to_octet_stream() {
        let backend = Arc::new(MockBackend::new());
        let submitter = UploadSubmitter::new(backend.clone());
        let file = submitter
            .submit(Document::new(b"hello".to_vec(), "notes.txt", None))
            .await
            .unwrap();
        assert_eq!(file.bytes, 5);
        assert_eq!(file.purpose, FilePurpose::Assistants);
        assert_eq!(
            backend.uploaded_mime_types(),
            vec!["application/octet-stream".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failure_carries_remote_message_and_is_not_retried() {
        let backend = Arc::new(MockBackend::new().failing_upload("Invalid file format"));
        let submitter = UploadSubmitter::new(backend.clone());
        let err = submitter
            .submit(Document::new(b"hello".to_vec(), "notes.txt", Some("text/plain".into())))
            .await
            .unwrap_err();
        match err {
            StudioError::UploadFailed { message } => assert_eq!(message, "Invalid file format"),
            other => panic!("expected UploadFailed, got {:?}", other),
        }
        assert_eq!(backend.upload_calls(), 1);
    }
}
