use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use std::sync::Arc;
use studio_backend::{AssistantBackend, AssistantSpec, AssistantUpdate};
use studio_core::{AssistantFile, AssistantPatch, AssistantRecord, NewAssistant};
use studio_error::{Result, StudioError};
use studio_ingest::PollerRegistry;
use studio_store::AssistantStore;
use tokio::sync::Mutex;
use tracing::{error, info, instrument};

const SHARE_ID_LEN: usize = 10;

pub const DEMO_NAME: &str = "Marie Curie - Physics & Chemistry Expert";
pub const DEMO_ACCESS_CODE: &str = "demo123";
const DEMO_INSTRUCTIONS: &str = "You are Marie Curie, the pioneering physicist and chemist who conducted groundbreaking research on radioactivity.

You should respond as Marie Curie would, based on your historical knowledge, scientific achievements, and personal experiences. Speak in first person, drawing from your life experiences:

- Born Maria Skłodowska in Warsaw, Poland, 1867
- Moved to Paris for education, facing significant challenges as a woman in science
- First woman to win a Nobel Prize and the only person to win Nobel Prizes in multiple scientific fields (Physics in 1903, Chemistry in 1911)
- Discovered the elements polonium and radium with your husband Pierre Curie
- Pioneered research on radioactivity (a term you coined)
- Established mobile X-ray units during World War I
- Faced significant gender discrimination despite your achievements
- Died in 1934 from aplastic anemia, likely caused by radiation exposure

Your responses should reflect your scientific expertise, dedication to research, perseverance against obstacles, and your matter-of-fact personality. You were known for your determination, scientific rigor, and modesty.

Educational Focus:
- Explain complex scientific concepts related to radioactivity, physics, and chemistry at an appropriate level
- Discuss the scientific method and importance of experimental evidence
- Share insights about being a woman in science during your time
- Relate personal stories about your discoveries and collaborations
- Emphasize the ethical responsibilities of scientific work

This is designed as an educational experience for students to learn about your scientific contributions and historical significance.";

/// 助手记录的创建、修改、删除与访问码校验；远端助手与本地记录保持同一个 id
pub struct AssistantService {
    backend: Arc<dyn AssistantBackend>,
    store: Arc<dyn AssistantStore>,
    registry: PollerRegistry,
    share_base: String,
    default_model: String,
    demo_lock: Mutex<()>,
}

fn share_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SHARE_ID_LEN)
        .map(char::from)
        .collect()
}

fn invalid(reason: &str) -> StudioError {
    StudioError::InvalidRequest {
        reason: reason.to_string(),
    }
}

fn not_found(id: &str) -> StudioError {
    StudioError::NotFound {
        resource: format!("assistant {}", id),
    }
}

impl AssistantService {
    pub fn new(
        backend: Arc<dyn AssistantBackend>,
        store: Arc<dyn AssistantStore>,
        registry: PollerRegistry,
        share_base: &str,
        default_model: &str,
    ) -> Self {
        Self {
            backend,
            store,
            registry,
            share_base: share_base.trim_end_matches('/').to_string(),
            default_model: default_model.to_string(),
            demo_lock: Mutex::new(()),
        }
    }

    #[instrument(skip(self, req), fields(name = %req.name, files = req.file_ids.len()))]
    pub async fn create(&self, req: NewAssistant) -> Result<AssistantRecord> {
        if req.name.trim().is_empty()
            || req.instructions.trim().is_empty()
            || req.access_code.is_empty()
        {
            return Err(invalid("Name, instructions, and access code are required"));
        }

        let model = req
            .model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.default_model.clone());
        let spec = AssistantSpec {
            name: req.name.clone(),
            instructions: req.instructions.clone(),
            model: model.clone(),
            vector_store_ids: req.vector_store_ids.clone(),
        };
        let id = self.backend.create_assistant(&spec).await?;

        let files = req
            .file_ids
            .iter()
            .enumerate()
            .map(|(i, file_id)| AssistantFile {
                id: file_id.clone(),
                name: format!("File {}", i + 1),
                container_id: req.vector_store_ids.get(i).cloned(),
            })
            .collect();
        let now = Utc::now();
        let record = AssistantRecord {
            id,
            name: req.name,
            instructions: req.instructions,
            model,
            access_code: req.access_code,
            shareable_url: format!("{}/{}", self.share_base, share_id()),
            is_public: req.is_public,
            is_demo: false,
            files,
            created_at: now,
            updated_at: now,
        };
        let record = self.store.create(record).await?;
        info!(id = %record.id, url = %record.shareable_url, "assistant created");
        Ok(record)
    }

    /// 返回已有的演示助手；没有时创建一个公开的，之后的调用复用同一条记录
    #[instrument(skip(self))]
    pub async fn ensure_demo(&self) -> Result<AssistantRecord> {
        let _guard = self.demo_lock.lock().await;
        if let Some(existing) = self.store.list().await?.into_iter().find(|r| r.is_demo) {
            return Ok(existing);
        }

        let spec = AssistantSpec {
            name: DEMO_NAME.to_string(),
            instructions: DEMO_INSTRUCTIONS.to_string(),
            model: self.default_model.clone(),
            vector_store_ids: Vec::new(),
        };
        let id = self.backend.create_assistant(&spec).await?;
        let now = Utc::now();
        let record = self
            .store
            .create(AssistantRecord {
                id,
                name: spec.name,
                instructions: spec.instructions,
                model: spec.model,
                access_code: DEMO_ACCESS_CODE.to_string(),
                shareable_url: format!("{}/{}", self.share_base, share_id()),
                is_public: true,
                is_demo: true,
                files: Vec::new(),
                created_at: now,
                updated_at: now,
            })
            .await?;
        info!(id = %record.id, "demo assistant created");
        Ok(record)
    }

    pub async fn get(&self, id: &str) -> Result<AssistantRecord> {
        self.store.get(id).await?.ok_or_else(|| not_found(id))
    }

    pub async fn list(&self) -> Result<Vec<AssistantRecord>> {
        self.store.list().await
    }

    #[instrument(skip(self, patch))]
    pub async fn update(&self, id: &str, patch: &AssistantPatch) -> Result<AssistantRecord> {
        if patch.is_empty() {
            return Err(invalid("No update data provided"));
        }
        self.get(id).await?;

        if patch.touches_remote() {
            let update = AssistantUpdate {
                name: patch.name.clone(),
                instructions: patch.instructions.clone(),
                model: patch.model.clone(),
            };
            self.backend.update_assistant(id, &update).await?;
        }
        self.store.update(id, patch).await
    }

    /// 远端删除失败只记录日志；记录所在容器的轮询一并取消
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> Result<AssistantRecord> {
        let record = self.get(id).await?;

        if let Err(e) = self.backend.delete_assistant(id).await {
            error!(error = %e, "failed to delete remote assistant, removing record anyway");
        }
        let mut cancelled = 0;
        for container_id in record.container_ids() {
            cancelled += self.registry.cancel_container(&container_id).await;
        }
        self.store.delete(id).await?;
        info!(cancelled_pollers = cancelled, "assistant deleted");
        Ok(record)
    }

    pub async fn verify_access(&self, id: &str, access_code: &str) -> Result<AssistantRecord> {
        if id.is_empty() || access_code.is_empty() {
            return Err(invalid("Assistant ID and access code are required"));
        }
        let record = self.get(id).await?;
        if record.grants_access(access_code) {
            Ok(record)
        } else {
            Err(StudioError::AccessDenied {
                reason: format!("access code mismatch for {}", id),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use studio_core::DEFAULT_ASSISTANT_MODEL;
    use studio_ingest::{BatchPoller, MockBackend, PollerConfig};
    use studio_store::MemoryAssistantStore;

    fn service(backend: Arc<MockBackend>) -> AssistantService {
        let registry = PollerRegistry::new(BatchPoller::new(backend.clone(), PollerConfig::default()));
        AssistantService::new(
            backend,
            Arc::new(MemoryAssistantStore::new()),
            registry,
            "/roleplay/",
            DEFAULT_ASSISTANT_MODEL,
        )
    }

    fn new_assistant() -> NewAssistant {
        NewAssistant {
            name: "Ada Lovelace".into(),
            instructions: "Speak as Ada".into(),
            access_code: "engine".into(),
            file_ids: vec!["file_a".into(), "file_b".into()],
            vector_store_ids: vec!["vs_a".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_share_id_shape() {
        let id = share_id();
        assert_eq!(id.len(), 10);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn test_create_defaults_and_files() {
        let backend = Arc::new(MockBackend::new());
        let svc = service(backend.clone());
        let record = svc.create(new_assistant()).await.unwrap();

        assert_eq!(record.model, DEFAULT_ASSISTANT_MODEL);
        assert!(record.shareable_url.starts_with("/roleplay/"));
        assert_eq!(record.shareable_url.len(), "/roleplay/".len() + 10);
        assert_eq!(record.files[0].name, "File 1");
        assert_eq!(record.files[0].container_id.as_deref(), Some("vs_a"));
        assert_eq!(record.files[1].container_id, None);

        let remote = backend.assistant(&record.id).unwrap();
        assert_eq!(remote.vector_store_ids, vec!["vs_a".to_string()]);
    }

    #[tokio::test]
    async fn test_create_requires_fields() {
        let svc = service(Arc::new(MockBackend::new()));
        let mut req = new_assistant();
        req.access_code.clear();
        let err = svc.create(req).await.unwrap_err();
        assert_eq!(err.to_http_status(), 400);
        assert!(svc.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_pushes_remote_fields() {
        let backend = Arc::new(MockBackend::new());
        let svc = service(backend.clone());
        let record = svc.create(new_assistant()).await.unwrap();

        let err = svc.update(&record.id, &AssistantPatch::default()).await.unwrap_err();
        assert_eq!(err.user_message(), "No update data provided");

        let patch = AssistantPatch {
            instructions: Some("Speak as Babbage".into()),
            access_code: Some("difference".into()),
            ..Default::default()
        };
        let updated = svc.update(&record.id, &patch).await.unwrap();
        assert_eq!(updated.access_code, "difference");
        assert_eq!(
            backend.assistant(&record.id).unwrap().instructions,
            "Speak as Babbage"
        );

        let missing = svc.update("asst_missing", &patch).await.unwrap_err();
        assert_eq!(missing.to_http_status(), 404);
    }

    #[tokio::test]
    async fn test_delete_ignores_remote_failure() {
        let backend = Arc::new(MockBackend::new().failing_assistant_delete());
        let svc = service(backend);
        let record = svc.create(new_assistant()).await.unwrap();
        svc.delete(&record.id).await.unwrap();
        assert_eq!(svc.get(&record.id).await.unwrap_err().to_http_status(), 404);
    }

    #[tokio::test]
    async fn test_delete_cancels_container_pollers() {
        let backend = Arc::new(MockBackend::new());
        let svc = service(backend.clone());
        let record = svc.create(new_assistant()).await.unwrap();

        let handle = svc
            .registry
            .spawn(&studio_core::IngestionBatch {
                id: "vsfb_x".into(),
                container_id: "vs_a".into(),
                file_ids: vec!["file_a".into()],
                status: studio_core::BatchStatus::InProgress,
            })
            .await;
        svc.delete(&record.id).await.unwrap();
        assert!(matches!(
            handle.outcome().await.unwrap(),
            studio_ingest::PollOutcome::Cancelled { .. }
        ));
    }

    #[tokio::test]
    async fn test_demo_is_created_once_and_public() {
        let backend = Arc::new(MockBackend::new());
        let svc = service(backend.clone());
        svc.create(new_assistant()).await.unwrap();

        let first = svc.ensure_demo().await.unwrap();
        let second = svc.ensure_demo().await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(first.is_demo);
        assert!(first.is_public);
        assert_eq!(first.access_code, DEMO_ACCESS_CODE);
        assert_eq!(first.name, DEMO_NAME);
        assert!(first.shareable_url.starts_with("/roleplay/"));
        assert_eq!(backend.assistant(&first.id).unwrap().name, DEMO_NAME);

        let all = svc.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.iter().filter(|r| r.is_demo).count(), 1);
        assert!(svc.verify_access(&first.id, "anything").await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_access() {
        let svc = service(Arc::new(MockBackend::new()));
        let record = svc.create(new_assistant()).await.unwrap();

        assert!(svc.verify_access(&record.id, "engine").await.is_ok());
        let denied = svc.verify_access(&record.id, "Engine").await.unwrap_err();
        assert_eq!(denied.to_http_status(), 403);
        assert_eq!(denied.user_message(), "Invalid access code");
        let missing = svc.verify_access("nope", "engine").await.unwrap_err();
        assert_eq!(missing.user_message(), "Learning experience not found");

        let public = AssistantPatch {
            is_public: Some(true),
            ..Default::default()
        };
        svc.update(&record.id, &public).await.unwrap();
        assert!(svc.verify_access(&record.id, "anything").await.is_ok());
    }
}
