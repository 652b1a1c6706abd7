use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use std::sync::{Arc, Mutex};
use studio_backend::AssistantBackend;
use studio_core::{ExpiryPolicy, KnowledgeContainer};
use studio_error::{Result, StudioError};
use tracing::{error, info, instrument};

/// 去掉最后一个扩展名："a.b.pdf" -> "a.b"；没有扩展名时原样返回
pub fn strip_extension(filename: &str) -> &str {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() && !ext.contains('/') => stem,
        _ => filename,
    }
}

/// 容器名 = "<去扩展名的文件名> - <ISO-8601 毫秒时间戳>"
pub fn container_name(filename: &str, at: DateTime<Utc>) -> String {
    format!(
        "{} - {}",
        strip_extension(filename),
        at.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

/// 每次上传都新建一个知识容器，从不复用
pub struct ContainerProvisioner {
    backend: Arc<dyn AssistantBackend>,
    expiry: ExpiryPolicy,
    last_stamp: Mutex<Option<DateTime<Utc>>>,
}

impl ContainerProvisioner {
    pub fn new(backend: Arc<dyn AssistantBackend>, expiry: ExpiryPolicy) -> Self {
        Self {
            backend,
            expiry,
            last_stamp: Mutex::new(None),
        }
    }

    /// 同一进程内的时间戳严格递增（毫秒粒度），保证同名文件得到不同的容器名
    fn next_stamp(&self) -> DateTime<Utc> {
        let now = Utc::now().trunc_subsecs(3);
        let mut last = self
            .last_stamp
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let stamp = match *last {
            Some(prev) if now <= prev => prev + Duration::milliseconds(1),
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }

    #[instrument(skip(self))]
    pub async fn provision(&self, filename: &str) -> Result<KnowledgeContainer> {
        let name = container_name(filename, self.next_stamp());
        match self.backend.create_container(&name, self.expiry).await {
            Ok(container) => {
                info!(container_id = %container.id, name = %container.name, "created knowledge container");
                Ok(container)
            }
            Err(e) => {
                error!(name = %name, error = %e, "failed to create knowledge container");
                Err(StudioError::RemoteUnavailable {
                    operation: "create_container".to_string(),
                    message: remote_message(&e),
                })
            }
        }
    }
}

/// 远端错误透传给调用方的消息
pub(crate) fn remote_message(err: &StudioError) -> String {
    match err {
        StudioError::RemoteService { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;
    use chrono::TimeZone;

    #[test]
    fn test_strip_extension() {
        assert_eq!(strip_extension("lecture.pdf"), "lecture");
        assert_eq!(strip_extension("report.final.docx"), "report.final");
        assert_eq!(strip_extension("README"), "README");
        assert_eq!(strip_extension("trailing."), "trailing.");
    }

    #[test]
    fn test_container_name_uses_iso_millis() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();
        assert_eq!(
            container_name("Week 1.pdf", at),
            "Week 1 - 2024-03-01T12:30:05.000Z"
        );
    }

    #[tokio::test]
    async fn test_same_filename_gets_distinct_containers() {
        let backend = Arc::new(MockBackend::new());
        let provisioner = ContainerProvisioner::new(backend.clone(), ExpiryPolicy::default());

        let a = provisioner.provision("notes.txt").await.unwrap();
        let b = provisioner.provision("notes.txt").await.unwrap();

        assert_ne!(a.name, b.name);
        assert_ne!(a.id, b.id);
        assert!(a.name.starts_with("notes - "));
        assert_eq!(a.expiry.days, 30);
        assert_eq!(backend.container_calls(), 2);
    }

    #[tokio::test]
    async fn test_remote_failure_is_remote_unavailable() {
        let backend = Arc::new(MockBackend::new().failing_container());
        let provisioner = ContainerProvisioner::new(backend, ExpiryPolicy::default());
        let err = provisioner.provision("notes.txt").await.unwrap_err();
        assert!(matches!(err, StudioError::RemoteUnavailable { .. }));
        assert_eq!(err.to_http_status(), 502);
    }
}
