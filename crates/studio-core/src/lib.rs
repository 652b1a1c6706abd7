use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 单个上传文件的大小上限（含边界），20 MiB
pub const MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024;

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

pub const DEFAULT_ASSISTANT_MODEL: &str = "gpt-4-turbo-preview";

pub const ALLOWED_MIME_TYPES: [&str; 4] = [
    "application/pdf",
    "text/plain",
    "text/csv",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
];

pub const ALLOWED_EXTENSIONS: [&str; 4] = ["pdf", "txt", "csv", "docx"];

/// 一次上传请求中的原始文档，只在请求生命周期内存在
#[derive(Debug, Clone)]
pub struct Document {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime_type: Option<String>,
}

impl Document {
    pub fn new(bytes: Vec<u8>, filename: impl Into<String>, mime_type: Option<String>) -> Self {
        Self {
            bytes,
            filename: filename.into(),
            mime_type: mime_type.filter(|m| !m.trim().is_empty()),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// 未声明类型时回退为 application/octet-stream
    pub fn effective_mime_type(&self) -> &str {
        self.mime_type.as_deref().unwrap_or(DEFAULT_MIME_TYPE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryAnchor {
    LastActiveAt,
}

/// 知识容器的过期策略：最后一次活动之后 N 天
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryPolicy {
    pub anchor: ExpiryAnchor,
    pub days: u32,
}

impl ExpiryPolicy {
    pub fn after_inactivity(days: u32) -> Self {
        Self {
            anchor: ExpiryAnchor::LastActiveAt,
            days,
        }
    }
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self::after_inactivity(30)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeContainer {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub expiry: ExpiryPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilePurpose {
    Assistants,
}

impl FilePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilePurpose::Assistants => "assistants",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    pub filename: String,
    pub bytes: u64,
    pub purpose: FilePurpose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BatchStatus::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Queued => "queued",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionBatch {
    pub id: String,
    pub container_id: String,
    pub file_ids: Vec<String>,
    pub status: BatchStatus,
}

/// 上传管线返回给调用方的结果；`warning` 存在时表示检索能力可能降级
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionReceipt {
    pub remote_file_id: String,
    pub container_id: String,
    pub container_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_status: Option<BatchStatus>,
    pub filename: String,
    pub bytes: u64,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl IngestionReceipt {
    pub fn is_degraded(&self) -> bool {
        self.warning.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantFile {
    pub id: String,
    pub name: String,
    pub container_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantRecord {
    pub id: String,
    pub name: String,
    pub instructions: String,
    pub model: String,
    pub access_code: String,
    pub shareable_url: String,
    pub is_public: bool,
    /// 内置演示助手，全局至多一个
    #[serde(default)]
    pub is_demo: bool,
    pub files: Vec<AssistantFile>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AssistantRecord {
    /// 公开的记录无需访问码；否则按明文逐字比较
    pub fn grants_access(&self, access_code: &str) -> bool {
        self.is_public || self.access_code == access_code
    }

    pub fn container_ids(&self) -> Vec<String> {
        self.files
            .iter()
            .filter_map(|f| f.container_id.clone())
            .collect()
    }

    pub fn apply(&mut self, patch: &AssistantPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(instructions) = &patch.instructions {
            self.instructions = instructions.clone();
        }
        if let Some(model) = &patch.model {
            self.model = model.clone();
        }
        if let Some(access_code) = &patch.access_code {
            self.access_code = access_code.clone();
        }
        if let Some(shareable_url) = &patch.shareable_url {
            self.shareable_url = shareable_url.clone();
        }
        if let Some(is_public) = patch.is_public {
            self.is_public = is_public;
        }
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantPatch {
    pub name: Option<String>,
    pub instructions: Option<String>,
    pub model: Option<String>,
    pub access_code: Option<String>,
    pub shareable_url: Option<String>,
    pub is_public: Option<bool>,
}

impl AssistantPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.instructions.is_none()
            && self.model.is_none()
            && self.access_code.is_none()
            && self.shareable_url.is_none()
            && self.is_public.is_none()
    }

    /// 需要同步到远端助手的字段
    pub fn touches_remote(&self) -> bool {
        self.name.is_some() || self.instructions.is_some() || self.model.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAssistant {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub instructions: String,
    pub model: Option<String>,
    #[serde(default)]
    pub access_code: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub file_ids: Vec<String>,
    #[serde(default)]
    pub vector_store_ids: Vec<String>,
}

pub use studio_error::{Result, StudioError as Error};

#[cfg(test)]
mod tests {
    use super::*;

    fn record(is_public: bool) -> AssistantRecord {
        let now = Utc::now();
        AssistantRecord {
            id: "asst_1".into(),
            name: "Socrates".into(),
            instructions: "Ask questions".into(),
            model: DEFAULT_ASSISTANT_MODEL.into(),
            access_code: "hemlock".into(),
            shareable_url: "/roleplay/abc".into(),
            is_public,
            is_demo: false,
            files: vec![
                AssistantFile {
                    id: "file_1".into(),
                    name: "File 1".into(),
                    container_id: Some("vs_1".into()),
                },
                AssistantFile {
                    id: "file_2".into(),
                    name: "File 2".into(),
                    container_id: None,
                },
            ],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_access_code_is_exact_match() {
        let r = record(false);
        assert!(r.grants_access("hemlock"));
        assert!(!r.grants_access("Hemlock"));
        assert!(!r.grants_access(""));
        assert!(record(true).grants_access("anything"));
    }

    #[test]
    fn test_patch_applies_only_present_fields() {
        let mut r = record(false);
        let patch = AssistantPatch {
            name: Some("Plato".into()),
            ..Default::default()
        };
        assert!(!patch.is_empty());
        assert!(patch.touches_remote());
        r.apply(&patch);
        assert_eq!(r.name, "Plato");
        assert_eq!(r.instructions, "Ask questions");
        assert_eq!(r.container_ids(), vec!["vs_1".to_string()]);
    }

    #[test]
    fn test_record_without_demo_flag_deserializes() {
        let mut v = serde_json::to_value(record(false)).unwrap();
        assert_eq!(v["isDemo"], false);
        v.as_object_mut().unwrap().remove("isDemo");
        let r: AssistantRecord = serde_json::from_value(v).unwrap();
        assert!(!r.is_demo);
    }

    #[test]
    fn test_batch_status_wire_names() {
        let s: BatchStatus = serde_json::from_str("\"in_progress\"").unwrap();
        assert_eq!(s, BatchStatus::InProgress);
        assert!(!s.is_terminal());
        assert!(BatchStatus::Failed.is_terminal());
        assert!(!BatchStatus::Failed.is_success());
    }

    #[test]
    fn test_receipt_omits_missing_batch() {
        let receipt = IngestionReceipt {
            remote_file_id: "file_1".into(),
            container_id: "vs_1".into(),
            container_name: "notes - 2024-01-01T00:00:00.000Z".into(),
            batch_id: None,
            batch_status: None,
            filename: "notes.txt".into(),
            bytes: 3,
            mime_type: "text/plain".into(),
            warning: Some("degraded".into()),
        };
        let v = serde_json::to_value(&receipt).unwrap();
        assert_eq!(v["remoteFileId"], "file_1");
        assert!(v.get("batchId").is_none());
        assert!(receipt.is_degraded());
    }
}
