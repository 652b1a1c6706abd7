use async_trait::async_trait;
use studio_core::{AssistantPatch, AssistantRecord};
use studio_error::{Result, StudioError};

mod memory;
mod sled_store;

pub use memory::MemoryAssistantStore;
pub use sled_store::SledAssistantStore;

/// 助手记录的持久化；远端助手的增删改由调用方负责
#[async_trait]
pub trait AssistantStore: Send + Sync {
    async fn create(&self, record: AssistantRecord) -> Result<AssistantRecord>;

    async fn get(&self, id: &str) -> Result<Option<AssistantRecord>>;

    /// 按创建时间倒序
    async fn list(&self) -> Result<Vec<AssistantRecord>>;

    async fn update(&self, id: &str, patch: &AssistantPatch) -> Result<AssistantRecord>;

    /// 返回被删除的记录；不存在时为 `None`
    async fn delete(&self, id: &str) -> Result<Option<AssistantRecord>>;
}

pub(crate) fn not_found(id: &str) -> StudioError {
    StudioError::NotFound {
        resource: format!("assistant {}", id),
    }
}

pub(crate) fn already_exists(id: &str) -> StudioError {
    StudioError::Concurrency {
        operation: "create_assistant".to_string(),
        message: format!("assistant {} already exists", id),
    }
}

pub(crate) fn newest_first(records: &mut [AssistantRecord]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}
