use async_trait::async_trait;
use std::collections::HashMap;
use studio_core::{AssistantPatch, AssistantRecord};
use studio_error::Result;
use tokio::sync::RwLock;

use crate::{already_exists, newest_first, not_found, AssistantStore};

/// 进程内存储，重启即丢失；用于测试与 `store.kind = memory`
#[derive(Default)]
pub struct MemoryAssistantStore {
    records: RwLock<HashMap<String, AssistantRecord>>,
}

impl MemoryAssistantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssistantStore for MemoryAssistantStore {
    async fn create(&self, record: AssistantRecord) -> Result<AssistantRecord> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(already_exists(&record.id));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<AssistantRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<AssistantRecord>> {
        let mut all: Vec<AssistantRecord> = self.records.read().await.values().cloned().collect();
        newest_first(&mut all);
        Ok(all)
    }

    async fn update(&self, id: &str, patch: &AssistantPatch) -> Result<AssistantRecord> {
        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| not_found(id))?;
        record.apply(patch);
        Ok(record.clone())
    }

    async fn delete(&self, id: &str) -> Result<Option<AssistantRecord>> {
        Ok(self.records.write().await.remove(id))
    }
}
