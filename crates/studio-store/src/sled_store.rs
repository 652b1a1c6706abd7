use async_trait::async_trait;
use std::path::Path;
use studio_core::{AssistantPatch, AssistantRecord};
use studio_error::Result;
use tracing::{debug, info};

use crate::{already_exists, newest_first, not_found, AssistantStore};

const TREE: &str = "assistants";

/// 以 JSON 形式把助手记录存进 sled 的 `assistants` 树，每次写入后 flush
pub struct SledAssistantStore {
    tree: sled::Tree,
}

impl SledAssistantStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        let tree = db.open_tree(TREE)?;
        info!(path = %path.as_ref().display(), records = tree.len(), "opened assistant store");
        Ok(Self { tree })
    }

    fn decode(bytes: &[u8]) -> Result<AssistantRecord> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn put(&self, record: &AssistantRecord) -> Result<()> {
        let json = serde_json::to_vec(record)?;
        self.tree.insert(record.id.as_bytes(), json)?;
        self.tree.flush()?;
        Ok(())
    }
}

#[async_trait]
impl AssistantStore for SledAssistantStore {
    async fn create(&self, record: AssistantRecord) -> Result<AssistantRecord> {
        let json = serde_json::to_vec(&record)?;
        // 仅当键不存在时写入
        let swapped = self
            .tree
            .compare_and_swap(record.id.as_bytes(), None as Option<&[u8]>, Some(json))?;
        if swapped.is_err() {
            return Err(already_exists(&record.id));
        }
        self.tree.flush()?;
        debug!(id = %record.id, "assistant record created");
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<AssistantRecord>> {
        match self.tree.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<AssistantRecord>> {
        let mut all = Vec::with_capacity(self.tree.len());
        for item in self.tree.iter() {
            let (_, bytes) = item?;
            all.push(Self::decode(&bytes)?);
        }
        newest_first(&mut all);
        Ok(all)
    }

    async fn update(&self, id: &str, patch: &AssistantPatch) -> Result<AssistantRecord> {
        let mut record = self.get(id).await?.ok_or_else(|| not_found(id))?;
        record.apply(patch);
        self.put(&record)?;
        debug!(id, "assistant record updated");
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<Option<AssistantRecord>> {
        let removed = self.tree.remove(id.as_bytes())?;
        self.tree.flush()?;
        removed.map(|bytes| Self::decode(&bytes)).transpose()
    }
}
