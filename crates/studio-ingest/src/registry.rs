use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use studio_core::IngestionBatch;
use studio_error::Result;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::poller::{BatchPoller, BatchSnapshot, PollOutcome};

/// 已结束的轮询快照保留时长，之后在下一次 spawn 时清理
const FINISHED_RETENTION_MINUTES: i64 = 60;

struct Entry {
    container_id: String,
    token: CancellationToken,
    snapshot: watch::Receiver<BatchSnapshot>,
}

/// 单个批次轮询任务的句柄；丢弃句柄不会停止任务
pub struct PollerHandle {
    batch_id: String,
    container_id: String,
    token: CancellationToken,
    join: JoinHandle<PollOutcome>,
}

impl PollerHandle {
    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn outcome(self) -> Result<PollOutcome> {
        Ok(self.join.await?)
    }
}

struct RegistryInner {
    poller: BatchPoller,
    root: CancellationToken,
    entries: RwLock<HashMap<String, Entry>>,
}

/// 跟踪所有后台轮询任务：按批次查询快照，按容器或整体取消
#[derive(Clone)]
pub struct PollerRegistry {
    inner: Arc<RegistryInner>,
}

impl PollerRegistry {
    pub fn new(poller: BatchPoller) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                poller,
                root: CancellationToken::new(),
                entries: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub async fn spawn(&self, batch: &IngestionBatch) -> PollerHandle {
        let token = self.inner.root.child_token();
        let (tx, rx) = watch::channel(BatchSnapshot::new(
            &batch.id,
            &batch.container_id,
            Some(batch.status),
        ));

        {
            let mut entries = self.inner.entries.write().await;
            prune_finished(&mut entries);
            entries.insert(
                batch.id.clone(),
                Entry {
                    container_id: batch.container_id.clone(),
                    token: token.clone(),
                    snapshot: rx,
                },
            );
        }

        let inner = self.inner.clone();
        let container_id = batch.container_id.clone();
        let batch_id = batch.id.clone();
        let task_token = token.clone();
        let join = tokio::spawn(async move {
            inner
                .poller
                .run(&container_id, &batch_id, task_token, tx)
                .await
        });

        PollerHandle {
            batch_id: batch.id.clone(),
            container_id: batch.container_id.clone(),
            token,
            join,
        }
    }

    pub async fn snapshot(&self, batch_id: &str) -> Option<BatchSnapshot> {
        self.inner
            .entries
            .read()
            .await
            .get(batch_id)
            .map(|e| e.snapshot.borrow().clone())
    }

    pub async fn active_count(&self) -> usize {
        self.inner
            .entries
            .read()
            .await
            .values()
            .filter(|e| !e.snapshot.borrow().is_finished())
            .count()
    }

    pub async fn cancel_batch(&self, batch_id: &str) -> bool {
        match self.inner.entries.read().await.get(batch_id) {
            Some(entry) if !entry.snapshot.borrow().is_finished() => {
                entry.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// 取消某个容器下所有仍在进行的轮询，返回被取消的数量
    pub async fn cancel_container(&self, container_id: &str) -> usize {
        let entries = self.inner.entries.read().await;
        let mut cancelled = 0;
        for entry in entries.values() {
            if entry.container_id == container_id && !entry.snapshot.borrow().is_finished() {
                entry.token.cancel();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(container_id, cancelled, "cancelled file batch polling for container");
        }
        cancelled
    }

    /// 停机时取消全部轮询，之后 spawn 的任务也会立即结束
    pub fn shutdown(&self) {
        info!("shutting down file batch pollers");
        self.inner.root.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.root.is_cancelled()
    }
}

fn prune_finished(entries: &mut HashMap<String, Entry>) {
    let cutoff = Utc::now() - ChronoDuration::minutes(FINISHED_RETENTION_MINUTES);
    entries.retain(|_, e| {
        let s = e.snapshot.borrow();
        !(s.is_finished() && s.updated_at < cutoff)
    });
}
