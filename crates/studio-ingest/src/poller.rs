use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use studio_backend::AssistantBackend;
use studio_core::BatchStatus;
use studio_error::StudioError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 批次状态轮询参数
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// 创建批次后第一次检查前的等待
    pub initial_delay: Duration,
    /// 两次状态检查之间的固定间隔
    pub interval: Duration,
    /// 状态检查总次数上限（出错的检查也计入）
    pub max_attempts: u32,
    /// 连续出错的重试上限，超过后放弃监控
    pub max_error_retries: u32,
    /// 出错后的退避基数，按 2^(n-1) 增长
    pub error_backoff: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            interval: Duration::from_secs(3),
            max_attempts: 10,
            max_error_retries: 3,
            error_backoff: Duration::from_secs(1),
        }
    }
}

impl PollerConfig {
    fn backoff_for(&self, consecutive_errors: u32) -> Duration {
        let exp = consecutive_errors.saturating_sub(1).min(16);
        self.error_backoff.saturating_mul(1u32 << exp)
    }

    /// 远端给出的 Retry-After 更长时以它为准
    fn delay_after_error(&self, consecutive_errors: u32, err: &StudioError) -> Duration {
        let backoff = self.backoff_for(consecutive_errors);
        err.retry_after().map_or(backoff, |hint| hint.max(backoff))
    }
}

/// 轮询的最终结果，只写日志与快照，不回传给上传请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PollOutcome {
    Completed {
        attempts: u32,
    },
    Failed {
        attempts: u32,
        status: BatchStatus,
    },
    /// 次数用尽仍未结束，索引可能仍在进行
    Exhausted {
        attempts: u32,
        last_status: Option<BatchStatus>,
    },
    ErrorBudgetExhausted {
        attempts: u32,
        errors: u32,
        last_error: String,
    },
    /// 不可重试的错误（例如批次已不存在），立即停止
    Rejected {
        attempts: u32,
        error: String,
    },
    Cancelled {
        attempts: u32,
    },
}

impl PollOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Completed { attempts }
            | PollOutcome::Failed { attempts, .. }
            | PollOutcome::Exhausted { attempts, .. }
            | PollOutcome::ErrorBudgetExhausted { attempts, .. }
            | PollOutcome::Rejected { attempts, .. }
            | PollOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSnapshot {
    pub batch_id: String,
    pub container_id: String,
    pub status: Option<BatchStatus>,
    pub attempts: u32,
    pub consecutive_errors: u32,
    pub outcome: Option<PollOutcome>,
    pub updated_at: DateTime<Utc>,
}

impl BatchSnapshot {
    pub fn new(batch_id: &str, container_id: &str, status: Option<BatchStatus>) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            container_id: container_id.to_string(),
            status,
            attempts: 0,
            consecutive_errors: 0,
            outcome: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }
}

pub struct BatchPoller {
    backend: Arc<dyn AssistantBackend>,
    config: PollerConfig,
}

impl BatchPoller {
    pub fn new(backend: Arc<dyn AssistantBackend>, config: PollerConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// 轮询直到终态、次数用尽、连续出错超限或被取消；每一步都写入 `progress`
    pub async fn run(
        &self,
        container_id: &str,
        batch_id: &str,
        cancel: CancellationToken,
        progress: watch::Sender<BatchSnapshot>,
    ) -> PollOutcome {
        let max_attempts = self.config.max_attempts;
        let mut attempts = 0u32;
        let mut consecutive_errors = 0u32;
        let mut last_status = progress.borrow().status;
        let mut delay = self.config.initial_delay;

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break PollOutcome::Cancelled { attempts },
                _ = tokio::time::sleep(delay) => {}
            }

            if attempts >= max_attempts {
                break PollOutcome::Exhausted {
                    attempts,
                    last_status,
                };
            }
            attempts += 1;
            debug!(batch_id, attempt = attempts, max_attempts, "checking file batch status");

            let checked = tokio::select! {
                biased;
                _ = cancel.cancelled() => break PollOutcome::Cancelled { attempts },
                r = self.backend.get_ingestion_batch_status(container_id, batch_id) => r,
            };

            match checked {
                Ok(status) => {
                    consecutive_errors = 0;
                    last_status = Some(status);
                    progress.send_modify(|s| {
                        s.status = Some(status);
                        s.attempts = attempts;
                        s.consecutive_errors = 0;
                        s.updated_at = Utc::now();
                    });
                    debug!(batch_id, status = status.as_str(), "file batch status");
                    match status {
                        BatchStatus::Completed => break PollOutcome::Completed { attempts },
                        BatchStatus::Failed | BatchStatus::Cancelled => {
                            break PollOutcome::Failed { attempts, status }
                        }
                        BatchStatus::Queued | BatchStatus::InProgress => {
                            delay = self.config.interval;
                        }
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    progress.send_modify(|s| {
                        s.attempts = attempts;
                        s.consecutive_errors = consecutive_errors;
                        s.updated_at = Utc::now();
                    });
                    if !e.is_retryable() {
                        break PollOutcome::Rejected {
                            attempts,
                            error: e.to_string(),
                        };
                    }
                    if consecutive_errors > self.config.max_error_retries {
                        break PollOutcome::ErrorBudgetExhausted {
                            attempts,
                            errors: consecutive_errors,
                            last_error: e.to_string(),
                        };
                    }
                    delay = self.config.delay_after_error(consecutive_errors, &e);
                    warn!(
                        batch_id,
                        attempt = attempts,
                        consecutive_errors,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "error checking file batch status"
                    );
                }
            }

            if attempts >= max_attempts {
                break PollOutcome::Exhausted {
                    attempts,
                    last_status,
                };
            }
        };

        log_outcome(container_id, batch_id, &outcome);
        progress.send_modify(|s| {
            s.outcome = Some(outcome.clone());
            s.updated_at = Utc::now();
        });
        outcome
    }
}

fn log_outcome(container_id: &str, batch_id: &str, outcome: &PollOutcome) {
    match outcome {
        PollOutcome::Completed { attempts } => {
            info!(container_id, batch_id, attempts, "file batch processing completed")
        }
        PollOutcome::Failed { attempts, status } => error!(
            container_id,
            batch_id,
            attempts,
            status = status.as_str(),
            "file batch processing failed"
        ),
        PollOutcome::Exhausted {
            attempts,
            last_status,
        } => info!(
            container_id,
            batch_id,
            attempts,
            last_status = ?last_status,
            "reached max polling attempts; the file may still be processing"
        ),
        PollOutcome::ErrorBudgetExhausted {
            attempts,
            errors,
            last_error,
        } => error!(
            container_id,
            batch_id,
            attempts,
            errors,
            last_error = %last_error,
            "giving up on file batch status after repeated errors"
        ),
        PollOutcome::Rejected { attempts, error } => error!(
            container_id,
            batch_id,
            attempts,
            error = %error,
            "file batch status check rejected; stopped monitoring"
        ),
        PollOutcome::Cancelled { attempts } => {
            info!(container_id, batch_id, attempts, "file batch polling cancelled")
        }
    }
}
