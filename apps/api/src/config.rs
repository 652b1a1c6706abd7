use serde::Deserialize;
use std::time::Duration;
use studio_backend::BackendConfig;
use studio_core::ExpiryPolicy;
use studio_ingest::{IngestionConfig, PollerConfig};
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "configs/default.yaml";

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub server: ServerCfg,
    pub backend: BackendCfgYaml,
    #[serde(default)]
    pub ingestion: IngestionCfg,
    #[serde(default)]
    pub upload: UploadCfg,
    #[serde(default)]
    pub store: StoreCfg,
    #[serde(default)]
    pub share: ShareCfg,
}

#[derive(Debug, Deserialize)]
pub struct ServerCfg {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct BackendCfgYaml {
    pub kind: String,
    pub base_url: Option<String>,
    pub api_key_env: Option<String>,
    pub default_model: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IngestionCfg {
    pub initial_delay_ms: u64,
    pub interval_ms: u64,
    pub max_attempts: u32,
    pub max_error_retries: u32,
    pub error_backoff_ms: u64,
    pub container_expiry_days: u32,
}

impl Default for IngestionCfg {
    fn default() -> Self {
        Self {
            initial_delay_ms: 3_000,
            interval_ms: 3_000,
            max_attempts: 10,
            max_error_retries: 3,
            error_backoff_ms: 1_000,
            container_expiry_days: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct UploadCfg {
    pub request_timeout_secs: u64,
    /// 必须大于 20 MiB 上限，超限文件才能由管线自己返回 413
    pub body_limit_bytes: usize,
}

impl Default for UploadCfg {
    fn default() -> Self {
        Self {
            request_timeout_secs: 120,
            body_limit_bytes: 32 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Sled,
    Memory,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StoreCfg {
    pub kind: StoreKind,
    pub path: String,
}

impl Default for StoreCfg {
    fn default() -> Self {
        Self {
            kind: StoreKind::Sled,
            path: "data/assistants".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShareCfg {
    pub base_path: String,
}

impl Default for ShareCfg {
    fn default() -> Self {
        Self {
            base_path: "/roleplay".to_string(),
        }
    }
}

impl IngestionCfg {
    pub fn to_ingestion_config(&self) -> IngestionConfig {
        IngestionConfig {
            poller: PollerConfig {
                initial_delay: Duration::from_millis(self.initial_delay_ms),
                interval: Duration::from_millis(self.interval_ms),
                max_attempts: self.max_attempts,
                max_error_retries: self.max_error_retries,
                error_backoff: Duration::from_millis(self.error_backoff_ms),
            },
            expiry: ExpiryPolicy::after_inactivity(self.container_expiry_days),
        }
    }
}

impl BackendCfgYaml {
    pub fn to_backend_config(&self) -> anyhow::Result<BackendConfig> {
        match self.kind.as_str() {
            "openai" | "openai_compat" => {
                let key_env = self.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY");
                Ok(BackendConfig::OpenAiCompat {
                    base_url: self
                        .base_url
                        .clone()
                        .unwrap_or_else(|| "https://api.openai.com".to_string()),
                    api_key: read_env(key_env)?,
                    timeout_secs: self.timeout_secs,
                })
            }
            other => anyhow::bail!("unsupported backend kind: {}", other),
        }
    }
}

pub fn parse_config(s: &str) -> anyhow::Result<AppConfig> {
    Ok(serde_yaml::from_str(s)?)
}

pub fn load_config() -> anyhow::Result<AppConfig> {
    let path = std::env::var("STUDIO_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let s = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("read config {}: {}", path, e))?;
    let cfg = parse_config(&s)?;
    info!(path = %path, "load_config: {:?}", cfg);
    Ok(cfg)
}

pub fn read_env(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("missing env {}", key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse_config(
            r#"
server: { host: 127.0.0.1, port: 8080 }
backend: { kind: openai }
"#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.store.kind, StoreKind::Sled);
        assert_eq!(cfg.share.base_path, "/roleplay");
        assert_eq!(cfg.upload.request_timeout_secs, 120);
        assert!(cfg.upload.body_limit_bytes > 20 * 1024 * 1024);

        let ingestion = cfg.ingestion.to_ingestion_config();
        assert_eq!(ingestion.poller.max_attempts, 10);
        assert_eq!(ingestion.poller.interval, Duration::from_secs(3));
        assert_eq!(ingestion.expiry.days, 30);
    }

    #[test]
    fn test_overrides_and_store_kind() {
        let cfg = parse_config(
            r#"
server: { host: 0.0.0.0, port: 3000 }
backend: { kind: openai_compat, base_url: "http://localhost:9000", timeout_secs: 5 }
ingestion: { max_attempts: 4, error_backoff_ms: 250 }
store: { kind: memory }
"#,
        )
        .unwrap();
        assert_eq!(cfg.store.kind, StoreKind::Memory);
        let poller = cfg.ingestion.to_ingestion_config().poller;
        assert_eq!(poller.max_attempts, 4);
        assert_eq!(poller.error_backoff, Duration::from_millis(250));
        assert_eq!(poller.initial_delay, Duration::from_secs(3));
    }

    #[test]
    fn test_unknown_backend_kind_is_rejected() {
        let cfg = parse_config(
            r#"
server: { host: 0.0.0.0, port: 3000 }
backend: { kind: carrier_pigeon }
"#,
        )
        .unwrap();
        assert!(cfg.backend.to_backend_config().is_err());
    }
}
