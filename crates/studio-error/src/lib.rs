use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

#[cfg(feature = "axum")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};

/// 系统统一错误类型
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum StudioError {
    // === 上传输入错误 ===
    #[error("No file provided")]
    NoFile,

    #[error(
        "File size exceeds the maximum limit of {limit_mb}MB. Your file is {actual_mb:.2}MB",
        limit_mb = whole_mib(.limit),
        actual_mb = fractional_mib(.size)
    )]
    TooLarge { size: u64, limit: u64 },

    #[error("Invalid file type ({mime_type}). Allowed types: PDF, TXT, CSV, DOCX")]
    UnsupportedType { filename: String, mime_type: String },

    // === 业务错误 ===
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Access denied: {reason}")]
    AccessDenied { reason: String },

    // === 上游依赖错误 ===
    #[error("Remote backend unavailable during {operation}: {message}")]
    RemoteUnavailable { operation: String, message: String },

    #[error("Error uploading file: {message}")]
    UploadFailed { message: String },

    /// 非致命：文件与容器已就绪，但索引批次创建或状态轮询失败
    #[error("File uploaded but ingestion is degraded: {message}")]
    IngestionDegraded {
        container_id: String,
        message: String,
    },

    #[error("Remote service error ({provider}, status {status}): {message}")]
    RemoteService {
        provider: String,
        status: u16,
        message: String,
        #[serde(skip)]
        retry_after: Option<std::time::Duration>,
    },

    // === 技术错误 ===
    #[error("Network error during {operation}: {message}")]
    Network { operation: String, message: String },

    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Storage error during {operation}: {message}")]
    Storage { operation: String, message: String },

    #[error("Serialization error ({format}): {message}")]
    Serialization { format: String, message: String },

    #[error("Concurrency error during {operation}: {message}")]
    Concurrency { operation: String, message: String },

    // === 系统错误 ===
    #[error("Configuration error: {key} - {reason}")]
    Configuration { key: String, reason: String },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
        details: Option<String>,
    },
}

fn whole_mib(bytes: &u64) -> u64 {
    *bytes / (1024 * 1024)
}

fn fractional_mib(bytes: &u64) -> f64 {
    *bytes as f64 / (1024.0 * 1024.0)
}

/// 错误严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Low,      // 可预期的输入错误
    Medium,   // 技术错误但不影响核心功能
    High,     // 影响核心功能的错误
    Critical, // 系统级严重错误
}

/// 错误元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetadata {
    pub error_id: String,
    pub severity: ErrorSeverity,
    pub component: String,
    pub operation: Option<String>,
    pub request_id: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub context: std::collections::HashMap<String, String>,
}

impl StudioError {
    /// 错误种类的稳定名称，随 JSON 响应一起返回，供前端区分处理
    pub fn kind(&self) -> &'static str {
        match self {
            StudioError::NoFile => "no_file",
            StudioError::TooLarge { .. } => "too_large",
            StudioError::UnsupportedType { .. } => "unsupported_type",
            StudioError::NotFound { .. } => "not_found",
            StudioError::InvalidRequest { .. } => "invalid_request",
            StudioError::AccessDenied { .. } => "access_denied",
            StudioError::RemoteUnavailable { .. } => "remote_unavailable",
            StudioError::UploadFailed { .. } => "upload_failed",
            StudioError::IngestionDegraded { .. } => "ingestion_degraded",
            StudioError::RemoteService { .. } => "remote_service",
            StudioError::Network { .. } => "network",
            StudioError::Timeout { .. } => "timeout",
            StudioError::Storage { .. } => "storage",
            StudioError::Serialization { .. } => "serialization",
            StudioError::Concurrency { .. } => "concurrency",
            StudioError::Configuration { .. } => "configuration",
            StudioError::Internal { .. } => "internal",
        }
    }

    /// 获取错误的严重级别
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            StudioError::NoFile
            | StudioError::TooLarge { .. }
            | StudioError::UnsupportedType { .. }
            | StudioError::NotFound { .. }
            | StudioError::InvalidRequest { .. } => ErrorSeverity::Low,
            StudioError::AccessDenied { .. } | StudioError::IngestionDegraded { .. } => {
                ErrorSeverity::Medium
            }
            StudioError::RemoteService { .. }
            | StudioError::Network { .. }
            | StudioError::Timeout { .. } => ErrorSeverity::Medium,
            StudioError::RemoteUnavailable { .. } | StudioError::UploadFailed { .. } => {
                ErrorSeverity::High
            }
            StudioError::Storage { .. }
            | StudioError::Serialization { .. }
            | StudioError::Concurrency { .. } => ErrorSeverity::High,
            StudioError::Configuration { .. } | StudioError::Internal { .. } => {
                ErrorSeverity::Critical
            }
        }
    }

    /// 客户端输入错误（4xx 语义），不应重试
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StudioError::NoFile
                | StudioError::TooLarge { .. }
                | StudioError::UnsupportedType { .. }
                | StudioError::NotFound { .. }
                | StudioError::InvalidRequest { .. }
                | StudioError::AccessDenied { .. }
        )
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        match self {
            StudioError::Network { .. } | StudioError::Timeout { .. } => true,
            StudioError::RemoteService { status, .. } => *status == 429 || *status >= 500,
            StudioError::Concurrency { .. } => true,
            _ => false,
        }
    }

    /// 获取重试延迟时间
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            StudioError::RemoteService { retry_after, .. } => *retry_after,
            StudioError::Network { .. } => Some(std::time::Duration::from_millis(500)),
            StudioError::Timeout { .. } => Some(std::time::Duration::from_millis(1000)),
            StudioError::Concurrency { .. } => Some(std::time::Duration::from_millis(100)),
            _ => None,
        }
    }

    /// 记录错误日志
    pub fn log(&self, metadata: &ErrorMetadata) {
        match metadata.severity {
            ErrorSeverity::Low => {
                warn!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    request_id = ?metadata.request_id,
                    kind = self.kind(),
                    error = %self,
                    "request rejected"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    request_id = ?metadata.request_id,
                    kind = self.kind(),
                    error = %self,
                    context = ?metadata.context,
                    "technical error"
                );
            }
            ErrorSeverity::High | ErrorSeverity::Critical => {
                error!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    request_id = ?metadata.request_id,
                    kind = self.kind(),
                    error = %self,
                    context = ?metadata.context,
                    severity = ?metadata.severity,
                    "serious error"
                );
            }
        }
    }

    /// 转换为 HTTP 状态码
    pub fn to_http_status(&self) -> u16 {
        match self {
            StudioError::NoFile => 400,
            StudioError::TooLarge { .. } => 413,
            StudioError::UnsupportedType { .. } => 415,
            StudioError::NotFound { .. } => 404,
            StudioError::InvalidRequest { .. } => 400,
            StudioError::AccessDenied { .. } => 403,
            StudioError::Timeout { .. } => 408,
            StudioError::RemoteUnavailable { .. } => 502,
            StudioError::UploadFailed { .. } => 500,
            // 降级只作为 2xx 响应里的 warning 出现
            StudioError::IngestionDegraded { .. } => 200,
            _ => 500,
        }
    }

    /// 获取用户友好的错误消息
    pub fn user_message(&self) -> String {
        match self {
            // 输入错误本身就是可读的提示
            StudioError::NoFile | StudioError::TooLarge { .. } => self.to_string(),
            StudioError::UnsupportedType { .. } => {
                "Invalid file type. Allowed types: PDF, TXT, CSV, DOCX".to_string()
            }
            StudioError::NotFound { .. } => "Learning experience not found".to_string(),
            StudioError::InvalidRequest { reason } => reason.clone(),
            StudioError::AccessDenied { .. } => "Invalid access code".to_string(),
            StudioError::RemoteUnavailable { .. } => {
                "The assistant service is unavailable, please try again later".to_string()
            }
            StudioError::UploadFailed { message } => format!("Error uploading file: {}", message),
            StudioError::IngestionDegraded { .. } => {
                "File uploaded but vector store processing failed. The assistant may not be able to search this file."
                    .to_string()
            }
            StudioError::Timeout { .. } => "The request timed out, please try again".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

/// 创建错误元数据的便捷构造器
pub struct ErrorMetadataBuilder {
    metadata: ErrorMetadata,
}

impl ErrorMetadataBuilder {
    pub fn new(component: &str) -> Self {
        Self {
            metadata: ErrorMetadata {
                error_id: uuid::Uuid::new_v4().to_string(),
                severity: ErrorSeverity::Medium,
                component: component.to_string(),
                operation: None,
                request_id: None,
                timestamp: chrono::Utc::now(),
                context: std::collections::HashMap::new(),
            },
        }
    }

    pub fn operation(mut self, operation: &str) -> Self {
        self.metadata.operation = Some(operation.to_string());
        self
    }

    pub fn request_id(mut self, request_id: &str) -> Self {
        self.metadata.request_id = Some(request_id.to_string());
        self
    }

    pub fn context(mut self, key: &str, value: &str) -> Self {
        self.metadata
            .context
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(mut self, error: &StudioError) -> ErrorMetadata {
        self.metadata.severity = error.severity();
        self.metadata
    }
}

pub type Result<T> = std::result::Result<T, StudioError>;

// === 转换实现 ===

impl From<serde_json::Error> for StudioError {
    fn from(err: serde_json::Error) -> Self {
        StudioError::Serialization {
            format: "json".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for StudioError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StudioError::Timeout {
                operation: "http_request".to_string(),
                timeout_ms: 30000, // 默认超时时间
            }
        } else if err.is_connect() {
            StudioError::Network {
                operation: "connect".to_string(),
                message: err.to_string(),
            }
        } else {
            StudioError::Network {
                operation: "http_request".to_string(),
                message: err.to_string(),
            }
        }
    }
}

impl From<sled::Error> for StudioError {
    fn from(err: sled::Error) -> Self {
        StudioError::Storage {
            operation: "sled".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for StudioError {
    fn from(err: tokio::task::JoinError) -> Self {
        StudioError::Concurrency {
            operation: "task_join".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for StudioError {
    fn from(err: anyhow::Error) -> Self {
        StudioError::Internal {
            message: err.to_string(),
            details: None,
        }
    }
}

// Axum integration
#[cfg(feature = "axum")]
impl IntoResponse for StudioError {
    fn into_response(self) -> axum::response::Response {
        let status_code = StatusCode::from_u16(self.to_http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = serde_json::json!({
            "error": self.to_string(),
            "message": self.user_message(),
            "kind": self.kind(),
        });

        (status_code, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_errors_map_to_4xx() {
        assert_eq!(StudioError::NoFile.to_http_status(), 400);
        assert_eq!(
            StudioError::TooLarge {
                size: 25 * 1024 * 1024,
                limit: 20 * 1024 * 1024
            }
            .to_http_status(),
            413
        );
        assert_eq!(
            StudioError::UnsupportedType {
                filename: "a.exe".into(),
                mime_type: "application/x-msdownload".into()
            }
            .to_http_status(),
            415
        );
        assert!(StudioError::NoFile.is_client_error());
        assert!(!StudioError::NoFile.is_retryable());
    }

    #[test]
    fn test_upstream_errors_map_to_5xx() {
        let remote = StudioError::RemoteUnavailable {
            operation: "create_container".into(),
            message: "boom".into(),
        };
        let upload = StudioError::UploadFailed {
            message: "rejected".into(),
        };
        assert_eq!(remote.to_http_status(), 502);
        assert_eq!(upload.to_http_status(), 500);
        assert!(!remote.is_client_error());
        assert_eq!(upload.user_message(), "Error uploading file: rejected");
    }

    #[test]
    fn test_too_large_message_reports_sizes() {
        let err = StudioError::TooLarge {
            size: 25 * 1024 * 1024,
            limit: 20 * 1024 * 1024,
        };
        assert_eq!(
            err.to_string(),
            "File size exceeds the maximum limit of 20MB. Your file is 25.00MB"
        );
    }

    #[test]
    fn test_remote_service_retryable_by_status() {
        let throttled = StudioError::RemoteService {
            provider: "openai_compat".into(),
            status: 429,
            message: "slow down".into(),
            retry_after: None,
        };
        let bad_request = StudioError::RemoteService {
            provider: "openai_compat".into(),
            status: 400,
            message: "bad".into(),
            retry_after: None,
        };
        assert!(throttled.is_retryable());
        assert!(!bad_request.is_retryable());
    }

    #[test]
    fn test_metadata_builder_takes_error_severity() {
        let err = StudioError::Internal {
            message: "x".into(),
            details: None,
        };
        let meta = ErrorMetadataBuilder::new("ingest")
            .operation("submit")
            .context("filename", "notes.txt")
            .build(&err);
        assert_eq!(meta.severity, ErrorSeverity::Critical);
        assert_eq!(meta.operation.as_deref(), Some("submit"));
        assert_eq!(meta.context.get("filename").map(String::as_str), Some("notes.txt"));
    }
}
