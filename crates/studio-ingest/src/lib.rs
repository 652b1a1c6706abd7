pub mod enqueuer;
pub mod intake;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod pipeline;
pub mod poller;
pub mod provisioner;
pub mod registry;
pub mod submitter;

pub use enqueuer::BatchEnqueuer;
pub use intake::{has_allowed_extension, is_allowed_mime_type, validate_upload};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockBackend;
pub use pipeline::{IngestionConfig, IngestionPipeline};
pub use poller::{BatchPoller, BatchSnapshot, PollOutcome, PollerConfig};
pub use provisioner::{container_name, strip_extension, ContainerProvisioner};
pub use registry::{PollerHandle, PollerRegistry};
pub use submitter::UploadSubmitter;

// 重新导出核心类型
pub use studio_core::{Document, IngestionReceipt};
pub use studio_error::{Result, StudioError};
