pub mod config;
pub mod error;
pub mod hash;
pub mod locks;
pub mod orchestrator;
pub mod record;
pub mod validate;

pub use config::{ConfigError, PipelineConfig};
pub use error::ImportError;
pub use locks::UploadLocks;
pub use orchestrator::{ImportOrchestrator, ImportResult, Preview, PreviewOptions, RollbackOutcome};
pub use record::{RollbackRecord, StatusChange, UploadRecord, UploadStatus};
pub use validate::{DefaultValidator, UploadValidator, Validation};
