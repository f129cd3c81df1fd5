//! Shared types, error model, and configuration for kbforge.
//!
//! This crate is the foundation depended on by all other kbforge crates.
//! It provides:
//! - [`KbForgeError`]: the unified error type
//! - Task model ([`Task`], [`TaskPayload`], [`TaskStatus`], [`TaskType`])
//! - Outcomes ([`TaskResult`], [`ProcessingError`], [`StepStats`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod result;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, EnvironmentConfig, IngestionSettings, PipelineSettings, QueueSettings,
    SchedulerSettings, config_dir, config_file_path, init_config, load_config, load_config_from,
    validate_config,
};
pub use error::{KbForgeError, Result};
pub use result::{
    IndexingDetails, IngestionDetails, ProcessingError, PublishingDetails, ResultDetails,
    StepStats, TaskResult, classify_batch,
};
pub use types::{
    BuildType, DedupStrategy, IndexingPayload, IngestionMode, IngestionPayload, PublishStrategy,
    PublishingPayload, StepConfig, Task, TaskId, TaskPayload, TaskStatus, TaskType,
};

/// Hex-encoded SHA-256 of `content`, used for dedup and lineage.
pub fn content_hash(content: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_hex() {
        let hash = content_hash(b"hello");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, content_hash(b"hello"));
        assert_ne!(hash, content_hash(b"hello!"));
    }
}
