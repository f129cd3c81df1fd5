//! Application configuration for kbforge.
//!
//! User config lives at `~/.kbforge/kbforge.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{KbForgeError, Result};
use crate::types::{DedupStrategy, StepConfig, TaskType};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "kbforge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".kbforge";

// ---------------------------------------------------------------------------
// Config structs (matching kbforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Worker pool settings.
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Queue defaults applied to tasks created by the CLI.
    #[serde(default)]
    pub queue: QueueSettings,

    /// Default indexing pipeline.
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Ingestion defaults.
    #[serde(default)]
    pub ingestion: IngestionSettings,

    /// Publish targets.
    #[serde(default = "default_environments")]
    pub environments: Vec<EnvironmentConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerSettings::default(),
            queue: QueueSettings::default(),
            pipeline: PipelineSettings::default(),
            ingestion: IngestionSettings::default(),
            environments: default_environments(),
        }
    }
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Number of worker threads.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// How long an idle worker waits before polling the queue again.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long a graceful stop waits for workers.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    /// Task types probed by workers, in probe order.
    #[serde(default = "default_task_types")]
    pub task_types: Vec<TaskType>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            stop_timeout_secs: default_stop_timeout_secs(),
            task_types: default_task_types(),
        }
    }
}

fn default_worker_count() -> usize {
    4
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_stop_timeout_secs() -> u64 {
    30
}
fn default_task_types() -> Vec<TaskType> {
    TaskType::ALL.to_vec()
}

/// `[queue]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default)]
    pub default_priority: i32,

    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            default_priority: 0,
            default_max_retries: default_max_retries(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Steps used when a build does not specify its own pipeline.
    #[serde(default = "default_steps")]
    pub steps: Vec<StepConfig>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            steps: default_steps(),
        }
    }
}

fn default_steps() -> Vec<StepConfig> {
    vec![
        StepConfig::new("markdown"),
        StepConfig::new("fixed_size")
            .with_config(serde_json::json!({ "chunk_size": 800, "overlap": 100 })),
        StepConfig::new("keywords").with_config(serde_json::json!({ "top_n": 5 })),
        StepConfig::new("hashing").with_config(serde_json::json!({ "dimension": 256 })),
        StepConfig::new("default"),
    ]
}

/// `[ingestion]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionSettings {
    #[serde(default)]
    pub dedup_strategy: DedupStrategy,

    /// File extensions picked up by the filesystem connector.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            dedup_strategy: DedupStrategy::default(),
            extensions: default_extensions(),
        }
    }
}

fn default_extensions() -> Vec<String> {
    vec!["md".into(), "markdown".into(), "txt".into()]
}

/// `[[environments]]` entry: a publish target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub id: String,
    #[serde(default)]
    pub description: String,
}

fn default_environments() -> Vec<EnvironmentConfig> {
    vec![EnvironmentConfig {
        id: "local".into(),
        description: "In-process index store".into(),
    }]
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.kbforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| KbForgeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.kbforge/kbforge.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| KbForgeError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        KbForgeError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| KbForgeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| KbForgeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| KbForgeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Reject configs the scheduler could never start with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.scheduler.worker_count == 0 {
        return Err(KbForgeError::config("scheduler.worker_count must be at least 1"));
    }
    if config.scheduler.poll_interval_ms == 0 {
        return Err(KbForgeError::config("scheduler.poll_interval_ms must be positive"));
    }
    if config.scheduler.task_types.is_empty() {
        return Err(KbForgeError::config("scheduler.task_types must not be empty"));
    }
    for (i, env) in config.environments.iter().enumerate() {
        if env.id.trim().is_empty() {
            return Err(KbForgeError::config(format!("environments[{i}].id is empty")));
        }
    }
    Ok(())
}
