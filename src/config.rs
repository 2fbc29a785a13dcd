use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::services::retry::RetryPolicy;

pub const DEFAULT_SHARD_SIZE: usize = 100;
pub const DEFAULT_WINDOW_CAP: usize = 100;
pub const DEFAULT_SMALL_GROUP_LIMIT: usize = 30;
pub const DEFAULT_MOVE_BATCH_SIZE: usize = 20;
pub const DEFAULT_CLASSIFIER_BATCH_SIZE: usize = 100;
const CONFIG_FILE_NAME: &str = "organize.json";

/// Tunables for one organize run. Every field has a default, so a partial
/// JSON document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrganizeConfig {
    pub shard_size: usize,
    pub window_cap: usize,
    pub small_group_limit: usize,
    pub move_batch_size: usize,
    pub batch_delay_ms: u64,
    pub domain_delay_ms: u64,
    pub window_settle_ms: u64,
    pub max_convergence_passes: usize,
    pub straggler_threshold: usize,
    pub move_retry_attempts: usize,
    pub move_retry_backoff_ms: u64,
    pub classifier_batch_size: usize,
    pub classifier_retry_attempts: usize,
    pub exclude_pinned: bool,
    pub discard_moved_tabs: bool,
}

impl Default for OrganizeConfig {
    fn default() -> Self {
        Self {
            shard_size: DEFAULT_SHARD_SIZE,
            window_cap: DEFAULT_WINDOW_CAP,
            small_group_limit: DEFAULT_SMALL_GROUP_LIMIT,
            move_batch_size: DEFAULT_MOVE_BATCH_SIZE,
            batch_delay_ms: 50,
            domain_delay_ms: 100,
            window_settle_ms: 300,
            max_convergence_passes: 3,
            straggler_threshold: 3,
            move_retry_attempts: 3,
            move_retry_backoff_ms: 200,
            classifier_batch_size: DEFAULT_CLASSIFIER_BATCH_SIZE,
            classifier_retry_attempts: 2,
            exclude_pinned: false,
            discard_moved_tabs: false,
        }
    }
}

impl OrganizeConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        let positive = [
            ("shardSize", self.shard_size),
            ("windowCap", self.window_cap),
            ("smallGroupLimit", self.small_group_limit),
            ("moveBatchSize", self.move_batch_size),
            ("moveRetryAttempts", self.move_retry_attempts),
            ("classifierBatchSize", self.classifier_batch_size),
            ("classifierRetryAttempts", self.classifier_retry_attempts),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(AppError::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.window_cap < 2 {
            return Err(AppError::Config(
                "windowCap must allow at least two tabs".to_string(),
            ));
        }
        if self.shard_size > self.window_cap {
            return Err(AppError::Config(format!(
                "shardSize ({}) cannot exceed windowCap ({})",
                self.shard_size, self.window_cap
            )));
        }
        if self.small_group_limit > self.window_cap {
            return Err(AppError::Config(format!(
                "smallGroupLimit ({}) cannot exceed windowCap ({})",
                self.small_group_limit, self.window_cap
            )));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Explicit path first, then the platform config dir, then defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, AppError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn domain_delay(&self) -> Duration {
        Duration::from_millis(self.domain_delay_ms)
    }

    pub fn window_settle(&self) -> Duration {
        Duration::from_millis(self.window_settle_ms)
    }

    pub fn move_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(
            self.move_retry_attempts,
            Duration::from_millis(self.move_retry_backoff_ms),
        )
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "tabshelf", "tabshelf")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}
