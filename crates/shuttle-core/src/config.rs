//! Shuttle の設定（TOML）
//!
//! 全フィールドにデフォルトがあるので、空ファイルやファイルなしも有効な設定になる。
//! 秒数は読み込み時に `chrono::Duration` に収まるか検証する。

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::scheduler_loop::PollSettings;
use crate::domain::context::DEFAULT_SCOPE;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// 設定のルート
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShuttleConfig {
    /// scheduler と worker が使う ExecutionContext の scope
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

impl Default for ShuttleConfig {
    fn default() -> Self {
        Self {
            scope: default_scope(),
            scheduler: SchedulerConfig::default(),
            workers: WorkersConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl ShuttleConfig {
    /// `path` から読み込む。ファイルがなければデフォルト
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.recovery.validate()
    }
}

/// `[scheduler]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_min_poll_interval_ms")]
    pub min_poll_interval_ms: u64,
    #[serde(default = "default_max_poll_interval_secs")]
    pub max_poll_interval_secs: u64,
    #[serde(default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,
}

fn default_min_poll_interval_ms() -> u64 {
    100
}
fn default_max_poll_interval_secs() -> u64 {
    60
}
fn default_error_backoff_secs() -> u64 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_poll_interval_ms: default_min_poll_interval_ms(),
            max_poll_interval_secs: default_max_poll_interval_secs(),
            error_backoff_secs: default_error_backoff_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            min_poll_interval: Duration::from_millis(self.min_poll_interval_ms),
            max_poll_interval: Duration::from_secs(self.max_poll_interval_secs),
            error_backoff: Duration::from_secs(self.error_backoff_secs),
        }
    }
}

/// `[workers]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
}

fn default_worker_count() -> usize {
    4
}
fn default_receive_timeout_ms() -> u64 {
    500
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            receive_timeout_ms: default_receive_timeout_ms(),
        }
    }
}

impl WorkersConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

/// `[recovery]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// これより古い dead message を再投入する
    #[serde(default = "default_dead_message_threshold_secs")]
    pub dead_message_threshold_secs: u64,
    #[serde(default = "default_requeue_interval_secs")]
    pub requeue_interval_secs: u32,
    /// 設定したときだけ stale task の解放を有効にする
    #[serde(default)]
    pub stale_task_timeout_secs: Option<u64>,
    #[serde(default = "default_stale_release_interval_secs")]
    pub stale_release_interval_secs: u32,
}

fn default_dead_message_threshold_secs() -> u64 {
    300
}
fn default_requeue_interval_secs() -> u32 {
    60
}
fn default_stale_release_interval_secs() -> u32 {
    300
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            dead_message_threshold_secs: default_dead_message_threshold_secs(),
            requeue_interval_secs: default_requeue_interval_secs(),
            stale_task_timeout_secs: None,
            stale_release_interval_secs: default_stale_release_interval_secs(),
        }
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        checked_seconds("recovery.dead_message_threshold_secs", self.dead_message_threshold_secs)?;
        if let Some(secs) = self.stale_task_timeout_secs {
            checked_seconds("recovery.stale_task_timeout_secs", secs)?;
        }
        Ok(())
    }

    /// 範囲外の値は `TimeDelta::MAX` に丸める（`validate` を通っていれば起きない）
    pub fn dead_message_threshold(&self) -> chrono::Duration {
        checked_seconds("recovery.dead_message_threshold_secs", self.dead_message_threshold_secs)
            .unwrap_or(chrono::TimeDelta::MAX)
    }

    pub fn stale_task_timeout(&self) -> Option<chrono::Duration> {
        self.stale_task_timeout_secs.map(|secs| {
            checked_seconds("recovery.stale_task_timeout_secs", secs)
                .unwrap_or(chrono::TimeDelta::MAX)
        })
    }
}

fn checked_seconds(field: &'static str, secs: u64) -> Result<chrono::Duration, ConfigError> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| ConfigError::Invalid {
            field,
            reason: format!("{secs} seconds is out of range"),
        })
}
