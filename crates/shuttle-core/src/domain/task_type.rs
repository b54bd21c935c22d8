//! TaskType / RunInterval - Task Definition を識別する値オブジェクト
//!
//! # 命名規約
//! - `{namespace}.{action}` のようにドット区切り（例: `message_queue.requeue_dead_messages`）
//! - 空文字・空白を含む名前は拒否する

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::SchedulerError;

/// TaskType は登録済みの Task Definition を指す名前
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskType(String);

impl TaskType {
    pub fn new(value: impl Into<String>) -> Result<Self, SchedulerError> {
        let value = value.into();
        Self::validate(&value)?;
        Ok(Self(value))
    }

    pub fn validate(value: &str) -> Result<(), SchedulerError> {
        if value.is_empty() {
            return Err(SchedulerError::InvalidTaskType {
                value: value.to_string(),
                reason: "must not be empty",
            });
        }
        if value.chars().any(char::is_whitespace) {
            return Err(SchedulerError::InvalidTaskType {
                value: value.to_string(),
                reason: "must not contain whitespace",
            });
        }
        if value.starts_with('.') || value.ends_with('.') || value.contains("..") {
            return Err(SchedulerError::InvalidTaskType {
                value: value.to_string(),
                reason: "segments must not be empty",
            });
        }
        Ok(())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TaskType {
    type Error = SchedulerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TaskType> for String {
    fn from(value: TaskType) -> Self {
        value.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// RunInterval は実行間隔（秒、1 以上）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct RunInterval(u32);

impl RunInterval {
    pub fn from_secs(secs: u32) -> Result<Self, SchedulerError> {
        if secs == 0 {
            return Err(SchedulerError::InvalidRunInterval(secs));
        }
        Ok(Self(secs))
    }

    pub fn as_secs(self) -> u32 {
        self.0
    }

    pub fn as_duration(self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.0))
    }

    pub fn as_std(self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.0))
    }
}

impl TryFrom<u32> for RunInterval {
    type Error = SchedulerError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_secs(value)
    }
}

impl From<RunInterval> for u32 {
    fn from(value: RunInterval) -> Self {
        value.0
    }
}

impl fmt::Display for RunInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}
