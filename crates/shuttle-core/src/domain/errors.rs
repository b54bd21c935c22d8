//! Errors - エラー型と分類
//!
//! # 分類
//! - `UnknownTaskType`: registry に存在しない task_type（その dispatch だけが失敗）
//! - `Store`: TaskStore の障害（scheduler pass は中断、executor は ack しない）
//! - `TaskRun`: タスク本体の失敗（必ず Failed に遷移してから呼び出し元へ返す）

use thiserror::Error;

use super::ids::{MessageId, TaskId};
use super::status::TaskStatus;
use super::task_type::TaskType;

/// StoreError は TaskStore の操作エラー
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("task store unavailable: {0}")]
    Unavailable(String),

    /// 許可されていない状態遷移など、制約違反（バッチ全体が適用されない）
    #[error("constraint violated for {task_id}: {reason}")]
    Constraint { task_id: TaskId, reason: String },

    #[error("task {0} already exists")]
    AlreadyExists(TaskId),

    #[error("store returned malformed data: {0}")]
    Malformed(String),
}

/// ChannelError は Dispatch Channel の操作エラー
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("message {0} is not in flight")]
    UnknownMessage(MessageId),

    #[error("message codec: {0}")]
    Codec(String),

    #[error("channel operation failed: {0}")]
    OperationFailed(String),
}

/// TaskRunError はタスク本体（run）の失敗
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TaskRunError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TaskRunError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// SchedulerError はスケジューラのドメインエラー
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown task type: {0}")]
    UnknownTaskType(TaskType),

    #[error("task type {0} is already registered")]
    DuplicateTaskType(TaskType),

    #[error("invalid task type {value:?}: {reason}")]
    InvalidTaskType { value: String, reason: &'static str },

    #[error("run interval must be at least 1 second, got {0}")]
    InvalidRunInterval(u32),

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("task {0} was changed concurrently")]
    Conflict(TaskId),

    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {task_id} failed: {source}")]
    TaskRun {
        task_id: TaskId,
        #[source]
        source: TaskRunError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl SchedulerError {
    /// transport 層に redelivery させるべきエラーか（ack しない）
    pub fn is_retryable(&self) -> bool {
        matches!(self, SchedulerError::Store(StoreError::Unavailable(_)))
    }
}

/// scheduler 操作の Result 型
pub type Result<T> = std::result::Result<T, SchedulerError>;
