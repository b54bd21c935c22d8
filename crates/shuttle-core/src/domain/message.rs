//! DispatchMessage - Executor に task_id を渡すための envelope
//!
//! 状態や payload は含めません（正本は TaskStore）。

use serde::{Deserialize, Serialize};

use super::errors::ChannelError;
use super::ids::TaskId;
use super::task_type::TaskType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub task_id: TaskId,
    pub task_type: TaskType,
}

impl DispatchMessage {
    pub fn new(task_id: TaskId, task_type: TaskType) -> Self {
        Self { task_id, task_type }
    }

    /// Wire 表現（JSON bytes）にエンコード
    pub fn encode(&self) -> Result<Vec<u8>, ChannelError> {
        serde_json::to_vec(self).map_err(|e| ChannelError::Codec(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ChannelError> {
        serde_json::from_slice(bytes).map_err(|e| ChannelError::Codec(e.to_string()))
    }
}
