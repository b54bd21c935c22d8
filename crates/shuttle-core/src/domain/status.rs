//! TaskStatus - 定期タスクの状態と遷移ルール

use serde::{Deserialize, Serialize};
use std::fmt;

/// TaskStatus は Task Record の状態を表現
///
/// # 状態遷移（hot path）
/// - Scheduled -> Queued: scheduler が due なタスクを claim
/// - Queued -> Running: executor が実行開始
/// - Running -> Scheduled: 実行成功（next_execution_time を進める）
/// - Running -> Failed: 実行失敗（next_execution_time は進めない）
///
/// # 運用上の遷移
/// - Queued / Running -> Scheduled: stale release（クラッシュからの回復）
/// - Failed / Inactive -> Scheduled: 手動 reschedule
/// - Inactive 以外 -> Inactive: deactivate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Scheduled,
    Queued,
    Running,
    Failed,
    Inactive,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Scheduled,
        TaskStatus::Queued,
        TaskStatus::Running,
        TaskStatus::Failed,
        TaskStatus::Inactive,
    ];

    /// `self -> next` が許可された遷移かどうか
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Scheduled, Queued) | (Queued, Running) | (Running, Scheduled) | (Running, Failed) => {
                true
            }
            (Queued, Scheduled) | (Failed, Scheduled) | (Inactive, Scheduled) => true,
            (from, Inactive) => from != Inactive,
            _ => false,
        }
    }

    /// Scheduler / Executor のどちらかが「持っている」状態か
    pub fn is_claimed(self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Scheduled => "scheduled",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Failed => "failed",
            TaskStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
