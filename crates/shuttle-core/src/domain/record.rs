//! ScheduledTaskRecord - 定期タスク 1 件ぶんの永続状態

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::status::TaskStatus;
use super::task_type::{RunInterval, TaskType};

/// 定期タスクの永続状態
///
/// 設計:
/// - record の id がタスクの同一性。同じ `task_type` の record が複数あってもよい
/// - `next_execution_time` が進むのは実行成功時だけ
/// - `updated_at` は状態を書くたびに変わる（stale 検出に使う）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTaskRecord {
    pub id: TaskId,
    pub task_type: TaskType,
    pub run_interval: RunInterval,
    pub status: TaskStatus,
    pub next_execution_time: DateTime<Utc>,
    pub last_execution_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledTaskRecord {
    /// `Scheduled` の新しい record。`next_execution_time` に実行予定
    pub fn new(
        id: TaskId,
        task_type: TaskType,
        run_interval: RunInterval,
        next_execution_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_type,
            run_interval,
            status: TaskStatus::Scheduled,
            next_execution_time,
            last_execution_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `Scheduled` かつ `next_execution_time < now` なら実行対象
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Scheduled && self.next_execution_time < now
    }

    /// 検証済みの更新を適用する
    pub fn apply(&mut self, update: &StatusUpdate) {
        self.status = update.status;
        if let Some(last) = update.last_execution_time {
            self.last_execution_time = Some(last);
        }
        if let Some(next) = update.next_execution_time {
            self.next_execution_time = next;
        }
        self.updated_at = update.at;
    }
}

/// 条件付きの状態更新。record がまだ `expected` のときだけ適用される
///
/// すべての遷移はこの型を通るので、store は compare-and-set として振る舞う
/// （`Queued -> Running` が排他点）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub id: TaskId,
    pub expected: TaskStatus,
    pub status: TaskStatus,
    pub last_execution_time: Option<DateTime<Utc>>,
    pub next_execution_time: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn transition(id: TaskId, from: TaskStatus, to: TaskStatus, at: DateTime<Utc>) -> Self {
        Self {
            id,
            expected: from,
            status: to,
            last_execution_time: None,
            next_execution_time: None,
            at,
        }
    }

    /// `Running -> Scheduled`。`last = now`、`next = now + interval`
    pub fn reschedule_after_run(id: TaskId, interval: RunInterval, now: DateTime<Utc>) -> Self {
        Self::transition(id, TaskStatus::Running, TaskStatus::Scheduled, now)
            .with_last_execution_time(now)
            .with_next_execution_time(now + interval.as_duration())
    }

    pub fn with_last_execution_time(mut self, at: DateTime<Utc>) -> Self {
        self.last_execution_time = Some(at);
        self
    }

    pub fn with_next_execution_time(mut self, at: DateTime<Utc>) -> Self {
        self.next_execution_time = Some(at);
        self
    }

    pub fn is_valid_edge(&self) -> bool {
        self.expected.can_transition_to(self.status)
    }
}
