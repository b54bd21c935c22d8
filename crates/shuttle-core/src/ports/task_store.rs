//! TaskStore port - Task Record の正本（source of truth）
//!
//! # 設計原則
//! - すべての状態遷移は条件付き更新（expected status が一致した場合のみ適用）
//! - batch は all-or-nothing: StoreError のときは 1 件も適用しない
//! - 期待状態の不一致はエラーではなく `BatchReport::conflicts` で返す

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    ExecutionContext, RunInterval, ScheduledTaskRecord, StatusUpdate, StoreError, TaskId,
    TaskStatus,
};

/// min-aggregation の対象フィールド
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateField {
    NextExecutionTime,
    RunInterval,
}

/// min-aggregation の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateValue {
    Timestamp(DateTime<Utc>),
    Interval(RunInterval),
}

/// batch 更新の結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// 適用された更新
    pub applied: Vec<TaskId>,
    /// expected status が一致しなかった、または record が存在しなかった更新
    pub conflicts: Vec<TaskId>,
}

impl BatchReport {
    pub fn is_applied(&self, id: TaskId) -> bool {
        self.applied.contains(&id)
    }
}

/// TaskStore は Task Record を永続化する
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn find(
        &self,
        ctx: &ExecutionContext,
        id: TaskId,
    ) -> Result<Option<ScheduledTaskRecord>, StoreError>;

    async fn list(&self, ctx: &ExecutionContext) -> Result<Vec<ScheduledTaskRecord>, StoreError>;

    async fn insert(
        &self,
        ctx: &ExecutionContext,
        record: ScheduledTaskRecord,
    ) -> Result<(), StoreError>;

    /// `status` が一致し、`next_execution_time < before` の record
    async fn search_due(
        &self,
        ctx: &ExecutionContext,
        status: TaskStatus,
        before: DateTime<Utc>,
    ) -> Result<Vec<ScheduledTaskRecord>, StoreError>;

    /// `status` が一致し、`updated_at < updated_before` の record
    async fn search_stale(
        &self,
        ctx: &ExecutionContext,
        status: TaskStatus,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<ScheduledTaskRecord>, StoreError>;

    async fn batch_update_status(
        &self,
        ctx: &ExecutionContext,
        updates: Vec<StatusUpdate>,
    ) -> Result<BatchReport, StoreError>;

    /// 1 件だけの条件付き更新。適用されたら `true`。
    async fn update_status(
        &self,
        ctx: &ExecutionContext,
        update: StatusUpdate,
    ) -> Result<bool, StoreError> {
        let id = update.id;
        let report = self.batch_update_status(ctx, vec![update]).await?;
        Ok(report.is_applied(id))
    }

    /// `status` を指定した場合はその状態の record だけを対象にする
    async fn min_aggregate(
        &self,
        ctx: &ExecutionContext,
        field: AggregateField,
        status: Option<TaskStatus>,
    ) -> Result<Option<AggregateValue>, StoreError>;
}
