//! InMemoryTaskStore - 開発・テスト用の正本
//!
//! # 実装詳細
//! - scope ごとに `HashMap<TaskId, ScheduledTaskRecord>` を持つ
//! - tokio::sync::Mutex で全更新を直列化（条件付き更新の比較と適用が同じロック内）
//! - `set_unavailable` で障害を注入できる（StoreError::Unavailable を返す）

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    ExecutionContext, ScheduledTaskRecord, StatusUpdate, StoreError, TaskId, TaskStatus,
};
use crate::ports::{AggregateField, AggregateValue, BatchReport, TaskStore};

type Records = HashMap<TaskId, ScheduledTaskRecord>;

#[derive(Default)]
pub struct InMemoryTaskStore {
    scopes: Mutex<HashMap<String, Records>>,
    unavailable: AtomicBool,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 障害注入: `true` の間はすべての操作が Unavailable になる
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    /// 実行中の interval 変更を再現するためのテスト用フック
    #[cfg(test)]
    pub(crate) async fn set_run_interval(
        &self,
        ctx: &ExecutionContext,
        id: TaskId,
        run_interval: crate::domain::RunInterval,
    ) {
        let mut scopes = self.scopes.lock().await;
        if let Some(record) = scopes.get_mut(ctx.scope()).and_then(|r| r.get_mut(&id)) {
            record.run_interval = run_interval;
        }
    }

    async fn select<P>(
        &self,
        ctx: &ExecutionContext,
        predicate: P,
    ) -> Result<Vec<ScheduledTaskRecord>, StoreError>
    where
        P: Fn(&ScheduledTaskRecord) -> bool,
    {
        self.check_available()?;
        let scopes = self.scopes.lock().await;
        let mut found: Vec<ScheduledTaskRecord> = scopes
            .get(ctx.scope())
            .map(|records| records.values().filter(|r| predicate(r)).cloned().collect())
            .unwrap_or_default();
        found.sort_by_key(|r| r.id);
        Ok(found)
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn find(
        &self,
        ctx: &ExecutionContext,
        id: TaskId,
    ) -> Result<Option<ScheduledTaskRecord>, StoreError> {
        self.check_available()?;
        let scopes = self.scopes.lock().await;
        Ok(scopes
            .get(ctx.scope())
            .and_then(|records| records.get(&id))
            .cloned())
    }

    async fn list(&self, ctx: &ExecutionContext) -> Result<Vec<ScheduledTaskRecord>, StoreError> {
        self.select(ctx, |_| true).await
    }

    async fn insert(
        &self,
        ctx: &ExecutionContext,
        record: ScheduledTaskRecord,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut scopes = self.scopes.lock().await;
        let records = scopes.entry(ctx.scope().to_string()).or_default();
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn search_due(
        &self,
        ctx: &ExecutionContext,
        status: TaskStatus,
        before: DateTime<Utc>,
    ) -> Result<Vec<ScheduledTaskRecord>, StoreError> {
        self.select(ctx, |r| r.status == status && r.next_execution_time < before)
            .await
    }

    async fn search_stale(
        &self,
        ctx: &ExecutionContext,
        status: TaskStatus,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<ScheduledTaskRecord>, StoreError> {
        self.select(ctx, |r| r.status == status && r.updated_at < updated_before)
            .await
    }

    async fn batch_update_status(
        &self,
        ctx: &ExecutionContext,
        updates: Vec<StatusUpdate>,
    ) -> Result<BatchReport, StoreError> {
        self.check_available()?;

        // 制約違反があれば 1 件も適用しない
        if let Some(bad) = updates.iter().find(|u| !u.is_valid_edge()) {
            return Err(StoreError::Constraint {
                task_id: bad.id,
                reason: format!("transition {} -> {} is not allowed", bad.expected, bad.status),
            });
        }

        let mut scopes = self.scopes.lock().await;
        let records = scopes.entry(ctx.scope().to_string()).or_default();
        let mut report = BatchReport::default();
        for update in &updates {
            match records.get_mut(&update.id) {
                Some(record) if record.status == update.expected => {
                    record.apply(update);
                    report.applied.push(update.id);
                }
                _ => report.conflicts.push(update.id),
            }
        }
        Ok(report)
    }

    async fn min_aggregate(
        &self,
        ctx: &ExecutionContext,
        field: AggregateField,
        status: Option<TaskStatus>,
    ) -> Result<Option<AggregateValue>, StoreError> {
        let records = self
            .select(ctx, |r| status.is_none_or(|s| r.status == s))
            .await?;
        let value = match field {
            AggregateField::NextExecutionTime => records
                .iter()
                .map(|r| r.next_execution_time)
                .min()
                .map(AggregateValue::Timestamp),
            AggregateField::RunInterval => records
                .iter()
                .map(|r| r.run_interval)
                .min()
                .map(AggregateValue::Interval),
        };
        Ok(value)
    }
}
