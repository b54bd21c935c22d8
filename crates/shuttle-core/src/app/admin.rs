//! TaskAdmin - 運用向けの操作
//!
//! - register_missing_tasks: registry にあって store に無い task_type の record を作る
//! - deactivate: record を Inactive にする（scheduler が拾わなくなる）
//! - reschedule: Failed / Inactive の record を Scheduled に戻す（すぐに due）
//! - status_counts: status ごとの record 数
//!
//! どの操作も条件付き更新なので、hot path と競合しても状態は壊れません。

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::app::status::StatusCounts;
use crate::domain::{
    ExecutionContext, Result, ScheduledTaskRecord, SchedulerError, StatusUpdate, TaskId,
    TaskStatus, TaskType,
};
use crate::ports::{Clock, IdGenerator, TaskStore};
use crate::typed::TaskRegistry;

pub struct TaskAdmin {
    registry: Arc<TaskRegistry>,
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl TaskAdmin {
    pub fn new(
        registry: Arc<TaskRegistry>,
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            registry,
            store,
            clock,
            ids,
        }
    }

    /// record が 1 つも無い task_type について、今すぐ due になる record を作る
    ///
    /// 作成した record の id を task_type の名前順で返します。
    pub async fn register_missing_tasks(&self, ctx: &ExecutionContext) -> Result<Vec<TaskId>> {
        let existing: HashSet<TaskType> = self
            .store
            .list(ctx)
            .await?
            .into_iter()
            .map(|r| r.task_type)
            .collect();

        let now = self.clock.now();
        let mut created = Vec::new();
        for task_type in self.registry.registered_types() {
            if existing.contains(&task_type) {
                continue;
            }
            let definition = self.registry.resolve(&task_type)?;
            let record = ScheduledTaskRecord::new(
                self.ids.generate_task_id(),
                task_type.clone(),
                definition.run_interval(),
                now,
                now,
            );
            let id = record.id;
            self.store.insert(ctx, record).await?;
            info!(task_id = %id, %task_type, "registered scheduled task");
            created.push(id);
        }
        Ok(created)
    }

    /// Inactive にする。すでに Inactive なら何もしない。
    pub async fn deactivate(&self, ctx: &ExecutionContext, id: TaskId) -> Result<()> {
        let record = self.load(ctx, id).await?;
        if record.status == TaskStatus::Inactive {
            return Ok(());
        }
        let update =
            StatusUpdate::transition(id, record.status, TaskStatus::Inactive, self.clock.now());
        if !self.store.update_status(ctx, update).await? {
            return Err(SchedulerError::Conflict(id));
        }
        info!(task_id = %id, from = %record.status, "task deactivated");
        Ok(())
    }

    /// Failed / Inactive の record を Scheduled に戻し、今すぐ due にする
    pub async fn reschedule(&self, ctx: &ExecutionContext, id: TaskId) -> Result<()> {
        let record = self.load(ctx, id).await?;
        if !matches!(record.status, TaskStatus::Failed | TaskStatus::Inactive) {
            return Err(SchedulerError::InvalidTransition {
                task_id: id,
                from: record.status,
                to: TaskStatus::Scheduled,
            });
        }
        let now = self.clock.now();
        let update = StatusUpdate::transition(id, record.status, TaskStatus::Scheduled, now)
            .with_next_execution_time(now);
        if !self.store.update_status(ctx, update).await? {
            return Err(SchedulerError::Conflict(id));
        }
        info!(task_id = %id, from = %record.status, "task rescheduled");
        Ok(())
    }

    pub async fn status_counts(&self, ctx: &ExecutionContext) -> Result<StatusCounts> {
        let records = self.store.list(ctx).await?;
        Ok(StatusCounts::from_records(&records))
    }

    async fn load(&self, ctx: &ExecutionContext, id: TaskId) -> Result<ScheduledTaskRecord> {
        self.store
            .find(ctx, id)
            .await?
            .ok_or(SchedulerError::TaskNotFound(id))
    }
}
