//! TaskScheduler - due なタスクを claim して dispatch する 1 回分の pass
//!
//! # フロー
//! 1. TaskStore::search_due() で `Scheduled` かつ `next_execution_time < now` を取得
//! 2. 1 件ずつ registry で task_type を解決し、DispatchChannel::publish()
//! 3. publish できた分の `Scheduled -> Queued` をまとめて batch 更新
//!
//! publish が batch 更新より先なので、メッセージが先に届くことがあります。
//! その場合 executor は `Queued` でないメッセージを捨てるので二重実行にはなりません。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::domain::{
    DispatchMessage, ExecutionContext, Result, RunInterval, SchedulerError, StatusUpdate,
    StoreError, TaskId, TaskStatus,
};
use crate::ports::{AggregateField, AggregateValue, Clock, DispatchChannel, TaskStore};
use crate::typed::TaskRegistry;

/// 1 回の pass の結果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueReport {
    /// publish 済みで `Queued` に遷移した record
    pub queued: Vec<TaskId>,
    /// task_type が registry に無かった record（`Scheduled` のまま）
    pub unknown_types: Vec<TaskId>,
    /// publish に失敗した record（`Scheduled` のまま、次の pass で再試行）
    pub publish_failures: Vec<TaskId>,
    /// publish 後に他者が状態を変えていた record
    pub conflicts: Vec<TaskId>,
}

impl QueueReport {
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
            && self.unknown_types.is_empty()
            && self.publish_failures.is_empty()
            && self.conflicts.is_empty()
    }
}

pub struct TaskScheduler {
    registry: Arc<TaskRegistry>,
    store: Arc<dyn TaskStore>,
    channel: Arc<dyn DispatchChannel>,
    clock: Arc<dyn Clock>,
}

impl TaskScheduler {
    pub fn new(
        registry: Arc<TaskRegistry>,
        store: Arc<dyn TaskStore>,
        channel: Arc<dyn DispatchChannel>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            store,
            channel,
            clock,
        }
    }

    /// due なタスクをすべて dispatch して `Queued` にする
    ///
    /// store のエラーは pass 全体を中断します（何も commit されません）。
    /// publish の失敗はその record だけをスキップします。
    pub async fn queue_scheduled_tasks(&self, ctx: &ExecutionContext) -> Result<QueueReport> {
        let now = self.clock.now();
        let due = self
            .store
            .search_due(ctx, TaskStatus::Scheduled, now)
            .await?;

        let mut report = QueueReport::default();
        let mut updates = Vec::with_capacity(due.len());
        for record in due {
            if let Err(e) = self.registry.resolve(&record.task_type) {
                warn!(task_id = %record.id, task_type = %record.task_type, error = %e, "skipping task with unregistered type");
                report.unknown_types.push(record.id);
                continue;
            }

            let message = DispatchMessage::new(record.id, record.task_type.clone());
            if let Err(e) = self.channel.publish(ctx, message).await {
                warn!(task_id = %record.id, error = %e, "publish failed, task stays scheduled");
                report.publish_failures.push(record.id);
                continue;
            }

            debug!(task_id = %record.id, task_type = %record.task_type, "dispatched");
            updates.push(StatusUpdate::transition(
                record.id,
                TaskStatus::Scheduled,
                TaskStatus::Queued,
                now,
            ));
        }

        if !updates.is_empty() {
            let batch = self.store.batch_update_status(ctx, updates).await?;
            for id in &batch.conflicts {
                warn!(task_id = %id, "task left scheduled state before it could be queued");
            }
            report.queued = batch.applied;
            report.conflicts = batch.conflicts;
        }

        if !report.queued.is_empty() {
            info!(scope = %ctx, queued = report.queued.len(), "queued scheduled tasks");
        }
        Ok(report)
    }

    /// `Scheduled` な record の中で最も早い next_execution_time
    pub async fn get_next_execution_time(
        &self,
        ctx: &ExecutionContext,
    ) -> Result<Option<DateTime<Utc>>> {
        let value = self
            .store
            .min_aggregate(
                ctx,
                AggregateField::NextExecutionTime,
                Some(TaskStatus::Scheduled),
            )
            .await?;
        match value {
            None => Ok(None),
            Some(AggregateValue::Timestamp(at)) => Ok(Some(at)),
            Some(other) => Err(malformed(AggregateField::NextExecutionTime, other)),
        }
    }

    /// すべての record の中で最も短い run_interval（poller の sleep 幅の目安）
    pub async fn get_min_run_interval(
        &self,
        ctx: &ExecutionContext,
    ) -> Result<Option<RunInterval>> {
        let value = self
            .store
            .min_aggregate(ctx, AggregateField::RunInterval, None)
            .await?;
        match value {
            None => Ok(None),
            Some(AggregateValue::Interval(interval)) => Ok(Some(interval)),
            Some(other) => Err(malformed(AggregateField::RunInterval, other)),
        }
    }
}

fn malformed(field: AggregateField, value: AggregateValue) -> SchedulerError {
    StoreError::Malformed(format!("min({field:?}) returned {value:?}")).into()
}
