//! TaskExecutor - 受信した DispatchMessage を 1 件処理する
//!
//! # フロー（find → check → claim → run → settle）
//! 1. TaskStore から record を読み直す（メッセージは id しか信用しない）
//! 2. `Queued` 以外なら捨てる（重複配送・古いメッセージ）
//! 3. `Queued -> Running` の条件付き更新で claim（ここが排他点）
//! 4. registry から Runnable を組み立てて run
//! 5. 成功: `Running -> Scheduled`（last = now, next = now + interval）
//!    失敗: `Running -> Failed` にしてから TaskRun エラーを返す
//!
//! `Discarded` は正常終了です。呼び出し側はメッセージを ack してよい。

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::domain::{
    DispatchMessage, ExecutionContext, Result, SchedulerError, StatusUpdate, TaskId, TaskStatus,
};
use crate::ports::{Clock, TaskStore};
use crate::typed::TaskRegistry;

/// メッセージを実行せずに捨てた理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// record が存在しない（削除済み）
    NotFound,
    /// record が `Queued` ではなかった
    NotQueued(TaskStatus),
    /// claim の条件付き更新で他の worker に負けた
    ClaimLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    Handled,
    Discarded(DiscardReason),
}

pub struct TaskExecutor {
    registry: Arc<TaskRegistry>,
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
}

impl TaskExecutor {
    pub fn new(
        registry: Arc<TaskRegistry>,
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            store,
            clock,
        }
    }

    pub async fn handle(
        &self,
        ctx: &ExecutionContext,
        message: &DispatchMessage,
    ) -> Result<HandleOutcome> {
        let task_id = message.task_id;
        let Some(record) = self.store.find(ctx, task_id).await? else {
            debug!(%task_id, "task no longer exists, discarding message");
            return Ok(HandleOutcome::Discarded(DiscardReason::NotFound));
        };

        if record.status != TaskStatus::Queued {
            debug!(%task_id, status = %record.status, "task is not queued, discarding message");
            return Ok(HandleOutcome::Discarded(DiscardReason::NotQueued(
                record.status,
            )));
        }

        let claim = StatusUpdate::transition(
            task_id,
            TaskStatus::Queued,
            TaskStatus::Running,
            self.clock.now(),
        );
        if !self.store.update_status(ctx, claim).await? {
            debug!(%task_id, "claim lost to another worker");
            return Ok(HandleOutcome::Discarded(DiscardReason::ClaimLost));
        }

        // record 側の task_type が正（メッセージのものは参考値）
        let definition = match self.registry.resolve(&record.task_type) {
            Ok(definition) => definition,
            Err(e) => {
                error!(%task_id, task_type = %record.task_type, "claimed task has no registered definition");
                self.mark_failed(ctx, record.id).await?;
                return Err(e);
            }
        };

        let runnable = definition.instantiate();
        match runnable.run_dyn(ctx).await {
            Ok(()) => {
                let now = self.clock.now();
                // 実行中に interval が変わっている可能性があるので読み直す
                let interval = match self.store.find(ctx, task_id).await? {
                    Some(current) => current.run_interval,
                    None => record.run_interval,
                };
                let update = StatusUpdate::reschedule_after_run(task_id, interval, now);
                let next = update.next_execution_time;
                if self.store.update_status(ctx, update).await? {
                    info!(%task_id, task_type = %record.task_type, next_execution_time = ?next, "task ran");
                } else {
                    // 実行中に deactivate / stale release された
                    warn!(%task_id, "task left running state during execution, not rescheduled");
                }
                Ok(HandleOutcome::Handled)
            }
            Err(run_error) => {
                error!(%task_id, task_type = %record.task_type, error = %run_error, "task failed");
                self.mark_failed(ctx, record.id).await?;
                Err(SchedulerError::TaskRun {
                    task_id,
                    source: run_error,
                })
            }
        }
    }

    async fn mark_failed(&self, ctx: &ExecutionContext, task_id: TaskId) -> Result<()> {
        let update = StatusUpdate::transition(
            task_id,
            TaskStatus::Running,
            TaskStatus::Failed,
            self.clock.now(),
        );
        if !self.store.update_status(ctx, update).await? {
            warn!(%task_id, "task left running state before it could be marked failed");
        }
        Ok(())
    }
}
