//! ReleaseStaleTasksTask - `Queued` / `Running` のまま止まった record を戻す定期タスク
//!
//! worker がクラッシュすると record は `Running` のまま残り、二度と due になりません。
//! `updated_at` が timeout より古い record を `Scheduled` に戻します
//! （next_execution_time は変えないので、すぐに due になる）。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::{ExecutionContext, StatusUpdate, TaskRunError, TaskStatus};
use crate::ports::{Clock, TaskStore};
use crate::typed::ScheduledTask;

pub struct ReleaseStaleTasksTask {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    timeout: chrono::Duration,
}

impl ReleaseStaleTasksTask {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>, timeout: chrono::Duration) -> Self {
        Self {
            store,
            clock,
            timeout,
        }
    }
}

#[async_trait]
impl ScheduledTask for ReleaseStaleTasksTask {
    const TYPE: &'static str = "scheduler.release_stale_tasks";
    const RUN_INTERVAL_SECS: u32 = 300;

    async fn run(&self, ctx: &ExecutionContext) -> Result<(), TaskRunError> {
        let now = self.clock.now();
        let Some(cutoff) = now.checked_sub_signed(self.timeout) else {
            debug!(scope = %ctx, "stale timeout reaches past the calendar, nothing to release");
            return Ok(());
        };

        let mut updates = Vec::new();
        for status in [TaskStatus::Queued, TaskStatus::Running] {
            let stale = self
                .store
                .search_stale(ctx, status, cutoff)
                .await
                .map_err(|e| TaskRunError::with_source("searching stale tasks failed", e))?;
            updates.extend(stale.into_iter().map(|record| {
                StatusUpdate::transition(record.id, status, TaskStatus::Scheduled, now)
            }));
        }
        if updates.is_empty() {
            return Ok(());
        }

        let report = self
            .store
            .batch_update_status(ctx, updates)
            .await
            .map_err(|e| TaskRunError::with_source("releasing stale tasks failed", e))?;
        for id in &report.conflicts {
            warn!(task_id = %id, "stale task changed before it could be released");
        }
        info!(scope = %ctx, released = report.applied.len(), "released stale tasks");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RunInterval, ScheduledTaskRecord, TaskId, TaskType};
    use crate::impls::InMemoryTaskStore;
    use crate::ports::FixedClock;
    use chrono::{DateTime, TimeZone, Utc};
    use ulid::Ulid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    async fn insert(
        store: &InMemoryTaskStore,
        status: TaskStatus,
        updated_at: DateTime<Utc>,
    ) -> ScheduledTaskRecord {
        let mut record = ScheduledTaskRecord::new(
            TaskId::from_ulid(Ulid::new()),
            TaskType::new("test.heartbeat").unwrap(),
            RunInterval::from_secs(60).unwrap(),
            t0() - chrono::Duration::hours(2),
            updated_at,
        );
        record.status = status;
        store
            .insert(&ExecutionContext::system(), record.clone())
            .await
            .unwrap();
        record
    }

    #[tokio::test]
    async fn only_old_claimed_records_are_released() {
        let store = Arc::new(InMemoryTaskStore::new());
        let ctx = ExecutionContext::system();
        let old = t0() - chrono::Duration::hours(1);
        let recent = t0() - chrono::Duration::minutes(1);
        let stuck_running = insert(&store, TaskStatus::Running, old).await;
        let stuck_queued = insert(&store, TaskStatus::Queued, old).await;
        let busy = insert(&store, TaskStatus::Running, recent).await;
        let failed = insert(&store, TaskStatus::Failed, old).await;

        let task = ReleaseStaleTasksTask::new(
            store.clone(),
            Arc::new(FixedClock::new(t0())),
            chrono::Duration::minutes(30),
        );
        task.run(&ctx).await.unwrap();

        for record in [&stuck_running, &stuck_queued] {
            let stored = store.find(&ctx, record.id).await.unwrap().unwrap();
            assert_eq!(stored.status, TaskStatus::Scheduled);
            assert_eq!(stored.next_execution_time, record.next_execution_time);
            assert!(stored.is_due(t0()));
        }
        let busy_now = store.find(&ctx, busy.id).await.unwrap().unwrap();
        assert_eq!(busy_now.status, TaskStatus::Running);
        let failed_now = store.find(&ctx, failed.id).await.unwrap().unwrap();
        assert_eq!(failed_now.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn store_outage_fails_the_run() {
        let store = Arc::new(InMemoryTaskStore::new());
        store.set_unavailable(true);
        let task = ReleaseStaleTasksTask::new(
            store,
            Arc::new(FixedClock::new(t0())),
            chrono::Duration::minutes(30),
        );

        assert!(task.run(&ExecutionContext::system()).await.is_err());
    }

    #[tokio::test]
    async fn timeout_beyond_the_calendar_is_a_no_op() {
        let store = Arc::new(InMemoryTaskStore::new());
        let ctx = ExecutionContext::system();
        let stuck = insert(&store, TaskStatus::Running, t0() - chrono::Duration::days(30)).await;

        let task = ReleaseStaleTasksTask::new(
            store.clone(),
            Arc::new(FixedClock::new(t0())),
            chrono::TimeDelta::MAX,
        );
        task.run(&ctx).await.unwrap();

        let stored = store.find(&ctx, stuck.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Running);
    }
}
