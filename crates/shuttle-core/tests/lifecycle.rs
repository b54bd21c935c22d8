//! End-to-end lifecycle of scheduled tasks over the in-memory store and channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;
use ulid::Ulid;

use shuttle_core::app::{DiscardReason, HandleOutcome, RequeueDeadMessagesTask};
use shuttle_core::config::RecoveryConfig;
use shuttle_core::domain::{
    DispatchMessage, RunInterval, ScheduledTaskRecord, StoreError, TaskId, TaskRunError,
    TaskStatus, TaskType,
};
use shuttle_core::impls::{InMemoryDispatchChannel, InMemoryTaskStore};
use shuttle_core::ports::{Clock, DispatchChannel, FixedClock, Inbox, TaskStore, UlidGenerator};
use shuttle_core::{App, Collaborators, ExecutionContext, ScheduledTask, SchedulerBuilder, SchedulerError};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

#[derive(Clone, Default)]
struct Calls {
    count: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl Calls {
    fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

struct PingTask(Calls);

#[async_trait]
impl ScheduledTask for PingTask {
    const TYPE: &'static str = "it.ping";
    const RUN_INTERVAL_SECS: u32 = 60;

    async fn run(&self, _ctx: &ExecutionContext) -> Result<(), TaskRunError> {
        self.0.count.fetch_add(1, Ordering::SeqCst);
        if self.0.fail.load(Ordering::SeqCst) {
            return Err(TaskRunError::new("ping failed"));
        }
        Ok(())
    }
}

/// run の途中で止まり、`release` が呼ばれるまで戻らない
struct GatedTask {
    entered: Arc<Notify>,
    release: Arc<Notify>,
    calls: Calls,
}

#[async_trait]
impl ScheduledTask for GatedTask {
    const TYPE: &'static str = "it.gated";
    const RUN_INTERVAL_SECS: u32 = 60;

    async fn run(&self, _ctx: &ExecutionContext) -> Result<(), TaskRunError> {
        self.calls.count.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

struct Harness {
    app: App,
    store: Arc<InMemoryTaskStore>,
    channel: Arc<InMemoryDispatchChannel>,
    clock: FixedClock,
    ping: Calls,
    gated: Calls,
    entered: Arc<Notify>,
    release: Arc<Notify>,
    ctx: ExecutionContext,
}

fn harness() -> Harness {
    let clock = FixedClock::new(t0());
    let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let store = Arc::new(InMemoryTaskStore::new());
    let channel = Arc::new(InMemoryDispatchChannel::new(Arc::clone(&shared_clock)));
    let ping = Calls::default();
    let gated = Calls::default();
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let app = SchedulerBuilder::new()
        .register::<PingTask, _>({
            let ping = ping.clone();
            move || PingTask(ping.clone())
        })
        .unwrap()
        .register::<GatedTask, _>({
            let (entered, release, gated) = (entered.clone(), release.clone(), gated.clone());
            move || GatedTask {
                entered: entered.clone(),
                release: release.clone(),
                calls: gated.clone(),
            }
        })
        .unwrap()
        .with_recovery(
            &RecoveryConfig::default(),
            channel.clone(),
            store.clone(),
            Arc::clone(&shared_clock),
        )
        .unwrap()
        .build(Collaborators {
            store: store.clone(),
            channel: channel.clone(),
            ids: Arc::new(UlidGenerator::new(Arc::clone(&shared_clock))),
            clock: shared_clock,
        })
        .unwrap();

    Harness {
        app,
        store,
        channel,
        clock,
        ping,
        gated,
        entered,
        release,
        ctx: ExecutionContext::system(),
    }
}

async fn insert(h: &Harness, task_type: &str, status: TaskStatus, next: DateTime<Utc>) -> ScheduledTaskRecord {
    let mut record = ScheduledTaskRecord::new(
        TaskId::from_ulid(Ulid::new()),
        TaskType::new(task_type).unwrap(),
        RunInterval::from_secs(60).unwrap(),
        next,
        t0() - chrono::Duration::hours(1),
    );
    record.status = status;
    h.store.insert(&h.ctx, record.clone()).await.unwrap();
    record
}

async fn receive(h: &Harness) -> shuttle_core::ports::Delivery {
    h.channel
        .receive(&h.ctx, Duration::from_secs(1))
        .await
        .unwrap()
        .expect("a delivery")
}

#[tokio::test]
async fn due_task_is_queued_run_and_rescheduled() {
    let h = harness();
    let a = insert(&h, "it.ping", TaskStatus::Scheduled, t0() - chrono::Duration::seconds(30)).await;

    let report = h.app.scheduler.queue_scheduled_tasks(&h.ctx).await.unwrap();
    assert_eq!(report.queued, vec![a.id]);
    assert_eq!(h.channel.counts(&h.ctx).unwrap().ready, 1);
    let queued = h.store.find(&h.ctx, a.id).await.unwrap().unwrap();
    assert_eq!(queued.status, TaskStatus::Queued);

    let run_at = t0() + chrono::Duration::seconds(2);
    h.clock.set(run_at);
    let delivery = receive(&h).await;
    assert_eq!(delivery.message.task_id, a.id);
    let outcome = h.app.executor.handle(&h.ctx, &delivery.message).await.unwrap();
    h.channel.ack(&h.ctx, delivery.id).await.unwrap();

    assert_eq!(outcome, HandleOutcome::Handled);
    assert_eq!(h.ping.get(), 1);
    let done = h.store.find(&h.ctx, a.id).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Scheduled);
    assert_eq!(done.last_execution_time, Some(run_at));
    assert_eq!(done.next_execution_time, run_at + chrono::Duration::seconds(60));
    assert_eq!(
        h.app.scheduler.get_next_execution_time(&h.ctx).await.unwrap(),
        Some(run_at + chrono::Duration::seconds(60))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_message_during_run_is_discarded() {
    let h = harness();
    let b = insert(&h, "it.gated", TaskStatus::Queued, t0() - chrono::Duration::seconds(1)).await;
    let message = DispatchMessage::new(b.id, b.task_type.clone());
    let executor = Arc::clone(&h.app.executor);

    let first = tokio::spawn({
        let executor = Arc::clone(&executor);
        let ctx = h.ctx.clone();
        let message = message.clone();
        async move { executor.handle(&ctx, &message).await }
    });
    h.entered.notified().await;

    let running = h.store.find(&h.ctx, b.id).await.unwrap().unwrap();
    assert_eq!(running.status, TaskStatus::Running);
    let duplicate = executor.handle(&h.ctx, &message).await.unwrap();
    assert_eq!(
        duplicate,
        HandleOutcome::Discarded(DiscardReason::NotQueued(TaskStatus::Running))
    );

    h.release.notify_one();
    assert_eq!(first.await.unwrap().unwrap(), HandleOutcome::Handled);
    assert_eq!(h.gated.get(), 1);
}

#[tokio::test]
async fn failing_run_marks_failed_and_keeps_next_execution_time() {
    let h = harness();
    h.ping.fail.store(true, Ordering::SeqCst);
    let due = t0() - chrono::Duration::seconds(5);
    let c = insert(&h, "it.ping", TaskStatus::Scheduled, due).await;

    h.app.scheduler.queue_scheduled_tasks(&h.ctx).await.unwrap();
    let delivery = receive(&h).await;
    let err = h
        .app
        .executor
        .handle(&h.ctx, &delivery.message)
        .await
        .unwrap_err();

    assert!(matches!(err, SchedulerError::TaskRun { task_id, .. } if task_id == c.id));
    assert!(!err.is_retryable());
    let failed = h.store.find(&h.ctx, c.id).await.unwrap().unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(failed.next_execution_time, due);

    // Failed は due にならない
    let again = h.app.scheduler.queue_scheduled_tasks(&h.ctx).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn replay_after_completion_is_discarded() {
    let h = harness();
    let a = insert(&h, "it.ping", TaskStatus::Scheduled, t0() - chrono::Duration::seconds(1)).await;
    h.app.scheduler.queue_scheduled_tasks(&h.ctx).await.unwrap();
    let delivery = receive(&h).await;
    h.app.executor.handle(&h.ctx, &delivery.message).await.unwrap();
    let after_first = h.store.find(&h.ctx, a.id).await.unwrap().unwrap();

    let replay = h.app.executor.handle(&h.ctx, &delivery.message).await.unwrap();

    assert_eq!(
        replay,
        HandleOutcome::Discarded(DiscardReason::NotQueued(TaskStatus::Scheduled))
    );
    assert_eq!(h.ping.get(), 1);
    assert_eq!(h.store.find(&h.ctx, a.id).await.unwrap().unwrap(), after_first);
}

#[tokio::test]
async fn store_outage_aborts_pass_without_publishing() {
    let h = harness();
    insert(&h, "it.ping", TaskStatus::Scheduled, t0() - chrono::Duration::seconds(1)).await;
    h.store.set_unavailable(true);

    let err = h.app.scheduler.queue_scheduled_tasks(&h.ctx).await.unwrap_err();

    assert!(matches!(err, SchedulerError::Store(StoreError::Unavailable(_))));
    assert_eq!(h.channel.counts(&h.ctx).unwrap().ready, 0);
}

#[tokio::test]
async fn min_run_interval_tracks_records() {
    let h = harness();
    assert_eq!(h.app.scheduler.get_min_run_interval(&h.ctx).await.unwrap(), None);

    let created = h.app.admin.register_missing_tasks(&h.ctx).await.unwrap();

    // it.gated, it.ping, requeue task の 3 種類
    assert_eq!(created.len(), 3);
    assert_eq!(
        h.app.scheduler.get_min_run_interval(&h.ctx).await.unwrap(),
        Some(RunInterval::from_secs(60).unwrap())
    );
}

#[tokio::test]
async fn lost_message_is_recovered_by_requeue_task() {
    let h = harness();
    let a = insert(&h, "it.ping", TaskStatus::Scheduled, t0() - chrono::Duration::seconds(1)).await;
    h.app.scheduler.queue_scheduled_tasks(&h.ctx).await.unwrap();

    // worker が受信したまま落ちた
    let lost = receive(&h).await;
    assert_eq!(h.channel.counts(&h.ctx).unwrap().in_flight, 1);

    h.clock.advance(chrono::Duration::minutes(10));
    let requeue = RequeueDeadMessagesTask::new(
        h.channel.clone(),
        Arc::new(h.clock.clone()),
        RecoveryConfig::default().dead_message_threshold(),
    );
    requeue.run(&h.ctx).await.unwrap();

    let redelivered = receive(&h).await;
    assert_eq!(redelivered.id, lost.id);
    assert_eq!(redelivered.attempts, 2);
    let outcome = h.app.executor.handle(&h.ctx, &redelivered.message).await.unwrap();
    h.channel.ack(&h.ctx, redelivered.id).await.unwrap();

    assert_eq!(outcome, HandleOutcome::Handled);
    assert_eq!(h.ping.get(), 1);
    let done = h.store.find(&h.ctx, a.id).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Scheduled);
}

#[tokio::test]
async fn republished_message_for_completed_task_is_harmless() {
    let h = harness();
    let a = insert(&h, "it.ping", TaskStatus::Queued, t0()).await;
    let message = DispatchMessage::new(a.id, a.task_type.clone());
    h.channel.publish(&h.ctx, message.clone()).await.unwrap();
    h.channel.publish(&h.ctx, message).await.unwrap();

    let first = receive(&h).await;
    let second = receive(&h).await;
    let o1 = h.app.executor.handle(&h.ctx, &first.message).await.unwrap();
    let o2 = h.app.executor.handle(&h.ctx, &second.message).await.unwrap();

    assert_eq!(o1, HandleOutcome::Handled);
    assert!(matches!(o2, HandleOutcome::Discarded(_)));
    assert_eq!(h.ping.get(), 1);
}
