//! RequeueDeadMessagesTask - 失われたメッセージを再投入する定期タスク
//!
//! dead-letter にあるメッセージと、配送されたまま ack されずに古くなったメッセージを
//! threshold より古いものから順に resubmit します。
//! record の状態には触りません。再投入されたメッセージは executor の状態チェックを通るので、
//! すでに処理済みのものは単に捨てられます。

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::domain::{ExecutionContext, TaskRunError};
use crate::ports::{Clock, DeliveryBacklog};
use crate::typed::ScheduledTask;

pub struct RequeueDeadMessagesTask {
    backlog: Arc<dyn DeliveryBacklog>,
    clock: Arc<dyn Clock>,
    threshold: chrono::Duration,
}

impl RequeueDeadMessagesTask {
    pub fn new(
        backlog: Arc<dyn DeliveryBacklog>,
        clock: Arc<dyn Clock>,
        threshold: chrono::Duration,
    ) -> Self {
        Self {
            backlog,
            clock,
            threshold,
        }
    }
}

#[async_trait]
impl ScheduledTask for RequeueDeadMessagesTask {
    const TYPE: &'static str = "message_queue.requeue_dead_messages";
    const RUN_INTERVAL_SECS: u32 = 60;

    async fn run(&self, ctx: &ExecutionContext) -> Result<(), TaskRunError> {
        // threshold が暦の範囲を超えるなら、それより古いメッセージはない
        let Some(older_than) = self.clock.now().checked_sub_signed(self.threshold) else {
            debug!(scope = %ctx, "dead message threshold reaches past the calendar, nothing to requeue");
            return Ok(());
        };
        let dead = self
            .backlog
            .dead_messages(ctx, older_than)
            .await
            .map_err(|e| TaskRunError::with_source("listing dead messages failed", e))?;

        let mut failed = 0usize;
        for message in &dead {
            if let Err(e) = self.backlog.resubmit(ctx, message.id).await {
                warn!(message_id = %message.id, task_id = %message.message.task_id, error = %e, "resubmit failed");
                failed += 1;
            }
        }

        if !dead.is_empty() {
            info!(scope = %ctx, found = dead.len(), failed, "requeued dead messages");
        }
        if failed > 0 {
            return Err(TaskRunError::new(format!(
                "{failed} of {} dead messages could not be resubmitted",
                dead.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChannelError, DispatchMessage, MessageId, TaskId, TaskType};
    use crate::impls::InMemoryDispatchChannel;
    use crate::ports::{DeadMessage, DispatchChannel, FixedClock, Inbox};
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Mutex;
    use std::time::Duration;
    use ulid::Ulid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn message() -> DispatchMessage {
        DispatchMessage::new(
            TaskId::from_ulid(Ulid::new()),
            TaskType::new("test.heartbeat").unwrap(),
        )
    }

    #[tokio::test]
    async fn old_dead_and_unacked_messages_are_resubmitted() {
        let clock = FixedClock::new(t0());
        let channel = Arc::new(InMemoryDispatchChannel::new(Arc::new(clock.clone())));
        let ctx = ExecutionContext::system();
        for _ in 0..3 {
            channel.publish(&ctx, message()).await.unwrap();
        }
        let rejected = channel.receive(&ctx, Duration::from_secs(1)).await.unwrap().unwrap();
        channel.reject(&ctx, rejected.id, "boom".into()).await.unwrap();
        let _unacked = channel.receive(&ctx, Duration::from_secs(1)).await.unwrap().unwrap();

        let task = RequeueDeadMessagesTask::new(
            channel.clone(),
            Arc::new(clock.clone()),
            chrono::Duration::minutes(5),
        );

        // まだ threshold に達していない
        task.run(&ctx).await.unwrap();
        assert_eq!(channel.counts(&ctx).unwrap().ready, 1);

        clock.advance(chrono::Duration::minutes(6));
        task.run(&ctx).await.unwrap();

        let counts = channel.counts(&ctx).unwrap();
        assert_eq!((counts.ready, counts.in_flight, counts.dead), (3, 0, 0));
    }

    /// 指定した id の resubmit だけ失敗する backlog
    struct StubBacklog {
        messages: Vec<DeadMessage>,
        broken: MessageId,
        resubmitted: Mutex<Vec<MessageId>>,
    }

    #[async_trait]
    impl DeliveryBacklog for StubBacklog {
        async fn dead_messages(
            &self,
            _ctx: &ExecutionContext,
            _older_than: DateTime<Utc>,
        ) -> Result<Vec<DeadMessage>, ChannelError> {
            Ok(self.messages.clone())
        }

        async fn resubmit(&self, _ctx: &ExecutionContext, id: MessageId) -> Result<(), ChannelError> {
            if id == self.broken {
                return Err(ChannelError::OperationFailed("broker down".into()));
            }
            self.resubmitted.lock().unwrap().push(id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn one_failed_resubmit_does_not_stop_the_rest() {
        let dead: Vec<DeadMessage> = (0..3)
            .map(|_| DeadMessage {
                id: MessageId::from_ulid(Ulid::new()),
                message: message(),
                since: t0(),
                reason: None,
            })
            .collect();
        let backlog = Arc::new(StubBacklog {
            broken: dead[0].id,
            messages: dead.clone(),
            resubmitted: Mutex::new(Vec::new()),
        });
        let task = RequeueDeadMessagesTask::new(
            backlog.clone(),
            Arc::new(FixedClock::new(t0())),
            chrono::Duration::minutes(5),
        );

        let err = task.run(&ExecutionContext::system()).await.unwrap_err();

        assert!(err.message().contains("1 of 3"));
        assert_eq!(
            *backlog.resubmitted.lock().unwrap(),
            vec![dead[1].id, dead[2].id]
        );
    }

    #[tokio::test]
    async fn threshold_beyond_the_calendar_is_a_no_op() {
        let clock = FixedClock::new(t0());
        let channel = Arc::new(InMemoryDispatchChannel::new(Arc::new(clock.clone())));
        let ctx = ExecutionContext::system();
        channel.publish(&ctx, message()).await.unwrap();
        let delivery = channel.receive(&ctx, Duration::from_secs(1)).await.unwrap().unwrap();
        channel.reject(&ctx, delivery.id, "boom".into()).await.unwrap();
        clock.advance(chrono::Duration::days(365));

        let task = RequeueDeadMessagesTask::new(
            channel.clone(),
            Arc::new(clock.clone()),
            chrono::TimeDelta::MAX,
        );
        task.run(&ctx).await.unwrap();

        assert_eq!(channel.counts(&ctx).unwrap().dead, 1);
    }
}
