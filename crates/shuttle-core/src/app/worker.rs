//! WorkerGroup - Inbox からメッセージを受け取り TaskExecutor に渡す
//!
//! scheduler はメッセージを publish してから `Scheduled -> Queued` をまとめて書くので、
//! 書き込みより先に届いたメッセージは `NotQueued(Scheduled)` になる。
//! これは ack せず、間隔を空けて `EARLY_DELIVERY_RETRIES` 回まで release する。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::app::executor::{DiscardReason, HandleOutcome, TaskExecutor};
use crate::domain::{ExecutionContext, SchedulerError, TaskStatus};
use crate::ports::{Delivery, Inbox};

/// 状態の書き込み待ちで release する最大回数
pub const EARLY_DELIVERY_RETRIES: u32 = 5;

/// release 前の待ち時間（attempts 倍）
const EARLY_DELIVERY_BACKOFF: Duration = Duration::from_millis(20);

/// ワーカー群のハンドル
/// - `request_shutdown()` で全ワーカーが新しい受信をやめる
/// - `shutdown_and_join()` で実行中のタスクが終わるのを待つ
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// scope `ctx` で `inbox` を読む worker を `n` 個起動
    pub fn spawn(
        n: usize,
        ctx: ExecutionContext,
        inbox: Arc<dyn Inbox>,
        executor: Arc<TaskExecutor>,
        receive_timeout: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let worker = Worker {
                id: worker_id,
                ctx: ctx.clone(),
                inbox: Arc::clone(&inbox),
                executor: Arc::clone(&executor),
                receive_timeout,
            };
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker.run(&mut rx).await;
            });
            joins.push(join);
        }

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// 全ワーカーに停止を要求
    /// 実行中のタスクはキャンセルしない。新しい受信だけをやめる
    pub fn request_shutdown(&self) {
        // receiver が drop 済みでも構わない
        let _ = self.shutdown_tx.send(true);
    }

    /// 停止を要求して全ワーカーの終了を待つ
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            if let Err(e) = j.await {
                error!(error = %e, "worker task panicked");
            }
        }
    }
}

struct Worker {
    id: usize,
    ctx: ExecutionContext,
    inbox: Arc<dyn Inbox>,
    executor: Arc<TaskExecutor>,
    receive_timeout: Duration,
}

impl Worker {
    async fn run(&self, shutdown_rx: &mut watch::Receiver<bool>) {
        debug!(worker = self.id, "worker started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // receive は待つので shutdown と競合させる
            // 途中でキャンセルされた配送は ack されず、backlog から回収される
            let received = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                received = self.inbox.receive(&self.ctx, self.receive_timeout) => received,
            };

            let delivery = match received {
                Ok(Some(delivery)) => delivery,
                Ok(None) => continue,
                Err(e) => {
                    warn!(worker = self.id, error = %e, "receive failed");
                    tokio::time::sleep(self.receive_timeout).await;
                    continue;
                }
            };

            let result = self.executor.handle(&self.ctx, &delivery.message).await;
            self.settle(&delivery, result).await;
        }
        debug!(worker = self.id, "worker stopped");
    }

    /// 処理結果を channel に反映する
    /// - 成功 / 破棄: ack
    /// - まだ `Scheduled`（queue 書き込み前に届いた）: 上限まで release
    /// - store 障害: release（再配送させる）
    /// - それ以外: reject（dead-letter、recovery が拾う）
    async fn settle(&self, delivery: &Delivery, result: Result<HandleOutcome, SchedulerError>) {
        let task_id = delivery.message.task_id;
        let settled = match result {
            Ok(HandleOutcome::Discarded(DiscardReason::NotQueued(TaskStatus::Scheduled)))
                if delivery.attempts < EARLY_DELIVERY_RETRIES =>
            {
                debug!(worker = self.id, %task_id, attempts = delivery.attempts, "task not queued yet, releasing delivery");
                tokio::time::sleep(EARLY_DELIVERY_BACKOFF * delivery.attempts.max(1)).await;
                self.inbox.release(&self.ctx, delivery.id).await
            }
            Ok(outcome) => {
                debug!(worker = self.id, %task_id, ?outcome, "delivery handled");
                self.inbox.ack(&self.ctx, delivery.id).await
            }
            Err(e) if e.is_retryable() => {
                warn!(worker = self.id, %task_id, error = %e, "releasing delivery for redelivery");
                self.inbox.release(&self.ctx, delivery.id).await
            }
            Err(e) => {
                self.inbox
                    .reject(&self.ctx, delivery.id, e.to_string())
                    .await
            }
        };
        if let Err(e) = settled {
            error!(worker = self.id, message_id = %delivery.id, error = %e, "failed to settle delivery");
        }
    }
}
