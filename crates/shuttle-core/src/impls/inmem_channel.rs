//! InMemoryDispatchChannel - 開発用の配送路
//!
//! # 学習ポイント
//! - Mutex + Condvar による blocking receive
//! - Async での blocking 処理の扱い（spawn_blocking）
//! - scope による複数キューの管理
//!
//! # メッセージの状態
//! - ready: 配送待ち
//! - in_flight: 配送済み・ack 待ち（ack されないまま古くなったら dead と見なす）
//! - dead: reject された（dead-letter）

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::domain::{ChannelError, DispatchMessage, ExecutionContext, MessageId};
use crate::ports::{
    Clock, DeadMessage, Delivery, DeliveryBacklog, DispatchChannel, IdGenerator, Inbox,
    UlidGenerator,
};

#[derive(Debug, Clone)]
struct Envelope {
    id: MessageId,
    payload: Vec<u8>,
    published_at: DateTime<Utc>,
    attempts: u32,
}

#[derive(Debug, Clone)]
struct InFlight {
    envelope: Envelope,
    delivered_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct DeadLetter {
    envelope: Envelope,
    since: DateTime<Utc>,
    reason: String,
}

#[derive(Debug, Default)]
struct ScopeQueues {
    ready: VecDeque<Envelope>,
    in_flight: HashMap<MessageId, InFlight>,
    dead: HashMap<MessageId, DeadLetter>,
}

type Scopes = HashMap<String, ScopeQueues>;

/// scope ごとのメッセージ数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelCounts {
    pub ready: usize,
    pub in_flight: usize,
    pub dead: usize,
}

/// InMemoryDispatchChannel は開発用の配送路
///
/// # 使用例
/// ```ignore
/// let channel = InMemoryDispatchChannel::new(Arc::new(SystemClock));
/// channel.publish(&ctx, message).await?;
/// let delivery = channel.receive(&ctx, Duration::from_secs(5)).await?;
/// ```
pub struct InMemoryDispatchChannel {
    scopes: Arc<Mutex<Scopes>>,
    /// publish / release 時の通知用
    condvar: Arc<Condvar>,
    clock: Arc<dyn Clock>,
    ids: UlidGenerator<Arc<dyn Clock>>,
}

impl InMemoryDispatchChannel {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            scopes: Arc::new(Mutex::new(HashMap::new())),
            condvar: Arc::new(Condvar::new()),
            ids: UlidGenerator::new(Arc::clone(&clock)),
            clock,
        }
    }

    pub fn counts(&self, ctx: &ExecutionContext) -> Result<ChannelCounts, ChannelError> {
        let scopes = lock(&self.scopes)?;
        Ok(scopes
            .get(ctx.scope())
            .map(|q| ChannelCounts {
                ready: q.ready.len(),
                in_flight: q.in_flight.len(),
                dead: q.dead.len(),
            })
            .unwrap_or_default())
    }

    fn with_scope<R>(
        &self,
        ctx: &ExecutionContext,
        f: impl FnOnce(&mut ScopeQueues) -> Result<R, ChannelError>,
    ) -> Result<R, ChannelError> {
        let mut scopes = lock(&self.scopes)?;
        let queues = scopes.entry(ctx.scope().to_string()).or_default();
        f(queues)
    }
}

fn lock(scopes: &Mutex<Scopes>) -> Result<MutexGuard<'_, Scopes>, ChannelError> {
    scopes
        .lock()
        .map_err(|e| ChannelError::OperationFailed(format!("lock poisoned: {e}")))
}

#[async_trait]
impl DispatchChannel for InMemoryDispatchChannel {
    async fn publish(
        &self,
        ctx: &ExecutionContext,
        message: DispatchMessage,
    ) -> Result<(), ChannelError> {
        let envelope = Envelope {
            id: self.ids.generate_message_id(),
            payload: message.encode()?,
            published_at: self.clock.now(),
            attempts: 0,
        };
        self.with_scope(ctx, |queues| {
            queues.ready.push_back(envelope);
            Ok(())
        })?;
        // scope をまたいで待っている receiver がいるので全員起こす
        self.condvar.notify_all();
        Ok(())
    }
}

#[async_trait]
impl Inbox for InMemoryDispatchChannel {
    async fn receive(
        &self,
        ctx: &ExecutionContext,
        timeout: Duration,
    ) -> Result<Option<Delivery>, ChannelError> {
        let scopes = Arc::clone(&self.scopes);
        let condvar = Arc::clone(&self.condvar);
        let clock = Arc::clone(&self.clock);
        let scope = ctx.scope().to_string();

        tokio::task::spawn_blocking(move || {
            let start = std::time::Instant::now();
            let mut guard = lock(&scopes)?;
            loop {
                if let Some(queues) = guard.get_mut(&scope) {
                    while let Some(mut envelope) = queues.ready.pop_front() {
                        let now = clock.now();
                        envelope.attempts += 1;
                        match DispatchMessage::decode(&envelope.payload) {
                            Ok(message) => {
                                let delivery = Delivery {
                                    id: envelope.id,
                                    message,
                                    published_at: envelope.published_at,
                                    attempts: envelope.attempts,
                                };
                                queues.in_flight.insert(
                                    envelope.id,
                                    InFlight {
                                        envelope,
                                        delivered_at: now,
                                    },
                                );
                                return Ok(Some(delivery));
                            }
                            Err(e) => {
                                warn!(message_id = %envelope.id, error = %e, "undecodable message moved to dead-letter");
                                queues.dead.insert(
                                    envelope.id,
                                    DeadLetter {
                                        envelope,
                                        since: now,
                                        reason: e.to_string(),
                                    },
                                );
                            }
                        }
                    }
                }

                let elapsed = start.elapsed();
                if elapsed >= timeout {
                    return Ok(None);
                }
                let remaining = timeout.saturating_sub(elapsed);
                let (new_guard, _) = condvar
                    .wait_timeout(guard, remaining)
                    .map_err(|e| ChannelError::OperationFailed(format!("lock poisoned: {e}")))?;
                guard = new_guard;
            }
        })
        .await
        .map_err(|e| ChannelError::OperationFailed(format!("receive failed: {e}")))?
    }

    async fn ack(&self, ctx: &ExecutionContext, id: MessageId) -> Result<(), ChannelError> {
        self.with_scope(ctx, |queues| {
            queues
                .in_flight
                .remove(&id)
                .map(|_| ())
                .ok_or(ChannelError::UnknownMessage(id))
        })
    }

    async fn release(&self, ctx: &ExecutionContext, id: MessageId) -> Result<(), ChannelError> {
        self.with_scope(ctx, |queues| {
            let in_flight = queues
                .in_flight
                .remove(&id)
                .ok_or(ChannelError::UnknownMessage(id))?;
            queues.ready.push_back(in_flight.envelope);
            Ok(())
        })?;
        self.condvar.notify_all();
        Ok(())
    }

    async fn reject(
        &self,
        ctx: &ExecutionContext,
        id: MessageId,
        reason: String,
    ) -> Result<(), ChannelError> {
        let now = self.clock.now();
        self.with_scope(ctx, |queues| {
            let in_flight = queues
                .in_flight
                .remove(&id)
                .ok_or(ChannelError::UnknownMessage(id))?;
            queues.dead.insert(
                id,
                DeadLetter {
                    envelope: in_flight.envelope,
                    since: now,
                    reason,
                },
            );
            Ok(())
        })
    }
}

#[async_trait]
impl DeliveryBacklog for InMemoryDispatchChannel {
    async fn dead_messages(
        &self,
        ctx: &ExecutionContext,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<DeadMessage>, ChannelError> {
        self.with_scope(ctx, |queues| {
            let mut found = Vec::new();
            for dead in queues.dead.values().filter(|d| d.since < older_than) {
                found.push(dead_message(&dead.envelope, dead.since, Some(dead.reason.clone()))?);
            }
            for in_flight in queues
                .in_flight
                .values()
                .filter(|f| f.delivered_at < older_than)
            {
                found.push(dead_message(&in_flight.envelope, in_flight.delivered_at, None)?);
            }
            found.sort_by_key(|m| (m.since, m.id));
            Ok(found)
        })
    }

    async fn resubmit(&self, ctx: &ExecutionContext, id: MessageId) -> Result<(), ChannelError> {
        self.with_scope(ctx, |queues| {
            let envelope = match queues.dead.remove(&id) {
                Some(dead) => dead.envelope,
                None => {
                    queues
                        .in_flight
                        .remove(&id)
                        .ok_or(ChannelError::UnknownMessage(id))?
                        .envelope
                }
            };
            queues.ready.push_back(envelope);
            Ok(())
        })?;
        self.condvar.notify_all();
        Ok(())
    }
}

fn dead_message(
    envelope: &Envelope,
    since: DateTime<Utc>,
    reason: Option<String>,
) -> Result<DeadMessage, ChannelError> {
    Ok(DeadMessage {
        id: envelope.id,
        message: DispatchMessage::decode(&envelope.payload)?,
        since,
        reason,
    })
}
