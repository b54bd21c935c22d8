//! Dispatch Channel ports - task_id を worker に届ける at-least-once の配送路
//!
//! # 3 つの面
//! - **DispatchChannel**: scheduler が publish する面（fire-and-forget）
//! - **Inbox**: worker が受信・ack する面
//! - **DeliveryBacklog**: 失われたと見なすメッセージの一覧と再投入（recovery 用）
//!
//! # 設計原則
//! - メッセージは task_id と task_type のみを運ぶ（状態は TaskStore にある）
//! - 同じメッセージが複数回届く可能性がある。重複排除は Executor の状態チェックが担う

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ChannelError, DispatchMessage, ExecutionContext, MessageId};

/// Inbox から受け取った 1 件の配送
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: MessageId,
    pub message: DispatchMessage,
    pub published_at: DateTime<Utc>,
    /// これまでに配送された回数（今回を含む）
    pub attempts: u32,
}

/// 失われたと見なされたメッセージ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadMessage {
    pub id: MessageId,
    pub message: DispatchMessage,
    /// dead-letter に入った時刻、または ack されないまま配送された時刻
    pub since: DateTime<Utc>,
    pub reason: Option<String>,
}

#[async_trait]
pub trait DispatchChannel: Send + Sync {
    async fn publish(
        &self,
        ctx: &ExecutionContext,
        message: DispatchMessage,
    ) -> Result<(), ChannelError>;
}

#[async_trait]
pub trait Inbox: Send + Sync {
    /// 1 件受信する。timeout までに何も無ければ `None`。
    async fn receive(
        &self,
        ctx: &ExecutionContext,
        timeout: Duration,
    ) -> Result<Option<Delivery>, ChannelError>;

    /// 処理完了（handled / discarded）
    async fn ack(&self, ctx: &ExecutionContext, id: MessageId) -> Result<(), ChannelError>;

    /// 再配送させる（store 障害などで処理できなかった）
    async fn release(&self, ctx: &ExecutionContext, id: MessageId) -> Result<(), ChannelError>;

    /// dead-letter へ送る（タスク失敗など）
    async fn reject(
        &self,
        ctx: &ExecutionContext,
        id: MessageId,
        reason: String,
    ) -> Result<(), ChannelError>;
}

#[async_trait]
pub trait DeliveryBacklog: Send + Sync {
    /// `since < older_than` の dead メッセージ
    async fn dead_messages(
        &self,
        ctx: &ExecutionContext,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<DeadMessage>, ChannelError>;

    /// backlog から取り除き、payload をもう一度 publish する
    async fn resubmit(&self, ctx: &ExecutionContext, id: MessageId) -> Result<(), ChannelError>;
}
