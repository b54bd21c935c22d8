//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（DB, メッセージブローカーなど）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - TaskStore が source of truth（正本）
//! - Dispatch Channel は task_id のみを運ぶ at-least-once の配送路
//! - すべての呼び出しに ExecutionContext を明示的に渡す

pub mod clock;
pub mod dispatch_channel;
pub mod id_generator;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::dispatch_channel::{DeadMessage, Delivery, DeliveryBacklog, DispatchChannel, Inbox};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::{AggregateField, AggregateValue, BatchReport, TaskStore};
