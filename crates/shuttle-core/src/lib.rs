//! shuttle-core
//!
//! 定期タスクのスケジューラ。実行時刻が来たタスクを task store から取り出し、
//! at-least-once の channel で配送して worker が実行する。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task_type, status, record, message, context, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, DispatchChannel / Inbox / DeliveryBacklog, Clock, IdGenerator）
//! - **typed**: 型付き Task API（ScheduledTask trait, Runnable, TaskRegistry）
//! - **app**: アプリケーションロジック（scheduler, executor, worker, recovery, admin, builder）
//! - **impls**: 実装（InMemoryTaskStore, InMemoryDispatchChannel など開発用）
//! - **config**: TOML 設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

pub use crate::app::{App, Collaborators, SchedulerBuilder};
pub use crate::config::ShuttleConfig;
pub use crate::domain::{ExecutionContext, Result, SchedulerError};
pub use crate::typed::ScheduledTask;
