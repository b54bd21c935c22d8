//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: 開発用の正本（scope ごとに分離、障害注入可能）
//! - **InMemoryDispatchChannel**: 開発用の配送路（ready / in-flight / dead-letter）
//!
//! 本番用の実装（RDB, メッセージブローカー）は別クレートに置く想定です。

pub mod inmem_channel;
pub mod memory_store;

pub use self::inmem_channel::{ChannelCounts, InMemoryDispatchChannel};
pub use self::memory_store::InMemoryTaskStore;
