//! Typed - 型付き Task API
//!
//! このモジュールは task_type の typo を型で排除し、
//! 実行間隔と実装の対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `ScheduledTask` trait - 型安全
//! - **内部（Dyn）**: `Runnable` / `TaskFactory` trait - object-safe, type erasure

pub mod registry;
pub mod runnable;
pub mod task;

pub use self::registry::{TaskDefinition, TaskRegistry};
pub use self::runnable::{Runnable, TaskFactory};
pub use self::task::ScheduledTask;
