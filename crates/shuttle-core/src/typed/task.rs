//! ScheduledTask trait - 型付き Task Definition
//!
//! # 学習ポイント
//! - Associated Constants (`const TYPE`, `const RUN_INTERVAL_SECS`)
//! - 型と task_type 文字列の対応をコンパイル時に固定する

use async_trait::async_trait;

use crate::domain::{ExecutionContext, TaskRunError};

/// ScheduledTask は task_type・実行間隔・本体を 1 つの型にまとめる
///
/// # 使用例
/// ```ignore
/// struct CleanupTask { store: Arc<dyn TaskStore> }
///
/// #[async_trait]
/// impl ScheduledTask for CleanupTask {
///     const TYPE: &'static str = "maintenance.cleanup";
///     const RUN_INTERVAL_SECS: u32 = 3600;
///
///     async fn run(&self, ctx: &ExecutionContext) -> Result<(), TaskRunError> {
///         Ok(())
///     }
/// }
/// ```
///
/// # Trait Bounds
/// - `Send + Sync`: 複数 worker から安全に使えるため
/// - `'static`: Box<dyn Runnable> に格納できるため
#[async_trait]
pub trait ScheduledTask: Send + Sync + 'static {
    /// task_type（Task Record の `task_type` と一致させる）
    const TYPE: &'static str;

    /// 既定の実行間隔（秒、1 以上）
    const RUN_INTERVAL_SECS: u32;

    /// タスク本体。引数なし・戻り値なし、失敗は TaskRunError で返す
    async fn run(&self, ctx: &ExecutionContext) -> Result<(), TaskRunError>;
}
