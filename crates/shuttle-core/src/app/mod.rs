//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **TaskScheduler**: due なタスクを dispatch する 1 回分の pass
//! - **SchedulerLoop**: pass を繰り返す poller
//! - **TaskExecutor**: 受信したメッセージを検証して実行
//! - **WorkerGroup**: Inbox から受信して executor に渡すワーカー群
//! - **RequeueDeadMessagesTask** / **ReleaseStaleTasksTask**: recovery 用の定期タスク
//! - **TaskAdmin**: 運用向けの操作
//! - **SchedulerBuilder**: アプリケーションの構築とワイヤリング

pub mod admin;
pub mod builder;
pub mod executor;
pub mod recovery;
pub mod scheduler;
pub mod scheduler_loop;
pub mod stale;
pub mod status;
pub mod worker;

// 主要な型を再エクスポート
pub use self::admin::TaskAdmin;
pub use self::builder::{App, BuildError, Collaborators, SchedulerBuilder};
pub use self::executor::{DiscardReason, HandleOutcome, TaskExecutor};
pub use self::recovery::RequeueDeadMessagesTask;
pub use self::scheduler::{QueueReport, TaskScheduler};
pub use self::scheduler_loop::{PollSettings, SchedulerLoop};
pub use self::stale::ReleaseStaleTasksTask;
pub use self::status::StatusCounts;
pub use self::worker::WorkerGroup;
