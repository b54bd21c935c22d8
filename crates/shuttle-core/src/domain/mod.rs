//! ドメインモデル（ID、task record、状態、メッセージ、エラー）
//!
//! - ids: ULID ベースの TaskId / MessageId
//! - status: TaskStatus と遷移ルール
//! - record: ScheduledTaskRecord と条件付き更新 StatusUpdate
//! - task_type: TaskType / RunInterval
//! - context: ExecutionContext（明示的に渡すスコープ）
//! - message: DispatchMessage
//! - errors: SchedulerError / StoreError / ChannelError / TaskRunError

pub mod context;
pub mod errors;
pub mod ids;
pub mod message;
pub mod record;
pub mod status;
pub mod task_type;

pub use self::context::ExecutionContext;
pub use self::errors::{ChannelError, Result, SchedulerError, StoreError, TaskRunError};
pub use self::ids::{MessageId, TaskId};
pub use self::message::DispatchMessage;
pub use self::record::{ScheduledTaskRecord, StatusUpdate};
pub use self::status::TaskStatus;
pub use self::task_type::{RunInterval, TaskType};
