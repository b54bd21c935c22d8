//! SchedulerBuilder - registry の組み立てとワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;
use std::time::Duration;

use crate::app::admin::TaskAdmin;
use crate::app::executor::TaskExecutor;
use crate::app::recovery::RequeueDeadMessagesTask;
use crate::app::scheduler::TaskScheduler;
use crate::app::scheduler_loop::{PollSettings, SchedulerLoop};
use crate::app::stale::ReleaseStaleTasksTask;
use crate::app::worker::WorkerGroup;
use crate::config::RecoveryConfig;
use crate::domain::{ExecutionContext, RunInterval, SchedulerError};
use crate::ports::{Clock, DeliveryBacklog, DispatchChannel, IdGenerator, Inbox, TaskStore};
use crate::typed::{ScheduledTask, TaskRegistry};

/// SchedulerBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = SchedulerBuilder::new()
///     .register::<CleanupTask, _>(|| CleanupTask::new())?
///     .expect_tasks(&["maintenance.cleanup"])
///     .build(collaborators)?;
/// ```
///
/// # Fail-fast 設計
/// - expect_tasks() で期待される task_type を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す
pub struct SchedulerBuilder {
    registry: TaskRegistry,
    expected_tasks: Option<Vec<String>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),
}

/// build() に渡す外部システム
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn TaskStore>,
    pub channel: Arc<dyn DispatchChannel>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            registry: TaskRegistry::new(),
            expected_tasks: None,
        }
    }

    /// `T::RUN_INTERVAL_SECS` で登録
    pub fn register<T, F>(mut self, factory: F) -> Result<Self, SchedulerError>
    where
        T: ScheduledTask,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.registry.register::<T, F>(factory)?;
        Ok(self)
    }

    /// 実行間隔を上書きして登録
    pub fn register_with_interval<T, F>(
        mut self,
        run_interval: RunInterval,
        factory: F,
    ) -> Result<Self, SchedulerError>
    where
        T: ScheduledTask,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.registry
            .register_with_interval::<T, F>(run_interval, factory)?;
        Ok(self)
    }

    /// recovery 用の定期タスクを登録
    /// - RequeueDeadMessagesTask（常に）
    /// - ReleaseStaleTasksTask（`stale_task_timeout_secs` があるとき）
    pub fn with_recovery(
        self,
        config: &RecoveryConfig,
        backlog: Arc<dyn DeliveryBacklog>,
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SchedulerError> {
        let threshold = config.dead_message_threshold();
        let builder = self.register_with_interval::<RequeueDeadMessagesTask, _>(
            RunInterval::from_secs(config.requeue_interval_secs)?,
            {
                let clock = Arc::clone(&clock);
                move || RequeueDeadMessagesTask::new(Arc::clone(&backlog), Arc::clone(&clock), threshold)
            },
        )?;

        let Some(timeout) = config.stale_task_timeout() else {
            return Ok(builder);
        };
        builder.register_with_interval::<ReleaseStaleTasksTask, _>(
            RunInterval::from_secs(config.stale_release_interval_secs)?,
            move || ReleaseStaleTasksTask::new(Arc::clone(&store), Arc::clone(&clock), timeout),
        )
    }

    /// 期待される task_type のリストを設定
    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    /// 検証して App を組み立てる
    ///
    /// # 検証
    /// - expect_tasks() で設定された task_type が全て登録されているかチェック
    /// - 不足があれば BuildError::MissingTaskTypes を返す
    pub fn build(self, collaborators: Collaborators) -> Result<App, BuildError> {
        if let Some(expected_tasks) = &self.expected_tasks {
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|t| !self.registry.contains(t))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }

        let Collaborators {
            store,
            channel,
            clock,
            ids,
        } = collaborators;
        let registry = Arc::new(self.registry);
        Ok(App {
            scheduler: Arc::new(TaskScheduler::new(
                Arc::clone(&registry),
                Arc::clone(&store),
                channel,
                Arc::clone(&clock),
            )),
            executor: Arc::new(TaskExecutor::new(
                Arc::clone(&registry),
                Arc::clone(&store),
                Arc::clone(&clock),
            )),
            admin: TaskAdmin::new(Arc::clone(&registry), store, Arc::clone(&clock), ids),
            registry,
            clock,
        })
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// App は組み立て済みのスケジューラ
pub struct App {
    pub registry: Arc<TaskRegistry>,
    pub scheduler: Arc<TaskScheduler>,
    pub executor: Arc<TaskExecutor>,
    pub admin: TaskAdmin,
    clock: Arc<dyn Clock>,
}

impl App {
    pub fn scheduler_loop(&self, ctx: ExecutionContext, settings: PollSettings) -> SchedulerLoop {
        SchedulerLoop::new(
            Arc::clone(&self.scheduler),
            ctx,
            Arc::clone(&self.clock),
            settings,
        )
    }

    pub fn spawn_workers(
        &self,
        n: usize,
        ctx: ExecutionContext,
        inbox: Arc<dyn Inbox>,
        receive_timeout: Duration,
    ) -> WorkerGroup {
        WorkerGroup::spawn(n, ctx, inbox, Arc::clone(&self.executor), receive_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryDispatchChannel, InMemoryTaskStore};
    use crate::ports::{FixedClock, UlidGenerator};
    use crate::typed::task::fixtures::{CleanupTask, HeartbeatTask, RunLog};
    use chrono::{TimeZone, Utc};

    fn collaborators() -> (Collaborators, Arc<InMemoryDispatchChannel>, Arc<InMemoryTaskStore>) {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryTaskStore::new());
        let channel = Arc::new(InMemoryDispatchChannel::new(Arc::clone(&clock)));
        let collaborators = Collaborators {
            store: store.clone(),
            channel: channel.clone(),
            ids: Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
        };
        (collaborators, channel, store)
    }

    #[test]
    fn test_build_success() {
        let (collaborators, _, _) = collaborators();
        let app = SchedulerBuilder::new()
            .register::<HeartbeatTask, _>(|| HeartbeatTask(RunLog::default()))
            .unwrap()
            .expect_tasks(&[HeartbeatTask::TYPE])
            .build(collaborators);
        assert!(app.is_ok());
    }

    #[test]
    fn test_build_missing_task_types() {
        let (collaborators, _, _) = collaborators();
        let app = SchedulerBuilder::new()
            .register::<HeartbeatTask, _>(|| HeartbeatTask(RunLog::default()))
            .unwrap()
            .expect_tasks(&[HeartbeatTask::TYPE, CleanupTask::TYPE])
            .build(collaborators);
        assert!(matches!(
            app,
            Err(BuildError::MissingTaskTypes(missing)) if missing == vec![CleanupTask::TYPE.to_string()]
        ));
    }

    #[test]
    fn test_build_no_expect_tasks() {
        let (collaborators, _, _) = collaborators();
        let app = SchedulerBuilder::new()
            .register::<HeartbeatTask, _>(|| HeartbeatTask(RunLog::default()))
            .unwrap()
            .build(collaborators);
        assert!(app.is_ok());
    }

    #[test]
    fn recovery_tasks_follow_config() {
        let (collaborators, channel, store) = collaborators();
        let clock = Arc::clone(&collaborators.clock);

        let without_stale = SchedulerBuilder::new()
            .with_recovery(
                &RecoveryConfig::default(),
                channel.clone(),
                store.clone(),
                Arc::clone(&clock),
            )
            .unwrap()
            .build(collaborators.clone())
            .unwrap();
        assert_eq!(
            without_stale
                .registry
                .registered_types()
                .iter()
                .map(|t| t.as_str().to_string())
                .collect::<Vec<_>>(),
            vec![RequeueDeadMessagesTask::TYPE.to_string()]
        );

        let config = RecoveryConfig {
            stale_task_timeout_secs: Some(600),
            stale_release_interval_secs: 120,
            ..RecoveryConfig::default()
        };
        let with_stale = SchedulerBuilder::new()
            .with_recovery(&config, channel, store, clock)
            .unwrap()
            .expect_tasks(&[RequeueDeadMessagesTask::TYPE, ReleaseStaleTasksTask::TYPE])
            .build(collaborators)
            .unwrap();
        let stale = with_stale
            .registry
            .resolve(&crate::domain::TaskType::new(ReleaseStaleTasksTask::TYPE).unwrap())
            .unwrap();
        assert_eq!(stale.run_interval().as_secs(), 120);
    }

    #[test]
    fn zero_requeue_interval_is_rejected() {
        let (collaborators, channel, store) = collaborators();
        let config = RecoveryConfig {
            requeue_interval_secs: 0,
            ..RecoveryConfig::default()
        };

        let result = SchedulerBuilder::new().with_recovery(
            &config,
            channel,
            store,
            collaborators.clock,
        );

        assert!(matches!(result, Err(SchedulerError::InvalidRunInterval(0))));
    }
}
