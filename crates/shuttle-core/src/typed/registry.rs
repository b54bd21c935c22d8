//! TaskRegistry - Task Definition の登録と解決
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - Generic methods での登録と型安全性
//! - Arc による共有所有権
//!
//! 起動時に組み立て（mutable）、実行中は `Arc<TaskRegistry>` として読むだけ（immutable）。

use std::collections::HashMap;
use std::sync::Arc;

use super::runnable::{Runnable, TaskFactory, TypedFactory};
use super::task::ScheduledTask;
use crate::domain::{RunInterval, SchedulerError, TaskType};

/// TaskDefinition は task_type・実行間隔・factory の組
#[derive(Clone)]
pub struct TaskDefinition {
    task_type: TaskType,
    run_interval: RunInterval,
    factory: Arc<dyn TaskFactory>,
}

impl TaskDefinition {
    pub fn task_type(&self) -> &TaskType {
        &self.task_type
    }

    pub fn run_interval(&self) -> RunInterval {
        self.run_interval
    }

    /// Runnable を新しく組み立てる（I/O なし）
    pub fn instantiate(&self) -> Box<dyn Runnable> {
        self.factory.create()
    }
}

impl std::fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("task_type", &self.task_type)
            .field("run_interval", &self.run_interval)
            .finish_non_exhaustive()
    }
}

/// TaskRegistry は task_type → TaskDefinition の静的な対応表
///
/// # 使用例
/// ```ignore
/// let mut registry = TaskRegistry::new();
/// registry.register::<CleanupTask, _>(|| CleanupTask::new())?;
///
/// let definition = registry.resolve(&task_type)?;
/// definition.instantiate().run_dyn(&ctx).await?;
/// ```
#[derive(Default)]
pub struct TaskRegistry {
    definitions: HashMap<TaskType, TaskDefinition>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            definitions: HashMap::new(),
        }
    }

    /// `T::RUN_INTERVAL_SECS` を実行間隔として登録
    pub fn register<T, F>(&mut self, factory: F) -> Result<(), SchedulerError>
    where
        T: ScheduledTask,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let interval = RunInterval::from_secs(T::RUN_INTERVAL_SECS)?;
        self.register_with_interval::<T, F>(interval, factory)
    }

    /// 設定などで実行間隔を上書きして登録
    pub fn register_with_interval<T, F>(
        &mut self,
        run_interval: RunInterval,
        factory: F,
    ) -> Result<(), SchedulerError>
    where
        T: ScheduledTask,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let task_type = TaskType::new(T::TYPE)?;
        if self.definitions.contains_key(&task_type) {
            return Err(SchedulerError::DuplicateTaskType(task_type));
        }
        let definition = TaskDefinition {
            task_type: task_type.clone(),
            run_interval,
            factory: Arc::new(TypedFactory::new(factory)),
        };
        self.definitions.insert(task_type, definition);
        Ok(())
    }

    pub fn resolve(&self, task_type: &TaskType) -> Result<&TaskDefinition, SchedulerError> {
        self.definitions
            .get(task_type)
            .ok_or_else(|| SchedulerError::UnknownTaskType(task_type.clone()))
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.definitions.keys().any(|t| t.as_str() == task_type)
    }

    /// 登録済みの task_type（名前順）
    pub fn registered_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.definitions.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn definitions(&self) -> impl Iterator<Item = &TaskDefinition> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
