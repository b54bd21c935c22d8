//! Runnable / TaskFactory - ScheduledTask の型消去
//!
//! # 学習ポイント
//! - Object-safe trait (Runnable, TaskFactory)
//! - Type erasure パターン (TypedFactory<T, F> → dyn TaskFactory)
//!
//! ScheduledTask は associated const を持つので `dyn ScheduledTask` にできません。
//! factory ごとラップして object-safe な trait に変換し、registry に格納します。

use async_trait::async_trait;
use std::marker::PhantomData;

use super::task::ScheduledTask;
use crate::domain::{ExecutionContext, TaskRunError};

/// Runnable は object-safe なタスク本体
#[async_trait]
pub trait Runnable: Send + Sync {
    async fn run_dyn(&self, ctx: &ExecutionContext) -> Result<(), TaskRunError>;
    fn task_type(&self) -> &'static str;
}

#[async_trait]
impl<T: ScheduledTask> Runnable for T {
    async fn run_dyn(&self, ctx: &ExecutionContext) -> Result<(), TaskRunError> {
        self.run(ctx).await
    }

    fn task_type(&self) -> &'static str {
        T::TYPE
    }
}

/// TaskFactory は Runnable を組み立てる（I/O をしない純粋な factory）
pub trait TaskFactory: Send + Sync {
    fn create(&self) -> Box<dyn Runnable>;
}

pub struct TypedFactory<T: ScheduledTask, F: Fn() -> T + Send + Sync> {
    factory: F,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ScheduledTask, F: Fn() -> T + Send + Sync> TypedFactory<T, F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            _marker: PhantomData,
        }
    }
}

impl<T: ScheduledTask, F: Fn() -> T + Send + Sync> TaskFactory for TypedFactory<T, F> {
    fn create(&self) -> Box<dyn Runnable> {
        Box::new((self.factory)())
    }
}
