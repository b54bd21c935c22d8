//! SchedulerLoop - TaskScheduler の pass を繰り返す poller
//!
//! pass のあと、次の due 時刻まで sleep します。
//! sleep 幅は `[min_poll_interval, min(max_poll_interval, 最短 run_interval)]` に収める。
//! 最短 run_interval で上限を切るのは、新しく insert された record を取りこぼさないため。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, error};

use crate::app::scheduler::TaskScheduler;
use crate::domain::{ExecutionContext, Result, RunInterval};
use crate::ports::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub min_poll_interval: Duration,
    pub max_poll_interval: Duration,
    /// pass が失敗したときの待ち時間
    pub error_backoff: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            min_poll_interval: Duration::from_millis(100),
            max_poll_interval: Duration::from_secs(60),
            error_backoff: Duration::from_secs(5),
        }
    }
}

pub struct SchedulerLoop {
    scheduler: Arc<TaskScheduler>,
    ctx: ExecutionContext,
    clock: Arc<dyn Clock>,
    settings: PollSettings,
}

impl SchedulerLoop {
    pub fn new(
        scheduler: Arc<TaskScheduler>,
        ctx: ExecutionContext,
        clock: Arc<dyn Clock>,
        settings: PollSettings,
    ) -> Self {
        Self {
            scheduler,
            ctx,
            clock,
            settings,
        }
    }

    /// shutdown が立つ（または sender が drop される）まで pass を繰り返す
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let sleep_for = match self.tick().await {
                Ok(idle) => idle,
                Err(e) => {
                    error!(scope = %self.ctx, error = %e, "scheduler pass failed");
                    self.settings.error_backoff
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
        debug!(scope = %self.ctx, "scheduler loop stopped");
    }

    /// 1 回の pass を実行し、次の pass までの待ち時間を返す
    pub async fn tick(&self) -> Result<Duration> {
        self.scheduler.queue_scheduled_tasks(&self.ctx).await?;
        let next = self.scheduler.get_next_execution_time(&self.ctx).await?;
        let min_interval = self.scheduler.get_min_run_interval(&self.ctx).await?;
        let idle = idle_duration(self.clock.now(), next, min_interval, &self.settings);
        debug!(scope = %self.ctx, idle_ms = idle.as_millis() as u64, "scheduler idle");
        Ok(idle)
    }
}

/// 次の pass までの待ち時間
pub fn idle_duration(
    now: DateTime<Utc>,
    next_execution_time: Option<DateTime<Utc>>,
    min_run_interval: Option<RunInterval>,
    settings: &PollSettings,
) -> Duration {
    let cap = match min_run_interval {
        Some(interval) => interval.as_std().min(settings.max_poll_interval),
        None => settings.max_poll_interval,
    };
    let until_next = match next_execution_time {
        // 過去の時刻は to_std() が Err になる
        Some(next) => (next - now).to_std().unwrap_or(Duration::ZERO),
        None => cap,
    };
    until_next.min(cap).max(settings.min_poll_interval)
}
