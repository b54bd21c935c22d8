//! Status - record 数を status ごとに数える

use serde::Serialize;

use crate::domain::{ScheduledTaskRecord, TaskStatus};

/// StatusCounts は scope 内の record を status ごとに集計したもの
///
/// # 使用例
/// ```ignore
/// let counts = admin.status_counts(&ctx).await?;
/// println!("{}", serde_json::to_string(&counts)?);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub scheduled: usize,
    pub queued: usize,
    pub running: usize,
    pub failed: usize,
    pub inactive: usize,
}

impl StatusCounts {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ScheduledTaskRecord>) -> Self {
        let mut counts = Self::default();
        for record in records {
            *counts.slot(record.status) += 1;
        }
        counts
    }

    pub fn get(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Scheduled => self.scheduled,
            TaskStatus::Queued => self.queued,
            TaskStatus::Running => self.running,
            TaskStatus::Failed => self.failed,
            TaskStatus::Inactive => self.inactive,
        }
    }

    pub fn total(&self) -> usize {
        TaskStatus::ALL.iter().map(|s| self.get(*s)).sum()
    }

    fn slot(&mut self, status: TaskStatus) -> &mut usize {
        match status {
            TaskStatus::Scheduled => &mut self.scheduled,
            TaskStatus::Queued => &mut self.queued,
            TaskStatus::Running => &mut self.running,
            TaskStatus::Failed => &mut self.failed,
            TaskStatus::Inactive => &mut self.inactive,
        }
    }
}
