use serde::{Deserialize, Serialize};

use crate::domain::{Task, TaskStatus};

/// Registry totals per status, plus the channel depth.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,

    /// Ids waiting in the distribution channel (may include ids whose record
    /// was deleted; workers skip those).
    pub pending: usize,
}

impl QueueCounts {
    pub(crate) fn tally<'a>(tasks: impl Iterator<Item = &'a Task>, pending: usize) -> Self {
        let mut counts = QueueCounts {
            pending,
            ..Default::default()
        };
        for task in tasks {
            match task.status {
                TaskStatus::Queued => counts.queued += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.queued + self.in_progress + self.completed + self.failed
    }
}

/// Worker pool counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub workers: usize,

    /// Executions running right now.
    pub in_flight: usize,

    /// Highest `in_flight` ever observed.
    pub peak_in_flight: usize,

    pub completed: u64,

    /// Attempts that ended in a terminal failure.
    pub failed: u64,

    /// Attempts that failed and were put back into the channel.
    pub retried: u64,

    /// Handler errors or panics.
    pub faulted: u64,

    /// Claims dropped because the record vanished or was already exhausted.
    pub skipped: u64,
}
