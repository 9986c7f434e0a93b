//! Task record: identity + execution state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TaskId, TaskKind, TaskStatus};

/// Retry ceiling applied on first submission.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// One unit of schedulable work.
///
/// Design:
/// - The store keeps exactly one of these per id; that copy is the single
///   source of truth. Everything handed out (`get_job_by_id`, `get_jobs`,
///   `dequeue`) is an owned snapshot.
/// - The channel carries ids only. Status transitions happen on the stored
///   record, never on a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,

    /// Opaque content; the core never looks inside.
    pub payload: String,

    /// Discriminator as submitted. Parsed with [`Task::kind`] for dispatch.
    #[serde(rename = "type")]
    pub task_type: String,

    pub status: TaskStatus,

    /// Number of times a worker has started processing this task.
    pub attempts: u32,

    /// Fixed after the first enqueue.
    pub max_retries: u32,

    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, task_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            task_type: task_type.into(),
            status: TaskStatus::Queued,
            attempts: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> TaskKind {
        TaskKind::parse(&self.task_type)
    }

    /// Has the retry budget been spent?
    pub fn retries_exhausted(&self) -> bool {
        self.attempts >= self.max_retries
    }

    /// Failed with nothing left to retry: never enqueued again by workers.
    pub fn is_terminal_failure(&self) -> bool {
        self.status == TaskStatus::Failed && self.retries_exhausted()
    }

    /// Completed, or failed for good.
    pub fn is_finished(&self) -> bool {
        self.status == TaskStatus::Completed || self.is_terminal_failure()
    }

    /// Prepare for the channel. The ceiling is only applied to a task that has
    /// never been attempted, so re-submissions keep theirs.
    pub fn mark_queued(&mut self, default_max_retries: u32) {
        self.status = TaskStatus::Queued;
        if self.attempts == 0 {
            self.max_retries = default_max_retries;
        }
    }

    /// Mark as in progress (increment attempts).
    pub fn start_attempt(&mut self) {
        self.status = TaskStatus::InProgress;
        self.attempts += 1;
    }

    /// Is `attempt` the attempt running right now? False once the record
    /// has been settled or replaced by a new submission.
    pub fn is_running_attempt(&self, attempt: u32) -> bool {
        self.status == TaskStatus::InProgress && self.attempts == attempt
    }

    pub fn mark_completed(&mut self) {
        self.status = TaskStatus::Completed;
    }

    pub fn mark_failed(&mut self) {
        self.status = TaskStatus::Failed;
    }
}
