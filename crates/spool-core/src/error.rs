use thiserror::Error;

use crate::domain::TaskKind;

/// Errors surfaced to callers of the queue.
///
/// Task-level failures are not errors: they show up only as task status.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Non-blocking submit against a full distribution channel.
    #[error("queue is full (capacity={capacity})")]
    QueueFull { capacity: usize },

    /// The queue has been shut down; the submission was not registered.
    #[error("queue is closed")]
    Closed,

    #[error("duplicate handler for task_type={}", .0.name())]
    DuplicateHandler(TaskKind),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Unexpected fault raised by a handler (as opposed to a task-level failure
/// outcome). The worker marks the task failed and does not retry it.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TaskError(pub String);

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
