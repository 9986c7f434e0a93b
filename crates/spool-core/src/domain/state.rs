//! Task status machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task status.
///
/// State transitions:
/// - Queued -> InProgress -> Completed
/// - Queued -> InProgress -> Failed -> Queued (while attempts < max_retries)
/// - Queued -> InProgress -> Failed (terminal once the retry budget is spent)
///
/// Serialized as `QUEUED` / `INPROGRESS` / `COMPLETED` / `FAILED` for status
/// endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    /// Registered and waiting in the distribution channel.
    Queued,

    /// Claimed by a worker.
    InProgress,

    /// Finished successfully.
    Completed,

    /// The last attempt failed. Terminal unless the worker re-enqueues it.
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "QUEUED",
            TaskStatus::InProgress => "INPROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
