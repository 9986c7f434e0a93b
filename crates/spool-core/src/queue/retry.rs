//! Retry policy: decides whether a failed attempt goes back into the queue.

use crate::domain::{Decision, Outcome, Task};

/// Attempt-count based retry policy.
///
/// Pure: looks at the task after its attempt counter was bumped and at the
/// reported outcome, and returns a [`Decision`]. Applying it (status write,
/// requeue) is the worker's job.
///
/// There is no backoff: a retry re-enters the back of the same FIFO as every
/// other submission.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy;

impl RetryPolicy {
    pub fn new() -> Self {
        Self
    }

    /// # Arguments
    /// * `task` - The record as claimed (attempts already includes this try).
    /// * `outcome` - What the handler reported.
    ///
    /// A failure is retried while `attempts < max_retries`, so a task that
    /// always fails ends up `FAILED` with `attempts == max_retries`.
    pub fn decide(&self, task: &Task, outcome: &Outcome) -> Decision {
        if outcome.is_success() {
            return Decision::Complete;
        }

        let reason = outcome
            .reason
            .clone()
            .unwrap_or_else(|| "attempt failed".to_string());

        if task.retries_exhausted() {
            Decision::GiveUp {
                reason: format!(
                    "{reason} (max retries reached: {}/{})",
                    task.attempts, task.max_retries
                ),
            }
        } else {
            Decision::Retry {
                reason: format!(
                    "{reason} (retry {}/{})",
                    task.attempts + 1,
                    task.max_retries
                ),
            }
        }
    }
}
