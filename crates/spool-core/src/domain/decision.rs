//! Decision model: what happens to a task after an attempt.

/// The next action for a task whose attempt just ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Attempt succeeded; the task is done.
    Complete,

    /// Attempt failed and budget remains: back into the channel.
    Retry { reason: String },

    /// Attempt failed and the budget is spent (or retrying makes no sense).
    GiveUp { reason: String },
}

impl Decision {
    pub fn is_retry(&self) -> bool {
        matches!(self, Decision::Retry { .. })
    }
}
