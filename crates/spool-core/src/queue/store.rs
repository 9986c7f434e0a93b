//! TaskStore - registry of all known tasks plus the distribution channel.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use super::channel::{DeliveryChannel, Slot};
use crate::domain::{DEFAULT_MAX_RETRIES, Task, TaskId, TaskStatus};
use crate::error::QueueError;
use crate::observability::QueueCounts;

/// What [`TaskStore::claim`] found under an id taken off the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// Attempt started: `attempts` bumped, status `INPROGRESS`.
    Started(Task),
    /// Retry budget already spent: marked `FAILED` without an attempt.
    Exhausted(Task),
    /// Leftover id for a record that is running or done.
    NotQueued(TaskStatus),
    /// No record under this id any more.
    Missing,
}

/// Shared, thread-safe task registry with a bounded hand-off to workers.
///
/// Locking:
/// - Registry mutations (`enqueue`'s insert, `requeue`, `claim`, `complete`,
///   `fail`, `clear`, `delete_job`) take the write lock for the mutation only.
/// - Reads (`get_jobs`, `get_job_by_id`, `counts`) take the read lock.
/// - Waiting for channel capacity or availability happens with no lock held.
///   Pushing into the channel is non-blocking once a slot is reserved, so it
///   is done under the write lock; that keeps registry and channel in step
///   for `clear`.
///
/// Ids in the channel are not retracted by `delete_job`. A worker that pops
/// an id with no registry entry skips it.
pub struct TaskStore {
    registry: RwLock<HashMap<TaskId, Task>>,
    channel: DeliveryChannel,
    default_max_retries: u32,
}

impl TaskStore {
    pub fn new(capacity: usize) -> Self {
        Self::with_max_retries(capacity, DEFAULT_MAX_RETRIES)
    }

    pub fn with_max_retries(capacity: usize, default_max_retries: u32) -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
            channel: DeliveryChannel::new(capacity),
            default_max_retries,
        }
    }

    /// Register `task` and make it available to a worker.
    ///
    /// Waits while the channel is full. An entry with the same id is
    /// overwritten. Returns [`QueueError::Closed`] if the store is (or gets)
    /// closed before a slot frees up; in that case nothing is registered.
    pub async fn enqueue(&self, mut task: Task) -> Result<(), QueueError> {
        task.mark_queued(self.default_max_retries);
        let slot = self.channel.reserve().await?;
        self.register(task, slot);
        Ok(())
    }

    /// Like [`enqueue`](Self::enqueue) but fails fast with
    /// [`QueueError::QueueFull`] instead of waiting.
    pub fn try_enqueue(&self, mut task: Task) -> Result<(), QueueError> {
        let slot = self.channel.try_reserve()?;
        task.mark_queued(self.default_max_retries);
        self.register(task, slot);
        Ok(())
    }

    fn register(&self, task: Task, slot: Slot<'_>) {
        let id = task.id.clone();
        debug!(task_id = %id, task_type = %task.task_type, attempts = task.attempts, "enqueue");

        let mut registry = self.registry.write();
        registry.insert(id.clone(), task);
        self.channel.push(id, slot);
    }

    /// Put a record back into the channel after attempt number `attempt`
    /// failed. Status goes straight to `QUEUED` under one write lock, so
    /// readers never see a retryable task as `FAILED`.
    ///
    /// Does not wait for capacity: this is called by workers, the only
    /// consumers of the channel. Returns `false` if the record is gone or was
    /// replaced.
    pub fn requeue(&self, id: &TaskId, attempt: u32) -> bool {
        let mut registry = self.registry.write();
        let Some(task) = registry.get_mut(id).filter(|t| t.is_running_attempt(attempt)) else {
            return false;
        };
        task.mark_queued(self.default_max_retries);
        self.channel.push_unreserved(id.clone());
        true
    }

    /// Wait for the next task. Returns a snapshot of its record, or `None`
    /// once the store is closed.
    pub async fn dequeue(&self) -> Option<Task> {
        loop {
            let id = self.channel.pop().await?;
            if let Some(task) = self.get_job_by_id(&id) {
                return Some(task);
            }
            debug!(task_id = %id, "skipping id with no registry entry");
        }
    }

    /// Start an attempt on a record taken off the channel.
    ///
    /// Only a `QUEUED` record can be claimed. A leftover id (the record was
    /// re-submitted while its id was still queued, or is already running or
    /// finished) yields [`Claim::NotQueued`] and changes nothing, so one
    /// record is never held by two workers.
    pub fn claim(&self, id: &TaskId) -> Claim {
        let mut registry = self.registry.write();
        let Some(task) = registry.get_mut(id) else {
            return Claim::Missing;
        };
        if task.status != TaskStatus::Queued {
            return Claim::NotQueued(task.status);
        }
        if task.retries_exhausted() {
            task.mark_failed();
            return Claim::Exhausted(task.clone());
        }
        task.start_attempt();
        Claim::Started(task.clone())
    }

    /// Attempt number `attempt` succeeded.
    ///
    /// Returns `None` without touching anything if the record is gone or was
    /// replaced by a new submission in the meantime.
    pub fn complete(&self, id: &TaskId, attempt: u32) -> Option<Task> {
        self.settle(id, attempt, Task::mark_completed)
    }

    /// Attempt number `attempt` failed for good. Same `None` cases as
    /// [`complete`](Self::complete).
    pub fn fail(&self, id: &TaskId, attempt: u32) -> Option<Task> {
        self.settle(id, attempt, Task::mark_failed)
    }

    fn settle(&self, id: &TaskId, attempt: u32, mark: fn(&mut Task)) -> Option<Task> {
        let mut registry = self.registry.write();
        let task = registry.get_mut(id).filter(|t| t.is_running_attempt(attempt))?;
        mark(task);
        Some(task.clone())
    }

    /// Empty the registry and every unclaimed channel entry.
    pub fn clear(&self) {
        let mut registry = self.registry.write();
        let removed = registry.len();
        registry.clear();
        let drained = self.channel.drain();
        debug!(removed, drained, "cleared store");
    }

    /// Point-in-time copy of every record.
    pub fn get_jobs(&self) -> Vec<Task> {
        self.registry.read().values().cloned().collect()
    }

    pub fn get_job_by_id(&self, id: &TaskId) -> Option<Task> {
        self.registry.read().get(id).cloned()
    }

    /// Remove `id` from the registry. Returns whether it was present.
    pub fn delete_job(&self, id: &TaskId) -> bool {
        self.registry.write().remove(id).is_some()
    }

    pub fn counts(&self) -> QueueCounts {
        let registry = self.registry.read();
        QueueCounts::tally(registry.values(), self.channel.len())
    }

    /// Stop accepting submissions and wake everyone blocked on the channel.
    pub fn close(&self) {
        self.channel.close();
    }
}
