//! DeliveryChannel - bounded FIFO of task ids between producers and workers.
//!
//! The channel never holds task state, only ids. The registry in
//! [`super::TaskStore`] stays the single source of truth.
//!
//! Implementation:
//! - `VecDeque<Entry>` behind a short-lived mutex (never held across `.await`)
//! - `slots` semaphore: one permit per free producer slot (backpressure)
//! - `ready` semaphore: one permit per queued entry (blocking pop)
//!
//! Entries pushed by workers (retries) do not consume a producer slot, so a
//! worker can never block on a channel that only workers drain.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::{Semaphore, SemaphorePermit, TryAcquireError};

use crate::domain::TaskId;
use crate::error::QueueError;

#[derive(Debug)]
struct Entry {
    id: TaskId,
    /// Holds a producer slot that must be returned when the entry leaves.
    reserved: bool,
}

/// A producer slot taken from the channel. Dropping it unused gives the slot
/// back, which makes a cancelled `enqueue` leave no trace.
pub struct Slot<'a> {
    permit: SemaphorePermit<'a>,
}

pub struct DeliveryChannel {
    entries: Mutex<VecDeque<Entry>>,
    slots: Semaphore,
    ready: Semaphore,
    capacity: usize,
}

impl DeliveryChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            slots: Semaphore::new(capacity),
            ready: Semaphore::new(0),
            capacity,
        }
    }

    /// Entries waiting to be claimed.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for a free slot.
    ///
    /// Cancel-safe: if the future is dropped while waiting, nothing changes.
    pub async fn reserve(&self) -> Result<Slot<'_>, QueueError> {
        let permit = self.slots.acquire().await.map_err(|_| QueueError::Closed)?;
        Ok(Slot { permit })
    }

    /// Take a free slot without waiting.
    pub fn try_reserve(&self) -> Result<Slot<'_>, QueueError> {
        match self.slots.try_acquire() {
            Ok(permit) => Ok(Slot { permit }),
            Err(TryAcquireError::NoPermits) => Err(QueueError::QueueFull {
                capacity: self.capacity,
            }),
            Err(TryAcquireError::Closed) => Err(QueueError::Closed),
        }
    }

    /// Push into a slot obtained from [`reserve`](Self::reserve).
    pub fn push(&self, id: TaskId, slot: Slot<'_>) {
        // slot は pop 時に add_permits で返す
        slot.permit.forget();
        self.entries.lock().push_back(Entry { id, reserved: true });
        self.ready.add_permits(1);
    }

    /// Push without a producer slot (worker retries).
    pub fn push_unreserved(&self, id: TaskId) {
        self.entries.lock().push_back(Entry {
            id,
            reserved: false,
        });
        self.ready.add_permits(1);
    }

    /// Wait for the next id. Returns `None` once the channel is closed.
    ///
    /// Cancel-safe: the only await point is the `ready` acquire.
    pub async fn pop(&self) -> Option<TaskId> {
        loop {
            let permit = self.ready.acquire().await.ok()?;
            permit.forget();

            let entry = self.entries.lock().pop_front();
            if let Some(entry) = entry {
                if entry.reserved {
                    self.slots.add_permits(1);
                }
                return Some(entry.id);
            }
            // The permit belonged to an entry removed by drain(); wait again.
        }
    }

    /// Remove every pending entry and return how many were removed.
    ///
    /// Callers must serialize this against pushes (the store does so with
    /// its registry write lock) so that the `ready` permits soaked up here
    /// belong to the drained entries.
    pub fn drain(&self) -> usize {
        let drained: Vec<Entry> = self.entries.lock().drain(..).collect();

        let reserved = drained.iter().filter(|e| e.reserved).count();
        self.slots.add_permits(reserved);

        for _ in 0..drained.len() {
            // A consumer may already hold the permit; it will find the deque
            // empty and go back to waiting.
            match self.ready.try_acquire() {
                Ok(permit) => permit.forget(),
                Err(_) => break,
            }
        }

        drained.len()
    }

    /// Wake every waiter: producers get `Closed`, consumers get `None`.
    pub fn close(&self) {
        self.slots.close();
        self.ready.close();
    }
}
