//! TaskQueue - the assembled queue: store, handlers and worker pool.
//!
//! This is the surface an embedding service talks to (submit, list, look up,
//! delete, clear, shut down). It holds no state of its own beyond wiring.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::QueueConfig;
use crate::domain::{Task, TaskId, TaskKind};
use crate::error::QueueError;
use crate::observability::{PoolStats, QueueCounts};
use crate::queue::TaskStore;
use crate::runtime::{HandlerRegistry, Runtime, TaskHandler};
use crate::worker::{ShutdownStatus, WorkerPool};

/// Builds a [`TaskQueue`].
///
/// # Example
/// ```ignore
/// let queue = TaskQueue::builder()
///     .config(QueueConfig::default().with_workers(4))
///     .handler("hello", Arc::new(HelloHandler))
///     .build()?;
/// ```
///
/// `build()` validates the configuration up front and spawns the workers, so
/// it must run inside a tokio runtime.
pub struct TaskQueueBuilder {
    config: QueueConfig,
    overrides: Vec<(TaskKind, Arc<dyn TaskHandler>, bool)>,
    fallback: Option<Arc<dyn TaskHandler>>,
}

impl TaskQueueBuilder {
    pub fn new() -> Self {
        Self {
            config: QueueConfig::default(),
            overrides: Vec::new(),
            fallback: None,
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a handler for a type that has none. Built-in types are taken;
    /// use [`replace_handler`](Self::replace_handler) for those.
    pub fn handler(
        mut self,
        task_type: impl Into<TaskKind>,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        self.overrides.push((task_type.into(), handler, false));
        self
    }

    /// Add or overwrite the handler for a type.
    pub fn replace_handler(
        mut self,
        task_type: impl Into<TaskKind>,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        self.overrides.push((task_type.into(), handler, true));
        self
    }

    /// Handler for types nothing else matches.
    pub fn fallback(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.fallback = Some(handler);
        self
    }

    /// Validate, wire and start the workers.
    ///
    /// # Errors
    /// - [`QueueError::InvalidConfig`] for zero workers or zero capacity
    /// - [`QueueError::DuplicateHandler`] if `handler()` hit a taken type
    pub fn build(self) -> Result<TaskQueue, QueueError> {
        self.config.validate()?;

        let mut registry = HandlerRegistry::standard(&self.config.latency);
        for (kind, handler, replace) in self.overrides {
            if replace {
                registry.replace(kind, handler);
            } else {
                registry.register(kind, handler)?;
            }
        }
        if let Some(fallback) = self.fallback {
            registry.set_fallback(fallback);
        }

        let store = Arc::new(TaskStore::with_max_retries(
            self.config.capacity,
            self.config.max_retries,
        ));
        let runtime = Arc::new(Runtime::new(Arc::new(registry)));
        let pool = WorkerPool::spawn(self.config.workers, Arc::clone(&store), runtime);

        info!(
            workers = self.config.workers,
            capacity = self.config.capacity,
            max_retries = self.config.max_retries,
            "task queue ready"
        );

        Ok(TaskQueue {
            store,
            pool,
            shutdown_timeout: self.config.shutdown_timeout,
        })
    }
}

impl Default for TaskQueueBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running in-process task queue.
pub struct TaskQueue {
    store: Arc<TaskStore>,
    pool: WorkerPool,
    shutdown_timeout: Duration,
}

impl TaskQueue {
    pub fn builder() -> TaskQueueBuilder {
        TaskQueueBuilder::new()
    }

    /// Queue with the given configuration and the built-in handlers.
    pub fn start(config: QueueConfig) -> Result<Self, QueueError> {
        Self::builder().config(config).build()
    }

    /// Submit a task, waiting while the channel is full.
    pub async fn submit(&self, task: Task) -> Result<TaskId, QueueError> {
        let id = task.id.clone();
        self.store.enqueue(task).await?;
        Ok(id)
    }

    /// Submit without waiting; fails with [`QueueError::QueueFull`].
    pub fn try_submit(&self, task: Task) -> Result<TaskId, QueueError> {
        let id = task.id.clone();
        self.store.try_enqueue(task)?;
        Ok(id)
    }

    pub fn list_all(&self) -> Vec<Task> {
        self.store.get_jobs()
    }

    pub fn get_by_id(&self, id: &TaskId) -> Option<Task> {
        self.store.get_job_by_id(id)
    }

    /// Forget a task. An attempt already running is not interrupted and its
    /// result is dropped.
    pub fn delete_by_id(&self, id: &TaskId) -> bool {
        self.store.delete_job(id)
    }

    pub fn clear_all(&self) {
        self.store.clear();
    }

    pub fn counts(&self) -> QueueCounts {
        self.store.counts()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// No record is waiting or running.
    pub fn is_idle(&self) -> bool {
        let counts = self.counts();
        counts.queued == 0 && counts.in_progress == 0
    }

    /// Stop accepting submissions, then stop the workers with the configured
    /// timeout.
    pub async fn shutdown(&self) -> ShutdownStatus {
        self.shutdown_with_timeout(self.shutdown_timeout).await
    }

    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> ShutdownStatus {
        self.store.close();
        let status = self.pool.shutdown(timeout).await;
        if let ShutdownStatus::Forced { aborted } = status {
            let counts = self.counts();
            warn!(
                aborted,
                left_in_progress = counts.in_progress,
                left_queued = counts.queued,
                "forced shutdown"
            );
        }
        status
    }
}
