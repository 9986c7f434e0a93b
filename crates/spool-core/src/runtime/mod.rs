//! Handler dispatch: `TaskKind` -> handler.

mod handlers;

pub use handlers::{AlwaysFail, FlakyWork, SimulatedWork};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::LatencyProfile;
use crate::domain::{Outcome, Task, TaskKind};
use crate::error::{QueueError, TaskError};

/// A handler for one kind of task.
///
/// Receives a snapshot of the claimed record (attempts already bumped).
/// - `Ok(Outcome::success())` completes the task.
/// - `Ok(Outcome::failure(..))` is a task-level failure; the retry policy
///   decides what happens next.
/// - `Err(TaskError)` is a fault: the task is marked failed and not retried.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<Outcome, TaskError>;
}

/// Registry of handlers (kind -> handler), with a fallback for kinds that
/// have no entry.
///
/// Design:
/// - Built during initialization (mutable).
/// - Used during runtime (immutable, shared behind `Arc`).
///
/// Custom types can be registered under `TaskKind::Undefined("name")`; the
/// lookup matches the exact string before falling back.
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
    fallback: Arc<dyn TaskHandler>,
}

impl HandlerRegistry {
    /// Empty registry that sends everything to `fallback`.
    pub fn new(fallback: Arc<dyn TaskHandler>) -> Self {
        Self {
            handlers: HashMap::new(),
            fallback,
        }
    }

    /// Registry with a handler for every built-in kind.
    pub fn standard(latency: &LatencyProfile) -> Self {
        let mut registry = Self::new(Arc::new(SimulatedWork::new(latency.undefined)));

        for kind in TaskKind::KNOWN {
            let handler: Arc<dyn TaskHandler> = match &kind {
                TaskKind::Fail => Arc::new(FlakyWork::new(
                    latency.fail_success_rate,
                    latency.fail_success,
                    latency.failure,
                )),
                TaskKind::FailAbsolute => Arc::new(AlwaysFail::new(latency.failure)),
                other => match latency.work_latency(other) {
                    Some(duration) => Arc::new(SimulatedWork::new(duration)),
                    None => continue,
                },
            };
            registry.handlers.insert(kind, handler);
        }

        registry
    }

    /// Register a handler for a kind that has none yet.
    pub fn register(
        &mut self,
        kind: TaskKind,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), QueueError> {
        if self.handlers.contains_key(&kind) {
            return Err(QueueError::DuplicateHandler(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    /// Register or overwrite ("last wins").
    pub fn replace(&mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(kind, handler);
    }

    pub fn set_fallback(&mut self, handler: Arc<dyn TaskHandler>) {
        self.fallback = handler;
    }

    pub fn get(&self, kind: &TaskKind) -> &Arc<dyn TaskHandler> {
        self.handlers.get(kind).unwrap_or(&self.fallback)
    }
}

/// Runtime executes a claimed task by dispatching to its handler.
pub struct Runtime {
    registry: Arc<HandlerRegistry>,
}

impl Runtime {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    /// Execute one attempt.
    pub async fn execute(&self, task: &Task) -> Result<Outcome, TaskError> {
        let kind = task.kind();
        let handler = Arc::clone(self.registry.get(&kind));
        handler.handle(task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OutcomeKind;

    struct OkHandler;

    #[async_trait]
    impl TaskHandler for OkHandler {
        async fn handle(&self, _task: &Task) -> Result<Outcome, TaskError> {
            Ok(Outcome::success())
        }
    }

    struct FaultyHandler;

    #[async_trait]
    impl TaskHandler for FaultyHandler {
        async fn handle(&self, _task: &Task) -> Result<Outcome, TaskError> {
            Err(TaskError::new("connection reset"))
        }
    }

    #[test]
    fn standard_registry_covers_every_known_kind() {
        let registry = HandlerRegistry::standard(&LatencyProfile::default());
        for kind in TaskKind::KNOWN {
            assert!(
                !Arc::ptr_eq(registry.get(&kind), &registry.fallback),
                "missing handler for {kind}"
            );
        }
        assert!(Arc::ptr_eq(
            registry.get(&TaskKind::Undefined("mystery".into())),
            &registry.fallback
        ));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = HandlerRegistry::standard(&LatencyProfile::default());
        let err = registry
            .register(TaskKind::Email, Arc::new(OkHandler))
            .unwrap_err();
        assert!(matches!(err, QueueError::DuplicateHandler(TaskKind::Email)));

        let replacement: Arc<dyn TaskHandler> = Arc::new(OkHandler);
        registry.replace(TaskKind::Email, Arc::clone(&replacement));
        assert!(Arc::ptr_eq(registry.get(&TaskKind::Email), &replacement));
    }

    #[tokio::test]
    async fn custom_type_is_matched_before_fallback() {
        let mut registry = HandlerRegistry::new(Arc::new(FaultyHandler));
        registry
            .register(TaskKind::Undefined("hello".into()), Arc::new(OkHandler))
            .unwrap();
        let rt = Runtime::new(Arc::new(registry));

        let outcome = rt.execute(&Task::new("t1", "hello", "")).await.unwrap();
        assert_eq!(outcome.kind, OutcomeKind::Success);

        let err = rt.execute(&Task::new("t2", "other", "")).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_type_uses_undefined_latency() {
        let rt = Runtime::new(Arc::new(HandlerRegistry::standard(&LatencyProfile::default())));

        let start = tokio::time::Instant::now();
        let outcome = rt.execute(&Task::new("t1", "mystery", "")).await.unwrap();

        assert!(outcome.is_success());
        let elapsed = start.elapsed();
        assert!(elapsed >= std::time::Duration::from_millis(2000));
        assert!(elapsed < std::time::Duration::from_millis(2100));
    }
}
