//! Worker pool: N long-lived tokio tasks pulling from the [`TaskStore`].

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{Decision, Outcome, Task};
use crate::error::TaskError;
use crate::observability::PoolStats;
use crate::queue::{Claim, RetryPolicy, TaskStore};
use crate::runtime::Runtime;

/// How [`WorkerPool::shutdown`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStatus {
    /// Every worker exited within the timeout.
    Graceful,
    /// The timeout elapsed; `aborted` workers were cancelled mid-task.
    Forced { aborted: usize },
}

/// Worker pool handle.
/// - `shutdown_tx` に true を送ると全ワーカーが次のループで止まる
/// - 実行中のタスクは最後まで走らせる（timeout までは）
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<PoolMetrics>,
    workers: usize,
}

impl WorkerPool {
    /// Spawn `n` workers on the current tokio runtime.
    pub fn spawn(n: usize, store: Arc<TaskStore>, runtime: Arc<Runtime>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let metrics = Arc::new(PoolMetrics::default());

        let mut joins = Vec::with_capacity(n);
        for worker_id in 1..=n {
            let worker = Worker {
                id: worker_id,
                store: Arc::clone(&store),
                runtime: Arc::clone(&runtime),
                metrics: Arc::clone(&metrics),
                policy: RetryPolicy::new(),
            };
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(worker.run(rx)));
        }
        info!(workers = n, "worker pool started");

        Self {
            shutdown_tx,
            joins: Mutex::new(joins),
            metrics,
            workers: n,
        }
    }

    /// Executions running right now.
    pub fn in_flight(&self) -> usize {
        self.metrics.in_flight.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        let m = &self.metrics;
        PoolStats {
            workers: self.workers,
            in_flight: m.in_flight.load(Ordering::SeqCst),
            peak_in_flight: m.peak_in_flight.load(Ordering::SeqCst),
            completed: m.completed.load(Ordering::Relaxed),
            failed: m.failed.load(Ordering::Relaxed),
            retried: m.retried.load(Ordering::Relaxed),
            faulted: m.faulted.load(Ordering::Relaxed),
            skipped: m.skipped.load(Ordering::Relaxed),
        }
    }

    /// Ask every worker to stop taking tasks. In-flight executions keep going.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop the workers, waiting at most `timeout` for in-flight executions.
    ///
    /// Workers still running at the deadline are aborted; their tasks stay
    /// `INPROGRESS`. Calling this again after it returned is a no-op that
    /// reports [`ShutdownStatus::Graceful`].
    #[instrument(skip(self), fields(workers = self.workers))]
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownStatus {
        self.request_shutdown();

        let joins = std::mem::take(&mut *self.joins.lock());
        let deadline = tokio::time::Instant::now() + timeout;
        let mut aborted = 0;

        for mut join in joins {
            match tokio::time::timeout_at(deadline, &mut join).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "worker exited abnormally"),
                Err(_) => {
                    join.abort();
                    aborted += 1;
                }
            }
        }

        if aborted == 0 {
            info!("worker pool stopped");
            ShutdownStatus::Graceful
        } else {
            warn!(aborted, "shutdown timed out; aborted workers");
            ShutdownStatus::Forced { aborted }
        }
    }
}

#[derive(Default)]
struct PoolMetrics {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    faulted: AtomicU64,
    skipped: AtomicU64,
}

impl PoolMetrics {
    fn begin(&self) -> InFlightGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightGuard { metrics: self }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct InFlightGuard<'a> {
    metrics: &'a PoolMetrics,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.metrics.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Worker {
    id: usize,
    store: Arc<TaskStore>,
    runtime: Arc<Runtime>,
    metrics: Arc<PoolMetrics>,
    policy: RetryPolicy,
}

impl Worker {
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        debug!(worker_id = self.id, "worker started");
        loop {
            // shutdown が来ていたら抜ける
            if *shutdown_rx.borrow() {
                break;
            }

            // dequeue は待つので shutdown と競合させる
            let task = tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        // pool handle が drop された
                        break;
                    }
                    continue;
                }
                task = self.store.dequeue() => task,
            };

            let Some(task) = task else {
                debug!(worker_id = self.id, "store closed");
                break;
            };

            self.process(task).await;
        }
        debug!(worker_id = self.id, "worker stopped");
    }

    async fn process(&self, snapshot: Task) {
        let id = snapshot.id;

        let task = match self.store.claim(&id) {
            Claim::Started(task) => task,
            Claim::Exhausted(task) => {
                warn!(
                    worker_id = self.id,
                    task_id = %id,
                    attempts = task.attempts,
                    max_retries = task.max_retries,
                    "retry budget already spent; not running"
                );
                PoolMetrics::bump(&self.metrics.skipped);
                return;
            }
            Claim::NotQueued(status) => {
                // 同じ id が二重に channel に入っていた
                debug!(worker_id = self.id, task_id = %id, %status, "leftover id; record is not queued");
                PoolMetrics::bump(&self.metrics.skipped);
                return;
            }
            Claim::Missing => {
                debug!(worker_id = self.id, task_id = %id, "record removed before claim");
                PoolMetrics::bump(&self.metrics.skipped);
                return;
            }
        };

        let _in_flight = self.metrics.begin();
        let attempt = task.attempts;
        info!(
            worker_id = self.id,
            task_id = %id,
            task_type = %task.task_type,
            attempt,
            "processing task"
        );

        match execute_isolated(&self.runtime, task.clone()).await {
            Ok(outcome) => self.apply(&task, &outcome),
            Err(fault) => {
                error!(worker_id = self.id, task_id = %id, attempt, error = %fault, "handler fault; not retrying");
                PoolMetrics::bump(&self.metrics.faulted);
                if self.store.fail(&id, attempt).is_none() {
                    debug!(task_id = %id, "record removed during execution");
                }
            }
        }
    }

    fn apply(&self, task: &Task, outcome: &Outcome) {
        let id = &task.id;
        let attempt = task.attempts;

        let applied = match self.policy.decide(task, outcome) {
            Decision::Complete => {
                let done = self.store.complete(id, attempt).is_some();
                if done {
                    PoolMetrics::bump(&self.metrics.completed);
                    info!(worker_id = self.id, task_id = %id, attempt, "task completed");
                }
                done
            }
            Decision::Retry { reason } => {
                let requeued = self.store.requeue(id, attempt);
                if requeued {
                    PoolMetrics::bump(&self.metrics.retried);
                    warn!(worker_id = self.id, task_id = %id, attempt, %reason, "task failed; retrying");
                }
                requeued
            }
            Decision::GiveUp { reason } => {
                let done = self.store.fail(id, attempt).is_some();
                if done {
                    PoolMetrics::bump(&self.metrics.failed);
                    warn!(worker_id = self.id, task_id = %id, attempt, %reason, "task failed permanently");
                }
                done
            }
        };

        if !applied {
            debug!(task_id = %id, "record removed during execution; result dropped");
        }
    }
}

/// Run the handler on its own tokio task so a panic surfaces as a fault
/// instead of taking the worker down.
async fn execute_isolated(runtime: &Arc<Runtime>, task: Task) -> Result<Outcome, TaskError> {
    let runtime = Arc::clone(runtime);
    let mut handle = tokio::spawn(async move { runtime.execute(&task).await });

    // worker が abort されたら handler も道連れにする
    let _abort = AbortOnDrop(handle.abort_handle());

    match (&mut handle).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(TaskError::new(format!(
            "handler panicked: {}",
            panic_message(e.into_panic())
        ))),
        Err(e) => Err(TaskError::new(format!("handler cancelled: {e}"))),
    }
}

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LatencyProfile;
    use crate::domain::{TaskId, TaskStatus};
    use crate::runtime::HandlerRegistry;
    use crate::runtime::TaskHandler;
    use async_trait::async_trait;

    fn spawn_pool(workers: usize, registry: HandlerRegistry) -> (Arc<TaskStore>, WorkerPool) {
        let store = Arc::new(TaskStore::new(100));
        let runtime = Arc::new(Runtime::new(Arc::new(registry)));
        let pool = WorkerPool::spawn(workers, Arc::clone(&store), runtime);
        (store, pool)
    }

    fn standard() -> HandlerRegistry {
        HandlerRegistry::standard(&LatencyProfile::default())
    }

    async fn wait_for(store: &TaskStore, id: &str, done: impl Fn(&Task) -> bool) -> Task {
        let id = TaskId::new(id);
        for _ in 0..2_000 {
            if let Some(task) = store.get_job_by_id(&id) {
                if done(&task) {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("task {id} never reached the expected state");
    }

    struct Counting {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler for Counting {
        async fn handle(&self, _task: &Task) -> Result<Outcome, TaskError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(Outcome::success())
        }
    }

    struct Panicking;

    #[async_trait]
    impl TaskHandler for Panicking {
        async fn handle(&self, task: &Task) -> Result<Outcome, TaskError> {
            if task.payload.is_empty() {
                panic!("boom");
            }
            Ok(Outcome::success())
        }
    }

    struct Faulty;

    #[async_trait]
    impl TaskHandler for Faulty {
        async fn handle(&self, _task: &Task) -> Result<Outcome, TaskError> {
            Err(TaskError::new("connection reset"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_task_ends_failed_after_max_retries() {
        let (store, pool) = spawn_pool(3, standard());
        store
            .enqueue(Task::new("t1", "fail-absolute", "x"))
            .await
            .unwrap();

        let task = wait_for(&store, "t1", Task::is_finished).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempts, 3);
        assert_eq!(task.max_retries, 3);

        let stats = pool.stats();
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(pool.shutdown(Duration::from_secs(1)).await, ShutdownStatus::Graceful);
    }

    #[tokio::test(start_paused = true)]
    async fn sms_completes_on_first_attempt() {
        let (store, pool) = spawn_pool(3, standard());
        store.enqueue(Task::new("t2", "sms", "y")).await.unwrap();

        let task = wait_for(&store, "t2", Task::is_finished).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.attempts, 1);
        assert_eq!(pool.stats().completed, 1);
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_worker_count() {
        let workers = 2;
        let (store, pool) = spawn_pool(workers, standard());
        for i in 0..(2 * workers + 1) {
            store
                .enqueue(Task::new(format!("long-{i}"), "takes-long", ""))
                .await
                .unwrap();
        }

        // 10s までは先頭 2 件だけが走っている
        tokio::time::sleep(Duration::from_secs(5)).await;
        let counts = store.counts();
        assert_eq!(counts.in_progress, workers);
        assert_eq!(counts.queued, workers + 1);
        assert_eq!(pool.in_flight(), workers);

        for i in 0..(2 * workers + 1) {
            wait_for(&store, &format!("long-{i}"), Task::is_finished).await;
        }
        let stats = pool.stats();
        assert_eq!(stats.peak_in_flight, workers);
        assert_eq!(stats.completed, (2 * workers + 1) as u64);
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn panic_marks_failed_and_worker_keeps_going() {
        let mut registry = standard();
        registry.replace(crate::domain::TaskKind::Undefined("explode".into()), Arc::new(Panicking));
        let (store, pool) = spawn_pool(1, registry);

        store.enqueue(Task::new("p1", "explode", "")).await.unwrap();
        store.enqueue(Task::new("p2", "sms", "")).await.unwrap();

        let next = wait_for(&store, "p2", Task::is_finished).await;
        assert_eq!(next.status, TaskStatus::Completed);

        let exploded = store.get_job_by_id(&TaskId::new("p1")).unwrap();
        assert_eq!(exploded.status, TaskStatus::Failed);
        assert_eq!(exploded.attempts, 1);
        assert_eq!(pool.stats().faulted, 1);
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn handler_error_is_not_retried() {
        let registry = HandlerRegistry::new(Arc::new(Faulty));
        let (store, pool) = spawn_pool(1, registry);
        store.enqueue(Task::new("e1", "email", "")).await.unwrap();

        let task = wait_for(&store, "e1", |t| t.status == TaskStatus::Failed).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(store.get_job_by_id(&task.id).unwrap().attempts, 1);
        assert_eq!(pool.stats().faulted, 1);
        assert_eq!(pool.stats().retried, 0);
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_task_is_never_executed() {
        let counter = Arc::new(Counting {
            runs: AtomicUsize::new(0),
        });
        let store = Arc::new(TaskStore::new(10));
        store.enqueue(Task::new("gone", "email", "")).await.unwrap();
        store.enqueue(Task::new("kept", "email", "")).await.unwrap();
        assert!(store.delete_job(&TaskId::new("gone")));

        let runtime = Arc::new(Runtime::new(Arc::new(HandlerRegistry::new(counter.clone()))));
        let pool = WorkerPool::spawn(1, Arc::clone(&store), runtime);

        wait_for(&store, "kept", Task::is_finished).await;
        assert_eq!(counter.runs.load(Ordering::SeqCst), 1);
        assert!(store.get_job_by_id(&TaskId::new("gone")).is_none());
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn leftover_id_does_not_rerun_a_finished_task() {
        let counter = Arc::new(Counting {
            runs: AtomicUsize::new(0),
        });
        let store = Arc::new(TaskStore::new(10));
        let id = TaskId::new("t1");

        // delete + 再投入で channel に t1 が 2 つ残る
        store.enqueue(Task::new("t1", "email", "")).await.unwrap();
        assert!(store.delete_job(&id));
        store.enqueue(Task::new("t1", "email", "")).await.unwrap();

        let runtime = Arc::new(Runtime::new(Arc::new(HandlerRegistry::new(counter.clone()))));
        let pool = WorkerPool::spawn(1, Arc::clone(&store), runtime);

        wait_for(&store, "t1", Task::is_finished).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        let task = store.get_job_by_id(&id).unwrap();
        assert_eq!(counter.runs.load(Ordering::SeqCst), 1);
        assert_eq!(task.attempts, 1);
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(pool.stats().skipped, 1);
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_submission_runs_on_one_worker_only() {
        let store = Arc::new(TaskStore::new(10));
        store.enqueue(Task::new("t1", "takes-long", "")).await.unwrap();
        store.enqueue(Task::new("t1", "takes-long", "")).await.unwrap();

        let runtime = Arc::new(Runtime::new(Arc::new(standard())));
        let pool = WorkerPool::spawn(2, Arc::clone(&store), runtime);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(pool.in_flight(), 1);
        assert_eq!(store.get_job_by_id(&TaskId::new("t1")).unwrap().attempts, 1);

        let task = wait_for(&store, "t1", Task::is_finished).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.attempts, 1);

        let stats = pool.stats();
        assert_eq!(stats.peak_in_flight, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.skipped, 1);
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_resubmission_fails_without_running() {
        let counter = Arc::new(Counting {
            runs: AtomicUsize::new(0),
        });
        let (store, pool) = spawn_pool(1, HandlerRegistry::new(counter.clone()));

        let mut task = Task::new("old", "email", "");
        task.attempts = 3;
        task.max_retries = 3;
        store.enqueue(task).await.unwrap();

        let task = wait_for(&store, "old", Task::is_finished).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempts, 3);
        assert_eq!(counter.runs.load(Ordering::SeqCst), 0);
        assert_eq!(pool.stats().skipped, 1);
        pool.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn idle_pool_shuts_down_gracefully() {
        let (_store, pool) = spawn_pool(3, standard());
        assert_eq!(pool.shutdown(Duration::from_millis(100)).await, ShutdownStatus::Graceful);
        // 2 回目は何もしない
        assert_eq!(pool.shutdown(Duration::from_millis(100)).await, ShutdownStatus::Graceful);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_task_is_aborted_at_the_deadline() {
        let (store, pool) = spawn_pool(2, standard());
        store.enqueue(Task::new("slow", "takes-long", "")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(pool.in_flight(), 1);

        let status = pool.shutdown(Duration::from_millis(200)).await;
        assert_eq!(status, ShutdownStatus::Forced { aborted: 1 });

        let task = store.get_job_by_id(&TaskId::new("slow")).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
    }

    #[test]
    fn panic_payloads_are_readable() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7_u8)), "non-string panic payload");
    }
}
