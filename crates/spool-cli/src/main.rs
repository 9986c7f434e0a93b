use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use spool_core::{
    Outcome, PoolStats, QueueConfig, QueueCounts, ShutdownStatus, Task, TaskError, TaskHandler,
    TaskQueue,
};

#[derive(Debug, Deserialize)]
struct HelloPayload {
    name: String,
}

/// Fails its first `n` attempts, then greets.
struct HelloHandler {
    remaining_failures: AtomicU32,
}

impl HelloHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl TaskHandler for HelloHandler {
    async fn handle(&self, task: &Task) -> Result<Outcome, TaskError> {
        let p: HelloPayload = serde_json::from_str(&task.payload)
            .map_err(|e| TaskError::new(format!("json decode: {e}")))?;

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Ok(Outcome::failure(format!("intentional failure (left={left})")));
        }

        info!("Hello, {}!", p.name);
        Ok(Outcome::success())
    }
}

#[derive(Serialize)]
struct Summary {
    tasks: Vec<Task>,
    counts: QueueCounts,
    pool: PoolStats,
    shutdown: &'static str,
}

fn demo_tasks() -> Vec<Task> {
    vec![
        Task::new("t1", "fail-absolute", "always fails"),
        Task::new("t2", "sms", "+81-90-0000-0000"),
        Task::new("t3", "email", "welcome mail"),
        Task::new("t4", "fail", "coin flip"),
        Task::new("t5", "report", "monthly"),
        Task::new("t6", "data-cleanup", "tmp/"),
        Task::new("t7", "newsletter", "issue #12"),
        Task::new("t8", "hello", r#"{"name":"spool"}"#),
        Task::new("t9", "hello", "not json"),
        Task::new("t10", "mystery", "falls back to the default handler"),
    ]
}

async fn wait_until_idle(queue: &TaskQueue) {
    // 投入直後は queued に乗っているので idle にはならない
    while !queue.is_idle() {
        sleep(Duration::from_millis(200)).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("spool_core=info,spool_cli=info")),
        )
        .init();

    // (A) 設定は環境変数から（SPOOL_WORKERS など）
    let config = QueueConfig::from_env();
    info!(?config, "starting");

    // (B) 組み込み handler + "hello"
    let queue = TaskQueue::builder()
        .config(config)
        .handler("hello", Arc::new(HelloHandler::new(1)))
        .build()?;

    // (C) タスク投入
    for task in demo_tasks() {
        let id = queue.submit(task).await?;
        info!(task_id = %id, "submitted");
    }

    // (D) 全部終わるか Ctrl-C まで待つ
    tokio::select! {
        _ = wait_until_idle(&queue) => info!("all tasks settled"),
        _ = tokio::signal::ctrl_c() => warn!("interrupted; shutting down"),
    }

    // (E) graceful shutdown（timeout を過ぎたら abort）
    let status = queue.shutdown().await;

    let mut tasks = queue.list_all();
    tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

    let summary = Summary {
        tasks,
        counts: queue.counts(),
        pool: queue.pool_stats(),
        shutdown: match status {
            ShutdownStatus::Graceful => "graceful",
            ShutdownStatus::Forced { .. } => "forced",
        },
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
