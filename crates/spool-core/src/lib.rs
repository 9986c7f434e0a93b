//! spool-core
//!
//! In-process task queue: a bounded FIFO hand-off to a fixed pool of tokio
//! workers, with per-task retry and a status registry that can be queried
//! while work is running.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task_type, task, state, outcome, decision）
//! - **queue**: TaskStore（registry + distribution channel）と RetryPolicy
//! - **runtime**: TaskHandler trait, HandlerRegistry, built-in handlers
//! - **worker**: WorkerPool（dequeue -> claim -> execute -> decide）
//! - **service**: TaskQueue facade と builder
//! - **config / error / observability**: 設定, エラー型, カウンタ

pub mod config;
pub mod domain;
pub mod error;
pub mod observability;
pub mod queue;
pub mod runtime;
pub mod service;
pub mod worker;

pub use config::{LatencyProfile, QueueConfig};
pub use domain::{Outcome, Task, TaskId, TaskKind, TaskStatus};
pub use error::{QueueError, TaskError};
pub use observability::{PoolStats, QueueCounts};
pub use queue::TaskStore;
pub use runtime::{HandlerRegistry, TaskHandler};
pub use service::{TaskQueue, TaskQueueBuilder};
pub use worker::{ShutdownStatus, WorkerPool};
