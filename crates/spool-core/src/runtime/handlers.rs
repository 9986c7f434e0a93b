//! Built-in handlers. Each one keeps its worker busy for a fixed latency,
//! standing in for the cost of an external call.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use super::TaskHandler;
use crate::domain::{Outcome, Task};
use crate::error::TaskError;

/// Sleeps, then completes.
#[derive(Debug, Clone)]
pub struct SimulatedWork {
    latency: Duration,
}

impl SimulatedWork {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl TaskHandler for SimulatedWork {
    async fn handle(&self, task: &Task) -> Result<Outcome, TaskError> {
        tokio::time::sleep(self.latency).await;
        debug!(task_id = %task.id, task_type = %task.task_type, "work done");
        Ok(Outcome::success())
    }
}

/// Succeeds with probability `success_rate`, fails otherwise.
#[derive(Debug, Clone)]
pub struct FlakyWork {
    success_rate: f64,
    success_latency: Duration,
    failure_latency: Duration,
}

impl FlakyWork {
    pub fn new(success_rate: f64, success_latency: Duration, failure_latency: Duration) -> Self {
        Self {
            success_rate: success_rate.clamp(0.0, 1.0),
            success_latency,
            failure_latency,
        }
    }
}

#[async_trait]
impl TaskHandler for FlakyWork {
    async fn handle(&self, task: &Task) -> Result<Outcome, TaskError> {
        // ThreadRng is !Send: draw before the first await.
        let succeeded = rand::thread_rng().gen_bool(self.success_rate);

        if succeeded {
            tokio::time::sleep(self.success_latency).await;
            Ok(Outcome::success())
        } else {
            tokio::time::sleep(self.failure_latency).await;
            Ok(Outcome::failure(format!(
                "{} lost the draw (success rate {})",
                task.task_type, self.success_rate
            )))
        }
    }
}

/// Always fails.
#[derive(Debug, Clone)]
pub struct AlwaysFail {
    latency: Duration,
}

impl AlwaysFail {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl TaskHandler for AlwaysFail {
    async fn handle(&self, task: &Task) -> Result<Outcome, TaskError> {
        tokio::time::sleep(self.latency).await;
        Ok(Outcome::failure(format!("{} always fails", task.task_type)))
    }
}
