//! Asynchronous offload of blocking tool work.
//!
//! The bridge submits a tool invocation to a task queue and hands back a
//! ticket immediately; the engine settles the ticket later, when (and only
//! when) a dependent step needs the output. The queue contract is abstract;
//! the in-process tokio backend below carries the same `{tool, input}`
//! payload a broker-backed backend would.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::tool::client::{ToolClient, ToolFailure};
use crate::tool::registry::{ToolHandle, ToolRegistry};

/// Payload placed on the task queue: which tool to run and its input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    pub tool: String,
    pub input: Value,
}

/// Queue-side view of a submitted task.
#[derive(Debug, Clone)]
pub enum TaskStatus {
    Pending,
    Completed(Value),
    Failed(ToolFailure),
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("unknown task id {0}")]
    UnknownTask(Uuid),
}

/// Abstract task-queue contract the bridge depends on.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: QueuedTask) -> Result<Uuid, QueueError>;
    async fn poll(&self, task_id: Uuid) -> Result<TaskStatus, QueueError>;
}

/// In-process queue backend running each task on a spawned tokio task.
///
/// The tool is resolved by name at execution time, so a manifest
/// re-registered after submission takes effect for queued work too.
pub struct TokioTaskQueue {
    registry: Arc<ToolRegistry>,
    client: Arc<ToolClient>,
    results: Arc<Mutex<HashMap<Uuid, TaskStatus>>>,
}

impl TokioTaskQueue {
    pub fn new(registry: Arc<ToolRegistry>, client: Arc<ToolClient>) -> Self {
        Self {
            registry,
            client,
            results: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl TaskQueue for TokioTaskQueue {
    async fn enqueue(&self, task: QueuedTask) -> Result<Uuid, QueueError> {
        let task_id = Uuid::new_v4();
        lock_results(&self.results).insert(task_id, TaskStatus::Pending);

        let registry = Arc::clone(&self.registry);
        let client = Arc::clone(&self.client);
        let results = Arc::clone(&self.results);
        tokio::spawn(async move {
            let outcome = match registry.resolve(&task.tool) {
                Ok(handle) => client.invoke(&handle, task.input).await,
                Err(e) => Err(ToolFailure::handler_error(e.to_string())),
            };
            let status = match outcome {
                Ok(output) => TaskStatus::Completed(output),
                Err(failure) => TaskStatus::Failed(failure),
            };
            lock_results(&results).insert(task_id, status);
        });

        Ok(task_id)
    }

    async fn poll(&self, task_id: Uuid) -> Result<TaskStatus, QueueError> {
        lock_results(&self.results)
            .get(&task_id)
            .cloned()
            .ok_or(QueueError::UnknownTask(task_id))
    }
}

/// A poisoned lock only means a worker panicked after its result was written;
/// the table itself stays usable.
fn lock_results(
    results: &Mutex<HashMap<Uuid, TaskStatus>>,
) -> std::sync::MutexGuard<'_, HashMap<Uuid, TaskStatus>> {
    results.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to an offloaded step: returned immediately by `submit`, settled
/// later by `await_result`.
#[derive(Debug, Clone, Serialize)]
pub struct OffloadTicket {
    pub task_id: Uuid,
    pub tool: String,
    pub submitted_at: DateTime<Utc>,
}

/// Submits designated blocking steps to the task queue and awaits their
/// results under a bound. Never swallows a failure; the engine decides what
/// a timeout means for the step that produced the ticket.
pub struct OffloadBridge {
    queue: Arc<dyn TaskQueue>,
    poll_interval: Duration,
}

impl OffloadBridge {
    pub fn new(queue: Arc<dyn TaskQueue>, poll_interval: Duration) -> Self {
        Self {
            queue,
            poll_interval,
        }
    }

    /// Enqueue the invocation and return a ticket without waiting for it.
    pub async fn submit(
        &self,
        handle: &ToolHandle,
        input: Value,
    ) -> Result<OffloadTicket, ToolFailure> {
        let task = QueuedTask {
            tool: handle.name().to_string(),
            input,
        };
        let task_id = self
            .queue
            .enqueue(task)
            .await
            .map_err(|e| ToolFailure::handler_error(format!("enqueue failed: {}", e)))?;

        tracing::info!("offloaded '{}' as task {}", handle.name(), task_id);
        Ok(OffloadTicket {
            task_id,
            tool: handle.name().to_string(),
            submitted_at: Utc::now(),
        })
    }

    /// Await the offloaded result, bounded by `timeout`.
    pub async fn await_result(
        &self,
        ticket: &OffloadTicket,
        timeout: Duration,
    ) -> Result<Value, ToolFailure> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.queue.poll(ticket.task_id).await {
                Ok(TaskStatus::Completed(output)) => return Ok(output),
                Ok(TaskStatus::Failed(failure)) => return Err(failure),
                Ok(TaskStatus::Pending) => {}
                Err(e) => {
                    return Err(ToolFailure::handler_error(format!(
                        "queue poll failed: {}",
                        e
                    )))
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(ToolFailure::timeout(format!(
                    "offloaded task '{}' did not finish within {}ms",
                    ticket.tool,
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
