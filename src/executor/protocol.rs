//! Network Protocol Definitions
//!
//! Data Transfer Objects for the dispatch-in HTTP surface: task submission,
//! the coordinator's execute/cancel calls, and status queries.

use super::types::*;
use super::workers::PoolStats;
use serde::{Deserialize, Serialize};

pub const ENDPOINT_QUEUES: &str = "/api/queues";
pub const ENDPOINT_SUBMIT_TASK: &str = "/api/queues/:queue";
pub const ENDPOINT_TASK_STATUS: &str = "/api/tasks/:id";
pub const ENDPOINT_TASK_EXECUTE: &str = "/api/tasks/:id/execute";
pub const ENDPOINT_TASK_CANCEL: &str = "/api/tasks/:id/cancel";

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTaskRequest {
    pub action: String,
    #[serde(default)]
    pub sender_identity: String,
    #[serde(default)]
    pub input_data: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTaskResponse {
    pub task_id: Option<TaskId>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExecuteTaskRequest {
    /// Reservations of the other participants, merged by the coordinator.
    #[serde(default)]
    pub peer_reservations: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskActionResponse {
    pub task_id: TaskId,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: TaskId,
    pub action: String,
    pub queue: String,
    pub status: TaskStatus,
    pub reservation_data: Option<serde_json::Value>,
    pub output_data: Option<serde_json::Value>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl From<Task> for TaskStatusResponse {
    fn from(task: Task) -> Self {
        Self {
            task_id: task.id,
            action: task.action,
            queue: task.queue,
            status: task.status,
            reservation_data: task.reservation_data,
            output_data: task.output_data,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QueueStatsResponse {
    pub queues: Vec<PoolStats>,
}
