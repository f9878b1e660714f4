use serde::{Deserialize, Serialize};

/// Name of the queue reserved for system-level tasks. Its worker pool always
/// exists once the node starts accepting work.
pub const INTERNAL_QUEUE: &str = "internal";

/// Unique identifier for a task on this node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generates a new random UUID v4-based TaskId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capability flags declared when a handler is registered.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionFlags {
    /// Runs as a task in its own queue. Registering one creates the queue's worker pool.
    pub is_task: bool,
    /// Lives on the reserved internal queue.
    pub is_internal: bool,
    /// Only the node itself may trigger it (see `SecurityGate`).
    pub is_local: bool,
}

impl ActionFlags {
    /// Flags of a task handler with its own queue.
    pub fn task() -> Self {
        Self {
            is_task: true,
            ..Self::default()
        }
    }

    /// Flags of a task on the internal queue.
    pub fn internal() -> Self {
        Self {
            is_task: true,
            is_internal: true,
            is_local: false,
        }
    }

    /// Restricts the action to senders carrying the local identity.
    pub fn local_only(mut self) -> Self {
        self.is_local = true;
        self
    }
}

/// Lifecycle state of a task on this node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted, waiting for its first job to run.
    Pending,
    /// `reserve` succeeded; waiting for the coordinator to send `execute`.
    Reserved,
    /// `reserve` found the resource pool exhausted.
    Unavailable,
    /// `execute` is running. Cancellation is no longer possible.
    Executing,
    Finished,
    Failed { error: String },
    Cancelled,
    /// Refused before any handler code ran (e.g. sender identity mismatch).
    Rejected { reason: String },
}

impl TaskStatus {
    /// Whether no further transition can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Unavailable
                | TaskStatus::Finished
                | TaskStatus::Failed { .. }
                | TaskStatus::Cancelled
                | TaskStatus::Rejected { .. }
        )
    }
}

/// The unit of distributed work as this node sees it.
///
/// `reservation_data` is set once `reserve` completes and `output_data` once
/// `execute` completes. This is also the record handed to the `TaskStore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub action: String,
    pub queue: String,
    /// Identity (certificate) of whoever dispatched the task.
    pub sender_identity: String,
    pub input_data: serde_json::Value,
    pub reservation_data: Option<serde_json::Value>,
    pub output_data: Option<serde_json::Value>,
    /// Whether the handler follows the reserve/execute protocol.
    pub synchronized: bool,
    pub status: TaskStatus,
    /// Timestamp (ms) when the task was accepted.
    pub created_at: u64,
    /// Timestamp (ms) of the last state transition.
    pub updated_at: u64,
}

impl Task {
    /// Builds a fresh `Pending` task from an incoming message.
    pub fn from_message(message: TaskMessage, synchronized: bool) -> Self {
        let now = now_ms();
        Self {
            id: TaskId::new(),
            action: message.action,
            queue: message.queue,
            sender_identity: message.sender_identity,
            input_data: message.input_data,
            reservation_data: None,
            output_data: None,
            synchronized,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = now_ms();
    }
}

/// A dispatch-in message as delivered by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub action: String,
    pub queue: String,
    #[serde(default)]
    pub sender_identity: String,
    #[serde(default)]
    pub input_data: serde_json::Value,
}

/// Events pushed upstream as a task moves through its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskUpdate {
    Reserved { reservation_data: serde_json::Value },
    Unavailable,
    Finished { output_data: serde_json::Value },
    Failed { error: String },
    Cancelled,
    Rejected { reason: String },
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
