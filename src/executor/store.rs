//! Task persistence port.
//!
//! The executor saves the task record after every state transition. Durable
//! storage is somebody else's job; [`MemoryTaskStore`] keeps records in memory
//! so status queries work out of the box.

use super::types::{Task, TaskId};

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Terminal records kept by [`MemoryTaskStore::new`].
pub const DEFAULT_RETENTION: usize = 10_000;

/// Where task records go after each state transition.
pub trait TaskStore: Send + Sync {
    /// Inserts or replaces the record of `task`.
    fn save(&self, task: &Task);
    /// Latest record of a task, if still known.
    fn load(&self, task_id: &TaskId) -> Option<Task>;
}

/// In-memory store with bounded retention.
///
/// Live tasks are always kept. Once more than `retention` tasks have reached a
/// terminal state, the oldest terminal records are evicted. Status queries,
/// and cancels of an evicted task, then see it as unknown.
pub struct MemoryTaskStore {
    tasks: DashMap<TaskId, Task>,
    /// Terminal task ids, oldest first.
    finished: Mutex<VecDeque<TaskId>>,
    retention: usize,
}

impl MemoryTaskStore {
    /// Store keeping [`DEFAULT_RETENTION`] terminal records.
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    pub fn with_retention(retention: usize) -> Self {
        Self {
            tasks: DashMap::new(),
            finished: Mutex::new(VecDeque::new()),
            retention,
        }
    }

    /// Number of records currently held, live and terminal.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn evict_finished(&self, task_id: &TaskId) {
        let mut finished = self
            .finished
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        finished.push_back(task_id.clone());

        while finished.len() > self.retention {
            if let Some(oldest) = finished.pop_front() {
                self.tasks.remove(&oldest);
                tracing::debug!("Evicted record of task {}", oldest);
            }
        }
    }
}

impl Default for MemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore for MemoryTaskStore {
    fn save(&self, task: &Task) {
        let previous = self.tasks.insert(task.id.clone(), task.clone());
        let was_terminal = previous.is_some_and(|previous| previous.status.is_terminal());

        if task.status.is_terminal() && !was_terminal {
            self.evict_finished(&task.id);
        }
    }

    fn load(&self, task_id: &TaskId) -> Option<Task> {
        self.tasks.get(task_id).map(|entry| entry.value().clone())
    }
}
