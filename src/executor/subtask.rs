//! Handler Contracts
//!
//! Two kinds of handlers can be registered against an `(action, queue)` pair:
//!
//! - **Plain tasks** ([`TaskHandler`]): a single `execute` run as soon as the
//!   task reaches its queue.
//! - **Synchronized subtasks** ([`SynchronizedSubtask`]): the two-phase
//!   reserve → execute protocol used when several nodes must each claim a
//!   resource before any of them may proceed.
//!
//! ## Synchronized lifecycle
//! 1. `reserve` claims an exclusive resource and returns the payload sent back
//!    to the coordinator.
//! 2. The coordinator waits until every participant reserved, then dispatches
//!    `execute` with the merged peer reservations. A handler may assume
//!    `execute` never runs before its own `reserve` succeeded.
//! 3. `execute` does the work and releases on every exit path.
//! 4. `cancel` is the coordinator's abort path and may arrive before `reserve`
//!    ever ran.
//!
//! A fresh subtask instance is built per task, so whatever `reserve` captured
//! (typically a [`Lease`](super::resource::Lease)) belongs to that task alone.

use super::types::Task;

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Outcome of a `reserve` call.
#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    /// The resource was claimed; the payload goes upstream as `reservation_data`.
    Reserved(serde_json::Value),
    /// Nothing free. Not an error: the coordinator decides what to do next.
    Unavailable,
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, task: &Task) -> anyhow::Result<serde_json::Value>;
}

#[async_trait]
pub trait SynchronizedSubtask: Send {
    /// Claims the resource. An `Err` must leave any shared pool unchanged.
    async fn reserve(&mut self, task: &Task) -> anyhow::Result<Reservation>;

    /// Runs the work with this node's reservation and the peers' ones.
    async fn execute(
        &mut self,
        task: &Task,
        own_reservation: &serde_json::Value,
        peer_reservations: &serde_json::Value,
    ) -> anyhow::Result<serde_json::Value>;

    /// Releases whatever this instance's own `reserve` captured, if anything.
    fn cancel(&mut self);
}

/// Builds one subtask instance per dispatched task.
pub type SubtaskFactory = Arc<dyn Fn() -> Box<dyn SynchronizedSubtask> + Send + Sync>;

type TaskHandlerFn = Arc<
    dyn Fn(Task) -> Pin<Box<dyn Future<Output = anyhow::Result<serde_json::Value>> + Send>>
        + Send
        + Sync,
>;

/// Adapts an async closure into a [`TaskHandler`].
struct FnHandler(TaskHandlerFn);

#[async_trait]
impl TaskHandler for FnHandler {
    async fn execute(&self, task: &Task) -> anyhow::Result<serde_json::Value> {
        (self.0)(task.clone()).await
    }
}

/// The executable side of an action descriptor.
#[derive(Clone)]
pub enum ActionHandler {
    Task(Arc<dyn TaskHandler>),
    Synchronized(SubtaskFactory),
}

impl ActionHandler {
    pub fn task<H>(handler: H) -> Self
    where
        H: TaskHandler + 'static,
    {
        ActionHandler::Task(Arc::new(handler))
    }

    /// Wraps an async closure as a plain task handler.
    pub fn from_fn<F, Fut>(handler: F) -> Self
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        // Box::pin erases the concrete future type so closures of different
        // shapes share one handler representation.
        let handler_fn: TaskHandlerFn = Arc::new(move |task: Task| {
            Box::pin(handler(task))
                as Pin<Box<dyn Future<Output = anyhow::Result<serde_json::Value>> + Send>>
        });
        ActionHandler::Task(Arc::new(FnHandler(handler_fn)))
    }

    pub fn synchronized<F, S>(factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: SynchronizedSubtask + 'static,
    {
        ActionHandler::Synchronized(Arc::new(move || {
            Box::new(factory()) as Box<dyn SynchronizedSubtask>
        }))
    }

    pub fn is_synchronized(&self) -> bool {
        matches!(self, ActionHandler::Synchronized(_))
    }
}

impl std::fmt::Debug for ActionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionHandler::Task(_) => f.write_str("ActionHandler::Task"),
            ActionHandler::Synchronized(_) => f.write_str("ActionHandler::Synchronized"),
        }
    }
}
