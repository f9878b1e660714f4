//! Task Executor
//!
//! Drives dispatched tasks through their lifecycle on this node.
//!
//! ## Responsibilities
//! - **Dispatch**: resolving `(action, queue)` through the registry and
//!   scheduling the first job in that queue's worker pool.
//! - **Gating**: vetting the sender identity of local-only actions before any
//!   handler code runs.
//! - **Protocol**: enforcing reserve → execute ordering for synchronized
//!   subtasks and the cancel rules (no execute without a reservation, no cancel
//!   once execute began).
//! - **Reporting**: pushing `TaskUpdate`s upstream and saving the task record
//!   after every transition.
//!
//! `reserve` and `execute` run as two separate jobs; between them the task
//! is parked in `Reserved` while the coordinator waits for its peers.

use super::registry::{ActionDescriptor, ActionHandlerRegistry};
use super::security::SecurityGate;
use super::store::TaskStore;
use super::subtask::{ActionHandler, Reservation, SynchronizedSubtask, TaskHandler};
use super::types::*;
use crate::error::{QueueError, Result};

use dashmap::DashMap;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

/// Per-task bookkeeping. Every access goes through the slot's mutex.
struct TaskSlot {
    task: Task,
    /// The handler instance of a synchronized task. Whatever it reserved is
    /// released when it is dropped.
    subtask: Option<Box<dyn SynchronizedSubtask>>,
    /// Whether jobs go through the queue's worker pool.
    is_task: bool,
    updates: mpsc::UnboundedSender<TaskUpdate>,
}

type SharedSlot = Arc<Mutex<TaskSlot>>;

/// Returned by [`TaskExecutor::dispatch`]; streams lifecycle events of one task.
pub struct TaskHandle {
    pub task_id: TaskId,
    updates: mpsc::UnboundedReceiver<TaskUpdate>,
}

impl TaskHandle {
    /// Waits for the next lifecycle event. `None` once the task is done and
    /// the executor dropped its side of the channel.
    pub async fn next_update(&mut self) -> Option<TaskUpdate> {
        self.updates.recv().await
    }
}

/// Node-side driver of dispatched tasks.
pub struct TaskExecutor {
    registry: Arc<ActionHandlerRegistry>,
    gate: SecurityGate,
    store: Arc<dyn TaskStore>,
    /// Tasks that have not reached a terminal state yet.
    slots: DashMap<TaskId, SharedSlot>,
}

impl TaskExecutor {
    /// Creates an executor resolving tasks through `registry` and saving
    /// their records in `store`.
    pub fn new(
        registry: Arc<ActionHandlerRegistry>,
        gate: SecurityGate,
        store: Arc<dyn TaskStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            gate,
            store,
            slots: DashMap::new(),
        })
    }

    /// Accepts a task message and schedules its first job.
    ///
    /// Fails with `NotFound` when no handler is registered for the pair; the
    /// transport reports that as a rejected task.
    pub fn dispatch(self: &Arc<Self>, message: TaskMessage) -> Result<TaskHandle> {
        let ActionDescriptor {
            action,
            queue,
            handler,
            flags,
        } = self.registry.lookup(&message.action, &message.queue)?;

        let task = Task::from_message(message, handler.is_synchronized());
        let task_id = task.id.clone();
        let sender = task.sender_identity.clone();
        let job_name = format!("{}#{}", action, task_id);
        let mut record = task.clone();

        let subtask = match &handler {
            ActionHandler::Synchronized(factory) => Some(factory()),
            ActionHandler::Task(_) => None,
        };

        let (updates, receiver) = mpsc::unbounded_channel();
        self.store.save(&task);
        let slot = Arc::new(Mutex::new(TaskSlot {
            task,
            subtask,
            is_task: flags.is_task,
            updates,
        }));
        self.slots.insert(task_id.clone(), slot.clone());

        let executor = self.clone();
        let job = async move {
            match handler {
                ActionHandler::Task(handler) => {
                    executor
                        .run_gated(&slot, flags, &sender, || {
                            executor.plain_phase(&slot, handler)
                        })
                        .await
                }
                ActionHandler::Synchronized(_) => {
                    executor
                        .run_gated(&slot, flags, &sender, || executor.reserve_phase(&slot))
                        .await
                }
            }
        };

        if let Err(e) = self.spawn_job(flags.is_task, &queue, &job_name, job) {
            self.slots.remove(&task_id);
            record.set_status(TaskStatus::Failed {
                error: e.to_string(),
            });
            self.store.save(&record);
            return Err(e);
        }

        tracing::info!(
            "Dispatched task {} (action '{}', queue '{}')",
            task_id,
            action,
            queue
        );
        Ok(TaskHandle {
            task_id,
            updates: receiver,
        })
    }

    /// Runs the execute phase of a reserved synchronized task.
    ///
    /// The coordinator calls this only once every participant reserved.
    /// Anything other than a task parked in `Reserved` is a protocol violation.
    pub async fn execute(
        self: &Arc<Self>,
        task_id: &TaskId,
        peer_reservations: serde_json::Value,
    ) -> Result<()> {
        let slot = self.slot(task_id).ok_or_else(|| match self.store.load(task_id) {
            Some(task) => QueueError::ProtocolViolation(format!(
                "execute on task {} in state {:?}",
                task_id, task.status
            )),
            None => QueueError::NotFound(format!("task {}", task_id)),
        })?;

        let (is_task, queue, subtask) = {
            let mut guard = slot.lock().await;
            let slot = &mut *guard;

            if !slot.task.synchronized {
                return Err(QueueError::ProtocolViolation(format!(
                    "task {} does not follow the reserve/execute protocol",
                    task_id
                )));
            }
            if slot.task.status != TaskStatus::Reserved {
                return Err(QueueError::ProtocolViolation(format!(
                    "execute on task {} in state {:?}, expected Reserved",
                    task_id, slot.task.status
                )));
            }
            let Some(subtask) = slot.subtask.take() else {
                return Err(QueueError::ProtocolViolation(format!(
                    "task {} holds no reservation",
                    task_id
                )));
            };

            slot.task.set_status(TaskStatus::Executing);
            self.store.save(&slot.task);
            (slot.is_task, slot.task.queue.clone(), subtask)
        };

        let executor = self.clone();
        let job_slot = slot.clone();
        let job_name = format!("execute#{}", task_id);
        let job = async move {
            executor
                .execute_phase(&job_slot, subtask, peer_reservations)
                .await
        };

        if let Err(e) = self.spawn_job(is_task, &queue, &job_name, job) {
            // The job never ran, so its subtask was dropped with it; the
            // reservation is gone and the task cannot resume.
            self.fail(&slot, format!("could not schedule execute: {}", e))
                .await;
            return Err(e);
        }

        tracing::debug!("Scheduled execute for task {}", task_id);
        Ok(())
    }

    /// The coordinator's abort path.
    ///
    /// Releases whatever the task reserved. Safe before the reserve job ran
    /// (it becomes a no-op) and on tasks that already ended. Fails once
    /// execute has begun.
    pub async fn cancel(&self, task_id: &TaskId) -> Result<()> {
        let Some(slot) = self.slot(task_id) else {
            return match self.store.load(task_id) {
                Some(task) => {
                    tracing::debug!(
                        "Cancel on task {} in state {:?} ignored",
                        task_id,
                        task.status
                    );
                    Ok(())
                }
                None => Err(QueueError::NotFound(format!("task {}", task_id))),
            };
        };

        let mut guard = slot.lock().await;
        let slot = &mut *guard;
        match slot.task.status {
            TaskStatus::Pending | TaskStatus::Reserved => {
                if let Some(mut subtask) = slot.subtask.take() {
                    subtask.cancel();
                }
                self.finalize(slot, TaskStatus::Cancelled, TaskUpdate::Cancelled);
                tracing::info!("Cancelled task {}", task_id);
                Ok(())
            }
            TaskStatus::Executing => Err(QueueError::ProtocolViolation(format!(
                "task {} is already executing",
                task_id
            ))),
            _ => Ok(()),
        }
    }

    /// Latest saved record of a task.
    pub fn status(&self, task_id: &TaskId) -> Option<Task> {
        self.store.load(task_id)
    }

    /// Number of tasks that have not reached a terminal state yet.
    pub fn active_tasks(&self) -> usize {
        self.slots.len()
    }

    /// The registry tasks are resolved against. Also gives access to the pools.
    pub fn registry(&self) -> &Arc<ActionHandlerRegistry> {
        &self.registry
    }

    /// Task jobs go to their queue's pool. Plain message actions run on
    /// receipt, outside any pool.
    fn spawn_job<F>(&self, is_task: bool, queue: &str, job_name: &str, job: F) -> Result<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if is_task {
            return self.registry.pools().schedule_now(queue, job_name, job);
        }

        let job_name = job_name.to_string();
        tokio::spawn(async move {
            if let Err(e) = job.await {
                tracing::warn!("Message action '{}' failed: {}", job_name, e);
            }
        });
        Ok(())
    }

    fn slot(&self, task_id: &TaskId) -> Option<SharedSlot> {
        self.slots.get(task_id).map(|entry| entry.value().clone())
    }

    /// Runs `body` directly, or behind the security gate for local-only actions.
    async fn run_gated<F, Fut>(
        &self,
        slot: &SharedSlot,
        flags: ActionFlags,
        sender_identity: &str,
        body: F,
    ) -> anyhow::Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        if !flags.is_local {
            return body().await;
        }

        match self.gate.guard(sender_identity, body).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let mut guard = slot.lock().await;
                let slot = &mut *guard;
                if slot.task.status != TaskStatus::Pending {
                    tracing::debug!(
                        "Skipping rejection of task {} in state {:?}",
                        slot.task.id,
                        slot.task.status
                    );
                    return Ok(());
                }
                slot.subtask = None;
                let reason = e.to_string();
                self.finalize(
                    slot,
                    TaskStatus::Rejected {
                        reason: reason.clone(),
                    },
                    TaskUpdate::Rejected { reason },
                );
                Err(e.into())
            }
        }
    }

    async fn plain_phase(&self, slot: &SharedSlot, handler: Arc<dyn TaskHandler>) -> anyhow::Result<()> {
        let snapshot = {
            let mut guard = slot.lock().await;
            if guard.task.status != TaskStatus::Pending {
                tracing::debug!("Skipping task {} in state {:?}", guard.task.id, guard.task.status);
                return Ok(());
            }
            guard.task.set_status(TaskStatus::Executing);
            self.store.save(&guard.task);
            guard.task.clone()
        };

        match contained(handler.execute(&snapshot)).await {
            Ok(output) => {
                self.finish(slot, output).await;
                Ok(())
            }
            Err(e) => {
                self.fail(slot, e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn reserve_phase(&self, slot: &SharedSlot) -> anyhow::Result<()> {
        let mut guard = slot.lock().await;
        let slot = &mut *guard;

        if slot.task.status != TaskStatus::Pending {
            tracing::debug!("Skipping reserve for task {} in state {:?}", slot.task.id, slot.task.status);
            return Ok(());
        }
        let Some(subtask) = slot.subtask.as_mut() else {
            return Err(anyhow::anyhow!("task {} has no subtask to reserve", slot.task.id));
        };

        match contained(subtask.reserve(&slot.task)).await {
            Ok(Reservation::Reserved(reservation_data)) => {
                tracing::info!("Task {} reserved: {}", slot.task.id, reservation_data);
                slot.task.reservation_data = Some(reservation_data.clone());
                slot.task.set_status(TaskStatus::Reserved);
                self.store.save(&slot.task);
                let _ = slot.updates.send(TaskUpdate::Reserved { reservation_data });
                Ok(())
            }
            Ok(Reservation::Unavailable) => {
                tracing::info!("Task {} could not reserve, pool exhausted", slot.task.id);
                slot.subtask = None;
                self.finalize(slot, TaskStatus::Unavailable, TaskUpdate::Unavailable);
                Ok(())
            }
            Err(e) => {
                // Dropping the instance returns anything it grabbed before failing.
                slot.subtask = None;
                let error = e.to_string();
                self.finalize(
                    slot,
                    TaskStatus::Failed {
                        error: error.clone(),
                    },
                    TaskUpdate::Failed { error },
                );
                Err(e)
            }
        }
    }

    async fn execute_phase(
        &self,
        slot: &SharedSlot,
        mut subtask: Box<dyn SynchronizedSubtask>,
        peer_reservations: serde_json::Value,
    ) -> anyhow::Result<()> {
        let snapshot = slot.lock().await.task.clone();
        let own_reservation = snapshot
            .reservation_data
            .clone()
            .unwrap_or(serde_json::Value::Null);

        let outcome = contained(subtask.execute(&snapshot, &own_reservation, &peer_reservations)).await;
        // Release on every exit path, even when the handler forgot to.
        drop(subtask);

        match outcome {
            Ok(output) => {
                self.finish(slot, output).await;
                Ok(())
            }
            Err(e) => {
                self.fail(slot, e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn finish(&self, slot: &SharedSlot, output_data: serde_json::Value) {
        let mut guard = slot.lock().await;
        let slot = &mut *guard;
        slot.task.output_data = Some(output_data.clone());
        tracing::info!("Task {} finished", slot.task.id);
        self.finalize(slot, TaskStatus::Finished, TaskUpdate::Finished { output_data });
    }

    async fn fail(&self, slot: &SharedSlot, error: String) {
        let mut guard = slot.lock().await;
        let slot = &mut *guard;
        slot.subtask = None;
        tracing::error!("Task {} failed: {}", slot.task.id, error);
        self.finalize(
            slot,
            TaskStatus::Failed {
                error: error.clone(),
            },
            TaskUpdate::Failed { error },
        );
    }

    /// Records a terminal state, reports it upstream and forgets the slot.
    fn finalize(&self, slot: &mut TaskSlot, status: TaskStatus, update: TaskUpdate) {
        slot.task.set_status(status);
        self.store.save(&slot.task);
        let _ = slot.updates.send(update);
        self.slots.remove(&slot.task.id);
    }
}

/// Turns a handler panic into an ordinary failure.
async fn contained<F, T>(future: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(_) => Err(anyhow::anyhow!("handler panicked")),
    }
}
