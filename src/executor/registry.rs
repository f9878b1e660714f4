//! Action Handler Registry
//!
//! Maps `(action, queue)` pairs to the handler that serves them and the
//! capability flags it was registered with. This is the single source of truth
//! for "what runs where".
//!
//! Registration happens explicitly at startup, before the worker pools start.
//! Registering a task handler is what brings its queue into existence.

use super::subtask::ActionHandler;
use super::types::{ActionFlags, INTERNAL_QUEUE};
use super::workers::QueueWorkerPools;
use crate::error::{QueueError, Result};

use dashmap::DashMap;
use regex::Regex;
use std::sync::{Arc, LazyLock};

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.\-]+$").expect("identifier pattern is valid")
});

/// Everything known about one registered action.
#[derive(Debug, Clone)]
pub struct ActionDescriptor {
    pub action: String,
    pub queue: String,
    pub handler: ActionHandler,
    pub flags: ActionFlags,
}

pub struct ActionHandlerRegistry {
    handlers: DashMap<(String, String), ActionDescriptor>,
    pools: Arc<QueueWorkerPools>,
}

impl ActionHandlerRegistry {
    /// Creates an empty registry whose task handlers get their pools from `pools`.
    pub fn new(pools: Arc<QueueWorkerPools>) -> Arc<Self> {
        Arc::new(Self {
            handlers: DashMap::new(),
            pools,
        })
    }

    /// Registers `handler` for `(action, queue)`.
    ///
    /// Registering the same pair twice replaces the earlier descriptor.
    pub fn register(
        &self,
        action: &str,
        queue: &str,
        handler: ActionHandler,
        flags: ActionFlags,
    ) -> Result<()> {
        validate_identifier("action", action)?;
        validate_identifier("queue", queue)?;

        if flags.is_task {
            self.pools.get_or_create(queue);
        }

        let descriptor = ActionDescriptor {
            action: action.to_string(),
            queue: queue.to_string(),
            handler,
            flags,
        };
        let previous = self
            .handlers
            .insert((action.to_string(), queue.to_string()), descriptor);

        if previous.is_some() {
            tracing::warn!("Replaced handler for action '{}' on queue '{}'", action, queue);
        } else {
            tracing::info!("Registered action '{}' on queue '{}'", action, queue);
        }
        Ok(())
    }

    /// Registers a system-level task on the reserved internal queue.
    pub fn register_internal(
        &self,
        action: &str,
        handler: ActionHandler,
        flags: ActionFlags,
    ) -> Result<()> {
        let flags = ActionFlags {
            is_task: true,
            is_internal: true,
            ..flags
        };
        self.register(action, INTERNAL_QUEUE, handler, flags)
    }

    /// Looks up the descriptor registered for `(action, queue)`.
    ///
    /// # Returns
    /// * `Err(NotFound)` if nothing is registered for the pair.
    pub fn lookup(&self, action: &str, queue: &str) -> Result<ActionDescriptor> {
        self.handlers
            .get(&(action.to_string(), queue.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                QueueError::NotFound(format!("action '{}' on queue '{}'", action, queue))
            })
    }

    /// Returns every registered `(action, queue)` pair, sorted.
    pub fn actions(&self) -> Vec<(String, String)> {
        let mut actions: Vec<(String, String)> =
            self.handlers.iter().map(|entry| entry.key().clone()).collect();
        actions.sort();
        actions
    }

    /// Returns the total number of registered actions.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// The worker pools task handlers register into.
    pub fn pools(&self) -> &Arc<QueueWorkerPools> {
        &self.pools
    }
}

fn validate_identifier(kind: &'static str, value: &str) -> Result<()> {
    if IDENTIFIER.is_match(value) {
        Ok(())
    } else {
        Err(QueueError::InvalidIdentifier {
            kind,
            value: value.to_string(),
        })
    }
}
