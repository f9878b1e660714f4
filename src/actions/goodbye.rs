use crate::error::Result;
use crate::executor::registry::ActionHandlerRegistry;
use crate::executor::resource::{Lease, ResourcePool};
use crate::executor::subtask::{ActionHandler, Reservation, SynchronizedSubtask};
use crate::executor::types::{ActionFlags, Task};

use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

pub const ACTION: &str = "testing.goodbye_cruel_world";
pub const QUEUE: &str = "goodbye_world";
pub const PORT_POOL: &str = "byebye_ports";

/// Reserves one port per task and says goodbye once every peer has one too.
pub struct GoodbyeSubtask {
    ports: Arc<ResourcePool>,
    lease: Option<Lease>,
}

impl GoodbyeSubtask {
    pub fn new(ports: Arc<ResourcePool>) -> Self {
        Self { ports, lease: None }
    }
}

#[async_trait]
impl SynchronizedSubtask for GoodbyeSubtask {
    async fn reserve(&mut self, _task: &Task) -> anyhow::Result<Reservation> {
        match self.ports.try_acquire() {
            Some(lease) => {
                let port = lease.token();
                self.lease = Some(lease);
                Ok(Reservation::Reserved(json!({ "port": port })))
            }
            None => Ok(Reservation::Unavailable),
        }
    }

    async fn execute(
        &mut self,
        task: &Task,
        own_reservation: &serde_json::Value,
        peer_reservations: &serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let lease = self
            .lease
            .take()
            .context("execute called without a reserved port")?;
        let username = task
            .input_data
            .get("username")
            .and_then(|name| name.as_str())
            .context("input_data.username is missing")?;

        tracing::info!(
            "Goodbye task {}: own reservation {}, peers {}",
            task.id,
            own_reservation,
            peer_reservations
        );
        let port = lease.token();
        lease.release()?;

        Ok(json!({
            "output_data": format!("goodbye {} from port {}!", username, port),
            "port": port,
            "peers": peer_reservations,
        }))
    }

    fn cancel(&mut self) {
        if let Some(lease) = self.lease.take() {
            tracing::debug!("Releasing port {} on cancel", lease.token());
            drop(lease);
        }
    }
}

pub fn register(registry: &ActionHandlerRegistry, ports: Arc<ResourcePool>) -> Result<()> {
    registry.register(
        ACTION,
        QUEUE,
        ActionHandler::synchronized(move || GoodbyeSubtask::new(ports.clone())),
        ActionFlags::task(),
    )
}
