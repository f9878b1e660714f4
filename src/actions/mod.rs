//! Built-in Actions
//!
//! Handlers shipped with the node and registered at startup.
//!
//! - **`goodbye`**: a synchronized subtask reserving a port from the
//!   `byebye_ports` pool, used to exercise the reserve/execute protocol
//!   between nodes.
//! - **`echo`**: a local-only internal task echoing its input, used to check
//!   that the security gate keeps peers out.

pub mod echo;
pub mod goodbye;

use crate::config::NodeConfig;
use crate::error::Result;
use crate::executor::registry::ActionHandlerRegistry;

/// Registers every built-in action whose resources are configured.
///
/// Actions needing a resource pool that the configuration does not define
/// are skipped with a warning.
pub fn register_builtin(registry: &ActionHandlerRegistry, config: &NodeConfig) -> Result<()> {
    echo::register(registry)?;

    if config.resource_pools.contains_key(goodbye::PORT_POOL) {
        let ports = config.resource_pool(goodbye::PORT_POOL)?;
        goodbye::register(registry, ports)?;
    } else {
        tracing::warn!(
            "Resource pool '{}' not configured, skipping '{}'",
            goodbye::PORT_POOL,
            goodbye::ACTION
        );
    }

    Ok(())
}
