//! Node configuration
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. The file given with `--config`, or named by `QUEUE_NODE_SETTINGS`
//! 3. CLI flags (`--bind`)
//!
//! Queue limits are only applied when the worker pools start, which is why
//! the pools are started after this file has been loaded.
//!
//! # Example Config
//!
//! ```toml
//! bind = "127.0.0.1:5000"
//! local_identity_file = "certs/node.pem"
//!
//! [queues.goodbye_world]
//! max_threads = 2
//!
//! [resource_pools.byebye_ports]
//! min = 9000
//! max = 9010
//! ```

use crate::error::{QueueError, Result};
use crate::executor::resource::ResourcePool;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SETTINGS_ENV: &str = "QUEUE_NODE_SETTINGS";

/// Options of one queue's worker pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Upper bound on concurrently running jobs. Unbounded when absent.
    pub max_threads: Option<usize>,
}

/// Token range `[min, max)` of a named resource pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRange {
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address the HTTP dispatch surface listens on.
    pub bind: SocketAddr,
    /// Public URL peers use to reach this node's queues.
    pub root_url: String,
    /// This node's identity (its certificate), compared against the sender
    /// identity of local-only tasks. Empty when the node has none.
    pub local_identity: String,
    /// Read into `local_identity` on load when set.
    pub local_identity_file: Option<PathBuf>,
    pub queues: HashMap<String, QueueOptions>,
    pub resource_pools: HashMap<String, PoolRange>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 5000)),
            root_url: "http://127.0.0.1:5000/api/queues".to_string(),
            local_identity: String::new(),
            local_identity_file: None,
            queues: HashMap::new(),
            resource_pools: HashMap::new(),
        }
    }
}

impl NodeConfig {
    /// Loads the file given explicitly, else the one named by
    /// [`SETTINGS_ENV`], else the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os(SETTINGS_ENV).map(PathBuf::from);
        match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::from_file(&path),
            None => {
                tracing::info!("No settings file given, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            QueueError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::parse(&raw)?;

        if let Some(identity_file) = &config.local_identity_file {
            let identity_path = match path.parent() {
                Some(dir) if identity_file.is_relative() => dir.join(identity_file),
                _ => identity_file.clone(),
            };
            config.local_identity = std::fs::read_to_string(&identity_path).map_err(|e| {
                QueueError::InvalidConfig(format!(
                    "cannot read identity file {}: {}",
                    identity_path.display(),
                    e
                ))
            })?;
        }

        tracing::info!("Loaded settings from {}", path.display());
        Ok(config)
    }

    /// Parses and validates a TOML document.
    pub fn parse(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| QueueError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (queue, options) in &self.queues {
            if options.max_threads == Some(0) {
                return Err(QueueError::InvalidConfig(format!(
                    "queue '{}' must allow at least one thread",
                    queue
                )));
            }
        }

        for (name, range) in &self.resource_pools {
            if range.min >= range.max {
                return Err(QueueError::InvalidConfig(format!(
                    "resource pool '{}' needs min < max, got [{}, {})",
                    name, range.min, range.max
                )));
            }
        }

        Ok(())
    }

    /// Builds the named resource pool from its configured range.
    pub fn resource_pool(&self, name: &str) -> Result<Arc<ResourcePool>> {
        let range = self.resource_pools.get(name).ok_or_else(|| {
            QueueError::InvalidConfig(format!("resource pool '{}' is not configured", name))
        })?;
        ResourcePool::new(name, range.min, range.max)
    }
}
