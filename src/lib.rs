//! Queue Node Library
//!
//! A node that exchanges tasks with its peers through named queues and runs
//! synchronized reserve → execute tasks, so that several nodes commit a
//! shared resource only once all of them reserved their share.
//!
//! ## Modules
//! - **`executor`**: registry, per-queue worker pools, resource pools, the
//!   synchronized subtask protocol and the security gate.
//! - **`actions`**: handlers shipped with the node.
//! - **`config`**: TOML settings (queue limits, resource pool ranges, identity).
//! - **`error`**: error kinds shared across the crate.

pub mod actions;
pub mod config;
pub mod error;
pub mod executor;
