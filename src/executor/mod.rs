//! Queued Task Executor Module
//!
//! Runs tasks dispatched to this node through named queues, including
//! synchronized subtasks that reserve a shared resource before several nodes
//! proceed together.
//!
//! ## Architecture Overview
//! 1. **Registration**: at startup every handler is registered against an
//!    `(action, queue)` pair. Registering a task handler creates its queue.
//! 2. **Dispatch**: an incoming task is resolved through the registry and its
//!    first job lands in the queue's worker pool.
//! 3. **Reserve**: synchronized subtasks claim a token from a `ResourcePool`
//!    and report it upstream.
//! 4. **Execute**: once the coordinator has every participant's reservation it
//!    sends `execute`; the handler does the work and gives the token back.
//!
//! ## Submodules
//! - **`types`**: tasks, flags, lifecycle states and upstream events.
//! - **`registry`**: `(action, queue)` → handler descriptor map.
//! - **`workers`**: one bounded, isolated worker pool per queue.
//! - **`resource`**: lock-protected token allocator with RAII leases.
//! - **`subtask`**: handler traits, including the reserve/execute/cancel contract.
//! - **`security`**: sender identity gate for local-only actions.
//! - **`executor`**: drives tasks through their lifecycle.
//! - **`store`**: persistence port for task records.
//! - **`protocol`** / **`handlers`**: HTTP DTOs and Axum handlers.

pub mod types;
pub mod protocol;
pub mod registry;
pub mod workers;
pub mod resource;
pub mod subtask;
pub mod security;
pub mod store;
pub mod executor;
pub mod handlers;
