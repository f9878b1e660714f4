use crate::error::Result;
use crate::executor::registry::ActionHandlerRegistry;
use crate::executor::subtask::ActionHandler;
use crate::executor::types::ActionFlags;

use serde_json::json;

pub const ACTION: &str = "testing.local_echo";

pub fn register(registry: &ActionHandlerRegistry) -> Result<()> {
    registry.register_internal(
        ACTION,
        ActionHandler::from_fn(|task| async move {
            tracing::info!("Echoing task {}", task.id);
            Ok(json!({ "echo": task.input_data }))
        }),
        ActionFlags::internal().local_only(),
    )
}
