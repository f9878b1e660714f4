use super::executor::TaskExecutor;
use super::protocol::*;
use super::types::*;
use crate::error::QueueError;

use axum::routing::{get, post};
use axum::{Extension, Json, Router, extract::Path, http::StatusCode};
use std::sync::Arc;

/// HTTP status reported for each error kind. Faults of the node itself map to 500.
pub(crate) fn error_status(error: &QueueError) -> StatusCode {
    match error {
        QueueError::NotFound(_) => StatusCode::NOT_FOUND,
        QueueError::InvalidIdentifier { .. } => StatusCode::BAD_REQUEST,
        QueueError::Security => StatusCode::FORBIDDEN,
        QueueError::ProtocolViolation(_) => StatusCode::CONFLICT,
        QueueError::ResourceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        QueueError::PoolClosed(_) | QueueError::InvalidConfig(_) | QueueError::Handler(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Handler for `POST /api/queues/:queue`.
///
/// Accepts a task into the queue and answers `202` with its id. The task runs
/// asynchronously; its progress is visible through the status endpoint.
pub async fn handle_submit_task(
    Extension(executor): Extension<Arc<TaskExecutor>>,
    Path(queue): Path<String>,
    Json(req): Json<SubmitTaskRequest>,
) -> (StatusCode, Json<SubmitTaskResponse>) {
    let message = TaskMessage {
        action: req.action,
        queue,
        sender_identity: req.sender_identity,
        input_data: req.input_data,
    };

    match executor.dispatch(message) {
        Ok(handle) => {
            tracing::debug!("Task accepted: {}", handle.task_id);
            (
                StatusCode::ACCEPTED,
                Json(SubmitTaskResponse {
                    task_id: Some(handle.task_id),
                    error: None,
                }),
            )
        }
        Err(e) => {
            tracing::warn!("Rejected task submission: {}", e);
            (
                error_status(&e),
                Json(SubmitTaskResponse {
                    task_id: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

/// Handler for `POST /api/tasks/:id/execute`.
///
/// The coordinator's go signal once every participant reserved. `409` when
/// the task is not parked in `Reserved`.
pub async fn handle_execute_task(
    Extension(executor): Extension<Arc<TaskExecutor>>,
    Path(task_id): Path<String>,
    Json(req): Json<ExecuteTaskRequest>,
) -> (StatusCode, Json<TaskActionResponse>) {
    let task_id = TaskId(task_id);

    match executor.execute(&task_id, req.peer_reservations).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(TaskActionResponse {
                task_id,
                error: None,
            }),
        ),
        Err(e) => {
            tracing::warn!("Execute on task {} refused: {}", task_id, e);
            (
                error_status(&e),
                Json(TaskActionResponse {
                    task_id,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

/// Handler for `POST /api/tasks/:id/cancel`.
pub async fn handle_cancel_task(
    Extension(executor): Extension<Arc<TaskExecutor>>,
    Path(task_id): Path<String>,
) -> (StatusCode, Json<TaskActionResponse>) {
    let task_id = TaskId(task_id);

    match executor.cancel(&task_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(TaskActionResponse {
                task_id,
                error: None,
            }),
        ),
        Err(e) => {
            tracing::warn!("Cancel on task {} refused: {}", task_id, e);
            (
                error_status(&e),
                Json(TaskActionResponse {
                    task_id,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

/// Handler for `GET /api/tasks/:id`.
///
/// Returns the latest saved record of the task, or `404` if unknown.
pub async fn handle_get_task_status(
    Extension(executor): Extension<Arc<TaskExecutor>>,
    Path(task_id): Path<String>,
) -> (StatusCode, Json<Option<TaskStatusResponse>>) {
    let task_id = TaskId(task_id);

    match executor.status(&task_id) {
        Some(task) => {
            tracing::debug!("Task status query: {} -> {:?}", task_id, task.status);
            (StatusCode::OK, Json(Some(task.into())))
        }
        None => {
            tracing::debug!("Task not found: {}", task_id);
            (StatusCode::NOT_FOUND, Json(None))
        }
    }
}

/// Handler for `GET /api/queues`: one stats entry per queue.
pub async fn handle_queue_stats(
    Extension(executor): Extension<Arc<TaskExecutor>>,
) -> Json<QueueStatsResponse> {
    Json(QueueStatsResponse {
        queues: executor.registry().pools().stats(),
    })
}

/// Routes of the dispatch-in surface.
pub fn router(executor: Arc<TaskExecutor>) -> Router {
    Router::new()
        .route(ENDPOINT_QUEUES, get(handle_queue_stats))
        .route(ENDPOINT_SUBMIT_TASK, post(handle_submit_task))
        .route(ENDPOINT_TASK_STATUS, get(handle_get_task_status))
        .route(ENDPOINT_TASK_EXECUTE, post(handle_execute_task))
        .route(ENDPOINT_TASK_CANCEL, post(handle_cancel_task))
        .layer(Extension(executor))
}
