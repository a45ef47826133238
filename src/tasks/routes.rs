//! REST + SSE endpoints for task submission and queries.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::StreamExt;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::model::{NewTask, Task, TaskResultView, TaskStatus, TaskType};
use super::service::TaskService;
use crate::error::TaskError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TaskService>,
}

/// Build the Axum router with the task routes.
pub fn task_routes(service: Arc<TaskService>) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/health", get(health))
        .route("/tasks", post(create_task))
        .route("/tasks/all/status", get(list_tasks))
        .route("/tasks/{id}/status", get(task_status))
        .route("/tasks/{id}/result", get(task_result))
        .route("/tasks/{id}/events", get(task_events))
        .route("/tasks/{id}/execute", post(execute_task))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "task-runner",
    }))
}

#[derive(Debug, Deserialize)]
struct CreateTaskRequest {
    #[serde(rename = "type")]
    task_type: String,
    params: Vec<f64>,
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": message.into()})),
    )
        .into_response()
}

/// Map a task error onto an HTTP response.
fn error_response(e: TaskError) -> Response {
    let status = match &e {
        TaskError::NotFound { .. } => StatusCode::NOT_FOUND,
        TaskError::InvalidTaskType { .. } => StatusCode::BAD_REQUEST,
        TaskError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
        TaskError::InvalidTransition { .. } => StatusCode::CONFLICT,
        TaskError::HandlerFailure { .. } | TaskError::Storage(_) => {
            error!(error = %e, "Task request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(serde_json::json!({"error": e.to_string()}))).into_response()
}

/// Reject anything that is not a UUID before touching the store.
fn parse_task_id(id: &str) -> Result<(), Response> {
    Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| bad_request("Invalid task ID"))
}

async fn create_task(
    State(state): State<AppState>,
    body: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            debug!(error = %rejection.body_text(), "Rejected task submission");
            return bad_request(rejection.body_text());
        }
    };

    let task_type: TaskType = match request.task_type.parse() {
        Ok(task_type) => task_type,
        Err(e) => return error_response(e),
    };
    if request.params.is_empty() {
        return bad_request("params must be a non-empty array of numbers");
    }

    match state
        .service
        .create_task(NewTask::new(task_type, request.params))
        .await
    {
        Ok(task) => (
            StatusCode::CREATED,
            Json(serde_json::json!({"taskId": task.id})),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_tasks(State(state): State<AppState>) -> Response {
    match state.service.list_tasks().await {
        Ok(tasks) => Json(tasks).into_response(),
        Err(e) => error_response(e),
    }
}

async fn task_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if let Err(response) = parse_task_id(&id) {
        return response;
    }
    match state.service.get_status(&id).await {
        Ok(status) => Json(serde_json::json!({"status": status})).into_response(),
        Err(e) => error_response(e),
    }
}

async fn task_result(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if let Err(response) = parse_task_id(&id) {
        return response;
    }
    let view = match state.service.get_result(&id).await {
        Ok(view) => view,
        Err(e) => return error_response(e),
    };

    let status = view.status();
    let body = match view {
        TaskResultView::Completed { result } => {
            serde_json::json!({"result": result, "status": status})
        }
        TaskResultView::Failed { error } => serde_json::json!({"error": error, "status": status}),
        TaskResultView::NotCompleted { status } => serde_json::json!({
            "message": "Task is not yet completed.",
            "status": status,
        }),
    };
    Json(body).into_response()
}

fn task_event(task: &Task) -> Result<Event, axum::Error> {
    let name = if task.status == TaskStatus::Failed {
        "taskError"
    } else {
        "taskUpdate"
    };
    Event::default().event(name).id(task.id.clone()).json_data(task)
}

async fn task_events(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if let Err(response) = parse_task_id(&id) {
        return response;
    }
    match state.service.subscribe(&id).await {
        Ok(stream) => {
            debug!(task_id = %id, "SSE client attached");
            let events = stream.map(|task| task_event(&task));
            Sse::new(events)
                .keep_alive(KeepAlive::default())
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn execute_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if let Err(response) = parse_task_id(&id) {
        return response;
    }
    match state.service.execute_now(&id).await {
        Ok(task) => Json(task).into_response(),
        Err(e) => {
            warn!(task_id = %id, error = %e, "Forced execution rejected");
            error_response(e)
        }
    }
}
