use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::jobs::{Sweep, SweepResult};
use crate::workflows::{TriggerData, WorkflowExecution};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct EventQuery {
    /// Await the matched runs and return them instead of answering 202
    pub wait: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteWorkflowRequest {
    pub project_id: Uuid,
    pub user_id: Option<Uuid>,
    /// Trigger payload to run with; a manual trigger when absent
    pub trigger_data: Option<TriggerData>,
}

#[derive(Debug, Deserialize)]
pub struct ExecutionQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct EventAccepted {
    pub accepted: bool,
    pub trigger_type: String,
    pub project_id: Uuid,
}

pub fn workflow_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/events", post(ingest_event))
        .route("/:id/execute", post(execute_workflow))
        .route("/:id/executions", get(list_executions))
}

pub fn execution_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/:id", get(get_execution).delete(delete_execution))
        .route("/:id/retry", post(retry_execution))
        .route("/:id/cancel", post(cancel_execution))
}

pub fn job_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/due-date", post(run_due_date_sweep))
        .route("/scheduled", post(run_scheduled_sweep))
}

async fn ingest_event(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventQuery>,
    Json(trigger): Json<TriggerData>,
) -> Response {
    let trigger_type = trigger.trigger_type();
    info!("Received {} event for project {}", trigger_type, trigger.project_id);

    if params.wait.unwrap_or(false) {
        let executions = state.engine.evaluate_workflows(&trigger).await;
        return (StatusCode::OK, Json(executions)).into_response();
    }

    let accepted = EventAccepted {
        accepted: true,
        trigger_type: trigger_type.to_string(),
        project_id: trigger.project_id,
    };

    let engine = state.engine.clone();
    tokio::spawn(async move {
        engine.evaluate_workflows(&trigger).await;
    });

    (StatusCode::ACCEPTED, Json(accepted)).into_response()
}

async fn execute_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ExecuteWorkflowRequest>,
) -> Json<WorkflowExecution> {
    let mut trigger = request
        .trigger_data
        .unwrap_or_else(|| TriggerData::manual(request.project_id));
    if let Some(user_id) = request.user_id {
        trigger = trigger.with_user(user_id);
    }

    Json(state.engine.execute_workflow(id, trigger).await)
}

async fn list_executions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(params): Query<ExecutionQuery>,
) -> ApiResult<Json<Vec<WorkflowExecution>>> {
    let limit = params.limit.unwrap_or(50);
    Ok(Json(state.engine.list_executions(id, limit).await?))
}

async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkflowExecution>> {
    Ok(Json(state.engine.get_execution(id).await?))
}

async fn delete_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.engine.delete_execution(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn retry_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkflowExecution>> {
    Ok(Json(state.engine.retry_execution(id).await?))
}

async fn cancel_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkflowExecution>> {
    Ok(Json(state.engine.cancel_execution(id).await?))
}

async fn run_due_date_sweep(State(state): State<Arc<AppState>>) -> Json<SweepResult> {
    Json(run_sweep(&state, Sweep::DueDate).await)
}

async fn run_scheduled_sweep(State(state): State<Arc<AppState>>) -> Json<SweepResult> {
    Json(run_sweep(&state, Sweep::Scheduled).await)
}

async fn run_sweep(state: &AppState, sweep: Sweep) -> SweepResult {
    info!("{} requested over HTTP", sweep.name());
    let result = sweep.run(state.engine.clone()).await;
    if !result.errors.is_empty() {
        error!("{} reported errors: {:?}", sweep.name(), result.errors);
    }
    result
}
