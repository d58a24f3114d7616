use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;
use std::sync::Arc;

use crate::{database, AppState};

pub mod workflows;

pub use workflows::{execution_routes, job_routes, workflow_routes};

pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let database = match &state.db_pool {
        Some(pool) if database::health_check(pool).await => "up",
        Some(_) => "down",
        None => "not_configured",
    };

    let status = if database == "down" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "healthy" } else { "degraded" },
            "service": "taskflow-workflows",
            "database": database,
        })),
    )
}
