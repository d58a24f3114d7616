// TaskFlow workflow automation backend
//
// Library half of the crate: the engine, its stores and jobs, and the HTTP
// router. The `taskflow` binary wires these to Postgres and SMTP.

use axum::{http::Method, routing::get, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod services;
pub mod store;
pub mod workflows;

pub use error::{ApiError, ApiResult, AppError};


pub struct AppState {
    pub engine: Arc<workflows::WorkflowEngine>,
    /// Only used by the health check; absent when running over an in-memory store
    pub db_pool: Option<sqlx::PgPool>,
}

impl AppState {
    pub fn new(engine: Arc<workflows::WorkflowEngine>) -> Self {
        Self { engine, db_pool: None }
    }

    pub fn with_pool(mut self, pool: sqlx::PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "TaskFlow Workflow Engine API v0.1.0" }))
        .route("/health", get(handlers::health_check))
        .nest("/api/v1/workflows", handlers::workflow_routes())
        .nest("/api/v1/executions", handlers::execution_routes())
        .nest("/api/v1/jobs", handlers::job_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
