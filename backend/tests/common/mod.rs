// Common test utilities that are shared across integration tests
#![allow(dead_code)]

use chrono::Utc;
use std::sync::{Arc, Once};
use uuid::Uuid;

use taskflow_backend::config::EngineConfig;
use taskflow_backend::services::LoggingMailer;
use taskflow_backend::store::InMemoryStore;
use taskflow_backend::workflows::{Stores, WorkflowEngine};
use taskflow_backend::{app, AppState};
use taskflow_shared::{Project, Task, UserProfile};

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("taskflow_backend=debug")
            .try_init()
            .ok();
    });
}

pub struct TestApp {
    pub store: Arc<InMemoryStore>,
    pub engine: Arc<WorkflowEngine>,
    pub router: axum::Router,
}

pub fn test_app() -> TestApp {
    init_test_logging();

    let store = Arc::new(InMemoryStore::new());
    let config = EngineConfig {
        due_date_batch_delay_ms: 0,
        ..EngineConfig::default()
    };
    let engine = Arc::new(WorkflowEngine::new(
        Stores::from_shared(store.clone()),
        Arc::new(LoggingMailer),
        config,
    ));
    let router = app(Arc::new(AppState::new(engine.clone())));

    TestApp { store, engine, router }
}

pub fn user(full_name: &str, email: &str) -> UserProfile {
    UserProfile {
        id: Uuid::new_v4(),
        full_name: full_name.to_string(),
        email: email.to_string(),
        created_at: Utc::now(),
    }
}

pub fn project(name: &str, owner_id: Option<Uuid>) -> Project {
    Project {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: None,
        status: "active".to_string(),
        owner_id,
        created_at: Utc::now(),
        updated_at: None,
    }
}

pub fn task(project_id: Uuid, title: &str, assigned_to: Option<Uuid>) -> Task {
    Task {
        id: Uuid::new_v4(),
        project_id,
        title: title.to_string(),
        description: None,
        status: "in_progress".to_string(),
        priority: "medium".to_string(),
        assigned_to,
        created_by: None,
        estimated_hours: None,
        due_date: None,
        completed_at: None,
        created_at: Utc::now(),
        updated_at: None,
    }
}
