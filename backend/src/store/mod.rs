// Data access seams used by the workflow engine.
//
// The engine never talks to sqlx directly; it goes through these traits so the
// same orchestration runs against Postgres in production and against the
// in-memory store in tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use uuid::Uuid;

use taskflow_shared::{
    CalendarEvent, CustomFieldDefinition, CustomFieldValue, NewCalendarEvent, NewComment, NewTask,
    Project, Task, TaskComment, TaskUpdate, UserProfile,
};

use crate::workflows::{ExecutionStatus, TriggerType, WorkflowDefinition, WorkflowExecution};

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Filter for task selects. Every unset field is unconstrained.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub project_id: Option<Uuid>,
    pub due_date: Option<NaiveDate>,
    pub statuses: Option<Vec<String>>,
    pub exclude_statuses: Option<Vec<String>>,
    pub assigned_to: Option<Uuid>,
    pub priorities: Option<Vec<String>>,
    pub limit: Option<i64>,
}

impl TaskFilter {
    pub fn for_project(project_id: Uuid) -> Self {
        Self {
            project_id: Some(project_id),
            ..Default::default()
        }
    }

    /// In-memory counterpart of the SQL predicate built by the Postgres store.
    pub fn matches(&self, task: &Task) -> bool {
        if self.project_id.is_some_and(|p| p != task.project_id) {
            return false;
        }
        if let Some(due) = self.due_date {
            if task.due_date != Some(due) {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&task.status) {
                return false;
            }
        }
        if let Some(excluded) = &self.exclude_statuses {
            if excluded.contains(&task.status) {
                return false;
            }
        }
        if let Some(assignee) = self.assigned_to {
            if task.assigned_to != Some(assignee) {
                return false;
            }
        }
        if let Some(priorities) = &self.priorities {
            if !priorities.contains(&task.priority) {
                return false;
            }
        }
        true
    }
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Workflows of one trigger type, optionally scoped to a project.
    async fn list(
        &self,
        project_id: Option<Uuid>,
        trigger_type: TriggerType,
        active_only: bool,
    ) -> StoreResult<Vec<WorkflowDefinition>>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<WorkflowDefinition>>;

    async fn update_last_executed(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_task(&self, id: Uuid) -> StoreResult<Option<Task>>;
    async fn get_project(&self, id: Uuid) -> StoreResult<Option<Project>>;
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<UserProfile>>;

    /// Field definition lookup by name within an entity type. A definition with
    /// no project applies to every project.
    async fn find_custom_field(
        &self,
        name: &str,
        entity_type: &str,
        project_id: Uuid,
    ) -> StoreResult<Option<CustomFieldDefinition>>;

    async fn get_custom_field_value(
        &self,
        field_definition_id: Uuid,
        entity_id: Uuid,
        entity_type: &str,
    ) -> StoreResult<Option<CustomFieldValue>>;

    async fn find_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>>;
    async fn insert_task(&self, task: NewTask) -> StoreResult<Task>;
    async fn update_task(&self, id: Uuid, update: &TaskUpdate) -> StoreResult<Task>;

    /// Apply one update to many tasks in a single call. Returns rows touched.
    async fn update_tasks(&self, ids: &[Uuid], update: &TaskUpdate) -> StoreResult<u64>;

    async fn update_project_status(&self, id: Uuid, status: &str) -> StoreResult<Project>;
    async fn insert_comment(&self, comment: NewComment) -> StoreResult<TaskComment>;

    async fn upsert_custom_field_value(
        &self,
        field_definition_id: Uuid,
        entity_id: Uuid,
        entity_type: &str,
        value: Value,
    ) -> StoreResult<CustomFieldValue>;

    async fn insert_calendar_event(&self, event: NewCalendarEvent) -> StoreResult<CalendarEvent>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn insert(&self, execution: WorkflowExecution) -> StoreResult<WorkflowExecution>;
    async fn get(&self, id: Uuid) -> StoreResult<Option<WorkflowExecution>>;

    /// Executions of one workflow, newest first.
    async fn list(&self, workflow_id: Uuid, limit: i64) -> StoreResult<Vec<WorkflowExecution>>;

    async fn update_status(&self, id: Uuid, status: ExecutionStatus) -> StoreResult<()>;

    /// Returns false when nothing was deleted.
    async fn delete(&self, id: Uuid) -> StoreResult<bool>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, user_id: Uuid, title: &str, message: &str, metadata: Value) -> StoreResult<()>;
}
