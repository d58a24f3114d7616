// In-memory store: same contracts as the Postgres store, no database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use taskflow_shared::{
    CalendarEvent, CustomFieldDefinition, CustomFieldValue, NewCalendarEvent, NewComment, NewTask,
    Notification, Project, Task, TaskComment, TaskUpdate, UserProfile,
};

use super::{
    EntityStore, ExecutionStore, NotificationSink, StoreError, StoreResult, TaskFilter, WorkflowStore,
};
use crate::workflows::{ExecutionStatus, TriggerType, WorkflowDefinition, WorkflowExecution};

#[derive(Default)]
pub struct InMemoryStore {
    workflows: RwLock<HashMap<Uuid, WorkflowDefinition>>,
    executions: RwLock<Vec<WorkflowExecution>>,
    tasks: RwLock<HashMap<Uuid, Task>>,
    projects: RwLock<HashMap<Uuid, Project>>,
    users: RwLock<HashMap<Uuid, UserProfile>>,
    field_definitions: RwLock<Vec<CustomFieldDefinition>>,
    field_values: RwLock<Vec<CustomFieldValue>>,
    comments: RwLock<Vec<TaskComment>>,
    calendar_events: RwLock<Vec<CalendarEvent>>,
    notifications: RwLock<Vec<Notification>>,
    batch_update_calls: RwLock<usize>,
    fail_notifications: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Seeding

    pub async fn add_workflow(&self, workflow: WorkflowDefinition) -> Uuid {
        let id = workflow.id;
        self.workflows.write().await.insert(id, workflow);
        id
    }

    pub async fn add_task(&self, task: Task) -> Uuid {
        let id = task.id;
        self.tasks.write().await.insert(id, task);
        id
    }

    pub async fn add_project(&self, project: Project) -> Uuid {
        let id = project.id;
        self.projects.write().await.insert(id, project);
        id
    }

    pub async fn add_user(&self, user: UserProfile) -> Uuid {
        let id = user.id;
        self.users.write().await.insert(id, user);
        id
    }

    pub async fn add_custom_field(&self, definition: CustomFieldDefinition) -> Uuid {
        let id = definition.id;
        self.field_definitions.write().await.push(definition);
        id
    }

    pub async fn add_execution(&self, execution: WorkflowExecution) -> Uuid {
        let id = execution.id;
        self.executions.write().await.push(execution);
        id
    }

    /// Make every notification send fail, to exercise error boundaries.
    pub fn set_fail_notifications(&self, fail: bool) {
        self.fail_notifications.store(fail, Ordering::SeqCst);
    }

    // Inspection

    pub async fn workflow(&self, id: Uuid) -> Option<WorkflowDefinition> {
        self.workflows.read().await.get(&id).cloned()
    }

    pub async fn task(&self, id: Uuid) -> Option<Task> {
        self.tasks.read().await.get(&id).cloned()
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.tasks.read().await.values().cloned().collect()
    }

    pub async fn project(&self, id: Uuid) -> Option<Project> {
        self.projects.read().await.get(&id).cloned()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.notifications.read().await.clone()
    }

    pub async fn comments(&self) -> Vec<TaskComment> {
        self.comments.read().await.clone()
    }

    pub async fn calendar_events(&self) -> Vec<CalendarEvent> {
        self.calendar_events.read().await.clone()
    }

    pub async fn custom_field_values(&self) -> Vec<CustomFieldValue> {
        self.field_values.read().await.clone()
    }

    pub async fn executions(&self) -> Vec<WorkflowExecution> {
        self.executions.read().await.clone()
    }

    pub async fn batch_update_calls(&self) -> usize {
        *self.batch_update_calls.read().await
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn list(
        &self,
        project_id: Option<Uuid>,
        trigger_type: TriggerType,
        active_only: bool,
    ) -> StoreResult<Vec<WorkflowDefinition>> {
        let mut workflows: Vec<WorkflowDefinition> = self
            .workflows
            .read()
            .await
            .values()
            .filter(|w| project_id.is_none_or(|p| w.project_id == p))
            .filter(|w| w.trigger_type() == trigger_type)
            .filter(|w| !active_only || w.is_active)
            .cloned()
            .collect();
        workflows.sort_by_key(|w| w.created_at);
        Ok(workflows)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<WorkflowDefinition>> {
        Ok(self.workflows.read().await.get(&id).cloned())
    }

    async fn update_last_executed(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "workflow", id })?;
        workflow.last_executed = Some(at);
        Ok(())
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn get_task(&self, id: Uuid) -> StoreResult<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn get_project(&self, id: Uuid) -> StoreResult<Option<Project>> {
        Ok(self.projects.read().await.get(&id).cloned())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<UserProfile>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_custom_field(
        &self,
        name: &str,
        entity_type: &str,
        project_id: Uuid,
    ) -> StoreResult<Option<CustomFieldDefinition>> {
        let definitions = self.field_definitions.read().await;
        let candidates: Vec<&CustomFieldDefinition> = definitions
            .iter()
            .filter(|d| d.name == name && d.entity_type == entity_type)
            .collect();

        // Project-specific definitions win over global ones
        Ok(candidates
            .iter()
            .find(|d| d.project_id == Some(project_id))
            .or_else(|| candidates.iter().find(|d| d.project_id.is_none()))
            .map(|d| (*d).clone()))
    }

    async fn get_custom_field_value(
        &self,
        field_definition_id: Uuid,
        entity_id: Uuid,
        entity_type: &str,
    ) -> StoreResult<Option<CustomFieldValue>> {
        Ok(self
            .field_values
            .read()
            .await
            .iter()
            .find(|v| {
                v.field_definition_id == field_definition_id
                    && v.entity_id == entity_id
                    && v.entity_type == entity_type
            })
            .cloned())
    }

    async fn find_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        if let Some(limit) = filter.limit {
            tasks.truncate(limit.max(0) as usize);
        }
        Ok(tasks)
    }

    async fn insert_task(&self, new_task: NewTask) -> StoreResult<Task> {
        let task = Task {
            id: Uuid::new_v4(),
            project_id: new_task.project_id,
            title: new_task.title,
            description: new_task.description,
            status: new_task.status,
            priority: new_task.priority,
            assigned_to: new_task.assigned_to,
            created_by: new_task.created_by,
            estimated_hours: None,
            due_date: new_task.due_date,
            completed_at: None,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(task)
    }

    async fn update_task(&self, id: Uuid, update: &TaskUpdate) -> StoreResult<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "task", id })?;
        update.apply_to(task);
        Ok(task.clone())
    }

    async fn update_tasks(&self, ids: &[Uuid], update: &TaskUpdate) -> StoreResult<u64> {
        *self.batch_update_calls.write().await += 1;

        let mut tasks = self.tasks.write().await;
        let mut touched = 0;
        for id in ids {
            if let Some(task) = tasks.get_mut(id) {
                update.apply_to(task);
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn update_project_status(&self, id: Uuid, status: &str) -> StoreResult<Project> {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "project", id })?;
        project.status = status.to_string();
        project.updated_at = Some(Utc::now());
        Ok(project.clone())
    }

    async fn insert_comment(&self, comment: NewComment) -> StoreResult<TaskComment> {
        if !self.tasks.read().await.contains_key(&comment.task_id) {
            return Err(StoreError::NotFound { entity: "task", id: comment.task_id });
        }

        let comment = TaskComment {
            id: Uuid::new_v4(),
            task_id: comment.task_id,
            user_id: comment.user_id,
            content: comment.content,
            is_system_comment: comment.is_system_comment,
            created_at: Utc::now(),
        };
        self.comments.write().await.push(comment.clone());
        Ok(comment)
    }

    async fn upsert_custom_field_value(
        &self,
        field_definition_id: Uuid,
        entity_id: Uuid,
        entity_type: &str,
        value: Value,
    ) -> StoreResult<CustomFieldValue> {
        let mut values = self.field_values.write().await;
        if let Some(existing) = values.iter_mut().find(|v| {
            v.field_definition_id == field_definition_id
                && v.entity_id == entity_id
                && v.entity_type == entity_type
        }) {
            existing.value = value;
            existing.updated_at = Utc::now();
            return Ok(existing.clone());
        }

        let created = CustomFieldValue {
            id: Uuid::new_v4(),
            field_definition_id,
            entity_id,
            entity_type: entity_type.to_string(),
            value,
            updated_at: Utc::now(),
        };
        values.push(created.clone());
        Ok(created)
    }

    async fn insert_calendar_event(&self, event: NewCalendarEvent) -> StoreResult<CalendarEvent> {
        let event = CalendarEvent {
            id: Uuid::new_v4(),
            project_id: event.project_id,
            task_id: event.task_id,
            title: event.title,
            description: event.description,
            start_date: event.start_date,
            end_date: event.end_date,
            all_day: event.all_day,
            created_by: event.created_by,
            created_at: Utc::now(),
        };
        self.calendar_events.write().await.push(event.clone());
        Ok(event)
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn insert(&self, execution: WorkflowExecution) -> StoreResult<WorkflowExecution> {
        self.executions.write().await.push(execution.clone());
        Ok(execution)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<WorkflowExecution>> {
        Ok(self
            .executions
            .read()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn list(&self, workflow_id: Uuid, limit: i64) -> StoreResult<Vec<WorkflowExecution>> {
        let mut executions: Vec<WorkflowExecution> = self
            .executions
            .read()
            .await
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        executions.truncate(limit.max(0) as usize);
        Ok(executions)
    }

    async fn update_status(&self, id: Uuid, status: ExecutionStatus) -> StoreResult<()> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StoreError::NotFound { entity: "execution", id })?;
        execution.status = status;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let mut executions = self.executions.write().await;
        let before = executions.len();
        executions.retain(|e| e.id != id);
        Ok(executions.len() != before)
    }
}

#[async_trait]
impl NotificationSink for InMemoryStore {
    async fn send(&self, user_id: Uuid, title: &str, message: &str, metadata: Value) -> StoreResult<()> {
        if self.fail_notifications.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidData("notification sink unavailable".to_string()));
        }

        let entity_id = metadata
            .get("task_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok());

        self.notifications.write().await.push(Notification {
            id: Uuid::new_v4(),
            user_id,
            title: title.to_string(),
            message: message.to_string(),
            notification_type: "workflow".to_string(),
            entity_type: entity_id.map(|_| "task".to_string()),
            entity_id,
            metadata,
            read: false,
            created_at: Utc::now(),
        });
        Ok(())
    }
}
