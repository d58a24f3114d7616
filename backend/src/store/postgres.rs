// Postgres implementation of the engine's data access seams.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tracing::warn;
use uuid::Uuid;

use taskflow_shared::{
    CalendarEvent, CustomFieldDefinition, CustomFieldValue, NewCalendarEvent, NewComment, NewTask,
    Project, Task, TaskComment, TaskUpdate, UserProfile, TASK_STATUS_DONE,
};

use super::{
    EntityStore, ExecutionStore, NotificationSink, StoreError, StoreResult, TaskFilter, WorkflowStore,
};
use crate::workflows::{
    Action, AttributeConditions, ExecutionStatus, TriggerConfig, TriggerData, TriggerType,
    WorkflowDefinition, WorkflowExecution,
};

const WORKFLOW_COLUMNS: &str = "id, project_id, name, description, is_active, trigger_type, \
    trigger_config, conditions, actions, created_by, last_executed, created_at, updated_at";

const EXECUTION_COLUMNS: &str =
    "id, workflow_id, trigger_data, executed_actions, status, error_message, executed_at";

#[derive(Debug, FromRow)]
struct WorkflowRow {
    id: Uuid,
    project_id: Uuid,
    name: String,
    description: Option<String>,
    is_active: bool,
    trigger_type: String,
    trigger_config: Option<Value>,
    conditions: Option<Value>,
    actions: Value,
    created_by: Option<Uuid>,
    last_executed: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<WorkflowRow> for WorkflowDefinition {
    type Error = StoreError;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        let trigger = TriggerConfig::from_parts(&row.trigger_type, row.trigger_config)?;
        let conditions: AttributeConditions = match row.conditions {
            None | Some(Value::Null) => AttributeConditions::default(),
            Some(value) => serde_json::from_value(value)?,
        };
        let actions: Vec<Action> = serde_json::from_value(row.actions)?;

        Ok(WorkflowDefinition {
            id: row.id,
            project_id: row.project_id,
            name: row.name,
            description: row.description,
            is_active: row.is_active,
            trigger,
            conditions,
            actions,
            created_by: row.created_by,
            last_executed: row.last_executed,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ExecutionRow {
    id: Uuid,
    workflow_id: Uuid,
    trigger_data: Value,
    executed_actions: Value,
    status: String,
    error_message: Option<String>,
    executed_at: DateTime<Utc>,
}

impl TryFrom<ExecutionRow> for WorkflowExecution {
    type Error = StoreError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        let trigger_data: TriggerData = serde_json::from_value(row.trigger_data)?;
        let executed_actions: Vec<Action> = serde_json::from_value(row.executed_actions)?;
        let status = row
            .status
            .parse::<ExecutionStatus>()
            .map_err(StoreError::InvalidData)?;

        Ok(WorkflowExecution {
            id: row.id,
            workflow_id: row.workflow_id,
            trigger_data,
            executed_actions,
            status,
            error_message: row.error_message,
            executed_at: row.executed_at,
        })
    }
}

/// Append `, column = $n` for every field the update sets.
fn push_task_update(builder: &mut QueryBuilder<'_, Postgres>, update: &TaskUpdate) {
    if let Some(title) = &update.title {
        builder.push(", title = ").push_bind(title.clone());
    }
    if let Some(description) = &update.description {
        builder.push(", description = ").push_bind(description.clone());
    }
    if let Some(status) = &update.status {
        builder.push(", status = ").push_bind(status.clone());
        if status == TASK_STATUS_DONE {
            builder.push(", completed_at = COALESCE(completed_at, NOW())");
        }
    }
    if let Some(priority) = &update.priority {
        builder.push(", priority = ").push_bind(priority.clone());
    }
    if let Some(assigned_to) = update.assigned_to {
        builder.push(", assigned_to = ").push_bind(assigned_to);
    }
    if let Some(due_date) = update.due_date {
        builder.push(", due_date = ").push_bind(due_date);
    }
    if let Some(project_id) = update.project_id {
        builder.push(", project_id = ").push_bind(project_id);
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn list(
        &self,
        project_id: Option<Uuid>,
        trigger_type: TriggerType,
        active_only: bool,
    ) -> StoreResult<Vec<WorkflowDefinition>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM workflows WHERE trigger_type = ",
            WORKFLOW_COLUMNS
        ));
        builder.push_bind(trigger_type.as_str());
        if let Some(project_id) = project_id {
            builder.push(" AND project_id = ").push_bind(project_id);
        }
        if active_only {
            builder.push(" AND is_active = true");
        }
        builder.push(" ORDER BY created_at ASC");

        let rows: Vec<WorkflowRow> = builder.build_query_as().fetch_all(&self.pool).await?;

        // A malformed definition must not hide the others
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                match WorkflowDefinition::try_from(row) {
                    Ok(workflow) => Some(workflow),
                    Err(e) => {
                        warn!("Skipping unreadable workflow {}: {}", id, e);
                        None
                    }
                }
            })
            .collect())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<WorkflowDefinition>> {
        let row: Option<WorkflowRow> = sqlx::query_as(&format!(
            "SELECT {} FROM workflows WHERE id = $1",
            WORKFLOW_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WorkflowDefinition::try_from).transpose()
    }

    async fn update_last_executed(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query("UPDATE workflows SET last_executed = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity: "workflow", id });
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for PgStore {
    async fn get_task(&self, id: Uuid) -> StoreResult<Option<Task>> {
        Ok(sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_project(&self, id: Uuid) -> StoreResult<Option<Project>> {
        Ok(sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<UserProfile>> {
        Ok(sqlx::query_as::<_, UserProfile>("SELECT * FROM user_profiles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_custom_field(
        &self,
        name: &str,
        entity_type: &str,
        project_id: Uuid,
    ) -> StoreResult<Option<CustomFieldDefinition>> {
        Ok(sqlx::query_as::<_, CustomFieldDefinition>(
            r#"
            SELECT * FROM custom_field_definitions
            WHERE name = $1 AND entity_type = $2
              AND (project_id = $3 OR project_id IS NULL)
            ORDER BY project_id NULLS LAST
            LIMIT 1
            "#,
        )
        .bind(name)
        .bind(entity_type)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn get_custom_field_value(
        &self,
        field_definition_id: Uuid,
        entity_id: Uuid,
        entity_type: &str,
    ) -> StoreResult<Option<CustomFieldValue>> {
        Ok(sqlx::query_as::<_, CustomFieldValue>(
            r#"
            SELECT * FROM custom_field_values
            WHERE field_definition_id = $1 AND entity_id = $2 AND entity_type = $3
            "#,
        )
        .bind(field_definition_id)
        .bind(entity_id)
        .bind(entity_type)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM tasks WHERE 1 = 1");

        if let Some(project_id) = filter.project_id {
            builder.push(" AND project_id = ").push_bind(project_id);
        }
        if let Some(due_date) = filter.due_date {
            builder.push(" AND due_date = ").push_bind(due_date);
        }
        if let Some(statuses) = &filter.statuses {
            builder.push(" AND status = ANY(").push_bind(statuses.clone()).push(")");
        }
        if let Some(excluded) = &filter.exclude_statuses {
            builder.push(" AND NOT (status = ANY(").push_bind(excluded.clone()).push("))");
        }
        if let Some(assigned_to) = filter.assigned_to {
            builder.push(" AND assigned_to = ").push_bind(assigned_to);
        }
        if let Some(priorities) = &filter.priorities {
            builder.push(" AND priority = ANY(").push_bind(priorities.clone()).push(")");
        }

        builder.push(" ORDER BY created_at ASC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit);
        }

        Ok(builder.build_query_as::<Task>().fetch_all(&self.pool).await?)
    }

    async fn insert_task(&self, task: NewTask) -> StoreResult<Task> {
        Ok(sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO tasks (id, project_id, title, description, status, priority, assigned_to, created_by, due_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(task.project_id)
        .bind(task.title)
        .bind(task.description)
        .bind(task.status)
        .bind(task.priority)
        .bind(task.assigned_to)
        .bind(task.created_by)
        .bind(task.due_date)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn update_task(&self, id: Uuid, update: &TaskUpdate) -> StoreResult<Task> {
        let mut builder = QueryBuilder::<Postgres>::new("UPDATE tasks SET updated_at = NOW()");
        push_task_update(&mut builder, update);
        builder.push(" WHERE id = ").push_bind(id).push(" RETURNING *");

        builder
            .build_query_as::<Task>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound { entity: "task", id })
    }

    async fn update_tasks(&self, ids: &[Uuid], update: &TaskUpdate) -> StoreResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut builder = QueryBuilder::<Postgres>::new("UPDATE tasks SET updated_at = NOW()");
        push_task_update(&mut builder, update);
        builder.push(" WHERE id = ANY(").push_bind(ids.to_vec()).push(")");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn update_project_status(&self, id: Uuid, status: &str) -> StoreResult<Project> {
        sqlx::query_as::<_, Project>(
            "UPDATE projects SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound { entity: "project", id })
    }

    async fn insert_comment(&self, comment: NewComment) -> StoreResult<TaskComment> {
        Ok(sqlx::query_as::<_, TaskComment>(
            r#"
            INSERT INTO task_comments (id, task_id, user_id, content, is_system_comment)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(comment.task_id)
        .bind(comment.user_id)
        .bind(comment.content)
        .bind(comment.is_system_comment)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn upsert_custom_field_value(
        &self,
        field_definition_id: Uuid,
        entity_id: Uuid,
        entity_type: &str,
        value: Value,
    ) -> StoreResult<CustomFieldValue> {
        Ok(sqlx::query_as::<_, CustomFieldValue>(
            r#"
            INSERT INTO custom_field_values (id, field_definition_id, entity_id, entity_type, value)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (field_definition_id, entity_id, entity_type) DO UPDATE
            SET value = EXCLUDED.value, updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(field_definition_id)
        .bind(entity_id)
        .bind(entity_type)
        .bind(value)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn insert_calendar_event(&self, event: NewCalendarEvent) -> StoreResult<CalendarEvent> {
        Ok(sqlx::query_as::<_, CalendarEvent>(
            r#"
            INSERT INTO calendar_events
            (id, project_id, task_id, title, description, start_date, end_date, all_day, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.project_id)
        .bind(event.task_id)
        .bind(event.title)
        .bind(event.description)
        .bind(event.start_date)
        .bind(event.end_date)
        .bind(event.all_day)
        .bind(event.created_by)
        .fetch_one(&self.pool)
        .await?)
    }
}

#[async_trait]
impl ExecutionStore for PgStore {
    async fn insert(&self, execution: WorkflowExecution) -> StoreResult<WorkflowExecution> {
        let row: ExecutionRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO workflow_executions
            (id, workflow_id, trigger_data, executed_actions, status, error_message, executed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            EXECUTION_COLUMNS
        ))
        .bind(execution.id)
        .bind(execution.workflow_id)
        .bind(serde_json::to_value(&execution.trigger_data)?)
        .bind(serde_json::to_value(&execution.executed_actions)?)
        .bind(execution.status.as_str())
        .bind(&execution.error_message)
        .bind(execution.executed_at)
        .fetch_one(&self.pool)
        .await?;

        WorkflowExecution::try_from(row)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<WorkflowExecution>> {
        let row: Option<ExecutionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM workflow_executions WHERE id = $1",
            EXECUTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WorkflowExecution::try_from).transpose()
    }

    async fn list(&self, workflow_id: Uuid, limit: i64) -> StoreResult<Vec<WorkflowExecution>> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM workflow_executions WHERE workflow_id = $1 ORDER BY executed_at DESC LIMIT $2",
            EXECUTION_COLUMNS
        ))
        .bind(workflow_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WorkflowExecution::try_from).collect()
    }

    async fn update_status(&self, id: Uuid, status: ExecutionStatus) -> StoreResult<()> {
        let result = sqlx::query("UPDATE workflow_executions SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity: "execution", id });
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM workflow_executions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl NotificationSink for PgStore {
    async fn send(&self, user_id: Uuid, title: &str, message: &str, metadata: Value) -> StoreResult<()> {
        let entity_id = metadata
            .get("task_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok());

        sqlx::query(
            r#"
            INSERT INTO notifications
            (id, user_id, title, message, notification_type, entity_type, entity_id, metadata)
            VALUES ($1, $2, $3, $4, 'workflow', $5, $6, $7)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(title)
        .bind(message)
        .bind(entity_id.map(|_| "task"))
        .bind(entity_id)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
