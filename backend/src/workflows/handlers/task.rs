use async_trait::async_trait;
use chrono::Local;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use taskflow_shared::{NewComment, NewTask, TaskUpdate, DEFAULT_TASK_PRIORITY, DEFAULT_TASK_STATUS};

use crate::services::cache::EntityKey;
use crate::store::TaskFilter;
use crate::workflows::actions::{
    ActionType, AddCommentConfig, AssignToUserConfig, BatchUpdateTasksConfig, CreateTaskConfig,
    MoveToProjectConfig, UpdateTaskConfig,
};
use crate::workflows::error::{WorkflowError, WorkflowResult};
use crate::workflows::executor::{parse_id, require_id, ActionHandler, ActionServices, ExecutionContext};

fn to_local_date(services: &ActionServices, expr: &str) -> chrono::NaiveDate {
    services.date(expr).with_timezone(&Local).date_naive()
}

fn changed_fields(update: &TaskUpdate) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if update.title.is_some() {
        fields.push("title");
    }
    if update.description.is_some() {
        fields.push("description");
    }
    if update.status.is_some() {
        fields.push("status");
    }
    if update.priority.is_some() {
        fields.push("priority");
    }
    if update.assigned_to.is_some() {
        fields.push("assigned_to");
    }
    if update.due_date.is_some() {
        fields.push("due_date");
    }
    if update.project_id.is_some() {
        fields.push("project_id");
    }
    fields
}

pub struct UpdateTask;

#[async_trait]
impl ActionHandler for UpdateTask {
    type Config = UpdateTaskConfig;
    type Target = Uuid;

    fn action_type(&self) -> ActionType {
        ActionType::UpdateTask
    }

    async fn substitute_fields(
        &self,
        mut config: UpdateTaskConfig,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<UpdateTaskConfig> {
        config.title = services.opt_text(config.title, ctx).await;
        config.description = services.opt_text(config.description, ctx).await;
        config.status = services.opt_text(config.status, ctx).await;
        config.priority = services.opt_text(config.priority, ctx).await;
        config.task_id = services.opt_text(config.task_id, ctx).await;
        config.assigned_to = services.opt_text(config.assigned_to, ctx).await;
        Ok(config)
    }

    async fn resolve_target(
        &self,
        config: &UpdateTaskConfig,
        ctx: &ExecutionContext,
        _services: &ActionServices,
    ) -> WorkflowResult<Uuid> {
        let explicit = parse_id(&self.action_type(), "task_id", config.task_id.as_deref())?;
        ctx.task_target(explicit, &self.action_type())
    }

    async fn apply(
        &self,
        task_id: Uuid,
        config: UpdateTaskConfig,
        _ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<Value> {
        let update = TaskUpdate {
            title: config.title,
            description: config.description,
            status: config.status,
            priority: config.priority,
            assigned_to: parse_id(&self.action_type(), "assigned_to", config.assigned_to.as_deref())?,
            due_date: config.due_date.as_deref().map(|d| to_local_date(services, d)),
            project_id: None,
        };
        if update.is_empty() {
            return Err(WorkflowError::invalid_config(
                self.action_type().to_string(),
                "no fields to update",
            ));
        }

        services.entities.update_task(task_id, &update).await?;
        services.invalidate(EntityKey::Task(task_id)).await;

        let fields = changed_fields(&update);
        info!("Workflow updated task {} ({})", task_id, fields.join(", "));
        Ok(json!({ "task_id": task_id, "updated_fields": fields }))
    }
}

pub struct CreateTask;

#[async_trait]
impl ActionHandler for CreateTask {
    type Config = CreateTaskConfig;
    /// Project the task lands in
    type Target = Uuid;

    fn action_type(&self) -> ActionType {
        ActionType::CreateTask
    }

    async fn substitute_fields(
        &self,
        mut config: CreateTaskConfig,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<CreateTaskConfig> {
        config.title = services.text(&config.title, ctx).await;
        config.description = services.opt_text(config.description, ctx).await;
        config.assigned_to = services.opt_text(config.assigned_to, ctx).await;
        config.project_id = services.opt_text(config.project_id, ctx).await;
        Ok(config)
    }

    async fn resolve_target(
        &self,
        config: &CreateTaskConfig,
        ctx: &ExecutionContext,
        _services: &ActionServices,
    ) -> WorkflowResult<Uuid> {
        let explicit = parse_id(&self.action_type(), "project_id", config.project_id.as_deref())?;
        Ok(explicit.unwrap_or(ctx.project_id))
    }

    async fn apply(
        &self,
        project_id: Uuid,
        config: CreateTaskConfig,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<Value> {
        let assigned_to = parse_id(&self.action_type(), "assigned_to", config.assigned_to.as_deref())?;
        let new_task = NewTask {
            project_id,
            title: config.title,
            description: config.description,
            status: config.status.unwrap_or_else(|| DEFAULT_TASK_STATUS.to_string()),
            priority: config.priority.unwrap_or_else(|| DEFAULT_TASK_PRIORITY.to_string()),
            assigned_to,
            created_by: ctx.user_id,
            due_date: config.due_date.as_deref().map(|d| to_local_date(services, d)),
        };

        let task = services.entities.insert_task(new_task).await?;
        info!("Workflow created task {} '{}' in project {}", task.id, task.title, project_id);
        Ok(json!({ "task_id": task.id, "project_id": project_id }))
    }
}

pub struct MoveToProject;

#[async_trait]
impl ActionHandler for MoveToProject {
    type Config = MoveToProjectConfig;
    type Target = Uuid;

    fn action_type(&self) -> ActionType {
        ActionType::MoveToProject
    }

    async fn substitute_fields(
        &self,
        mut config: MoveToProjectConfig,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<MoveToProjectConfig> {
        config.task_id = services.opt_text(config.task_id, ctx).await;
        config.target_project_id = services.text(&config.target_project_id, ctx).await;
        Ok(config)
    }

    async fn resolve_target(
        &self,
        config: &MoveToProjectConfig,
        ctx: &ExecutionContext,
        _services: &ActionServices,
    ) -> WorkflowResult<Uuid> {
        let explicit = parse_id(&self.action_type(), "task_id", config.task_id.as_deref())?;
        ctx.task_target(explicit, &self.action_type())
    }

    async fn apply(
        &self,
        task_id: Uuid,
        config: MoveToProjectConfig,
        _ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<Value> {
        let target_id = require_id(&self.action_type(), "target_project_id", &config.target_project_id)?;
        let target = services.project(target_id).await?;

        let update = TaskUpdate {
            project_id: Some(target.id),
            ..Default::default()
        };
        services.entities.update_task(task_id, &update).await?;
        services.invalidate(EntityKey::Task(task_id)).await;

        info!("Workflow moved task {} to project {}", task_id, target.id);
        Ok(json!({ "task_id": task_id, "project_id": target.id }))
    }
}

pub struct AssignToUser;

#[async_trait]
impl ActionHandler for AssignToUser {
    type Config = AssignToUserConfig;
    type Target = Uuid;

    fn action_type(&self) -> ActionType {
        ActionType::AssignToUser
    }

    async fn substitute_fields(
        &self,
        mut config: AssignToUserConfig,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<AssignToUserConfig> {
        config.task_id = services.opt_text(config.task_id, ctx).await;
        config.user_id = services.text(&config.user_id, ctx).await;
        Ok(config)
    }

    async fn resolve_target(
        &self,
        config: &AssignToUserConfig,
        ctx: &ExecutionContext,
        _services: &ActionServices,
    ) -> WorkflowResult<Uuid> {
        let explicit = parse_id(&self.action_type(), "task_id", config.task_id.as_deref())?;
        ctx.task_target(explicit, &self.action_type())
    }

    async fn apply(
        &self,
        task_id: Uuid,
        config: AssignToUserConfig,
        _ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<Value> {
        let user_id = require_id(&self.action_type(), "user_id", &config.user_id)?;
        let update = TaskUpdate {
            assigned_to: Some(user_id),
            ..Default::default()
        };
        services.entities.update_task(task_id, &update).await?;
        services.invalidate(EntityKey::Task(task_id)).await;

        info!("Workflow assigned task {} to user {}", task_id, user_id);
        Ok(json!({ "task_id": task_id, "assigned_to": user_id }))
    }
}

pub struct AddComment;

#[async_trait]
impl ActionHandler for AddComment {
    type Config = AddCommentConfig;
    type Target = Uuid;

    fn action_type(&self) -> ActionType {
        ActionType::AddComment
    }

    async fn substitute_fields(
        &self,
        mut config: AddCommentConfig,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<AddCommentConfig> {
        config.comment = services.text(&config.comment, ctx).await;
        config.task_id = services.opt_text(config.task_id, ctx).await;
        Ok(config)
    }

    async fn resolve_target(
        &self,
        config: &AddCommentConfig,
        ctx: &ExecutionContext,
        _services: &ActionServices,
    ) -> WorkflowResult<Uuid> {
        let explicit = parse_id(&self.action_type(), "task_id", config.task_id.as_deref())?;
        ctx.task_target(explicit, &self.action_type())
    }

    async fn apply(
        &self,
        task_id: Uuid,
        config: AddCommentConfig,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<Value> {
        let comment = services
            .entities
            .insert_comment(NewComment {
                task_id,
                user_id: ctx.user_id,
                content: config.comment,
                is_system_comment: config.is_system_comment,
            })
            .await?;

        info!("Workflow added comment {} to task {}", comment.id, task_id);
        Ok(json!({ "comment_id": comment.id, "task_id": task_id }))
    }
}

pub struct BatchUpdateTasks;

#[async_trait]
impl ActionHandler for BatchUpdateTasks {
    type Config = BatchUpdateTasksConfig;
    /// Project whose tasks are selected
    type Target = Uuid;

    fn action_type(&self) -> ActionType {
        ActionType::BatchUpdateTasks
    }

    async fn substitute_fields(
        &self,
        mut config: BatchUpdateTasksConfig,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<BatchUpdateTasksConfig> {
        config.updates.status = services.opt_text(config.updates.status, ctx).await;
        config.updates.priority = services.opt_text(config.updates.priority, ctx).await;
        config.updates.assigned_to = services.opt_text(config.updates.assigned_to, ctx).await;
        config.filter.assigned_to = services.opt_text(config.filter.assigned_to, ctx).await;
        Ok(config)
    }

    async fn resolve_target(
        &self,
        _config: &BatchUpdateTasksConfig,
        ctx: &ExecutionContext,
        _services: &ActionServices,
    ) -> WorkflowResult<Uuid> {
        Ok(ctx.project_id)
    }

    async fn apply(
        &self,
        project_id: Uuid,
        config: BatchUpdateTasksConfig,
        _ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<Value> {
        let update = TaskUpdate {
            status: config.updates.status,
            priority: config.updates.priority,
            assigned_to: parse_id(&self.action_type(), "updates.assigned_to", config.updates.assigned_to.as_deref())?,
            due_date: config.updates.due_date.as_deref().map(|d| to_local_date(services, d)),
            ..Default::default()
        };
        if update.is_empty() {
            return Err(WorkflowError::invalid_config(
                self.action_type().to_string(),
                "no fields to update",
            ));
        }

        let cap = services.batch_update_limit;
        let limit = config.limit.unwrap_or(cap).min(cap).max(0);

        let filter = TaskFilter {
            project_id: Some(project_id),
            statuses: config.filter.status,
            assigned_to: parse_id(&self.action_type(), "filter.assigned_to", config.filter.assigned_to.as_deref())?,
            priorities: config.filter.priority,
            limit: Some(limit),
            ..Default::default()
        };

        let mut tasks = services.entities.find_tasks(&filter).await?;
        tasks.truncate(limit as usize);

        if tasks.is_empty() {
            info!("Batch update in project {} matched no tasks", project_id);
            return Ok(json!({ "matched": 0, "updated": 0, "limit": limit }));
        }

        let ids: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
        let updated = services.entities.update_tasks(&ids, &update).await?;
        for id in &ids {
            services.invalidate(EntityKey::Task(*id)).await;
        }

        info!(
            "Workflow batch-updated {} tasks in project {} (limit {})",
            updated, project_id, limit
        );
        Ok(json!({ "matched": ids.len(), "updated": updated, "limit": limit, "task_ids": ids }))
    }
}
