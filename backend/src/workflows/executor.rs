// Workflow Executor - Dispatches single actions to their handlers

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use taskflow_shared::{Project, Task};

use super::actions::{Action, ActionType};
use super::engine::WorkflowDefinition;
use super::error::{WorkflowError, WorkflowResult};
use super::handlers;
use super::templating::{parse_date_expression, TemplateEngine};
use super::triggers::TriggerData;
use crate::services::cache::{EntityCache, EntityKey};
use crate::services::email::EmailSender;
use crate::store::{EntityStore, NotificationSink};

/// Everything an action needs to know about the run it belongs to.
/// Built once per run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub workflow: Arc<WorkflowDefinition>,
    /// Acting user: the trigger's user, else the workflow creator
    pub user_id: Option<Uuid>,
    pub project_id: Uuid,
    pub trigger_data: TriggerData,
}

impl ExecutionContext {
    pub fn new(workflow: Arc<WorkflowDefinition>, trigger_data: TriggerData) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            user_id: trigger_data.user_id.or(workflow.created_by),
            project_id: trigger_data.project_id,
            workflow,
            trigger_data,
        }
    }

    /// Explicit id from config, else the task the trigger is about.
    pub fn task_target(&self, explicit: Option<Uuid>, action_type: &ActionType) -> WorkflowResult<Uuid> {
        explicit
            .or_else(|| self.trigger_data.task_id())
            .ok_or_else(|| WorkflowError::MissingTarget {
                entity: "task",
                action_type: action_type.to_string(),
            })
    }
}

/// Read an id field once its tokens are substituted. Blank means unset.
pub fn parse_id(action_type: &ActionType, field: &str, value: Option<&str>) -> WorkflowResult<Option<Uuid>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => Uuid::parse_str(raw).map(Some).map_err(|_| {
            WorkflowError::invalid_config(action_type.to_string(), format!("{} '{}' is not a valid id", field, raw))
        }),
    }
}

pub fn require_id(action_type: &ActionType, field: &str, value: &str) -> WorkflowResult<Uuid> {
    parse_id(action_type, field, Some(value))?
        .ok_or_else(|| WorkflowError::invalid_config(action_type.to_string(), format!("{} is required", field)))
}

/// Result of executing an action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub output: Value,
    pub duration_ms: i64,
    pub executed_at: DateTime<Utc>,
}

/// Shared collaborators handed to every action handler.
pub struct ActionServices {
    pub entities: Arc<dyn EntityStore>,
    pub cache: Arc<EntityCache>,
    pub templates: TemplateEngine,
    pub notifier: Arc<dyn NotificationSink>,
    pub mailer: Arc<dyn EmailSender>,
    /// Hard cap on rows touched by one `batch_update_tasks`
    pub batch_update_limit: i64,
}

impl ActionServices {
    pub async fn text(&self, template: &str, ctx: &ExecutionContext) -> String {
        self.templates.substitute(template, ctx).await
    }

    pub async fn opt_text(&self, template: Option<String>, ctx: &ExecutionContext) -> Option<String> {
        match template {
            Some(t) => Some(self.text(&t, ctx).await),
            None => None,
        }
    }

    /// Date fields go through the expression parser, not token substitution.
    pub fn date(&self, expr: &str) -> DateTime<Utc> {
        parse_date_expression(expr)
    }

    pub async fn task(&self, id: Uuid) -> WorkflowResult<Task> {
        self.cache
            .task(self.entities.as_ref(), id)
            .await?
            .ok_or(WorkflowError::EntityNotFound { entity: "task", id })
    }

    pub async fn project(&self, id: Uuid) -> WorkflowResult<Project> {
        self.cache
            .project(self.entities.as_ref(), id)
            .await?
            .ok_or(WorkflowError::EntityNotFound { entity: "project", id })
    }

    pub async fn invalidate(&self, key: EntityKey) {
        self.cache.invalidate(&key).await;
    }
}

/// One implementation per action kind.
///
/// The executor deserializes and validates `Config`, substitutes its text
/// and id fields, resolves the target (explicit id or the trigger's entity) and then
/// applies the effect.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    type Config: DeserializeOwned + Validate + Send + Sync;
    type Target: Send + Sync;

    fn action_type(&self) -> ActionType;

    async fn substitute_fields(
        &self,
        config: Self::Config,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<Self::Config>;

    async fn resolve_target(
        &self,
        config: &Self::Config,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<Self::Target>;

    async fn apply(
        &self,
        target: Self::Target,
        config: Self::Config,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<Value>;
}

#[async_trait]
trait ErasedHandler: Send + Sync {
    async fn run(&self, raw: &Value, ctx: &ExecutionContext, services: &ActionServices) -> WorkflowResult<Value>;
}

#[async_trait]
impl<H> ErasedHandler for H
where
    H: ActionHandler,
{
    async fn run(&self, raw: &Value, ctx: &ExecutionContext, services: &ActionServices) -> WorkflowResult<Value> {
        let config: H::Config = serde_json::from_value(raw.clone())
            .map_err(|e| WorkflowError::invalid_config(self.action_type().to_string(), e.to_string()))?;
        config.validate()?;

        let config = self.substitute_fields(config, ctx, services).await?;
        let target = self.resolve_target(&config, ctx, services).await?;
        self.apply(target, config, ctx, services).await
    }
}

pub struct ActionExecutor {
    handlers: HashMap<ActionType, Box<dyn ErasedHandler>>,
    services: ActionServices,
}

impl ActionExecutor {
    /// Executor with every built-in action kind registered.
    pub fn new(services: ActionServices) -> Self {
        let mut executor = Self {
            handlers: HashMap::new(),
            services,
        };

        executor.register(handlers::task::UpdateTask);
        executor.register(handlers::task::CreateTask);
        executor.register(handlers::task::MoveToProject);
        executor.register(handlers::task::AssignToUser);
        executor.register(handlers::task::BatchUpdateTasks);
        executor.register(handlers::task::AddComment);
        executor.register(handlers::notify::SendNotification);
        executor.register(handlers::notify::SendEmail);
        executor.register(handlers::fields::UpdateCustomField);
        executor.register(handlers::calendar::CreateCalendarEvent);
        executor.register(handlers::project::UpdateProjectStatus);

        executor
    }

    pub fn register<H: ActionHandler + 'static>(&mut self, handler: H) {
        self.handlers.insert(handler.action_type(), Box::new(handler));
    }

    pub fn supports(&self, action_type: &ActionType) -> bool {
        self.handlers.contains_key(action_type)
    }

    pub fn services(&self) -> &ActionServices {
        &self.services
    }

    /// Execute a single action. Errors are returned, never swallowed.
    pub async fn execute(&self, action: &Action, ctx: &ExecutionContext) -> WorkflowResult<ActionResult> {
        let start = Instant::now();

        let handler = self
            .handlers
            .get(&action.action_type)
            .ok_or_else(|| WorkflowError::UnsupportedAction(action.action_type.to_string()))?;

        debug!(
            "Executing action '{}' ({}) for workflow {}",
            action.label(),
            action.action_type,
            ctx.workflow.id
        );

        let output = handler.run(&action.config, ctx, &self.services).await?;
        let duration_ms = start.elapsed().as_millis() as i64;

        info!(
            "Action '{}' completed in {}ms for workflow {}",
            action.label(),
            duration_ms,
            ctx.workflow.id
        );

        Ok(ActionResult {
            output,
            duration_ms,
            executed_at: Utc::now(),
        })
    }
}
