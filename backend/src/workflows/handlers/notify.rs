use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::workflows::actions::{ActionType, SendEmailConfig, SendNotificationConfig};
use crate::workflows::error::{WorkflowError, WorkflowResult};
use crate::workflows::executor::{parse_id, ActionHandler, ActionServices, ExecutionContext};

/// Assignee of the triggering task, falling back to its creator.
async fn implicit_task_recipient(
    ctx: &ExecutionContext,
    services: &ActionServices,
) -> WorkflowResult<Option<Uuid>> {
    match ctx.trigger_data.task_id() {
        Some(task_id) => {
            let task = services.task(task_id).await?;
            Ok(task.assigned_to.or(task.created_by))
        }
        None => Ok(None),
    }
}

pub struct SendNotification;

#[async_trait]
impl ActionHandler for SendNotification {
    type Config = SendNotificationConfig;
    /// Recipient user id
    type Target = Uuid;

    fn action_type(&self) -> ActionType {
        ActionType::SendNotification
    }

    async fn substitute_fields(
        &self,
        mut config: SendNotificationConfig,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<SendNotificationConfig> {
        config.message = services.text(&config.message, ctx).await;
        config.title = services.opt_text(config.title, ctx).await;
        config.recipient_id = services.opt_text(config.recipient_id, ctx).await;
        Ok(config)
    }

    async fn resolve_target(
        &self,
        config: &SendNotificationConfig,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<Uuid> {
        if let Some(recipient) = parse_id(&self.action_type(), "recipient_id", config.recipient_id.as_deref())? {
            return Ok(recipient);
        }
        implicit_task_recipient(ctx, services).await?.ok_or_else(|| {
            WorkflowError::Recipient("no recipient configured and the trigger has no task owner".to_string())
        })
    }

    async fn apply(
        &self,
        recipient: Uuid,
        config: SendNotificationConfig,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<Value> {
        let title = config
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| ctx.workflow.name.clone());

        let metadata = json!({
            "source": "workflow",
            "workflow_id": ctx.workflow.id,
            "execution_id": ctx.execution_id,
            "task_id": ctx.trigger_data.task_id(),
            "project_id": ctx.project_id,
        });

        services
            .notifier
            .send(recipient, &title, &config.message, metadata)
            .await?;

        info!("Workflow {} notified user {}", ctx.workflow.id, recipient);
        Ok(json!({ "recipient_id": recipient, "title": title }))
    }
}

pub struct SendEmail;

#[async_trait]
impl ActionHandler for SendEmail {
    type Config = SendEmailConfig;
    /// Resolved email address
    type Target = String;

    fn action_type(&self) -> ActionType {
        ActionType::SendEmail
    }

    async fn substitute_fields(
        &self,
        mut config: SendEmailConfig,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<SendEmailConfig> {
        config.to = services.opt_text(config.to, ctx).await;
        config.subject = services.text(&config.subject, ctx).await;
        config.content = services.text(&config.content, ctx).await;
        Ok(config)
    }

    async fn resolve_target(
        &self,
        config: &SendEmailConfig,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<String> {
        let user_id = match config.to.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(to) => match Uuid::parse_str(to) {
                Ok(id) => id,
                Err(_) if to.contains('@') => return Ok(to.to_string()),
                Err(_) => {
                    return Err(WorkflowError::Recipient(format!(
                        "'{}' is neither a user id nor an email address",
                        to
                    )));
                }
            },
            None => implicit_task_recipient(ctx, services).await?.ok_or_else(|| {
                WorkflowError::Recipient("no recipient configured and the trigger has no task owner".to_string())
            })?,
        };

        let user = services
            .cache
            .user(services.entities.as_ref(), user_id)
            .await?
            .ok_or(WorkflowError::EntityNotFound { entity: "user", id: user_id })?;

        if user.email.trim().is_empty() {
            return Err(WorkflowError::Recipient(format!("user {} has no email address", user_id)));
        }
        Ok(user.email)
    }

    async fn apply(
        &self,
        to: String,
        config: SendEmailConfig,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<Value> {
        services.mailer.send(&to, &config.subject, &config.content).await?;

        info!("Workflow {} sent email to {}", ctx.workflow.id, to);
        Ok(json!({ "to": to, "subject": config.subject }))
    }
}
