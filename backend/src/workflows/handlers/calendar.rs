use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use taskflow_shared::NewCalendarEvent;

use crate::workflows::actions::{ActionType, CreateCalendarEventConfig};
use crate::workflows::error::{WorkflowError, WorkflowResult};
use crate::workflows::executor::{parse_id, ActionHandler, ActionServices, ExecutionContext};

pub struct CreateCalendarEvent;

#[async_trait]
impl ActionHandler for CreateCalendarEvent {
    type Config = CreateCalendarEventConfig;
    /// Linked task, if any. Events do not require one.
    type Target = Option<Uuid>;

    fn action_type(&self) -> ActionType {
        ActionType::CreateCalendarEvent
    }

    async fn substitute_fields(
        &self,
        mut config: CreateCalendarEventConfig,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<CreateCalendarEventConfig> {
        config.title = services.text(&config.title, ctx).await;
        config.description = services.opt_text(config.description, ctx).await;
        config.task_id = services.opt_text(config.task_id, ctx).await;
        Ok(config)
    }

    async fn resolve_target(
        &self,
        config: &CreateCalendarEventConfig,
        ctx: &ExecutionContext,
        _services: &ActionServices,
    ) -> WorkflowResult<Option<Uuid>> {
        let explicit = parse_id(&self.action_type(), "task_id", config.task_id.as_deref())?;
        Ok(explicit.or_else(|| ctx.trigger_data.task_id()))
    }

    async fn apply(
        &self,
        task_id: Option<Uuid>,
        config: CreateCalendarEventConfig,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<Value> {
        let start_date = services.date(&config.start_date);
        let end_date = config
            .end_date
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .map(|d| services.date(d))
            .unwrap_or(start_date);

        if end_date < start_date {
            return Err(WorkflowError::invalid_config(
                self.action_type().to_string(),
                "end_date is before start_date",
            ));
        }

        let event = services
            .entities
            .insert_calendar_event(NewCalendarEvent {
                project_id: ctx.project_id,
                task_id,
                title: config.title,
                description: config.description,
                start_date,
                end_date,
                all_day: config.all_day,
                created_by: ctx.user_id,
            })
            .await?;

        info!("Workflow created calendar event {} '{}'", event.id, event.title);
        Ok(json!({
            "event_id": event.id,
            "start_date": start_date,
            "end_date": end_date,
        }))
    }
}
