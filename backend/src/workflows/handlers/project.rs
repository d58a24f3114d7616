use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::services::cache::EntityKey;
use crate::workflows::actions::{ActionType, UpdateProjectStatusConfig};
use crate::workflows::error::WorkflowResult;
use crate::workflows::executor::{parse_id, ActionHandler, ActionServices, ExecutionContext};

pub struct UpdateProjectStatus;

#[async_trait]
impl ActionHandler for UpdateProjectStatus {
    type Config = UpdateProjectStatusConfig;
    type Target = Uuid;

    fn action_type(&self) -> ActionType {
        ActionType::UpdateProjectStatus
    }

    async fn substitute_fields(
        &self,
        mut config: UpdateProjectStatusConfig,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<UpdateProjectStatusConfig> {
        config.status = services.text(&config.status, ctx).await;
        config.project_id = services.opt_text(config.project_id, ctx).await;
        Ok(config)
    }

    async fn resolve_target(
        &self,
        config: &UpdateProjectStatusConfig,
        ctx: &ExecutionContext,
        _services: &ActionServices,
    ) -> WorkflowResult<Uuid> {
        let explicit = parse_id(&self.action_type(), "project_id", config.project_id.as_deref())?;
        Ok(explicit.unwrap_or(ctx.project_id))
    }

    async fn apply(
        &self,
        project_id: Uuid,
        config: UpdateProjectStatusConfig,
        _ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<Value> {
        let project = services
            .entities
            .update_project_status(project_id, config.status.trim())
            .await?;
        services.invalidate(EntityKey::Project(project_id)).await;

        info!("Workflow set project {} status to {}", project_id, project.status);
        Ok(json!({ "project_id": project_id, "status": project.status }))
    }
}
