use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::services::cache::EntityKey;
use crate::workflows::actions::{ActionType, UpdateCustomFieldConfig};
use crate::workflows::error::{WorkflowError, WorkflowResult};
use crate::workflows::executor::{parse_id, ActionHandler, ActionServices, ExecutionContext};

pub struct CustomFieldTarget {
    pub field_id: Uuid,
    pub entity_id: Uuid,
    pub entity_type: String,
}

pub struct UpdateCustomField;

#[async_trait]
impl ActionHandler for UpdateCustomField {
    type Config = UpdateCustomFieldConfig;
    type Target = CustomFieldTarget;

    fn action_type(&self) -> ActionType {
        ActionType::UpdateCustomField
    }

    async fn substitute_fields(
        &self,
        mut config: UpdateCustomFieldConfig,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<UpdateCustomFieldConfig> {
        if let Value::String(text) = &config.value {
            config.value = Value::String(services.text(text, ctx).await);
        }
        config.field_id = services.opt_text(config.field_id, ctx).await;
        config.entity_id = services.opt_text(config.entity_id, ctx).await;
        Ok(config)
    }

    async fn resolve_target(
        &self,
        config: &UpdateCustomFieldConfig,
        ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<CustomFieldTarget> {
        let entity_type = config.entity_type.trim().to_lowercase();

        let explicit_entity = parse_id(&self.action_type(), "entity_id", config.entity_id.as_deref())?;
        let entity_id = match (explicit_entity, entity_type.as_str()) {
            (Some(id), _) => id,
            (None, "task") => ctx.task_target(None, &self.action_type())?,
            (None, "project") => ctx.project_id,
            (None, other) => {
                return Err(WorkflowError::invalid_config(
                    self.action_type().to_string(),
                    format!("unsupported entity_type '{}'", other),
                ));
            }
        };

        let field_name = config.field_name.as_deref().map(str::trim).filter(|n| !n.is_empty());
        let explicit_field = parse_id(&self.action_type(), "field_id", config.field_id.as_deref())?;
        let field_id = match (explicit_field, field_name) {
            (Some(id), _) => id,
            (None, Some(name)) => services
                .entities
                .find_custom_field(name, &entity_type, ctx.project_id)
                .await?
                .map(|definition| definition.id)
                .ok_or_else(|| {
                    WorkflowError::invalid_config(
                        self.action_type().to_string(),
                        format!("no {} custom field named '{}'", entity_type, name),
                    )
                })?,
            (None, None) => {
                return Err(WorkflowError::invalid_config(
                    self.action_type().to_string(),
                    "field_id or field_name is required",
                ));
            }
        };

        Ok(CustomFieldTarget {
            field_id,
            entity_id,
            entity_type,
        })
    }

    async fn apply(
        &self,
        target: CustomFieldTarget,
        config: UpdateCustomFieldConfig,
        _ctx: &ExecutionContext,
        services: &ActionServices,
    ) -> WorkflowResult<Value> {
        let stored = services
            .entities
            .upsert_custom_field_value(target.field_id, target.entity_id, &target.entity_type, config.value)
            .await?;
        services
            .invalidate(EntityKey::CustomFieldValue {
                field_id: target.field_id,
                entity_id: target.entity_id,
            })
            .await;

        info!(
            "Workflow set custom field {} on {} {}",
            target.field_id, target.entity_type, target.entity_id
        );
        Ok(json!({
            "field_id": target.field_id,
            "entity_id": target.entity_id,
            "entity_type": target.entity_type,
            "value": stored.value,
        }))
    }
}
