// Workflow Engine - matching, orchestration and the execution record

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::actions::Action;
use super::conditions::AttributeConditions;
use super::error::{WorkflowError, WorkflowResult};
use super::executor::{ActionExecutor, ActionServices, ExecutionContext};
use super::matcher::matches_trigger_config;
use super::templating::TemplateEngine;
use super::triggers::{ConditionEntity, TriggerConfig, TriggerData, TriggerType};
use crate::config::EngineConfig;
use crate::services::cache::{EntityCache, TtlCache};
use crate::services::email::EmailSender;
use crate::store::{EntityStore, ExecutionStore, NotificationSink, WorkflowStore};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub conditions: AttributeConditions,
    pub actions: Vec<Action>,
    pub created_by: Option<Uuid>,
    pub last_executed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkflowDefinition {
    pub fn new(project_id: Uuid, name: &str, trigger: TriggerConfig, actions: Vec<Action>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            name: name.to_string(),
            description: None,
            is_active: true,
            trigger,
            conditions: AttributeConditions::default(),
            actions,
            created_by: None,
            last_executed: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn trigger_type(&self) -> TriggerType {
        self.trigger.trigger_type()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Partial,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown execution status: {}", other)),
        }
    }
}

/// One persisted record per workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub trigger_data: TriggerData,
    /// Actions that completed, in definition order
    pub executed_actions: Vec<Action>,
    pub status: ExecutionStatus,
    pub error_message: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// Data access collaborators of the engine.
#[derive(Clone)]
pub struct Stores {
    pub workflows: Arc<dyn WorkflowStore>,
    pub entities: Arc<dyn EntityStore>,
    pub executions: Arc<dyn ExecutionStore>,
    pub notifier: Arc<dyn NotificationSink>,
}

impl Stores {
    /// All four seams served by one backing store.
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: WorkflowStore + EntityStore + ExecutionStore + NotificationSink + 'static,
    {
        Self {
            workflows: store.clone(),
            entities: store.clone(),
            executions: store.clone(),
            notifier: store,
        }
    }
}

pub struct WorkflowEngine {
    stores: Stores,
    cache: Arc<EntityCache>,
    active_workflows: TtlCache<TriggerType, Vec<Arc<WorkflowDefinition>>>,
    executor: ActionExecutor,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(stores: Stores, mailer: Arc<dyn EmailSender>, config: EngineConfig) -> Self {
        let ttl = Duration::from_secs(config.cache_ttl_secs);
        let cache = Arc::new(EntityCache::new(ttl));

        let services = ActionServices {
            entities: stores.entities.clone(),
            cache: cache.clone(),
            templates: TemplateEngine::new(stores.entities.clone(), cache.clone()),
            notifier: stores.notifier.clone(),
            mailer,
            batch_update_limit: config.batch_update_limit,
        };

        Self {
            executor: ActionExecutor::new(services),
            active_workflows: TtlCache::new(ttl),
            stores,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        &self.cache
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Run every active workflow of the event's project and type whose
    /// trigger filter and attribute conditions accept the event.
    ///
    /// Matching workflows run concurrently and independently; a failure in
    /// one never prevents the others.
    pub async fn evaluate_workflows(&self, trigger: &TriggerData) -> Vec<WorkflowExecution> {
        let trigger_type = trigger.trigger_type();

        let candidates = match self
            .stores
            .workflows
            .list(Some(trigger.project_id), trigger_type, true)
            .await
        {
            Ok(workflows) => workflows,
            Err(e) => {
                error!(
                    "Failed to load {} workflows for project {}: {}",
                    trigger_type, trigger.project_id, e
                );
                return Vec::new();
            }
        };

        let mut matched = Vec::new();
        for workflow in candidates {
            if !workflow.is_active {
                continue;
            }
            if !matches_trigger_config(&workflow.trigger, trigger) {
                debug!("Workflow '{}' skipped by trigger filter", workflow.name);
                continue;
            }
            if !self.conditions_pass(&workflow, trigger).await {
                debug!("Workflow '{}' skipped by conditions", workflow.name);
                continue;
            }
            matched.push(Arc::new(workflow));
        }

        info!(
            "Event {} in project {} matched {} workflow(s)",
            trigger_type,
            trigger.project_id,
            matched.len()
        );

        join_all(matched.into_iter().map(|wf| self.run(wf, trigger.clone()))).await
    }

    /// Generic attribute conditions. With conditions declared but no
    /// resolvable entity the workflow does not match.
    async fn conditions_pass(&self, workflow: &WorkflowDefinition, trigger: &TriggerData) -> bool {
        if workflow.conditions.is_empty() {
            return true;
        }

        let store = self.stores.entities.as_ref();
        let entity = match trigger.condition_entity() {
            Some(ConditionEntity::Task(id)) => self
                .cache
                .task(store, id)
                .await
                .map(|t| t.and_then(|t| serde_json::to_value(t).ok())),
            Some(ConditionEntity::Project(id)) => self
                .cache
                .project(store, id)
                .await
                .map(|p| p.and_then(|p| serde_json::to_value(p).ok())),
            None => Ok(None),
        };

        match entity {
            Ok(Some(value)) => {
                let failing = workflow.conditions.failing(&value);
                if !failing.is_empty() {
                    debug!("Workflow '{}' conditions not met: {:?}", workflow.name, failing);
                }
                failing.is_empty()
            }
            Ok(None) => {
                debug!(
                    "Workflow '{}' has conditions but the trigger entity could not be resolved",
                    workflow.name
                );
                false
            }
            Err(e) => {
                warn!("Condition lookup failed for workflow '{}': {}", workflow.name, e);
                false
            }
        }
    }

    /// Load a workflow by id and run it with the given trigger data.
    ///
    /// Always yields exactly one recorded execution. Used for manual runs,
    /// retries and the scheduler.
    pub async fn execute_workflow(&self, workflow_id: Uuid, trigger: TriggerData) -> WorkflowExecution {
        match self.stores.workflows.get(workflow_id).await {
            Ok(Some(workflow)) => self.run(Arc::new(workflow), trigger).await,
            Ok(None) => {
                warn!("Workflow {} not found", workflow_id);
                let message = WorkflowError::WorkflowNotFound(workflow_id).to_string();
                self.record(None, failed_execution(workflow_id, trigger, message)).await
            }
            Err(e) => {
                error!("Failed to load workflow {}: {}", workflow_id, e);
                self.record(None, failed_execution(workflow_id, trigger, e.to_string()))
                    .await
            }
        }
    }

    /// Run a loaded definition. Actions run in order; a failing action marks
    /// the run partial and the next action still runs.
    pub async fn run(&self, workflow: Arc<WorkflowDefinition>, trigger: TriggerData) -> WorkflowExecution {
        let ctx = ExecutionContext::new(workflow.clone(), trigger);
        info!("Running workflow '{}' ({})", workflow.name, workflow.id);

        if workflow.actions.is_empty() {
            let execution = failed_execution(
                workflow.id,
                ctx.trigger_data.clone(),
                "Workflow has no actions".to_string(),
            );
            return self
                .record(Some(&workflow), WorkflowExecution { id: ctx.execution_id, ..execution })
                .await;
        }

        let mut status = ExecutionStatus::Success;
        let mut error_message: Option<String> = None;
        let mut executed_actions = Vec::with_capacity(workflow.actions.len());

        for action in &workflow.actions {
            match self.executor.execute(action, &ctx).await {
                Ok(result) => {
                    debug!(
                        "Action '{}' of workflow '{}' finished in {}ms: {}",
                        action.label(),
                        workflow.name,
                        result.duration_ms,
                        result.output
                    );
                    executed_actions.push(action.clone());
                }
                Err(e) => {
                    warn!(
                        "Action '{}' of workflow '{}' failed: {}",
                        action.label(),
                        workflow.name,
                        e
                    );
                    if status != ExecutionStatus::Failed {
                        status = ExecutionStatus::Partial;
                    }
                    if error_message.is_none() {
                        error_message = Some(format!("Action '{}' failed: {}", action.label(), e));
                    }
                }
            }
        }

        let execution = WorkflowExecution {
            id: ctx.execution_id,
            workflow_id: workflow.id,
            trigger_data: ctx.trigger_data,
            executed_actions,
            status,
            error_message,
            executed_at: Utc::now(),
        };

        self.record(Some(&workflow), execution).await
    }

    async fn record(
        &self,
        workflow: Option<&WorkflowDefinition>,
        execution: WorkflowExecution,
    ) -> WorkflowExecution {
        let execution = match self.stores.executions.insert(execution.clone()).await {
            Ok(saved) => saved,
            Err(e) => {
                error!("Failed to record execution {}: {}", execution.id, e);
                execution
            }
        };

        info!(
            "Workflow {} finished with status {} ({} action(s) executed)",
            execution.workflow_id,
            execution.status,
            execution.executed_actions.len()
        );

        if let Some(workflow) = workflow {
            self.notify_outcome(workflow, &execution).await;
        }

        execution
    }

    /// Tell the workflow owner how a run ended. Partial runs are only logged.
    /// Errors stop here.
    async fn notify_outcome(&self, workflow: &WorkflowDefinition, execution: &WorkflowExecution) {
        let Some(owner) = workflow.created_by else {
            return;
        };

        let (title, message) = match execution.status {
            ExecutionStatus::Success => (
                "Workflow completed".to_string(),
                format!(
                    "Workflow '{}' completed successfully ({} action(s))",
                    workflow.name,
                    execution.executed_actions.len()
                ),
            ),
            ExecutionStatus::Failed => (
                "Workflow failed".to_string(),
                format!(
                    "Workflow '{}' failed: {}",
                    workflow.name,
                    execution.error_message.as_deref().unwrap_or("unknown error")
                ),
            ),
            _ => {
                debug!(
                    "Not notifying owner of workflow '{}' for {} run",
                    workflow.name, execution.status
                );
                return;
            }
        };

        let metadata = serde_json::json!({
            "source": "workflow_engine",
            "workflow_id": workflow.id,
            "execution_id": execution.id,
            "status": execution.status,
        });

        if let Err(e) = self
            .stores
            .notifier
            .send(owner, &title, &message, metadata)
            .await
        {
            warn!("Failed to notify owner of workflow '{}': {}", workflow.name, e);
        }
    }

    /// Active workflows of one type across all projects, via the TTL cache.
    pub async fn active_workflows(&self, trigger_type: TriggerType) -> WorkflowResult<Vec<Arc<WorkflowDefinition>>> {
        if let Some(cached) = self.active_workflows.get(&trigger_type).await {
            return Ok(cached);
        }

        let workflows: Vec<Arc<WorkflowDefinition>> = self
            .stores
            .workflows
            .list(None, trigger_type, true)
            .await?
            .into_iter()
            .filter(|w| w.is_active)
            .map(Arc::new)
            .collect();

        self.active_workflows.put(trigger_type, workflows.clone()).await;
        Ok(workflows)
    }

    pub async fn invalidate_active_workflows(&self, trigger_type: TriggerType) {
        self.active_workflows.invalidate(&trigger_type).await;
    }

    /// Drop every cached entity and workflow list.
    pub async fn invalidate_caches(&self) {
        self.cache.invalidate_all().await;
        self.active_workflows.invalidate_all().await;
    }

    // Execution history

    pub async fn list_executions(&self, workflow_id: Uuid, limit: i64) -> WorkflowResult<Vec<WorkflowExecution>> {
        let limit = limit.clamp(1, 200);
        Ok(self.stores.executions.list(workflow_id, limit).await?)
    }

    pub async fn get_execution(&self, id: Uuid) -> WorkflowResult<WorkflowExecution> {
        self.stores
            .executions
            .get(id)
            .await?
            .ok_or(WorkflowError::ExecutionNotFound(id))
    }

    /// Re-run the workflow with the archived trigger data. Produces a new execution.
    pub async fn retry_execution(&self, id: Uuid) -> WorkflowResult<WorkflowExecution> {
        let previous = self.get_execution(id).await?;
        info!("Retrying execution {} of workflow {}", id, previous.workflow_id);
        Ok(self
            .execute_workflow(previous.workflow_id, previous.trigger_data)
            .await)
    }

    /// Only a `running` execution can be cancelled.
    pub async fn cancel_execution(&self, id: Uuid) -> WorkflowResult<WorkflowExecution> {
        let mut execution = self.get_execution(id).await?;
        if execution.status != ExecutionStatus::Running {
            return Err(WorkflowError::InvalidState {
                id,
                status: execution.status,
            });
        }

        self.stores
            .executions
            .update_status(id, ExecutionStatus::Cancelled)
            .await?;
        execution.status = ExecutionStatus::Cancelled;
        info!("Execution {} cancelled", id);
        Ok(execution)
    }

    pub async fn delete_execution(&self, id: Uuid) -> WorkflowResult<()> {
        if self.stores.executions.delete(id).await? {
            info!("Execution {} deleted", id);
            Ok(())
        } else {
            Err(WorkflowError::ExecutionNotFound(id))
        }
    }
}

fn failed_execution(workflow_id: Uuid, trigger: TriggerData, message: String) -> WorkflowExecution {
    WorkflowExecution {
        id: Uuid::new_v4(),
        workflow_id,
        trigger_data: trigger,
        executed_actions: Vec::new(),
        status: ExecutionStatus::Failed,
        error_message: Some(message),
        executed_at: Utc::now(),
    }
}
