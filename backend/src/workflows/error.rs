use uuid::Uuid;

use super::engine::ExecutionStatus;
use crate::services::email::EmailError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow {0} not found")]
    WorkflowNotFound(Uuid),

    #[error("Execution {0} not found")]
    ExecutionNotFound(Uuid),

    #[error("Unsupported action type: {0}")]
    UnsupportedAction(String),

    #[error("Invalid {action_type} config: {reason}")]
    InvalidConfig { action_type: String, reason: String },

    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("{action_type} needs a {entity} id and the trigger does not carry one")]
    MissingTarget { entity: &'static str, action_type: String },

    #[error("{entity} {id} not found")]
    EntityNotFound { entity: &'static str, id: Uuid },

    #[error("Could not resolve recipient: {0}")]
    Recipient(String),

    #[error("Email delivery failed: {0}")]
    Email(#[from] EmailError),

    #[error("Execution {id} is {status}, expected running")]
    InvalidState { id: Uuid, status: ExecutionStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkflowError {
    pub fn invalid_config(action_type: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            action_type: action_type.into(),
            reason: reason.into(),
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
