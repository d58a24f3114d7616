// Workflow Actions - Actions that can be executed by workflows

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// Types of actions that workflows can execute
///
/// Stored as a plain string. Anything unrecognised lands in `Other` and is
/// rejected at dispatch time instead of at load time, so one bad action does
/// not hide the rest of the workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActionType {
    // Task actions
    UpdateTask,
    CreateTask,
    MoveToProject,
    AssignToUser,
    BatchUpdateTasks,
    AddComment,
    UpdateCustomField,

    // Notification actions
    SendNotification,
    SendEmail,

    // Calendar actions
    CreateCalendarEvent,

    // Project actions
    UpdateProjectStatus,

    Other(String),
}

impl ActionType {
    pub const SUPPORTED: [ActionType; 11] = [
        ActionType::UpdateTask,
        ActionType::CreateTask,
        ActionType::MoveToProject,
        ActionType::AssignToUser,
        ActionType::BatchUpdateTasks,
        ActionType::AddComment,
        ActionType::UpdateCustomField,
        ActionType::SendNotification,
        ActionType::SendEmail,
        ActionType::CreateCalendarEvent,
        ActionType::UpdateProjectStatus,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Self::UpdateTask => "update_task",
            Self::CreateTask => "create_task",
            Self::MoveToProject => "move_to_project",
            Self::AssignToUser => "assign_to_user",
            Self::BatchUpdateTasks => "batch_update_tasks",
            Self::AddComment => "add_comment",
            Self::UpdateCustomField => "update_custom_field",
            Self::SendNotification => "send_notification",
            Self::SendEmail => "send_email",
            Self::CreateCalendarEvent => "create_calendar_event",
            Self::UpdateProjectStatus => "update_project_status",
            Self::Other(other) => other,
        }
    }
}

impl From<String> for ActionType {
    fn from(value: String) -> Self {
        Self::SUPPORTED
            .into_iter()
            .find(|t| t.as_str() == value)
            .unwrap_or(Self::Other(value))
    }
}

impl From<ActionType> for String {
    fn from(value: ActionType) -> Self {
        match value {
            ActionType::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action to be executed in a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(alias = "type")]
    pub action_type: ActionType,
    #[serde(default = "empty_config")]
    pub config: Value,
}

fn empty_config() -> Value {
    Value::Object(Default::default())
}

impl Action {
    pub fn new(action_type: ActionType, config: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: None,
            action_type,
            config,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Name for logs: the user label when there is one, the kind otherwise.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.action_type.as_str())
    }
}

fn default_true() -> bool {
    true
}

/// Accepts either `"high"` or `["high", "urgent"]`.
fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<String>>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => None,
        Some(OneOrMany::One(s)) if s.trim().is_empty() => None,
        Some(OneOrMany::One(s)) => Some(vec![s]),
        Some(OneOrMany::Many(v)) if v.is_empty() => None,
        Some(OneOrMany::Many(v)) => Some(v),
    })
}

/// Id fields stay text until their tokens are substituted. Blank means unset.
fn blank_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

// Typed configs, one per action kind. Text and id fields may carry `{{tokens}}`;
// date fields take date expressions (`+3 days`, `tomorrow`, ISO dates).

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateTaskConfig {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub task_id: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub assigned_to: Option<String>,
    pub due_date: Option<String>,
    #[validate(length(min = 1))]
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateTaskConfig {
    #[validate(length(min = 1, message = "title is required"))]
    pub title: String,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub assigned_to: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub due_date: Option<String>,
    /// Create in another project instead of the workflow's
    #[serde(default, deserialize_with = "blank_as_none")]
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SendNotificationConfig {
    #[validate(length(min = 1, message = "message is required"))]
    pub message: String,
    pub title: Option<String>,
    /// Defaults to the assignee, then the creator, of the triggering task
    #[serde(default, alias = "user_id", deserialize_with = "blank_as_none")]
    pub recipient_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AddCommentConfig {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub task_id: Option<String>,
    #[validate(length(min = 1, message = "comment is required"))]
    pub comment: String,
    #[serde(default = "default_true")]
    pub is_system_comment: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateCustomFieldConfig {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub field_id: Option<String>,
    pub field_name: Option<String>,
    pub value: Value,
    #[validate(length(min = 1, message = "entity_type is required"))]
    pub entity_type: String,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub entity_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SendEmailConfig {
    /// User id or literal address; defaults to the triggering task's assignee
    #[serde(default, alias = "recipient")]
    pub to: Option<String>,
    #[validate(length(min = 1, message = "subject is required"))]
    pub subject: String,
    #[validate(length(min = 1, message = "content is required"))]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateCalendarEventConfig {
    #[validate(length(min = 1, message = "title is required"))]
    pub title: String,
    pub description: Option<String>,
    #[validate(length(min = 1, message = "start_date is required"))]
    pub start_date: String,
    pub end_date: Option<String>,
    #[serde(default)]
    pub all_day: bool,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MoveToProjectConfig {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub task_id: Option<String>,
    #[validate(length(min = 1, message = "target_project_id is required"))]
    pub target_project_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AssignToUserConfig {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub task_id: Option<String>,
    #[validate(length(min = 1, message = "user_id is required"))]
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateProjectStatusConfig {
    #[serde(default, deserialize_with = "blank_as_none")]
    pub project_id: Option<String>,
    #[validate(length(min = 1, message = "status is required"))]
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchTaskFilter {
    #[serde(default, deserialize_with = "one_or_many")]
    pub status: Option<Vec<String>>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub assigned_to: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub priority: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchTaskUpdates {
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub assigned_to: Option<String>,
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BatchUpdateTasksConfig {
    #[serde(default)]
    pub filter: BatchTaskFilter,
    pub updates: BatchTaskUpdates,
    /// Lowered to the engine-wide cap when larger
    #[validate(range(min = 1))]
    pub limit: Option<i64>,
}
