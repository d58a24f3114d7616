// Workflow Triggers - Event categories, their per-workflow configuration and event payloads

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Types of events that can trigger workflows
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    // Task triggers
    TaskCreated,
    TaskUpdated,
    TaskStatusChanged,
    TaskAssigned,
    TaskCompleted,
    DueDateApproaching,
    CommentAdded,
    FileUploaded,
    CustomFieldChanged,

    // Project triggers
    ProjectStatusChanged,

    // Time based
    Scheduled,

    Manual,
}

impl TriggerType {
    pub const ALL: [TriggerType; 12] = [
        TriggerType::TaskCreated,
        TriggerType::TaskUpdated,
        TriggerType::TaskStatusChanged,
        TriggerType::TaskAssigned,
        TriggerType::TaskCompleted,
        TriggerType::DueDateApproaching,
        TriggerType::CommentAdded,
        TriggerType::FileUploaded,
        TriggerType::CustomFieldChanged,
        TriggerType::ProjectStatusChanged,
        TriggerType::Scheduled,
        TriggerType::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCreated => "task_created",
            Self::TaskUpdated => "task_updated",
            Self::TaskStatusChanged => "task_status_changed",
            Self::TaskAssigned => "task_assigned",
            Self::TaskCompleted => "task_completed",
            Self::DueDateApproaching => "due_date_approaching",
            Self::CommentAdded => "comment_added",
            Self::FileUploaded => "file_uploaded",
            Self::CustomFieldChanged => "custom_field_changed",
            Self::ProjectStatusChanged => "project_status_changed",
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("unknown trigger type: {0}")]
pub struct UnknownTriggerType(pub String);

impl FromStr for TriggerType {
    type Err = UnknownTriggerType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownTriggerType(s.to_string()))
    }
}

/// How often a `scheduled` workflow fires
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    #[default]
    Daily,
    Weekly,
    Monthly,
    Cron,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Cron => "cron",
        }
    }
}

fn default_schedule_time() -> String {
    "09:00".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub schedule_type: ScheduleKind,
    /// Local wall-clock time, `HH:MM`
    #[serde(default = "default_schedule_time")]
    pub schedule_time: String,
    /// 0 = Sunday .. 6 = Saturday
    #[serde(default)]
    pub days_of_week: Vec<u32>,
    #[serde(default)]
    pub day_of_month: Option<u32>,
    #[serde(default)]
    pub cron_expression: Option<String>,
}

impl ScheduleConfig {
    pub fn daily(schedule_time: &str) -> Self {
        Self {
            schedule_type: ScheduleKind::Daily,
            schedule_time: schedule_time.to_string(),
            days_of_week: Vec::new(),
            day_of_month: None,
            cron_expression: None,
        }
    }

    pub fn weekly(schedule_time: &str, days_of_week: Vec<u32>) -> Self {
        Self {
            schedule_type: ScheduleKind::Weekly,
            days_of_week,
            ..Self::daily(schedule_time)
        }
    }

    pub fn monthly(schedule_time: &str, day_of_month: u32) -> Self {
        Self {
            schedule_type: ScheduleKind::Monthly,
            day_of_month: Some(day_of_month),
            ..Self::daily(schedule_time)
        }
    }

    pub fn time_of_day(&self) -> Option<NaiveTime> {
        parse_time_of_day(&self.schedule_time)
    }
}

fn default_days_before() -> i64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DueDateConfig {
    #[serde(default = "default_days_before")]
    pub days_before: i64,
    #[serde(default)]
    pub priority_filter: Option<Vec<String>>,
    /// Local wall-clock time, `HH:MM`; 09:00 when unset
    #[serde(default)]
    pub time_of_day: Option<String>,
}

impl Default for DueDateConfig {
    fn default() -> Self {
        Self {
            days_before: default_days_before(),
            priority_filter: None,
            time_of_day: None,
        }
    }
}

impl DueDateConfig {
    pub fn time_of_day(&self) -> Option<NaiveTime> {
        parse_time_of_day(self.time_of_day.as_deref().unwrap_or("09:00"))
    }
}

/// Accepts `HH:MM` and `HH:MM:SS`.
pub fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

/// Per-workflow trigger configuration, one variant per trigger type.
///
/// Serialized adjacently tagged so it maps onto the `trigger_type` and
/// `trigger_config` columns. Unset fields act as wildcards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "trigger_type", content = "trigger_config", rename_all = "snake_case")]
pub enum TriggerConfig {
    TaskCreated {
        #[serde(default, with = "optional_uuid")]
        assigned_to: Option<Uuid>,
    },
    TaskUpdated {},
    TaskStatusChanged {
        #[serde(default)]
        from_status: Option<String>,
        #[serde(default)]
        to_status: Option<String>,
    },
    TaskAssigned {
        #[serde(default, with = "optional_uuid")]
        to_user: Option<Uuid>,
    },
    TaskCompleted {},
    DueDateApproaching(DueDateConfig),
    CommentAdded {},
    FileUploaded {
        #[serde(default)]
        file_type: Option<String>,
    },
    CustomFieldChanged {
        #[serde(default, with = "optional_uuid")]
        field_id: Option<Uuid>,
    },
    ProjectStatusChanged {
        #[serde(default)]
        to_status: Option<String>,
    },
    Scheduled(ScheduleConfig),
    Manual {},
}

impl TriggerConfig {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Self::TaskCreated { .. } => TriggerType::TaskCreated,
            Self::TaskUpdated {} => TriggerType::TaskUpdated,
            Self::TaskStatusChanged { .. } => TriggerType::TaskStatusChanged,
            Self::TaskAssigned { .. } => TriggerType::TaskAssigned,
            Self::TaskCompleted {} => TriggerType::TaskCompleted,
            Self::DueDateApproaching(_) => TriggerType::DueDateApproaching,
            Self::CommentAdded {} => TriggerType::CommentAdded,
            Self::FileUploaded { .. } => TriggerType::FileUploaded,
            Self::CustomFieldChanged { .. } => TriggerType::CustomFieldChanged,
            Self::ProjectStatusChanged { .. } => TriggerType::ProjectStatusChanged,
            Self::Scheduled(_) => TriggerType::Scheduled,
            Self::Manual {} => TriggerType::Manual,
        }
    }

    /// Build from the stored column pair. A null config is read as `{}`.
    pub fn from_parts(trigger_type: &str, config: Option<Value>) -> Result<Self, serde_json::Error> {
        let config = match config {
            None | Some(Value::Null) => Value::Object(Default::default()),
            Some(value) => value,
        };
        serde_json::from_value(serde_json::json!({
            "trigger_type": trigger_type,
            "trigger_config": config,
        }))
    }

    pub fn to_parts(&self) -> Result<(TriggerType, Value), serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        let config = value
            .get_mut("trigger_config")
            .map(Value::take)
            .unwrap_or_else(|| Value::Object(Default::default()));
        Ok((self.trigger_type(), config))
    }

    pub fn status_changed_to(to_status: &str) -> Self {
        Self::TaskStatusChanged {
            from_status: None,
            to_status: Some(to_status.to_string()),
        }
    }
}

/// Empty strings coming from form builders mean "any".
pub(crate) mod optional_uuid {
    use serde::{Deserialize, Deserializer, Serializer};
    use uuid::Uuid;

    pub fn serialize<S: Serializer>(value: &Option<Uuid>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(id) => serializer.serialize_some(id),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Uuid>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => Uuid::parse_str(s).map(Some).map_err(serde::de::Error::custom),
        }
    }
}

/// The event half of a trigger: what happened, with the identifiers it carries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "trigger_type", rename_all = "snake_case")]
pub enum TriggerEvent {
    TaskCreated {
        task_id: Uuid,
        #[serde(default)]
        assigned_to: Option<Uuid>,
    },
    TaskUpdated {
        task_id: Uuid,
        #[serde(default)]
        changed_fields: Vec<String>,
    },
    TaskStatusChanged {
        task_id: Uuid,
        #[serde(default)]
        from_status: Option<String>,
        to_status: String,
    },
    TaskAssigned {
        task_id: Uuid,
        #[serde(default)]
        from_user: Option<Uuid>,
        #[serde(default)]
        to_user: Option<Uuid>,
    },
    TaskCompleted {
        task_id: Uuid,
    },
    DueDateApproaching {
        task_id: Uuid,
        due_date: NaiveDate,
        days_before: i64,
    },
    CommentAdded {
        task_id: Uuid,
        comment_id: Uuid,
    },
    FileUploaded {
        #[serde(default)]
        task_id: Option<Uuid>,
        file_name: String,
        #[serde(default)]
        file_type: Option<String>,
    },
    CustomFieldChanged {
        entity_id: Uuid,
        entity_type: String,
        field_id: Uuid,
        #[serde(default)]
        old_value: Value,
        #[serde(default)]
        new_value: Value,
    },
    ProjectStatusChanged {
        #[serde(default)]
        from_status: Option<String>,
        to_status: String,
    },
    Scheduled {
        schedule_type: ScheduleKind,
    },
    Manual {},
}

/// Entity the generic attribute conditions are checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionEntity {
    Task(Uuid),
    Project(Uuid),
}

/// Payload handed to the engine for one evaluation cycle and archived
/// verbatim with every execution it produces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerData {
    pub project_id: Uuid,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Acting user, when the event came from a person
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(flatten)]
    pub event: TriggerEvent,
}

impl TriggerData {
    pub fn new(project_id: Uuid, event: TriggerEvent) -> Self {
        Self {
            project_id,
            timestamp: Utc::now(),
            user_id: None,
            event,
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn task_created(project_id: Uuid, task_id: Uuid, assigned_to: Option<Uuid>) -> Self {
        Self::new(project_id, TriggerEvent::TaskCreated { task_id, assigned_to })
    }

    pub fn task_updated(project_id: Uuid, task_id: Uuid, changed_fields: Vec<String>) -> Self {
        Self::new(project_id, TriggerEvent::TaskUpdated { task_id, changed_fields })
    }

    pub fn task_status_changed(
        project_id: Uuid,
        task_id: Uuid,
        from_status: Option<&str>,
        to_status: &str,
    ) -> Self {
        Self::new(
            project_id,
            TriggerEvent::TaskStatusChanged {
                task_id,
                from_status: from_status.map(str::to_string),
                to_status: to_status.to_string(),
            },
        )
    }

    pub fn task_assigned(
        project_id: Uuid,
        task_id: Uuid,
        from_user: Option<Uuid>,
        to_user: Option<Uuid>,
    ) -> Self {
        Self::new(project_id, TriggerEvent::TaskAssigned { task_id, from_user, to_user })
    }

    pub fn task_completed(project_id: Uuid, task_id: Uuid) -> Self {
        Self::new(project_id, TriggerEvent::TaskCompleted { task_id })
    }

    pub fn due_date_approaching(
        project_id: Uuid,
        task_id: Uuid,
        due_date: NaiveDate,
        days_before: i64,
    ) -> Self {
        Self::new(
            project_id,
            TriggerEvent::DueDateApproaching { task_id, due_date, days_before },
        )
    }

    pub fn comment_added(project_id: Uuid, task_id: Uuid, comment_id: Uuid) -> Self {
        Self::new(project_id, TriggerEvent::CommentAdded { task_id, comment_id })
    }

    pub fn file_uploaded(
        project_id: Uuid,
        task_id: Option<Uuid>,
        file_name: &str,
        file_type: Option<&str>,
    ) -> Self {
        Self::new(
            project_id,
            TriggerEvent::FileUploaded {
                task_id,
                file_name: file_name.to_string(),
                file_type: file_type.map(str::to_string),
            },
        )
    }

    pub fn custom_field_changed(
        project_id: Uuid,
        entity_id: Uuid,
        entity_type: &str,
        field_id: Uuid,
        old_value: Value,
        new_value: Value,
    ) -> Self {
        Self::new(
            project_id,
            TriggerEvent::CustomFieldChanged {
                entity_id,
                entity_type: entity_type.to_string(),
                field_id,
                old_value,
                new_value,
            },
        )
    }

    pub fn project_status_changed(project_id: Uuid, from_status: Option<&str>, to_status: &str) -> Self {
        Self::new(
            project_id,
            TriggerEvent::ProjectStatusChanged {
                from_status: from_status.map(str::to_string),
                to_status: to_status.to_string(),
            },
        )
    }

    pub fn scheduled(project_id: Uuid, schedule_type: ScheduleKind) -> Self {
        Self::new(project_id, TriggerEvent::Scheduled { schedule_type })
    }

    pub fn manual(project_id: Uuid) -> Self {
        Self::new(project_id, TriggerEvent::Manual {})
    }

    pub fn trigger_type(&self) -> TriggerType {
        match &self.event {
            TriggerEvent::TaskCreated { .. } => TriggerType::TaskCreated,
            TriggerEvent::TaskUpdated { .. } => TriggerType::TaskUpdated,
            TriggerEvent::TaskStatusChanged { .. } => TriggerType::TaskStatusChanged,
            TriggerEvent::TaskAssigned { .. } => TriggerType::TaskAssigned,
            TriggerEvent::TaskCompleted { .. } => TriggerType::TaskCompleted,
            TriggerEvent::DueDateApproaching { .. } => TriggerType::DueDateApproaching,
            TriggerEvent::CommentAdded { .. } => TriggerType::CommentAdded,
            TriggerEvent::FileUploaded { .. } => TriggerType::FileUploaded,
            TriggerEvent::CustomFieldChanged { .. } => TriggerType::CustomFieldChanged,
            TriggerEvent::ProjectStatusChanged { .. } => TriggerType::ProjectStatusChanged,
            TriggerEvent::Scheduled { .. } => TriggerType::Scheduled,
            TriggerEvent::Manual {} => TriggerType::Manual,
        }
    }

    /// Task the event is about, if any.
    pub fn task_id(&self) -> Option<Uuid> {
        match &self.event {
            TriggerEvent::TaskCreated { task_id, .. }
            | TriggerEvent::TaskUpdated { task_id, .. }
            | TriggerEvent::TaskStatusChanged { task_id, .. }
            | TriggerEvent::TaskAssigned { task_id, .. }
            | TriggerEvent::TaskCompleted { task_id }
            | TriggerEvent::DueDateApproaching { task_id, .. }
            | TriggerEvent::CommentAdded { task_id, .. } => Some(*task_id),
            TriggerEvent::FileUploaded { task_id, .. } => *task_id,
            TriggerEvent::CustomFieldChanged { entity_id, entity_type, .. } if entity_type == "task" => {
                Some(*entity_id)
            }
            _ => None,
        }
    }

    /// User named by the event itself (new assignee), as opposed to the actor.
    pub fn trigger_user_id(&self) -> Option<Uuid> {
        match &self.event {
            TriggerEvent::TaskAssigned { to_user, .. } => *to_user,
            TriggerEvent::TaskCreated { assigned_to, .. } => *assigned_to,
            _ => None,
        }
    }

    pub fn condition_entity(&self) -> Option<ConditionEntity> {
        match &self.event {
            TriggerEvent::ProjectStatusChanged { .. } => Some(ConditionEntity::Project(self.project_id)),
            TriggerEvent::CustomFieldChanged { entity_id, entity_type, .. } if entity_type == "project" => {
                Some(ConditionEntity::Project(*entity_id))
            }
            _ => self.task_id().map(ConditionEntity::Task),
        }
    }
}
