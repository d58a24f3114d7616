// Workflow Automation Engine
//
// Event-driven automation for TaskFlow projects: triggers select workflows,
// conditions gate them, and actions run in order with partial-failure
// bookkeeping.

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod matcher;
pub mod templating;
pub mod triggers;

pub use actions::{Action, ActionType};
pub use conditions::AttributeConditions;
pub use engine::{ExecutionStatus, Stores, WorkflowDefinition, WorkflowEngine, WorkflowExecution};
pub use error::{WorkflowError, WorkflowResult};
pub use executor::{ActionExecutor, ActionHandler, ActionResult, ActionServices, ExecutionContext};
pub use matcher::matches_trigger_config;
pub use templating::{parse_date_expression, parse_date_expression_at, TemplateEngine};
pub use triggers::{
    DueDateConfig, ScheduleConfig, ScheduleKind, TriggerConfig, TriggerData, TriggerEvent, TriggerType,
};
