// Variable substitution for action parameters and the lenient date-expression parser

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use taskflow_shared::{Task, UserProfile};

use super::executor::ExecutionContext;
use super::triggers::TriggerEvent;
use crate::services::cache::EntityCache;
use crate::store::{EntityStore, StoreResult};

static RELATIVE_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-])(\d+)\s*(day|days|hour|hours|week|weeks)$").expect("static regex")
});

static CUSTOM_FIELD_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{custom_field\.([^{}]+?)\}\}").expect("static regex"));

const DISPLAY_DATE: &str = "%-m/%-d/%Y";
const DISPLAY_TIME: &str = "%-I:%M:%S %p";

/// Resolves `{{path.field}}` tokens against the entities a run refers to.
pub struct TemplateEngine {
    entities: Arc<dyn EntityStore>,
    cache: Arc<EntityCache>,
}

impl TemplateEngine {
    pub fn new(entities: Arc<dyn EntityStore>, cache: Arc<EntityCache>) -> Self {
        Self { entities, cache }
    }

    /// Substitute every known token. Never fails: on a lookup error the
    /// template is returned unchanged. Unknown tokens are left in place.
    pub async fn substitute(&self, template: &str, ctx: &ExecutionContext) -> String {
        self.substitute_at(template, ctx, Local::now()).await
    }

    pub async fn substitute_at(
        &self,
        template: &str,
        ctx: &ExecutionContext,
        now: DateTime<Local>,
    ) -> String {
        if !template.contains("{{") {
            return template.to_string();
        }

        match self.render(template, ctx, now).await {
            Ok(rendered) => rendered,
            Err(e) => {
                warn!(
                    "Variable substitution failed for workflow {}: {}",
                    ctx.workflow.id, e
                );
                template.to_string()
            }
        }
    }

    async fn render(
        &self,
        template: &str,
        ctx: &ExecutionContext,
        now: DateTime<Local>,
    ) -> StoreResult<String> {
        let mut out = template.to_string();
        let store = self.entities.as_ref();

        // Task
        if let Some(task_id) = ctx.trigger_data.task_id() {
            if out.contains("{{task.") {
                match self.cache.task(store, task_id).await? {
                    Some(task) => {
                        let tokens = self.task_tokens(&task, &out, now).await?;
                        replace_tokens(&mut out, &tokens);
                    }
                    None => debug!("Task {} not found for substitution", task_id),
                }
            }
        }

        // Project
        if out.contains("{{project.") {
            if let Some(project) = self.cache.project(store, ctx.project_id).await? {
                replace_tokens(
                    &mut out,
                    &[
                        ("project.id", project.id.to_string()),
                        ("project.name", project.name),
                        ("project.description", project.description.unwrap_or_default()),
                        ("project.status", project.status),
                    ],
                );
            }
        }

        // Acting user and the user named by the event
        if out.contains("{{user.") {
            if let Some(user_id) = ctx.user_id {
                if let Some(user) = self.cache.user(store, user_id).await? {
                    replace_tokens(&mut out, &user_tokens("user", &user));
                }
            }
        }
        if out.contains("{{trigger_user.") {
            if let Some(user_id) = ctx.trigger_data.trigger_user_id() {
                if let Some(user) = self.cache.user(store, user_id).await? {
                    replace_tokens(&mut out, &user_tokens("trigger_user", &user));
                }
            }
        }

        // Wall clock
        if out.contains("{{current_") {
            replace_tokens(
                &mut out,
                &[
                    ("current_date", now.format(DISPLAY_DATE).to_string()),
                    ("current_time", now.format(DISPLAY_TIME).to_string()),
                    ("current_timestamp", now.with_timezone(&Utc).to_rfc3339()),
                    ("current_iso_date", now.format("%Y-%m-%d").to_string()),
                ],
            );
        }

        if out.contains("{{custom_field.") {
            let tokens = self.custom_field_tokens(&out, ctx).await?;
            replace_tokens(&mut out, &tokens);
        }

        if out.contains("{{trigger.") {
            replace_tokens(&mut out, &trigger_tokens(&ctx.trigger_data.event));
        }

        Ok(out)
    }

    async fn task_tokens(
        &self,
        task: &Task,
        template: &str,
        now: DateTime<Local>,
    ) -> StoreResult<Vec<(&'static str, String)>> {
        let store = self.entities.as_ref();
        let mut tokens = vec![
            ("task.id", task.id.to_string()),
            ("task.title", task.title.clone()),
            ("task.description", task.description.clone().unwrap_or_default()),
            ("task.status", task.status.clone()),
            ("task.priority", task.priority.clone()),
            (
                "task.due_date",
                task.due_date
                    .map(|d| d.format(DISPLAY_DATE).to_string())
                    .unwrap_or_default(),
            ),
            (
                "task.due_in_days",
                task.due_date
                    .map(|d| due_in_days(d, now.with_timezone(&Utc)).to_string())
                    .unwrap_or_default(),
            ),
        ];

        // Secondary lookups only when the template asks for them
        if template.contains("{{task.assigned_to_name}}") {
            let name = match task.assigned_to {
                Some(id) => self.cache.user(store, id).await?.map(|u| u.full_name),
                None => None,
            };
            tokens.push(("task.assigned_to_name", name.unwrap_or_else(|| "Unassigned".to_string())));
        }
        if template.contains("{{task.created_by_name}}") {
            let name = match task.created_by {
                Some(id) => self.cache.user(store, id).await?.map(|u| u.full_name),
                None => None,
            };
            tokens.push(("task.created_by_name", name.unwrap_or_else(|| "Unknown".to_string())));
        }

        Ok(tokens)
    }

    async fn custom_field_tokens(
        &self,
        template: &str,
        ctx: &ExecutionContext,
    ) -> StoreResult<Vec<(String, String)>> {
        let store = self.entities.as_ref();
        let (entity_type, entity_id) = match ctx.trigger_data.task_id() {
            Some(task_id) => ("task", task_id),
            None => ("project", ctx.project_id),
        };

        let names: BTreeSet<&str> = CUSTOM_FIELD_TOKEN
            .captures_iter(template)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();

        let mut tokens = Vec::with_capacity(names.len());
        for name in names {
            let value = match store
                .find_custom_field(name.trim(), entity_type, ctx.project_id)
                .await?
            {
                Some(definition) => self
                    .cache
                    .custom_field_value(store, definition.id, entity_id, entity_type)
                    .await?
                    .map(|v| v.display_value())
                    .unwrap_or_default(),
                None => String::new(),
            };
            tokens.push((format!("custom_field.{}", name), value));
        }

        Ok(tokens)
    }
}

fn user_tokens(prefix: &str, user: &UserProfile) -> [(String, String); 2] {
    [
        (format!("{}.name", prefix), user.full_name.clone()),
        (format!("{}.email", prefix), user.email.clone()),
    ]
}

fn trigger_tokens(event: &TriggerEvent) -> Vec<(&'static str, String)> {
    match event {
        TriggerEvent::TaskStatusChanged { from_status, to_status, .. }
        | TriggerEvent::ProjectStatusChanged { from_status, to_status } => {
            let mut tokens = vec![("trigger.to_status", to_status.clone())];
            if let Some(from) = from_status {
                tokens.push(("trigger.from_status", from.clone()));
            }
            tokens
        }
        TriggerEvent::FileUploaded { file_name, file_type, .. } => {
            let mut tokens = vec![("trigger.file_name", file_name.clone())];
            if let Some(file_type) = file_type {
                tokens.push(("trigger.file_type", file_type.clone()));
            }
            tokens
        }
        TriggerEvent::TaskAssigned { from_user, to_user, .. } => {
            let mut tokens = Vec::new();
            if let Some(from) = from_user {
                tokens.push(("trigger.from_user", from.to_string()));
            }
            if let Some(to) = to_user {
                tokens.push(("trigger.to_user", to.to_string()));
            }
            tokens
        }
        _ => Vec::new(),
    }
}

/// Literal `{{key}}` replace for each pair.
fn replace_tokens<K: AsRef<str>>(template: &mut String, tokens: &[(K, String)]) {
    for (key, value) in tokens {
        let token = format!("{{{{{}}}}}", key.as_ref());
        if template.contains(&token) {
            *template = template.replace(&token, value);
        }
    }
}

/// Whole days until `due`, rounded up, measured from UTC midnight of the due date.
pub fn due_in_days(due: NaiveDate, now: DateTime<Utc>) -> i64 {
    let due_at = due.and_time(NaiveTime::MIN).and_utc();
    let millis = (due_at - now).num_milliseconds();
    (millis as f64 / 86_400_000.0).ceil() as i64
}

/// Parse a date expression relative to the current time.
pub fn parse_date_expression(expr: &str) -> DateTime<Utc> {
    parse_date_expression_at(expr, Utc::now())
}

/// Accepts `+3 days`, `-2 hours`, `+1 week`, `today`, `tomorrow`, `yesterday`
/// and ISO dates or timestamps. Anything else yields `now`.
pub fn parse_date_expression_at(expr: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let trimmed = expr.trim();
    let lowered = trimmed.to_lowercase();

    if let Some(caps) = RELATIVE_DATE.captures(&lowered) {
        let amount: i64 = caps[2].parse().unwrap_or(0);
        let amount = if &caps[1] == "-" { -amount } else { amount };
        let delta = match &caps[3] {
            "day" | "days" => TimeDelta::try_days(amount),
            "hour" | "hours" => TimeDelta::try_hours(amount),
            _ => TimeDelta::try_weeks(amount),
        };
        return delta
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now);
    }

    match lowered.as_str() {
        "today" | "now" => return now,
        "tomorrow" => return now + TimeDelta::days(1),
        "yesterday" => return now - TimeDelta::days(1),
        _ => {}
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return dt.with_timezone(&Utc);
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return dt.and_utc();
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date.and_time(NaiveTime::MIN).and_utc();
    }

    debug!("Unparseable date expression '{}', using now", expr);
    now
}
