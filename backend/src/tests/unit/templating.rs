// Unit tests for token substitution against a seeded store

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;

use taskflow_shared::Task;

use crate::store::EntityStore;
use crate::tests::fixtures;
use crate::tests::helpers::{setup, TestEngine};
use crate::workflows::{ExecutionContext, TriggerConfig, TriggerData};

fn morning() -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 3, 12, 9, 5, 7).single().unwrap()
}

fn context(t: &TestEngine, trigger: TriggerData) -> ExecutionContext {
    let workflow = fixtures::workflow(trigger.project_id, TriggerConfig::Manual {}, Vec::new());
    t.context(workflow, trigger)
}

async fn render(t: &TestEngine, template: &str, ctx: &ExecutionContext, now: DateTime<Local>) -> String {
    t.engine
        .executor()
        .services()
        .templates
        .substitute_at(template, ctx, now)
        .await
}

#[tokio::test]
async fn test_task_tokens() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let assignee = t.seed_user().await;
    let task = Task {
        assigned_to: Some(assignee.id),
        priority: "high".to_string(),
        due_date: NaiveDate::from_ymd_opt(2024, 3, 14),
        ..fixtures::task_titled(project.id, "Paint wall")
    };
    t.store.add_task(task.clone()).await;

    let ctx = context(&t, TriggerData::task_completed(project.id, task.id));
    let now = Utc.with_ymd_and_hms(2024, 3, 12, 12, 0, 0).unwrap().with_timezone(&Local);

    let out = render(
        &t,
        "{{task.title}} ({{task.priority}}) due {{task.due_date}} in {{task.due_in_days}} days, {{task.assigned_to_name}} / {{task.created_by_name}}",
        &ctx,
        now,
    )
    .await;

    assert_eq!(
        out,
        format!("Paint wall (high) due 3/14/2024 in 2 days, {} / Unknown", assignee.full_name)
    );
}

#[tokio::test]
async fn test_unassigned_task_name() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let task = fixtures::task(project.id);
    t.store.add_task(task.clone()).await;

    let ctx = context(&t, TriggerData::task_completed(project.id, task.id));
    let out = render(&t, "{{task.assigned_to_name}}: {{task.due_date}}.", &ctx, morning()).await;
    assert_eq!(out, "Unassigned: .");
}

#[tokio::test]
async fn test_project_and_user_tokens() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let actor = t.seed_user().await;

    let ctx = context(&t, TriggerData::manual(project.id).with_user(actor.id));
    let out = render(
        &t,
        "{{project.name}} is {{project.status}}; run by {{user.name}} <{{user.email}}>",
        &ctx,
        morning(),
    )
    .await;

    assert_eq!(
        out,
        format!("{} is active; run by {} <{}>", project.name, actor.full_name, actor.email)
    );
}

#[tokio::test]
async fn test_trigger_user_is_new_assignee() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let previous = t.seed_user().await;
    let next = t.seed_user().await;
    let task = fixtures::task(project.id);
    t.store.add_task(task.clone()).await;

    let trigger = TriggerData::task_assigned(project.id, task.id, Some(previous.id), Some(next.id));
    let ctx = context(&t, trigger);
    let out = render(
        &t,
        "{{trigger_user.name}} <{{trigger_user.email}}> takes over from {{trigger.from_user}}",
        &ctx,
        morning(),
    )
    .await;

    assert_eq!(
        out,
        format!("{} <{}> takes over from {}", next.full_name, next.email, previous.id)
    );
}

#[tokio::test]
async fn test_clock_tokens() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let ctx = context(&t, TriggerData::manual(project.id));
    let now = morning();

    let out = render(
        &t,
        "{{current_date}}|{{current_time}}|{{current_iso_date}}|{{current_timestamp}}",
        &ctx,
        now,
    )
    .await;

    assert_eq!(
        out,
        format!("3/12/2024|9:05:07 AM|2024-03-12|{}", now.with_timezone(&Utc).to_rfc3339())
    );
}

#[tokio::test]
async fn test_custom_field_tokens() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let task = fixtures::task(project.id);
    t.store.add_task(task.clone()).await;

    let stage = fixtures::custom_field(Some(project.id), "Stage", "task");
    let points = fixtures::custom_field(None, "Points", "task");
    t.store.add_custom_field(stage.clone()).await;
    t.store.add_custom_field(points.clone()).await;
    t.store
        .upsert_custom_field_value(stage.id, task.id, "task", json!("review"))
        .await
        .unwrap();
    t.store
        .upsert_custom_field_value(points.id, task.id, "task", json!(3))
        .await
        .unwrap();

    let ctx = context(&t, TriggerData::task_completed(project.id, task.id));
    let out = render(
        &t,
        "{{custom_field.Stage}}:{{custom_field.Points}}:{{custom_field.Missing}}:",
        &ctx,
        morning(),
    )
    .await;

    // Unknown fields render empty
    assert_eq!(out, "review:3::");
}

#[tokio::test]
async fn test_project_custom_field_without_task() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let budget = fixtures::custom_field(Some(project.id), "Budget", "project");
    t.store.add_custom_field(budget.clone()).await;
    t.store
        .upsert_custom_field_value(budget.id, project.id, "project", json!("5k"))
        .await
        .unwrap();

    let ctx = context(&t, TriggerData::manual(project.id));
    let out = render(&t, "Budget: {{custom_field.Budget}}", &ctx, morning()).await;
    assert_eq!(out, "Budget: 5k");
}

#[tokio::test]
async fn test_trigger_tokens() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let task = fixtures::task(project.id);
    t.store.add_task(task.clone()).await;

    let status = context(
        &t,
        TriggerData::task_status_changed(project.id, task.id, Some("todo"), "in_progress"),
    );
    let out = render(&t, "{{trigger.from_status}} -> {{trigger.to_status}}", &status, morning()).await;
    assert_eq!(out, "todo -> in_progress");

    let upload = context(
        &t,
        TriggerData::file_uploaded(project.id, None, "plan.pdf", Some("application/pdf")),
    );
    let out = render(&t, "{{trigger.file_name}} ({{trigger.file_type}})", &upload, morning()).await;
    assert_eq!(out, "plan.pdf (application/pdf)");
}

#[tokio::test]
async fn test_unknown_tokens_are_left_in_place() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let task = fixtures::task_titled(project.id, "Paint wall");
    t.store.add_task(task.clone()).await;

    let ctx = context(&t, TriggerData::task_completed(project.id, task.id));
    let out = render(
        &t,
        "{{task.title}} {{unknown.token}} {{task.color}} {{trigger.to_status}}",
        &ctx,
        morning(),
    )
    .await;
    assert_eq!(out, "Paint wall {{unknown.token}} {{task.color}} {{trigger.to_status}}");

    // A trigger task that no longer exists leaves its tokens unresolved
    let gone = context(&t, TriggerData::task_completed(project.id, Uuid::new_v4()));
    let out = render(&t, "{{task.title}} in {{project.name}}", &gone, morning()).await;
    assert_eq!(out, format!("{{{{task.title}}}} in {}", project.name));
}
