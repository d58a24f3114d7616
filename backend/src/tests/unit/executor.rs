// Unit tests for the action executor and its handlers

use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use taskflow_shared::Task;

use crate::config::EngineConfig;
use crate::services::email::{EmailError, MockEmailSender};
use crate::services::LoggingMailer;
use crate::tests::fixtures;
use crate::tests::helpers::{engine_with, engine_with_mailer, setup, test_config, TestEngine};
use crate::workflows::{ActionType, ExecutionContext, TriggerConfig, TriggerData, WorkflowError};

fn status_context(t: &TestEngine, project_id: Uuid, task_id: Uuid) -> ExecutionContext {
    let workflow = fixtures::workflow(project_id, TriggerConfig::status_changed_to("done"), Vec::new());
    t.context(
        workflow,
        TriggerData::task_status_changed(project_id, task_id, Some("in_progress"), "done"),
    )
}

#[tokio::test]
async fn test_update_task_targets_trigger_task() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let task = fixtures::task(project.id);
    t.store.add_task(task.clone()).await;

    let ctx = status_context(&t, project.id, task.id);
    let action = fixtures::action(ActionType::UpdateTask, json!({ "status": "done", "priority": "high" }));

    let result = t.engine.executor().execute(&action, &ctx).await.unwrap();
    assert_eq!(result.output["task_id"], json!(task.id));

    let stored = t.store.task(task.id).await.unwrap();
    assert_eq!(stored.status, "done");
    assert_eq!(stored.priority, "high");
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn test_update_task_without_fields_fails() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let task = fixtures::task(project.id);
    t.store.add_task(task.clone()).await;

    let ctx = status_context(&t, project.id, task.id);
    let action = fixtures::action(ActionType::UpdateTask, json!({}));

    let err = t.engine.executor().execute(&action, &ctx).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidConfig { .. }));
}

#[tokio::test]
async fn test_update_task_without_target_fails() {
    let t = setup();
    let (project, _) = t.seed_project().await;

    let workflow = fixtures::workflow(project.id, TriggerConfig::Manual {}, Vec::new());
    let ctx = t.context(workflow, TriggerData::manual(project.id));
    let action = fixtures::action(ActionType::UpdateTask, json!({ "status": "done" }));

    let err = t.engine.executor().execute(&action, &ctx).await.unwrap_err();
    assert!(matches!(err, WorkflowError::MissingTarget { entity: "task", .. }));
}

#[tokio::test]
async fn test_create_task_substitutes_and_defaults() {
    let t = setup();
    let (project, owner) = t.seed_project().await;
    let task = fixtures::task_titled(project.id, "Paint wall");
    t.store.add_task(task.clone()).await;

    let ctx = status_context(&t, project.id, task.id);
    let ctx = ExecutionContext {
        user_id: Some(owner.id),
        ..ctx
    };
    let action = fixtures::action(
        ActionType::CreateTask,
        json!({ "title": "Inspect: {{task.title}}", "due_date": "+2 days" }),
    );

    let result = t.engine.executor().execute(&action, &ctx).await.unwrap();
    let created_id: Uuid = serde_json::from_value(result.output["task_id"].clone()).unwrap();

    let created = t.store.task(created_id).await.unwrap();
    assert_eq!(created.title, "Inspect: Paint wall");
    assert_eq!(created.project_id, project.id);
    assert_eq!(created.status, "todo");
    assert_eq!(created.priority, "medium");
    assert_eq!(created.created_by, Some(owner.id));
    assert!(created.due_date.is_some());
}

#[tokio::test]
async fn test_create_task_requires_title() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let workflow = fixtures::workflow(project.id, TriggerConfig::Manual {}, Vec::new());
    let ctx = t.context(workflow, TriggerData::manual(project.id));

    let missing = fixtures::action(ActionType::CreateTask, json!({ "description": "no title" }));
    let err = t.engine.executor().execute(&missing, &ctx).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidConfig { .. }));

    let empty = fixtures::action(ActionType::CreateTask, json!({ "title": "" }));
    let err = t.engine.executor().execute(&empty, &ctx).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Validation(_)));
}

#[tokio::test]
async fn test_send_notification_defaults_to_assignee() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let assignee = t.seed_user().await;
    let task = Task {
        assigned_to: Some(assignee.id),
        ..fixtures::task_titled(project.id, "Paint wall")
    };
    t.store.add_task(task.clone()).await;

    let ctx = status_context(&t, project.id, task.id);
    let action = fixtures::action(
        ActionType::SendNotification,
        json!({ "message": "{{task.title}} is done", "title": "Done" }),
    );

    t.engine.executor().execute(&action, &ctx).await.unwrap();

    let notifications = t.store.notifications().await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].user_id, assignee.id);
    assert_eq!(notifications[0].title, "Done");
    assert_eq!(notifications[0].message, "Paint wall is done");
    assert_eq!(notifications[0].entity_id, Some(task.id));
}

#[tokio::test]
async fn test_send_notification_falls_back_to_creator() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let creator = t.seed_user().await;
    let task = Task {
        created_by: Some(creator.id),
        ..fixtures::task(project.id)
    };
    t.store.add_task(task.clone()).await;

    let ctx = status_context(&t, project.id, task.id);
    let action = fixtures::action(ActionType::SendNotification, json!({ "message": "hello" }));

    t.engine.executor().execute(&action, &ctx).await.unwrap();

    let notifications = t.store.notifications().await;
    assert_eq!(notifications[0].user_id, creator.id);
    // Title defaults to the workflow name
    assert_eq!(notifications[0].title, ctx.workflow.name);
}

#[tokio::test]
async fn test_send_notification_without_recipient_fails() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let task = fixtures::task(project.id);
    t.store.add_task(task.clone()).await;

    let ctx = status_context(&t, project.id, task.id);
    let action = fixtures::action(ActionType::SendNotification, json!({ "message": "hello" }));

    let err = t.engine.executor().execute(&action, &ctx).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Recipient(_)));
    assert!(t.store.notifications().await.is_empty());
}

#[tokio::test]
async fn test_send_notification_recipient_from_token() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let previous = t.seed_user().await;
    let next = t.seed_user().await;
    let task = Task {
        assigned_to: Some(previous.id),
        ..fixtures::task_titled(project.id, "Paint wall")
    };
    t.store.add_task(task.clone()).await;

    let workflow = fixtures::workflow(project.id, TriggerConfig::Manual {}, Vec::new());
    let ctx = t.context(
        workflow,
        TriggerData::task_assigned(project.id, task.id, Some(previous.id), Some(next.id)),
    );
    let action = fixtures::action(
        ActionType::SendNotification,
        json!({ "message": "{{task.title}} is yours", "recipient_id": "{{trigger.to_user}}" }),
    );

    t.engine.executor().execute(&action, &ctx).await.unwrap();

    let notifications = t.store.notifications().await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].user_id, next.id);
    assert_eq!(notifications[0].message, "Paint wall is yours");
}

#[tokio::test]
async fn test_task_id_from_token() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let assignee = t.seed_user().await;
    let task = fixtures::task(project.id);
    t.store.add_task(task.clone()).await;

    let ctx = status_context(&t, project.id, task.id);
    let action = fixtures::action(
        ActionType::AssignToUser,
        json!({ "task_id": "{{task.id}}", "user_id": assignee.id }),
    );

    t.engine.executor().execute(&action, &ctx).await.unwrap();
    assert_eq!(t.store.task(task.id).await.unwrap().assigned_to, Some(assignee.id));
}

#[tokio::test]
async fn test_unresolved_id_token_is_invalid_config() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let task = fixtures::task(project.id);
    t.store.add_task(task.clone()).await;

    // A status change carries no to_user, so the token stays unresolved
    let ctx = status_context(&t, project.id, task.id);
    let action = fixtures::action(
        ActionType::SendNotification,
        json!({ "message": "hello", "recipient_id": "{{trigger.to_user}}" }),
    );

    let err = t.engine.executor().execute(&action, &ctx).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidConfig { .. }));
    assert!(t.store.notifications().await.is_empty());

    let action = fixtures::action(ActionType::AssignToUser, json!({ "user_id": "not-a-user" }));
    let err = t.engine.executor().execute(&action, &ctx).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidConfig { .. }));
}

#[tokio::test]
async fn test_add_comment_is_system_by_default() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let task = fixtures::task_titled(project.id, "Paint wall");
    t.store.add_task(task.clone()).await;

    let ctx = status_context(&t, project.id, task.id);
    let action = fixtures::action(
        ActionType::AddComment,
        json!({ "comment": "Closed: {{task.title}}" }),
    );

    t.engine.executor().execute(&action, &ctx).await.unwrap();

    let comments = t.store.comments().await;
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].task_id, task.id);
    assert!(comments[0].is_system_comment);
    assert_eq!(comments[0].content, "Closed: Paint wall");
}

#[tokio::test]
async fn test_update_custom_field_by_name() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let task = fixtures::task(project.id);
    t.store.add_task(task.clone()).await;
    let field = fixtures::custom_field(Some(project.id), "Stage", "task");
    t.store.add_custom_field(field.clone()).await;

    let ctx = status_context(&t, project.id, task.id);
    let action = fixtures::action(
        ActionType::UpdateCustomField,
        json!({ "field_name": "Stage", "value": "review", "entity_type": "task" }),
    );

    t.engine.executor().execute(&action, &ctx).await.unwrap();

    let values = t.store.custom_field_values().await;
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].field_definition_id, field.id);
    assert_eq!(values[0].entity_id, task.id);
    assert_eq!(values[0].value, json!("review"));
}

#[tokio::test]
async fn test_update_custom_field_unknown_name_fails() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let task = fixtures::task(project.id);
    t.store.add_task(task.clone()).await;

    let ctx = status_context(&t, project.id, task.id);
    let action = fixtures::action(
        ActionType::UpdateCustomField,
        json!({ "field_name": "Missing", "value": 1, "entity_type": "task" }),
    );

    assert!(t.engine.executor().execute(&action, &ctx).await.is_err());
    assert!(t.store.custom_field_values().await.is_empty());
}

#[tokio::test]
async fn test_send_email_resolves_user_address() {
    let assignee = fixtures::user();
    let expected_to = assignee.email.clone();

    let mut mailer = MockEmailSender::new();
    mailer
        .expect_send()
        .withf(move |to, subject, body| *to == expected_to && subject == "Due soon" && body == "Paint wall")
        .times(1)
        .returning(|_, _, _| Ok(()));

    let t = engine_with_mailer(Arc::new(mailer));
    let (project, _) = t.seed_project().await;
    t.store.add_user(assignee.clone()).await;
    let task = Task {
        assigned_to: Some(assignee.id),
        ..fixtures::task_titled(project.id, "Paint wall")
    };
    t.store.add_task(task.clone()).await;

    let ctx = status_context(&t, project.id, task.id);
    let action = fixtures::action(
        ActionType::SendEmail,
        json!({ "subject": "Due soon", "content": "{{task.title}}" }),
    );

    let result = t.engine.executor().execute(&action, &ctx).await.unwrap();
    assert_eq!(result.output["to"], json!(assignee.email));
}

#[tokio::test]
async fn test_send_email_literal_address() {
    let mut mailer = MockEmailSender::new();
    mailer
        .expect_send()
        .withf(|to, _, _| to == "ops@example.com")
        .times(1)
        .returning(|_, _, _| Ok(()));

    let t = engine_with_mailer(Arc::new(mailer));
    let (project, _) = t.seed_project().await;
    let workflow = fixtures::workflow(project.id, TriggerConfig::Manual {}, Vec::new());
    let ctx = t.context(workflow, TriggerData::manual(project.id));

    let action = fixtures::action(
        ActionType::SendEmail,
        json!({ "to": "ops@example.com", "subject": "Weekly", "content": "Report" }),
    );

    t.engine.executor().execute(&action, &ctx).await.unwrap();
}

#[tokio::test]
async fn test_send_email_transport_failure_is_action_error() {
    let mut mailer = MockEmailSender::new();
    mailer.expect_send().times(1).returning(|_, _, _| {
        Err(EmailError::Address(
            "not an address".parse::<lettre::Address>().unwrap_err(),
        ))
    });

    let t = engine_with_mailer(Arc::new(mailer));
    let (project, _) = t.seed_project().await;
    let workflow = fixtures::workflow(project.id, TriggerConfig::Manual {}, Vec::new());
    let ctx = t.context(workflow, TriggerData::manual(project.id));

    let action = fixtures::action(
        ActionType::SendEmail,
        json!({ "to": "ops@example.com", "subject": "Weekly", "content": "Report" }),
    );

    let err = t.engine.executor().execute(&action, &ctx).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Email(_)));
}

#[tokio::test]
async fn test_create_calendar_event_defaults_end_to_start() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let task = fixtures::task(project.id);
    t.store.add_task(task.clone()).await;

    let ctx = status_context(&t, project.id, task.id);
    let action = fixtures::action(
        ActionType::CreateCalendarEvent,
        json!({ "title": "Review", "start_date": "2024-06-01T10:00:00Z" }),
    );

    t.engine.executor().execute(&action, &ctx).await.unwrap();

    let events = t.store.calendar_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].start_date, events[0].end_date);
    assert_eq!(events[0].project_id, project.id);
    assert!(!events[0].all_day);
}

#[tokio::test]
async fn test_create_calendar_event_rejects_end_before_start() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let workflow = fixtures::workflow(project.id, TriggerConfig::Manual {}, Vec::new());
    let ctx = t.context(workflow, TriggerData::manual(project.id));

    let action = fixtures::action(
        ActionType::CreateCalendarEvent,
        json!({
            "title": "Review",
            "start_date": "2024-06-02T10:00:00Z",
            "end_date": "2024-06-01T10:00:00Z"
        }),
    );

    assert!(t.engine.executor().execute(&action, &ctx).await.is_err());
    assert!(t.store.calendar_events().await.is_empty());
}

#[tokio::test]
async fn test_move_and_assign_task() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let (target, _) = t.seed_project().await;
    let assignee = t.seed_user().await;
    let task = fixtures::task(project.id);
    t.store.add_task(task.clone()).await;

    let ctx = status_context(&t, project.id, task.id);

    let move_action = fixtures::action(ActionType::MoveToProject, json!({ "target_project_id": target.id }));
    t.engine.executor().execute(&move_action, &ctx).await.unwrap();

    let assign = fixtures::action(ActionType::AssignToUser, json!({ "user_id": assignee.id }));
    t.engine.executor().execute(&assign, &ctx).await.unwrap();

    let stored = t.store.task(task.id).await.unwrap();
    assert_eq!(stored.project_id, target.id);
    assert_eq!(stored.assigned_to, Some(assignee.id));
}

#[tokio::test]
async fn test_move_to_missing_project_fails() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let task = fixtures::task(project.id);
    t.store.add_task(task.clone()).await;

    let ctx = status_context(&t, project.id, task.id);
    let action = fixtures::action(ActionType::MoveToProject, json!({ "target_project_id": Uuid::new_v4() }));

    assert!(t.engine.executor().execute(&action, &ctx).await.is_err());
    assert_eq!(t.store.task(task.id).await.unwrap().project_id, project.id);
}

#[tokio::test]
async fn test_update_project_status() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let workflow = fixtures::workflow(project.id, TriggerConfig::Manual {}, Vec::new());
    let ctx = t.context(workflow, TriggerData::manual(project.id));

    let action = fixtures::action(ActionType::UpdateProjectStatus, json!({ "status": "on_hold" }));
    t.engine.executor().execute(&action, &ctx).await.unwrap();

    assert_eq!(t.store.project(project.id).await.unwrap().status, "on_hold");
}

#[tokio::test]
async fn test_batch_update_never_exceeds_cap() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    for _ in 0..60 {
        t.store.add_task(fixtures::task(project.id)).await;
    }

    let workflow = fixtures::workflow(project.id, TriggerConfig::Manual {}, Vec::new());
    let ctx = t.context(workflow, TriggerData::manual(project.id));
    let action = fixtures::action(
        ActionType::BatchUpdateTasks,
        json!({ "filter": { "status": "todo" }, "updates": { "priority": "low" }, "limit": 500 }),
    );

    let result = t.engine.executor().execute(&action, &ctx).await.unwrap();
    assert_eq!(result.output["updated"], json!(50));

    let low = t.store.tasks().await.into_iter().filter(|t| t.priority == "low").count();
    assert_eq!(low, 50);
    assert_eq!(t.store.batch_update_calls().await, 1);
}

#[tokio::test]
async fn test_batch_update_respects_smaller_limit_and_filter() {
    let t = engine_with(
        Arc::new(LoggingMailer),
        EngineConfig {
            batch_update_limit: 10,
            ..test_config()
        },
    );
    let (project, _) = t.seed_project().await;
    for i in 0..8 {
        let priority = if i % 2 == 0 { "high" } else { "medium" };
        t.store
            .add_task(fixtures::task_due(project.id, chrono::Utc::now().date_naive(), "todo", priority))
            .await;
    }
    // Another project's tasks are never touched
    let (other, _) = t.seed_project().await;
    t.store
        .add_task(fixtures::task_due(other.id, chrono::Utc::now().date_naive(), "todo", "high"))
        .await;

    let workflow = fixtures::workflow(project.id, TriggerConfig::Manual {}, Vec::new());
    let ctx = t.context(workflow, TriggerData::manual(project.id));
    let action = fixtures::action(
        ActionType::BatchUpdateTasks,
        json!({ "filter": { "priority": ["high"] }, "updates": { "status": "in_progress" }, "limit": 3 }),
    );

    let result = t.engine.executor().execute(&action, &ctx).await.unwrap();
    assert_eq!(result.output["updated"], json!(3));

    let tasks = t.store.tasks().await;
    let moved: Vec<_> = tasks.iter().filter(|t| t.status == "in_progress").collect();
    assert_eq!(moved.len(), 3);
    assert!(moved.iter().all(|t| t.priority == "high" && t.project_id == project.id));
}

#[tokio::test]
async fn test_batch_update_with_no_matches_skips_write() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let workflow = fixtures::workflow(project.id, TriggerConfig::Manual {}, Vec::new());
    let ctx = t.context(workflow, TriggerData::manual(project.id));
    let action = fixtures::action(ActionType::BatchUpdateTasks, json!({ "updates": { "priority": "low" } }));

    let result = t.engine.executor().execute(&action, &ctx).await.unwrap();
    assert_eq!(result.output["updated"], json!(0));
    assert_eq!(t.store.batch_update_calls().await, 0);
}

#[tokio::test]
async fn test_unsupported_action_fails() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let workflow = fixtures::workflow(project.id, TriggerConfig::Manual {}, Vec::new());
    let ctx = t.context(workflow, TriggerData::manual(project.id));

    let action = fixtures::action(ActionType::Other("launch_rocket".to_string()), json!({}));
    assert!(!t.engine.executor().supports(&action.action_type));

    let err = t.engine.executor().execute(&action, &ctx).await.unwrap_err();
    assert!(matches!(err, WorkflowError::UnsupportedAction(kind) if kind == "launch_rocket"));
}

#[test]
fn test_every_supported_kind_is_registered() {
    let t = setup();
    for kind in ActionType::SUPPORTED {
        assert!(t.engine.executor().supports(&kind), "{} not registered", kind);
    }
}
