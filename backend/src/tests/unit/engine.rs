// Unit tests for workflow orchestration

use chrono::{TimeDelta, Utc};
use serde_json::json;
use uuid::Uuid;

use taskflow_shared::Task;

use crate::tests::fixtures;
use crate::tests::helpers::setup;
use crate::workflows::{
    Action, ActionType, AttributeConditions, ExecutionStatus, TriggerConfig, TriggerData, TriggerType, WorkflowDefinition,
    WorkflowError, WorkflowExecution,
};

fn comment(text: &str) -> Action {
    fixtures::action(ActionType::AddComment, json!({ "comment": text }))
}

#[tokio::test]
async fn test_inactive_workflow_never_runs() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let task = fixtures::task(project.id);
    t.store.add_task(task.clone()).await;

    let workflow = WorkflowDefinition {
        is_active: false,
        ..fixtures::workflow(project.id, TriggerConfig::status_changed_to("done"), vec![comment("done")])
    };
    t.store.add_workflow(workflow).await;

    let trigger = TriggerData::task_status_changed(project.id, task.id, None, "done");
    let executions = t.engine.evaluate_workflows(&trigger).await;

    assert!(executions.is_empty());
    assert!(t.store.executions().await.is_empty());
    assert!(t.store.comments().await.is_empty());
}

#[tokio::test]
async fn test_status_filter_must_match() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let task = fixtures::task(project.id);
    t.store.add_task(task.clone()).await;

    let workflow = fixtures::workflow(project.id, TriggerConfig::status_changed_to("done"), vec![comment("done")]);
    let workflow_id = t.store.add_workflow(workflow).await;

    let in_progress = TriggerData::task_status_changed(project.id, task.id, Some("todo"), "in_progress");
    assert!(t.engine.evaluate_workflows(&in_progress).await.is_empty());

    let done = TriggerData::task_status_changed(project.id, task.id, Some("in_progress"), "done");
    let executions = t.engine.evaluate_workflows(&done).await;
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].workflow_id, workflow_id);
    assert_eq!(executions[0].status, ExecutionStatus::Success);
}

#[tokio::test]
async fn test_other_projects_and_types_are_ignored() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let (other, _) = t.seed_project().await;
    let task = fixtures::task(project.id);
    t.store.add_task(task.clone()).await;

    t.store
        .add_workflow(fixtures::workflow(other.id, TriggerConfig::status_changed_to("done"), vec![comment("x")]))
        .await;
    t.store
        .add_workflow(fixtures::workflow(project.id, TriggerConfig::TaskCompleted {}, vec![comment("x")]))
        .await;

    let trigger = TriggerData::task_status_changed(project.id, task.id, None, "done");
    assert!(t.engine.evaluate_workflows(&trigger).await.is_empty());
}

#[tokio::test]
async fn test_failing_action_makes_run_partial() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let task = fixtures::task(project.id);
    t.store.add_task(task.clone()).await;

    let a1 = comment("first").with_name("a1");
    let a2 = fixtures::action(ActionType::Other("explode".to_string()), json!({})).with_name("a2");
    let a3 = comment("third").with_name("a3");
    let workflow = fixtures::workflow(
        project.id,
        TriggerConfig::TaskCompleted {},
        vec![a1.clone(), a2, a3.clone()],
    );
    t.store.add_workflow(workflow).await;

    let executions = t
        .engine
        .evaluate_workflows(&TriggerData::task_completed(project.id, task.id))
        .await;

    assert_eq!(executions.len(), 1);
    let execution = &executions[0];
    assert_eq!(execution.status, ExecutionStatus::Partial);
    assert_eq!(execution.executed_actions, vec![a1, a3]);
    assert!(execution.error_message.as_deref().unwrap().contains("a2"));

    let comments: Vec<String> = t.store.comments().await.into_iter().map(|c| c.content).collect();
    assert_eq!(comments, vec!["first".to_string(), "third".to_string()]);
}

#[tokio::test]
async fn test_only_first_error_is_kept() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let workflow = fixtures::workflow(
        project.id,
        TriggerConfig::Manual {},
        vec![
            fixtures::action(ActionType::Other("first_bad".to_string()), json!({})),
            fixtures::action(ActionType::Other("second_bad".to_string()), json!({})),
        ],
    );
    let id = t.store.add_workflow(workflow).await;

    let execution = t.engine.execute_workflow(id, TriggerData::manual(project.id)).await;
    let message = execution.error_message.unwrap();
    assert!(message.contains("first_bad"));
    assert!(!message.contains("second_bad"));
    assert!(execution.executed_actions.is_empty());
}

#[tokio::test]
async fn test_success_notifies_owner_and_partial_does_not() {
    let t = setup();
    let (project, owner) = t.seed_project().await;
    let task = fixtures::task(project.id);
    t.store.add_task(task.clone()).await;

    let ok = WorkflowDefinition {
        created_by: Some(owner.id),
        ..fixtures::workflow(project.id, TriggerConfig::Manual {}, vec![comment("ok")])
    };
    let ok_id = t.store.add_workflow(ok).await;

    let trigger = TriggerData::manual(project.id);
    let execution = t.engine.execute_workflow(ok_id, trigger.clone()).await;
    // Manual triggers carry no task for the comment
    assert_eq!(execution.status, ExecutionStatus::Partial);
    assert!(t.store.notifications().await.is_empty());

    let good = WorkflowDefinition {
        created_by: Some(owner.id),
        ..fixtures::workflow(
            project.id,
            TriggerConfig::Manual {},
            vec![fixtures::action(ActionType::UpdateProjectStatus, json!({ "status": "review" }))],
        )
    };
    let good_id = t.store.add_workflow(good).await;
    let execution = t.engine.execute_workflow(good_id, trigger).await;
    assert_eq!(execution.status, ExecutionStatus::Success);

    let notifications = t.store.notifications().await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].user_id, owner.id);
    assert_eq!(notifications[0].title, "Workflow completed");
    assert_eq!(notifications[0].metadata["execution_id"], json!(execution.id));
}

#[tokio::test]
async fn test_missing_workflow_records_failed_execution() {
    let t = setup();
    let project_id = Uuid::new_v4();
    let missing = Uuid::new_v4();

    let execution = t.engine.execute_workflow(missing, TriggerData::manual(project_id)).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.workflow_id, missing);
    assert!(execution.executed_actions.is_empty());
    assert_eq!(t.store.executions().await.len(), 1);
    assert!(t.store.notifications().await.is_empty());
}

#[tokio::test]
async fn test_empty_action_list_fails_and_notifies_owner() {
    let t = setup();
    let (project, owner) = t.seed_project().await;
    let workflow = WorkflowDefinition {
        created_by: Some(owner.id),
        ..fixtures::workflow(project.id, TriggerConfig::Manual {}, Vec::new())
    };
    let id = t.store.add_workflow(workflow).await;

    let execution = t.engine.execute_workflow(id, TriggerData::manual(project.id)).await;
    assert_eq!(execution.status, ExecutionStatus::Failed);

    let notifications = t.store.notifications().await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].title, "Workflow failed");
}

#[tokio::test]
async fn test_notification_failure_does_not_abort_run() {
    let t = setup();
    let (project, owner) = t.seed_project().await;
    let task = Task {
        assigned_to: Some(owner.id),
        ..fixtures::task(project.id)
    };
    t.store.add_task(task.clone()).await;
    t.store.set_fail_notifications(true);

    let workflow = WorkflowDefinition {
        created_by: Some(owner.id),
        ..fixtures::workflow(
            project.id,
            TriggerConfig::TaskCompleted {},
            vec![
                fixtures::action(ActionType::SendNotification, json!({ "message": "done" })),
                comment("after"),
            ],
        )
    };
    t.store.add_workflow(workflow).await;

    let executions = t
        .engine
        .evaluate_workflows(&TriggerData::task_completed(project.id, task.id))
        .await;

    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecutionStatus::Partial);
    assert_eq!(executions[0].executed_actions.len(), 1);
    assert_eq!(t.store.comments().await.len(), 1);
}

#[tokio::test]
async fn test_conditions_gate_execution() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let urgent = Task {
        priority: "high".to_string(),
        ..fixtures::task(project.id)
    };
    let routine = fixtures::task(project.id);
    t.store.add_task(urgent.clone()).await;
    t.store.add_task(routine.clone()).await;

    let workflow = WorkflowDefinition {
        conditions: AttributeConditions::priority("high"),
        ..fixtures::workflow(project.id, TriggerConfig::TaskCompleted {}, vec![comment("urgent done")])
    };
    t.store.add_workflow(workflow).await;

    let routine_runs = t
        .engine
        .evaluate_workflows(&TriggerData::task_completed(project.id, routine.id))
        .await;
    assert!(routine_runs.is_empty());

    let urgent_runs = t
        .engine
        .evaluate_workflows(&TriggerData::task_completed(project.id, urgent.id))
        .await;
    assert_eq!(urgent_runs.len(), 1);
}

#[tokio::test]
async fn test_conditions_without_entity_do_not_match() {
    let t = setup();
    let (project, _) = t.seed_project().await;

    let workflow = WorkflowDefinition {
        conditions: AttributeConditions::status("done"),
        ..fixtures::workflow(project.id, TriggerConfig::TaskCompleted {}, vec![comment("x")])
    };
    t.store.add_workflow(workflow).await;

    // Task does not exist
    let trigger = TriggerData::task_completed(project.id, Uuid::new_v4());
    assert!(t.engine.evaluate_workflows(&trigger).await.is_empty());
}

#[tokio::test]
async fn test_independent_workflows_all_run() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let task = fixtures::task(project.id);
    t.store.add_task(task.clone()).await;

    for text in ["one", "two", "three"] {
        t.store
            .add_workflow(fixtures::workflow(project.id, TriggerConfig::TaskCompleted {}, vec![comment(text)]))
            .await;
    }
    t.store
        .add_workflow(fixtures::workflow(
            project.id,
            TriggerConfig::TaskCompleted {},
            vec![fixtures::action(ActionType::Other("broken".to_string()), json!({}))],
        ))
        .await;

    let executions = t
        .engine
        .evaluate_workflows(&TriggerData::task_completed(project.id, task.id))
        .await;

    assert_eq!(executions.len(), 4);
    assert_eq!(
        executions.iter().filter(|e| e.status == ExecutionStatus::Success).count(),
        3
    );
    assert_eq!(t.store.comments().await.len(), 3);
}

#[tokio::test]
async fn test_later_actions_see_earlier_writes() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let task = fixtures::task_titled(project.id, "Draft");
    t.store.add_task(task.clone()).await;

    let workflow = fixtures::workflow(
        project.id,
        TriggerConfig::TaskCompleted {},
        vec![
            comment("before: {{task.title}}"),
            fixtures::action(ActionType::UpdateTask, json!({ "title": "Final" })),
            comment("after: {{task.title}}"),
        ],
    );
    t.store.add_workflow(workflow).await;

    t.engine
        .evaluate_workflows(&TriggerData::task_completed(project.id, task.id))
        .await;

    let comments: Vec<String> = t.store.comments().await.into_iter().map(|c| c.content).collect();
    assert_eq!(comments, vec!["before: Draft".to_string(), "after: Final".to_string()]);
}

fn execution(workflow_id: Uuid, status: ExecutionStatus, minutes_ago: i64) -> WorkflowExecution {
    WorkflowExecution {
        id: Uuid::new_v4(),
        workflow_id,
        trigger_data: TriggerData::manual(Uuid::new_v4()),
        executed_actions: Vec::new(),
        status,
        error_message: None,
        executed_at: Utc::now() - TimeDelta::try_minutes(minutes_ago).unwrap(),
    }
}

#[tokio::test]
async fn test_list_executions_newest_first() {
    let t = setup();
    let workflow_id = Uuid::new_v4();
    let old = t.store.add_execution(execution(workflow_id, ExecutionStatus::Success, 30)).await;
    let new = t.store.add_execution(execution(workflow_id, ExecutionStatus::Failed, 1)).await;
    t.store.add_execution(execution(Uuid::new_v4(), ExecutionStatus::Success, 5)).await;

    let listed = t.engine.list_executions(workflow_id, 10).await.unwrap();
    let ids: Vec<Uuid> = listed.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![new, old]);

    let limited = t.engine.list_executions(workflow_id, 1).await.unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn test_cancel_only_running_executions() {
    let t = setup();
    let workflow_id = Uuid::new_v4();
    let running = t.store.add_execution(execution(workflow_id, ExecutionStatus::Running, 1)).await;
    let finished = t.store.add_execution(execution(workflow_id, ExecutionStatus::Success, 1)).await;

    let cancelled = t.engine.cancel_execution(running).await.unwrap();
    assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
    assert_eq!(
        t.engine.get_execution(running).await.unwrap().status,
        ExecutionStatus::Cancelled
    );

    let err = t.engine.cancel_execution(finished).await.unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidState { status: ExecutionStatus::Success, .. }));
}

#[tokio::test]
async fn test_retry_reuses_archived_trigger() {
    let t = setup();
    let (project, _) = t.seed_project().await;
    let task = fixtures::task(project.id);
    t.store.add_task(task.clone()).await;

    let workflow = fixtures::workflow(project.id, TriggerConfig::TaskCompleted {}, vec![comment("again")]);
    t.store.add_workflow(workflow).await;

    let first = t
        .engine
        .evaluate_workflows(&TriggerData::task_completed(project.id, task.id))
        .await
        .remove(0);
    let retried = t.engine.retry_execution(first.id).await.unwrap();

    assert_ne!(retried.id, first.id);
    assert_eq!(retried.trigger_data, first.trigger_data);
    assert_eq!(retried.status, ExecutionStatus::Success);
    assert_eq!(t.store.executions().await.len(), 2);
    assert_eq!(t.store.comments().await.len(), 2);
}

#[tokio::test]
async fn test_delete_execution() {
    let t = setup();
    let id = t.store.add_execution(execution(Uuid::new_v4(), ExecutionStatus::Failed, 1)).await;

    t.engine.delete_execution(id).await.unwrap();
    assert!(matches!(
        t.engine.delete_execution(id).await,
        Err(WorkflowError::ExecutionNotFound(_))
    ));
    assert!(matches!(
        t.engine.get_execution(id).await,
        Err(WorkflowError::ExecutionNotFound(_))
    ));
}

#[tokio::test]
async fn test_active_workflow_cache_is_invalidated() {
    let t = setup();
    let (project, _) = t.seed_project().await;

    t.store
        .add_workflow(fixtures::workflow(project.id, TriggerConfig::Manual {}, vec![comment("x")]))
        .await;
    assert_eq!(t.engine.active_workflows(TriggerType::Manual).await.unwrap().len(), 1);

    t.store
        .add_workflow(fixtures::workflow(project.id, TriggerConfig::Manual {}, vec![comment("y")]))
        .await;
    // Stale until invalidated
    assert_eq!(t.engine.active_workflows(TriggerType::Manual).await.unwrap().len(), 1);

    t.engine.invalidate_active_workflows(TriggerType::Manual).await;
    assert_eq!(t.engine.active_workflows(TriggerType::Manual).await.unwrap().len(), 2);
}
