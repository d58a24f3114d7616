// Due Date Sweep - fires due_date_approaching workflows for open tasks

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeDelta, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use taskflow_shared::{Task, TASK_STATUS_DONE};

use super::{within_window, SweepResult};
use crate::store::TaskFilter;
use crate::workflows::{DueDateConfig, TriggerConfig, TriggerData, TriggerType, WorkflowDefinition, WorkflowEngine};

pub struct DueDateJob {
    engine: Arc<WorkflowEngine>,
}

impl DueDateJob {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }

    pub async fn run(&self) -> SweepResult {
        self.run_at(Local::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Local>) -> SweepResult {
        let mut result = SweepResult::default();

        let workflows = match self.engine.active_workflows(TriggerType::DueDateApproaching).await {
            Ok(workflows) => workflows,
            Err(e) => {
                error!("Failed to load due date workflows: {}", e);
                result.errors.push(e.to_string());
                return result;
            }
        };

        let window = self.engine.config().schedule_window_minutes;
        let mut swept = false;

        for workflow in workflows {
            result.workflows_checked += 1;

            let TriggerConfig::DueDateApproaching(config) = &workflow.trigger else {
                continue;
            };

            let Some(slot) = config.time_of_day() else {
                warn!("Workflow '{}' has an invalid time_of_day", workflow.name);
                continue;
            };
            if !within_window(now.time(), slot, window) {
                debug!("Workflow '{}' is outside its {} slot", workflow.name, slot);
                continue;
            }
            if swept_this_slot(workflow.last_executed, now, slot, window) {
                debug!("Workflow '{}' already swept its {} slot", workflow.name, slot);
                continue;
            }

            let Some(threshold) = threshold_date(now.date_naive(), config.days_before) else {
                warn!(
                    "Workflow '{}' has an out of range days_before: {}",
                    workflow.name, config.days_before
                );
                continue;
            };

            result.workflows_due += 1;

            let tasks = match self
                .engine
                .stores()
                .entities
                .find_tasks(&due_task_filter(&workflow, config, threshold))
                .await
            {
                Ok(tasks) => tasks,
                Err(e) => {
                    error!("Failed to find due tasks for workflow '{}': {}", workflow.name, e);
                    result
                        .errors
                        .push(format!("workflow {}: {}", workflow.id, e));
                    continue;
                }
            };

            // The slot counts as swept even when no task is due
            swept = true;
            if let Err(e) = self
                .engine
                .stores()
                .workflows
                .update_last_executed(workflow.id, now.with_timezone(&Utc))
                .await
            {
                error!("Failed to update last_executed for '{}': {}", workflow.name, e);
                result
                    .errors
                    .push(format!("workflow {}: {}", workflow.id, e));
            }

            if tasks.is_empty() {
                continue;
            }

            info!(
                "Workflow '{}': {} task(s) due on {}",
                workflow.name,
                tasks.len(),
                threshold
            );
            result.executions += self
                .process_tasks(&workflow, &tasks, threshold, config.days_before)
                .await;
        }

        if swept {
            self.engine
                .invalidate_active_workflows(TriggerType::DueDateApproaching)
                .await;
        }

        info!(
            "Due date sweep: {} workflow(s) checked, {} in slot, {} execution(s)",
            result.workflows_checked, result.workflows_due, result.executions
        );
        result
    }

    /// Tasks run concurrently within a batch; batches run one after another.
    async fn process_tasks(
        &self,
        workflow: &WorkflowDefinition,
        tasks: &[Task],
        due_date: NaiveDate,
        days_before: i64,
    ) -> usize {
        let config = self.engine.config();
        let batch_size = config.due_date_batch_size.max(1);
        let delay = Duration::from_millis(config.due_date_batch_delay_ms);

        let mut executions = 0;
        for (i, batch) in tasks.chunks(batch_size).enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let runs = batch.iter().map(|task| {
                let trigger =
                    TriggerData::due_date_approaching(workflow.project_id, task.id, due_date, days_before);
                self.engine.execute_workflow(workflow.id, trigger)
            });
            executions += join_all(runs).await.len();
        }
        executions
    }
}

/// A slot is swept at most once a day, however many ticks land inside its window.
fn swept_this_slot(
    last_executed: Option<DateTime<Utc>>,
    now: DateTime<Local>,
    slot: NaiveTime,
    window_minutes: i64,
) -> bool {
    last_executed
        .map(|at| at.with_timezone(&Local))
        .is_some_and(|last| last.date_naive() == now.date_naive() && within_window(last.time(), slot, window_minutes))
}

fn threshold_date(today: NaiveDate, days_before: i64) -> Option<NaiveDate> {
    TimeDelta::try_days(days_before).and_then(|delta| today.checked_add_signed(delta))
}

fn due_task_filter(workflow: &WorkflowDefinition, config: &DueDateConfig, due_date: NaiveDate) -> TaskFilter {
    TaskFilter {
        project_id: Some(workflow.project_id),
        due_date: Some(due_date),
        exclude_statuses: Some(vec![TASK_STATUS_DONE.to_string()]),
        priorities: config.priority_filter.clone().filter(|p| !p.is_empty()),
        ..Default::default()
    }
}
