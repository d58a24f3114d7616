// Scheduled Workflows - calendar sweep over `scheduled` triggers

use chrono::{DateTime, Datelike, Days, Local, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{within_window, SweepResult};
use crate::workflows::{ScheduleConfig, ScheduleKind, TriggerConfig, TriggerData, TriggerType, WorkflowEngine};

pub struct ScheduledJob {
    engine: Arc<WorkflowEngine>,
}

impl ScheduledJob {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }

    pub async fn run(&self) -> SweepResult {
        self.run_at(Local::now()).await
    }

    pub async fn run_at(&self, now: DateTime<Local>) -> SweepResult {
        let mut result = SweepResult::default();

        let workflows = match self.engine.active_workflows(TriggerType::Scheduled).await {
            Ok(workflows) => workflows,
            Err(e) => {
                error!("Failed to load scheduled workflows: {}", e);
                result.errors.push(e.to_string());
                return result;
            }
        };

        let window = self.engine.config().schedule_window_minutes;
        let mut dispatched = false;

        for workflow in workflows {
            result.workflows_checked += 1;

            let TriggerConfig::Scheduled(config) = &workflow.trigger else {
                continue;
            };
            if !should_execute(config, workflow.last_executed, now, window) {
                debug!("Workflow '{}' is not due", workflow.name);
                continue;
            }

            result.workflows_due += 1;
            info!(
                "Running {} scheduled workflow '{}'",
                config.schedule_type.as_str(),
                workflow.name
            );

            let trigger = TriggerData::scheduled(workflow.project_id, config.schedule_type);
            let execution = self.engine.execute_workflow(workflow.id, trigger).await;
            result.executions += 1;
            dispatched = true;
            debug!("Scheduled run of '{}' ended {}", workflow.name, execution.status);

            // Marks the attempt, whatever the outcome
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
        }

        if dispatched {
            self.engine
                .invalidate_active_workflows(TriggerType::Scheduled)
                .await;
        }

        info!(
            "Scheduled sweep: {} workflow(s) checked, {} executed",
            result.workflows_checked, result.executions
        );
        result
    }
}

/// Decide whether a schedule is eligible at `now`, given when it last ran.
pub fn should_execute(
    config: &ScheduleConfig,
    last_executed: Option<DateTime<Utc>>,
    now: DateTime<Local>,
    window_minutes: i64,
) -> bool {
    if config.schedule_type == ScheduleKind::Cron {
        warn!(
            "Cron schedules are not supported (expression: {:?})",
            config.cron_expression
        );
        return false;
    }

    let Some(slot) = config.time_of_day() else {
        warn!("Invalid schedule_time '{}'", config.schedule_time);
        return false;
    };
    if !within_window(now.time(), slot, window_minutes) {
        return false;
    }

    let today = now.date_naive();
    let last_local = last_executed.map(|at| at.with_timezone(&Local).date_naive());

    match config.schedule_type {
        ScheduleKind::Daily => last_local.is_none_or(|last| last != today),
        ScheduleKind::Weekly => {
            let weekday = now.weekday().num_days_from_sunday();
            if !config.days_of_week.contains(&weekday) {
                return false;
            }
            let Some(week_start) = today.checked_sub_days(Days::new(u64::from(weekday))) else {
                return false;
            };
            last_local.is_none_or(|last| last < week_start)
        }
        ScheduleKind::Monthly => {
            if config.day_of_month != Some(now.day()) {
                return false;
            }
            last_local.is_none_or(|last| (last.year(), last.month()) != (today.year(), today.month()))
        }
        ScheduleKind::Cron => false,
    }
}
