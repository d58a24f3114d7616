// Job Scheduler - registers the workflow sweeps with tokio-cron-scheduler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::env;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{info, warn};
use uuid::Uuid;

use super::{DueDateJob, ScheduledJob};
use crate::workflows::WorkflowEngine;

const MAX_RUN_LOGS: usize = 100;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobConfig {
    pub enabled: bool,
    /// Six-field cron expression (with seconds)
    pub due_date_cron: String,
    pub scheduled_cron: String,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // Every 5 minutes, well inside the 15 minute slot window
            due_date_cron: "0 */5 * * * *".to_string(),
            scheduled_cron: "0 */5 * * * *".to_string(),
        }
    }
}

impl JobConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env::var("JOBS_ENABLED")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.enabled),
            due_date_cron: env::var("JOBS_DUE_DATE_CRON").unwrap_or(defaults.due_date_cron),
            scheduled_cron: env::var("JOBS_SCHEDULED_CRON").unwrap_or(defaults.scheduled_cron),
        }
    }
}

/// Summary of one sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SweepResult {
    pub workflows_checked: usize,
    /// Workflows whose slot and schedule made them eligible this tick
    pub workflows_due: usize,
    pub executions: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sweep {
    DueDate,
    Scheduled,
}

impl Sweep {
    pub fn name(&self) -> &'static str {
        match self {
            Self::DueDate => "Due date sweep",
            Self::Scheduled => "Scheduled workflow sweep",
        }
    }

    pub async fn run(self, engine: Arc<WorkflowEngine>) -> SweepResult {
        match self {
            Self::DueDate => DueDateJob::new(engine).run().await,
            Self::Scheduled => ScheduledJob::new(engine).run().await,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobStatus {
    Completed,
    PartialFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRunLog {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: JobStatus,
    pub items_processed: usize,
    pub errors: Vec<String>,
    pub duration_ms: i64,
}

pub struct JobScheduler {
    scheduler: TokioScheduler,
    engine: Arc<WorkflowEngine>,
    config: JobConfig,
    run_logs: Arc<RwLock<VecDeque<JobRunLog>>>,
}

impl JobScheduler {
    pub async fn new(engine: Arc<WorkflowEngine>, config: JobConfig) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            engine,
            config,
            run_logs: Arc::new(RwLock::new(VecDeque::new())),
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        if !self.config.enabled {
            info!("Background jobs are disabled");
            return Ok(());
        }

        info!("Starting workflow job scheduler");

        self.schedule(Sweep::DueDate, &self.config.due_date_cron).await?;
        self.schedule(Sweep::Scheduled, &self.config.scheduled_cron).await?;

        self.scheduler.start().await?;

        info!("Workflow job scheduler started");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("Shutting down workflow job scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    /// Most recent sweep runs, oldest first.
    pub async fn recent_runs(&self) -> Vec<JobRunLog> {
        self.run_logs.read().await.iter().cloned().collect()
    }

    async fn schedule(&self, sweep: Sweep, cron_expr: &str) -> JobResult<()> {
        let engine = self.engine.clone();
        let logs = self.run_logs.clone();

        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let engine = engine.clone();
            let logs = logs.clone();

            Box::pin(async move {
                let started_at = Utc::now();
                let result = sweep.run(engine).await;
                let completed_at = Utc::now();

                if !result.errors.is_empty() {
                    warn!(
                        "{} finished with {} error(s): {:?}",
                        sweep.name(),
                        result.errors.len(),
                        result.errors
                    );
                }

                let log = JobRunLog {
                    id: Uuid::new_v4(),
                    job_name: sweep.name().to_string(),
                    started_at,
                    completed_at,
                    status: if result.errors.is_empty() {
                        JobStatus::Completed
                    } else {
                        JobStatus::PartialFailure
                    },
                    items_processed: result.executions,
                    errors: result.errors,
                    duration_ms: (completed_at - started_at).num_milliseconds(),
                };

                let mut logs = logs.write().await;
                logs.push_back(log);
                while logs.len() > MAX_RUN_LOGS {
                    logs.pop_front();
                }
            })
        })
        .map_err(|e| JobError::ConfigError(format!("{} cron '{}': {}", sweep.name(), cron_expr, e)))?;

        self.scheduler.add(job).await?;
        info!("Scheduled {} with cron '{}'", sweep.name(), cron_expr);

        Ok(())
    }
}
