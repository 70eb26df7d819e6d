use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::pipeline::{RunOutcome, RunReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    PartialSuccess,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::PartialSuccess | TaskState::Failed
        )
    }
}

impl From<RunOutcome> for TaskState {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Succeeded => TaskState::Succeeded,
            RunOutcome::PartialSuccess => TaskState::PartialSuccess,
            RunOutcome::Failed => TaskState::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trigger {
    Scheduled,
    Manual,
}

/// One refresh of one tracked item.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshTask {
    pub id: u64,
    pub item: String,
    pub trigger: Trigger,
    pub state: TaskState,
    pub attempts: BTreeMap<String, u32>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub report: Option<RunReport>,
}

impl RefreshTask {
    pub fn new(id: u64, item: &str, trigger: Trigger, now: DateTime<Utc>) -> Self {
        Self {
            id,
            item: item.to_string(),
            trigger,
            state: TaskState::Pending,
            attempts: BTreeMap::new(),
            scheduled_at: now,
            started_at: None,
            finished_at: None,
            report: None,
        }
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != TaskState::Pending {
            return Err(self.illegal(TaskState::Running));
        }
        self.state = TaskState::Running;
        self.started_at = Some(now);
        Ok(())
    }

    /// Move to the terminal state matching the report and attach it.
    pub fn finish(&mut self, report: RunReport, now: DateTime<Utc>) -> Result<()> {
        let next = TaskState::from(report.outcome);
        if self.state != TaskState::Running {
            return Err(self.illegal(next));
        }
        self.state = next;
        self.attempts = report.attempts();
        self.finished_at = Some(now);
        self.report = Some(report);
        Ok(())
    }

    fn illegal(&self, to: TaskState) -> Error {
        Error::InvalidTransition(format!(
            "task {} for {}: {:?} -> {:?}",
            self.id, self.item, self.state, to
        ))
    }
}
