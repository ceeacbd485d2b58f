//! Workflow executions and their reconstruction from events.
//!
//! A WorkflowExecution is a single run of a workflow definition. Its state
//! is a fold over its events.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::content::Content;
use super::events::{EventType, ExecutionEvent};
use super::output::StepOutput;

/// How an execution was started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    #[default]
    Manual,
    Webhook,
    Scheduled,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerKind::Manual => write!(f, "manual"),
            TriggerKind::Webhook => write!(f, "webhook"),
            TriggerKind::Scheduled => write!(f, "scheduled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

/// A single execution of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,

    pub workflow_id: String,

    pub workflow_name: String,

    pub trigger: TriggerKind,

    pub status: ExecutionStatus,

    pub input: Content,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    /// Number of steps completed
    pub current_step: usize,

    /// Ordered event log
    pub events: Vec<ExecutionEvent>,

    /// Outputs of completed steps, keyed by step id
    pub outputs: BTreeMap<String, StepOutput>,

    /// Final content; absent unless the execution completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Content>,

    /// The firewall blocked the final output
    #[serde(default)]
    pub rejected: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkflowExecution {
    pub fn new(
        workflow_id: impl Into<String>,
        workflow_name: impl Into<String>,
        trigger: TriggerKind,
        input: Content,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            trigger,
            status: ExecutionStatus::Pending,
            input,
            started_at: Utc::now(),
            completed_at: None,
            current_step: 0,
            events: Vec::new(),
            outputs: BTreeMap::new(),
            result: None,
            rejected: false,
            error: None,
        }
    }

    /// Reconstruct execution state from a sequence of events
    pub fn from_events(
        workflow_id: impl Into<String>,
        workflow_name: impl Into<String>,
        trigger: TriggerKind,
        input: Content,
        events: &[ExecutionEvent],
    ) -> Option<Self> {
        let first = events.first()?;
        let mut execution = Self::new(workflow_id, workflow_name, trigger, input);
        execution.id = first.execution_id;
        execution.started_at = first.timestamp;

        for event in events {
            execution.apply_event(event);
        }
        Some(execution)
    }

    /// Apply a single event to update execution state
    pub fn apply_event(&mut self, event: &ExecutionEvent) {
        match event.event_type {
            EventType::ExecutionStarted => {
                self.status = ExecutionStatus::Running;
                self.started_at = event.timestamp;
            }
            EventType::StepCompleted => {
                self.current_step += 1;
            }
            EventType::ExecutionCompleted => {
                self.status = ExecutionStatus::Completed;
                self.completed_at = Some(event.timestamp);
            }
            EventType::ExecutionFailed | EventType::LimitReached => {
                self.status = ExecutionStatus::Failed;
                self.completed_at = Some(event.timestamp);
                self.error = event.error.clone();
                self.result = None;
            }
            EventType::ExecutionRejected => {
                self.status = ExecutionStatus::Failed;
                self.completed_at = Some(event.timestamp);
                self.error = event.error.clone();
                self.rejected = true;
                self.result = None;
            }
        }
        self.events.push(event.clone());
    }

    /// The human-readable log, one line per event
    pub fn log(&self) -> Vec<String> {
        self.events.iter().map(|e| e.summary.clone()).collect()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, ExecutionStatus::Pending | ExecutionStatus::Running)
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_step_completed(&self, step_id: &str) -> bool {
        self.outputs.contains_key(step_id)
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_creation() {
        let execution = WorkflowExecution::new("default", "Default", TriggerKind::Manual, Content::text("x"));
        assert_eq!(execution.status, ExecutionStatus::Pending);
        assert!(execution.is_running());
        assert!(execution.result.is_none());
    }

    #[test]
    fn test_execution_from_events() {
        let id = Uuid::new_v4();
        let events = vec![
            ExecutionEvent::new(id, None, EventType::ExecutionStarted, "started"),
            ExecutionEvent::new(id, Some("a".to_string()), EventType::StepCompleted, "step 'a' completed"),
            ExecutionEvent::failed(id, Some("b".to_string()), "boom"),
        ];

        let execution =
            WorkflowExecution::from_events("w", "W", TriggerKind::Manual, Content::text("x"), &events).unwrap();
        assert_eq!(execution.id, id);
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.current_step, 1);
        assert_eq!(execution.error, Some("boom".to_string()));
        assert_eq!(execution.log().len(), 3);
    }

    #[test]
    fn test_failed_execution_serializes_without_result() {
        let mut execution = WorkflowExecution::new("w", "W", TriggerKind::Webhook, Content::text("x"));
        execution.apply_event(&ExecutionEvent::failed(execution.id, None, "abandoned"));
        let json = serde_json::to_value(&execution).unwrap();
        assert!(json.get("result").is_none());
        assert_eq!(json["trigger"], "webhook");
    }
}
