//! Execution events.
//!
//! Every state change of a workflow execution is recorded as an immutable
//! event in its append-only log. The log a caller reads is the ordered list
//! of event summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single entry in an execution's event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub id: Uuid,

    pub timestamp: DateTime<Utc>,

    /// The execution this event belongs to
    pub execution_id: Uuid,

    /// Step the event concerns (if applicable)
    pub step_id: Option<String>,

    pub event_type: EventType,

    /// Human-readable log line
    pub summary: String,

    /// Time taken in milliseconds (for completed steps)
    pub duration_ms: Option<u64>,

    /// Error message if failed
    pub error: Option<String>,
}

impl ExecutionEvent {
    pub fn new(
        execution_id: Uuid,
        step_id: Option<String>,
        event_type: EventType,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            execution_id,
            step_id,
            event_type,
            summary: summary.into(),
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Failure marker for an execution
    pub fn failed(execution_id: Uuid, step_id: Option<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        let summary = match &step_id {
            Some(step) => format!("FAILED at step '{}': {}", step, error),
            None => format!("FAILED: {}", error),
        };
        Self::new(execution_id, step_id, EventType::ExecutionFailed, summary).with_error(error)
    }

    /// Whether this event ends the execution
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.event_type,
            EventType::ExecutionCompleted
                | EventType::ExecutionFailed
                | EventType::ExecutionRejected
                | EventType::LimitReached
        )
    }
}

/// Types of events recorded during an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ExecutionStarted,

    /// A step completed successfully
    StepCompleted,

    ExecutionCompleted,

    /// A step failed, the execution timed out, or it was abandoned
    ExecutionFailed,

    /// The firewall blocked the final output
    ExecutionRejected,

    /// An execution limit was reached, halting execution
    LimitReached,
}
