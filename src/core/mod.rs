//! Workflow orchestration.
//!
//! This module contains:
//! - Workflow: workflow definitions and loading
//! - Limits: execution limits and enforcement
//! - ExecutionStore: bounded, append-only execution records
//! - Orchestrator: main execution engine
//! - Scheduler: periodic maintenance and scheduled triggers

pub mod execution_store;
pub mod limits;
pub mod orchestrator;
pub mod scheduler;
pub mod workflow;

// Re-export commonly used types
pub use execution_store::{ExecutionStore, StatusCounts};
pub use limits::{ExecutionLimits, ExecutionTracker, LimitViolation};
pub use orchestrator::{ExecutionResult, Orchestrator, OrchestratorConfig, WorkflowStatus};
pub use scheduler::{ScheduleConfig, Scheduler};
pub use workflow::{
    default_workflow, recalibration_workflow, InputSource, PipelineInputMarker, Step, StepAction,
    WorkflowDefinition, DEFAULT_WORKFLOW, RECALIBRATION_WORKFLOW,
};
