//! Domain types shared by every component.
//!
//! - Content: the payload sum type
//! - Events: immutable records of execution state changes
//! - Execution: workflow execution state
//! - Output: step outputs

pub mod content;
pub mod events;
pub mod execution;
pub mod output;

pub use content::Content;
pub use events::{EventType, ExecutionEvent};
pub use execution::{ExecutionStatus, TriggerKind, WorkflowExecution};
pub use output::{OutputKind, StepOutput};
