//! Error taxonomy for the engine.
//!
//! Recoverable, component-local conditions (a single node failing, memory
//! overflow, a consensus round timing out) are handled where they occur and
//! never reach this type. What remains here is what a caller can observe.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by engine components and the orchestrator.
#[derive(Debug, Clone, Error)]
pub enum HarmoniaError {
    /// The firewall blocked the final output of an execution
    #[error("Validation failure: content blocked ({reason})")]
    ValidationFailure { reason: String },

    /// A single worker node failed while executing a task
    #[error("Node '{node_id}' failed: {reason}")]
    NodeFailure { node_id: String, reason: String },

    /// No active node qualifies for the requested task
    #[error("Cluster exhausted: no active node can take task requiring {required:?}")]
    ClusterExhaustion { required: Vec<String> },

    /// Every node assigned to a task failed or timed out
    #[error("All {attempted} assigned nodes failed for task {task_id}")]
    AllNodesFailed { task_id: Uuid, attempted: usize },

    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Node already registered: {0}")]
    DuplicateNode(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// Completed and failed executions are immutable
    #[error("Execution {0} is sealed and cannot be modified")]
    ExecutionSealed(Uuid),

    #[error("Step '{step}' timed out after {timeout_ms}ms")]
    StepTimeout { step: String, timeout_ms: u64 },

    #[error("Invalid workflow '{workflow}': {reason}")]
    InvalidWorkflow { workflow: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result alias used by component operations.
pub type HarmoniaResult<T> = Result<T, HarmoniaError>;

/// Internal firewall failures.
///
/// Scoring failures never leave `validate`; they turn into a `Block`.
#[derive(Debug, Clone, Error)]
pub enum FirewallError {
    #[error("Metric '{metric}' is not a finite number")]
    NonFinite { metric: String },

    #[error("Verdict not found in the learning window: {0}")]
    UnknownVerdict(Uuid),
}
