//! Workflow definitions and loading.
//!
//! Workflows are ordered steps, each calling exactly one public operation of
//! the signal layer, memory store, cluster coordinator, or firewall. They can
//! be built in code or loaded from YAML.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::limits::ExecutionLimits;
use crate::cluster::TaskPriority;
use crate::error::{HarmoniaError, HarmoniaResult};

/// Id of the workflow `submit` runs
pub const DEFAULT_WORKFLOW: &str = "default";

/// Id of the built-in recovery workflow
pub const RECALIBRATION_WORKFLOW: &str = "recalibration";

/// A complete workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow id (used by triggers and webhooks)
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_category")]
    pub category: String,

    /// Limits for this workflow (engine defaults when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ExecutionLimits>,

    /// Ordered list of steps to execute
    pub steps: Vec<Step>,
}

fn default_category() -> String {
    "general".to_string()
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            category: default_category(),
            limits: None,
            steps,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Load a workflow from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a workflow from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse workflow YAML")
    }

    /// Validate the workflow definition
    pub fn validate(&self) -> HarmoniaResult<()> {
        let invalid = |reason: String| HarmoniaError::InvalidWorkflow {
            workflow: self.id.clone(),
            reason,
        };

        if self.id.is_empty() {
            return Err(invalid("workflow id cannot be empty".to_string()));
        }

        if self.steps.is_empty() {
            return Err(invalid("workflow must have at least one step".to_string()));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let step_ids: Vec<&str> = self.steps.iter().map(|s| s.id.as_str()).collect();

        for (i, step) in self.steps.iter().enumerate() {
            if step.id.is_empty() {
                return Err(invalid(format!("step {} has an empty id", i)));
            }

            if !seen.insert(step.id.as_str()) {
                return Err(invalid(format!("duplicate step id '{}'", step.id)));
            }

            if let InputSource::PreviousStep { ref previous_step } = step.input_from {
                match step_ids.iter().position(|&n| n == previous_step) {
                    Some(idx) if idx >= i => {
                        return Err(invalid(format!(
                            "step '{}' references future step '{}' (forward references not allowed)",
                            step.id, previous_step
                        )));
                    }
                    None => {
                        return Err(invalid(format!(
                            "step '{}' references non-existent step '{}'",
                            step.id, previous_step
                        )));
                    }
                    _ => {}
                }
            }
        }

        Ok(())
    }

    /// Get a step by id
    pub fn get_step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// A single step in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Step id (unique within the workflow)
    pub id: String,

    /// Where to get input from
    #[serde(default)]
    pub input_from: InputSource,

    /// Component operation to call
    pub action: StepAction,

    /// Override timeout for this step (uses limits.step_timeout_ms if not set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Step {
    /// A step reading the workflow input
    pub fn new(id: impl Into<String>, action: StepAction) -> Self {
        Self {
            id: id.into(),
            input_from: InputSource::default(),
            action,
            timeout_ms: None,
        }
    }

    /// Read input from an earlier step's output
    pub fn after(mut self, previous_step: impl Into<String>) -> Self {
        self.input_from = InputSource::PreviousStep {
            previous_step: previous_step.into(),
        };
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Get the effective timeout for this step
    pub fn timeout(&self, limits: &ExecutionLimits) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(limits.step_timeout_ms))
    }
}

/// The component operation a step performs
///
/// YAML form: `action: { kind: remember, importance: 0.8 }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    /// Signal layer: turn the input into a frequency-tagged vector
    Harmonize,

    /// Signal layer: harmonize then deliver to resonant peers
    Broadcast {
        #[serde(default)]
        targets: Vec<String>,
    },

    /// Signal layer: nudge the base frequency
    Tune { target_frequency: f64 },

    /// Signal layer: return to the canonical center frequency
    ResetFrequency,

    /// Memory: store the input as a fragment
    Remember {
        #[serde(default = "default_weight")]
        importance: f64,
        #[serde(default = "default_weight")]
        priority: f64,
    },

    /// Memory: retrieve fragments relevant to the input
    Recall {
        #[serde(default = "default_max_results")]
        max_results: usize,
        #[serde(default)]
        min_importance: f64,
    },

    Compress,

    Prune,

    /// Cluster: assign and fan out to worker nodes
    Dispatch {
        #[serde(default)]
        capabilities: Vec<String>,
        #[serde(default)]
        priority: TaskPriority,
    },

    /// Cluster: alignment-weighted vote on the input
    Consensus {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },

    Rebalance,

    /// Firewall: gate the input; a block rejects the execution
    Validate,

    Purify,

    Elevate,

    Recalibrate,
}

fn default_weight() -> f64 {
    0.5
}

fn default_max_results() -> usize {
    10
}

impl StepAction {
    pub fn name(&self) -> &'static str {
        match self {
            StepAction::Harmonize => "harmonize",
            StepAction::Broadcast { .. } => "broadcast",
            StepAction::Tune { .. } => "tune",
            StepAction::ResetFrequency => "reset_frequency",
            StepAction::Remember { .. } => "remember",
            StepAction::Recall { .. } => "recall",
            StepAction::Compress => "compress",
            StepAction::Prune => "prune",
            StepAction::Dispatch { .. } => "dispatch",
            StepAction::Consensus { .. } => "consensus",
            StepAction::Rebalance => "rebalance",
            StepAction::Validate => "validate",
            StepAction::Purify => "purify",
            StepAction::Elevate => "elevate",
            StepAction::Recalibrate => "recalibrate",
        }
    }
}

/// Source of input for a step
///
/// Supports two YAML formats:
/// - Simple: `input_from: pipeline_input`
/// - Previous step: `input_from: { previous_step: step_id }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputSource {
    /// Use the execution's original input (the string "pipeline_input")
    PipelineInput(PipelineInputMarker),

    /// Use output from a previous step
    PreviousStep { previous_step: String },
}

/// Marker for pipeline_input (deserializes from the string "pipeline_input")
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineInputMarker {
    PipelineInput,
}

impl Default for InputSource {
    fn default() -> Self {
        Self::PipelineInput(PipelineInputMarker::PipelineInput)
    }
}

/// harmonize → remember → dispatch → validate
pub fn default_workflow() -> WorkflowDefinition {
    WorkflowDefinition::new(
        DEFAULT_WORKFLOW,
        "Default",
        vec![
            Step::new("harmonize", StepAction::Harmonize),
            Step::new(
                "remember",
                StepAction::Remember {
                    importance: default_weight(),
                    priority: default_weight(),
                },
            )
            .after("harmonize"),
            Step::new(
                "dispatch",
                StepAction::Dispatch {
                    capabilities: vec!["general".to_string()],
                    priority: TaskPriority::Normal,
                },
            )
            .after("remember"),
            Step::new("validate", StepAction::Validate).after("dispatch"),
        ],
    )
    .with_description("Harmonize, remember, dispatch to the cluster and validate the aggregate output")
    .with_category("core")
}

/// Recovery path: recalibrate the firewall, then reset the broadcast frequency
pub fn recalibration_workflow() -> WorkflowDefinition {
    WorkflowDefinition::new(
        RECALIBRATION_WORKFLOW,
        "Recalibration",
        vec![
            Step::new("recalibrate", StepAction::Recalibrate),
            Step::new("reset_frequency", StepAction::ResetFrequency).after("recalibrate"),
        ],
    )
    .with_description("Recalibrate firewall thresholds and reset the broadcast frequency")
    .with_category("maintenance")
}
