//! Outputs produced by workflow steps.
//!
//! Each step leaves the content it passes on plus a structured summary of
//! what the component did. Later steps read outputs by step id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::content::Content;

/// The output of one workflow step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutput {
    /// Id of the step that produced this output
    pub step_id: String,

    pub kind: OutputKind,

    /// Content handed to later steps
    pub content: Content,

    /// Component-specific summary (vector, verdict, report, ...)
    pub detail: serde_json::Value,

    pub created_at: DateTime<Utc>,

    /// Size of the content in bytes
    pub size_bytes: u64,
}

impl StepOutput {
    pub fn new(step_id: impl Into<String>, kind: OutputKind, content: Content) -> Self {
        let size_bytes = content.len() as u64;
        Self {
            step_id: step_id.into(),
            kind,
            content,
            detail: serde_json::Value::Null,
            created_at: Utc::now(),
            size_bytes,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

/// What kind of component result a step produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Content passed through unchanged
    #[default]
    Passthrough,

    /// A harmonized signal vector
    Signal,

    /// Memory store or recall
    Memory,

    /// Aggregated node outputs
    Dispatch,

    /// Consensus outcome
    Consensus,

    /// Firewall verdict or transform
    Validation,

    /// Maintenance report (compress, prune, rebalance, recalibrate)
    Report,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_output_creation() {
        let output = StepOutput::new("dispatch", OutputKind::Dispatch, Content::text("merged"))
            .with_detail(json!({ "nodes": 2 }));

        assert_eq!(output.step_id, "dispatch");
        assert_eq!(output.size_bytes, 6);
        assert_eq!(output.detail["nodes"], 2);
    }
}
