//! Cluster members, tasks and the worker interface.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::Content;

/// Liveness state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Active,
    Degraded,
    Dead,
}

/// Internal responsibility label assigned by the formation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Leader,
    Specialist(String),
    Member,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Leader => write!(f, "leader"),
            NodeRole::Specialist(name) => write!(f, "specialist:{}", name),
            NodeRole::Member => write!(f, "member"),
        }
    }
}

/// Role-labeling scheme sized to the member count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Formation {
    Triad,
    Heptad,
    Dodecad,
    Open,
}

impl Formation {
    pub fn for_count(count: usize) -> Self {
        match count {
            0..=3 => Formation::Triad,
            4..=7 => Formation::Heptad,
            8..=12 => Formation::Dodecad,
            _ => Formation::Open,
        }
    }

    /// Number of labeled seats; `None` when unbounded
    pub fn size(&self) -> Option<usize> {
        match self {
            Formation::Triad => Some(3),
            Formation::Heptad => Some(7),
            Formation::Dodecad => Some(12),
            Formation::Open => None,
        }
    }
}

/// A member of the cluster as the coordinator tracks it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterNode {
    pub id: String,
    pub status: NodeStatus,
    pub capabilities: BTreeSet<String>,
    pub last_heartbeat: DateTime<Utc>,
    /// Current load in [0, 1]
    pub workload: f64,
    /// Alignment score in [0, 1]
    pub alignment: f64,
    pub role: NodeRole,
    pub joined_at: DateTime<Utc>,
    pub successes: u64,
    pub failures: u64,
}

impl ClusterNode {
    pub fn new(
        id: impl Into<String>,
        capabilities: impl IntoIterator<Item = String>,
        alignment: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            status: NodeStatus::Active,
            capabilities: capabilities.into_iter().collect(),
            last_heartbeat: now,
            workload: 0.0,
            alignment: alignment.clamp(0.0, 1.0),
            role: NodeRole::Member,
            joined_at: now,
            successes: 0,
            failures: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    /// Fraction of the required capabilities this node has.
    ///
    /// An empty requirement matches every node fully.
    pub fn capability_match(&self, required: &[String]) -> f64 {
        if required.is_empty() {
            return 1.0;
        }
        let matched = required
            .iter()
            .filter(|c| self.capabilities.contains(*c))
            .count();
        matched as f64 / required.len() as f64
    }
}

/// Task urgency; determines how many nodes a task is spread over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
    Critical,
}

impl TaskPriority {
    pub fn node_count(&self) -> usize {
        match self {
            TaskPriority::Low => 1,
            TaskPriority::Normal => 2,
            TaskPriority::High => 3,
            TaskPriority::Urgent => 5,
            TaskPriority::Critical => 7,
        }
    }
}

/// A unit of work submitted to the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub id: Uuid,
    pub description: String,
    pub required_capabilities: Vec<String>,
    pub priority: TaskPriority,
}

impl TaskRequest {
    pub fn new(description: impl Into<String>, required_capabilities: Vec<String>, priority: TaskPriority) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            required_capabilities,
            priority,
        }
    }
}

/// Which nodes own a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: Uuid,
    /// Best-scoring node first
    pub assigned_node_ids: Vec<String>,
    pub required_capabilities: Vec<String>,
    pub priority: TaskPriority,
    pub assigned_at: DateTime<Utc>,
}

/// Output from a worker execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeOutput {
    pub content: Content,

    /// Worker's confidence in the output, if it reports one
    pub confidence: Option<f64>,
}

impl NodeOutput {
    pub fn new(content: Content) -> Self {
        Self {
            content,
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }
}

/// A ballot value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Agree,
    Disagree,
    Abstain,
}

impl Vote {
    /// Signed weight; `None` for abstentions
    pub fn value(&self) -> Option<f64> {
        match self {
            Vote::Agree => Some(1.0),
            Vote::Disagree => Some(-1.0),
            Vote::Abstain => None,
        }
    }
}

/// A question put to the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub description: String,
    pub content: Content,
}

impl Proposal {
    pub fn new(description: impl Into<String>, content: Content) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            content,
        }
    }
}

/// Trait for worker nodes
#[async_trait]
pub trait WorkerNode: Send + Sync {
    /// Human-readable worker name
    fn name(&self) -> &str;

    /// Capability tags this worker can serve
    fn capabilities(&self) -> Vec<String>;

    /// Execute a task against a payload
    async fn execute(&self, task: &TaskRequest, payload: &Content) -> anyhow::Result<NodeOutput>;

    /// Vote on a proposal
    async fn vote(&self, _proposal: &Proposal) -> Vote {
        Vote::Agree
    }

    /// Liveness probe; an error counts as a missed heartbeat
    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formation_for_count() {
        assert_eq!(Formation::for_count(1), Formation::Triad);
        assert_eq!(Formation::for_count(3), Formation::Triad);
        assert_eq!(Formation::for_count(4), Formation::Heptad);
        assert_eq!(Formation::for_count(12), Formation::Dodecad);
        assert_eq!(Formation::for_count(13), Formation::Open);
        assert_eq!(Formation::Open.size(), None);
    }

    #[test]
    fn test_capability_match() {
        let node = ClusterNode::new(
            "n1",
            ["summarize".to_string(), "general".to_string()],
            0.5,
            Utc::now(),
        );
        assert_eq!(node.capability_match(&[]), 1.0);
        assert_eq!(node.capability_match(&["summarize".to_string()]), 1.0);
        assert_eq!(
            node.capability_match(&["summarize".to_string(), "translate".to_string()]),
            0.5
        );
    }

    #[test]
    fn test_priority_node_counts() {
        assert_eq!(TaskPriority::Low.node_count(), 1);
        assert_eq!(TaskPriority::Critical.node_count(), 7);
        assert!(TaskPriority::Urgent > TaskPriority::High);
    }
}
