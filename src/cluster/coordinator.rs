//! Membership, liveness, formation and task assignment.
//!
//! The coordinator is the only owner of node and task records. Every
//! mutation keeps each task's assigned nodes a subset of the active nodes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::node::{
    ClusterNode, Formation, NodeRole, NodeStatus, TaskAssignment, TaskRequest, WorkerNode,
};
use crate::error::{HarmoniaError, HarmoniaResult};

/// Specialist seat names, filled in alignment order after the leader
const SPECIALISTS: &[&str] = &[
    "analyst",
    "guardian",
    "synthesizer",
    "scribe",
    "healer",
    "herald",
    "sentinel",
    "archivist",
    "navigator",
    "mediator",
    "oracle",
];

/// Weights of the node scoring function
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(default = "default_capability_weight")]
    pub capability: f64,
    #[serde(default = "default_load_weight")]
    pub load: f64,
    #[serde(default = "default_alignment_weight")]
    pub alignment: f64,
    #[serde(default = "default_recency_weight")]
    pub recency: f64,
}

fn default_capability_weight() -> f64 {
    0.4
}
fn default_load_weight() -> f64 {
    0.3
}
fn default_alignment_weight() -> f64 {
    0.2
}
fn default_recency_weight() -> f64 {
    0.2
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            capability: default_capability_weight(),
            load: default_load_weight(),
            alignment: default_alignment_weight(),
            recency: default_recency_weight(),
        }
    }
}

/// Cluster coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Expected heartbeat period (default: 5000ms)
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Consecutive missed intervals before a node is dead (default: 3)
    #[serde(default = "default_dead_after_missed")]
    pub dead_after_missed: u64,

    /// Minimum capability match for assignment (default: 0.5)
    #[serde(default = "default_capability_threshold")]
    pub capability_threshold: f64,

    /// Workload above the mean that triggers rebalancing (default: 0.3)
    #[serde(default = "default_overload_margin")]
    pub overload_margin: f64,

    /// Workload added per assigned task (default: 0.15)
    #[serde(default = "default_task_load")]
    pub task_load: f64,

    /// Weighted score needed for consensus (default: 0.6)
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: f64,

    /// Share of active nodes that must cast a non-abstaining vote (default: 0.5)
    #[serde(default = "default_consensus_quorum")]
    pub consensus_quorum: f64,

    /// Per-node dispatch timeout (default: 2000ms)
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,

    /// Alignment gained per successful execution (default: 0.01)
    #[serde(default = "default_alignment_reward")]
    pub alignment_reward: f64,

    /// Alignment lost per failed execution (default: 0.05)
    #[serde(default = "default_alignment_penalty")]
    pub alignment_penalty: f64,

    #[serde(default)]
    pub weights: ScoringWeights,
}

fn default_heartbeat_interval_ms() -> u64 {
    5000
}
fn default_dead_after_missed() -> u64 {
    3
}
fn default_capability_threshold() -> f64 {
    0.5
}
fn default_overload_margin() -> f64 {
    0.3
}
fn default_task_load() -> f64 {
    0.15
}
fn default_consensus_threshold() -> f64 {
    0.6
}
fn default_consensus_quorum() -> f64 {
    0.5
}
fn default_dispatch_timeout_ms() -> u64 {
    2000
}
fn default_alignment_reward() -> f64 {
    0.01
}
fn default_alignment_penalty() -> f64 {
    0.05
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            dead_after_missed: default_dead_after_missed(),
            capability_threshold: default_capability_threshold(),
            overload_margin: default_overload_margin(),
            task_load: default_task_load(),
            consensus_threshold: default_consensus_threshold(),
            consensus_quorum: default_consensus_quorum(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            alignment_reward: default_alignment_reward(),
            alignment_penalty: default_alignment_penalty(),
            weights: ScoringWeights::default(),
        }
    }
}

/// What a heartbeat sweep changed
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub degraded: Vec<String>,
    pub dead: Vec<String>,
    /// Tasks dropped because no node remained to carry them
    pub orphaned: Vec<Uuid>,
}

/// A task moved off an overloaded node
#[derive(Debug, Clone, Serialize)]
pub struct TaskMove {
    pub task_id: Uuid,
    pub from: String,
    pub to: String,
}

/// Read-only projection of the cluster
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub formation: Formation,
    pub nodes: Vec<ClusterNode>,
    pub active: usize,
    pub degraded: usize,
    pub tasks: Vec<TaskAssignment>,
    pub mean_workload: f64,
}

/// The cluster coordinator
pub struct ClusterCoordinator {
    config: ClusterConfig,
    nodes: BTreeMap<String, ClusterNode>,
    workers: HashMap<String, Arc<dyn WorkerNode>>,
    tasks: BTreeMap<Uuid, TaskAssignment>,
    formation: Formation,
}

impl ClusterCoordinator {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            nodes: BTreeMap::new(),
            workers: HashMap::new(),
            tasks: BTreeMap::new(),
            formation: Formation::for_count(0),
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn formation(&self) -> Formation {
        self.formation
    }

    pub fn node(&self, id: &str) -> Option<&ClusterNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ClusterNode> {
        self.nodes.values()
    }

    pub fn task(&self, task_id: &Uuid) -> Option<&TaskAssignment> {
        self.tasks.get(task_id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskAssignment> {
        self.tasks.values()
    }

    /// Register a worker as a new member
    pub fn add_node(
        &mut self,
        id: impl Into<String>,
        worker: Arc<dyn WorkerNode>,
        alignment: f64,
        now: DateTime<Utc>,
    ) -> HarmoniaResult<()> {
        let id = id.into();
        if self.nodes.contains_key(&id) {
            return Err(HarmoniaError::DuplicateNode(id));
        }

        let node = ClusterNode::new(id.clone(), worker.capabilities(), alignment, now);
        info!(
            node = %id,
            worker = worker.name(),
            capabilities = ?node.capabilities,
            "Node joined cluster"
        );

        self.nodes.insert(id.clone(), node);
        self.workers.insert(id, worker);
        self.recompute_formation();
        Ok(())
    }

    /// Remove a member and hand its tasks to replacements
    pub fn remove_node(&mut self, id: &str, now: DateTime<Utc>) -> HarmoniaResult<ClusterNode> {
        let node = self
            .nodes
            .remove(id)
            .ok_or_else(|| HarmoniaError::UnknownNode(id.to_string()))?;
        self.workers.remove(id);

        let orphaned = self.strip_node(id, true, now);
        info!(node = %id, orphaned = orphaned.len(), "Node left cluster");

        self.recompute_formation();
        Ok(node)
    }

    /// Record a heartbeat; degraded nodes recover to active
    pub fn heartbeat(&mut self, id: &str, now: DateTime<Utc>, workload: Option<f64>) -> HarmoniaResult<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| HarmoniaError::UnknownNode(id.to_string()))?;

        node.last_heartbeat = now;
        if let Some(workload) = workload {
            node.workload = workload.clamp(0.0, 1.0);
        }
        if node.status == NodeStatus::Degraded {
            node.status = NodeStatus::Active;
            info!(node = %id, "Node recovered");
        }
        Ok(())
    }

    /// Apply heartbeat timing: one or two missed intervals degrade a node,
    /// `dead_after_missed` kill it. Dead nodes are removed and their tasks
    /// redistributed.
    pub fn sweep_heartbeats(&mut self, now: DateTime<Utc>) -> SweepReport {
        let interval_ms = self.config.heartbeat_interval_ms.max(1) as i64;
        let mut report = SweepReport::default();

        for node in self.nodes.values_mut() {
            let elapsed = (now - node.last_heartbeat).num_milliseconds().max(0);
            let missed = (elapsed / interval_ms) as u64;

            if missed >= self.config.dead_after_missed {
                node.status = NodeStatus::Dead;
                warn!(node = %node.id, missed, "Node dead");
                report.dead.push(node.id.clone());
            } else if missed >= 1 && node.status == NodeStatus::Active {
                node.status = NodeStatus::Degraded;
                warn!(node = %node.id, missed, "Node degraded, heartbeat late");
                report.degraded.push(node.id.clone());
            }
        }

        for id in &report.dead {
            self.nodes.remove(id);
            self.workers.remove(id);
        }
        for id in report.degraded.iter().chain(&report.dead) {
            let orphaned = self.strip_node(id, true, now);
            report.orphaned.extend(orphaned);
        }

        if !report.dead.is_empty() {
            self.recompute_formation();
        }
        report
    }

    /// Take a node out of service after it failed during execution.
    ///
    /// The node keeps its membership but loses its task assignments; no
    /// replacement is drafted, the task carries on with its remaining nodes.
    pub fn mark_degraded(&mut self, id: &str, reason: &str, now: DateTime<Utc>) -> HarmoniaResult<()> {
        let penalty = self.config.alignment_penalty;
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| HarmoniaError::UnknownNode(id.to_string()))?;

        node.status = NodeStatus::Degraded;
        node.failures += 1;
        node.alignment = (node.alignment - penalty).max(0.0);
        warn!(node = %id, reason = reason, "Node marked degraded");

        self.strip_node(id, false, now);
        Ok(())
    }

    /// Credit a node for a successful execution
    pub fn record_success(&mut self, id: &str) {
        let reward = self.config.alignment_reward;
        if let Some(node) = self.nodes.get_mut(id) {
            node.successes += 1;
            node.alignment = (node.alignment + reward).min(1.0);
        }
    }

    fn score(&self, node: &ClusterNode, required: &[String], now: DateTime<Utc>) -> Option<f64> {
        if !node.is_active() {
            return None;
        }
        let matched = node.capability_match(required);
        if matched < self.config.capability_threshold {
            return None;
        }

        let interval = self.config.heartbeat_interval_ms.max(1) as f64;
        let since = (now - node.last_heartbeat).num_milliseconds().max(0) as f64;
        let recency = (-since / interval).exp();

        let w = &self.config.weights;
        Some(
            w.capability * matched
                + w.load * (1.0 - node.workload)
                + w.alignment * node.alignment
                + w.recency * recency,
        )
    }

    fn best_candidate<F>(
        &self,
        required: &[String],
        exclude: &[String],
        now: DateTime<Utc>,
        eligible: F,
    ) -> Option<String>
    where
        F: Fn(&ClusterNode) -> bool,
    {
        self.nodes
            .values()
            .filter(|n| !exclude.contains(&n.id) && eligible(n))
            .filter_map(|n| self.score(n, required, now).map(|s| (n, s)))
            .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.id.cmp(&a.0.id)))
            .map(|(n, _)| n.id.clone())
    }

    fn adjust_load(&mut self, id: &str, delta: f64) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.workload = (node.workload + delta).clamp(0.0, 1.0);
        }
    }

    /// Assign a task to the best-scoring active nodes
    pub fn assign_task(&mut self, task: &TaskRequest, now: DateTime<Utc>) -> HarmoniaResult<TaskAssignment> {
        let mut ranked: Vec<(String, f64)> = self
            .nodes
            .values()
            .filter_map(|n| {
                self.score(n, &task.required_capabilities, now)
                    .map(|s| (n.id.clone(), s))
            })
            .collect();

        if ranked.is_empty() {
            warn!(task = %task.id, required = ?task.required_capabilities, "No node can take task");
            return Err(HarmoniaError::ClusterExhaustion {
                required: task.required_capabilities.clone(),
            });
        }

        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(task.priority.node_count());

        let assigned: Vec<String> = ranked.into_iter().map(|(id, _)| id).collect();
        for id in &assigned {
            self.adjust_load(id, self.config.task_load);
        }

        let assignment = TaskAssignment {
            task_id: task.id,
            assigned_node_ids: assigned,
            required_capabilities: task.required_capabilities.clone(),
            priority: task.priority,
            assigned_at: now,
        };
        info!(
            task = %task.id,
            priority = ?task.priority,
            nodes = ?assignment.assigned_node_ids,
            "Task assigned"
        );

        self.tasks.insert(task.id, assignment.clone());
        Ok(assignment)
    }

    /// Close a task and release the load it placed on its nodes
    pub fn complete_task(&mut self, task_id: &Uuid) -> Option<TaskAssignment> {
        let assignment = self.tasks.remove(task_id)?;
        for id in &assignment.assigned_node_ids {
            self.adjust_load(id, -self.config.task_load);
        }
        debug!(task = %task_id, "Task completed");
        Some(assignment)
    }

    /// Remove a node from every assignment it appears in.
    ///
    /// With `replace`, each affected task drafts the best remaining
    /// candidate. Tasks left without nodes are dropped and returned.
    fn strip_node(&mut self, node_id: &str, replace: bool, now: DateTime<Utc>) -> Vec<Uuid> {
        let affected: Vec<Uuid> = self
            .tasks
            .values()
            .filter(|t| t.assigned_node_ids.iter().any(|id| id == node_id))
            .map(|t| t.task_id)
            .collect();

        let mut orphaned = Vec::new();
        for task_id in affected {
            let Some(task) = self.tasks.get_mut(&task_id) else {
                continue;
            };
            task.assigned_node_ids.retain(|id| id != node_id);
            let required = task.required_capabilities.clone();
            let current = task.assigned_node_ids.clone();
            self.adjust_load(node_id, -self.config.task_load);

            if replace {
                let exclude: Vec<String> = current.iter().cloned().chain([node_id.to_string()]).collect();
                if let Some(replacement) = self.best_candidate(&required, &exclude, now, |_| true) {
                    self.adjust_load(&replacement, self.config.task_load);
                    info!(task = %task_id, from = %node_id, to = %replacement, "Task redistributed");
                    if let Some(task) = self.tasks.get_mut(&task_id) {
                        task.assigned_node_ids.push(replacement);
                    }
                }
            }

            if self
                .tasks
                .get(&task_id)
                .is_some_and(|t| t.assigned_node_ids.is_empty())
            {
                self.tasks.remove(&task_id);
                warn!(task = %task_id, "Task orphaned, no node left to carry it");
                orphaned.push(task_id);
            }
        }

        orphaned
    }

    /// Move one task off each node whose workload exceeds the mean by more
    /// than the overload margin.
    pub fn rebalance(&mut self, now: DateTime<Utc>) -> Vec<TaskMove> {
        let active: Vec<(String, f64)> = self
            .nodes
            .values()
            .filter(|n| n.is_active())
            .map(|n| (n.id.clone(), n.workload))
            .collect();
        if active.len() < 2 {
            return Vec::new();
        }

        let mean = active.iter().map(|(_, w)| w).sum::<f64>() / active.len() as f64;
        let overloaded: Vec<String> = active
            .iter()
            .filter(|(_, w)| *w > mean + self.config.overload_margin)
            .map(|(id, _)| id.clone())
            .collect();

        let mut moves = Vec::new();
        for from in overloaded {
            let Some(task) = self
                .tasks
                .values()
                .find(|t| t.assigned_node_ids.contains(&from))
            else {
                continue;
            };
            let task_id = task.task_id;
            let required = task.required_capabilities.clone();
            let current = task.assigned_node_ids.clone();

            let Some(to) = self.best_candidate(&required, &current, now, |n| n.workload < mean) else {
                debug!(node = %from, "No underloaded candidate for rebalance");
                continue;
            };

            if let Some(task) = self.tasks.get_mut(&task_id) {
                for id in task.assigned_node_ids.iter_mut() {
                    if *id == from {
                        *id = to.clone();
                    }
                }
            }
            self.adjust_load(&from, -self.config.task_load);
            self.adjust_load(&to, self.config.task_load);

            info!(task = %task_id, from = %from, to = %to, "Task rebalanced");
            moves.push(TaskMove { task_id, from, to });
        }

        moves
    }

    /// Move every node's alignment halfway toward the cluster mean.
    ///
    /// Returns the mean.
    pub fn synchronize_alignment(&mut self) -> f64 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        let mean = self.nodes.values().map(|n| n.alignment).sum::<f64>() / self.nodes.len() as f64;
        for node in self.nodes.values_mut() {
            node.alignment = (node.alignment + mean) / 2.0;
        }
        debug!(mean, "Synchronized node alignment");
        mean
    }

    fn recompute_formation(&mut self) {
        self.formation = Formation::for_count(self.nodes.len());

        let mut order: Vec<(String, f64)> = self
            .nodes
            .values()
            .map(|n| (n.id.clone(), n.alignment))
            .collect();
        order.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let seats = self
            .formation
            .size()
            .map_or(SPECIALISTS.len(), |size| size.saturating_sub(1))
            .min(SPECIALISTS.len());

        for (rank, (id, _)) in order.iter().enumerate() {
            let role = match rank {
                0 => NodeRole::Leader,
                r if r <= seats => NodeRole::Specialist(SPECIALISTS[r - 1].to_string()),
                _ => NodeRole::Member,
            };
            if let Some(node) = self.nodes.get_mut(id) {
                node.role = role;
            }
        }

        debug!(formation = ?self.formation, members = order.len(), "Formation recomputed");
    }

    /// Workers of the active nodes assigned to a task, in assignment order
    pub fn workers_for(&self, assignment: &TaskAssignment) -> Vec<(String, Arc<dyn WorkerNode>)> {
        assignment
            .assigned_node_ids
            .iter()
            .filter(|id| self.nodes.get(*id).is_some_and(ClusterNode::is_active))
            .filter_map(|id| self.workers.get(id).map(|w| (id.clone(), Arc::clone(w))))
            .collect()
    }

    /// Every registered worker, whatever its status
    pub fn members(&self) -> Vec<(String, Arc<dyn WorkerNode>)> {
        self.workers
            .iter()
            .map(|(id, w)| (id.clone(), Arc::clone(w)))
            .collect()
    }

    /// Active nodes eligible to vote, with their alignment
    pub fn voters(&self) -> Vec<(String, f64, Arc<dyn WorkerNode>)> {
        self.nodes
            .values()
            .filter(|n| n.is_active())
            .filter_map(|n| {
                self.workers
                    .get(&n.id)
                    .map(|w| (n.id.clone(), n.alignment, Arc::clone(w)))
            })
            .collect()
    }

    pub fn status(&self) -> ClusterStatus {
        let nodes: Vec<ClusterNode> = self.nodes.values().cloned().collect();
        let active = nodes.iter().filter(|n| n.status == NodeStatus::Active).count();
        let degraded = nodes.iter().filter(|n| n.status == NodeStatus::Degraded).count();
        let mean_workload = if nodes.is_empty() {
            0.0
        } else {
            nodes.iter().map(|n| n.workload).sum::<f64>() / nodes.len() as f64
        };

        ClusterStatus {
            formation: self.formation,
            nodes,
            active,
            degraded,
            tasks: self.tasks.values().cloned().collect(),
            mean_workload,
        }
    }
}
