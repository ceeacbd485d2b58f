//! Cluster coordinator.
//!
//! Tracks worker membership and liveness, labels members with a formation,
//! assigns tasks to the best-fit nodes and resolves group decisions.
//! - node: ClusterNode, tasks, votes, the WorkerNode trait
//! - coordinator: ClusterCoordinator (membership, heartbeats, assignment)
//! - dispatch: concurrent fan-out and aggregation
//! - consensus: alignment-weighted voting

pub mod consensus;
pub mod coordinator;
pub mod dispatch;
pub mod node;

pub use consensus::{request_consensus, Ballot, ConsensusOutcome};
pub use coordinator::{
    ClusterConfig, ClusterCoordinator, ClusterStatus, ScoringWeights, SweepReport, TaskMove,
};
pub use dispatch::{dispatch, DispatchOutcome, NodeOutcome};
pub use node::{
    ClusterNode, Formation, NodeOutput, NodeRole, NodeStatus, Proposal, TaskAssignment,
    TaskPriority, TaskRequest, Vote, WorkerNode,
};
