//! Cluster Integration Tests
//!
//! Tests for membership, heartbeats, task assignment, dispatch and consensus.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use harmonia::cluster::{
    dispatch, request_consensus, ClusterConfig, ClusterCoordinator, NodeStatus, Proposal,
    TaskPriority, TaskRequest, Vote, WorkerNode,
};
use harmonia::workers::FnWorker;
use harmonia::{Content, HarmoniaError};

fn worker(name: &str, caps: &[&str]) -> Arc<dyn WorkerNode> {
    Arc::new(FnWorker::constant(name, caps, format!("{} says hi", name)))
}

fn general(description: &str, priority: TaskPriority) -> TaskRequest {
    TaskRequest::new(description, vec!["general".to_string()], priority)
}

#[test]
fn test_heartbeat_death_removes_node_and_reassigns() {
    let mut cluster = ClusterCoordinator::new(ClusterConfig::default());
    let interval = cluster.config().heartbeat_interval_ms as i64;
    let t0 = Utc::now();

    for name in ["a", "b", "c"] {
        cluster.add_node(name, worker(name, &["general"]), 0.8, t0).unwrap();
    }

    let assignment = cluster.assign_task(&general("t", TaskPriority::Normal), t0).unwrap();
    assert_eq!(assignment.assigned_node_ids.len(), 2);
    let doomed = assignment.assigned_node_ids[0].clone();

    let later = t0 + ChronoDuration::milliseconds(interval * 3);
    for name in ["a", "b", "c"] {
        if name != doomed {
            cluster.heartbeat(name, later, None).unwrap();
        }
    }
    let report = cluster.sweep_heartbeats(later);

    assert_eq!(report.dead, vec![doomed.clone()]);
    assert!(cluster.node(&doomed).is_none());
    assert_eq!(cluster.nodes().count(), 2);

    let task = cluster.task(&assignment.task_id).unwrap();
    assert!(!task.assigned_node_ids.contains(&doomed));
    assert_eq!(task.assigned_node_ids.len(), 2);
}

#[test]
fn test_late_heartbeat_degrades_then_recovers() {
    let mut cluster = ClusterCoordinator::new(ClusterConfig::default());
    let interval = cluster.config().heartbeat_interval_ms as i64;
    let t0 = Utc::now();
    cluster.add_node("a", worker("a", &["general"]), 0.8, t0).unwrap();

    let late = t0 + ChronoDuration::milliseconds(interval + 10);
    let report = cluster.sweep_heartbeats(late);
    assert_eq!(report.degraded, vec!["a".to_string()]);
    assert_eq!(cluster.node("a").unwrap().status, NodeStatus::Degraded);

    cluster.heartbeat("a", late, Some(0.2)).unwrap();
    assert_eq!(cluster.node("a").unwrap().status, NodeStatus::Active);
    assert_eq!(cluster.node("a").unwrap().workload, 0.2);
}

#[test]
fn test_assignment_only_to_active_capable_nodes() {
    let mut cluster = ClusterCoordinator::new(ClusterConfig::default());
    let now = Utc::now();
    cluster.add_node("capable", worker("capable", &["general", "summarize"]), 0.8, now).unwrap();
    cluster.add_node("partial", worker("partial", &["summarize"]), 0.8, now).unwrap();
    cluster.add_node("broken", worker("broken", &["general"]), 0.8, now).unwrap();
    cluster.mark_degraded("broken", "test", now).unwrap();

    let task = TaskRequest::new(
        "t",
        vec!["general".to_string(), "analyze".to_string()],
        TaskPriority::Critical,
    );
    let assignment = cluster.assign_task(&task, now).unwrap();

    // "partial" matches 0 of 2, "broken" is degraded
    assert_eq!(assignment.assigned_node_ids, vec!["capable".to_string()]);
}

#[test]
fn test_assignment_with_no_candidates_is_exhaustion() {
    let mut cluster = ClusterCoordinator::new(ClusterConfig::default());
    let now = Utc::now();
    cluster.add_node("a", worker("a", &["general"]), 0.8, now).unwrap();

    let task = TaskRequest::new("t", vec!["telepathy".to_string()], TaskPriority::Low);
    let result = cluster.assign_task(&task, now);
    assert!(matches!(result, Err(HarmoniaError::ClusterExhaustion { .. })));
}

#[test]
fn test_duplicate_node_rejected() {
    let mut cluster = ClusterCoordinator::new(ClusterConfig::default());
    let now = Utc::now();
    cluster.add_node("a", worker("a", &[]), 0.5, now).unwrap();
    let result = cluster.add_node("a", worker("a", &[]), 0.5, now);
    assert!(matches!(result, Err(HarmoniaError::DuplicateNode(_))));
}

#[tokio::test]
async fn test_dispatch_excludes_failing_node() {
    let mut coordinator = ClusterCoordinator::new(ClusterConfig::default());
    let now = Utc::now();

    // The failing node has the best alignment so it is picked first
    coordinator
        .add_node(
            "faulty",
            Arc::new(FnWorker::failing("faulty", &["general"], "segfault")),
            1.0,
            now,
        )
        .unwrap();
    for name in ["n1", "n2", "n3", "n4"] {
        coordinator.add_node(name, worker(name, &["general"]), 0.5, now).unwrap();
    }

    let task = general("dispatch", TaskPriority::Normal);
    let assignment = coordinator.assign_task(&task, now).unwrap();
    assert_eq!(assignment.assigned_node_ids[0], "faulty");

    let coordinator = Mutex::new(coordinator);
    let outcome = dispatch(
        &coordinator,
        &task,
        &assignment,
        &Content::text("payload"),
        Duration::from_secs(1),
    )
    .await
    .unwrap();

    assert_eq!(outcome.outputs.len(), 1);
    assert_eq!(outcome.excluded.len(), 1);
    assert_eq!(outcome.excluded[0].0, "faulty");
    assert!(outcome.merged.as_text().ends_with("says hi"));

    let mut coordinator = coordinator.lock().await;
    let status = coordinator.status();
    assert_eq!(status.active, 4);
    assert_eq!(coordinator.node("faulty").unwrap().status, NodeStatus::Degraded);
    assert!(!coordinator
        .task(&task.id)
        .unwrap()
        .assigned_node_ids
        .contains(&"faulty".to_string()));

    assert!(coordinator.complete_task(&task.id).is_some());
}

#[tokio::test]
async fn test_dispatch_all_failed() {
    let mut coordinator = ClusterCoordinator::new(ClusterConfig::default());
    let now = Utc::now();
    coordinator
        .add_node("x", Arc::new(FnWorker::failing("x", &["general"], "nope")), 0.5, now)
        .unwrap();

    let task = general("t", TaskPriority::Low);
    let assignment = coordinator.assign_task(&task, now).unwrap();
    let coordinator = Mutex::new(coordinator);

    let result = dispatch(&coordinator, &task, &assignment, &Content::text("p"), Duration::from_secs(1)).await;
    assert!(matches!(result, Err(HarmoniaError::AllNodesFailed { attempted: 1, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_timeout_excludes_slow_node() {
    let mut coordinator = ClusterCoordinator::new(ClusterConfig::default());
    let now = Utc::now();
    coordinator
        .add_node(
            "slow",
            Arc::new(FnWorker::constant("slow", &["general"], "late").with_delay(Duration::from_secs(10))),
            0.9,
            now,
        )
        .unwrap();
    coordinator.add_node("fast", worker("fast", &["general"]), 0.5, now).unwrap();

    let task = general("t", TaskPriority::Normal);
    let assignment = coordinator.assign_task(&task, now).unwrap();
    let coordinator = Mutex::new(coordinator);

    let outcome = dispatch(&coordinator, &task, &assignment, &Content::text("p"), Duration::from_secs(1))
        .await
        .unwrap();

    assert_eq!(outcome.outputs.len(), 1);
    assert_eq!(outcome.outputs[0].0, "fast");
    assert!(outcome.excluded[0].1.contains("timed out"));
    // A timeout is not a failure
    assert_eq!(coordinator.lock().await.node("slow").unwrap().status, NodeStatus::Active);
}

async fn cluster_voting(votes: &[Vote]) -> Mutex<ClusterCoordinator> {
    let mut coordinator = ClusterCoordinator::new(ClusterConfig::default());
    let now = Utc::now();
    for (i, vote) in votes.iter().enumerate() {
        let name = format!("voter{}", i);
        let node = FnWorker::constant(name.as_str(), &["general"], "x").with_vote(*vote);
        coordinator.add_node(name, Arc::new(node), 0.8, now).unwrap();
    }
    Mutex::new(coordinator)
}

#[tokio::test]
async fn test_consensus_all_agree() {
    let coordinator = cluster_voting(&[Vote::Agree, Vote::Agree, Vote::Agree]).await;
    let proposal = Proposal::new("adopt", Content::text("plan"));

    let outcome = request_consensus(&coordinator, &proposal, Duration::from_secs(1)).await;

    assert!(outcome.reached);
    assert!((outcome.weighted_score - 1.0).abs() < 1e-9);
    assert_eq!(outcome.participation, 1.0);
    assert_eq!(outcome.ballots.len(), 3);
}

#[tokio::test]
async fn test_consensus_all_disagree() {
    let coordinator = cluster_voting(&[Vote::Disagree, Vote::Disagree]).await;
    let proposal = Proposal::new("adopt", Content::text("plan"));

    let outcome = request_consensus(&coordinator, &proposal, Duration::from_secs(1)).await;

    assert!(!outcome.reached);
    assert!((outcome.weighted_score + 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_consensus_without_quorum() {
    let coordinator = cluster_voting(&[Vote::Agree, Vote::Abstain, Vote::Abstain]).await;
    let proposal = Proposal::new("adopt", Content::text("plan"));

    let outcome = request_consensus(&coordinator, &proposal, Duration::from_secs(1)).await;

    assert!(!outcome.reached);
    assert!((outcome.participation - 1.0 / 3.0).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_consensus_timeout_keeps_partial_ballots() {
    let mut coordinator = ClusterCoordinator::new(ClusterConfig::default());
    let now = Utc::now();
    coordinator.add_node("quick", worker("quick", &["general"]), 0.8, now).unwrap();
    coordinator
        .add_node(
            "sleepy",
            Arc::new(FnWorker::constant("sleepy", &["general"], "x").with_delay(Duration::from_secs(30))),
            0.8,
            now,
        )
        .unwrap();
    let coordinator = Mutex::new(coordinator);

    let outcome = request_consensus(
        &coordinator,
        &Proposal::new("adopt", Content::text("plan")),
        Duration::from_secs(1),
    )
    .await;

    assert!(outcome.timed_out);
    assert_eq!(outcome.ballots.len(), 1);
    assert_eq!(outcome.participation, 0.5);
    assert!(outcome.reached);
}

#[test]
fn test_rebalance_moves_task_off_overloaded_node() {
    let mut cluster = ClusterCoordinator::new(ClusterConfig::default());
    let now = Utc::now();
    cluster.add_node("busy", worker("busy", &["general"]), 0.9, now).unwrap();
    cluster.add_node("idle", worker("idle", &["general"]), 0.5, now).unwrap();

    let task = general("t", TaskPriority::Low);
    let assignment = cluster.assign_task(&task, now).unwrap();
    assert_eq!(assignment.assigned_node_ids, vec!["busy".to_string()]);
    cluster.heartbeat("busy", now, Some(0.95)).unwrap();

    let moves = cluster.rebalance(now);
    assert_eq!(moves.len(), 1);
    assert_eq!(moves[0].from, "busy");
    assert_eq!(moves[0].to, "idle");
    assert_eq!(
        cluster.task(&task.id).unwrap().assigned_node_ids,
        vec!["idle".to_string()]
    );
}
