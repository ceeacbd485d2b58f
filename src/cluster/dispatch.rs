//! Concurrent fan-out of a task to its assigned workers.
//!
//! The coordinator lock is only held to snapshot workers and to record
//! outcomes, never while workers run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::coordinator::ClusterCoordinator;
use super::node::{NodeOutput, TaskAssignment, TaskRequest, WorkerNode};
use crate::domain::Content;
use crate::error::{HarmoniaError, HarmoniaResult};

/// How a single node's execution ended
#[derive(Debug, Clone)]
pub enum NodeOutcome {
    Completed(NodeOutput),
    Failed(String),
    TimedOut,
}

/// Aggregated result of a dispatch
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub task_id: Uuid,
    /// Successful outputs in assignment order
    pub outputs: Vec<(String, NodeOutput)>,
    /// Nodes left out of aggregation, with the reason
    pub excluded: Vec<(String, String)>,
    pub merged: Content,
}

/// Run every worker concurrently, each bounded by `limit`.
///
/// Results come back in the order the workers were given.
pub async fn fan_out(
    workers: Vec<(String, Arc<dyn WorkerNode>)>,
    task: &TaskRequest,
    payload: &Content,
    limit: Duration,
) -> Vec<(String, NodeOutcome)> {
    let mut set = JoinSet::new();
    for (node_id, worker) in workers.iter().cloned() {
        let task = task.clone();
        let payload = payload.clone();
        set.spawn(async move {
            let outcome = match timeout(limit, worker.execute(&task, &payload)).await {
                Ok(Ok(output)) => NodeOutcome::Completed(output),
                Ok(Err(e)) => NodeOutcome::Failed(format!("{:#}", e)),
                Err(_) => NodeOutcome::TimedOut,
            };
            (node_id, outcome)
        });
    }

    let mut finished: HashMap<String, NodeOutcome> = HashMap::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((node_id, outcome)) => {
                finished.insert(node_id, outcome);
            }
            Err(e) => warn!(error = %e, "Worker task aborted"),
        }
    }

    workers
        .into_iter()
        .map(|(node_id, _)| {
            let outcome = finished
                .remove(&node_id)
                .unwrap_or_else(|| NodeOutcome::Failed("worker task aborted".to_string()));
            (node_id, outcome)
        })
        .collect()
}

/// Dispatch a task to its assigned nodes and aggregate what comes back.
///
/// A node that errors is marked degraded and excluded; a node that times
/// out is excluded. Fails with `AllNodesFailed` when nothing succeeds.
pub async fn dispatch(
    coordinator: &Mutex<ClusterCoordinator>,
    task: &TaskRequest,
    assignment: &TaskAssignment,
    payload: &Content,
    limit: Duration,
) -> HarmoniaResult<DispatchOutcome> {
    let workers = coordinator.lock().await.workers_for(assignment);
    let attempted = workers.len();
    debug!(task = %task.id, nodes = attempted, "Dispatching task");

    let results = fan_out(workers, task, payload, limit).await;

    let mut coordinator = coordinator.lock().await;
    let now = Utc::now();
    let mut outputs = Vec::new();
    let mut excluded = Vec::new();

    for (node_id, outcome) in results {
        match outcome {
            NodeOutcome::Completed(output) => {
                coordinator.record_success(&node_id);
                outputs.push((node_id, output));
            }
            NodeOutcome::Failed(reason) => {
                let failure = HarmoniaError::NodeFailure {
                    node_id: node_id.clone(),
                    reason: reason.clone(),
                };
                warn!(task = %task.id, error = %failure, "Excluding failed node");
                if let Err(e) = coordinator.mark_degraded(&node_id, &reason, now) {
                    debug!(error = %e, "Node left before it could be degraded");
                }
                excluded.push((node_id, reason));
            }
            NodeOutcome::TimedOut => {
                warn!(task = %task.id, node = %node_id, timeout_ms = limit.as_millis() as u64, "Node timed out");
                excluded.push((node_id, format!("timed out after {}ms", limit.as_millis())));
            }
        }
    }

    if outputs.is_empty() {
        return Err(HarmoniaError::AllNodesFailed {
            task_id: task.id,
            attempted,
        });
    }

    let merged = merge_outputs(&outputs);
    info!(
        task = %task.id,
        succeeded = outputs.len(),
        excluded = excluded.len(),
        "Dispatch complete"
    );

    Ok(DispatchOutcome {
        task_id: task.id,
        outputs,
        excluded,
        merged,
    })
}

/// A single output passes through unchanged; several are joined as text
pub fn merge_outputs(outputs: &[(String, NodeOutput)]) -> Content {
    match outputs {
        [(_, only)] => only.content.clone(),
        _ => Content::text(
            outputs
                .iter()
                .map(|(_, o)| o.content.as_text())
                .collect::<Vec<_>>()
                .join("\n\n"),
        ),
    }
}
