//! Alignment-weighted group decisions.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::coordinator::ClusterCoordinator;
use super::node::{Proposal, Vote, WorkerNode};

/// One collected vote
#[derive(Debug, Clone, Serialize)]
pub struct Ballot {
    pub node_id: String,
    pub vote: Vote,
    pub alignment: f64,
}

/// Result of a consensus round.
///
/// A round that runs out of time is still a result: `timed_out` is set and
/// the tally covers whatever ballots arrived.
#[derive(Debug, Clone, Serialize)]
pub struct ConsensusOutcome {
    pub proposal_id: Uuid,
    pub reached: bool,
    /// Alignment-weighted mean vote in [-1, 1]
    pub weighted_score: f64,
    /// Share of eligible voters that cast a non-abstaining vote
    pub participation: f64,
    pub ballots: Vec<Ballot>,
    pub timed_out: bool,
}

/// Tally ballots against a threshold and quorum
pub fn tally(
    proposal_id: Uuid,
    ballots: Vec<Ballot>,
    eligible: usize,
    threshold: f64,
    quorum: f64,
    timed_out: bool,
) -> ConsensusOutcome {
    let (weighted, weight, cast) = ballots
        .iter()
        .filter_map(|b| b.vote.value().map(|v| (v, b.alignment)))
        .fold((0.0, 0.0, 0usize), |(sum, total, n), (v, a)| (sum + v * a, total + a, n + 1));

    let weighted_score = if weight > 0.0 { weighted / weight } else { 0.0 };
    let participation = if eligible == 0 {
        0.0
    } else {
        cast as f64 / eligible as f64
    };
    let reached = eligible > 0 && participation >= quorum && weighted_score >= threshold;

    ConsensusOutcome {
        proposal_id,
        reached,
        weighted_score,
        participation,
        ballots,
        timed_out,
    }
}

/// Ask every voter for a ballot, stopping at the deadline.
///
/// Returns the ballots that arrived and whether the deadline cut the round
/// short.
pub async fn collect_votes(
    voters: Vec<(String, f64, Arc<dyn WorkerNode>)>,
    proposal: &Proposal,
    limit: Duration,
) -> (Vec<Ballot>, bool) {
    let deadline = Instant::now() + limit;
    let mut set = JoinSet::new();
    for (node_id, alignment, worker) in voters {
        let proposal = proposal.clone();
        set.spawn(async move {
            let vote = worker.vote(&proposal).await;
            Ballot {
                node_id,
                vote,
                alignment,
            }
        });
    }

    let mut ballots = Vec::new();
    let mut timed_out = false;
    loop {
        match timeout_at(deadline, set.join_next()).await {
            Ok(Some(Ok(ballot))) => {
                debug!(node = %ballot.node_id, vote = ?ballot.vote, "Ballot received");
                ballots.push(ballot);
            }
            Ok(Some(Err(e))) => warn!(error = %e, "Voter task aborted"),
            Ok(None) => break,
            Err(_) => {
                timed_out = true;
                set.abort_all();
                break;
            }
        }
    }

    ballots.sort_by(|a, b| a.node_id.cmp(&b.node_id));
    (ballots, timed_out)
}

/// Put a proposal to every active node and resolve it
pub async fn request_consensus(
    coordinator: &Mutex<ClusterCoordinator>,
    proposal: &Proposal,
    limit: Duration,
) -> ConsensusOutcome {
    let (voters, threshold, quorum) = {
        let c = coordinator.lock().await;
        (c.voters(), c.config().consensus_threshold, c.config().consensus_quorum)
    };
    let eligible = voters.len();

    let (ballots, timed_out) = collect_votes(voters, proposal, limit).await;
    if timed_out {
        warn!(proposal = %proposal.id, received = ballots.len(), eligible, "Consensus round timed out");
    }

    let outcome = tally(proposal.id, ballots, eligible, threshold, quorum, timed_out);
    info!(
        proposal = %proposal.id,
        reached = outcome.reached,
        score = outcome.weighted_score,
        participation = outcome.participation,
        "Consensus resolved"
    );
    outcome
}
