//! Peer registry, vector history, targeted broadcast and frequency tuning.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::vector::{seeded_phase, SignalVector};
use crate::domain::Content;

/// Frequency distance at which harmony drops to zero
const HARMONY_SPAN: f64 = 1000.0;

/// Signal layer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Starting base frequency (default: 432.0)
    #[serde(default = "default_frequency")]
    pub base_frequency: f64,

    /// Canonical center the base frequency is bounded around (default: 432.0)
    #[serde(default = "default_frequency")]
    pub center_frequency: f64,

    /// Allowed drift either side of the center (default: 50.0)
    #[serde(default = "default_band")]
    pub band: f64,

    /// Minimum resonance strength for targeted delivery (default: 0.7)
    #[serde(default = "default_resonance_threshold")]
    pub resonance_threshold: f64,

    /// Number of vectors kept in history (default: 64)
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Fraction of the remaining distance covered per tune call (default: 0.1)
    #[serde(default = "default_tune_rate")]
    pub tune_rate: f64,

    /// Peers at or above this alignment steer tuning (default: 0.8)
    #[serde(default = "default_peer_alignment_floor")]
    pub peer_alignment_floor: f64,

    /// Amplitude dimensions per vector (default: 8)
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
}

fn default_frequency() -> f64 {
    432.0
}
fn default_band() -> f64 {
    50.0
}
fn default_resonance_threshold() -> f64 {
    0.7
}
fn default_history_capacity() -> usize {
    64
}
fn default_tune_rate() -> f64 {
    0.1
}
fn default_peer_alignment_floor() -> f64 {
    0.8
}
fn default_dimensions() -> usize {
    8
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            base_frequency: default_frequency(),
            center_frequency: default_frequency(),
            band: default_band(),
            resonance_threshold: default_resonance_threshold(),
            history_capacity: default_history_capacity(),
            tune_rate: default_tune_rate(),
            peer_alignment_floor: default_peer_alignment_floor(),
            dimensions: default_dimensions(),
        }
    }
}

/// A known peer that can receive broadcasts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    pub frequency: f64,
    pub phase: f64,
    /// Alignment score in [0, 1]
    pub alignment: f64,
    /// Unreachable peers have deliveries dropped
    pub reachable: bool,
    /// Number of vectors delivered to this peer
    pub received: u64,
    /// Checksum of the last delivered vector
    pub last_checksum: Option<String>,
}

/// Outcome of a broadcast
#[derive(Debug, Clone, Default, Serialize)]
pub struct BroadcastReport {
    /// Peers the vector was delivered to
    pub delivered: Vec<String>,
    /// Targets skipped because resonance was below threshold (id, strength)
    pub filtered: Vec<(String, f64)>,
    /// Targets that could not be reached (dropped, not retried)
    pub unreachable: Vec<String>,
}

/// The signal broadcast layer
pub struct SignalLayer {
    config: SignalConfig,
    base_frequency: f64,
    peers: BTreeMap<String, Peer>,
    history: VecDeque<SignalVector>,
}

impl SignalLayer {
    pub fn new(config: SignalConfig) -> Self {
        let base_frequency = clamp_to_band(
            config.base_frequency,
            config.center_frequency,
            config.band,
        );
        Self {
            config,
            base_frequency,
            peers: BTreeMap::new(),
            history: VecDeque::new(),
        }
    }

    pub fn base_frequency(&self) -> f64 {
        self.base_frequency
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Transform content into a vector and remember it by checksum
    pub fn harmonize(&mut self, content: &Content) -> SignalVector {
        let vector = SignalVector::harmonize(content, self.base_frequency, self.config.dimensions);

        if !self.history.iter().any(|v| v.checksum == vector.checksum) {
            while self.history.len() >= self.config.history_capacity.max(1) {
                self.history.pop_front();
            }
            self.history.push_back(vector.clone());
        }

        debug!(checksum = %vector.checksum, frequency = vector.frequency, "Harmonized input");
        vector
    }

    /// Look up a previously harmonized vector
    pub fn lookup(&self, checksum: &str) -> Option<&SignalVector> {
        self.history.iter().find(|v| v.checksum == checksum)
    }

    /// Most recent vectors, newest first
    pub fn recent(&self, limit: usize) -> Vec<SignalVector> {
        self.history.iter().rev().take(limit).cloned().collect()
    }

    /// Register or replace a peer; its phase is derived from the id
    pub fn register_peer(&mut self, id: impl Into<String>, frequency: f64, alignment: f64) {
        let id = id.into();
        let peer = Peer {
            phase: seeded_phase(&id),
            id: id.clone(),
            frequency,
            alignment: alignment.clamp(0.0, 1.0),
            reachable: true,
            received: 0,
            last_checksum: None,
        };
        self.peers.insert(id, peer);
    }

    pub fn remove_peer(&mut self, id: &str) -> Option<Peer> {
        self.peers.remove(id)
    }

    pub fn set_reachable(&mut self, id: &str, reachable: bool) {
        if let Some(peer) = self.peers.get_mut(id) {
            peer.reachable = reachable;
        }
    }

    pub fn set_alignment(&mut self, id: &str, alignment: f64) {
        if let Some(peer) = self.peers.get_mut(id) {
            peer.alignment = alignment.clamp(0.0, 1.0);
        }
    }

    pub fn peer(&self, id: &str) -> Option<&Peer> {
        self.peers.get(id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Resonance between a vector and a peer, in [0, 1]
    pub fn resonance_strength(vector: &SignalVector, peer: &Peer) -> f64 {
        let harmony = (1.0 - (vector.frequency - peer.frequency).abs() / HARMONY_SPAN).max(0.0);
        let phase_alignment = (1.0 + (vector.phase - peer.phase).cos()) / 2.0;
        0.5 * harmony + 0.2 * phase_alignment + 0.3 * peer.alignment
    }

    /// Deliver a vector to peers.
    ///
    /// With no targets the vector fans out to every known peer. Named targets
    /// only receive it when resonance exceeds the threshold. Unreachable and
    /// unknown targets are dropped.
    pub fn broadcast(&mut self, vector: &SignalVector, targets: &[String]) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let threshold = self.config.resonance_threshold;

        let ids: Vec<String> = if targets.is_empty() {
            self.peers.keys().cloned().collect()
        } else {
            targets.to_vec()
        };

        for id in ids {
            let Some(peer) = self.peers.get_mut(&id) else {
                warn!(peer = %id, "Broadcast target unknown, dropping");
                report.unreachable.push(id);
                continue;
            };

            if !peer.reachable {
                warn!(peer = %id, checksum = %vector.checksum, "Peer unreachable, dropping delivery");
                report.unreachable.push(id);
                continue;
            }

            if !targets.is_empty() {
                let strength = Self::resonance_strength(vector, peer);
                if strength <= threshold {
                    debug!(peer = %id, strength, "Resonance below threshold");
                    report.filtered.push((id, strength));
                    continue;
                }
            }

            peer.received += 1;
            peer.last_checksum = Some(vector.checksum.clone());
            report.delivered.push(id);
        }

        info!(
            checksum = %vector.checksum,
            delivered = report.delivered.len(),
            filtered = report.filtered.len(),
            unreachable = report.unreachable.len(),
            "Broadcast complete"
        );
        report
    }

    /// Move the base frequency toward the mean of high-alignment peers.
    ///
    /// `target_frequency` stands in for the peer mean when no peer is aligned
    /// enough. Returns the new base frequency.
    pub fn tune(&mut self, target_frequency: f64) -> f64 {
        let aligned: Vec<f64> = self
            .peers
            .values()
            .filter(|p| p.alignment >= self.config.peer_alignment_floor)
            .map(|p| p.frequency)
            .collect();

        let goal = if aligned.is_empty() {
            target_frequency
        } else {
            aligned.iter().sum::<f64>() / aligned.len() as f64
        };
        let goal = clamp_to_band(goal, self.config.center_frequency, self.config.band);

        let next = self.base_frequency + self.config.tune_rate * (goal - self.base_frequency);
        self.base_frequency = clamp_to_band(next, self.config.center_frequency, self.config.band);

        debug!(goal, base = self.base_frequency, "Tuned base frequency");
        self.base_frequency
    }

    /// Return the base frequency to the canonical center
    pub fn reset_frequency(&mut self) -> f64 {
        info!(
            from = self.base_frequency,
            to = self.config.center_frequency,
            "Resetting base frequency"
        );
        self.base_frequency = self.config.center_frequency;
        self.base_frequency
    }

    /// Mean pairwise coherence of each peer with every other peer
    pub fn coherence(&self) -> BTreeMap<String, f64> {
        let peers: Vec<&Peer> = self.peers.values().collect();
        let mut levels = BTreeMap::new();

        for peer in &peers {
            if peers.len() < 2 {
                levels.insert(peer.id.clone(), 1.0);
                continue;
            }
            let total: f64 = peers
                .iter()
                .filter(|other| other.id != peer.id)
                .map(|other| {
                    let harmony =
                        (1.0 - (peer.frequency - other.frequency).abs() / HARMONY_SPAN).max(0.0);
                    harmony * (peer.alignment + other.alignment) / 2.0
                })
                .sum();
            levels.insert(peer.id.clone(), total / (peers.len() - 1) as f64);
        }

        levels
    }
}

fn clamp_to_band(frequency: f64, center: f64, band: f64) -> f64 {
    frequency.clamp(center - band, center + band)
}
