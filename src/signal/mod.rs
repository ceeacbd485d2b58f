//! Signal broadcast layer.
//!
//! Turns input content into frequency-tagged vectors and delivers them to
//! peers whose resonance with the vector is strong enough.
//! - vector: SignalVector and the deterministic harmonize transform
//! - layer: SignalLayer (peers, history, broadcast, tuning)

pub mod layer;
pub mod vector;

pub use layer::{BroadcastReport, Peer, SignalConfig, SignalLayer};
pub use vector::SignalVector;
