//! Signal Integration Tests
//!
//! Tests for harmonization, targeted broadcast and frequency tuning.

use harmonia::signal::{SignalConfig, SignalLayer};
use harmonia::Content;

#[test]
fn test_harmonize_is_deterministic() {
    let mut layer = SignalLayer::new(SignalConfig::default());
    let a = layer.harmonize(&Content::text("the same input"));
    let b = layer.harmonize(&Content::text("the same input"));

    assert_eq!(a, b);
    assert!((a.frequency - 432.0).abs() <= 5.0);
    assert!(a.phase >= 0.0 && a.phase < std::f64::consts::TAU);
    assert_eq!(layer.recent(10).len(), 1);
    assert!(layer.lookup(&a.checksum).is_some());
}

#[test]
fn test_targeted_broadcast_filters_by_resonance() {
    let mut layer = SignalLayer::new(SignalConfig::default());
    layer.register_peer("close", 432.0, 1.0);
    layer.register_peer("distant", 1500.0, 0.0);
    layer.register_peer("offline", 432.0, 1.0);
    layer.set_reachable("offline", false);

    let vector = layer.harmonize(&Content::text("status update"));
    let targets: Vec<String> = ["close", "distant", "offline", "ghost"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let report = layer.broadcast(&vector, &targets);

    assert_eq!(report.delivered, vec!["close".to_string()]);
    assert_eq!(report.filtered.len(), 1);
    assert_eq!(report.filtered[0].0, "distant");
    assert_eq!(report.unreachable, vec!["offline".to_string(), "ghost".to_string()]);
    assert_eq!(layer.peer("close").unwrap().received, 1);
    assert_eq!(
        layer.peer("close").unwrap().last_checksum.as_deref(),
        Some(vector.checksum.as_str())
    );
}

#[test]
fn test_untargeted_broadcast_reaches_every_reachable_peer() {
    let mut layer = SignalLayer::new(SignalConfig::default());
    layer.register_peer("a", 432.0, 0.1);
    layer.register_peer("b", 900.0, 0.0);

    let vector = layer.harmonize(&Content::text("fan out"));
    let report = layer.broadcast(&vector, &[]);

    assert_eq!(report.delivered.len(), 2);
    assert!(report.filtered.is_empty());
}

#[test]
fn test_tune_converges_to_aligned_peer_mean() {
    let mut layer = SignalLayer::new(SignalConfig::default());
    layer.register_peer("a", 440.0, 0.9);
    layer.register_peer("b", 450.0, 0.95);
    // Low alignment peers do not steer tuning
    layer.register_peer("noise", 300.0, 0.2);

    let mut frequency = layer.base_frequency();
    for _ in 0..100 {
        frequency = layer.tune(0.0);
        assert!((382.0..=482.0).contains(&frequency));
    }

    assert!((frequency - 445.0).abs() < 1.0, "settled at {}", frequency);
}

#[test]
fn test_tune_stays_within_band() {
    let mut layer = SignalLayer::new(SignalConfig::default());
    layer.register_peer("far", 900.0, 1.0);

    for _ in 0..200 {
        let frequency = layer.tune(0.0);
        assert!(frequency <= 482.0 + 1e-9);
    }
    assert!((layer.base_frequency() - 482.0).abs() < 1.0);
}

#[test]
fn test_tune_without_aligned_peers_uses_target() {
    let mut layer = SignalLayer::new(SignalConfig::default());
    for _ in 0..100 {
        layer.tune(420.0);
    }
    assert!((layer.base_frequency() - 420.0).abs() < 1.0);

    assert_eq!(layer.reset_frequency(), 432.0);
}

#[test]
fn test_configured_base_frequency_is_clamped() {
    let layer = SignalLayer::new(SignalConfig {
        base_frequency: 1000.0,
        ..SignalConfig::default()
    });
    assert_eq!(layer.base_frequency(), 482.0);
}

#[test]
fn test_coherence_single_peer_is_full() {
    let mut layer = SignalLayer::new(SignalConfig::default());
    layer.register_peer("solo", 432.0, 0.4);
    assert_eq!(layer.coherence()["solo"], 1.0);
}
