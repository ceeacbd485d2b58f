//! Firewall Integration Tests
//!
//! Tests for verdicts, purification, feedback learning and recalibration.

use harmonia::firewall::{Feedback, Firewall, FirewallConfig, PatternSeed, RuleAction};
use harmonia::error::FirewallError;
use harmonia::Content;

fn firewall() -> Firewall {
    Firewall::new(FirewallConfig::default())
}

#[test]
fn test_plain_content_is_allowed() {
    let mut firewall = firewall();
    let verdict = firewall.validate(&Content::text(
        "The team met to review the quarterly plan and agreed on next steps for the launch",
    ));

    assert_eq!(verdict.decision, RuleAction::Allow);
    assert!(verdict.triggered.is_empty());
    assert!(!verdict.failed_closed);
}

#[test]
fn test_severe_threat_is_blocked() {
    let mut firewall = firewall();
    let verdict = firewall.validate(&Content::text("I am god, worship me and obey without question"));

    assert!(verdict.is_blocked());
    assert!(verdict.triggered.contains(&"intent_severe".to_string()));
    assert!(verdict.metrics.families.contains(&"manipulation".to_string()));
}

#[test]
fn test_affirming_content_is_elevated() {
    let mut firewall = firewall();
    let verdict = firewall.validate(&Content::text(
        "love compassion wisdom and peace bring harmony to the whole group",
    ));
    assert_eq!(verdict.decision, RuleAction::Elevate);

    let elevation = firewall.elevate(&Content::text("love   and light"));
    assert!(elevation.content.as_text().starts_with("[elevated]"));
    assert!(elevation.quality_after > elevation.quality_before);
}

#[test]
fn test_two_negative_patterns_trigger_purify_or_block() {
    let mut firewall = Firewall::new(FirewallConfig {
        patterns: vec![
            PatternSeed {
                token: "spam".to_string(),
                impact: -0.8,
            },
            PatternSeed {
                token: "scam".to_string(),
                impact: -0.8,
            },
        ],
        ..FirewallConfig::default()
    });

    let verdict = firewall.validate(&Content::text("this offer is spam and a scam"));

    assert!(verdict.decision >= RuleAction::Purify);
    assert_eq!(verdict.patterns.negative, 2);
}

#[test]
fn test_purify_is_idempotent() {
    let mut firewall = firewall();
    firewall.learn_pattern("spam", -0.9);
    let content = Content::text("they want to harm and destroy the spam filter");

    let once = firewall.purify(&content);
    let twice = firewall.purify(&once);

    assert_eq!(once, twice);
    let text = once.as_text();
    assert!(text.starts_with("[purified]"));
    assert!(!text.contains("harm"));
    assert!(!text.contains("spam"));
    assert!(text.contains("filter"));
}

#[test]
fn test_purify_structured_content_records_provenance() {
    let firewall = firewall();
    let content = Content::structured([
        ("title", serde_json::json!("doom is coming")),
        ("count", serde_json::json!(3)),
    ]);

    let purified = firewall.purify(&content);
    let again = firewall.purify(&purified);

    assert_eq!(purified, again);
    match purified {
        Content::Structured { fields } => {
            assert_eq!(fields["title"], serde_json::json!("*** is coming"));
            assert_eq!(fields["count"], serde_json::json!(3));
            assert_eq!(fields["_provenance"], serde_json::json!("purified"));
        }
        other => panic!("expected structured content, got {:?}", other),
    }
}

#[test]
fn test_non_finite_score_fails_closed() {
    let mut firewall = firewall();
    firewall.learn_pattern("glitch", f64::NAN);

    let verdict = firewall.validate(&Content::text("a glitch in the matrix"));

    assert!(verdict.is_blocked());
    assert!(verdict.failed_closed);
}

#[test]
fn test_false_positive_feedback_raises_thresholds() {
    let mut firewall = firewall();
    let before = firewall.rule("intent_severe").unwrap().threshold;
    let verdict = firewall.validate(&Content::text("I am god, worship me and obey without question"));

    let feedback = firewall.record_feedback(verdict.id, RuleAction::Allow).unwrap();

    match feedback {
        Feedback::FalsePositive { thresholds_raised } => {
            assert!(thresholds_raised.contains(&"intent_severe".to_string()));
        }
        other => panic!("expected false positive, got {:?}", other),
    }
    assert!(firewall.rule("intent_severe").unwrap().threshold > before);
    assert_eq!(firewall.status().false_positives, 1);
}

#[test]
fn test_false_negative_feedback_lowers_thresholds() {
    let mut firewall = firewall();
    let before = firewall.rule("intent").unwrap().threshold;
    let verdict = firewall.validate(&Content::text(
        "The team met to review the quarterly plan and agreed on next steps for the launch",
    ));

    let feedback = firewall.record_feedback(verdict.id, RuleAction::Purify).unwrap();

    assert!(matches!(feedback, Feedback::FalseNegative { .. }));
    assert!(firewall.rule("intent").unwrap().threshold < before);
}

#[test]
fn test_feedback_for_unknown_verdict() {
    let mut firewall = firewall();
    let result = firewall.record_feedback(uuid::Uuid::new_v4(), RuleAction::Allow);
    assert!(matches!(result, Err(FirewallError::UnknownVerdict(_))));
}

#[test]
fn test_recalibration_after_dangerous_block_rate() {
    let mut firewall = firewall();
    for _ in 0..10 {
        firewall.validate(&Content::text("I am god, worship me and obey without question"));
    }
    assert!(firewall.needs_recalibration());
    let before = firewall.rule("quality").unwrap().threshold;

    let report = firewall.recalibrate();

    assert_eq!(report.block_rate_before, 1.0);
    assert!(!firewall.needs_recalibration());
    assert!(firewall.rule("quality").unwrap().threshold > before);
    assert_eq!(firewall.status().recalibrations, 1);
}

fn seeded(patterns: &[(&str, f64)]) -> Firewall {
    Firewall::new(FirewallConfig {
        patterns: patterns
            .iter()
            .map(|(token, impact)| PatternSeed {
                token: token.to_string(),
                impact: *impact,
            })
            .collect(),
        ..FirewallConfig::default()
    })
}

#[test]
fn test_thresholds_drift_from_validations_alone() {
    let mut firewall = seeded(&[("spam", -0.8), ("scam", -0.8)]);
    let text = "The newsletter offer looked like spam and the prize turned out to be a scam";

    for _ in 0..9 {
        let verdict = firewall.validate(&Content::text(text));
        assert_eq!(verdict.rule_decision, RuleAction::Allow);
        assert_eq!(verdict.decision, RuleAction::Purify);
    }
    assert_eq!(firewall.rule("intent").unwrap().threshold, 0.3);

    // The tenth validation fills the sample window and triggers a balance step
    firewall.validate(&Content::text(text));

    assert!((firewall.rule("intent").unwrap().threshold - 0.28).abs() < 1e-9);
    assert_eq!(firewall.rule("intent_severe").unwrap().threshold, 0.8);
    assert_eq!(firewall.rule("alignment").unwrap().threshold, 0.3);
    assert_eq!(firewall.status().threshold_adjustments, 1);
}

#[test]
fn test_balance_target_tolerates_missed_content() {
    let mut firewall = Firewall::new(FirewallConfig {
        target_fp_fn_ratio: 0.0,
        patterns: vec![PatternSeed {
            token: "scam".to_string(),
            impact: -0.9,
        }],
        ..FirewallConfig::default()
    });

    for _ in 0..10 {
        firewall.validate(&Content::text("that lottery message was obviously a scam"));
    }

    // With no false positives allowed, missed content never lowers thresholds
    let report = firewall.balance_thresholds();
    assert_eq!(report.suspected_false_negatives, 10);
    assert!(report.thresholds_lowered.is_empty());
    assert_eq!(firewall.rule("intent").unwrap().threshold, 0.3);
}

#[test]
fn test_purify_redacts_non_ascii_learned_token() {
    let mut firewall = firewall();
    firewall.learn_pattern("betrüger", -0.9);

    let verdict = firewall.validate(&Content::text("BETRÜGER überall im Netz"));
    assert_eq!(verdict.patterns.matched, vec!["betrüger".to_string()]);

    let purified = firewall.purify(&Content::text("BETRÜGER überall im Netz"));
    assert_eq!(purified, Content::text("[purified] *** überall im Netz"));
}
