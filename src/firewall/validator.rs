//! The validation firewall: verdicts, transforms, learning and recalibration.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::patterns::{PatternScore, PatternSeed, PatternTable, Polarity};
use super::rules::{
    default_rules, flagged_phrases, quality_of, replace_phrase, ContentMetrics, RuleAction,
    RuleOverride, ValidationRule,
};
use crate::domain::content::tokenize;
use crate::domain::Content;
use crate::error::FirewallError;

pub const PURIFIED_MARKER: &str = "[purified]";
pub const ELEVATED_MARKER: &str = "[elevated]";
pub const PROVENANCE_FIELD: &str = "_provenance";
const REDACTION: &str = "***";

/// Firewall configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallConfig {
    /// Per-rule threshold/action overrides, keyed by rule id
    #[serde(default)]
    pub rules: BTreeMap<String, RuleOverride>,

    /// Patterns learned at construction
    #[serde(default)]
    pub patterns: Vec<PatternSeed>,

    /// Content larger than this closes the gate (default: 64 KiB)
    #[serde(default = "default_max_content_bytes")]
    pub max_content_bytes: usize,

    /// Decisions kept for learning (default: 50)
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Threshold change per feedback (default: 0.02)
    #[serde(default = "default_learning_step")]
    pub learning_step: f64,

    /// Pattern confidence change per agreement or disagreement (default: 0.05)
    #[serde(default = "default_confidence_step")]
    pub confidence_step: f64,

    /// Confidence given to newly learned patterns (default: 0.5)
    #[serde(default = "default_initial_confidence")]
    pub initial_confidence: f64,

    #[serde(default = "default_min_threshold")]
    pub min_threshold: f64,

    #[serde(default = "default_max_threshold")]
    pub max_threshold: f64,

    /// Pattern score at or below which content is at least purified (default: -0.3)
    #[serde(default = "default_purify_score")]
    pub purify_score: f64,

    /// Pattern score at or above which content is at least elevated (default: 0.3)
    #[serde(default = "default_elevate_score")]
    pub elevate_score: f64,

    /// Window samples needed before recalibration is considered (default: 10)
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Block+purify rate that calls for recalibration (default: 0.5)
    #[serde(default = "default_danger_rate")]
    pub danger_rate: f64,

    /// Threshold raise per recalibration (default: 0.05)
    #[serde(default = "default_recalibration_step")]
    pub recalibration_step: f64,

    /// Patterns below this confidence are dropped on recalibration (default: 0.1)
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,

    /// Quality gained by elevation (default: 0.1)
    #[serde(default = "default_elevation_boost")]
    pub elevation_boost: f64,

    /// Suspected false positives tolerated per suspected false negative (default: 1.0)
    #[serde(default = "default_target_fp_fn_ratio")]
    pub target_fp_fn_ratio: f64,

    /// Validations between automatic threshold adjustments; 0 disables them (default: 10)
    #[serde(default = "default_balance_interval")]
    pub balance_interval: usize,
}

fn default_max_content_bytes() -> usize {
    64 * 1024
}
fn default_window_size() -> usize {
    50
}
fn default_learning_step() -> f64 {
    0.02
}
fn default_confidence_step() -> f64 {
    0.05
}
fn default_initial_confidence() -> f64 {
    0.5
}
fn default_min_threshold() -> f64 {
    0.05
}
fn default_max_threshold() -> f64 {
    1.0
}
fn default_purify_score() -> f64 {
    -0.3
}
fn default_elevate_score() -> f64 {
    0.3
}
fn default_min_samples() -> usize {
    10
}
fn default_danger_rate() -> f64 {
    0.5
}
fn default_recalibration_step() -> f64 {
    0.05
}
fn default_confidence_floor() -> f64 {
    0.1
}
fn default_elevation_boost() -> f64 {
    0.1
}
fn default_target_fp_fn_ratio() -> f64 {
    1.0
}
fn default_balance_interval() -> usize {
    10
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            rules: BTreeMap::new(),
            patterns: Vec::new(),
            max_content_bytes: default_max_content_bytes(),
            window_size: default_window_size(),
            learning_step: default_learning_step(),
            confidence_step: default_confidence_step(),
            initial_confidence: default_initial_confidence(),
            min_threshold: default_min_threshold(),
            max_threshold: default_max_threshold(),
            purify_score: default_purify_score(),
            elevate_score: default_elevate_score(),
            min_samples: default_min_samples(),
            danger_rate: default_danger_rate(),
            recalibration_step: default_recalibration_step(),
            confidence_floor: default_confidence_floor(),
            elevation_boost: default_elevation_boost(),
            target_fp_fn_ratio: default_target_fp_fn_ratio(),
            balance_interval: default_balance_interval(),
        }
    }
}

/// The outcome of validating one piece of content
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub id: Uuid,
    pub decision: RuleAction,
    /// Decision from the rules alone, before pattern escalation
    pub rule_decision: RuleAction,
    /// Ids of the rules that triggered
    pub triggered: Vec<String>,
    pub metrics: ContentMetrics,
    pub patterns: PatternScore,
    /// Set when scoring failed and the firewall blocked by default
    pub failed_closed: bool,
    pub reason: String,
}

impl Verdict {
    fn fail_closed(error: &FirewallError) -> Self {
        Self {
            id: Uuid::new_v4(),
            decision: RuleAction::Block,
            rule_decision: RuleAction::Block,
            triggered: Vec::new(),
            metrics: ContentMetrics::default(),
            patterns: PatternScore::default(),
            failed_closed: true,
            reason: format!("scoring failed: {}", error),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.decision == RuleAction::Block
    }
}

/// Elevated content and the quality change it was credited with
#[derive(Debug, Clone, Serialize)]
pub struct Elevation {
    pub content: Content,
    pub quality_before: f64,
    pub quality_after: f64,
}

/// Where the rules and the learned patterns disagreed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disagreement {
    /// Rules intervened on content the patterns rate positive
    FalsePositive,
    /// Only the patterns caught content the rules let through
    FalseNegative,
}

#[derive(Debug, Clone)]
struct DecisionRecord {
    verdict_id: Uuid,
    decision: RuleAction,
    rule_decision: RuleAction,
    triggered: Vec<String>,
    matched: Vec<String>,
    disagreement: Option<Disagreement>,
}

/// What a feedback call changed
#[derive(Debug, Clone, Serialize)]
pub enum Feedback {
    Confirmed,
    FalsePositive { thresholds_raised: Vec<String> },
    FalseNegative { thresholds_lowered: Vec<String> },
}

/// What an automatic threshold adjustment saw and changed
#[derive(Debug, Clone, Default, Serialize)]
pub struct BalanceReport {
    pub suspected_false_positives: usize,
    pub suspected_false_negatives: usize,
    pub thresholds_raised: Vec<String>,
    pub thresholds_lowered: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecalibrationReport {
    pub block_rate_before: f64,
    pub thresholds_raised: usize,
    pub patterns_pruned: usize,
}

/// Read-only projection of the firewall
#[derive(Debug, Clone, Serialize)]
pub struct FirewallStatus {
    pub rules: Vec<ValidationRule>,
    pub decision_counts: BTreeMap<String, u64>,
    pub learned_patterns: usize,
    pub total_validations: u64,
    pub recalibrations: u64,
    pub block_rate: f64,
    pub false_positives: u64,
    pub false_negatives: u64,
    pub threshold_adjustments: u64,
}

/// The validation firewall
pub struct Firewall {
    config: FirewallConfig,
    rules: Vec<ValidationRule>,
    patterns: PatternTable,
    window: VecDeque<DecisionRecord>,
    decision_counts: BTreeMap<RuleAction, u64>,
    total_validations: u64,
    recalibrations: u64,
    false_positives: u64,
    false_negatives: u64,
    threshold_adjustments: u64,
}

impl Firewall {
    pub fn new(config: FirewallConfig) -> Self {
        let mut rules = default_rules();
        for rule in &mut rules {
            if let Some(o) = config.rules.get(&rule.id) {
                if let Some(threshold) = o.threshold {
                    rule.threshold = threshold;
                }
                if let Some(action) = o.action {
                    rule.action = action;
                }
                if let Some(active) = o.active {
                    rule.active = active;
                }
            }
        }

        let mut patterns = PatternTable::new();
        for seed in &config.patterns {
            patterns.learn(&seed.token, seed.impact, config.initial_confidence);
        }

        Self {
            config,
            rules,
            patterns,
            window: VecDeque::new(),
            decision_counts: BTreeMap::new(),
            total_validations: 0,
            recalibrations: 0,
            false_positives: 0,
            false_negatives: 0,
            threshold_adjustments: 0,
        }
    }

    pub fn config(&self) -> &FirewallConfig {
        &self.config
    }

    pub fn rules(&self) -> &[ValidationRule] {
        &self.rules
    }

    pub fn rule(&self, id: &str) -> Option<&ValidationRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn patterns(&self) -> &PatternTable {
        &self.patterns
    }

    pub fn learn_pattern(&mut self, token: &str, impact: f64) {
        debug!(token = token, impact, "Learned pattern");
        self.patterns.learn(token, impact, self.config.initial_confidence);
    }

    pub fn forget_pattern(&mut self, token: &str) -> bool {
        self.patterns.forget(token).is_some()
    }

    fn evaluate(&self, text: &str) -> Result<Verdict, FirewallError> {
        let metrics = ContentMetrics::measure(text, self.config.max_content_bytes);

        let mut decision = RuleAction::Allow;
        let mut triggered = Vec::new();
        for rule in self.rules.iter().filter(|r| r.active) {
            if metrics.metric(rule.kind)? >= rule.threshold {
                triggered.push(rule.id.clone());
                decision = decision.max(rule.action);
            }
        }

        let rule_decision = decision;
        let patterns = self.patterns.score(&tokenize(text))?;
        if patterns.score <= self.config.purify_score || (patterns.negative >= 2 && patterns.positive == 0) {
            decision = decision.max(RuleAction::Purify);
        } else if patterns.score >= self.config.elevate_score {
            decision = decision.max(RuleAction::Elevate);
        }

        let reason = if triggered.is_empty() {
            format!("pattern score {:.2}", patterns.score)
        } else {
            format!("rules {}", triggered.join(", "))
        };
        Ok(Verdict {
            id: Uuid::new_v4(),
            decision,
            rule_decision,
            triggered,
            metrics,
            patterns,
            failed_closed: false,
            reason,
        })
    }

    /// Decide what to do with content.
    ///
    /// Scoring errors fail closed to `Block`. Every verdict enters the
    /// learning window.
    pub fn validate(&mut self, content: &Content) -> Verdict {
        let text = content.as_text();
        let verdict = match self.evaluate(&text) {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "Firewall scoring failed, blocking");
                Verdict::fail_closed(&e)
            }
        };

        for token in &verdict.patterns.matched {
            let agreed = self.patterns.get(token).and_then(|p| match p.polarity {
                Polarity::Negative => Some(verdict.decision >= RuleAction::Purify),
                Polarity::Positive => Some(verdict.decision <= RuleAction::Elevate),
                Polarity::Neutral => None,
            });
            self.patterns.reinforce(token, agreed, self.config.confidence_step);
        }

        self.record(&verdict);

        if verdict.decision >= RuleAction::Purify {
            info!(
                verdict = %verdict.id,
                decision = verdict.decision.as_str(),
                reason = %verdict.reason,
                "Firewall intervened"
            );
        } else {
            debug!(verdict = %verdict.id, decision = verdict.decision.as_str(), "Content validated");
        }
        verdict
    }

    fn record(&mut self, verdict: &Verdict) {
        self.total_validations += 1;
        *self.decision_counts.entry(verdict.decision).or_insert(0) += 1;

        while self.window.len() >= self.config.window_size.max(1) {
            self.window.pop_front();
        }
        self.window.push_back(DecisionRecord {
            verdict_id: verdict.id,
            decision: verdict.decision,
            rule_decision: verdict.rule_decision,
            triggered: verdict.triggered.clone(),
            matched: verdict.patterns.matched.clone(),
            disagreement: self.disagreement(verdict),
        });

        let interval = self.config.balance_interval as u64;
        if interval > 0 && self.total_validations % interval == 0 {
            self.balance_thresholds();
        }
    }

    fn disagreement(&self, verdict: &Verdict) -> Option<Disagreement> {
        if verdict.failed_closed {
            return None;
        }
        let intervened = verdict.rule_decision >= RuleAction::Purify;
        let positive_evidence = verdict.patterns.negative == 0
            && verdict.patterns.positive > 0
            && verdict.patterns.score >= self.config.elevate_score;

        if intervened && positive_evidence {
            Some(Disagreement::FalsePositive)
        } else if !intervened && verdict.decision >= RuleAction::Purify {
            Some(Disagreement::FalseNegative)
        } else {
            None
        }
    }

    /// Move intervening rule thresholds toward the configured balance of
    /// suspected false positives to false negatives in the window.
    ///
    /// Runs every `balance_interval` validations once the window holds
    /// `min_samples`; each call moves a threshold by at most `learning_step`.
    pub fn balance_thresholds(&mut self) -> BalanceReport {
        let mut report = BalanceReport::default();
        if self.window.len() < self.config.min_samples {
            return report;
        }

        let mut fired: Vec<String> = Vec::new();
        let mut missed: Vec<(RuleAction, RuleAction)> = Vec::new();
        for record in &self.window {
            match record.disagreement {
                Some(Disagreement::FalsePositive) => {
                    report.suspected_false_positives += 1;
                    fired.extend(record.triggered.iter().cloned());
                }
                Some(Disagreement::FalseNegative) => {
                    report.suspected_false_negatives += 1;
                    missed.push((record.rule_decision, record.decision));
                }
                None => {}
            }
        }

        let excess = report.suspected_false_positives as f64
            - self.config.target_fp_fn_ratio.max(0.0) * report.suspected_false_negatives as f64;
        if excess == 0.0 {
            return report;
        }

        let step = self.config.learning_step;
        let (min, max) = (self.config.min_threshold, self.config.max_threshold);

        if excess > 0.0 {
            for rule in self.rules.iter_mut() {
                if rule.action >= RuleAction::Purify && fired.contains(&rule.id) {
                    rule.threshold = (rule.threshold + step).clamp(min, max);
                    report.thresholds_raised.push(rule.id.clone());
                }
            }
        } else {
            for rule in self.rules.iter_mut().filter(|r| r.active && r.action >= RuleAction::Purify) {
                if missed.iter().any(|(ruled, decided)| rule.action > *ruled && rule.action <= *decided) {
                    rule.threshold = (rule.threshold - step).clamp(min, max);
                    report.thresholds_lowered.push(rule.id.clone());
                }
            }
        }

        if !report.thresholds_raised.is_empty() || !report.thresholds_lowered.is_empty() {
            self.threshold_adjustments += 1;
            info!(
                suspected_fp = report.suspected_false_positives,
                suspected_fn = report.suspected_false_negatives,
                raised = ?report.thresholds_raised,
                lowered = ?report.thresholds_lowered,
                "Firewall thresholds balanced"
            );
        }
        report
    }

    /// Remove flagged phrases and negative learned tokens, then mark the
    /// content. A single pass; applying it twice changes nothing.
    pub fn purify(&self, content: &Content) -> Content {
        let mut phrases: Vec<String> = flagged_phrases().into_iter().map(str::to_string).collect();
        phrases.extend(
            self.patterns
                .iter()
                .filter(|p| p.polarity == Polarity::Negative)
                .map(|p| p.token.clone()),
        );

        let cleaned = content.map_text(|text| {
            phrases
                .iter()
                .fold(text.to_string(), |acc, phrase| replace_phrase(&acc, phrase, REDACTION))
        });
        let purified = mark(cleaned, PURIFIED_MARKER, "purified");

        debug!(checksum = %purified.checksum(), "Content purified");
        purified
    }

    /// Tidy the content and credit it with a quality boost
    pub fn elevate(&self, content: &Content) -> Elevation {
        let quality_before = quality_of(&content.tokens());
        let polished = content.map_text(polish);
        let content = mark(polished, ELEVATED_MARKER, "elevated");
        let quality_after = (quality_before + self.config.elevation_boost).min(1.0);

        Elevation {
            content,
            quality_before,
            quality_after,
        }
    }

    /// Correct a past verdict with the decision it should have produced.
    ///
    /// Over-severe verdicts raise the thresholds of the rules that fired;
    /// under-severe verdicts lower the thresholds of rules that would have
    /// produced the expected action.
    pub fn record_feedback(&mut self, verdict_id: Uuid, expected: RuleAction) -> Result<Feedback, FirewallError> {
        let record = self
            .window
            .iter()
            .find(|r| r.verdict_id == verdict_id)
            .cloned()
            .ok_or(FirewallError::UnknownVerdict(verdict_id))?;

        let step = self.config.learning_step;
        let (min, max) = (self.config.min_threshold, self.config.max_threshold);

        let feedback = if expected < record.decision {
            self.false_positives += 1;
            let mut raised = Vec::new();
            for rule in self.rules.iter_mut() {
                if record.triggered.contains(&rule.id) && rule.action > expected {
                    rule.threshold = (rule.threshold + step).clamp(min, max);
                    raised.push(rule.id.clone());
                }
            }
            for token in &record.matched {
                if self.patterns.get(token).is_some_and(|p| p.polarity == Polarity::Negative) {
                    self.patterns.adjust_confidence(token, -self.config.confidence_step);
                }
            }
            Feedback::FalsePositive {
                thresholds_raised: raised,
            }
        } else if expected > record.decision {
            self.false_negatives += 1;
            let mut lowered = Vec::new();
            for rule in self.rules.iter_mut() {
                if rule.active && rule.action > record.decision && rule.action <= expected {
                    rule.threshold = (rule.threshold - step).clamp(min, max);
                    lowered.push(rule.id.clone());
                }
            }
            for token in &record.matched {
                let polarity = self.patterns.get(token).map(|p| p.polarity);
                match polarity {
                    Some(Polarity::Negative) => self.patterns.adjust_confidence(token, self.config.confidence_step),
                    Some(Polarity::Positive) => self.patterns.adjust_confidence(token, -self.config.confidence_step),
                    _ => {}
                }
            }
            Feedback::FalseNegative {
                thresholds_lowered: lowered,
            }
        } else {
            Feedback::Confirmed
        };

        info!(verdict = %verdict_id, expected = expected.as_str(), feedback = ?feedback, "Firewall feedback");
        Ok(feedback)
    }

    /// Share of windowed decisions that blocked or purified
    pub fn block_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let intervened = self
            .window
            .iter()
            .filter(|r| r.decision >= RuleAction::Purify)
            .count();
        intervened as f64 / self.window.len() as f64
    }

    pub fn needs_recalibration(&self) -> bool {
        self.window.len() >= self.config.min_samples && self.block_rate() >= self.config.danger_rate
    }

    /// One self-healing step: clear transient state, raise thresholds
    /// conservatively and drop low-confidence patterns.
    pub fn recalibrate(&mut self) -> RecalibrationReport {
        let block_rate_before = self.block_rate();
        self.window.clear();
        self.decision_counts.clear();

        let (step, min, max) = (
            self.config.recalibration_step,
            self.config.min_threshold,
            self.config.max_threshold,
        );
        let mut thresholds_raised = 0;
        for rule in self.rules.iter_mut() {
            let raised = (rule.threshold + step).clamp(min, max);
            if raised > rule.threshold {
                thresholds_raised += 1;
            }
            rule.threshold = raised;
        }

        let patterns_pruned = self.patterns.prune(self.config.confidence_floor);
        self.recalibrations += 1;

        info!(
            block_rate_before,
            thresholds_raised,
            patterns_pruned,
            "Firewall recalibrated"
        );
        RecalibrationReport {
            block_rate_before,
            thresholds_raised,
            patterns_pruned,
        }
    }

    pub fn status(&self) -> FirewallStatus {
        FirewallStatus {
            rules: self.rules.clone(),
            decision_counts: self
                .decision_counts
                .iter()
                .map(|(action, count)| (action.as_str().to_string(), *count))
                .collect(),
            learned_patterns: self.patterns.len(),
            total_validations: self.total_validations,
            recalibrations: self.recalibrations,
            block_rate: self.block_rate(),
            false_positives: self.false_positives,
            false_negatives: self.false_negatives,
            threshold_adjustments: self.threshold_adjustments,
        }
    }
}

/// Attach a provenance marker once
fn mark(content: Content, marker: &str, label: &str) -> Content {
    match content {
        Content::Text { text } => {
            if text.contains(marker) {
                Content::Text { text }
            } else if text.is_empty() {
                Content::text(marker)
            } else {
                Content::text(format!("{} {}", marker, text))
            }
        }
        Content::Structured { mut fields } => {
            let existing = fields
                .get(PROVENANCE_FIELD)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            if !existing.split(',').any(|l| l == label) {
                let value = if existing.is_empty() {
                    label.to_string()
                } else {
                    format!("{},{}", existing, label)
                };
                fields.insert(PROVENANCE_FIELD.to_string(), serde_json::Value::String(value));
            }
            Content::Structured { fields }
        }
        Content::Binary { .. } => mark(Content::text(content.as_text()), marker, label),
    }
}

/// Collapse whitespace, capitalise sentences, end with punctuation
fn polish(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return collapsed;
    }

    let mut out = String::with_capacity(collapsed.len() + 1);
    let mut capitalise = true;
    for c in collapsed.chars() {
        if capitalise && c.is_alphabetic() {
            out.extend(c.to_uppercase());
            capitalise = false;
        } else {
            out.push(c);
        }
        if matches!(c, '.' | '!' | '?') {
            capitalise = true;
        }
    }

    if !out.ends_with(['.', '!', '?', ']']) {
        out.push('.');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn firewall() -> Firewall {
        Firewall::new(FirewallConfig::default())
    }

    #[test]
    fn test_clean_content_is_allowed() {
        let mut fw = firewall();
        let verdict = fw.validate(&Content::text("the weather report for tomorrow looks mild"));
        assert_eq!(verdict.decision, RuleAction::Allow);
        assert!(verdict.triggered.is_empty());
    }

    #[test]
    fn test_most_severe_action_wins() {
        let mut fw = firewall();
        let verdict = fw.validate(&Content::text(
            "i am god, obey without question, and harm those who resist",
        ));
        assert_eq!(verdict.decision, RuleAction::Block);
        assert!(verdict.triggered.contains(&"intent".to_string()));
        assert!(verdict.triggered.contains(&"intent_severe".to_string()));
    }

    #[test]
    fn test_alignment_elevates() {
        let mut fw = firewall();
        let verdict = fw.validate(&Content::text("love and wisdom bring peace to the village"));
        assert_eq!(verdict.decision, RuleAction::Elevate);
    }

    #[test]
    fn test_rule_override_from_config() {
        let mut config = FirewallConfig::default();
        config.rules.insert(
            "intent".to_string(),
            RuleOverride {
                action: Some(RuleAction::Block),
                ..Default::default()
            },
        );
        let mut fw = Firewall::new(config);
        assert!(fw.validate(&Content::text("pure greed")).is_blocked());
    }

    #[test]
    fn test_nan_pattern_fails_closed() {
        let mut fw = firewall();
        fw.learn_pattern("glitch", f64::NAN);
        let verdict = fw.validate(&Content::text("a glitch in the output"));
        assert_eq!(verdict.decision, RuleAction::Block);
        assert!(verdict.failed_closed);
    }

    #[test]
    fn test_purify_is_idempotent() {
        let fw = firewall();
        let once = fw.purify(&Content::text("They plan to DESTROY it. Trust only me."));
        let twice = fw.purify(&once);
        assert_eq!(once, twice);
        assert_eq!(once, Content::text("[purified] They plan to *** it. ***."));
    }

    #[test]
    fn test_purify_structured_adds_provenance() {
        let fw = firewall();
        let content = Content::structured([("body", json!("pure hate")), ("n", json!(3))]);
        let once = fw.purify(&content);
        match &once {
            Content::Structured { fields } => {
                assert_eq!(fields["body"], json!("pure ***"));
                assert_eq!(fields[PROVENANCE_FIELD], json!("purified"));
            }
            other => panic!("unexpected content: {:?}", other),
        }
        assert_eq!(fw.purify(&once), once);
    }

    #[test]
    fn test_elevate_polishes_and_boosts() {
        let fw = firewall();
        let elevation = fw.elevate(&Content::text("hello   there.  how are you"));
        assert_eq!(
            elevation.content,
            Content::text("[elevated] Hello there. How are you.")
        );
        assert!((elevation.quality_after - elevation.quality_before - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_false_positive_raises_thresholds() {
        let mut fw = firewall();
        let verdict = fw.validate(&Content::text("a story about greed"));
        assert_eq!(verdict.decision, RuleAction::Purify);

        let feedback = fw.record_feedback(verdict.id, RuleAction::Allow).unwrap();
        assert!(matches!(feedback, Feedback::FalsePositive { .. }));
        assert!((fw.rule("intent").unwrap().threshold - 0.32).abs() < 1e-9);
        assert_eq!(fw.status().false_positives, 1);
    }

    #[test]
    fn test_false_negative_lowers_thresholds() {
        let mut fw = firewall();
        let verdict = fw.validate(&Content::text("plain words"));
        fw.record_feedback(verdict.id, RuleAction::Purify).unwrap();
        assert!((fw.rule("intent").unwrap().threshold - 0.28).abs() < 1e-9);
        assert!((fw.rule("alignment").unwrap().threshold - 0.28).abs() < 1e-9);
        assert_eq!(fw.rule("gate").unwrap().threshold, 1.0);
    }

    #[test]
    fn test_unknown_verdict_feedback() {
        let mut fw = firewall();
        assert!(fw.record_feedback(Uuid::new_v4(), RuleAction::Allow).is_err());
    }

    #[test]
    fn test_recalibration_cycle() {
        let mut fw = firewall();
        fw.learn_pattern("faint", -0.5);
        for _ in 0..10 {
            fw.validate(&Content::text("greed everywhere"));
        }
        assert!(fw.needs_recalibration());

        // Drive the faint pattern below the confidence floor
        for _ in 0..10 {
            fw.patterns.adjust_confidence("faint", -0.05);
        }

        let report = fw.recalibrate();
        assert_eq!(report.patterns_pruned, 1);
        assert!(!fw.needs_recalibration());
        assert!((fw.rule("intent").unwrap().threshold - 0.35).abs() < 1e-9);
        assert_eq!(fw.rule("gate").unwrap().threshold, 1.0);
        assert_eq!(fw.status().recalibrations, 1);
    }
}
