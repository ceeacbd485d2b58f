//! Validation firewall.
//!
//! Gates aggregate output with thresholded rules and a table of learned
//! token patterns, and adapts both from observed outcomes.
//! - rules: rule model, content metrics, phrase matching
//! - patterns: learned patterns and scoring
//! - validator: Firewall (validate, purify, elevate, feedback, recalibrate)

pub mod patterns;
pub mod rules;
pub mod validator;

pub use patterns::{LearnedPattern, PatternScore, PatternSeed, PatternTable, Polarity};
pub use rules::{ContentMetrics, RuleAction, RuleKind, RuleOverride, ValidationRule};
pub use validator::{
    BalanceReport, Elevation, Feedback, Firewall, FirewallConfig, FirewallStatus, RecalibrationReport,
    Verdict,
};
