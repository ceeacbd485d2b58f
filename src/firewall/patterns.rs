//! Learned token patterns and their adaptive weights.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::FirewallError;

/// Impacts within this distance of zero are neutral
const NEUTRAL_BAND: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Positive,
    Negative,
    Neutral,
}

impl Polarity {
    pub fn of(impact: f64) -> Self {
        if impact > NEUTRAL_BAND {
            Polarity::Positive
        } else if impact < -NEUTRAL_BAND {
            Polarity::Negative
        } else {
            Polarity::Neutral
        }
    }
}

/// A token whose weight adapts from validation outcomes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub token: String,
    pub polarity: Polarity,
    /// Impact in [-1, 1]
    pub impact: f64,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Times the token has been seen in validated content
    pub frequency: u64,
}

/// A pattern supplied up front through configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternSeed {
    pub token: String,
    pub impact: f64,
}

/// How content scored against the pattern table
#[derive(Debug, Clone, Default, Serialize)]
pub struct PatternScore {
    /// Confidence-weighted mean impact of matched tokens
    pub score: f64,
    pub positive: usize,
    pub negative: usize,
    pub matched: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PatternTable {
    patterns: BTreeMap<String, LearnedPattern>,
}

impl PatternTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn get(&self, token: &str) -> Option<&LearnedPattern> {
        self.patterns.get(&token.to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &LearnedPattern> {
        self.patterns.values()
    }

    /// Add a pattern or replace an existing token's impact.
    ///
    /// Impact is stored as given so that a non-finite value surfaces at
    /// scoring time; finite values are clamped.
    pub fn learn(&mut self, token: &str, impact: f64, confidence: f64) {
        let token = token.trim().to_lowercase();
        if token.is_empty() {
            return;
        }
        let impact = if impact.is_finite() {
            impact.clamp(-1.0, 1.0)
        } else {
            impact
        };

        let pattern = self
            .patterns
            .entry(token.clone())
            .or_insert_with(|| LearnedPattern {
                token,
                polarity: Polarity::Neutral,
                impact: 0.0,
                confidence: confidence.clamp(0.0, 1.0),
                frequency: 0,
            });
        pattern.impact = impact;
        pattern.polarity = Polarity::of(impact);
    }

    pub fn forget(&mut self, token: &str) -> Option<LearnedPattern> {
        self.patterns.remove(&token.to_lowercase())
    }

    /// Score tokens against the table
    pub fn score(&self, tokens: &[String]) -> Result<PatternScore, FirewallError> {
        let mut result = PatternScore::default();
        let mut weighted = 0.0;
        let mut weight = 0.0;

        let mut seen: Vec<&str> = Vec::new();
        for token in tokens {
            if seen.contains(&token.as_str()) {
                continue;
            }
            seen.push(token);

            let Some(pattern) = self.patterns.get(token) else {
                continue;
            };
            if !pattern.impact.is_finite() || !pattern.confidence.is_finite() {
                return Err(FirewallError::NonFinite {
                    metric: format!("pattern '{}'", pattern.token),
                });
            }

            weighted += pattern.impact * pattern.confidence;
            weight += pattern.confidence;
            match pattern.polarity {
                Polarity::Positive => result.positive += 1,
                Polarity::Negative => result.negative += 1,
                Polarity::Neutral => {}
            }
            result.matched.push(pattern.token.clone());
        }

        result.score = if weight > 0.0 { weighted / weight } else { 0.0 };
        Ok(result)
    }

    /// Count a sighting and move confidence up or down by `step`
    pub fn reinforce(&mut self, token: &str, agreed: Option<bool>, step: f64) {
        if let Some(pattern) = self.patterns.get_mut(token) {
            pattern.frequency += 1;
            match agreed {
                Some(true) => pattern.confidence = (pattern.confidence + step).min(1.0),
                Some(false) => pattern.confidence = (pattern.confidence - step).max(0.0),
                None => {}
            }
        }
    }

    /// Shift confidence without counting a sighting
    pub fn adjust_confidence(&mut self, token: &str, delta: f64) {
        if let Some(pattern) = self.patterns.get_mut(token) {
            pattern.confidence = (pattern.confidence + delta).clamp(0.0, 1.0);
        }
    }

    /// Drop patterns whose confidence fell below `floor`
    pub fn prune(&mut self, floor: f64) -> usize {
        let before = self.patterns.len();
        self.patterns.retain(|_, p| p.confidence >= floor);
        before - self.patterns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_polarity_from_impact() {
        assert_eq!(Polarity::of(0.5), Polarity::Positive);
        assert_eq!(Polarity::of(-0.5), Polarity::Negative);
        assert_eq!(Polarity::of(0.05), Polarity::Neutral);
    }

    #[test]
    fn test_score_is_confidence_weighted() {
        let mut table = PatternTable::new();
        table.learn("good", 1.0, 0.75);
        table.learn("bad", -1.0, 0.25);

        let score = table.score(&tokens(&["good", "bad", "other"])).unwrap();
        assert!((score.score - 0.5).abs() < 1e-9);
        assert_eq!(score.positive, 1);
        assert_eq!(score.negative, 1);
        assert_eq!(score.matched.len(), 2);
    }

    #[test]
    fn test_repeated_tokens_count_once() {
        let mut table = PatternTable::new();
        table.learn("bad", -0.8, 0.5);
        let score = table.score(&tokens(&["bad", "bad"])).unwrap();
        assert_eq!(score.negative, 1);
    }

    #[test]
    fn test_non_finite_impact_is_an_error() {
        let mut table = PatternTable::new();
        table.learn("odd", f64::NAN, 0.5);
        assert!(table.score(&tokens(&["odd"])).is_err());
    }

    #[test]
    fn test_prune_below_floor() {
        let mut table = PatternTable::new();
        table.learn("keep", 0.5, 0.5);
        table.learn("drop", 0.5, 0.05);
        assert_eq!(table.prune(0.1), 1);
        assert!(table.get("keep").is_some());
        assert!(table.get("drop").is_none());
    }
}
