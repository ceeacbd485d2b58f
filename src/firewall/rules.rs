//! Validation rules, content metrics and phrase handling.

use serde::{Deserialize, Serialize};

use crate::domain::content::tokenize;
use crate::error::FirewallError;

/// What a validation decides to do with content.
///
/// Ordered by severity: the most severe triggered action wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Allow,
    Elevate,
    Purify,
    Block,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Allow => "allow",
            RuleAction::Elevate => "elevate",
            RuleAction::Purify => "purify",
            RuleAction::Block => "block",
        }
    }
}

/// Which metric a rule reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    AlignmentCheck,
    IntentCheck,
    QualityFilter,
    GateCheck,
}

/// A thresholded rule; triggers when its metric reaches the threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRule {
    pub id: String,
    pub kind: RuleKind,
    pub threshold: f64,
    pub action: RuleAction,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl ValidationRule {
    pub fn new(id: impl Into<String>, kind: RuleKind, threshold: f64, action: RuleAction) -> Self {
        Self {
            id: id.into(),
            kind,
            threshold,
            action,
            active: true,
        }
    }
}

/// Partial override of a rule, keyed by rule id in configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleOverride {
    pub threshold: Option<f64>,
    pub action: Option<RuleAction>,
    pub active: Option<bool>,
}

pub fn default_rules() -> Vec<ValidationRule> {
    vec![
        ValidationRule::new("intent", RuleKind::IntentCheck, 0.3, RuleAction::Purify),
        ValidationRule::new("intent_severe", RuleKind::IntentCheck, 0.8, RuleAction::Block),
        ValidationRule::new("alignment", RuleKind::AlignmentCheck, 0.3, RuleAction::Elevate),
        ValidationRule::new("quality", RuleKind::QualityFilter, 0.9, RuleAction::Block),
        ValidationRule::new("gate", RuleKind::GateCheck, 1.0, RuleAction::Block),
    ]
}

/// A family of harmful phrases and the threat it adds when any one appears
pub struct ThreatFamily {
    pub name: &'static str,
    pub weight: f64,
    pub phrases: &'static [&'static str],
}

pub const THREAT_FAMILIES: &[ThreatFamily] = &[
    ThreatFamily {
        name: "negative_intent",
        weight: 0.3,
        phrases: &[
            "harm", "destroy", "manipulate", "deceive", "exploit", "hate", "anger", "revenge",
            "jealousy", "greed",
        ],
    },
    ThreatFamily {
        name: "ego_distortion",
        weight: 0.4,
        phrases: &[
            "i am superior",
            "only i know",
            "bow before",
            "worship me",
            "i am god",
            "absolute power",
            "submit to me",
        ],
    },
    ThreatFamily {
        name: "fear",
        weight: 0.2,
        phrases: &[
            "you will suffer",
            "eternal damnation",
            "punishment awaits",
            "be afraid",
            "doom",
            "catastrophe",
            "hopeless",
        ],
    },
    ThreatFamily {
        name: "manipulation",
        weight: 0.5,
        phrases: &[
            "don't think",
            "obey without question",
            "surrender your will",
            "give me everything",
            "trust only me",
            "ignore others",
        ],
    },
    ThreatFamily {
        name: "bypassing",
        weight: 0.15,
        phrases: &[
            "just think positive",
            "ignore your pain",
            "transcend everything",
            "emotions are illusion",
            "suffering is choice",
            "just love everyone",
        ],
    },
];

/// Vocabulary whose coverage is the alignment metric
pub const AFFIRMATIONS: &[&str] = &[
    "love",
    "compassion",
    "wisdom",
    "truth",
    "unity",
    "peace",
    "harmony",
    "service",
    "light",
    "healing",
];

/// Phrases that close the gate outright
pub const GATE_PHRASES: &[&str] = &[
    "ego inflation",
    "false light",
    "fear mongering",
    "separation consciousness",
    "power hunger",
    "divine impersonation",
];

/// Measured properties of a piece of content
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContentMetrics {
    /// Summed family weights, clamped to 1
    pub threat: f64,
    /// Affirmation vocabulary coverage in [0, 1]
    pub alignment: f64,
    /// Length and lexical diversity in [0, 1]
    pub quality: f64,
    /// 1.0 when a gate phrase appears or content is oversized
    pub gate: f64,
    /// Threat families that matched
    pub families: Vec<String>,
    /// Harmful and gate phrases found
    pub flagged: Vec<String>,
}

impl ContentMetrics {
    pub fn measure(text: &str, max_content_bytes: usize) -> Self {
        let mut metrics = ContentMetrics::default();

        for family in THREAT_FAMILIES {
            let hits: Vec<&str> = family
                .phrases
                .iter()
                .copied()
                .filter(|p| contains_phrase(text, p))
                .collect();
            if !hits.is_empty() {
                metrics.threat += family.weight;
                metrics.families.push(family.name.to_string());
                metrics.flagged.extend(hits.iter().map(|h| h.to_string()));
            }
        }
        metrics.threat = metrics.threat.min(1.0);

        let tokens = tokenize(text);
        let present = AFFIRMATIONS
            .iter()
            .filter(|a| tokens.iter().any(|t| t == *a))
            .count();
        metrics.alignment = present as f64 / AFFIRMATIONS.len() as f64;

        metrics.quality = quality_of(&tokens);

        let gate_hits: Vec<&str> = GATE_PHRASES
            .iter()
            .copied()
            .filter(|p| contains_phrase(text, p))
            .collect();
        if !gate_hits.is_empty() || text.len() > max_content_bytes {
            metrics.gate = 1.0;
        }
        metrics.flagged.extend(gate_hits.iter().map(|h| h.to_string()));

        metrics
    }

    /// The value a rule of `kind` compares against its threshold
    pub fn metric(&self, kind: RuleKind) -> Result<f64, FirewallError> {
        let (name, value) = match kind {
            RuleKind::IntentCheck => ("threat", self.threat),
            RuleKind::AlignmentCheck => ("alignment", self.alignment),
            RuleKind::QualityFilter => ("quality", 1.0 - self.quality),
            RuleKind::GateCheck => ("gate", self.gate),
        };
        if value.is_finite() {
            Ok(value)
        } else {
            Err(FirewallError::NonFinite {
                metric: name.to_string(),
            })
        }
    }
}

/// Half length (saturating at 20 words), half lexical diversity
pub fn quality_of(tokens: &[String]) -> f64 {
    if tokens.is_empty() {
        return 0.0;
    }
    let unique: std::collections::HashSet<&String> = tokens.iter().collect();
    let length = (tokens.len() as f64 / 20.0).min(1.0);
    let diversity = unique.len() as f64 / tokens.len() as f64;
    0.5 * length + 0.5 * diversity
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// Byte ranges (into `input`) of word-bounded, case-insensitive occurrences.
///
/// Both sides are lowercased the way `tokenize` lowercases, so anything
/// the pattern table matches can also be found here.
fn phrase_ranges(input: &str, phrase: &str) -> Vec<(usize, usize)> {
    let needle = phrase.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    // Lowercasing may change byte lengths; keep the source offset of every lowered byte
    let mut haystack = String::with_capacity(input.len());
    let mut origin: Vec<usize> = Vec::with_capacity(input.len() + 1);
    for (idx, c) in input.char_indices() {
        for lower in c.to_lowercase() {
            haystack.push(lower);
            origin.resize(haystack.len(), idx);
        }
    }
    origin.push(input.len());

    let bytes = haystack.as_bytes();
    let mut ranges = Vec::new();
    let mut search_idx = 0usize;

    while let Some(relative) = haystack[search_idx..].find(&needle) {
        let start = search_idx + relative;
        let end = start + needle.len();
        let bounded_left = start == 0 || !is_word_byte(bytes[start - 1]);
        let bounded_right = end == bytes.len() || !is_word_byte(bytes[end]);
        if bounded_left && bounded_right && origin[start] < origin[end] {
            ranges.push((origin[start], origin[end]));
            search_idx = end;
        } else {
            search_idx = start + needle.chars().next().map_or(1, char::len_utf8);
        }
    }

    ranges
}

pub fn contains_phrase(input: &str, phrase: &str) -> bool {
    !phrase_ranges(input, phrase).is_empty()
}

/// Replace whole-word occurrences of `phrase`, ignoring case
pub fn replace_phrase(input: &str, phrase: &str, replacement: &str) -> String {
    let ranges = phrase_ranges(input, phrase);
    if ranges.is_empty() {
        return input.to_string();
    }

    let mut out = String::with_capacity(input.len());
    let mut last_idx = 0usize;
    for (start, end) in ranges {
        out.push_str(&input[last_idx..start]);
        out.push_str(replacement);
        last_idx = end;
    }
    out.push_str(&input[last_idx..]);
    out
}

/// Every built-in phrase that purification removes, longest first
pub fn flagged_phrases() -> Vec<&'static str> {
    let mut phrases: Vec<&'static str> = THREAT_FAMILIES
        .iter()
        .flat_map(|f| f.phrases.iter().copied())
        .chain(GATE_PHRASES.iter().copied())
        .collect();
    phrases.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    phrases
}
