//! Memory fragments and their per-fragment encoding.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::Content;

pub type FragmentId = Uuid;

/// Vocabulary counted into a fragment's keyword score
const KEYWORDS: &[&str] = &[
    "love",
    "light",
    "wisdom",
    "truth",
    "unity",
    "insight",
    "knowledge",
];

/// One stored unit of prior interaction content plus metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryFragment {
    pub id: FragmentId,

    pub content: Content,

    /// Importance in [0, 1]
    pub importance: f64,

    /// Priority in [0, 1]
    pub priority: f64,

    /// Number of retrievals
    pub access_count: u64,

    pub created_at: DateTime<Utc>,

    pub last_accessed: DateTime<Utc>,

    /// Tier the fragment currently lives in
    pub level: usize,

    /// Symmetric links to related fragments
    pub connections: BTreeSet<FragmentId>,

    /// Whether the content has been lossily summarised by compaction
    pub summarized: bool,

    pub encoding: FragmentEncoding,
}

impl MemoryFragment {
    pub fn new(content: Content, importance: f64, priority: f64, level: usize, now: DateTime<Utc>) -> Self {
        let encoding = FragmentEncoding::of(&content, now);
        Self {
            id: Uuid::new_v4(),
            content,
            importance: importance.clamp(0.0, 1.0),
            priority: priority.clamp(0.0, 1.0),
            access_count: 0,
            created_at: now,
            last_accessed: now,
            level,
            connections: BTreeSet::new(),
            summarized: false,
            encoding,
        }
    }

    /// Record a retrieval
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed = now;
    }

    /// Ranking used by compaction: importance plus a saturating access bonus
    pub fn retention_score(&self) -> f64 {
        self.importance + self.access_count.min(10) as f64 / 10.0
    }

    /// Recency in (0, 1], halving roughly every 17 hours
    pub fn recency(&self, now: DateTime<Utc>) -> f64 {
        let age_hours = (now - self.last_accessed).num_seconds().max(0) as f64 / 3600.0;
        (-age_hours / 24.0).exp()
    }
}

/// Derived facts about a fragment's content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentEncoding {
    pub checksum: String,
    pub word_count: usize,
    /// Number of distinct keyword-vocabulary words present
    pub keyword_score: usize,
    pub encoded_at: DateTime<Utc>,
}

impl FragmentEncoding {
    pub fn of(content: &Content, now: DateTime<Utc>) -> Self {
        let tokens = content.tokens();
        let keyword_score = KEYWORDS
            .iter()
            .filter(|k| tokens.iter().any(|t| t == *k))
            .count();
        Self {
            checksum: content.checksum(),
            word_count: tokens.len(),
            keyword_score,
            encoded_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_fragment_clamps_scores() {
        let f = MemoryFragment::new(Content::text("x"), 1.5, -0.2, 0, Utc::now());
        assert_eq!(f.importance, 1.0);
        assert_eq!(f.priority, 0.0);
    }

    #[test]
    fn test_encoding_counts_keywords() {
        let encoding = FragmentEncoding::of(&Content::text("Truth and wisdom, truth again"), Utc::now());
        assert_eq!(encoding.word_count, 5);
        assert_eq!(encoding.keyword_score, 2);
    }

    #[test]
    fn test_recency_decays() {
        let now = Utc::now();
        let mut f = MemoryFragment::new(Content::text("x"), 0.5, 0.5, 0, now);
        assert!((f.recency(now) - 1.0).abs() < 1e-9);
        f.last_accessed = now - Duration::hours(48);
        assert!(f.recency(now) < 0.2);
    }
}
