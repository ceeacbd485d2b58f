//! Tiered, self-compacting fragment store.
//!
//! Fragments live in an arena keyed by id. Each level keeps its member ids
//! and a token index narrows retrieval to fragments sharing a query word,
//! so lookups never walk the whole arena.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::fragment::{FragmentEncoding, FragmentId, MemoryFragment};
use crate::domain::content::tokenize;
use crate::domain::Content;

/// Tiered memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Number of levels (default: 7)
    #[serde(default = "default_max_levels")]
    pub max_levels: usize,

    /// Capacity of every level (default: 100)
    #[serde(default = "default_max_nodes_per_level")]
    pub max_nodes_per_level: usize,

    /// Fraction of an overflowing level kept in place (default: 0.6)
    #[serde(default = "default_compression_ratio")]
    pub compression_ratio: f64,

    /// Similarity above which new fragments link to old ones (default: 0.7)
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Connection arity bound (default: 7)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Age after which untouched fragments become prunable (default: 168h)
    #[serde(default = "default_retention_hours")]
    pub retention_hours: i64,

    /// Fragments accessed fewer times than this are prunable (default: 2)
    #[serde(default = "default_prune_max_access")]
    pub prune_max_access: u64,

    /// Fragments less important than this are prunable (default: 0.3)
    #[serde(default = "default_prune_max_importance")]
    pub prune_max_importance: f64,

    /// Top levels exempt from pruning (default: 3)
    #[serde(default = "default_protected_levels")]
    pub protected_levels: usize,

    /// Words kept when a fragment is summarised on demotion (default: 12)
    #[serde(default = "default_summary_words")]
    pub summary_words: usize,

    /// Weight of importance versus priority in level assignment (default: 0.6)
    #[serde(default = "default_importance_weight")]
    pub importance_weight: f64,
}

fn default_max_levels() -> usize {
    7
}
fn default_max_nodes_per_level() -> usize {
    100
}
fn default_compression_ratio() -> f64 {
    0.6
}
fn default_similarity_threshold() -> f64 {
    0.7
}
fn default_max_connections() -> usize {
    7
}
fn default_retention_hours() -> i64 {
    168
}
fn default_prune_max_access() -> u64 {
    2
}
fn default_prune_max_importance() -> f64 {
    0.3
}
fn default_protected_levels() -> usize {
    3
}
fn default_summary_words() -> usize {
    12
}
fn default_importance_weight() -> f64 {
    0.6
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_levels: default_max_levels(),
            max_nodes_per_level: default_max_nodes_per_level(),
            compression_ratio: default_compression_ratio(),
            similarity_threshold: default_similarity_threshold(),
            max_connections: default_max_connections(),
            retention_hours: default_retention_hours(),
            prune_max_access: default_prune_max_access(),
            prune_max_importance: default_prune_max_importance(),
            protected_levels: default_protected_levels(),
            summary_words: default_summary_words(),
            importance_weight: default_importance_weight(),
        }
    }
}

/// Retrieval options
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrieveOptions {
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    #[serde(default)]
    pub min_importance: f64,
}

fn default_max_results() -> usize {
    10
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            min_importance: 0.0,
        }
    }
}

/// A retrieved fragment with its relevance score
#[derive(Debug, Clone, Serialize)]
pub struct ScoredFragment {
    pub fragment: MemoryFragment,
    pub score: f64,
    /// Reached through a connection rather than by direct match
    pub linked: bool,
}

/// What a compaction pass did
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompactionReport {
    pub demoted: usize,
    pub evicted: usize,
    pub levels_compacted: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelStats {
    pub level: usize,
    pub count: usize,
    pub capacity: usize,
    pub utilization: f64,
}

/// Read-only projection of the store
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub total: usize,
    pub levels: Vec<LevelStats>,
    pub connection_count: usize,
    pub cluster_count: usize,
    pub utilization: f64,
}

/// The tiered memory store
pub struct TieredMemory {
    config: MemoryConfig,
    fragments: HashMap<FragmentId, MemoryFragment>,
    levels: Vec<HashSet<FragmentId>>,
    tokens: HashMap<FragmentId, HashSet<String>>,
    index: HashMap<String, HashSet<FragmentId>>,
}

impl TieredMemory {
    pub fn new(config: MemoryConfig) -> Self {
        let levels = vec![HashSet::new(); config.max_levels.max(1)];
        Self {
            config,
            fragments: HashMap::new(),
            levels,
            tokens: HashMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Read a fragment without recording an access
    pub fn fragment(&self, id: &FragmentId) -> Option<&MemoryFragment> {
        self.fragments.get(id)
    }

    pub fn level_count(&self, level: usize) -> usize {
        self.levels.get(level).map_or(0, HashSet::len)
    }

    fn top_level(&self) -> usize {
        self.levels.len() - 1
    }

    /// Level for a fragment; the top level holds the most important content
    pub fn level_for(&self, importance: f64, priority: f64) -> usize {
        let w = self.config.importance_weight.clamp(0.0, 1.0);
        let score = (w * importance.clamp(0.0, 1.0) + (1.0 - w) * priority.clamp(0.0, 1.0))
            .clamp(0.0, 1.0);
        ((score * self.levels.len() as f64).floor() as usize).min(self.top_level())
    }

    pub fn store(&mut self, content: Content, importance: f64, priority: f64) -> FragmentId {
        self.store_at(content, importance, priority, Utc::now())
    }

    /// Store a fragment, link it to similar fragments, and compact on overflow
    pub fn store_at(
        &mut self,
        content: Content,
        importance: f64,
        priority: f64,
        now: DateTime<Utc>,
    ) -> FragmentId {
        let level = self.level_for(importance, priority);
        let mut fragment = MemoryFragment::new(content, importance, priority, level, now);
        let id = fragment.id;
        let token_set: HashSet<String> = fragment.content.tokens().into_iter().collect();

        let mut candidates: Vec<(FragmentId, f64)> = self
            .candidates(&token_set)
            .into_iter()
            .filter_map(|other_id| {
                let other = self.fragments.get(&other_id)?;
                let other_tokens = self.tokens.get(&other_id)?;
                let sim = similarity(&token_set, fragment.priority, other, other_tokens, now);
                (sim > self.config.similarity_threshold).then_some((other_id, sim))
            })
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

        for (other_id, _) in candidates {
            if fragment.connections.len() >= self.config.max_connections {
                break;
            }
            if let Some(other) = self.fragments.get_mut(&other_id) {
                if other.connections.len() < self.config.max_connections {
                    other.connections.insert(id);
                    fragment.connections.insert(other_id);
                }
            }
        }

        self.index_tokens(id, &token_set);
        self.tokens.insert(id, token_set);
        self.levels[level].insert(id);
        debug!(
            fragment = %id,
            level,
            connections = fragment.connections.len(),
            "Stored memory fragment"
        );
        self.fragments.insert(id, fragment);

        if self.levels[level].len() > self.config.max_nodes_per_level {
            warn!(level, "Memory level overflow, compacting");
            self.compact(Some(id));
        }

        id
    }

    pub fn retrieve(&mut self, query: &str, opts: RetrieveOptions) -> Vec<ScoredFragment> {
        self.retrieve_at(query, opts, Utc::now())
    }

    /// Score candidates by keyword overlap, recency and access frequency;
    /// return the top K plus up to K fragments one connection away.
    pub fn retrieve_at(
        &mut self,
        query: &str,
        opts: RetrieveOptions,
        now: DateTime<Utc>,
    ) -> Vec<ScoredFragment> {
        let query_tokens: HashSet<String> = tokenize(query).into_iter().collect();
        if query_tokens.is_empty() || opts.max_results == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(FragmentId, f64)> = self
            .candidates(&query_tokens)
            .into_iter()
            .filter_map(|id| {
                let fragment = self.fragments.get(&id)?;
                if fragment.importance < opts.min_importance {
                    return None;
                }
                let tokens = self.tokens.get(&id)?;
                let overlap = query_tokens.intersection(tokens).count() as f64
                    / query_tokens.len() as f64;
                let access = fragment.access_count as f64;
                let score = 0.6 * overlap + 0.2 * fragment.recency(now) + 0.2 * access / (access + 5.0);
                Some((id, score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(opts.max_results);

        let mut selected: HashSet<FragmentId> = scored.iter().map(|(id, _)| *id).collect();
        let mut linked: Vec<(FragmentId, f64)> = Vec::new();
        'outer: for (id, score) in &scored {
            let Some(fragment) = self.fragments.get(id) else {
                continue;
            };
            for neighbour in &fragment.connections {
                if linked.len() >= opts.max_results {
                    break 'outer;
                }
                let eligible = self
                    .fragments
                    .get(neighbour)
                    .is_some_and(|n| n.importance >= opts.min_importance);
                if eligible && selected.insert(*neighbour) {
                    linked.push((*neighbour, score * 0.5));
                }
            }
        }

        let mut results = Vec::with_capacity(scored.len() + linked.len());
        let direct = scored.into_iter().map(|(id, s)| (id, s, false));
        let via = linked.into_iter().map(|(id, s)| (id, s, true));
        for (id, score, linked) in direct.chain(via) {
            if let Some(fragment) = self.fragments.get_mut(&id) {
                fragment.touch(now);
                results.push(ScoredFragment {
                    fragment: fragment.clone(),
                    score,
                    linked,
                });
            }
        }

        debug!(query_tokens = query_tokens.len(), results = results.len(), "Retrieved fragments");
        results
    }

    /// Fetch a fragment by id, recording the access
    pub fn get(&mut self, id: &FragmentId) -> Option<MemoryFragment> {
        let fragment = self.fragments.get_mut(id)?;
        fragment.touch(Utc::now());
        Some(fragment.clone())
    }

    /// Fragments at or above both thresholds, strongest first
    pub fn search_by_resonance(&self, min_importance: f64, min_priority: f64) -> Vec<MemoryFragment> {
        let mut matching: Vec<MemoryFragment> = self
            .fragments
            .values()
            .filter(|f| f.importance >= min_importance && f.priority >= min_priority)
            .cloned()
            .collect();
        matching.sort_by(|a, b| (b.importance + b.priority).total_cmp(&(a.importance + a.priority)));
        matching
    }

    /// Bring every level back within capacity.
    ///
    /// Levels are processed top-down; an overflowing level keeps its best
    /// `compression_ratio` share and demotes the rest one level with
    /// summarised content. Surplus at the bottom level is evicted.
    pub fn compress(&mut self) -> CompactionReport {
        self.compact(None)
    }

    /// `keep_alive` is never evicted from the bottom level, though it may be demoted
    fn compact(&mut self, keep_alive: Option<FragmentId>) -> CompactionReport {
        let mut report = CompactionReport::default();
        let capacity = self.config.max_nodes_per_level;

        for level in (0..self.levels.len()).rev() {
            let count = self.levels[level].len();
            if count <= capacity {
                continue;
            }

            let mut keep = capacity.min((count as f64 * self.config.compression_ratio).floor() as usize);
            if level == 0 && keep_alive.is_some_and(|id| self.levels[0].contains(&id)) {
                keep = keep.max(1);
            }
            let mut ranked: Vec<FragmentId> = self.levels[level].iter().copied().collect();
            ranked.sort_by(|a, b| {
                let fa = &self.fragments[a];
                let fb = &self.fragments[b];
                let pinned = |id: &FragmentId| level == 0 && keep_alive == Some(*id);
                pinned(b)
                    .cmp(&pinned(a))
                    .then_with(|| fb.retention_score().total_cmp(&fa.retention_score()))
                    .then_with(|| fb.last_accessed.cmp(&fa.last_accessed))
            });

            for id in ranked.into_iter().skip(keep) {
                if level == 0 {
                    self.remove(&id);
                    report.evicted += 1;
                } else {
                    self.demote(id, level - 1);
                    report.demoted += 1;
                }
            }
            report.levels_compacted.push(level);
        }

        if !report.levels_compacted.is_empty() {
            info!(
                demoted = report.demoted,
                evicted = report.evicted,
                levels = ?report.levels_compacted,
                "Memory compacted"
            );
        }
        report
    }

    pub fn prune(&mut self) -> usize {
        self.prune_at(Utc::now())
    }

    /// Delete stale, rarely used, unimportant fragments below the protected levels
    pub fn prune_at(&mut self, now: DateTime<Utc>) -> usize {
        let retention = Duration::hours(self.config.retention_hours);
        let prunable_below = self.levels.len().saturating_sub(self.config.protected_levels);

        let stale: Vec<FragmentId> = self
            .fragments
            .values()
            .filter(|f| {
                f.level < prunable_below
                    && now - f.last_accessed > retention
                    && f.access_count < self.config.prune_max_access
                    && f.importance < self.config.prune_max_importance
            })
            .map(|f| f.id)
            .collect();

        for id in &stale {
            self.remove(id);
        }

        if !stale.is_empty() {
            info!(pruned = stale.len(), "Pruned stale fragments");
        }
        stale.len()
    }

    pub fn stats(&self) -> MemoryStats {
        let capacity = self.config.max_nodes_per_level;
        let levels: Vec<LevelStats> = self
            .levels
            .iter()
            .enumerate()
            .map(|(level, ids)| LevelStats {
                level,
                count: ids.len(),
                capacity,
                utilization: ratio(ids.len(), capacity),
            })
            .collect();

        let connection_count = self
            .fragments
            .values()
            .map(|f| f.connections.len())
            .sum::<usize>()
            / 2;

        MemoryStats {
            total: self.fragments.len(),
            levels,
            connection_count,
            cluster_count: self.cluster_count(),
            utilization: ratio(self.fragments.len(), capacity * self.levels.len()),
        }
    }

    /// Connected groups of two or more linked fragments
    fn cluster_count(&self) -> usize {
        let mut seen: HashSet<FragmentId> = HashSet::new();
        let mut clusters = 0;

        for (id, fragment) in &self.fragments {
            if fragment.connections.is_empty() || seen.contains(id) {
                continue;
            }
            clusters += 1;
            let mut queue = VecDeque::from([*id]);
            seen.insert(*id);
            while let Some(current) = queue.pop_front() {
                if let Some(f) = self.fragments.get(&current) {
                    for next in &f.connections {
                        if seen.insert(*next) {
                            queue.push_back(*next);
                        }
                    }
                }
            }
        }

        clusters
    }

    fn candidates(&self, tokens: &HashSet<String>) -> HashSet<FragmentId> {
        tokens
            .iter()
            .filter_map(|t| self.index.get(t))
            .flatten()
            .copied()
            .collect()
    }

    fn index_tokens(&mut self, id: FragmentId, tokens: &HashSet<String>) {
        for token in tokens {
            self.index.entry(token.clone()).or_default().insert(id);
        }
    }

    fn unindex_tokens(&mut self, id: &FragmentId) {
        if let Some(tokens) = self.tokens.remove(id) {
            for token in tokens {
                if let Some(ids) = self.index.get_mut(&token) {
                    ids.remove(id);
                    if ids.is_empty() {
                        self.index.remove(&token);
                    }
                }
            }
        }
    }

    fn demote(&mut self, id: FragmentId, to_level: usize) {
        let summary_words = self.config.summary_words;
        let Some(fragment) = self.fragments.get_mut(&id) else {
            return;
        };
        let from_level = fragment.level;
        fragment.level = to_level;
        fragment.content = fragment.content.summarize(summary_words);
        fragment.summarized = true;
        fragment.encoding = FragmentEncoding::of(&fragment.content, fragment.encoding.encoded_at);
        let token_set: HashSet<String> = fragment.content.tokens().into_iter().collect();

        self.levels[from_level].remove(&id);
        self.levels[to_level].insert(id);
        self.unindex_tokens(&id);
        self.index_tokens(id, &token_set);
        self.tokens.insert(id, token_set);
    }

    /// Delete a fragment and unlink it from its neighbours
    pub fn remove(&mut self, id: &FragmentId) -> Option<MemoryFragment> {
        let fragment = self.fragments.remove(id)?;
        self.levels[fragment.level].remove(id);
        self.unindex_tokens(id);
        for other in &fragment.connections {
            if let Some(f) = self.fragments.get_mut(other) {
                f.connections.remove(id);
            }
        }
        Some(fragment)
    }
}

fn similarity(
    tokens: &HashSet<String>,
    priority: f64,
    other: &MemoryFragment,
    other_tokens: &HashSet<String>,
    now: DateTime<Utc>,
) -> f64 {
    let union = tokens.union(other_tokens).count();
    let jaccard = if union == 0 {
        0.0
    } else {
        tokens.intersection(other_tokens).count() as f64 / union as f64
    };
    let closeness = 1.0 - (priority - other.priority).abs();
    0.5 * jaccard + 0.3 * closeness + 0.2 * other.recency(now)
}

fn ratio(count: usize, capacity: usize) -> f64 {
    if capacity == 0 {
        0.0
    } else {
        count as f64 / capacity as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_store(capacity: usize) -> TieredMemory {
        TieredMemory::new(MemoryConfig {
            max_levels: 4,
            max_nodes_per_level: capacity,
            protected_levels: 2,
            ..Default::default()
        })
    }

    #[test]
    fn test_level_assignment() {
        let memory = small_store(10);
        assert_eq!(memory.level_for(0.0, 0.0), 0);
        assert_eq!(memory.level_for(1.0, 1.0), 3);
        assert_eq!(memory.level_for(0.5, 0.5), 2);
    }

    #[test]
    fn test_similar_fragments_link_symmetrically() {
        let mut memory = small_store(10);
        let a = memory.store(Content::text("alpha beta gamma"), 0.5, 0.5);
        let b = memory.store(Content::text("alpha beta gamma"), 0.5, 0.5);
        let c = memory.store(Content::text("unrelated words entirely"), 0.5, 0.5);

        assert!(memory.fragment(&a).unwrap().connections.contains(&b));
        assert!(memory.fragment(&b).unwrap().connections.contains(&a));
        assert!(memory.fragment(&c).unwrap().connections.is_empty());
    }

    #[test]
    fn test_connection_arity_is_bounded() {
        let mut memory = TieredMemory::new(MemoryConfig::default());
        for _ in 0..12 {
            memory.store(Content::text("identical text"), 0.5, 0.5);
        }
        let stats = memory.stats();
        assert!(memory.fragments.values().all(|f| f.connections.len() <= 7));
        assert!(stats.connection_count > 0);
    }

    #[test]
    fn test_retrieve_updates_access() {
        let mut memory = small_store(10);
        let id = memory.store(Content::text("remember this phrase"), 0.5, 0.5);
        let results = memory.retrieve("remember this phrase", RetrieveOptions::default());
        assert_eq!(results[0].fragment.id, id);
        assert_eq!(memory.fragment(&id).unwrap().access_count, 1);
    }

    #[test]
    fn test_retrieve_respects_min_importance() {
        let mut memory = small_store(10);
        memory.store(Content::text("low importance note"), 0.1, 0.1);
        let results = memory.retrieve(
            "note",
            RetrieveOptions {
                max_results: 5,
                min_importance: 0.5,
            },
        );
        assert!(results.is_empty());
    }

    #[test]
    fn test_remove_unlinks_neighbours() {
        let mut memory = small_store(10);
        let a = memory.store(Content::text("shared words here"), 0.5, 0.5);
        let b = memory.store(Content::text("shared words here"), 0.5, 0.5);
        memory.remove(&a);
        assert!(memory.fragment(&b).unwrap().connections.is_empty());
        assert_eq!(memory.level_count(2), 1);
    }
}
