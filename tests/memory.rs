//! Memory Integration Tests
//!
//! Tests for storage, retrieval, compaction and pruning of the tiered store.

use chrono::{Duration, Utc};
use harmonia::memory::{MemoryConfig, RetrieveOptions, TieredMemory};
use harmonia::Content;

fn small_store(capacity: usize) -> TieredMemory {
    TieredMemory::new(MemoryConfig {
        max_nodes_per_level: capacity,
        ..MemoryConfig::default()
    })
}

#[test]
fn test_store_then_retrieve_returns_fragment() {
    let mut memory = TieredMemory::new(MemoryConfig::default());
    let content = Content::text("The harmonic cluster keeps its memory aligned");
    let id = memory.store(content.clone(), 0.7, 0.5);
    memory.store(Content::text("unrelated note about breakfast"), 0.7, 0.5);

    let results = memory.retrieve("harmonic memory", RetrieveOptions::default());

    assert!(!results.is_empty());
    assert_eq!(results[0].fragment.id, id);
    assert_eq!(results[0].fragment.content, content);
    assert!(!results[0].linked);
    assert_eq!(results[0].fragment.access_count, 1);
}

#[test]
fn test_store_into_full_bottom_level_keeps_new_fragment() {
    let mut memory = small_store(3);
    for i in 0..3 {
        memory.store(Content::text(format!("routine log entry {}", i)), 0.1, 0.0);
    }
    assert_eq!(memory.level_count(0), 3);

    let id = memory.store(Content::text("zebra migration pattern"), 0.05, 0.0);

    assert!(memory.fragment(&id).is_some());
    assert!(memory.level_count(0) <= 3);
    let results = memory.retrieve("zebra migration pattern", RetrieveOptions::default());
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].fragment.id, id);
}

#[test]
fn test_store_into_full_mid_level_demotes_but_stays_retrievable() {
    let mut memory = small_store(3);
    let level = memory.level_for(0.55, 0.5);
    assert_eq!(level, memory.level_for(0.45, 0.45));
    for i in 0..3 {
        memory.store(Content::text(format!("quarterly budget review {}", i)), 0.55, 0.5);
    }

    let id = memory.store(
        Content::text("zebra migration pattern observed near the river delta"),
        0.45,
        0.45,
    );

    let fragment = memory.fragment(&id).unwrap();
    assert_eq!(fragment.level, level - 1);
    assert!(fragment.summarized);

    let results = memory.retrieve("zebra migration", RetrieveOptions::default());
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].fragment.id, id);
    assert!(results[0].fragment.content.as_text().contains("zebra migration"));
}

#[test]
fn test_retrieve_respects_min_importance() {
    let mut memory = TieredMemory::new(MemoryConfig::default());
    memory.store(Content::text("resonance tuning notes"), 0.2, 0.2);
    let important = memory.store(Content::text("resonance tuning decisions"), 0.9, 0.5);

    let results = memory.retrieve(
        "resonance tuning",
        RetrieveOptions {
            max_results: 10,
            min_importance: 0.5,
        },
    );

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].fragment.id, important);
}

#[test]
fn test_empty_query_returns_nothing() {
    let mut memory = TieredMemory::new(MemoryConfig::default());
    memory.store(Content::text("something"), 0.5, 0.5);
    assert!(memory.retrieve("  ", RetrieveOptions::default()).is_empty());
}

#[test]
fn test_overflow_compacts_into_lower_level() {
    let mut memory = small_store(4);
    let top = memory.level_for(0.95, 0.95);

    let ids: Vec<_> = (0..5)
        .map(|i| {
            memory.store(
                Content::text(format!("fragment {} about topic {} with several extra words", i, i * 7)),
                0.95,
                0.95,
            )
        })
        .collect();

    // Storing the fifth fragment overflowed the level and compacted it
    for level in 0..memory.config().max_levels {
        assert!(memory.level_count(level) <= 4, "level {} over capacity", level);
    }
    assert_eq!(memory.len(), 5);

    let demoted: Vec<_> = ids
        .iter()
        .filter_map(|id| memory.fragment(id))
        .filter(|f| f.level < top)
        .collect();
    assert_eq!(demoted.len(), 2);
    for fragment in demoted {
        assert_eq!(fragment.level, top - 1);
        assert!(fragment.summarized);
    }
}

#[test]
fn test_compress_on_bottom_level_evicts() {
    let mut memory = small_store(2);
    for i in 0..3 {
        memory.store(Content::text(format!("low note {}", i)), 0.0, 0.0);
    }

    assert_eq!(memory.level_count(0), 1);
    assert_eq!(memory.len(), 1);
}

#[test]
fn test_prune_removes_stale_unimportant_fragments() {
    let mut memory = TieredMemory::new(MemoryConfig::default());
    let long_ago = Utc::now() - Duration::hours(500);

    let stale = memory.store_at(Content::text("old trivia"), 0.1, 0.1, long_ago);
    let kept_important = memory.store_at(Content::text("old but important"), 0.9, 0.9, long_ago);
    let kept_recent = memory.store(Content::text("fresh trivia"), 0.1, 0.1);

    assert_eq!(memory.prune(), 1);
    assert!(memory.fragment(&stale).is_none());
    assert!(memory.fragment(&kept_important).is_some());
    assert!(memory.fragment(&kept_recent).is_some());
}

#[test]
fn test_search_by_resonance_orders_strongest_first() {
    let mut memory = TieredMemory::new(MemoryConfig::default());
    memory.store(Content::text("weak"), 0.5, 0.5);
    let strong = memory.store(Content::text("strong"), 0.9, 0.9);
    memory.store(Content::text("filtered"), 0.1, 0.9);

    let found = memory.search_by_resonance(0.4, 0.4);
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].id, strong);
}

#[test]
fn test_stats_report_levels() {
    let mut memory = small_store(10);
    memory.store(Content::text("one"), 0.0, 0.0);
    memory.store(Content::text("two"), 0.95, 0.95);

    let stats = memory.stats();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.levels.len(), 7);
    assert_eq!(stats.levels[0].count, 1);
    assert_eq!(stats.levels[6].count, 1);
}
