//! Tiered memory store.
//!
//! - fragment: MemoryFragment and its encoding
//! - store: TieredMemory (levels, linking, retrieval, compaction, pruning)

pub mod fragment;
pub mod store;

pub use fragment::{FragmentEncoding, FragmentId, MemoryFragment};
pub use store::{
    CompactionReport, LevelStats, MemoryConfig, MemoryStats, RetrieveOptions, ScoredFragment,
    TieredMemory,
};
