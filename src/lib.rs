//! harmonia - Resonance-coordinated workflow engine
//!
//! Four cooperating components sit behind one orchestrator:
//!
//! - `signal`: frequency-tagged signal vectors, peer resonance and tuning
//! - `memory`: tiered memory with compression into higher levels
//! - `cluster`: worker membership, task assignment, dispatch and consensus
//! - `firewall`: content validation, purification and elevation
//!
//! # Architecture
//!
//! Workflows are ordered steps that each call one component operation.
//! Every execution is an append-only log of events; its state is a fold
//! over that log. The `Engine` handle owns the orchestrator and the
//! periodic maintenance loops (heartbeats, compaction, pruning,
//! rebalancing, recalibration).
//!
//! # Modules
//!
//! - `core`: Orchestration (Workflow, Limits, ExecutionStore, Scheduler)
//! - `domain`: Data structures (Content, ExecutionEvent, WorkflowExecution)
//! - `workers`: Built-in and closure-backed worker nodes
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run the default workflow
//! echo "input text" | harmonia run
//!
//! # Run a workflow from workflows/<id>.yaml
//! harmonia run --workflow digest --input notes.txt
//!
//! # Inspect component state
//! harmonia inspect
//! ```

pub mod cli;
pub mod cluster;
pub mod config;
pub mod core;
pub mod domain;
pub mod engine;
pub mod error;
pub mod firewall;
pub mod memory;
pub mod signal;
pub mod workers;

// Re-export main types at crate root for convenience
pub use config::EngineConfig;
pub use core::{ExecutionResult, Orchestrator, WorkflowDefinition};
pub use domain::{Content, EventType, ExecutionEvent, ExecutionStatus, TriggerKind, WorkflowExecution};
pub use engine::{Engine, ExecutionHandle, WebhookOutcome};
pub use error::{HarmoniaError, HarmoniaResult};
