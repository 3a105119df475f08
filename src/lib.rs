//! # capcoref
//!
//! Coreference and subset relations among the mentions of an image's captions.
//!
//! - **Greedy chains**: [`greedy::GreedyChainBuilder`] grows coreference chains
//!   from symmetric pair scores with hard must-link / must-not-link overrides.
//! - **Exact relations**: [`solver::ConstraintSolver`] labels every mention
//!   pair `Null` / `Coref` / `Subset` / `Superset`, maximizing total score under
//!   symmetry, transitivity and entity-consistency constraints.
//! - **Chains from graphs**: [`consolidate::consolidate`] partitions mentions
//!   into chains and lifts subset edges to chain level.
//! - **Many documents**: [`scheduler::Scheduler`] solves documents in parallel
//!   with size buckets, a fallback policy and resumable checkpoints
//!   ([`checkpoint::CheckpointStore`]).
//!
//! ## Quick Start
//!
//! ```rust
//! use capcoref::{CheckpointStore, InferenceConfig, Pipeline};
//! use capcoref::{Document, LabelScores, Mention, MentionKey, RelationScores};
//!
//! let m1 = Mention::new(MentionKey::new(0, 0, 2), "a man", "people");
//! let m2 = Mention::new(MentionKey::new(1, 0, 2), "the man", "people");
//! let doc = Document::with_mentions("img", vec![m1.clone(), m2.clone()]);
//!
//! let mut scores = RelationScores::new();
//! scores.insert_pair("img", m1.key, m2.key, LabelScores::new(0.1, 0.8, 0.05, 0.05));
//!
//! let config = InferenceConfig::default();
//! let mut store = CheckpointStore::in_memory();
//! let (report, chains) = Pipeline::new(&config, &scores)
//!     .run_and_consolidate(&[doc], &mut store, None)
//!     .unwrap();
//! assert!(report.failed().is_empty());
//! assert_eq!(chains["img"].chains.len(), 1);
//! ```
//!
//! Documents never interact: every relation, chain and failure is per document.

#![warn(missing_docs)]

pub mod checkpoint;
pub mod config;
pub mod consolidate;
pub mod error;
pub mod greedy;
pub mod pipeline;
pub mod scheduler;
pub mod solver;

pub use capcoref_core::{
    BoundingBox, Cardinality, Chain, ChainId, ChainSet, CorefScores, Document, FixedLinks,
    LabelScores, LinkScore, Mention, MentionKey, MentionPairKey, NestedGraph, PairTable,
    PronounType, RelationGraph, RelationLabel, RelationScores,
};

pub use checkpoint::{CheckpointPaths, CheckpointStore, GraphKind};
pub use config::{FallbackConfig, InferenceConfig, InferenceMode};
pub use consolidate::{consolidate, consolidate_edges, Consolidation, VisualPredictions};
pub use error::{Error, Result};
pub use greedy::{ChainRanking, CorefScorer, GreedyChainBuilder, GreedyConfig};
pub use pipeline::Pipeline;
pub use scheduler::{FallbackPolicy, Outcome, Scheduler, SchedulerConfig, SchedulerReport};
pub use solver::{ConstraintSolver, RelationSolver, SolverConfig};
