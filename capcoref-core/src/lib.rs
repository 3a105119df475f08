//! # capcoref-core
//!
//! Core types for caption coreference: shared data structures used by the
//! inference engine and by whatever loads documents and scores.
//!
//! This crate provides:
//! - **Mentions and documents**: `Mention`, `MentionKey`, `MentionPairKey`, `Document`
//! - **Relations**: `RelationLabel`, `LabelScores`, `LinkScore`
//! - **Pair tables**: `PairTable` and the `CorefScores` / `RelationScores` / `FixedLinks` aliases
//! - **Results**: `RelationGraph`, `Chain`, `ChainSet`
//!
//! Documents are independent: nothing in this crate relates mentions of two
//! different documents.

#![warn(missing_docs)]

pub mod chain;
pub mod error;
pub mod graph;
pub mod label;
pub mod mention;
pub mod table;

pub use chain::{Chain, ChainId, ChainSet};
pub use error::{Error, Result};
pub use graph::{NestedGraph, RelationGraph};
pub use label::{LabelScores, LinkScore, RelationLabel};
pub use mention::{
    BoundingBox, Cardinality, Document, Mention, MentionKey, MentionPairKey, PronounType,
};
pub use table::{CorefScores, FixedLinks, PairTable, RelationScores};
