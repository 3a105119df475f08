//! Resumable persistence of solved graphs.
//!
//! The store keeps three independent maps, one per [`GraphKind`], each from
//! document id to a `mention -> mention -> label` graph. Every map can be backed
//! by a JSON file; a file is rewritten (write to a sibling temp file, then
//! rename) each time a document is recorded, so an interrupted run loses at
//! most the documents still in flight.
//!
//! Only relation graphs are produced here. Grounding and visual graphs belong
//! to joint inference modes and are carried through untouched.

use crate::error::{Error, Result};
use capcoref_core::{Document, NestedGraph, RelationGraph};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// The persisted graph families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphKind {
    /// Mention-mention relation graphs.
    Relation,
    /// Mention-box grounding graphs.
    Grounding,
    /// Mention visual/non-visual graphs.
    Visual,
}

impl GraphKind {
    /// All kinds.
    pub const ALL: [GraphKind; 3] = [GraphKind::Relation, GraphKind::Grounding, GraphKind::Visual];
}

/// Where each graph family is persisted. `None` keeps it in memory only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointPaths {
    /// Relation graph file.
    pub relation: Option<PathBuf>,
    /// Grounding graph file.
    pub grounding: Option<PathBuf>,
    /// Visual graph file.
    pub visual: Option<PathBuf>,
}

impl CheckpointPaths {
    /// Paths with only the relation graph persisted.
    #[must_use]
    pub fn relation(path: impl Into<PathBuf>) -> Self {
        Self {
            relation: Some(path.into()),
            ..Default::default()
        }
    }

    /// Path for one kind.
    #[must_use]
    pub fn get(&self, kind: GraphKind) -> Option<&Path> {
        match kind {
            GraphKind::Relation => self.relation.as_deref(),
            GraphKind::Grounding => self.grounding.as_deref(),
            GraphKind::Visual => self.visual.as_deref(),
        }
    }
}

/// Graphs of one kind, by document id.
pub type StoredGraphs = BTreeMap<String, NestedGraph>;

/// Checkpoint store for solved graphs.
#[derive(Debug, Default)]
pub struct CheckpointStore {
    paths: CheckpointPaths,
    graphs: BTreeMap<GraphKind, StoredGraphs>,
}

impl CheckpointStore {
    /// A store that never touches the filesystem.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a store, loading whichever checkpoint files already exist.
    pub fn open(paths: CheckpointPaths) -> Result<Self> {
        let mut graphs = BTreeMap::new();
        for kind in GraphKind::ALL {
            let Some(path) = paths.get(kind) else {
                continue;
            };
            if !path.exists() {
                continue;
            }
            let file = File::open(path)?;
            let stored: StoredGraphs = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
                Error::checkpoint(format!("cannot read {}: {}", path.display(), e))
            })?;
            log::info!(
                "[Checkpoint] Loaded {} {:?} graphs from {}",
                stored.len(),
                kind,
                path.display()
            );
            graphs.insert(kind, stored);
        }
        Ok(Self { paths, graphs })
    }

    /// Whether a graph of `kind` is stored for `doc_id`.
    #[must_use]
    pub fn contains(&self, kind: GraphKind, doc_id: &str) -> bool {
        self.get(kind, doc_id).is_some()
    }

    /// Stored graph of `kind` for `doc_id`.
    #[must_use]
    pub fn get(&self, kind: GraphKind, doc_id: &str) -> Option<&NestedGraph> {
        self.graphs.get(&kind)?.get(doc_id)
    }

    /// Number of stored graphs of `kind`.
    #[must_use]
    pub fn len(&self, kind: GraphKind) -> usize {
        self.graphs.get(&kind).map_or(0, BTreeMap::len)
    }

    /// Store a graph and persist its family.
    pub fn record(&mut self, kind: GraphKind, doc_id: &str, graph: NestedGraph) -> Result<()> {
        self.graphs
            .entry(kind)
            .or_default()
            .insert(doc_id.to_string(), graph);
        self.persist(kind)
    }

    /// Store a solved relation graph.
    pub fn record_relation(&mut self, graph: &RelationGraph) -> Result<()> {
        self.record(GraphKind::Relation, graph.doc_id(), graph.to_nested())
    }

    /// The stored relation graph of `doc`, rebuilt against its mentions.
    pub fn relation_graph(&self, doc: &Document) -> Result<Option<RelationGraph>> {
        self.get(GraphKind::Relation, &doc.id)
            .map(|nested| RelationGraph::from_nested(doc, nested).map_err(Error::from))
            .transpose()
    }

    fn persist(&self, kind: GraphKind) -> Result<()> {
        let Some(path) = self.paths.get(kind) else {
            return Ok(());
        };
        let empty = StoredGraphs::new();
        let stored = self.graphs.get(&kind).unwrap_or(&empty);

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(&mut writer, stored)?;
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        log::debug!(
            "[Checkpoint] Wrote {} {:?} graphs to {}",
            stored.len(),
            kind,
            path.display()
        );
        Ok(())
    }
}
