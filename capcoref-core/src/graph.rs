//! Per-document relation graphs.
//!
//! A [`RelationGraph`] assigns one [`RelationLabel`] to every ordered pair of
//! distinct mentions in a document. Labels are stored densely; writing `(i, j)`
//! also writes the mirror label to `(j, i)`, so
//! `label(i, j) == label(j, i).mirror()` holds for every graph that exists.

use crate::error::{Error, Result};
use crate::label::RelationLabel;
use crate::mention::{Document, MentionKey};
use std::collections::BTreeMap;

/// Checkpoint form of a graph: `mention -> mention -> label`.
pub type NestedGraph = BTreeMap<MentionKey, BTreeMap<MentionKey, RelationLabel>>;

/// Complete assignment of relation labels over a document's mention pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationGraph {
    doc_id: String,
    mentions: Vec<MentionKey>,
    labels: Vec<RelationLabel>,
}

impl RelationGraph {
    /// An all-`Null` graph over the document's mentions.
    #[must_use]
    pub fn new(doc: &Document) -> Self {
        let mentions: Vec<MentionKey> = doc.mentions.iter().map(|m| m.key).collect();
        let n = mentions.len();
        Self {
            doc_id: doc.id.clone(),
            mentions,
            labels: vec![RelationLabel::Null; n * n],
        }
    }

    /// Document this graph belongs to.
    #[must_use]
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Mention keys, in document order.
    #[must_use]
    pub fn mentions(&self) -> &[MentionKey] {
        &self.mentions
    }

    /// Number of mentions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mentions.len()
    }

    /// Whether the graph covers no mentions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mentions.is_empty()
    }

    /// Label of the ordered pair `(i, j)`. The diagonal is always `Null`.
    ///
    /// # Panics
    ///
    /// Panics if either index is out of range.
    #[must_use]
    pub fn label(&self, i: usize, j: usize) -> RelationLabel {
        self.labels[i * self.mentions.len() + j]
    }

    /// Label of the ordered pair identified by mention keys.
    #[must_use]
    pub fn label_by_key(&self, a: MentionKey, b: MentionKey) -> Option<RelationLabel> {
        let i = self.mentions.iter().position(|&k| k == a)?;
        let j = self.mentions.iter().position(|&k| k == b)?;
        Some(self.label(i, j))
    }

    /// Set `(i, j)` to `label` and `(j, i)` to its mirror.
    pub fn set(&mut self, i: usize, j: usize, label: RelationLabel) -> Result<()> {
        let n = self.mentions.len();
        if i >= n || j >= n {
            return Err(Error::invalid_input(format!(
                "pair ({}, {}) out of range for {} mentions",
                i, j, n
            )));
        }
        if i == j {
            return Err(Error::invalid_input(format!(
                "cannot label mention {} against itself",
                self.mentions[i]
            )));
        }
        self.labels[i * n + j] = label;
        self.labels[j * n + i] = label.mirror();
        Ok(())
    }

    /// Unordered pairs `(i, j)` with `i < j` and their label from `i`'s side.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, RelationLabel)> + '_ {
        let n = self.mentions.len();
        (0..n).flat_map(move |i| ((i + 1)..n).map(move |j| (i, j, self.label(i, j))))
    }

    /// Number of unordered pairs carrying `label` (from the lower index's side).
    #[must_use]
    pub fn count(&self, label: RelationLabel) -> usize {
        self.edges().filter(|&(_, _, l)| l == label).count()
    }

    /// Convert to the checkpoint form, listing every off-diagonal ordered pair.
    #[must_use]
    pub fn to_nested(&self) -> NestedGraph {
        let mut nested = NestedGraph::new();
        for (i, &a) in self.mentions.iter().enumerate() {
            let row = nested.entry(a).or_default();
            for (j, &b) in self.mentions.iter().enumerate() {
                if i != j {
                    row.insert(b, self.label(i, j));
                }
            }
        }
        nested
    }

    /// Rebuild a graph for `doc` from its checkpoint form.
    ///
    /// Pairs absent from `nested` are `Null`. Mentions unknown to the document
    /// and pairs whose two directions disagree are rejected.
    pub fn from_nested(doc: &Document, nested: &NestedGraph) -> Result<Self> {
        let mut graph = Self::new(doc);
        let n = graph.len();
        let mut written = vec![false; n * n];
        let index = |key: &MentionKey| {
            doc.index_of(*key).ok_or_else(|| {
                Error::invalid_input(format!(
                    "checkpointed mention {} is not in document '{}'",
                    key, doc.id
                ))
            })
        };
        for (a, row) in nested {
            let i = index(a)?;
            for (b, &label) in row {
                let j = index(b)?;
                if i == j {
                    continue;
                }
                let existing = graph.label(j, i);
                if written[j * n + i] && existing != label.mirror() {
                    return Err(Error::invariant(format!(
                        "checkpoint for '{}' labels ({}, {}) {} but ({}, {}) {}",
                        doc.id, a, b, label, b, a, existing
                    )));
                }
                graph.set(i, j, label)?;
                written[i * n + j] = true;
            }
        }
        Ok(graph)
    }
}
