//! Turning a solved relation graph into chains.
//!
//! `Coref` edges are merged into chains with an id map: an edge between two
//! unassigned mentions mints a chain, an edge touching one assigned mention
//! extends its chain, and an edge between two chains folds the second into the
//! first. Mentions predicted non-visual go to the reserved chain `"0"`; every
//! other mention left over becomes a singleton.
//!
//! `Subset` / `Superset` edges are then lifted to chain level as deduplicated
//! `(sub, super)` pairs, chain `"0"` included. An edge whose two mentions share
//! a chain (only possible inside chain `"0"`) adds no pair.

use crate::error::{Error, Result};
use capcoref_core::{
    Chain, ChainId, ChainSet, Document, MentionKey, RelationGraph, RelationLabel,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Per-mention "has a visual referent" predictions. Missing mentions count as visual.
pub type VisualPredictions = HashMap<MentionKey, bool>;

/// Chains of one document plus the subset overlay between them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consolidation {
    /// Partition of the document's mentions.
    pub chains: ChainSet,
    /// `(sub-chain, super-chain)` pairs.
    pub subsets: BTreeSet<(ChainId, ChainId)>,
}

/// Consolidate a solved graph.
pub fn consolidate(
    doc: &Document,
    graph: &RelationGraph,
    visual: Option<&VisualPredictions>,
) -> Result<Consolidation> {
    let keys = graph.mentions();
    consolidate_edges(
        doc,
        graph.edges().map(|(i, j, label)| (keys[i], keys[j], label)),
        visual,
    )
}

/// Consolidate a label-only edge list `(a, b, label of (a, b))`.
///
/// Edges may come in any order and need not cover every pair; absent pairs
/// are unrelated.
pub fn consolidate_edges(
    doc: &Document,
    edges: impl IntoIterator<Item = (MentionKey, MentionKey, RelationLabel)>,
    visual: Option<&VisualPredictions>,
) -> Result<Consolidation> {
    let edges: Vec<(MentionKey, MentionKey, RelationLabel)> = edges.into_iter().collect();
    for &(a, b, _) in &edges {
        for key in [a, b] {
            if doc.index_of(key).is_none() {
                return Err(Error::invariant(format!(
                    "document '{}': edge mentions unknown mention {}",
                    doc.id, key
                )));
            }
        }
    }

    let mut chain_of: HashMap<MentionKey, usize> = HashMap::new();
    let mut next_id = 1usize;
    for &(a, b, label) in &edges {
        if label != RelationLabel::Coref || a == b {
            continue;
        }
        match (chain_of.get(&a).copied(), chain_of.get(&b).copied()) {
            (None, None) => {
                chain_of.insert(a, next_id);
                chain_of.insert(b, next_id);
                next_id += 1;
            }
            (Some(id), None) => {
                chain_of.insert(b, id);
            }
            (None, Some(id)) => {
                chain_of.insert(a, id);
            }
            (Some(keep), Some(fold)) if keep != fold => {
                for id in chain_of.values_mut() {
                    if *id == fold {
                        *id = keep;
                    }
                }
            }
            _ => {}
        }
    }

    let is_visual = |key: &MentionKey| visual.and_then(|v| v.get(key)).copied().unwrap_or(true);

    let mut non_visual: BTreeSet<MentionKey> = BTreeSet::new();
    let mut chains: BTreeMap<usize, BTreeSet<MentionKey>> = BTreeMap::new();
    for mention in &doc.mentions {
        let key = mention.key;
        if !is_visual(&key) {
            non_visual.insert(key);
            continue;
        }
        let id = match chain_of.get(&key) {
            Some(&id) => id,
            None => {
                let id = next_id;
                next_id += 1;
                chain_of.insert(key, id);
                id
            }
        };
        chains.entry(id).or_default().insert(key);
    }

    let mut set = ChainSet::new();
    if !non_visual.is_empty() {
        set.push(Chain::new(ChainId::non_visual(), non_visual));
    }
    for (id, members) in chains {
        set.push(Chain::new(ChainId::from(id), members));
    }
    set.verify_partition(doc)
        .map_err(|e| Error::invariant(e.to_string()))?;

    let mut subsets = BTreeSet::new();
    for &(a, b, label) in &edges {
        let (sub, sup) = match label {
            RelationLabel::Subset => (a, b),
            RelationLabel::Superset => (b, a),
            _ => continue,
        };
        let (Some(sub), Some(sup)) = (set.chain_of(sub), set.chain_of(sup)) else {
            continue;
        };
        if sub.id == sup.id {
            continue;
        }
        subsets.insert((sub.id.clone(), sup.id.clone()));
    }

    Ok(Consolidation {
        chains: set,
        subsets,
    })
}
