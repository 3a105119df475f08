//! Coreference chains.
//!
//! A chain is a set of mentions believed to denote the same entity. Chain ids
//! are per-document strings; `"0"` is reserved for mentions with no visual
//! referent.

use crate::error::{Error, Result};
use crate::mention::{Document, MentionKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Per-document chain identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    /// Id reserved for non-visual mentions.
    pub const NON_VISUAL: &'static str = "0";

    /// Create a chain id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The reserved non-visual chain id.
    #[must_use]
    pub fn non_visual() -> Self {
        Self(Self::NON_VISUAL.to_string())
    }

    /// Whether this is the non-visual chain.
    #[must_use]
    pub fn is_non_visual(&self) -> bool {
        self.0 == Self::NON_VISUAL
    }

    /// The id as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChainId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<usize> for ChainId {
    fn from(n: usize) -> Self {
        Self(n.to_string())
    }
}

/// A set of coreferent mentions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chain {
    /// Chain id.
    pub id: ChainId,
    /// Member mentions.
    pub members: BTreeSet<MentionKey>,
}

impl Chain {
    /// Create a chain.
    #[must_use]
    pub fn new(id: impl Into<ChainId>, members: impl IntoIterator<Item = MentionKey>) -> Self {
        Self {
            id: id.into(),
            members: members.into_iter().collect(),
        }
    }

    /// Number of mentions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the chain has no mentions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether the chain has exactly one mention.
    #[must_use]
    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }

    /// Whether `key` is a member.
    #[must_use]
    pub fn contains(&self, key: MentionKey) -> bool {
        self.members.contains(&key)
    }
}

/// The chains of one document, in creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainSet {
    chains: Vec<Chain>,
}

impl ChainSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chain.
    pub fn push(&mut self, chain: Chain) {
        self.chains.push(chain);
    }

    /// Number of chains.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    /// Whether there are no chains.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Iterate over chains.
    pub fn iter(&self) -> std::slice::Iter<'_, Chain> {
        self.chains.iter()
    }

    /// Chain with this id.
    #[must_use]
    pub fn get(&self, id: &ChainId) -> Option<&Chain> {
        self.chains.iter().find(|c| &c.id == id)
    }

    /// Chain containing `key`.
    #[must_use]
    pub fn chain_of(&self, key: MentionKey) -> Option<&Chain> {
        self.chains.iter().find(|c| c.contains(key))
    }

    /// The non-visual chain, if any mention was placed in it.
    #[must_use]
    pub fn non_visual(&self) -> Option<&Chain> {
        self.chains.iter().find(|c| c.id.is_non_visual())
    }

    /// Total number of member mentions.
    #[must_use]
    pub fn mention_count(&self) -> usize {
        self.chains.iter().map(Chain::len).sum()
    }

    /// Chains as sets of member keys, ignoring ids. Handy for comparisons.
    #[must_use]
    pub fn partition(&self) -> BTreeSet<BTreeSet<MentionKey>> {
        self.chains.iter().map(|c| c.members.clone()).collect()
    }

    /// Check that the chains partition exactly the document's mentions.
    ///
    /// Fails on empty chains, duplicate ids, a mention in two chains, a
    /// member that is not in the document, or a document mention left out.
    pub fn verify_partition(&self, doc: &Document) -> Result<()> {
        let mut owner: HashMap<MentionKey, &ChainId> = HashMap::new();
        let mut ids = BTreeSet::new();
        for chain in &self.chains {
            if chain.is_empty() {
                return Err(Error::invariant(format!(
                    "document '{}': chain {} is empty",
                    doc.id, chain.id
                )));
            }
            if !ids.insert(&chain.id) {
                return Err(Error::invariant(format!(
                    "document '{}': chain id {} used twice",
                    doc.id, chain.id
                )));
            }
            for &key in &chain.members {
                if let Some(previous) = owner.insert(key, &chain.id) {
                    return Err(Error::invariant(format!(
                        "document '{}': mention {} is in chains {} and {}",
                        doc.id, key, previous, chain.id
                    )));
                }
                if doc.index_of(key).is_none() {
                    return Err(Error::invariant(format!(
                        "document '{}': chain {} has foreign mention {}",
                        doc.id, chain.id, key
                    )));
                }
            }
        }
        if let Some(missing) = doc.mentions.iter().find(|m| !owner.contains_key(&m.key)) {
            return Err(Error::invariant(format!(
                "document '{}': mention {} is in no chain",
                doc.id, missing.key
            )));
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ChainSet {
    type Item = &'a Chain;
    type IntoIter = std::slice::Iter<'a, Chain>;

    fn into_iter(self) -> Self::IntoIter {
        self.chains.iter()
    }
}

impl FromIterator<Chain> for ChainSet {
    fn from_iter<I: IntoIterator<Item = Chain>>(iter: I) -> Self {
        Self {
            chains: iter.into_iter().collect(),
        }
    }
}
