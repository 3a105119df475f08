//! Relation labels and the scores attached to them.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// RelationLabel
// =============================================================================

/// Relation between an ordered mention pair `(i, j)`.
///
/// `Subset` means the referents of `i` are a strict subset of those of `j`;
/// `Superset` is its mirror. Serialized as the integer index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RelationLabel {
    /// Unrelated.
    #[default]
    Null = 0,
    /// Same entity.
    Coref = 1,
    /// `i` is part of `j`.
    Subset = 2,
    /// `j` is part of `i`.
    Superset = 3,
}

impl RelationLabel {
    /// All labels in index order.
    pub const ALL: [RelationLabel; 4] = [
        RelationLabel::Null,
        RelationLabel::Coref,
        RelationLabel::Subset,
        RelationLabel::Superset,
    ];

    /// Integer index (0-3).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Label for an integer index.
    pub fn from_index(index: usize) -> Result<Self> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or_else(|| Error::parse(format!("relation label index {} out of range", index)))
    }

    /// Label of the reversed pair `(j, i)`.
    #[must_use]
    pub const fn mirror(self) -> Self {
        match self {
            RelationLabel::Null => RelationLabel::Null,
            RelationLabel::Coref => RelationLabel::Coref,
            RelationLabel::Subset => RelationLabel::Superset,
            RelationLabel::Superset => RelationLabel::Subset,
        }
    }
}

impl fmt::Display for RelationLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelationLabel::Null => "NULL",
            RelationLabel::Coref => "COREF",
            RelationLabel::Subset => "SUBSET",
            RelationLabel::Superset => "SUPERSET",
        };
        f.write_str(name)
    }
}

impl From<RelationLabel> for u8 {
    fn from(label: RelationLabel) -> Self {
        label as u8
    }
}

impl TryFrom<u8> for RelationLabel {
    type Error = Error;

    fn try_from(index: u8) -> Result<Self> {
        Self::from_index(usize::from(index))
    }
}

// =============================================================================
// Scores
// =============================================================================

/// Per-label scores of an ordered pair: `[null, coref, subset, superset]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelScores(pub [f64; 4]);

impl LabelScores {
    /// Create from the four label scores.
    #[must_use]
    pub const fn new(null: f64, coref: f64, subset: f64, superset: f64) -> Self {
        Self([null, coref, subset, superset])
    }

    /// Score of one label.
    #[must_use]
    pub fn get(&self, label: RelationLabel) -> f64 {
        self.0[label.index()]
    }
}

/// Scalar coreference score of a pair, with an optional hard override.
///
/// `forced == Some(true)` is a must-link, `Some(false)` a must-not-link.
/// Deserializes from a bare number or from `{"value": .., "forced": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "LinkScoreRepr")]
pub struct LinkScore {
    /// Classifier score.
    pub value: f64,
    /// Hard decision, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forced: Option<bool>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LinkScoreRepr {
    Bare(f64),
    Full {
        value: f64,
        #[serde(default)]
        forced: Option<bool>,
    },
}

impl From<LinkScoreRepr> for LinkScore {
    fn from(repr: LinkScoreRepr) -> Self {
        match repr {
            LinkScoreRepr::Bare(value) => Self::new(value),
            LinkScoreRepr::Full { value, forced } => Self { value, forced },
        }
    }
}

impl LinkScore {
    /// A soft score.
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Self {
            value,
            forced: None,
        }
    }

    /// A pair that must be linked.
    #[must_use]
    pub const fn must_link() -> Self {
        Self {
            value: 0.0,
            forced: Some(true),
        }
    }

    /// A pair that must never be linked.
    #[must_use]
    pub const fn must_not_link() -> Self {
        Self {
            value: 0.0,
            forced: Some(false),
        }
    }

    /// Value used when aggregating: forced pairs dominate every soft score.
    #[must_use]
    pub fn effective(&self) -> f64 {
        match self.forced {
            Some(true) => f64::INFINITY,
            Some(false) => f64::NEG_INFINITY,
            None => self.value,
        }
    }
}
