//! Mentions, mention keys and documents.
//!
//! A document is a set of captions describing one image. Each caption yields
//! a handful of mentions; a mention is identified inside its document by
//! `(caption, start, end)`, where the span is in caption tokens.
//!
//! # Example
//!
//! ```rust
//! use capcoref_core::{Document, Mention, MentionKey};
//!
//! let mut doc = Document::new("1000092795");
//! doc.push(Mention::new(MentionKey::new(0, 0, 2), "a man", "people"));
//! doc.push(Mention::new(MentionKey::new(1, 3, 5), "the guy", "people"));
//!
//! assert_eq!(doc.len(), 2);
//! assert_eq!(doc.pair_key(0, 1).to_string(), "1000092795;0:0-2,1:3-5");
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// MentionKey
// =============================================================================

/// Identity of a mention within its document: caption index plus token span.
///
/// Rendered as `"<caption>:<start>-<end>"`, which is also its serialized form
/// so keys can be used directly as JSON object keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct MentionKey {
    /// Caption index within the document.
    pub caption: u32,
    /// First token (inclusive).
    pub start: u32,
    /// Last token (exclusive).
    pub end: u32,
}

impl MentionKey {
    /// Create a mention key.
    #[must_use]
    pub const fn new(caption: u32, start: u32, end: u32) -> Self {
        Self {
            caption,
            start,
            end,
        }
    }
}

impl fmt::Display for MentionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.caption, self.start, self.end)
    }
}

impl FromStr for MentionKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (caption, span) = s
            .split_once(':')
            .ok_or_else(|| Error::parse(format!("mention key '{}' has no caption", s)))?;
        let (start, end) = span
            .split_once('-')
            .ok_or_else(|| Error::parse(format!("mention key '{}' has no span", s)))?;
        let num = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|e| Error::parse(format!("mention key '{}': {}", s, e)))
        };
        Ok(Self::new(num(caption)?, num(start)?, num(end)?))
    }
}

impl From<MentionKey> for String {
    fn from(key: MentionKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for MentionKey {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

// =============================================================================
// MentionPairKey
// =============================================================================

/// Key of an ordered mention pair, scoped to one document.
///
/// Rendered as `"<doc>;<first>,<second>"`. The document id may itself contain
/// `;`, so parsing splits on the last one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct MentionPairKey {
    /// Document the pair belongs to.
    pub doc: String,
    /// Left mention of the ordered pair.
    pub first: MentionKey,
    /// Right mention of the ordered pair.
    pub second: MentionKey,
}

impl MentionPairKey {
    /// Create a pair key.
    #[must_use]
    pub fn new(doc: impl Into<String>, first: MentionKey, second: MentionKey) -> Self {
        Self {
            doc: doc.into(),
            first,
            second,
        }
    }

    /// The same pair in the opposite order.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            doc: self.doc.clone(),
            first: self.second,
            second: self.first,
        }
    }
}

impl fmt::Display for MentionPairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{},{}", self.doc, self.first, self.second)
    }
}

impl FromStr for MentionPairKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (doc, pair) = s
            .rsplit_once(';')
            .ok_or_else(|| Error::parse(format!("pair key '{}' has no document id", s)))?;
        let (first, second) = pair
            .split_once(',')
            .ok_or_else(|| Error::parse(format!("pair key '{}' is not a pair", s)))?;
        Ok(Self::new(doc, first.parse()?, second.parse()?))
    }
}

impl From<MentionPairKey> for String {
    fn from(key: MentionPairKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for MentionPairKey {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

// =============================================================================
// Mention
// =============================================================================

/// Pronoun category of a mention.
///
/// `None` marks a non-pronominal mention. Pronominal mentions do not
/// constrain the lexical type of the chain they join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PronounType {
    /// Not a pronoun.
    #[default]
    None,
    /// "he", "she", "they"
    Subjective,
    /// "him", "her", "them"
    Objective,
    /// "his", "her", "their"
    Possessive,
    /// "himself", "themselves"
    Reflexive,
    /// "each other", "one another"
    Reciprocal,
    /// "who", "which", "that"
    Relative,
    /// "this", "those"
    Demonstrative,
    /// "someone", "one", "another"
    Indefinite,
    /// Anything else a pronoun classifier can emit.
    Other,
}

/// Estimated number of referents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// No estimate.
    #[default]
    Unknown,
    /// A known count ("two dogs").
    Exact(u32),
    /// Plural with no explicit count ("dogs").
    Plural,
    /// Mass noun ("water", "grass").
    Mass,
}

/// A single reference to an entity inside one caption.
///
/// Mentions are owned by their [`Document`]. Everything downstream refers to
/// them by [`MentionKey`] or by index in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    /// Identity within the document.
    pub key: MentionKey,
    /// Surface form.
    #[serde(default)]
    pub text: String,
    /// Lexical type (e.g. "people", "animals", "clothing").
    pub lexical_type: String,
    /// Pronoun category.
    #[serde(default)]
    pub pronoun: PronounType,
    /// Cardinality estimate.
    #[serde(default)]
    pub cardinality: Cardinality,
    /// Gold chain id. Evaluation only; inference never reads it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gold_chain: Option<String>,
}

impl Mention {
    /// Create a non-pronominal mention.
    #[must_use]
    pub fn new(key: MentionKey, text: impl Into<String>, lexical_type: impl Into<String>) -> Self {
        Self {
            key,
            text: text.into(),
            lexical_type: lexical_type.into(),
            pronoun: PronounType::None,
            cardinality: Cardinality::Unknown,
            gold_chain: None,
        }
    }

    /// Set the pronoun category.
    #[must_use]
    pub fn with_pronoun(mut self, pronoun: PronounType) -> Self {
        self.pronoun = pronoun;
        self
    }

    /// Set the cardinality estimate.
    #[must_use]
    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    /// Set the gold chain id.
    #[must_use]
    pub fn with_gold_chain(mut self, chain: impl Into<String>) -> Self {
        self.gold_chain = Some(chain.into());
        self
    }

    /// Whether this mention is pronominal.
    #[must_use]
    pub fn is_pronoun(&self) -> bool {
        self.pronoun != PronounType::None
    }
}

impl fmt::Display for Mention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\" [{}] ({})", self.text, self.key, self.lexical_type)
    }
}

// =============================================================================
// Document
// =============================================================================

/// An image region. Only the count matters here; joint grounding lives elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Box id within the image.
    pub id: u32,
    /// Left edge.
    pub xmin: u32,
    /// Top edge.
    pub ymin: u32,
    /// Right edge.
    pub xmax: u32,
    /// Bottom edge.
    pub ymax: u32,
}

/// The captions of one image, as an ordered list of mentions.
///
/// Documents are the unit of independence: no relation crosses documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document id (usually the image id).
    pub id: String,
    /// Mentions in caption order.
    pub mentions: Vec<Mention>,
    /// Bounding boxes of the image.
    #[serde(default)]
    pub boxes: Vec<BoundingBox>,
}

impl Document {
    /// Create an empty document.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mentions: Vec::new(),
            boxes: Vec::new(),
        }
    }

    /// Create a document from mentions.
    #[must_use]
    pub fn with_mentions(id: impl Into<String>, mentions: Vec<Mention>) -> Self {
        Self {
            id: id.into(),
            mentions,
            boxes: Vec::new(),
        }
    }

    /// Append a mention.
    pub fn push(&mut self, mention: Mention) {
        self.mentions.push(mention);
    }

    /// Number of mentions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mentions.len()
    }

    /// Whether the document has no mentions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mentions.is_empty()
    }

    /// Index of the mention with this key.
    #[must_use]
    pub fn index_of(&self, key: MentionKey) -> Option<usize> {
        self.mentions.iter().position(|m| m.key == key)
    }

    /// Key of the ordered pair `(i, j)`.
    ///
    /// # Panics
    ///
    /// Panics if either index is out of range.
    #[must_use]
    pub fn pair_key(&self, i: usize, j: usize) -> MentionPairKey {
        MentionPairKey::new(self.id.clone(), self.mentions[i].key, self.mentions[j].key)
    }

    /// Check that mention keys are unique.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.mentions.len());
        for mention in &self.mentions {
            if !seen.insert(mention.key) {
                return Err(Error::invalid_input(format!(
                    "document '{}' has duplicate mention {}",
                    self.id, mention.key
                )));
            }
        }
        Ok(())
    }
}
