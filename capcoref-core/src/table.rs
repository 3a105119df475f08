//! Tables keyed by ordered mention pairs.
//!
//! Score dictionaries and fixed links share one shape: an external, read-only
//! mapping from an ordered pair to a value. On disk they are JSON objects keyed
//! by the textual [`MentionPairKey`] form:
//!
//! ```json
//! { "1000092795;0:0-2,1:3-5": [0.1, 0.8, 0.05, 0.05] }
//! ```
//!
//! In memory entries are grouped per document so that lookups during
//! inference never allocate.

use crate::error::Result;
use crate::label::{LabelScores, LinkScore, RelationLabel};
use crate::mention::{MentionKey, MentionPairKey};
use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::io::Read;

/// Scalar coreference scores with optional must-link / must-not-link overrides.
pub type CorefScores = PairTable<LinkScore>;

/// Four-label scores for the constraint solver.
pub type RelationScores = PairTable<LabelScores>;

/// Hard pre-decided labels from a rule-based step.
pub type FixedLinks = PairTable<RelationLabel>;

/// Map from ordered mention pair to a value. Absent keys mean "no information".
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "HashMap<MentionPairKey, V>")]
#[serde(bound(deserialize = "V: Deserialize<'de>"))]
pub struct PairTable<V> {
    docs: HashMap<String, HashMap<(MentionKey, MentionKey), V>>,
}

impl<V> Default for PairTable<V> {
    fn default() -> Self {
        Self {
            docs: HashMap::new(),
        }
    }
}

impl<V> PairTable<V> {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value for an ordered pair, returning the previous one.
    pub fn insert(&mut self, key: MentionPairKey, value: V) -> Option<V> {
        self.docs
            .entry(key.doc)
            .or_default()
            .insert((key.first, key.second), value)
    }

    /// Insert by parts.
    pub fn insert_pair(
        &mut self,
        doc: &str,
        first: MentionKey,
        second: MentionKey,
        value: V,
    ) -> Option<V> {
        self.docs
            .entry(doc.to_string())
            .or_default()
            .insert((first, second), value)
    }

    /// Value of the ordered pair `(first, second)` in `doc`.
    #[must_use]
    pub fn get(&self, doc: &str, first: MentionKey, second: MentionKey) -> Option<&V> {
        self.docs.get(doc)?.get(&(first, second))
    }

    /// Value for a pair key.
    #[must_use]
    pub fn get_key(&self, key: &MentionPairKey) -> Option<&V> {
        self.get(&key.doc, key.first, key.second)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.values().map(HashMap::len).sum()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.values().all(HashMap::is_empty)
    }

    /// Number of entries belonging to one document.
    #[must_use]
    pub fn document_len(&self, doc: &str) -> usize {
        self.docs.get(doc).map_or(0, HashMap::len)
    }

    /// Iterate over all entries (unordered).
    pub fn iter(&self) -> impl Iterator<Item = (MentionPairKey, &V)> + '_ {
        self.docs.iter().flat_map(|(doc, pairs)| {
            pairs
                .iter()
                .map(move |((a, b), v)| (MentionPairKey::new(doc.clone(), *a, *b), v))
        })
    }
}

impl<V: DeserializeOwned> PairTable<V> {
    /// Parse a table from a JSON object keyed by pair strings.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse a table from a JSON reader.
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }
}

impl<V: Serialize> PairTable<V> {
    /// Render the table as a JSON object.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl<V> From<HashMap<MentionPairKey, V>> for PairTable<V> {
    fn from(flat: HashMap<MentionPairKey, V>) -> Self {
        flat.into_iter().collect()
    }
}

impl<V> FromIterator<(MentionPairKey, V)> for PairTable<V> {
    fn from_iter<I: IntoIterator<Item = (MentionPairKey, V)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (key, value) in iter {
            table.insert(key, value);
        }
        table
    }
}

impl<V: Serialize> Serialize for PairTable<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self.iter() {
            map.serialize_entry(&key, value)?;
        }
        map.end()
    }
}
