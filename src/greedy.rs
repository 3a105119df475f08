//! Greedy chain building from symmetric coreference scores.
//!
//! The builder grows chains one mention at a time:
//!
//! 1. **Attach**: move the unassigned mention that best fits an existing chain
//!    into it. A fit must be *valid* (no caption clash, compatible types) and
//!    its mean score over the chain must clear the threshold; among those the
//!    highest-ranked candidate wins.
//! 2. **Seed**: if nothing attaches, start a new chain from the best valid
//!    pair of unassigned mentions.
//! 3. **Singletons**: if nothing seeds either, every remaining mention becomes
//!    its own chain.
//!
//! Each step restarts the loop, so a document costs O(n^4) in the worst case.
//! Documents are small and independent; the scheduler parallelizes across them.
//!
//! # Example
//!
//! ```rust
//! use capcoref::greedy::{GreedyChainBuilder, GreedyConfig};
//! use capcoref::{CorefScores, Document, LinkScore, Mention, MentionKey};
//!
//! let m1 = Mention::new(MentionKey::new(0, 0, 2), "a man", "people");
//! let m2 = Mention::new(MentionKey::new(1, 0, 2), "a guy", "people");
//! let doc = Document::with_mentions("img", vec![m1.clone(), m2.clone()]);
//!
//! let mut scores = CorefScores::new();
//! scores.insert_pair("img", m1.key, m2.key, LinkScore::new(0.9));
//!
//! let builder = GreedyChainBuilder::new(&scores, GreedyConfig::default());
//! let chains = builder.build(&doc);
//! assert_eq!(chains.len(), 1);
//! ```

use crate::error::{Error, Result};
use crate::solver::{verify_graph, RelationSolver};
use capcoref_core::{
    Chain, ChainId, ChainSet, CorefScores, Document, FixedLinks, LinkScore, MentionKey,
    RelationGraph, RelationLabel, RelationScores,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// Scoring
// =============================================================================

/// Source of symmetric coreference scores.
pub trait CorefScorer: Send + Sync {
    /// Score of the ordered pair `(a, b)`, if known.
    fn pair_score(&self, doc: &str, a: MentionKey, b: MentionKey) -> Option<LinkScore>;

    /// Symmetric score of `{a, b}`. Missing pairs score 0 with no override.
    fn score(&self, doc: &str, a: MentionKey, b: MentionKey) -> LinkScore {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        self.pair_score(doc, first, second)
            .or_else(|| self.pair_score(doc, second, first))
            .unwrap_or_default()
    }
}

impl CorefScorer for CorefScores {
    fn pair_score(&self, doc: &str, a: MentionKey, b: MentionKey) -> Option<LinkScore> {
        self.get(doc, a, b).copied()
    }
}

/// Four-label scores drive the greedy builder through their COREF column.
impl CorefScorer for RelationScores {
    fn pair_score(&self, doc: &str, a: MentionKey, b: MentionKey) -> Option<LinkScore> {
        self.get(doc, a, b)
            .map(|s| LinkScore::new(s.get(RelationLabel::Coref)))
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// How attach candidates are ranked once they pass the mean-score test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainRanking {
    /// Best single pairwise score against the chain (historical behavior).
    #[default]
    Max,
    /// Mean pairwise score against the chain, the same quantity used for admission.
    Mean,
}

/// Configuration for [`GreedyChainBuilder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GreedyConfig {
    /// Scores must strictly exceed this to link.
    pub threshold: f64,
    /// Ranking key for attach candidates.
    pub rank_by: ChainRanking,
}

impl Default for GreedyConfig {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            rank_by: ChainRanking::Max,
        }
    }
}

impl GreedyConfig {
    /// Config with a custom threshold.
    #[must_use]
    pub fn with_threshold(threshold: f64) -> Self {
        Self {
            threshold,
            ..Default::default()
        }
    }

    /// Set the ranking key.
    #[must_use]
    pub fn rank_by(mut self, rank_by: ChainRanking) -> Self {
        self.rank_by = rank_by;
        self
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Greedy, single-threaded chain builder for one document at a time.
#[derive(Debug, Clone)]
pub struct GreedyChainBuilder<'s, S: CorefScorer + ?Sized> {
    scorer: &'s S,
    config: GreedyConfig,
}

/// Best candidate found by a pass: (ranking key, payload).
type Candidate<T> = Option<(f64, T)>;

fn keep_best<T>(best: &mut Candidate<T>, rank: f64, payload: T) {
    if best.as_ref().map_or(true, |(r, _)| rank > *r) {
        *best = Some((rank, payload));
    }
}

impl<'s, S: CorefScorer + ?Sized> GreedyChainBuilder<'s, S> {
    /// Create a builder over a score source.
    #[must_use]
    pub fn new(scorer: &'s S, config: GreedyConfig) -> Self {
        Self { scorer, config }
    }

    /// Builder configuration.
    #[must_use]
    pub fn config(&self) -> &GreedyConfig {
        &self.config
    }

    /// Partition the document's mentions into chains.
    ///
    /// Every mention ends up in exactly one chain. Chain ids are `"1"`, `"2"`,
    /// ... in creation order; ties go to the earliest mention and chain.
    #[must_use]
    pub fn build(&self, doc: &Document) -> ChainSet {
        let n = doc.len();
        let keys: Vec<MentionKey> = doc.mentions.iter().map(|m| m.key).collect();
        let scores: Vec<LinkScore> = (0..n * n)
            .map(|idx| {
                let (i, j) = (idx / n, idx % n);
                self.scorer.score(&doc.id, keys[i], keys[j])
            })
            .collect();
        let score = |i: usize, j: usize| scores[i * n + j];

        let mut unassigned: Vec<usize> = (0..n).collect();
        let mut chains: Vec<Vec<usize>> = Vec::new();
        let threshold = self.config.threshold;

        while !unassigned.is_empty() {
            // Attach pass.
            let mut best: Candidate<(usize, usize)> = None;
            for &m in &unassigned {
                for (c, members) in chains.iter().enumerate() {
                    let Some((mean, max)) = self.attach_scores(doc, m, members, &score) else {
                        continue;
                    };
                    if mean > threshold && max > threshold {
                        let rank = match self.config.rank_by {
                            ChainRanking::Max => max,
                            ChainRanking::Mean => mean,
                        };
                        keep_best(&mut best, rank, (m, c));
                    }
                }
            }
            if let Some((_, (m, c))) = best {
                chains[c].push(m);
                unassigned.retain(|&x| x != m);
                continue;
            }

            // Seed pass.
            let mut best: Candidate<(usize, usize)> = None;
            for (a, &i) in unassigned.iter().enumerate() {
                for &j in &unassigned[a + 1..] {
                    let s = score(i, j);
                    let valid = match s.forced {
                        Some(forced) => forced,
                        None => {
                            let (mi, mj) = (&doc.mentions[i], &doc.mentions[j]);
                            mi.lexical_type == mj.lexical_type && mi.key.caption != mj.key.caption
                        }
                    };
                    if valid && s.effective() > threshold {
                        keep_best(&mut best, s.effective(), (i, j));
                    }
                }
            }
            if let Some((_, (i, j))) = best {
                chains.push(vec![i, j]);
                unassigned.retain(|&x| x != i && x != j);
                continue;
            }

            // Singleton fallback.
            chains.extend(unassigned.drain(..).map(|m| vec![m]));
        }

        log::debug!(
            "[Greedy] {}: {} mentions -> {} chains",
            doc.id,
            n,
            chains.len()
        );

        chains
            .into_iter()
            .enumerate()
            .map(|(c, members)| {
                Chain::new(ChainId::from(c + 1), members.into_iter().map(|m| keys[m]))
            })
            .collect()
    }

    /// Mean and max effective score of `m` against `members`, or `None` when
    /// `m` may not join the chain.
    ///
    /// A must-not-link to any member forbids the join; otherwise a must-link
    /// to any member allows it regardless of captions and types.
    fn attach_scores(
        &self,
        doc: &Document,
        m: usize,
        members: &[usize],
        score: &impl Fn(usize, usize) -> LinkScore,
    ) -> Option<(f64, f64)> {
        let mut forced_link = false;
        for &x in members {
            match score(m, x).forced {
                Some(false) => return None,
                Some(true) => forced_link = true,
                None => {}
            }
        }

        if !forced_link {
            let mention = &doc.mentions[m];
            let clash = members
                .iter()
                .any(|&x| doc.mentions[x].key.caption == mention.key.caption);
            if clash {
                return None;
            }
            let has_pronoun = members.iter().any(|&x| doc.mentions[x].is_pronoun());
            let type_mismatch = members
                .iter()
                .any(|&x| doc.mentions[x].lexical_type != mention.lexical_type);
            if !has_pronoun && type_mismatch {
                return None;
            }
        }

        let mut sum = 0.0;
        let mut max = f64::NEG_INFINITY;
        for &x in members {
            let s = score(m, x).effective();
            sum += s;
            max = max.max(s);
        }
        Some((sum / members.len() as f64, max))
    }
}

/// Relation graph with `Coref` inside each chain and `Null` elsewhere.
pub fn chains_to_graph(doc: &Document, chains: &ChainSet) -> Result<RelationGraph> {
    let mut graph = RelationGraph::new(doc);
    for chain in chains {
        let idx: Vec<usize> = chain
            .members
            .iter()
            .filter_map(|&key| doc.index_of(key))
            .collect();
        for (a, &i) in idx.iter().enumerate() {
            for &j in &idx[a + 1..] {
                graph.set(i, j, RelationLabel::Coref)?;
            }
        }
    }
    Ok(graph)
}

/// Fixed links seen as coreference overrides: a fixed `Coref` is a must-link,
/// any other fixed label a must-not-link.
struct FixedOverlay<'s, S: CorefScorer + ?Sized> {
    scorer: &'s S,
    fixed: &'s FixedLinks,
}

impl<S: CorefScorer + ?Sized> CorefScorer for FixedOverlay<'_, S> {
    fn pair_score(&self, doc: &str, a: MentionKey, b: MentionKey) -> Option<LinkScore> {
        self.scorer.pair_score(doc, a, b)
    }

    fn score(&self, doc: &str, a: MentionKey, b: MentionKey) -> LinkScore {
        let fixed = self
            .fixed
            .get(doc, a, b)
            .copied()
            .or_else(|| self.fixed.get(doc, b, a).map(|l| l.mirror()));
        match fixed {
            Some(RelationLabel::Coref) => LinkScore::must_link(),
            Some(_) => LinkScore::must_not_link(),
            None => self.scorer.score(doc, a, b),
        }
    }
}

/// The greedy builder as a [`RelationSolver`]: the cheap inference mode used as
/// the last step of a fallback policy. Ignores thread budgets.
///
/// With fixed links, fixed `Coref` pairs are must-links and every other fixed
/// pair a must-not-link; fixed `Subset` / `Superset` pairs are then lifted to
/// the chains of their mentions and closed transitively. A graph that still
/// disagrees with a fixed link is an error, never returned.
pub struct GreedyRelationSolver<'s, S: CorefScorer + ?Sized> {
    builder: GreedyChainBuilder<'s, S>,
    fixed: Option<&'s FixedLinks>,
}

impl<'s, S: CorefScorer + ?Sized> GreedyRelationSolver<'s, S> {
    /// Wrap a score source.
    #[must_use]
    pub fn new(scorer: &'s S, config: GreedyConfig) -> Self {
        Self {
            builder: GreedyChainBuilder::new(scorer, config),
            fixed: None,
        }
    }

    /// Honor these fixed links.
    #[must_use]
    pub fn with_fixed_links(mut self, fixed: &'s FixedLinks) -> Self {
        self.fixed = Some(fixed);
        self
    }
}

impl<S: CorefScorer + ?Sized> RelationSolver for GreedyRelationSolver<'_, S> {
    fn name(&self) -> &str {
        "greedy"
    }

    fn solve(&self, doc: &Document, _threads: usize) -> Result<RelationGraph> {
        let Some(fixed) = self.fixed else {
            return chains_to_graph(doc, &self.builder.build(doc));
        };
        let overlay = FixedOverlay {
            scorer: self.builder.scorer,
            fixed,
        };
        let chains = GreedyChainBuilder::new(&overlay, self.builder.config.clone()).build(doc);
        let mut graph = chains_to_graph(doc, &chains)?;
        lift_fixed_subsets(doc, &chains, fixed, &mut graph)?;
        check_fixed_links(doc, fixed, &graph)?;
        verify_graph(&graph)?;
        Ok(graph)
    }
}

/// Write fixed subset pairs at chain level, closed transitively.
fn lift_fixed_subsets(
    doc: &Document,
    chains: &ChainSet,
    fixed: &FixedLinks,
    graph: &mut RelationGraph,
) -> Result<()> {
    let n = doc.len();
    let mut chain_of = vec![0usize; n];
    for (c, chain) in chains.iter().enumerate() {
        for &key in &chain.members {
            if let Some(i) = doc.index_of(key) {
                chain_of[i] = c;
            }
        }
    }

    // below[a][b]: chain a is a subset of chain b.
    let k = chains.len();
    let mut below = vec![vec![false; k]; k];
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            let (a, b) = (doc.mentions[i].key, doc.mentions[j].key);
            if fixed.get(&doc.id, a, b) != Some(&RelationLabel::Subset)
                && fixed.get(&doc.id, b, a) != Some(&RelationLabel::Superset)
            {
                continue;
            }
            if chain_of[i] == chain_of[j] {
                return Err(Error::solver(format!(
                    "document '{}': fixed subset ({}, {}) inside one greedy chain",
                    doc.id, a, b
                )));
            }
            below[chain_of[i]][chain_of[j]] = true;
        }
    }
    for m in 0..k {
        for a in 0..k {
            if !below[a][m] {
                continue;
            }
            for b in 0..k {
                if below[m][b] {
                    below[a][b] = true;
                }
            }
        }
    }
    if (0..k).any(|c| below[c][c]) {
        return Err(Error::solver(format!(
            "document '{}': fixed subset links form a cycle over greedy chains",
            doc.id
        )));
    }

    for i in 0..n {
        for j in 0..n {
            if i != j && below[chain_of[i]][chain_of[j]] {
                graph.set(i, j, RelationLabel::Subset)?;
            }
        }
    }
    Ok(())
}

fn check_fixed_links(doc: &Document, fixed: &FixedLinks, graph: &RelationGraph) -> Result<()> {
    for i in 0..doc.len() {
        for j in 0..doc.len() {
            if i == j {
                continue;
            }
            let (a, b) = (doc.mentions[i].key, doc.mentions[j].key);
            if let Some(&label) = fixed.get(&doc.id, a, b) {
                if graph.label(i, j) != label {
                    return Err(Error::solver(format!(
                        "document '{}': greedy graph has ({}, {}) = {} against fixed {}",
                        doc.id,
                        a,
                        b,
                        graph.label(i, j),
                        label
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use capcoref_core::{Mention, PronounType};

    fn mention(caption: u32, start: u32, ty: &str) -> Mention {
        Mention::new(MentionKey::new(caption, start, start + 1), "x", ty)
    }

    fn link(scores: &mut CorefScores, doc: &Document, i: usize, j: usize, s: LinkScore) {
        scores.insert_pair(&doc.id, doc.mentions[i].key, doc.mentions[j].key, s);
    }

    #[test]
    fn scores_are_symmetric() {
        let doc = Document::with_mentions("d", vec![mention(0, 0, "people"), mention(1, 0, "people")]);
        let mut scores = CorefScores::new();
        link(&mut scores, &doc, 1, 0, LinkScore::new(0.3));
        let (a, b) = (doc.mentions[0].key, doc.mentions[1].key);
        assert_eq!(scores.score("d", a, b), scores.score("d", b, a));
        assert_eq!(scores.score("d", a, b).value, 0.3);
    }

    #[test]
    fn attach_prefers_highest_max_score() {
        // m0, m1 seed a chain; m2 and m3 both fit, m3 with the higher max.
        let doc = Document::with_mentions(
            "d",
            vec![
                mention(0, 0, "people"),
                mention(1, 0, "people"),
                mention(2, 0, "people"),
                mention(3, 0, "people"),
            ],
        );
        let mut scores = CorefScores::new();
        link(&mut scores, &doc, 0, 1, LinkScore::new(0.95));
        link(&mut scores, &doc, 2, 0, LinkScore::new(0.6));
        link(&mut scores, &doc, 2, 1, LinkScore::new(0.6));
        link(&mut scores, &doc, 3, 0, LinkScore::new(0.9));
        link(&mut scores, &doc, 3, 1, LinkScore::new(0.2));

        let chains = GreedyChainBuilder::new(&scores, GreedyConfig::with_threshold(0.5)).build(&doc);
        // m3 has mean 0.55 and max 0.9; m2 has mean 0.6 and max 0.6.
        // Both pass; m3 attaches first, then m2 must clear its mean against m3 too.
        let first = chains.chain_of(doc.mentions[0].key).unwrap();
        assert!(first.contains(doc.mentions[3].key));
    }

    #[test]
    fn mean_ranking_changes_the_order() {
        let doc = Document::with_mentions(
            "d",
            vec![
                mention(0, 0, "people"),
                mention(1, 0, "people"),
                mention(2, 0, "people"),
                mention(3, 0, "people"),
            ],
        );
        let mut scores = CorefScores::new();
        link(&mut scores, &doc, 0, 1, LinkScore::new(0.95));
        link(&mut scores, &doc, 2, 0, LinkScore::new(0.6));
        link(&mut scores, &doc, 2, 1, LinkScore::new(0.6));
        link(&mut scores, &doc, 3, 0, LinkScore::new(0.9));
        link(&mut scores, &doc, 3, 1, LinkScore::new(0.2));

        let config = GreedyConfig::with_threshold(0.5).rank_by(ChainRanking::Mean);
        let chains = GreedyChainBuilder::new(&scores, config).build(&doc);
        // m2 (mean 0.6) attaches first; m3 then averages (0.9 + 0.2 + 0) / 3 < 0.5.
        let first = chains.chain_of(doc.mentions[0].key).unwrap();
        assert!(first.contains(doc.mentions[2].key));
        assert!(!first.contains(doc.mentions[3].key));
    }

    #[test]
    fn pronoun_members_relax_type_check() {
        let doc = Document::with_mentions(
            "d",
            vec![
                mention(0, 0, "people"),
                mention(1, 0, "other").with_pronoun(PronounType::Subjective),
                mention(2, 0, "people"),
                mention(3, 0, "animals"),
            ],
        );
        let mut scores = CorefScores::new();
        link(&mut scores, &doc, 0, 1, LinkScore::must_link());
        link(&mut scores, &doc, 3, 0, LinkScore::new(0.8));
        link(&mut scores, &doc, 3, 1, LinkScore::new(0.8));
        link(&mut scores, &doc, 2, 0, LinkScore::new(0.1));

        let chains = GreedyChainBuilder::new(&scores, GreedyConfig::with_threshold(0.5)).build(&doc);
        let chain = chains.chain_of(doc.mentions[0].key).unwrap();
        assert!(chain.contains(doc.mentions[1].key));
        assert!(chain.contains(doc.mentions[3].key));
        chains.verify_partition(&doc).unwrap();
    }

    #[test]
    fn chains_to_graph_links_members() {
        let doc = Document::with_mentions(
            "d",
            vec![mention(0, 0, "people"), mention(1, 0, "people"), mention(2, 0, "people")],
        );
        let chains: ChainSet = vec![
            Chain::new("1", [doc.mentions[0].key, doc.mentions[2].key]),
            Chain::new("2", [doc.mentions[1].key]),
        ]
        .into_iter()
        .collect();
        let graph = chains_to_graph(&doc, &chains).unwrap();
        assert_eq!(graph.label(2, 0), RelationLabel::Coref);
        assert_eq!(graph.label(0, 1), RelationLabel::Null);
    }

    fn fixed_links(doc: &Document, links: &[(usize, usize, RelationLabel)]) -> FixedLinks {
        let mut fixed = FixedLinks::new();
        for &(i, j, label) in links {
            fixed.insert_pair(&doc.id, doc.mentions[i].key, doc.mentions[j].key, label);
        }
        fixed
    }

    #[test]
    fn fixed_subsets_lift_to_chains() {
        let doc = Document::with_mentions(
            "d",
            vec![mention(0, 0, "people"), mention(1, 0, "people"), mention(2, 0, "people")],
        );
        let mut scores = CorefScores::new();
        link(&mut scores, &doc, 0, 1, LinkScore::new(0.9));
        link(&mut scores, &doc, 1, 2, LinkScore::new(0.9));
        link(&mut scores, &doc, 0, 2, LinkScore::new(0.9));
        let fixed = fixed_links(&doc, &[(2, 0, RelationLabel::Subset)]);

        let graph = GreedyRelationSolver::new(&scores, GreedyConfig::with_threshold(0.5))
            .with_fixed_links(&fixed)
            .solve(&doc, 1)
            .unwrap();
        assert_eq!(graph.label(0, 1), RelationLabel::Coref);
        assert_eq!(graph.label(2, 0), RelationLabel::Subset);
        // 1 shares 0's chain, so it contains 2 as well.
        assert_eq!(graph.label(2, 1), RelationLabel::Subset);
        verify_graph(&graph).unwrap();
    }

    #[test]
    fn fixed_coref_links_without_scores() {
        let doc = Document::with_mentions(
            "d",
            vec![mention(0, 0, "people"), mention(0, 4, "scene")],
        );
        let fixed = fixed_links(&doc, &[(0, 1, RelationLabel::Coref)]);
        let graph = GreedyRelationSolver::new(&CorefScores::new(), GreedyConfig::with_threshold(0.5))
            .with_fixed_links(&fixed)
            .solve(&doc, 1)
            .unwrap();
        assert_eq!(graph.label(1, 0), RelationLabel::Coref);
    }

    #[test]
    fn unmet_fixed_links_are_errors() {
        let doc = Document::with_mentions(
            "d",
            vec![mention(0, 0, "people"), mention(1, 0, "people"), mention(2, 0, "people")],
        );
        let fixed = fixed_links(
            &doc,
            &[
                (0, 1, RelationLabel::Coref),
                (1, 2, RelationLabel::Coref),
                (0, 2, RelationLabel::Subset),
            ],
        );
        let err = GreedyRelationSolver::new(&CorefScores::new(), GreedyConfig::default())
            .with_fixed_links(&fixed)
            .solve(&doc, 1)
            .unwrap_err();
        assert!(matches!(err, Error::Solver(_)), "{}", err);
    }
}
