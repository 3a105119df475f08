//! Constraint-based relation solving.
//!
//! [`ConstraintSolver`] assigns one of `Null`, `Coref`, `Subset`, `Superset` to
//! every ordered mention pair of a document so that the total score of the
//! chosen labels is maximal, subject to:
//!
//! - exactly one label per ordered pair;
//! - fixed links: a pre-decided pair keeps its label whatever its scores;
//! - `Coref` symmetry and `Subset`/`Superset` antisymmetry;
//! - `Subset` transitivity;
//! - entity consistency: coreferent mentions relate identically to every
//!   third mention.
//!
//! The solve is exact (branch-and-bound with triple propagation in the
//! private `search` module) at a score resolution of 1e-6. Pairs missing from
//! the score dictionary score zero for every label.
//!
//! # Example
//!
//! ```rust
//! use capcoref::solver::{ConstraintSolver, RelationSolver, SolverConfig};
//! use capcoref::{Document, LabelScores, Mention, MentionKey, RelationLabel, RelationScores};
//!
//! let a = Mention::new(MentionKey::new(0, 0, 2), "two dogs", "animals");
//! let b = Mention::new(MentionKey::new(1, 0, 2), "a dog", "animals");
//! let doc = Document::with_mentions("img", vec![a.clone(), b.clone()]);
//!
//! let mut scores = RelationScores::new();
//! scores.insert_pair("img", b.key, a.key, LabelScores::new(0.1, 0.2, 0.7, 0.0));
//!
//! let solver = ConstraintSolver::new(&scores, SolverConfig::default());
//! let graph = solver.solve(&doc, 1).unwrap();
//! assert_eq!(graph.label(1, 0), RelationLabel::Subset);
//! assert_eq!(graph.label(0, 1), RelationLabel::Superset);
//! ```

pub mod consistency;
pub(crate) mod search;

pub use consistency::{triple_consistent, verify_graph};

use crate::error::{Error, Result};
use capcoref_core::{Document, FixedLinks, LabelScores, RelationGraph, RelationLabel, RelationScores};
use rayon::prelude::*;
use search::{Problem, Shared};
use serde::{Deserialize, Serialize};

/// Something that turns a document into a complete relation graph.
///
/// Implementations hold only read-only inputs; one instance is shared by all
/// scheduler workers.
pub trait RelationSolver: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Solve one document using up to `threads` internal threads.
    fn solve(&self, doc: &Document, threads: usize) -> Result<RelationGraph>;
}

/// Configuration for [`ConstraintSolver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Give up after expanding this many search nodes. `None` searches to completion.
    pub max_nodes: Option<u64>,
    /// Depth at which the search frontier is split into independent subtrees.
    pub split_depth: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_nodes: Some(20_000_000),
            split_depth: 3,
        }
    }
}

impl SolverConfig {
    /// Set the node budget.
    #[must_use]
    pub fn with_max_nodes(mut self, max_nodes: Option<u64>) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    /// Set the split depth.
    #[must_use]
    pub fn with_split_depth(mut self, split_depth: usize) -> Self {
        self.split_depth = split_depth;
        self
    }
}

/// Exact solver over four-label pair scores with optional fixed links.
#[derive(Debug, Clone)]
pub struct ConstraintSolver<'a> {
    scores: &'a RelationScores,
    fixed: Option<&'a FixedLinks>,
    config: SolverConfig,
}

impl<'a> ConstraintSolver<'a> {
    /// Create a solver without fixed links.
    #[must_use]
    pub fn new(scores: &'a RelationScores, config: SolverConfig) -> Self {
        Self {
            scores,
            fixed: None,
            config,
        }
    }

    /// Enforce these fixed links as equality constraints.
    #[must_use]
    pub fn with_fixed_links(mut self, fixed: &'a FixedLinks) -> Self {
        self.fixed = Some(fixed);
        self
    }

    /// Solver configuration.
    #[must_use]
    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Scores of the ordered pair `(i, j)`; missing pairs score zero.
    fn pair_scores(&self, doc: &Document, i: usize, j: usize) -> LabelScores {
        self.scores
            .get(&doc.id, doc.mentions[i].key, doc.mentions[j].key)
            .copied()
            .unwrap_or_default()
    }

    /// The fixed label of `(i, j)`, seen from `i`, if either direction is fixed.
    fn fixed_label(&self, doc: &Document, i: usize, j: usize) -> Result<Option<RelationLabel>> {
        let Some(fixed) = self.fixed else {
            return Ok(None);
        };
        let (a, b) = (doc.mentions[i].key, doc.mentions[j].key);
        let forward = fixed.get(&doc.id, a, b).copied();
        let backward = fixed.get(&doc.id, b, a).map(|l| l.mirror());
        match (forward, backward) {
            (Some(f), Some(r)) if f != r => Err(Error::infeasible(format!(
                "document '{}': fixed links ({}, {}) = {} and ({}, {}) = {} contradict",
                doc.id,
                a,
                b,
                f,
                b,
                a,
                r.mirror()
            ))),
            (f, r) => Ok(f.or(r)),
        }
    }

    /// Build the pair-level search problem for `doc`.
    fn problem(&self, doc: &Document) -> Result<Problem> {
        let n = doc.len();
        let mut cells = vec![([0i64; 4], search::FULL); n * n];
        for j in 1..n {
            for i in 0..j {
                let forward = self.pair_scores(doc, i, j);
                let backward = self.pair_scores(doc, j, i);
                let mut combined = [0i64; 4];
                for label in RelationLabel::ALL {
                    combined[label.index()] =
                        search::to_fixed(forward.get(label) + backward.get(label.mirror()));
                }
                let allowed = match self.fixed_label(doc, i, j)? {
                    Some(label) => search::bit(label),
                    None => search::FULL,
                };
                cells[i * n + j] = (combined, allowed);
            }
        }
        Ok(Problem::new(n, |i, j| cells[i * n + j]))
    }
}

impl RelationSolver for ConstraintSolver<'_> {
    fn name(&self) -> &str {
        "exact"
    }

    fn solve(&self, doc: &Document, threads: usize) -> Result<RelationGraph> {
        doc.validate()?;
        let problem = self.problem(doc)?;
        let shared = Shared::new(self.config.max_nodes);
        let prefixes = search::prefixes(&problem, self.config.split_depth);

        let best = if threads <= 1 || prefixes.len() <= 1 {
            search::combine(
                prefixes
                    .iter()
                    .map(|p| search::search_subtree(&problem, p, &shared)),
            )
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| Error::solver(format!("thread pool: {}", e)))?;
            let leaves: Vec<_> = pool.install(|| {
                prefixes
                    .par_iter()
                    .map(|p| search::search_subtree(&problem, p, &shared))
                    .collect()
            });
            search::combine(leaves)
        };

        let (value, labels) = search::finish(best, &shared).map_err(|e| match e {
            Error::Infeasible(msg) => Error::infeasible(format!("document '{}': {}", doc.id, msg)),
            other => other,
        })?;

        let mut graph = RelationGraph::new(doc);
        for (&(i, j), &label) in problem.pairs().iter().zip(&labels) {
            graph.set(i, j, label)?;
        }
        log::debug!(
            "[Solver] {}: {} mentions, objective {:.4}, {} nodes, {} threads",
            doc.id,
            doc.len(),
            value as f64 / search::SCALE,
            shared.nodes(),
            threads.max(1)
        );
        Ok(graph)
    }
}

/// Total score of a graph under a score dictionary, over all ordered pairs.
#[must_use]
pub fn objective(scores: &RelationScores, doc: &Document, graph: &RelationGraph) -> f64 {
    let n = doc.len();
    let mut total = 0.0;
    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            if let Some(s) = scores.get(&doc.id, doc.mentions[i].key, doc.mentions[j].key) {
                total += s.get(graph.label(i, j));
            }
        }
    }
    total
}
