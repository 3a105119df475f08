//! Three-mention consistency rules.
//!
//! Every hard constraint on a relation graph mentions at most three mentions:
//!
//! - `Coref(x, y)` implies `label(x, z) == label(y, z)` for every third `z`
//!   (so coreference is transitive and chains agree on outside relations);
//! - `Subset(x, y)` and `Subset(y, z)` imply `Subset(x, z)`.
//!
//! Symmetry and antisymmetry are structural (a pair stores one label and its
//! mirror). A full assignment is therefore feasible exactly when every triple
//! passes [`triple_consistent`].

use crate::error::{Error, Result};
use capcoref_core::{RelationGraph, RelationLabel};

/// Orderings of a triple `(a, b, c)`.
const PERMUTATIONS: [[usize; 3]; 6] = [
    [0, 1, 2],
    [0, 2, 1],
    [1, 0, 2],
    [1, 2, 0],
    [2, 0, 1],
    [2, 1, 0],
];

/// Whether the labels among `a`, `b`, `c` satisfy every three-mention rule.
///
/// `rel(x, y)` must return the label of the ordered pair `(x, y)` and agree
/// with `rel(y, x).mirror()`.
pub fn triple_consistent(
    rel: impl Fn(usize, usize) -> RelationLabel,
    a: usize,
    b: usize,
    c: usize,
) -> bool {
    let t = [a, b, c];
    PERMUTATIONS.iter().all(|p| {
        let (x, y, z) = (t[p[0]], t[p[1]], t[p[2]]);
        let xy = rel(x, y);
        if xy == RelationLabel::Coref && rel(x, z) != rel(y, z) {
            return false;
        }
        !(xy == RelationLabel::Subset
            && rel(y, z) == RelationLabel::Subset
            && rel(x, z) != RelationLabel::Subset)
    })
}

/// Check every triple of a solved graph.
pub fn verify_graph(graph: &RelationGraph) -> Result<()> {
    let n = graph.len();
    let rel = |x: usize, y: usize| graph.label(x, y);
    for a in 0..n {
        for b in (a + 1)..n {
            for c in (b + 1)..n {
                if !triple_consistent(rel, a, b, c) {
                    let m = graph.mentions();
                    return Err(Error::invariant(format!(
                        "document '{}': inconsistent triple ({}, {}, {}): {} {} {}",
                        graph.doc_id(),
                        m[a],
                        m[b],
                        m[c],
                        graph.label(a, b),
                        graph.label(b, c),
                        graph.label(a, c),
                    )));
                }
            }
        }
    }
    Ok(())
}
