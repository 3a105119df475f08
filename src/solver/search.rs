//! Branch-and-bound over unordered mention pairs with triple propagation.
//!
//! Variables are the pairs `(i, j)` with `i < j`, visited column by column
//! (`j` ascending, then `i` ascending). Every pair keeps a domain: the labels,
//! seen from `i`, still allowed. Assigning a pair shrinks its domain to one
//! label and propagates the three-mention rules to a fixed point: a label of
//! an open pair is dropped once no allowed labeling of some triple containing
//! it is consistent. A wiped-out domain closes the branch, and a branch whose
//! domains are all single labels is a consistent graph.
//!
//! The bound splits each pair's score evenly over the `n - 2` triples that
//! contain it and sums, per triple, the best consistent labeling its domains
//! still allow. It is never above the per-pair bound and equals the graph's
//! value at a leaf. Bounds are kept multiplied by `n - 2` so they stay
//! integral; scores are fixed-point integers (see [`to_fixed`]).
//!
//! At each node the open labels are tried in order of the bound they leave
//! after propagation, then by score, then by label index.
//!
//! The frontier is cut at a shallow prefix depth. Subtrees below each prefix
//! are searched independently (optionally in parallel) with a shared incumbent
//! value used only for pruning. Each subtree keeps the first leaf, in DFS
//! order, that reaches its best value; results are combined in prefix order
//! with ties going to the earlier prefix. The winner is therefore the first
//! optimal leaf of a plain sequential DFS, whatever the thread count.

use super::consistency::triple_consistent;
use crate::error::{Error, Result};
use capcoref_core::RelationLabel;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Fixed-point units per score unit.
pub(crate) const SCALE: f64 = 1e6;

/// Scores are clamped to this magnitude before scaling.
const MAX_SCORE: f64 = 1e6;

/// Convert a score to fixed point. NaN counts as zero.
pub(crate) fn to_fixed(score: f64) -> i64 {
    if score.is_nan() {
        return 0;
    }
    (score.clamp(-MAX_SCORE, MAX_SCORE) * SCALE).round() as i64
}

/// Set of labels, one bit per label index.
pub(crate) type Mask = u8;

/// Every label allowed.
pub(crate) const FULL: Mask = 0b1111;

/// The mask holding only `label`.
pub(crate) const fn bit(label: RelationLabel) -> Mask {
    1 << label.index()
}

/// Consistency of a triple `a < b < c` by the labels of `(a, b)`, `(b, c)`
/// and `(a, c)`, at `16 * ab + 4 * bc + ac`.
fn triple_table() -> [bool; 64] {
    let mut table = [false; 64];
    for ab in RelationLabel::ALL {
        for bc in RelationLabel::ALL {
            for ac in RelationLabel::ALL {
                let rel = |x: usize, y: usize| match (x, y) {
                    (0, 1) => ab,
                    (1, 0) => ab.mirror(),
                    (1, 2) => bc,
                    (2, 1) => bc.mirror(),
                    (0, 2) => ac,
                    (2, 0) => ac.mirror(),
                    _ => RelationLabel::Null,
                };
                table[ab.index() * 16 + bc.index() * 4 + ac.index()] =
                    triple_consistent(rel, 0, 1, 2);
            }
        }
    }
    table
}

/// Index of the triple `a < b < c` among all triples of a document.
fn triple_index(a: usize, b: usize, c: usize) -> usize {
    c * (c - 1) * (c - 2) / 6 + b * (b - 1) / 2 + a
}

/// Pair-level search problem for one document.
#[derive(Debug, Clone)]
pub(crate) struct Problem {
    n: usize,
    /// Pairs in visiting order; a pair's position is its id.
    pairs: Vec<(usize, usize)>,
    /// Pair id of `(i, j)`, `i < j`, at `i * n + j`.
    ids: Vec<usize>,
    /// Combined score of each label for both directions, by label index.
    scores: Vec<[i64; 4]>,
    /// Labels of each pair by descending score; equal scores keep index order.
    order: Vec<[RelationLabel; 4]>,
    table: [bool; 64],
    /// Propagated state before any branching; `None` when infeasible.
    root: Option<State>,
}

impl Problem {
    /// Build a problem from per-pair scores and allowed labels.
    ///
    /// `pair(i, j)` returns the combined score of each label of `(i, j)` (by
    /// label index) and the mask of labels it may take. An empty mask, or
    /// masks no consistent graph fits, make the problem infeasible.
    pub(crate) fn new(n: usize, mut pair: impl FnMut(usize, usize) -> ([i64; 4], Mask)) -> Self {
        let pairs: Vec<(usize, usize)> = (1..n).flat_map(|j| (0..j).map(move |i| (i, j))).collect();
        let mut ids = vec![usize::MAX; n * n];
        let mut scores = Vec::with_capacity(pairs.len());
        let mut masks = Vec::with_capacity(pairs.len());
        let mut order = Vec::with_capacity(pairs.len());
        for (id, &(i, j)) in pairs.iter().enumerate() {
            ids[i * n + j] = id;
            let (s, mask) = pair(i, j);
            let mut labels = RelationLabel::ALL;
            labels.sort_by(|a, b| s[b.index()].cmp(&s[a.index()]));
            scores.push(s);
            masks.push(mask & FULL);
            order.push(labels);
        }
        let mut problem = Self {
            n,
            pairs,
            ids,
            scores,
            order,
            table: triple_table(),
            root: None,
        };
        problem.root = State::root(&problem, masks);
        problem
    }

    /// Number of pair variables.
    pub(crate) fn depth(&self) -> usize {
        self.pairs.len()
    }

    /// Pairs in visiting order.
    pub(crate) fn pairs(&self) -> &[(usize, usize)] {
        &self.pairs
    }

    fn id(&self, i: usize, j: usize) -> usize {
        self.ids[i * self.n + j]
    }

    /// Factor between scaled bounds and values.
    fn weight(&self) -> i128 {
        if self.n >= 3 {
            (self.n - 2) as i128
        } else {
            1
        }
    }

    /// Best score among the labels of `mask`.
    fn best_of(&self, pair: usize, mask: Mask) -> i64 {
        self.order[pair]
            .iter()
            .find(|&&l| mask & bit(l) != 0)
            .map_or(0, |&l| self.scores[pair][l.index()])
    }
}

#[derive(Debug, Clone, Copy)]
enum Undo {
    Domain(usize, Mask),
    Triple(usize, i64),
}

/// Domains and bounds of one search node, with a trail to backtrack.
#[derive(Debug, Clone)]
struct State {
    domains: Vec<Mask>,
    /// Best consistent score each triple still allows.
    triple_best: Vec<i64>,
    /// Sum over pairs of the best score each still allows.
    pair_sum: i64,
    /// Sum of `triple_best`.
    triple_sum: i128,
    trail: Vec<Undo>,
    queue: Vec<usize>,
    queued: Vec<bool>,
}

impl State {
    fn root(problem: &Problem, domains: Vec<Mask>) -> Option<Self> {
        if domains.iter().any(|&m| m == 0) {
            return None;
        }
        let n = problem.n;
        let pair_sum: i64 = domains
            .iter()
            .enumerate()
            .map(|(p, &m)| problem.best_of(p, m))
            .sum();
        let triples = if n >= 3 { n * (n - 1) * (n - 2) / 6 } else { 0 };
        let mut state = Self {
            queued: vec![false; domains.len()],
            domains,
            triple_best: vec![0; triples],
            pair_sum,
            triple_sum: 0,
            trail: Vec::new(),
            queue: Vec::new(),
        };
        for c in 2..n {
            for b in 1..c {
                for a in 0..b {
                    if !state.revise(problem, a, b, c) {
                        return None;
                    }
                }
            }
        }
        if !state.propagate(problem) {
            return None;
        }
        state.trail.clear();
        Some(state)
    }

    /// Upper bound on the value of any completion, times the problem weight.
    fn bound(&self, problem: &Problem) -> i128 {
        if problem.n >= 3 {
            self.triple_sum
        } else {
            i128::from(self.pair_sum)
        }
    }

    fn set_domain(&mut self, problem: &Problem, pair: usize, mask: Mask) {
        let old = self.domains[pair];
        if old == mask {
            return;
        }
        self.trail.push(Undo::Domain(pair, old));
        self.pair_sum += problem.best_of(pair, mask) - problem.best_of(pair, old);
        self.domains[pair] = mask;
        if !self.queued[pair] {
            self.queued[pair] = true;
            self.queue.push(pair);
        }
    }

    fn set_triple(&mut self, triple: usize, best: i64) {
        let old = self.triple_best[triple];
        if old == best {
            return;
        }
        self.trail.push(Undo::Triple(triple, old));
        self.triple_sum += i128::from(best - old);
        self.triple_best[triple] = best;
    }

    /// Drop the labels of `a < b < c` that fit no consistent labeling of the
    /// triple; false when none fits.
    fn revise(&mut self, problem: &Problem, a: usize, b: usize, c: usize) -> bool {
        let ids = [problem.id(a, b), problem.id(b, c), problem.id(a, c)];
        let masks = ids.map(|p| self.domains[p]);
        let mut support: [Mask; 3] = [0; 3];
        let mut best: Option<i64> = None;
        for x in 0..4 {
            if masks[0] & (1 << x) == 0 {
                continue;
            }
            for y in 0..4 {
                if masks[1] & (1 << y) == 0 {
                    continue;
                }
                for z in 0..4 {
                    if masks[2] & (1 << z) == 0 || !problem.table[x * 16 + y * 4 + z] {
                        continue;
                    }
                    support[0] |= 1 << x;
                    support[1] |= 1 << y;
                    support[2] |= 1 << z;
                    let value = problem.scores[ids[0]][x]
                        + problem.scores[ids[1]][y]
                        + problem.scores[ids[2]][z];
                    best = Some(best.map_or(value, |b| b.max(value)));
                }
            }
        }
        let Some(best) = best else {
            return false;
        };
        self.set_triple(triple_index(a, b, c), best);
        for (&pair, &mask) in ids.iter().zip(&support) {
            self.set_domain(problem, pair, mask);
        }
        true
    }

    /// Revise the triples of every queued pair until nothing changes.
    fn propagate(&mut self, problem: &Problem) -> bool {
        while let Some(pair) = self.queue.pop() {
            self.queued[pair] = false;
            let (i, j) = problem.pairs[pair];
            for k in 0..problem.n {
                let consistent = match k {
                    k if k == i || k == j => true,
                    k if k < i => self.revise(problem, k, i, j),
                    k if k < j => self.revise(problem, i, k, j),
                    k => self.revise(problem, i, j, k),
                };
                if !consistent {
                    for p in self.queue.drain(..) {
                        self.queued[p] = false;
                    }
                    return false;
                }
            }
        }
        true
    }

    /// Fix `pair` to `label` and propagate; false on a wipe-out.
    fn assign(&mut self, problem: &Problem, pair: usize, label: RelationLabel) -> bool {
        if self.domains[pair] & bit(label) == 0 {
            return false;
        }
        self.set_domain(problem, pair, bit(label));
        self.propagate(problem)
    }

    fn mark(&self) -> usize {
        self.trail.len()
    }

    fn undo(&mut self, problem: &Problem, mark: usize) {
        while self.trail.len() > mark {
            let Some(entry) = self.trail.pop() else {
                break;
            };
            match entry {
                Undo::Domain(pair, old) => {
                    let current = self.domains[pair];
                    self.pair_sum += problem.best_of(pair, old) - problem.best_of(pair, current);
                    self.domains[pair] = old;
                }
                Undo::Triple(triple, old) => {
                    self.triple_sum += i128::from(old - self.triple_best[triple]);
                    self.triple_best[triple] = old;
                }
            }
        }
    }

    /// Allowed labels of `pair` with the bound each leaves, best first.
    fn branches(&mut self, problem: &Problem, pair: usize) -> Vec<(i128, RelationLabel)> {
        let mut out = Vec::with_capacity(4);
        for &label in &problem.order[pair] {
            if self.domains[pair] & bit(label) == 0 {
                continue;
            }
            let mark = self.mark();
            if self.assign(problem, pair, label) {
                out.push((self.bound(problem), label));
            }
            self.undo(problem, mark);
        }
        // Stable: equal bounds keep score order.
        out.sort_by(|a, b| b.0.cmp(&a.0));
        out
    }
}

/// Labels of the first pairs, fixing the root of one subtree.
#[derive(Debug, Clone)]
pub(crate) struct Prefix {
    labels: Vec<RelationLabel>,
}

/// State shared by all subtree searches of one solve.
pub(crate) struct Shared {
    incumbent: AtomicI64,
    nodes: AtomicU64,
    max_nodes: Option<u64>,
    exhausted: AtomicBool,
}

impl Shared {
    pub(crate) fn new(max_nodes: Option<u64>) -> Self {
        Self {
            incumbent: AtomicI64::new(i64::MIN),
            nodes: AtomicU64::new(0),
            max_nodes,
            exhausted: AtomicBool::new(false),
        }
    }

    pub(crate) fn nodes(&self) -> u64 {
        self.nodes.load(Ordering::Relaxed)
    }

    fn incumbent(&self) -> i64 {
        self.incumbent.load(Ordering::Relaxed)
    }

    fn offer(&self, value: i64) {
        self.incumbent.fetch_max(value, Ordering::Relaxed);
    }

    /// Count a node; false once the budget is spent.
    fn tick(&self) -> bool {
        if self.exhausted.load(Ordering::Relaxed) {
            return false;
        }
        let seen = self.nodes.fetch_add(1, Ordering::Relaxed) + 1;
        match self.max_nodes {
            Some(max) if seen > max => {
                self.exhausted.store(true, Ordering::Relaxed);
                false
            }
            _ => true,
        }
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Relaxed)
    }
}

/// Best leaf of one subtree: its value and the label of every pair.
pub(crate) type Leaf = (i64, Vec<RelationLabel>);

/// Enumerate feasible prefixes of depth `depth` in DFS order.
pub(crate) fn prefixes(problem: &Problem, depth: usize) -> Vec<Prefix> {
    fn walk(
        problem: &Problem,
        state: &mut State,
        labels: &mut Vec<RelationLabel>,
        depth: usize,
        out: &mut Vec<Prefix>,
    ) {
        let pair = labels.len();
        if pair == depth {
            out.push(Prefix {
                labels: labels.clone(),
            });
            return;
        }
        for (_, label) in state.branches(problem, pair) {
            let mark = state.mark();
            if state.assign(problem, pair, label) {
                labels.push(label);
                walk(problem, state, labels, depth, out);
                labels.pop();
            }
            state.undo(problem, mark);
        }
    }

    let Some(root) = &problem.root else {
        return Vec::new();
    };
    let depth = depth.min(problem.depth());
    let mut out = Vec::new();
    walk(problem, &mut root.clone(), &mut Vec::new(), depth, &mut out);
    out
}

/// Search the subtree below `prefix`, returning its first best leaf.
pub(crate) fn search_subtree(problem: &Problem, prefix: &Prefix, shared: &Shared) -> Option<Leaf> {
    let mut state = problem.root.clone()?;
    for (pair, &label) in prefix.labels.iter().enumerate() {
        if !state.assign(problem, pair, label) {
            return None;
        }
    }
    let mut subtree = Subtree {
        problem,
        shared,
        state,
        labels: prefix.labels.clone(),
        best: None,
    };
    subtree.dfs();
    subtree.best
}

struct Subtree<'p> {
    problem: &'p Problem,
    shared: &'p Shared,
    state: State,
    labels: Vec<RelationLabel>,
    best: Option<Leaf>,
}

impl Subtree<'_> {
    fn dfs(&mut self) {
        if !self.shared.tick() {
            return;
        }
        let problem = self.problem;
        let pair = self.labels.len();
        if pair == problem.depth() {
            let value = self.state.pair_sum;
            if self.best.as_ref().map_or(true, |(v, _)| value > *v) {
                self.best = Some((value, self.labels.clone()));
                self.shared.offer(value);
            }
            return;
        }
        if !self.promising(self.state.bound(problem)) {
            return;
        }

        for (bound, label) in self.state.branches(problem, pair) {
            if !self.promising(bound) {
                continue;
            }
            let mark = self.state.mark();
            if self.state.assign(problem, pair, label) {
                self.labels.push(label);
                self.dfs();
                self.labels.pop();
            }
            self.state.undo(problem, mark);
            if self.shared.is_exhausted() {
                return;
            }
        }
    }

    /// Whether a node with this bound can beat the local best and reach the
    /// shared incumbent. A node that can only tie the local best cannot
    /// replace it; one below the incumbent cannot win the combine.
    fn promising(&self, bound: i128) -> bool {
        let weight = self.problem.weight();
        let beats_local = self
            .best
            .as_ref()
            .map_or(true, |(v, _)| bound > i128::from(*v) * weight);
        beats_local && bound >= i128::from(self.shared.incumbent()) * weight
    }
}

/// Pick the best leaf across subtrees; ties go to the earliest subtree.
pub(crate) fn combine(results: impl IntoIterator<Item = Option<Leaf>>) -> Option<Leaf> {
    let mut best: Option<Leaf> = None;
    for leaf in results.into_iter().flatten() {
        if best.as_ref().map_or(true, |(v, _)| leaf.0 > *v) {
            best = Some(leaf);
        }
    }
    best
}

/// Turn the outcome of a full search into a result.
pub(crate) fn finish(best: Option<Leaf>, shared: &Shared) -> Result<Leaf> {
    if shared.is_exhausted() {
        return Err(Error::SearchLimit {
            nodes: shared.nodes(),
        });
    }
    best.ok_or_else(|| Error::infeasible("no assignment satisfies the constraints"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use RelationLabel::*;

    /// Every label allowed, scored by a fixed table.
    fn open_problem(n: usize, score: impl Fn(usize, usize, RelationLabel) -> f64) -> Problem {
        Problem::new(n, |i, j| {
            let mut s = [0; 4];
            for l in RelationLabel::ALL {
                s[l.index()] = to_fixed(score(i, j, l));
            }
            (s, FULL)
        })
    }

    fn solve(problem: &Problem, split: usize) -> Leaf {
        let shared = Shared::new(None);
        let best = combine(
            prefixes(problem, split)
                .iter()
                .map(|p| search_subtree(problem, p, &shared)),
        );
        finish(best, &shared).unwrap()
    }

    fn root(problem: &Problem) -> State {
        problem.root.clone().unwrap()
    }

    #[test]
    fn pairs_are_visited_column_by_column() {
        let p = open_problem(4, |_, _, _| 0.0);
        assert_eq!(p.pairs(), &[(0, 1), (0, 2), (1, 2), (0, 3), (1, 3), (2, 3)]);
    }

    #[test]
    fn triple_indices_are_dense() {
        let mut seen = Vec::new();
        for c in 2..6 {
            for b in 1..c {
                for a in 0..b {
                    seen.push(triple_index(a, b, c));
                }
            }
        }
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn single_pair_takes_its_best_label() {
        let p = open_problem(2, |_, _, l| if l == Subset { 1.0 } else { 0.0 });
        let (value, labels) = solve(&p, 0);
        assert_eq!(labels, vec![Subset]);
        assert_eq!(value, to_fixed(1.0));
    }

    #[test]
    fn transitivity_beats_greedy_pair_choices() {
        // (0,1) and (1,2) want Coref, (0,2) mildly wants Null.
        let p = open_problem(3, |i, j, l| match ((i, j), l) {
            ((0, 1), Coref) | ((1, 2), Coref) => 2.0,
            ((0, 2), Null) => 0.5,
            _ => 0.0,
        });
        let (value, labels) = solve(&p, 1);
        assert_eq!(labels, vec![Coref, Coref, Coref]);
        assert_eq!(value, to_fixed(4.0));
    }

    #[test]
    fn triple_bound_is_tighter_than_pair_bound() {
        let p = open_problem(3, |i, j, l| match ((i, j), l) {
            ((0, 1), Coref) | ((1, 2), Coref) => 2.0,
            ((0, 2), Null) => 0.5,
            _ => 0.0,
        });
        let state = root(&p);
        assert_eq!(state.pair_sum, to_fixed(4.5));
        assert_eq!(state.bound(&p), i128::from(to_fixed(4.0)));
    }

    #[test]
    fn coref_propagates_relations_to_third_mentions() {
        let p = open_problem(3, |_, _, _| 0.0);
        let mut state = root(&p);
        // Pair ids: 0 = (0,1), 1 = (0,2), 2 = (1,2).
        assert!(state.assign(&p, 0, Coref));
        assert!(state.assign(&p, 1, Subset));
        assert_eq!(state.domains[2], bit(Subset));
    }

    #[test]
    fn subset_chains_propagate_transitively() {
        let p = open_problem(3, |_, _, _| 0.0);
        let mut state = root(&p);
        assert!(state.assign(&p, 0, Subset));
        assert!(state.assign(&p, 2, Subset));
        assert_eq!(state.domains[1], bit(Subset));
    }

    #[test]
    fn undo_restores_domains_and_bounds() {
        let p = open_problem(4, |i, j, l| ((i * 5 + j * 3 + l.index()) % 4) as f64);
        let mut state = root(&p);
        let (domains, pair_sum, bound) = (state.domains.clone(), state.pair_sum, state.bound(&p));
        let mark = state.mark();
        assert!(state.assign(&p, 0, Coref));
        assert!(state.assign(&p, 3, Coref));
        state.undo(&p, mark);
        assert_eq!(state.domains, domains);
        assert_eq!(state.pair_sum, pair_sum);
        assert_eq!(state.bound(&p), bound);
    }

    #[test]
    fn wiped_out_domains_reject_the_assignment() {
        let p = Problem::new(3, |i, j| {
            let mask = if (i, j) == (1, 2) { bit(Null) } else { FULL };
            ([0; 4], mask)
        });
        let mut state = root(&p);
        assert!(state.assign(&p, 0, Coref));
        // (0,2) must now equal (1,2), which can only be Null.
        assert_eq!(state.domains[1], bit(Null));
        assert!(!state.assign(&p, 1, Coref));
    }

    #[test]
    fn split_depth_does_not_change_the_result() {
        let p = open_problem(5, |i, j, l| ((i * 7 + j * 3 + l.index() * 5) % 11) as f64 / 10.0);
        let reference = solve(&p, 0);
        for split in 1..5 {
            assert_eq!(solve(&p, split).1, reference.1, "split depth {}", split);
        }
    }

    #[test]
    fn empty_domain_is_infeasible() {
        let p = Problem::new(3, |i, j| {
            let mask = if (i, j) == (1, 2) { 0 } else { bit(Null) };
            ([0; 4], mask)
        });
        let shared = Shared::new(None);
        let best = combine(prefixes(&p, 1).iter().map(|pre| search_subtree(&p, pre, &shared)));
        assert!(matches!(finish(best, &shared), Err(Error::Infeasible(_))));
    }

    #[test]
    fn contradictory_masks_are_infeasible_at_the_root() {
        // 0 ~ 1 and 1 ~ 2 but 0, 2 unrelated.
        let p = Problem::new(3, |i, j| {
            let mask = if (i, j) == (0, 2) { bit(Null) } else { bit(Coref) };
            ([0; 4], mask)
        });
        assert!(p.root.is_none());
        assert!(prefixes(&p, 2).is_empty());
    }

    #[test]
    fn ties_are_pruned_after_the_first_leaf() {
        let p = open_problem(8, |_, _, _| 0.0);
        let shared = Shared::new(Some(1_000));
        let best = combine(prefixes(&p, 0).iter().map(|pre| search_subtree(&p, pre, &shared)));
        let (value, labels) = finish(best, &shared).unwrap();
        assert_eq!(value, 0);
        assert!(labels.iter().all(|&l| l == Null));
    }

    #[test]
    fn fixed_point_conversion() {
        assert_eq!(to_fixed(0.5), 500_000);
        assert_eq!(to_fixed(f64::NAN), 0);
        assert_eq!(to_fixed(f64::INFINITY), to_fixed(MAX_SCORE));
    }

    #[test]
    fn node_budget_is_enforced() {
        let p = open_problem(6, |i, j, l| ((i + j + l.index()) % 3) as f64);
        let shared = Shared::new(Some(10));
        let best = combine(prefixes(&p, 0).iter().map(|pre| search_subtree(&p, pre, &shared)));
        assert!(matches!(finish(best, &shared), Err(Error::SearchLimit { .. })));
    }
}
