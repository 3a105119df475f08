//! Property and integration tests for the constraint solver.
//!
//! These tests verify that:
//! - Every solved graph is symmetric, transitive and entity-consistent
//! - The solve is optimal (checked against brute force on small documents)
//! - Fixed links are always honored
//! - Thread count never changes the result
//! - Larger documents with confident scores solve within the default budget

use capcoref::solver::{objective, verify_graph, ConstraintSolver, RelationSolver, SolverConfig};
use capcoref::{
    consolidate, Document, Error, FixedLinks, LabelScores, Mention, MentionKey, RelationGraph,
    RelationLabel, RelationScores,
};
use proptest::prelude::*;

fn doc(n: usize) -> Document {
    Document::with_mentions(
        "img",
        (0..n as u32)
            .map(|i| Mention::new(MentionKey::new(i, 0, 1), format!("m{}", i), "people"))
            .collect(),
    )
}

/// Scores on a 0.1 grid for every ordered pair.
fn arb_scores(n: usize) -> impl Strategy<Value = RelationScores> {
    prop::collection::vec([0u8..10, 0u8..10, 0u8..10, 0u8..10], n * n).prop_map(move |raw| {
        let d = doc(n);
        let mut scores = RelationScores::new();
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    let s = raw[i * n + j];
                    scores.insert_pair(
                        &d.id,
                        d.mentions[i].key,
                        d.mentions[j].key,
                        LabelScores::new(
                            s[0] as f64 / 10.0,
                            s[1] as f64 / 10.0,
                            s[2] as f64 / 10.0,
                            s[3] as f64 / 10.0,
                        ),
                    );
                }
            }
        }
        scores
    })
}

fn arb_case() -> impl Strategy<Value = (usize, RelationScores)> {
    (2usize..=5).prop_flat_map(|n| (Just(n), arb_scores(n)))
}

/// Best objective over every feasible labeling, by enumeration.
fn brute_force_best(scores: &RelationScores, d: &Document) -> f64 {
    let n = d.len();
    let pairs: Vec<(usize, usize)> = (0..n)
        .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
        .collect();
    let mut best = f64::NEG_INFINITY;
    for code in 0..4usize.pow(pairs.len() as u32) {
        let mut g = RelationGraph::new(d);
        let mut c = code;
        for &(i, j) in &pairs {
            g.set(i, j, RelationLabel::from_index(c % 4).unwrap()).unwrap();
            c /= 4;
        }
        if verify_graph(&g).is_ok() {
            best = best.max(objective(scores, d, &g));
        }
    }
    best
}

// =============================================================================
// Invariants
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn solved_graphs_satisfy_every_constraint((n, scores) in arb_case()) {
        let d = doc(n);
        let g = ConstraintSolver::new(&scores, SolverConfig::default()).solve(&d, 1).unwrap();
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    prop_assert_eq!(g.label(i, j), g.label(j, i).mirror());
                }
            }
        }
        prop_assert!(verify_graph(&g).is_ok());

        let result = consolidate(&d, &g, None).unwrap();
        prop_assert!(result.chains.verify_partition(&d).is_ok());
        // Coref exactly within chains.
        for i in 0..n {
            for j in (i + 1)..n {
                let same = result.chains.chain_of(d.mentions[i].key).map(|c| &c.id)
                    == result.chains.chain_of(d.mentions[j].key).map(|c| &c.id);
                prop_assert_eq!(same, g.label(i, j) == RelationLabel::Coref);
            }
        }
    }

    #[test]
    fn thread_count_does_not_change_the_graph((n, scores) in arb_case(), split in 0usize..4) {
        let d = doc(n);
        let solver = ConstraintSolver::new(&scores, SolverConfig::default().with_split_depth(split));
        let one = solver.solve(&d, 1).unwrap();
        let many = solver.solve(&d, 3).unwrap();
        prop_assert_eq!(one, many);
    }

    #[test]
    fn fixed_links_are_honored(
        (n, scores) in arb_case(),
        groups in prop::collection::vec(0usize..3, 5),
        mask in prop::collection::vec(prop::bool::ANY, 10),
    ) {
        // Fix a random subset of a feasible labeling: Coref within groups, Null across.
        let d = doc(n);
        let mut fixed = FixedLinks::new();
        let mut expected = Vec::new();
        let mut k = 0;
        for i in 0..n {
            for j in (i + 1)..n {
                if mask[k] {
                    let label = if groups[i] == groups[j] {
                        RelationLabel::Coref
                    } else {
                        RelationLabel::Null
                    };
                    fixed.insert_pair(&d.id, d.mentions[i].key, d.mentions[j].key, label);
                    expected.push((i, j, label));
                }
                k += 1;
            }
        }
        let g = ConstraintSolver::new(&scores, SolverConfig::default())
            .with_fixed_links(&fixed)
            .solve(&d, 2)
            .unwrap();
        for (i, j, label) in expected {
            prop_assert_eq!(g.label(i, j), label);
        }
        prop_assert!(verify_graph(&g).is_ok());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn solve_matches_brute_force(scores in arb_scores(4)) {
        let d = doc(4);
        let g = ConstraintSolver::new(&scores, SolverConfig::default()).solve(&d, 1).unwrap();
        let best = brute_force_best(&scores, &d);
        prop_assert!((objective(&scores, &d, &g) - best).abs() < 1e-6);
    }
}

// =============================================================================
// Edge Cases
// =============================================================================

#[test]
fn single_mention_document_has_no_pairs() {
    let d = doc(1);
    let g = ConstraintSolver::new(&RelationScores::new(), SolverConfig::default())
        .solve(&d, 4)
        .unwrap();
    assert_eq!(g.len(), 1);
    assert_eq!(g.edges().count(), 0);
}

#[test]
fn subset_chain_closes_transitively() {
    // 0 ⊂ 1 and 1 ⊂ 2 are strong; 0-2 mildly prefers Null.
    let d = doc(3);
    let mut scores = RelationScores::new();
    let k = |i: usize| d.mentions[i].key;
    scores.insert_pair("img", k(0), k(1), LabelScores::new(0.0, 0.0, 2.0, 0.0));
    scores.insert_pair("img", k(1), k(2), LabelScores::new(0.0, 0.0, 2.0, 0.0));
    scores.insert_pair("img", k(0), k(2), LabelScores::new(0.5, 0.0, 0.0, 0.0));
    let g = ConstraintSolver::new(&scores, SolverConfig::default())
        .solve(&d, 1)
        .unwrap();
    assert_eq!(g.label(0, 1), RelationLabel::Subset);
    assert_eq!(g.label(1, 2), RelationLabel::Subset);
    assert_eq!(g.label(0, 2), RelationLabel::Subset);
    assert_eq!(g.label(2, 0), RelationLabel::Superset);
}

#[test]
fn duplicate_mentions_are_rejected() {
    let mut d = doc(2);
    d.mentions[1].key = d.mentions[0].key;
    let err = ConstraintSolver::new(&RelationScores::new(), SolverConfig::default())
        .solve(&d, 1)
        .unwrap_err();
    assert!(matches!(err, Error::Core(_)));
}

#[test]
fn tiny_budget_reports_search_limit() {
    let d = doc(5);
    let scores = RelationScores::new();
    let solver = ConstraintSolver::new(
        &scores,
        SolverConfig::default().with_max_nodes(Some(3)),
    );
    let err = solver.solve(&d, 1).unwrap_err();
    assert!(matches!(err, Error::SearchLimit { .. }));
    assert!(err.is_transient());
}

// =============================================================================
// Larger Documents
// =============================================================================

/// Five captions, each naming a man, a dog and a group of people.
fn scene() -> Document {
    let names = [("a man", "people"), ("a dog", "animals"), ("a crowd", "people")];
    Document::with_mentions(
        "scene",
        (0..15u32)
            .map(|i| {
                let (caption, role) = (i / 3, i % 3);
                let (text, ty) = names[role as usize];
                Mention::new(MentionKey::new(caption, role * 3, role * 3 + 2), text, ty)
            })
            .collect(),
    )
}

/// Men and crowds corefer within their role, every man is part of every crowd.
fn scene_truth(i: usize, j: usize) -> RelationLabel {
    match (i % 3, j % 3) {
        (a, b) if a == b => RelationLabel::Coref,
        (0, 2) => RelationLabel::Subset,
        (2, 0) => RelationLabel::Superset,
        _ => RelationLabel::Null,
    }
}

fn confident(label: RelationLabel) -> LabelScores {
    let mut raw = [0.03; 4];
    raw[label.index()] = 0.91;
    LabelScores::new(raw[0], raw[1], raw[2], raw[3])
}

fn scene_scores(d: &Document) -> RelationScores {
    let mut scores = RelationScores::new();
    for i in 0..d.len() {
        for j in 0..d.len() {
            if i != j {
                let label = scene_truth(i, j);
                scores.insert_pair(&d.id, d.mentions[i].key, d.mentions[j].key, confident(label));
            }
        }
    }
    scores
}

#[test]
fn confident_scene_solves_under_the_default_budget() {
    let d = scene();
    let scores = scene_scores(&d);
    let solver = ConstraintSolver::new(&scores, SolverConfig::default());
    let one = solver.solve(&d, 1).unwrap();
    let many = solver.solve(&d, 4).unwrap();
    assert_eq!(one, many);
    for i in 0..d.len() {
        for j in 0..d.len() {
            if i != j {
                assert_eq!(one.label(i, j), scene_truth(i, j), "pair ({}, {})", i, j);
            }
        }
    }
    let chains = consolidate(&d, &one, None).unwrap();
    assert_eq!(chains.chains.len(), 3);
}

#[test]
fn single_noisy_pair_is_overruled() {
    // The first man and the second dog look coreferent in both directions.
    let d = scene();
    let mut scores = scene_scores(&d);
    let (a, b) = (d.mentions[0].key, d.mentions[4].key);
    scores.insert_pair(&d.id, a, b, confident(RelationLabel::Coref));
    scores.insert_pair(&d.id, b, a, confident(RelationLabel::Coref));

    let g = ConstraintSolver::new(&scores, SolverConfig::default())
        .solve(&d, 1)
        .unwrap();
    assert_eq!(g.label(0, 4), RelationLabel::Null);
    assert_eq!(g.label(0, 3), RelationLabel::Coref);
    assert_eq!(g.label(0, 2), RelationLabel::Subset);
    assert!(verify_graph(&g).is_ok());
}
