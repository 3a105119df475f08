//! Configured end-to-end inference: score dictionary in, chains out.

use crate::checkpoint::CheckpointStore;
use crate::config::{InferenceConfig, InferenceMode};
use crate::consolidate::{Consolidation, VisualPredictions};
use crate::error::Result;
use crate::greedy::{CorefScorer, GreedyRelationSolver};
use crate::scheduler::{FallbackPolicy, Scheduler, SchedulerReport, ThreadBudget};
use crate::solver::{ConstraintSolver, RelationSolver};
use capcoref_core::{CorefScores, Document, FixedLinks, RelationScores};
use std::collections::{BTreeMap, HashMap};

/// Builds solvers and a fallback policy from an [`InferenceConfig`] and runs
/// the scheduler over a document set.
#[derive(Debug, Clone)]
pub struct Pipeline<'a> {
    config: &'a InferenceConfig,
    scores: &'a RelationScores,
    coref: Option<&'a CorefScores>,
    fixed: Option<&'a FixedLinks>,
}

impl<'a> Pipeline<'a> {
    /// Create a pipeline over a four-label score dictionary.
    #[must_use]
    pub fn new(config: &'a InferenceConfig, scores: &'a RelationScores) -> Self {
        Self {
            config,
            scores,
            coref: None,
            fixed: None,
        }
    }

    /// Enforce fixed links in every solver the policy runs, greedy included.
    #[must_use]
    pub fn with_fixed_links(mut self, fixed: &'a FixedLinks) -> Self {
        self.fixed = Some(fixed);
        self
    }

    /// Build greedy chains from a dedicated coreference dictionary instead of
    /// the Coref column of the relation scores. Forced links in it are
    /// honored by the greedy solver only.
    #[must_use]
    pub fn with_coref_scores(mut self, coref: &'a CorefScores) -> Self {
        self.coref = Some(coref);
        self
    }

    /// Open the configured checkpoint store.
    pub fn open_store(&self) -> Result<CheckpointStore> {
        CheckpointStore::open(self.config.checkpoint.clone())
    }

    /// Solve every document not yet in `store`.
    pub fn run(&self, docs: &[Document], store: &mut CheckpointStore) -> Result<SchedulerReport> {
        let scheduler = Scheduler::new(self.config.scheduler.clone())?;

        let mut exact = ConstraintSolver::new(self.scores, self.config.solver.clone());
        if let Some(fixed) = self.fixed {
            exact = exact.with_fixed_links(fixed);
        }
        let scorer: &dyn CorefScorer = match self.coref {
            Some(coref) => coref,
            None => self.scores,
        };
        let mut greedy = GreedyRelationSolver::new(scorer, self.config.greedy.clone());
        if let Some(fixed) = self.fixed {
            greedy = greedy.with_fixed_links(fixed);
        }
        let policy = self.policy(&exact, &greedy);
        log::debug!("[Pipeline] Policy: {:?}", policy.strategies());

        scheduler.run(docs, &policy, store)
    }

    /// Solve and consolidate in one go.
    pub fn run_and_consolidate(
        &self,
        docs: &[Document],
        store: &mut CheckpointStore,
        visual: Option<&HashMap<String, VisualPredictions>>,
    ) -> Result<(SchedulerReport, BTreeMap<String, Consolidation>)> {
        let report = self.run(docs, store)?;
        let chains = report.consolidate_all(docs, visual)?;
        Ok((report, chains))
    }

    fn policy<'s>(
        &self,
        exact: &'s dyn RelationSolver,
        greedy: &'s dyn RelationSolver,
    ) -> FallbackPolicy<'s> {
        let fallback = self.config.fallback;
        match self.config.mode {
            InferenceMode::Greedy => FallbackPolicy::new(greedy),
            InferenceMode::Exact => {
                let mut policy = FallbackPolicy::new(exact);
                if fallback.single_threaded_retry {
                    policy = policy.then(exact, ThreadBudget::Fixed(1));
                }
                if fallback.greedy {
                    policy = policy.then(greedy, ThreadBudget::Fixed(1));
                }
                policy
            }
        }
    }
}
