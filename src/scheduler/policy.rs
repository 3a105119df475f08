//! Ordered solver strategies tried per document.

use crate::error::{Error, Result};
use crate::solver::RelationSolver;
use capcoref_core::{Document, RelationGraph};
use std::fmt;

/// How many internal threads a strategy may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadBudget {
    /// Whatever the document's bucket grants a worker.
    Bucket,
    /// A fixed count, regardless of bucket.
    Fixed(usize),
}

impl ThreadBudget {
    /// Threads to use given the bucket's per-worker grant.
    #[must_use]
    pub fn resolve(self, bucket_threads: usize) -> usize {
        match self {
            ThreadBudget::Bucket => bucket_threads.max(1),
            ThreadBudget::Fixed(n) => n.max(1),
        }
    }
}

/// One step of a fallback policy.
#[derive(Clone, Copy)]
pub struct Strategy<'a> {
    /// Solver to run.
    pub solver: &'a dyn RelationSolver,
    /// Thread budget for this step.
    pub threads: ThreadBudget,
}

impl fmt::Debug for Strategy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategy")
            .field("solver", &self.solver.name())
            .field("threads", &self.threads)
            .finish()
    }
}

/// A failed attempt of one strategy.
#[derive(Debug)]
pub struct AttemptFailure {
    /// Solver name.
    pub strategy: String,
    /// What went wrong.
    pub error: Error,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.error)
    }
}

/// The graph produced by the first strategy that succeeded.
#[derive(Debug)]
pub struct Resolution {
    /// The solved graph.
    pub graph: RelationGraph,
    /// Index of the succeeding strategy (0 is the primary).
    pub step: usize,
    /// Name of the succeeding solver.
    pub strategy: String,
    /// Failures of the strategies tried before it.
    pub failures: Vec<AttemptFailure>,
}

/// Ordered list of strategies; the first is the primary.
#[derive(Debug, Clone)]
pub struct FallbackPolicy<'a> {
    strategies: Vec<Strategy<'a>>,
}

impl<'a> FallbackPolicy<'a> {
    /// Policy with a single primary strategy using the bucket's threads.
    #[must_use]
    pub fn new(primary: &'a dyn RelationSolver) -> Self {
        Self {
            strategies: vec![Strategy {
                solver: primary,
                threads: ThreadBudget::Bucket,
            }],
        }
    }

    /// Append a fallback step.
    #[must_use]
    pub fn then(mut self, solver: &'a dyn RelationSolver, threads: ThreadBudget) -> Self {
        self.strategies.push(Strategy { solver, threads });
        self
    }

    /// Exact with the bucket's threads, exact single-threaded, then `cheap`.
    #[must_use]
    pub fn standard(exact: &'a dyn RelationSolver, cheap: &'a dyn RelationSolver) -> Self {
        Self::new(exact)
            .then(exact, ThreadBudget::Fixed(1))
            .then(cheap, ThreadBudget::Fixed(1))
    }

    /// The strategies in order.
    #[must_use]
    pub fn strategies(&self) -> &[Strategy<'a>] {
        &self.strategies
    }

    /// Try each strategy in order until one yields a graph.
    ///
    /// A strategy fails when it returns an error or when its graph does not
    /// cover exactly the document's mentions. Only transient failures (node
    /// budget, solver runtime) move on to the next strategy; any other failure
    /// (an infeasible document, a bad graph) ends the document.
    pub fn resolve(
        &self,
        doc: &Document,
        bucket_threads: usize,
    ) -> std::result::Result<Resolution, Vec<AttemptFailure>> {
        let mut failures = Vec::new();
        for (step, strategy) in self.strategies.iter().enumerate() {
            let threads = strategy.threads.resolve(bucket_threads);
            let name = strategy.solver.name().to_string();
            match strategy
                .solver
                .solve(doc, threads)
                .and_then(|graph| check_graph(doc, graph))
            {
                Ok(graph) => {
                    return Ok(Resolution {
                        graph,
                        step,
                        strategy: name,
                        failures,
                    })
                }
                Err(error) => {
                    log::warn!(
                        "[Scheduler] {}: {} ({} threads) failed: {}",
                        doc.id,
                        name,
                        threads,
                        error
                    );
                    let transient = error.is_transient();
                    failures.push(AttemptFailure {
                        strategy: name,
                        error,
                    });
                    if !transient {
                        break;
                    }
                }
            }
        }
        Err(failures)
    }
}

fn check_graph(doc: &Document, graph: RelationGraph) -> Result<RelationGraph> {
    let matches = graph.doc_id() == doc.id
        && graph.len() == doc.len()
        && graph
            .mentions()
            .iter()
            .zip(&doc.mentions)
            .all(|(&key, mention)| key == mention.key);
    if matches {
        Ok(graph)
    } else {
        Err(Error::invariant(format!(
            "document '{}': solver returned a graph over other mentions",
            doc.id
        )))
    }
}
