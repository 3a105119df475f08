//! Document scheduling across worker threads.
//!
//! Documents are independent, so the scheduler solves many at once. Each
//! document is placed in a [`Bucket`] by its estimated cost; buckets run one
//! after another, and within a bucket up to `workers` documents are in flight,
//! each solver granted `threads_per_worker` threads.
//!
//! ```text
//! supervisor ──spawn──▶ worker(doc) ──▶ FallbackPolicy::resolve ──┐
//!     ▲                                                          │
//!     └──────────────── completion channel ◀─────────────────────┘
//!       record outcome, checkpoint graph, spawn next document
//! ```
//!
//! The supervisor blocks on the completion channel; every completion frees a
//! slot that is refilled immediately. Graphs are checkpointed as soon as they
//! arrive, and documents already present in the store are not solved again.

pub mod bucket;
pub mod policy;

pub use bucket::{bucket_for, default_buckets, estimate_cost, validate_buckets, Bucket};
pub use policy::{AttemptFailure, FallbackPolicy, Resolution, Strategy, ThreadBudget};

use crate::checkpoint::CheckpointStore;
use crate::consolidate::{consolidate, Consolidation, VisualPredictions};
use crate::error::{Error, Result};
use capcoref_core::{Document, RelationGraph};
use crossbeam_channel::unbounded;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::thread;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for [`Scheduler`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Size buckets, smallest first. The last one should be unbounded.
    pub buckets: Vec<Bucket>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            buckets: default_buckets(bucket::num_cpus()),
        }
    }
}

impl SchedulerConfig {
    /// A single bucket admitting every document.
    #[must_use]
    pub fn uniform(workers: usize, threads_per_worker: usize) -> Self {
        Self {
            buckets: vec![Bucket::new(None, workers, threads_per_worker)],
        }
    }

    /// Check the bucket list.
    pub fn validate(&self) -> Result<()> {
        validate_buckets(&self.buckets)
    }
}

// =============================================================================
// Report
// =============================================================================

/// How a document's graph was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The primary strategy succeeded.
    Success,
    /// A later strategy succeeded after the earlier ones failed.
    Fallback {
        /// Name of the solver that succeeded.
        strategy: String,
        /// Its position in the policy.
        step: usize,
        /// Errors of the strategies tried before it.
        errors: Vec<String>,
    },
    /// No strategy produced a graph; the document has none.
    Failed {
        /// Every error, in policy order.
        reason: String,
    },
    /// The graph came from the checkpoint store; nothing was solved.
    Resumed,
}

/// Result of a [`Scheduler::run`].
#[derive(Debug, Default)]
pub struct SchedulerReport {
    /// Graph of every document that has one (solved or resumed).
    pub graphs: BTreeMap<String, RelationGraph>,
    /// Outcome of every input document.
    pub outcomes: BTreeMap<String, Outcome>,
    /// Documents whose graph could not be written to the checkpoint store,
    /// with the write error. Their graphs are in `graphs` but will be solved
    /// again by the next run.
    pub checkpoint_errors: BTreeMap<String, String>,
}

impl SchedulerReport {
    /// Outcome of one document.
    #[must_use]
    pub fn outcome(&self, doc_id: &str) -> Option<&Outcome> {
        self.outcomes.get(doc_id)
    }

    fn ids_where(&self, pred: impl Fn(&Outcome) -> bool) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| pred(o))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Documents solved by the primary strategy.
    #[must_use]
    pub fn succeeded(&self) -> Vec<&str> {
        self.ids_where(|o| matches!(o, Outcome::Success))
    }

    /// Documents solved by a fallback strategy.
    #[must_use]
    pub fn fallback(&self) -> Vec<&str> {
        self.ids_where(|o| matches!(o, Outcome::Fallback { .. }))
    }

    /// Documents without a graph.
    #[must_use]
    pub fn failed(&self) -> Vec<&str> {
        self.ids_where(|o| matches!(o, Outcome::Failed { .. }))
    }

    /// Documents taken from the checkpoint store.
    #[must_use]
    pub fn resumed(&self) -> Vec<&str> {
        self.ids_where(|o| matches!(o, Outcome::Resumed))
    }

    /// Documents solved in this run whose checkpoint write failed.
    #[must_use]
    pub fn unsaved(&self) -> Vec<&str> {
        self.checkpoint_errors.keys().map(String::as_str).collect()
    }

    /// Consolidate every graph into chains.
    ///
    /// `visual` maps document id to its visual predictions; documents without
    /// an entry treat every mention as visual. Documents without a graph are
    /// skipped.
    pub fn consolidate_all(
        &self,
        docs: &[Document],
        visual: Option<&HashMap<String, VisualPredictions>>,
    ) -> Result<BTreeMap<String, Consolidation>> {
        let mut out = BTreeMap::new();
        for doc in docs {
            let Some(graph) = self.graphs.get(&doc.id) else {
                continue;
            };
            let predictions = visual.and_then(|v| v.get(&doc.id));
            out.insert(doc.id.clone(), consolidate(doc, graph, predictions)?);
        }
        Ok(out)
    }

    fn insert(&mut self, doc_id: &str, outcome: Outcome, graph: Option<RelationGraph>) {
        if let Some(graph) = graph {
            self.graphs.insert(doc_id.to_string(), graph);
        }
        self.outcomes.insert(doc_id.to_string(), outcome);
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// A worker's report back to the supervisor.
struct Completion<'d> {
    doc: &'d Document,
    result: thread::Result<std::result::Result<Resolution, Vec<AttemptFailure>>>,
}

/// Runs a fallback policy over many documents in parallel.
#[derive(Debug, Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler; fails on an invalid bucket list.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Scheduler configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Solve every document not already in `store`, checkpointing each graph
    /// as it completes.
    ///
    /// Fails only on unusable input (duplicate document ids); per-document
    /// failures are recorded in the report.
    pub fn run(
        &self,
        docs: &[Document],
        policy: &FallbackPolicy<'_>,
        store: &mut CheckpointStore,
    ) -> Result<SchedulerReport> {
        let mut seen = HashSet::with_capacity(docs.len());
        for doc in docs {
            if !seen.insert(doc.id.as_str()) {
                return Err(capcoref_core::Error::invalid_input(format!(
                    "duplicate document id '{}'",
                    doc.id
                ))
                .into());
            }
        }

        let buckets = &self.config.buckets;
        let mut report = SchedulerReport::default();
        let mut queues: Vec<Vec<&Document>> = vec![Vec::new(); buckets.len()];
        for doc in docs {
            match store.relation_graph(doc) {
                Ok(Some(graph)) => {
                    report.insert(&doc.id, Outcome::Resumed, Some(graph));
                }
                Ok(None) => queues[bucket_for(buckets, estimate_cost(doc))].push(doc),
                Err(e) => {
                    log::warn!("[Scheduler] {}: unusable checkpoint: {}", doc.id, e);
                    let reason = format!("checkpoint: {}", e);
                    report.insert(&doc.id, Outcome::Failed { reason }, None);
                }
            }
        }
        if !report.outcomes.is_empty() {
            log::info!(
                "[Scheduler] Resuming: {} of {} documents already done",
                report.resumed().len(),
                docs.len()
            );
        }

        for (bucket, queue) in buckets.iter().zip(&queues) {
            if queue.is_empty() {
                continue;
            }
            log::info!(
                "[Scheduler] {} documents with cost <= {}: {} workers x {} threads",
                queue.len(),
                bucket
                    .max_cost
                    .map_or_else(|| "any".to_string(), |c| c.to_string()),
                bucket.workers,
                bucket.threads_per_worker
            );
            run_bucket(bucket, queue, policy, store, &mut report);
        }

        log::info!(
            "[Scheduler] Done: {} solved, {} fallback, {} failed, {} resumed",
            report.succeeded().len(),
            report.fallback().len(),
            report.failed().len(),
            report.resumed().len()
        );
        if !report.checkpoint_errors.is_empty() {
            log::warn!(
                "[Scheduler] {} graphs not checkpointed: {}",
                report.checkpoint_errors.len(),
                report.unsaved().join(", ")
            );
        }
        Ok(report)
    }
}

fn run_bucket(
    bucket: &Bucket,
    queue: &[&Document],
    policy: &FallbackPolicy<'_>,
    store: &mut CheckpointStore,
    report: &mut SchedulerReport,
) {
    let (tx, rx) = unbounded::<Completion<'_>>();
    let threads = bucket.threads_per_worker;
    let workers = bucket.workers.max(1);

    thread::scope(|scope| {
        let mut pending = queue.iter().copied();
        let mut active = 0usize;
        loop {
            while active < workers {
                let Some(doc) = pending.next() else {
                    break;
                };
                let tx = tx.clone();
                scope.spawn(move || {
                    let result =
                        panic::catch_unwind(AssertUnwindSafe(|| policy.resolve(doc, threads)));
                    let _ = tx.send(Completion { doc, result });
                });
                active += 1;
            }
            if active == 0 {
                break;
            }
            // The supervisor holds `tx`, so this only returns on a completion.
            let Ok(done) = rx.recv() else {
                break;
            };
            active -= 1;
            complete(done, store, report);
        }
    });
}

fn complete(done: Completion<'_>, store: &mut CheckpointStore, report: &mut SchedulerReport) {
    let id = done.doc.id.as_str();
    match done.result {
        Ok(Ok(resolution)) => {
            if let Err(e) = store.record_relation(&resolution.graph) {
                log::error!("[Scheduler] {}: checkpoint write failed: {}", id, e);
                report.checkpoint_errors.insert(id.to_string(), e.to_string());
            }
            let outcome = if resolution.step == 0 {
                Outcome::Success
            } else {
                log::info!(
                    "[Scheduler] {}: solved by fallback '{}' (step {})",
                    id,
                    resolution.strategy,
                    resolution.step
                );
                Outcome::Fallback {
                    strategy: resolution.strategy,
                    step: resolution.step,
                    errors: resolution.failures.iter().map(ToString::to_string).collect(),
                }
            };
            report.insert(id, outcome, Some(resolution.graph));
        }
        Ok(Err(failures)) => {
            let reason = failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            log::error!("[Scheduler] {}: every strategy failed: {}", id, reason);
            report.insert(id, Outcome::Failed { reason }, None);
        }
        Err(payload) => {
            let reason = format!("worker panicked: {}", panic_message(payload.as_ref()));
            log::error!("[Scheduler] {}: {}", id, reason);
            report.insert(id, Outcome::Failed { reason }, None);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Fail unless every document of the report has a graph.
pub fn require_all(report: &SchedulerReport) -> Result<()> {
    let failed = report.failed();
    if failed.is_empty() {
        Ok(())
    } else {
        Err(Error::solver(format!(
            "{} documents failed: {}",
            failed.len(),
            failed.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::RelationSolver;
    use capcoref_core::{Mention, MentionKey, RelationLabel};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn doc(id: &str, n: u32) -> Document {
        Document::with_mentions(
            id,
            (0..n)
                .map(|i| Mention::new(MentionKey::new(i, 0, 1), "x", "people"))
                .collect(),
        )
    }

    /// Links the first two mentions; panics on documents named "boom".
    struct Linker {
        calls: AtomicUsize,
    }

    impl RelationSolver for Linker {
        fn name(&self) -> &str {
            "linker"
        }

        fn solve(&self, doc: &Document, _threads: usize) -> Result<RelationGraph> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if doc.id == "boom" {
                panic!("exploded on {}", doc.id);
            }
            let mut graph = RelationGraph::new(doc);
            if doc.len() >= 2 {
                graph.set(0, 1, RelationLabel::Coref)?;
            }
            Ok(graph)
        }
    }

    fn linker() -> Linker {
        Linker {
            calls: AtomicUsize::new(0),
        }
    }

    #[test]
    fn every_document_gets_an_outcome() {
        let docs: Vec<Document> = (0..20).map(|i| doc(&format!("d{}", i), 3)).collect();
        let solver = linker();
        let scheduler = Scheduler::new(SchedulerConfig::uniform(4, 1)).unwrap();
        let mut store = CheckpointStore::in_memory();
        let report = scheduler
            .run(&docs, &FallbackPolicy::new(&solver), &mut store)
            .unwrap();
        assert_eq!(report.succeeded().len(), 20);
        assert_eq!(report.graphs.len(), 20);
        assert_eq!(solver.calls.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn panics_fail_only_their_document() {
        let docs = vec![doc("ok", 2), doc("boom", 2)];
        let solver = linker();
        let scheduler = Scheduler::new(SchedulerConfig::uniform(2, 1)).unwrap();
        let mut store = CheckpointStore::in_memory();
        let report = scheduler
            .run(&docs, &FallbackPolicy::new(&solver), &mut store)
            .unwrap();
        assert_eq!(report.failed(), vec!["boom"]);
        assert_eq!(report.succeeded(), vec!["ok"]);
        match report.outcome("boom") {
            Some(Outcome::Failed { reason }) => assert!(reason.contains("exploded")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(require_all(&report).is_err());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let docs = vec![doc("same", 1), doc("same", 2)];
        let solver = linker();
        let scheduler = Scheduler::new(SchedulerConfig::uniform(1, 1)).unwrap();
        let mut store = CheckpointStore::in_memory();
        assert!(scheduler
            .run(&docs, &FallbackPolicy::new(&solver), &mut store)
            .is_err());
        assert_eq!(solver.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = SchedulerConfig { buckets: Vec::new() };
        assert!(matches!(Scheduler::new(config), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn failed_checkpoint_writes_name_their_documents() {
        let dir = tempfile::tempdir().unwrap();
        let paths = crate::checkpoint::CheckpointPaths::relation(
            dir.path().join("missing").join("relation_graphs.json"),
        );
        let mut store = CheckpointStore::open(paths).unwrap();
        let docs = vec![doc("a", 2), doc("b", 3)];
        let solver = linker();
        let report = Scheduler::new(SchedulerConfig::uniform(2, 1))
            .unwrap()
            .run(&docs, &FallbackPolicy::new(&solver), &mut store)
            .unwrap();
        assert_eq!(report.succeeded(), vec!["a", "b"]);
        assert_eq!(report.unsaved(), vec!["a", "b"]);
        assert!(report.checkpoint_errors["a"].contains("IO error"));
    }

    #[test]
    fn report_consolidates_solved_documents() {
        let docs = vec![doc("a", 3), doc("boom", 2)];
        let solver = linker();
        let scheduler = Scheduler::new(SchedulerConfig::uniform(2, 1)).unwrap();
        let mut store = CheckpointStore::in_memory();
        let report = scheduler
            .run(&docs, &FallbackPolicy::new(&solver), &mut store)
            .unwrap();
        let chains = report.consolidate_all(&docs, None).unwrap();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains["a"].chains.len(), 2);
    }
}
