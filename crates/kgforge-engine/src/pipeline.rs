//! Pipeline driver.
//!
//! Phases run strictly in order; each consumes the fully merged output of
//! the previous one:
//!
//! 1. build records in parallel rounds (children extracted in round `n` are
//!    built in round `n + 1`),
//! 2. merge every built node into the index (sequential), then freeze,
//! 3. resolve references in parallel against the frozen index,
//! 4. link orphans,
//! 5. deduplicate (sequential),
//! 6. validate and optionally repair.

use crate::builder::{BuildOutcome, EntityBuilder};
use crate::candidate::{CandidateBatch, CandidateRecord, NoLoader, RecordLoader};
use crate::config::EngineConfig;
use crate::dedup::deduplicate;
use crate::error::{EngineError, RecordError};
use crate::index::IndexBuilder;
use crate::linker::{ChangeSet, LinkContext};
use crate::report::{RecordFailure, ValidationReport};
use crate::resolver::{sort_broken, ReferenceResolver};
use crate::validate::validate;
use kgforge_model::{Edge, GraphDocument, Node};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation shared with the caller.
///
/// Once cancelled, no new record builds start; records already built are
/// still merged and the report is flagged.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

static NO_LOADER: NoLoader = NoLoader;

/// Per-run collaborators.
pub struct RunContext<'a> {
    pub loader: &'a dyn RecordLoader,
    pub change_sets: &'a [ChangeSet],
    pub cancellation: CancellationToken,
}

impl Default for RunContext<'static> {
    fn default() -> Self {
        Self {
            loader: &NO_LOADER,
            change_sets: &[],
            cancellation: CancellationToken::default(),
        }
    }
}

impl<'a> RunContext<'a> {
    pub fn new(loader: &'a dyn RecordLoader) -> Self {
        Self {
            loader,
            change_sets: &[],
            cancellation: CancellationToken::default(),
        }
    }

    pub fn with_change_sets(mut self, change_sets: &'a [ChangeSet]) -> Self {
        self.change_sets = change_sets;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// Validated graph plus the run report.
#[derive(Debug, Clone)]
pub struct GraphOutput {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub report: ValidationReport,
}

impl GraphOutput {
    pub fn document(&self) -> GraphDocument {
        GraphDocument::from_parts(self.nodes.iter(), self.edges.iter())
    }
}

#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    pool: Option<rayon::ThreadPool>,
}

struct BuildPhase {
    built: Vec<BuildOutcome>,
    failures: Vec<RecordError>,
    records_seen: usize,
    cancelled: bool,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let pool = if config.parallelism > 0 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(config.parallelism)
                    .thread_name(|i| format!("kgforge-worker-{i}"))
                    .build()?,
            )
        } else {
            None
        };
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run(&self, batch: CandidateBatch) -> Result<GraphOutput, EngineError> {
        self.run_with(batch, &RunContext::default())
    }

    pub fn run_with(&self, batch: CandidateBatch, ctx: &RunContext<'_>) -> Result<GraphOutput, EngineError> {
        match &self.pool {
            Some(pool) => pool.install(|| self.execute(batch, ctx)),
            None => self.execute(batch, ctx),
        }
    }

    fn build_phase(&self, batch: CandidateBatch, ctx: &RunContext<'_>) -> BuildPhase {
        let builder = EntityBuilder::new(&self.config);
        let mut phase = BuildPhase {
            built: Vec::new(),
            failures: Vec::new(),
            records_seen: 0,
            cancelled: false,
        };
        let mut round: Vec<CandidateRecord> = batch.canonicalize();
        let mut depth = 0;

        while !round.is_empty() {
            phase.records_seen += round.len();
            let results: Vec<Option<Result<BuildOutcome, RecordError>>> = round
                .par_iter()
                .map(|record| {
                    if ctx.cancellation.is_cancelled() {
                        None
                    } else {
                        Some(builder.build(record, ctx.loader))
                    }
                })
                .collect();

            let mut next = Vec::new();
            for result in results {
                match result {
                    None => phase.cancelled = true,
                    Some(Ok(mut outcome)) => {
                        next.append(&mut outcome.children);
                        phase.built.push(outcome);
                    }
                    Some(Err(err)) => {
                        tracing::warn!(origin = %err.origin(), error = %err, "record skipped");
                        phase.failures.push(err);
                    }
                }
            }
            tracing::info!(
                round = depth,
                records = round.len(),
                children = next.len(),
                "build round finished"
            );
            if phase.cancelled {
                break;
            }
            round = CandidateBatch::new(next).canonicalize();
            depth += 1;
        }
        phase
    }

    fn execute(&self, batch: CandidateBatch, ctx: &RunContext<'_>) -> Result<GraphOutput, EngineError> {
        let config = &self.config;
        tracing::info!(records = batch.len(), "run started");

        // Build.
        let BuildPhase {
            mut built,
            failures,
            records_seen,
            cancelled,
        } = self.build_phase(batch, ctx);
        if cancelled {
            tracing::warn!(built = built.len(), "run cancelled; merging completed records");
        }

        // Merge into the index in canonical order.
        built.sort_by(|a, b| {
            let key = |o: &BuildOutcome| (o.node.origin.clone().unwrap_or_default(), o.node.source_digest.clone());
            key(a).cmp(&key(b)).then_with(|| a.node.id.cmp(&b.node.id))
        });
        let records_built = built.len();
        let (mut fields_seen, mut fields_consumed) = (0, 0);
        let mut index_builder = IndexBuilder::new();
        for outcome in built {
            fields_seen += outcome.fields_seen;
            fields_consumed += outcome.fields_consumed;
            index_builder.insert(outcome.node, outcome.references);
        }
        let (index, mut pending) = index_builder.freeze(&config.dedup);
        pending.sort_by(|a, b| (&a.source, &a.origin).cmp(&(&b.source, &b.origin)));

        // Resolve.
        let resolution = ReferenceResolver::new(&index, config).resolve_all(&pending);

        // Link orphans.
        let link = LinkContext {
            index: &index,
            config,
            change_sets: ctx.change_sets,
        }
        .link_orphans(&resolution.edges);
        let mut edges = resolution.edges;
        edges.extend(link.applied_edges().cloned());

        // Deduplicate.
        let dedup = deduplicate(index, edges);
        let mut broken = resolution.broken;
        for b in &mut broken {
            if let Some(canonical) = dedup.redirects.get(&b.source) {
                b.source = canonical.clone();
            }
        }
        sort_broken(&mut broken);

        // Validate.
        let validated = validate(dedup.nodes.into_values().collect(), dedup.edges, &broken, config);

        let mut record_failures: Vec<RecordFailure> = failures.iter().map(RecordFailure::from).collect();
        record_failures.sort();

        let mut report = ValidationReport {
            record_failures,
            broken_references: broken,
            orphans_before: link.orphans_before,
            orphans_after: link.orphans_after,
            final_orphans: validated.final_orphans,
            applied_links: link.applied,
            suggested_links: link.suggested,
            merge_conflicts: dedup.conflicts,
            merges: dedup.merges,
            placeholders: validated.placeholders,
            soft_warnings: validated.soft_warnings,
            hard_failures: validated.hard_failures,
            cancelled,
            ..Default::default()
        };
        report.summary.records_seen = records_seen;
        report.summary.records_built = records_built;
        report.summary.records_failed = report.record_failures.len();
        report.summary.placeholders = report.placeholders.len();
        report.summary.discarded_links = link.discarded;
        report.summary.set_coverage(fields_seen, fields_consumed);
        report.summary.count_graph(&validated.nodes, &validated.edges);

        tracing::info!(
            nodes = report.summary.nodes,
            edges = report.summary.edges,
            failed = report.summary.records_failed,
            broken = report.broken_references.len(),
            cancelled,
            "run finished"
        );

        if !report.hard_failures.is_empty() {
            return Err(EngineError::HardFailure {
                failures: report.hard_failures.clone(),
                report: Box::new(report),
            });
        }

        Ok(GraphOutput {
            nodes: validated.nodes,
            edges: validated.edges,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(fields: serde_json::Value, origin: &str) -> CandidateRecord {
        CandidateRecord::from_json(fields).with_origin(origin)
    }

    #[test]
    fn children_are_built_in_later_rounds() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let batch = CandidateBatch::new(vec![record(
            json!({
                "type": "Service",
                "name": "checkout",
                "database": {"engine": "postgres", "version": "15", "size": "large"}
            }),
            "/services/checkout",
        )]);
        let out = engine.run(batch).unwrap();
        assert_eq!(out.nodes.len(), 2);
        assert_eq!(out.report.summary.records_seen, 2);
        assert!(out
            .edges
            .iter()
            .any(|e| e.predicate == "database" && e.target.as_str() == "kg:database:services/checkout%23database"));
    }

    #[test]
    fn cancelled_runs_are_flagged() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let ctx = RunContext::default().with_cancellation(token);
        let batch = CandidateBatch::new(vec![record(json!({"type": "Service", "name": "a"}), "/a")]);
        let out = engine.run_with(batch, &ctx).unwrap();
        assert!(out.report.cancelled);
        assert!(out.nodes.is_empty());
    }

    #[test]
    fn dedicated_pool_gives_the_same_graph() {
        let batch = || {
            CandidateBatch::new(vec![
                record(json!({"type": "Service", "name": "a", "uses": "./b"}), "/a"),
                record(json!({"type": "Service", "name": "b"}), "/b"),
            ])
        };
        let global = Engine::new(EngineConfig::default()).unwrap().run(batch()).unwrap();
        let cfg = EngineConfig {
            parallelism: 2,
            ..EngineConfig::default()
        };
        let pooled = Engine::new(cfg).unwrap().run(batch()).unwrap();
        assert_eq!(global.document(), pooled.document());
    }
}
