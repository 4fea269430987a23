//! Orphan Detector & Linker.
//!
//! An orphan is a node that no edge touches. Every enabled strategy proposes
//! scored candidate edges for each orphan; the linker only reduces them:
//! High is applied, Medium is suggested for review, Low is discarded.

pub mod strategies;

use crate::config::EngineConfig;
use crate::index::EntityIndex;
use kgforge_model::{Confidence, Edge, Node, NodeId};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Origins changed together in one upstream change.
pub type ChangeSet = BTreeSet<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    PathContainment,
    NamingConvention,
    MetadataLabel,
    CoOccurrence,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateEdge {
    #[serde(flatten)]
    pub edge: Edge,
    pub strategy: Strategy,
    pub rationale: String,
}

impl CandidateEdge {
    fn sort_key(&self) -> (NodeId, String, NodeId, Strategy) {
        (
            self.edge.source.clone(),
            self.edge.predicate.clone(),
            self.edge.target.clone(),
            self.strategy,
        )
    }
}

/// Read-only inputs shared by every strategy.
pub struct LinkContext<'a> {
    pub index: &'a EntityIndex,
    pub config: &'a EngineConfig,
    pub change_sets: &'a [ChangeSet],
}

type StrategyFn = fn(&LinkContext<'_>, &Node) -> Vec<CandidateEdge>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkOutcome {
    pub applied: Vec<CandidateEdge>,
    pub suggested: Vec<CandidateEdge>,
    pub discarded: usize,
    pub orphans_before: Vec<NodeId>,
    pub orphans_after: Vec<NodeId>,
}

impl LinkOutcome {
    pub fn applied_edges(&self) -> impl Iterator<Item = &Edge> {
        self.applied.iter().map(|c| &c.edge)
    }
}

/// Nodes touched by no edge, sorted by id.
pub fn find_orphans<'n>(nodes: impl IntoIterator<Item = &'n Node>, edges: &[Edge]) -> Vec<NodeId> {
    let touched: BTreeSet<&NodeId> = edges.iter().flat_map(|e| [&e.source, &e.target]).collect();
    let mut orphans: Vec<NodeId> = nodes
        .into_iter()
        .filter(|n| !touched.contains(&n.id))
        .map(|n| n.id.clone())
        .collect();
    orphans.sort();
    orphans
}

impl<'a> LinkContext<'a> {
    fn strategies(&self) -> Vec<StrategyFn> {
        let linker = &self.config.linker;
        let mut enabled: Vec<StrategyFn> = Vec::new();
        if linker.path_containment {
            enabled.push(strategies::path_containment);
        }
        if linker.naming_conventions {
            enabled.push(strategies::naming_convention);
        }
        if linker.metadata_labels {
            enabled.push(strategies::metadata_labels);
        }
        if linker.co_occurrence {
            enabled.push(strategies::co_occurrence);
        }
        enabled
    }

    /// Run every enabled strategy over the orphans of `edges` and reduce.
    pub fn link_orphans(&self, edges: &[Edge]) -> LinkOutcome {
        let orphans_before = find_orphans(self.index.nodes(), edges);
        let strategies = self.strategies();

        let proposals: Vec<CandidateEdge> = orphans_before
            .par_iter()
            .filter_map(|id| self.index.get(id))
            .flat_map_iter(|node| strategies.iter().flat_map(move |s| s(self, node)))
            .collect();

        let existing: BTreeSet<(&NodeId, &str, &NodeId)> = edges.iter().map(Edge::key).collect();
        let mut applied: BTreeMap<(NodeId, String, NodeId), CandidateEdge> = BTreeMap::new();
        let mut suggested: BTreeMap<(NodeId, String, NodeId), CandidateEdge> = BTreeMap::new();
        let mut discarded = 0;

        let mut proposals = proposals;
        proposals.sort_by_cached_key(CandidateEdge::sort_key);
        for proposal in proposals {
            let e = &proposal.edge;
            if e.source == e.target
                || existing.contains(&e.key())
                || !self.index.contains(&e.source)
                || !self.index.contains(&e.target)
            {
                discarded += 1;
                continue;
            }
            let key = (e.source.clone(), e.predicate.clone(), e.target.clone());
            match proposal.edge.confidence {
                Confidence::High => {
                    applied.entry(key).or_insert(proposal);
                }
                Confidence::Medium => {
                    suggested.entry(key).or_insert(proposal);
                }
                Confidence::Low => discarded += 1,
            }
        }
        // A suggestion already applied by a stronger strategy is redundant.
        suggested.retain(|k, _| !applied.contains_key(k));

        let applied: Vec<CandidateEdge> = applied.into_values().collect();
        let suggested: Vec<CandidateEdge> = suggested.into_values().collect();
        let mut all_edges: Vec<Edge> = edges.to_vec();
        all_edges.extend(applied.iter().map(|c| c.edge.clone()));
        let orphans_after = find_orphans(self.index.nodes(), &all_edges);

        tracing::info!(
            orphans_before = orphans_before.len(),
            orphans_after = orphans_after.len(),
            applied = applied.len(),
            suggested = suggested.len(),
            discarded,
            "orphan linking finished"
        );

        LinkOutcome {
            applied,
            suggested,
            discarded,
            orphans_before,
            orphans_after,
        }
    }
}
