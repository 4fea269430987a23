//! Graph Validator & Repair.
//!
//! Hard failures mean an engine invariant broke and the batch must not ship.
//! Soft warnings are reported; with repair enabled, unresolved references get
//! explicitly tagged placeholder nodes instead of plausible-looking entities.

use crate::config::EngineConfig;
use crate::linker::find_orphans;
use crate::resolver::BrokenReference;
use kgforge_model::digest::fnv1a64_fields_hex;
use kgforge_model::{
    dedup_edges, Attributes, Confidence, Edge, EdgeReason, Node, NodeId, Value,
    UNRESOLVED_REFERENCE_TYPE,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Type segment of placeholder identifiers.
pub const PLACEHOLDER_SEGMENT: &str = "unresolved-reference";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HardFailure {
    #[error("identifier `{id}` occurs {count} times after deduplication")]
    DuplicateIdentifier { id: NodeId, count: usize },
    #[error("node `{id}` has no type")]
    MissingType { id: NodeId },
    #[error("node `{id}` has no name")]
    MissingName { id: NodeId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SoftWarning {
    BrokenReferences { count: usize },
    OrphanThresholdExceeded { orphans: usize, threshold: usize },
    DanglingEdge {
        source: NodeId,
        predicate: String,
        target: NodeId,
        repaired: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaceholderRecord {
    pub id: NodeId,
    pub predicate: String,
    pub raw_value: String,
    /// Nodes whose references now point at the placeholder.
    pub referenced_by: Vec<NodeId>,
}

#[derive(Debug, Default)]
pub struct ValidatedGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub placeholders: Vec<PlaceholderRecord>,
    pub soft_warnings: Vec<SoftWarning>,
    pub hard_failures: Vec<HardFailure>,
    pub final_orphans: Vec<NodeId>,
}

impl ValidatedGraph {
    pub fn is_shippable(&self) -> bool {
        self.hard_failures.is_empty()
    }
}

/// Stable placeholder id for `(predicate, raw value)`.
pub fn placeholder_id(scheme: &str, predicate: &str, raw: &str) -> Option<NodeId> {
    let digest = fnv1a64_fields_hex(&[predicate, raw]);
    NodeId::from_segments(scheme, &[PLACEHOLDER_SEGMENT, &digest]).ok()
}

fn placeholder_node(id: NodeId, predicate: &str, raw: &str) -> Node {
    let mut attributes = Attributes::new();
    attributes.insert("rawValue".to_string(), Value::text(raw));
    attributes.insert("predicate".to_string(), Value::text(predicate));
    let name = if raw.trim().is_empty() {
        "Unresolved reference".to_string()
    } else {
        raw.to_string()
    };
    Node {
        id,
        node_type: UNRESOLVED_REFERENCE_TYPE.to_string(),
        name,
        attributes,
        origin: None,
        confidence: Confidence::Low,
        source_digest: String::new(),
    }
}

struct Repairs<'s> {
    scheme: &'s str,
    nodes: BTreeMap<NodeId, (Node, PlaceholderRecord)>,
}

impl<'s> Repairs<'s> {
    fn placeholder_for(&mut self, predicate: &str, raw: &str, referrer: &NodeId) -> Option<NodeId> {
        let id = placeholder_id(self.scheme, predicate, raw)?;
        let (_, record) = self.nodes.entry(id.clone()).or_insert_with(|| {
            (
                placeholder_node(id.clone(), predicate, raw),
                PlaceholderRecord {
                    id: id.clone(),
                    predicate: predicate.to_string(),
                    raw_value: raw.to_string(),
                    referenced_by: Vec::new(),
                },
            )
        });
        if !record.referenced_by.contains(referrer) {
            record.referenced_by.push(referrer.clone());
            record.referenced_by.sort();
        }
        Some(id)
    }
}

pub fn validate(
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    broken: &[BrokenReference],
    config: &EngineConfig,
) -> ValidatedGraph {
    let repair = config.validator.repair;
    let mut out = ValidatedGraph::default();
    let mut nodes = nodes;
    let mut edges = edges;
    let mut repairs = Repairs {
        scheme: config.scheme(),
        nodes: BTreeMap::new(),
    };

    if repair {
        for b in broken {
            let raw = b.raw_value.display_text();
            if let Some(target) = repairs.placeholder_for(&b.predicate, &raw, &b.source) {
                edges.push(Edge::new(b.source.clone(), b.predicate.clone(), target, Confidence::Low, EdgeReason::Explicit));
            }
        }
    }

    // Closed world: every endpoint must exist.
    let known: BTreeSet<NodeId> = nodes
        .iter()
        .map(|n| n.id.clone())
        .chain(repairs.nodes.keys().cloned())
        .collect();
    let mut kept = Vec::with_capacity(edges.len());
    for mut edge in edges {
        let source_ok = known.contains(&edge.source);
        let target_ok = known.contains(&edge.target);
        if source_ok && target_ok {
            kept.push(edge);
            continue;
        }
        tracing::warn!(
            source = %edge.source,
            predicate = %edge.predicate,
            target = %edge.target,
            repair,
            "dangling edge"
        );
        out.soft_warnings.push(SoftWarning::DanglingEdge {
            source: edge.source.clone(),
            predicate: edge.predicate.clone(),
            target: edge.target.clone(),
            repaired: repair,
        });
        if !repair {
            continue;
        }
        if !source_ok {
            let referrer = edge.target.clone();
            match repairs.placeholder_for(&edge.predicate, edge.source.as_str(), &referrer) {
                Some(id) => edge.source = id,
                None => continue,
            }
        }
        if !target_ok {
            let referrer = edge.source.clone();
            match repairs.placeholder_for(&edge.predicate, edge.target.as_str(), &referrer) {
                Some(id) => edge.target = id,
                None => continue,
            }
        }
        edge.confidence = Confidence::Low;
        kept.push(edge);
    }

    for (node, record) in repairs.nodes.into_values() {
        nodes.push(node);
        out.placeholders.push(record);
    }
    nodes.sort_by(|a, b| a.id.cmp(&b.id));

    // Hard invariants.
    let mut counts: BTreeMap<&NodeId, usize> = BTreeMap::new();
    for n in &nodes {
        *counts.entry(&n.id).or_default() += 1;
        if n.node_type.trim().is_empty() {
            out.hard_failures.push(HardFailure::MissingType { id: n.id.clone() });
        }
        if n.name.trim().is_empty() {
            out.hard_failures.push(HardFailure::MissingName { id: n.id.clone() });
        }
    }
    for (id, count) in counts.into_iter().filter(|(_, c)| *c > 1) {
        out.hard_failures.push(HardFailure::DuplicateIdentifier { id: id.clone(), count });
    }

    if !broken.is_empty() {
        out.soft_warnings.push(SoftWarning::BrokenReferences { count: broken.len() });
    }
    let edges = dedup_edges(kept);
    out.final_orphans = find_orphans(nodes.iter(), &edges);
    if let Some(threshold) = config.validator.orphan_threshold {
        if out.final_orphans.len() > threshold {
            out.soft_warnings.push(SoftWarning::OrphanThresholdExceeded {
                orphans: out.final_orphans.len(),
                threshold,
            });
        }
    }

    for failure in &out.hard_failures {
        tracing::error!(failure = %failure, "hard validation failure");
    }
    tracing::info!(
        nodes = nodes.len(),
        edges = edges.len(),
        placeholders = out.placeholders.len(),
        soft_warnings = out.soft_warnings.len(),
        hard_failures = out.hard_failures.len(),
        "validation finished"
    );

    out.nodes = nodes;
    out.edges = edges;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::BrokenReason;
    use kgforge_model::RawReference;

    fn id(s: &str) -> NodeId {
        NodeId::parse(s, "kg").unwrap()
    }

    fn node(i: &str) -> Node {
        Node {
            id: id(i),
            node_type: "Service".into(),
            name: "x".into(),
            attributes: Attributes::new(),
            origin: None,
            confidence: Confidence::High,
            source_digest: String::new(),
        }
    }

    fn broken(raw: &str) -> BrokenReference {
        BrokenReference {
            source: id("kg:service:a"),
            field: "next".into(),
            predicate: "next".into(),
            raw_value: RawReference::Path(raw.into()),
            reason: BrokenReason::NotFound,
            target_type_hint: None,
        }
    }

    #[test]
    fn non_repair_mode_reports_without_placeholders() {
        let cfg = EngineConfig::default();
        let out = validate(vec![node("kg:service:a")], Vec::new(), &[broken("./missing")], &cfg);
        assert!(out.placeholders.is_empty());
        assert!(out.edges.is_empty());
        assert_eq!(out.soft_warnings, vec![SoftWarning::BrokenReferences { count: 1 }]);
        assert!(out.is_shippable());
    }

    #[test]
    fn repair_mode_creates_tagged_placeholders() {
        let mut cfg = EngineConfig::default();
        cfg.validator.repair = true;
        let out = validate(vec![node("kg:service:a")], Vec::new(), &[broken("./missing"), broken("./missing")], &cfg);
        assert_eq!(out.placeholders.len(), 1);
        let placeholder = out.nodes.iter().find(|n| n.is_placeholder()).unwrap();
        assert!(placeholder.id.as_str().starts_with("kg:unresolved-reference:"));
        assert_eq!(placeholder.name, "./missing");
        assert_eq!(placeholder.attributes.len(), 2);
        assert_eq!(placeholder.attributes["rawValue"], Value::text("./missing"));
        assert_eq!(out.edges.len(), 1);
        assert_eq!(out.edges[0].confidence, Confidence::Low);
        assert_eq!(out.edges[0].target, placeholder.id);
    }

    #[test]
    fn placeholder_ids_are_stable() {
        assert_eq!(placeholder_id("kg", "next", "./b"), placeholder_id("kg", "next", "./b"));
        assert_ne!(placeholder_id("kg", "next", "./b"), placeholder_id("kg", "prev", "./b"));
    }

    #[test]
    fn dangling_edges_are_removed_and_reported() {
        let cfg = EngineConfig::default();
        let edges = vec![Edge::new(id("kg:service:a"), "uses", id("kg:service:gone"), Confidence::High, EdgeReason::Explicit)];
        let out = validate(vec![node("kg:service:a")], edges, &[], &cfg);
        assert!(out.edges.is_empty());
        assert!(matches!(out.soft_warnings[0], SoftWarning::DanglingEdge { repaired: false, .. }));
    }

    #[test]
    fn hard_failures_for_broken_identity() {
        let mut cfg = EngineConfig::default();
        cfg.validator.orphan_threshold = Some(0);
        let mut nameless = node("kg:service:b");
        nameless.name = " ".into();
        let out = validate(vec![node("kg:service:a"), node("kg:service:a"), nameless], Vec::new(), &[], &cfg);
        assert!(!out.is_shippable());
        assert!(out.hard_failures.contains(&HardFailure::MissingName { id: id("kg:service:b") }));
        assert!(out
            .hard_failures
            .contains(&HardFailure::DuplicateIdentifier { id: id("kg:service:a"), count: 2 }));
        assert!(out
            .soft_warnings
            .iter()
            .any(|w| matches!(w, SoftWarning::OrphanThresholdExceeded { threshold: 0, .. })));
    }
}
