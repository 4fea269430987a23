//! Inference strategies for orphan nodes.
//!
//! Each strategy is a pure function of the frozen context and one orphan.
//! None of them creates nodes; every proposed endpoint already exists.

use super::{CandidateEdge, LinkContext, Strategy};
use crate::config::{LinkDirection, NamingRule};
use crate::index::origin_key;
use crate::naming::{normalize_name_key, origin_directories};
use kgforge_model::{normalize_identifier, Confidence, Edge, EdgeReason, Node, NodeId};
use std::collections::BTreeMap;

fn candidate(
    source: &NodeId,
    predicate: &str,
    target: &NodeId,
    confidence: Confidence,
    reason: EdgeReason,
    strategy: Strategy,
    rationale: String,
) -> CandidateEdge {
    CandidateEdge {
        edge: Edge::new(source.clone(), predicate, target.clone(), confidence, reason),
        strategy,
        rationale,
    }
}

fn others<'c>(ids: &'c [NodeId], node: &Node) -> Vec<&'c NodeId> {
    ids.iter().filter(|id| **id != node.id).collect()
}

/// Container named by an enclosing directory of the orphan's origin.
///
/// Directories are tried deepest first; the first one that names exactly one
/// other node (after type disambiguation) wins.
pub fn path_containment(ctx: &LinkContext<'_>, node: &Node) -> Vec<CandidateEdge> {
    let Some(origin) = node.origin.as_deref() else {
        return Vec::new();
    };
    let own_keys = [normalize_name_key(node.id.leaf()), normalize_name_key(&node.name)];
    let dirs = origin_directories(origin);

    for (pos, segment) in dirs.iter().enumerate().rev() {
        if own_keys.contains(&normalize_name_key(segment)) {
            continue;
        }
        let mut matches = others(ctx.index.by_leaf(&normalize_identifier(segment)), node);
        if matches.len() > 1 {
            let container_type = pos
                .checked_sub(1)
                .and_then(|p| dirs.get(p))
                .and_then(|d| ctx.config.builder.origin_type_dirs.get(&d.to_ascii_lowercase()));
            matches.retain(|id| {
                container_type.is_some_and(|t| ctx.index.get(id).is_some_and(|n| &n.node_type == t))
            });
        }
        let [container] = matches.as_slice() else {
            continue;
        };
        let Some(container_node) = ctx.index.get(container) else {
            continue;
        };
        let predicate = ctx
            .config
            .linker
            .containment_predicates
            .get(&container_node.node_type)
            .unwrap_or(&ctx.config.linker.default_containment_predicate);
        return vec![candidate(
            container,
            predicate,
            &node.id,
            Confidence::High,
            EdgeReason::InferredPath,
            Strategy::PathContainment,
            format!("origin `{origin}` is nested under `{segment}`"),
        )];
    }
    Vec::new()
}

/// Suffix/qualifier naming rules.
pub fn naming_convention(ctx: &LinkContext<'_>, node: &Node) -> Vec<CandidateEdge> {
    let leaf = node.id.leaf();
    let mut out = Vec::new();
    for rule in &ctx.config.linker.naming_rules {
        match rule {
            NamingRule::OwnerSuffix { suffix, predicate } => {
                // The orphan is the owner: `{x}-team` owns `{x}`.
                if let Some(base) = leaf.strip_suffix(suffix.as_str()).filter(|b| !b.is_empty()) {
                    if let [owned] = others(ctx.index.by_leaf(base), node).as_slice() {
                        out.push(candidate(
                            &node.id,
                            predicate,
                            owned,
                            Confidence::Medium,
                            EdgeReason::InferredNaming,
                            Strategy::NamingConvention,
                            format!("`{leaf}` is `{base}` + `{suffix}`"),
                        ));
                    }
                }
                // The orphan is owned: `{x}` owned by `{x}-team`.
                let owner_leaf = format!("{leaf}{suffix}");
                if let [owner] = others(ctx.index.by_leaf(&owner_leaf), node).as_slice() {
                    out.push(candidate(
                        owner,
                        predicate,
                        &node.id,
                        Confidence::Medium,
                        EdgeReason::InferredNaming,
                        Strategy::NamingConvention,
                        format!("`{owner_leaf}` is `{leaf}` + `{suffix}`"),
                    ));
                }
            }
            NamingRule::QualifierSuffix {
                separator,
                target_type,
                predicate,
            } => {
                let Some((_, qualifier)) = leaf.rsplit_once(separator.as_str()) else {
                    continue;
                };
                if qualifier.is_empty() || &node.node_type == target_type {
                    continue;
                }
                let mut targets: Vec<&NodeId> = others(ctx.index.by_leaf(qualifier), node)
                    .into_iter()
                    .filter(|id| ctx.index.get(id).is_some_and(|n| &n.node_type == target_type))
                    .collect();
                if targets.is_empty() {
                    targets = others(ctx.index.by_name_type(qualifier, target_type), node);
                }
                if let [target] = targets.as_slice() {
                    out.push(candidate(
                        &node.id,
                        predicate,
                        target,
                        Confidence::Medium,
                        EdgeReason::InferredNaming,
                        Strategy::NamingConvention,
                        format!("`{leaf}` carries {target_type} qualifier `{qualifier}`"),
                    ));
                }
            }
        }
    }
    out
}

/// Ownership/grouping labels the source data states explicitly.
pub fn metadata_labels(ctx: &LinkContext<'_>, node: &Node) -> Vec<CandidateEdge> {
    let mut out = Vec::new();
    for attr in &ctx.config.linker.label_attributes {
        let Some(labels) = node.attributes.get(attr).and_then(|v| v.as_map()) else {
            continue;
        };
        for rule in &ctx.config.linker.label_rules {
            let Some(value) = labels.get(&rule.key).and_then(|v| v.render_scalar()) else {
                continue;
            };
            if value.trim().is_empty() {
                continue;
            }
            let by_name = match rule.target_type.as_deref() {
                Some(t) => ctx.index.by_name_type(&value, t),
                None => ctx.index.by_name(&value),
            };
            let mut targets = others(by_name, node);
            if targets.is_empty() {
                targets = others(ctx.index.by_leaf(&normalize_identifier(&value)), node)
                    .into_iter()
                    .filter(|id| {
                        rule.target_type
                            .as_deref()
                            .map_or(true, |t| ctx.index.get(id).is_some_and(|n| n.node_type == t))
                    })
                    .collect();
            }
            let [target] = targets.as_slice() else {
                continue;
            };
            let (source, dest) = match rule.direction {
                LinkDirection::Inbound => (*target, &node.id),
                LinkDirection::Outbound => (&node.id, *target),
            };
            out.push(candidate(
                source,
                &rule.predicate,
                dest,
                Confidence::High,
                EdgeReason::InferredMetadata,
                Strategy::MetadataLabel,
                format!("{attr}.{} = `{value}`", rule.key),
            ));
        }
    }
    out
}

/// Origins repeatedly changed together.
pub fn co_occurrence(ctx: &LinkContext<'_>, node: &Node) -> Vec<CandidateEdge> {
    if !ctx.config.linker.co_occurrence {
        return Vec::new();
    }
    let Some(origin) = node.origin.as_deref() else {
        return Vec::new();
    };
    let own = origin_key(origin);
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for set in ctx.change_sets {
        let keys: Vec<String> = set.iter().map(|o| origin_key(o)).collect();
        if !keys.contains(&own) {
            continue;
        }
        for key in keys.into_iter().filter(|k| *k != own) {
            *counts.entry(key).or_default() += 1;
        }
    }

    let min = ctx.config.linker.min_co_changes;
    let mut out = Vec::new();
    for (other, count) in counts {
        if count < min {
            continue;
        }
        let Some(target) = ctx.index.lookup_origin(&other) else {
            continue;
        };
        if *target == node.id {
            continue;
        }
        out.push(candidate(
            &node.id,
            &ctx.config.linker.co_occurrence_predicate,
            target,
            Confidence::Medium,
            EdgeReason::InferredMetadata,
            Strategy::CoOccurrence,
            format!("changed together with `{other}` {count} times"),
        ));
    }
    out
}
