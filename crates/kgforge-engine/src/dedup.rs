//! Deduplicator: collapses nodes sharing an id or a declared identity key.
//!
//! The surviving node is chosen by [`Node::precedence_cmp`], which depends
//! only on the nodes themselves, so a pairwise merge is commutative. Groups
//! are always folded in precedence order ([`merge_group`]), so the outcome
//! does not depend on the order or grouping in which duplicates arrive.
//!
//! Merge rule per attribute:
//! - missing or null on the survivor: adopt the other value;
//! - both maps: merge recursively;
//! - both sequences: concatenate, keep first occurrences;
//! - otherwise unequal: keep the survivor's value, record a [`MergeConflict`].

use crate::index::{EntityIndex, IdentityKey};
use kgforge_model::{dedup_edges, Attributes, Edge, Node, NodeId, Value};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeConflict {
    pub canonical: NodeId,
    pub merged: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_origin: Option<String>,
    /// Dotted path for nested attributes (`database.engine`).
    pub attribute: String,
    pub kept: Value,
    pub discarded: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeTrigger {
    DuplicateId,
    IdentityKey { key: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeRecord {
    pub canonical: NodeId,
    pub absorbed: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absorbed_origin: Option<String>,
    pub trigger: MergeTrigger,
}

#[derive(Debug, Clone)]
pub struct MergedNode {
    pub node: Node,
    pub absorbed_id: NodeId,
    pub absorbed_origin: Option<String>,
    pub conflicts: Vec<MergeConflict>,
}

/// Merge two nodes; the higher-precedence one survives.
pub fn merge_nodes(a: Node, b: Node) -> MergedNode {
    let (mut winner, loser) = if a.precedence_cmp(&b).is_le() { (a, b) } else { (b, a) };
    let mut conflicts = Vec::new();
    let mut record = |attribute: String, kept: Value, discarded: Value| {
        conflicts.push((attribute, kept, discarded));
    };

    if winner.node_type != loser.node_type {
        record("type".into(), Value::text(winner.node_type.clone()), Value::text(loser.node_type.clone()));
    }
    if winner.name != loser.name {
        record("name".into(), Value::text(winner.name.clone()), Value::text(loser.name.clone()));
    }
    merge_attributes(&mut winner.attributes, loser.attributes, "", &mut record);
    winner.confidence = winner.confidence.max(loser.confidence);

    let conflicts = conflicts
        .into_iter()
        .map(|(attribute, kept, discarded)| MergeConflict {
            canonical: winner.id.clone(),
            merged: loser.id.clone(),
            merged_origin: loser.origin.clone(),
            attribute,
            kept,
            discarded,
        })
        .collect();

    MergedNode {
        node: winner,
        absorbed_id: loser.id,
        absorbed_origin: loser.origin,
        conflicts,
    }
}

/// Result of collapsing a group of nodes into one.
#[derive(Debug, Clone)]
pub struct GroupMerge {
    pub node: Node,
    /// `(id, origin)` of every node folded into the survivor.
    pub absorbed: Vec<(NodeId, Option<String>)>,
    pub conflicts: Vec<MergeConflict>,
}

/// Fold `nodes` highest precedence first. `None` for an empty group.
pub fn merge_group(mut nodes: Vec<Node>) -> Option<GroupMerge> {
    nodes.sort_by(|a, b| a.precedence_cmp(b));
    let mut iter = nodes.into_iter();
    let mut node = iter.next()?;
    let mut absorbed = Vec::new();
    let mut conflicts = Vec::new();
    for other in iter {
        let merged = merge_nodes(node, other);
        absorbed.push((merged.absorbed_id, merged.absorbed_origin));
        conflicts.extend(merged.conflicts);
        node = merged.node;
    }
    Some(GroupMerge {
        node,
        absorbed,
        conflicts,
    })
}

fn merge_attributes<F>(into: &mut Attributes, from: Attributes, prefix: &str, record: &mut F)
where
    F: FnMut(String, Value, Value),
{
    for (key, incoming) in from {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match into.get_mut(&key) {
            None => {
                into.insert(key, incoming);
            }
            Some(existing) if existing.is_null() => {
                *existing = incoming;
            }
            Some(existing) => merge_value(existing, incoming, &path, record),
        }
    }
}

fn merge_value<F>(existing: &mut Value, incoming: Value, path: &str, record: &mut F)
where
    F: FnMut(String, Value, Value),
{
    match (existing, incoming) {
        (_, incoming) if incoming.is_null() => {}
        (Value::Map(into), Value::Map(from)) => merge_attributes(into, from, path, record),
        (Value::Sequence(into), Value::Sequence(from)) => {
            for item in from {
                if !into.contains(&item) {
                    into.push(item);
                }
            }
        }
        (existing, incoming) => {
            if *existing != incoming {
                record(path.to_string(), existing.clone(), incoming);
            }
        }
    }
}

// ============================================================================
// Batch deduplication
// ============================================================================

#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub nodes: BTreeMap<NodeId, Node>,
    pub edges: Vec<Edge>,
    pub merges: Vec<MergeRecord>,
    pub conflicts: Vec<MergeConflict>,
    /// Absorbed id → canonical id (identity-key merges only).
    pub redirects: BTreeMap<NodeId, NodeId>,
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // smaller index as root keeps components deterministic
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// Merge duplicate ids, then identity-key groups, and rewrite edge endpoints.
pub fn deduplicate(index: EntityIndex, edges: Vec<Edge>) -> DedupOutcome {
    let groups: Vec<(IdentityKey, Vec<NodeId>)> = index
        .identity_groups()
        .map(|(k, ids)| (k.clone(), ids.clone()))
        .collect();
    let (mut nodes, duplicates) = index.into_parts();
    let mut out = DedupOutcome::default();

    // (a) identical identifiers
    let mut queued: BTreeMap<NodeId, Vec<Node>> = BTreeMap::new();
    for dup in duplicates {
        queued.entry(dup.id.clone()).or_default().push(dup);
    }
    for (id, mut group) in queued {
        if let Some(existing) = nodes.remove(&id) {
            group.push(existing);
        }
        let Some(merged) = merge_group(group) else {
            continue;
        };
        for (absorbed, absorbed_origin) in merged.absorbed {
            out.merges.push(MergeRecord {
                canonical: merged.node.id.clone(),
                absorbed,
                absorbed_origin,
                trigger: MergeTrigger::DuplicateId,
            });
        }
        out.conflicts.extend(merged.conflicts);
        nodes.insert(merged.node.id.clone(), merged.node);
    }

    // (b) shared identity keys, collapsed transitively
    let members: Vec<NodeId> = {
        let mut ids: Vec<NodeId> = groups.iter().flat_map(|(_, ids)| ids.iter().cloned()).collect();
        ids.sort();
        ids.dedup();
        ids
    };
    let position = |id: &NodeId| members.binary_search(id).ok();
    let mut uf = UnionFind::new(members.len());
    for (_, ids) in &groups {
        let positions: Vec<usize> = ids.iter().filter_map(|id| position(id)).collect();
        for pair in positions.windows(2) {
            uf.union(pair[0], pair[1]);
        }
    }
    let mut components: BTreeMap<usize, Vec<NodeId>> = BTreeMap::new();
    for (i, id) in members.iter().enumerate() {
        let root = uf.find(i);
        components.entry(root).or_default().push(id.clone());
    }

    for ids in components.into_values().filter(|ids| ids.len() > 1) {
        let group: Vec<Node> = ids.iter().filter_map(|id| nodes.remove(id)).collect();
        let Some(merged) = merge_group(group) else {
            continue;
        };
        let canonical = merged.node.id.clone();
        for (absorbed, absorbed_origin) in merged.absorbed {
            let trigger = groups
                .iter()
                .find(|(_, g)| g.contains(&absorbed))
                .map(|((_, key, value), _)| MergeTrigger::IdentityKey {
                    key: key.clone(),
                    value: value.clone(),
                })
                .unwrap_or(MergeTrigger::DuplicateId);
            out.redirects.insert(absorbed.clone(), canonical.clone());
            out.merges.push(MergeRecord {
                canonical: canonical.clone(),
                absorbed,
                absorbed_origin,
                trigger,
            });
        }
        out.conflicts.extend(merged.conflicts);
        nodes.insert(canonical, merged.node);
    }

    // Edge endpoints follow their node into the canonical id. An edge between
    // two merged nodes becomes a self loop and is kept.
    let rewritten: Vec<Edge> = edges
        .into_iter()
        .map(|mut edge| {
            if let Some(to) = out.redirects.get(&edge.source) {
                edge.source = to.clone();
            }
            if let Some(to) = out.redirects.get(&edge.target) {
                edge.target = to.clone();
            }
            edge
        })
        .collect();
    out.edges = dedup_edges(rewritten);

    for c in &out.conflicts {
        tracing::warn!(
            canonical = %c.canonical,
            merged = %c.merged,
            attribute = %c.attribute,
            "merge conflict; canonical value kept"
        );
    }
    out.conflicts
        .sort_by(|a, b| (&a.canonical, &a.attribute, &a.merged_origin).cmp(&(&b.canonical, &b.attribute, &b.merged_origin)));
    out.merges.sort_by(|a, b| {
        (&a.canonical, &a.absorbed, &a.absorbed_origin, &a.trigger)
            .cmp(&(&b.canonical, &b.absorbed, &b.absorbed_origin, &b.trigger))
    });
    out.nodes = nodes;

    tracing::info!(
        nodes = out.nodes.len(),
        merges = out.merges.len(),
        conflicts = out.conflicts.len(),
        edges = out.edges.len(),
        "deduplication finished"
    );
    out
}
