//! Entity Index: single-writer merge, then frozen for many readers.
//!
//! [`IndexBuilder`] is fed built nodes in canonical batch order. A node whose
//! id is already present is queued as a duplicate for the deduplicator,
//! never overwritten. [`IndexBuilder::freeze`] builds the secondary indices
//! and detaches pending references, which never live on indexed nodes.

use crate::config::DedupConfig;
use crate::naming::{looks_like_file, normalize_name_key, normalize_path, split_fragment, strip_extension};
use kgforge_model::{Node, NodeId, ReferenceDescriptor};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// References found on one node, waiting for resolution.
#[derive(Debug, Clone)]
pub struct PendingNode {
    pub source: NodeId,
    pub origin: Option<String>,
    pub references: Vec<ReferenceDescriptor>,
}

/// `(type scope, key, normalized value)`; the scope is empty when identity
/// keys are not scoped by type.
pub type IdentityKey = (String, String, String);

/// Canonical lookup form of an origin token.
pub fn origin_key(origin: &str) -> String {
    let (path, fragment) = split_fragment(origin);
    let path = if path.starts_with('/') || path.starts_with('.') {
        normalize_path(path)
    } else {
        path.to_string()
    };
    match fragment {
        Some(f) => format!("{path}#{f}"),
        None => path,
    }
}

pub fn identity_value(node: &Node, key: &str) -> Option<String> {
    let text = node.attributes.get(key)?.render_scalar()?;
    let normalized = text.trim().to_lowercase();
    (!normalized.is_empty()).then_some(normalized)
}

#[derive(Debug, Default)]
pub struct IndexBuilder {
    nodes: BTreeMap<NodeId, Node>,
    duplicates: Vec<Node>,
    pending: Vec<PendingNode>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: Node, references: Vec<ReferenceDescriptor>) {
        if !references.is_empty() {
            self.pending.push(PendingNode {
                source: node.id.clone(),
                origin: node.origin.clone(),
                references,
            });
        }
        match self.nodes.entry(node.id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(node);
            }
            Entry::Occupied(_) => {
                tracing::debug!(id = %node.id, origin = ?node.origin, "queued duplicate identifier");
                self.duplicates.push(node);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn freeze(self, dedup: &DedupConfig) -> (EntityIndex, Vec<PendingNode>) {
        let mut by_origin: BTreeMap<String, NodeId> = BTreeMap::new();
        let mut origin_aliases: BTreeMap<String, NodeId> = BTreeMap::new();
        let mut by_name_type: BTreeMap<(String, String), Vec<NodeId>> = BTreeMap::new();
        let mut by_name: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
        let mut by_leaf: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
        let mut by_identity_key: BTreeMap<IdentityKey, Vec<NodeId>> = BTreeMap::new();

        for node in self.nodes.values().chain(self.duplicates.iter()) {
            if let Some(origin) = node.origin.as_deref() {
                let key = origin_key(origin);
                let stem_alias = {
                    let (path, fragment) = split_fragment(&key);
                    match (path.rsplit_once('/'), fragment) {
                        (Some((dir, file)), None) if looks_like_file(file) => {
                            Some(format!("{dir}/{}", strip_extension(file)))
                        }
                        _ => None,
                    }
                };
                by_origin.entry(key).or_insert_with(|| node.id.clone());
                if let Some(alias) = stem_alias {
                    origin_aliases.entry(alias).or_insert_with(|| node.id.clone());
                }
            }

            let name_key = normalize_name_key(&node.name);
            push_unique(
                by_name_type
                    .entry((name_key.clone(), node.node_type.to_lowercase()))
                    .or_default(),
                &node.id,
            );
            push_unique(by_name.entry(name_key).or_default(), &node.id);
            push_unique(by_leaf.entry(node.id.leaf().to_string()).or_default(), &node.id);
            if node.id.leaf() != node.id.last_segment() {
                push_unique(by_leaf.entry(node.id.last_segment().to_string()).or_default(), &node.id);
            }

            for key in &dedup.identity_keys {
                if let Some(value) = identity_value(node, key) {
                    let scope = if dedup.scope_by_type {
                        node.node_type.clone()
                    } else {
                        String::new()
                    };
                    push_unique(by_identity_key.entry((scope, key.clone(), value)).or_default(), &node.id);
                }
            }
        }

        tracing::info!(
            nodes = self.nodes.len(),
            duplicates = self.duplicates.len(),
            pending = self.pending.len(),
            "entity index frozen"
        );
        let index = EntityIndex {
            nodes: self.nodes,
            duplicates: self.duplicates,
            by_origin,
            origin_aliases,
            by_name_type,
            by_name,
            by_leaf,
            by_identity_key,
        };
        (index, self.pending)
    }
}

fn push_unique(ids: &mut Vec<NodeId>, id: &NodeId) {
    if !ids.contains(id) {
        ids.push(id.clone());
        ids.sort();
    }
}

/// Read-only after [`IndexBuilder::freeze`].
#[derive(Debug, Default)]
pub struct EntityIndex {
    nodes: BTreeMap<NodeId, Node>,
    duplicates: Vec<Node>,
    by_origin: BTreeMap<String, NodeId>,
    origin_aliases: BTreeMap<String, NodeId>,
    by_name_type: BTreeMap<(String, String), Vec<NodeId>>,
    by_name: BTreeMap<String, Vec<NodeId>>,
    by_leaf: BTreeMap<String, Vec<NodeId>>,
    by_identity_key: BTreeMap<IdentityKey, Vec<NodeId>>,
}

impl EntityIndex {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Look up by raw identifier text without constructing a `NodeId`.
    pub fn get_str(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn duplicates(&self) -> &[Node] {
        &self.duplicates
    }

    /// Exact (normalized) origin first, then the origin with its file
    /// extension stripped.
    pub fn lookup_origin(&self, origin: &str) -> Option<&NodeId> {
        let key = origin_key(origin);
        self.by_origin
            .get(&key)
            .or_else(|| self.origin_aliases.get(&key))
    }

    pub fn by_name_type(&self, name: &str, node_type: &str) -> &[NodeId] {
        self.by_name_type
            .get(&(normalize_name_key(name), node_type.to_lowercase()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn by_name(&self, name: &str) -> &[NodeId] {
        self.by_name
            .get(&normalize_name_key(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Nodes whose id ends in `segment` (last segment or its last `/` component).
    pub fn by_leaf(&self, segment: &str) -> &[NodeId] {
        self.by_leaf.get(segment).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Identity-key groups naming more than one distinct id.
    pub fn identity_groups(&self) -> impl Iterator<Item = (&IdentityKey, &Vec<NodeId>)> {
        self.by_identity_key.iter().filter(|(_, ids)| ids.len() > 1)
    }

    /// Tear down into the canonical node map and the duplicate queue.
    pub fn into_parts(self) -> (BTreeMap<NodeId, Node>, Vec<Node>) {
        (self.nodes, self.duplicates)
    }
}
