//! The flat graph document handed to downstream storage loaders.
//!
//! Nodes carry `id`, `type`, `name`, `attributes`; edges carry `sourceId`,
//! `predicate`, `targetId`. Both lists are sorted, so rendering the same graph
//! twice yields byte-identical output.

use crate::digest::fnv1a64_digest_bytes;
use crate::graph::{Edge, Node};
use crate::value::attributes_to_json;
use serde::Serialize;

pub const GRAPH_DOCUMENT_VERSION_V1: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    pub attributes: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeRecord {
    #[serde(rename = "sourceId")]
    pub source_id: String,
    pub predicate: String,
    #[serde(rename = "targetId")]
    pub target_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphDocument {
    pub version: u32,
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
}

impl GraphDocument {
    pub fn from_parts<'a>(
        nodes: impl IntoIterator<Item = &'a Node>,
        edges: impl IntoIterator<Item = &'a Edge>,
    ) -> Self {
        let mut nodes: Vec<NodeRecord> = nodes
            .into_iter()
            .map(|n| NodeRecord {
                id: n.id.to_string(),
                node_type: n.node_type.clone(),
                name: n.name.clone(),
                attributes: attributes_to_json(&n.attributes),
            })
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let mut edges: Vec<EdgeRecord> = edges
            .into_iter()
            .map(|e| EdgeRecord {
                source_id: e.source.to_string(),
                predicate: e.predicate.clone(),
                target_id: e.target.to_string(),
            })
            .collect();
        edges.sort_by(|a, b| {
            (&a.source_id, &a.predicate, &a.target_id).cmp(&(&b.source_id, &b.predicate, &b.target_id))
        });
        edges.dedup();

        Self {
            version: GRAPH_DOCUMENT_VERSION_V1,
            nodes,
            edges,
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Digest of the compact JSON rendering.
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        fnv1a64_digest_bytes(&bytes)
    }

    pub fn node(&self, id: &str) -> Option<&NodeRecord> {
        self.nodes
            .binary_search_by(|n| n.id.as_str().cmp(id))
            .ok()
            .map(|i| &self.nodes[i])
    }

    pub fn has_edge(&self, source: &str, predicate: &str, target: &str) -> bool {
        self.edges
            .iter()
            .any(|e| e.source_id == source && e.predicate == predicate && e.target_id == target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Confidence, EdgeReason};
    use crate::identifier::NodeId;
    use crate::value::{Attributes, Value};

    fn node(id: &str) -> Node {
        let mut attributes = Attributes::new();
        attributes.insert("tier".into(), Value::text("prod"));
        Node {
            id: NodeId::parse(id, "kg").unwrap(),
            node_type: "Service".into(),
            name: id.rsplit(':').next().unwrap().into(),
            attributes,
            origin: None,
            confidence: Confidence::High,
            source_digest: String::new(),
        }
    }

    #[test]
    fn document_is_sorted_and_stable() {
        let b = node("kg:service:b");
        let a = node("kg:service:a");
        let e = Edge::new(a.id.clone(), "dependsOn", b.id.clone(), Confidence::High, EdgeReason::Explicit);
        let d1 = GraphDocument::from_parts([&b, &a], [&e]);
        let d2 = GraphDocument::from_parts([&a, &b], [&e]);
        assert_eq!(d1.nodes[0].id, "kg:service:a");
        assert_eq!(d1.to_json_pretty().unwrap(), d2.to_json_pretty().unwrap());
        assert_eq!(d1.digest(), d2.digest());
        assert!(d1.has_edge("kg:service:a", "dependsOn", "kg:service:b"));
        assert_eq!(d1.node("kg:service:b").unwrap().attributes["tier"], "prod");
    }
}
