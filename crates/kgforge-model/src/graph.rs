//! Nodes, edges and pending references.

use crate::identifier::NodeId;
use crate::value::Attributes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Node type used for repair-mode placeholders.
pub const UNRESOLVED_REFERENCE_TYPE: &str = "UnresolvedReference";

/// How a node's identity (or an edge) was obtained.
///
/// Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeReason {
    Explicit,
    InferredPath,
    InferredNaming,
    InferredMetadata,
    BidirectionalGenerated,
}

impl EdgeReason {
    /// Strength used when the same edge is produced twice.
    fn strength(self) -> u8 {
        match self {
            EdgeReason::Explicit => 4,
            EdgeReason::InferredMetadata => 3,
            EdgeReason::InferredPath => 2,
            EdgeReason::InferredNaming => 1,
            EdgeReason::BidirectionalGenerated => 0,
        }
    }
}

impl fmt::Display for EdgeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EdgeReason::Explicit => "explicit",
            EdgeReason::InferredPath => "inferred-path",
            EdgeReason::InferredNaming => "inferred-naming",
            EdgeReason::InferredMetadata => "inferred-metadata",
            EdgeReason::BidirectionalGenerated => "bidirectional-generated",
        })
    }
}

// ============================================================================
// Node
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    pub attributes: Attributes,
    /// Provenance token (e.g. source path). Not part of identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub confidence: Confidence,
    /// Digest of the source record; breaks ties in canonical batch order.
    #[serde(skip)]
    pub source_digest: String,
}

impl Node {
    pub fn is_placeholder(&self) -> bool {
        self.node_type == UNRESOLVED_REFERENCE_TYPE
    }

    /// Total precedence order used for merges: `Less` means `self` wins.
    ///
    /// Higher confidence first, then canonical batch position
    /// (origin, source digest), then id.
    pub fn precedence_cmp(&self, other: &Node) -> Ordering {
        other
            .confidence
            .cmp(&self.confidence)
            .then_with(|| {
                self.origin
                    .as_deref()
                    .unwrap_or("")
                    .cmp(other.origin.as_deref().unwrap_or(""))
            })
            .then_with(|| self.source_digest.cmp(&other.source_digest))
            .then_with(|| self.id.cmp(&other.id))
    }
}

// ============================================================================
// Edge
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Edge {
    #[serde(rename = "sourceId")]
    pub source: NodeId,
    pub predicate: String,
    #[serde(rename = "targetId")]
    pub target: NodeId,
    pub confidence: Confidence,
    pub reason: EdgeReason,
}

impl Edge {
    pub fn new(
        source: NodeId,
        predicate: impl Into<String>,
        target: NodeId,
        confidence: Confidence,
        reason: EdgeReason,
    ) -> Self {
        Self {
            source,
            predicate: predicate.into(),
            target,
            confidence,
            reason,
        }
    }

    pub fn key(&self) -> (&NodeId, &str, &NodeId) {
        (&self.source, &self.predicate, &self.target)
    }

    pub fn touches(&self, id: &NodeId) -> bool {
        &self.source == id || &self.target == id
    }

    /// Fold a duplicate of this edge in: the stronger confidence and reason win.
    pub fn absorb(&mut self, other: &Edge) {
        self.confidence = self.confidence.max(other.confidence);
        if other.reason.strength() > self.reason.strength() {
            self.reason = other.reason;
        }
    }
}

/// Collapse edges sharing `(source, predicate, target)` and sort by that key.
pub fn dedup_edges(edges: impl IntoIterator<Item = Edge>) -> Vec<Edge> {
    let mut by_key: BTreeMap<(NodeId, String, NodeId), Edge> = BTreeMap::new();
    for edge in edges {
        let key = (edge.source.clone(), edge.predicate.clone(), edge.target.clone());
        match by_key.get_mut(&key) {
            Some(existing) => existing.absorb(&edge),
            None => {
                by_key.insert(key, edge);
            }
        }
    }
    by_key.into_values().collect()
}

// ============================================================================
// Reference descriptors
// ============================================================================

/// The raw, unresolved form of a cross-reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RawReference {
    /// An id-looking string (`kg:team:platform`, `svc:foo`).
    Identifier(String),
    /// A path-like string (`./b`, `/teams/platform`, `parent#field`).
    Path(String),
    /// A plain token from a registered reference field (`"platform-team"`).
    Name(String),
    /// An inline object carrying identifying fields, optionally with a marker.
    Inline {
        marker: Option<String>,
        fields: BTreeMap<String, serde_json::Value>,
    },
}

impl RawReference {
    /// Human-readable form for reports and placeholders.
    pub fn display_text(&self) -> String {
        match self {
            RawReference::Identifier(s) | RawReference::Path(s) | RawReference::Name(s) => {
                s.clone()
            }
            RawReference::Inline { marker, fields } => {
                if let Some(m) = marker {
                    return m.clone();
                }
                for key in ["id", "@id", "name", "title"] {
                    if let Some(serde_json::Value::String(s)) = fields.get(key) {
                        return s.clone();
                    }
                }
                serde_json::to_string(fields).unwrap_or_default()
            }
        }
    }
}

impl fmt::Display for RawReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_text())
    }
}

/// An unresolved cross-reference found on a node while it was built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceDescriptor {
    pub field_name: String,
    pub predicate: String,
    pub raw_value: RawReference,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_type_hint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> NodeId {
        NodeId::parse(s, "kg").unwrap()
    }

    fn node(id_str: &str, confidence: Confidence, origin: &str) -> Node {
        Node {
            id: id(id_str),
            node_type: "Service".into(),
            name: "x".into(),
            attributes: Attributes::new(),
            origin: Some(origin.into()),
            confidence,
            source_digest: String::new(),
        }
    }

    #[test]
    fn precedence_prefers_confidence_then_origin() {
        let a = node("kg:service:a", Confidence::Medium, "/a");
        let b = node("kg:service:b", Confidence::High, "/b");
        let c = node("kg:service:c", Confidence::Medium, "/c");
        assert_eq!(b.precedence_cmp(&a), Ordering::Less);
        assert_eq!(a.precedence_cmp(&c), Ordering::Less);
        assert_eq!(c.precedence_cmp(&a), Ordering::Greater);
    }

    #[test]
    fn dedup_keeps_strongest_reason_and_confidence() {
        let a = id("kg:service:a");
        let b = id("kg:service:b");
        let edges = vec![
            Edge::new(b.clone(), "requiredBy", a.clone(), Confidence::Medium, EdgeReason::BidirectionalGenerated),
            Edge::new(b.clone(), "requiredBy", a.clone(), Confidence::High, EdgeReason::Explicit),
            Edge::new(a.clone(), "dependsOn", b.clone(), Confidence::High, EdgeReason::Explicit),
        ];
        let out = dedup_edges(edges);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].source, a);
        assert_eq!(out[1].reason, EdgeReason::Explicit);
        assert_eq!(out[1].confidence, Confidence::High);
    }

    #[test]
    fn inline_reference_display_prefers_marker_then_name() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), serde_json::json!("platform"));
        let r = RawReference::Inline { marker: None, fields: fields.clone() };
        assert_eq!(r.display_text(), "platform");
        let r = RawReference::Inline { marker: Some("./p".into()), fields };
        assert_eq!(r.display_text(), "./p");
    }
}
