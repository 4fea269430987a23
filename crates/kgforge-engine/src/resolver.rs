//! Reference Resolver: pending references + frozen index → edges.
//!
//! Per descriptor, in order:
//! 1. the raw value is an identifier present in the index (High);
//! 2. the raw value is an origin path known to the index (High);
//! 3. up to N alternative identifiers derived from the raw value (Medium);
//! 4. a single fuzzy `(name, type)` match when a type hint exists (Low);
//! 5. otherwise a [`BrokenReference`].
//!
//! Resolution is a pure read of the index, so nodes resolve in parallel and
//! the per-node results are merged afterwards in one sequential step.

use crate::config::{EngineConfig, FuzzyTiePolicy};
use crate::index::{EntityIndex, PendingNode};
use crate::naming::{join_path, normalize_path, parent_dir, split_fragment, strip_extension};
use kgforge_model::{
    dedup_edges, is_canonical_text, is_well_formed, normalize_identifier, Confidence, Edge, EdgeReason, NodeId, RawReference,
    ReferenceDescriptor,
};
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BrokenReason {
    NotFound,
    Ambiguous,
}

impl fmt::Display for BrokenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BrokenReason::NotFound => "not-found",
            BrokenReason::Ambiguous => "ambiguous",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrokenReference {
    pub source: NodeId,
    pub field: String,
    pub predicate: String,
    pub raw_value: RawReference,
    pub reason: BrokenReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_type_hint: Option<String>,
}

impl BrokenReference {
    pub fn sort_key(&self) -> (NodeId, String, String, String) {
        (
            self.source.clone(),
            self.field.clone(),
            self.predicate.clone(),
            self.raw_value.display_text(),
        )
    }
}

pub fn sort_broken(broken: &mut [BrokenReference]) {
    broken.sort_by_cached_key(BrokenReference::sort_key);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(NodeId, Confidence),
    NotFound,
    Ambiguous,
}

#[derive(Debug, Default)]
pub struct ResolutionOutcome {
    pub edges: Vec<Edge>,
    pub broken: Vec<BrokenReference>,
}

/// The textual forms of one raw reference.
#[derive(Debug, Default)]
struct Probe {
    identifier: Option<String>,
    path: Option<String>,
    token: Option<String>,
}

pub struct ReferenceResolver<'a> {
    index: &'a EntityIndex,
    config: &'a EngineConfig,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(index: &'a EntityIndex, config: &'a EngineConfig) -> Self {
        Self { index, config }
    }

    fn scheme(&self) -> &str {
        self.config.scheme()
    }

    pub fn resolve_all(&self, pending: &[PendingNode]) -> ResolutionOutcome {
        let per_node: Vec<ResolutionOutcome> = pending.par_iter().map(|p| self.resolve_node(p)).collect();

        let mut edges = Vec::new();
        let mut broken = Vec::new();
        for outcome in per_node {
            edges.extend(outcome.edges);
            broken.extend(outcome.broken);
        }
        let edges = dedup_edges(edges);
        sort_broken(&mut broken);
        tracing::info!(edges = edges.len(), broken = broken.len(), "references resolved");
        ResolutionOutcome { edges, broken }
    }

    pub fn resolve_node(&self, pending: &PendingNode) -> ResolutionOutcome {
        let mut out = ResolutionOutcome::default();
        for descriptor in &pending.references {
            let resolution = self.resolve(pending, descriptor);
            tracing::debug!(
                source = %pending.source,
                field = %descriptor.field_name,
                raw = %descriptor.raw_value,
                resolution = ?resolution,
                "resolved reference"
            );
            let reason = match resolution {
                Resolution::Found(target, confidence) => {
                    out.edges.extend(self.materialize(&pending.source, &descriptor.predicate, target, confidence));
                    continue;
                }
                Resolution::NotFound => BrokenReason::NotFound,
                Resolution::Ambiguous => BrokenReason::Ambiguous,
            };
            tracing::warn!(
                source = %pending.source,
                field = %descriptor.field_name,
                raw = %descriptor.raw_value,
                reason = %reason,
                "broken reference"
            );
            out.broken.push(BrokenReference {
                source: pending.source.clone(),
                field: descriptor.field_name.clone(),
                predicate: descriptor.predicate.clone(),
                raw_value: descriptor.raw_value.clone(),
                reason,
                target_type_hint: descriptor.target_type_hint.clone(),
            });
        }
        out
    }

    /// Forward edge plus the registered inverse, if any.
    pub fn materialize(
        &self,
        source: &NodeId,
        predicate: &str,
        target: NodeId,
        confidence: Confidence,
    ) -> Vec<Edge> {
        let mut edges = Vec::with_capacity(2);
        if let Some(inverse) = self.config.inverse_of(predicate) {
            edges.push(Edge::new(
                target.clone(),
                inverse,
                source.clone(),
                confidence,
                EdgeReason::BidirectionalGenerated,
            ));
        }
        edges.push(Edge::new(source.clone(), predicate, target, confidence, EdgeReason::Explicit));
        edges
    }

    pub fn resolve(&self, pending: &PendingNode, descriptor: &ReferenceDescriptor) -> Resolution {
        let probe = self.probe(&descriptor.raw_value);

        if let Some(id) = probe.identifier.as_deref().and_then(|raw| self.lookup_identifier(raw)) {
            return Resolution::Found(id, Confidence::High);
        }
        if let Some(path) = probe.path.as_deref() {
            if let Some(id) = self.lookup_path(pending.origin.as_deref(), path) {
                return Resolution::Found(id, Confidence::High);
            }
        }

        let hint = descriptor.target_type_hint.as_deref();
        let seed = probe.identifier.as_deref().or(probe.token.as_deref());
        if let Some(seed) = seed {
            let mut hits: Vec<NodeId> = self
                .alternatives(seed, hint)
                .into_iter()
                .filter_map(|alt| NodeId::from_canonical(&alt, self.scheme()).ok())
                .filter(|id| self.index.contains(id))
                .collect();
            hits.sort();
            hits.dedup();
            match hits.len() {
                0 => {}
                1 => {
                    if let Some(id) = hits.pop() {
                        return Resolution::Found(id, Confidence::Medium);
                    }
                }
                _ => return Resolution::Ambiguous,
            }
        }

        match (hint, probe.token.as_deref()) {
            (Some(hint), Some(token)) if self.config.resolver.fuzzy_matching => self.fuzzy(token, hint),
            _ => Resolution::NotFound,
        }
    }

    fn probe(&self, raw: &RawReference) -> Probe {
        match raw {
            RawReference::Identifier(s) => Probe {
                identifier: Some(s.clone()),
                path: None,
                token: Some(s.rsplit(':').next().unwrap_or(s).to_string()),
            },
            RawReference::Path(p) => {
                let (path, fragment) = split_fragment(p);
                let last = fragment
                    .and_then(|f| f.rsplit('/').find(|s| !s.is_empty()))
                    .or_else(|| path.rsplit('/').find(|s| !s.is_empty() && *s != "." && *s != ".."));
                Probe {
                    identifier: None,
                    path: Some(p.clone()),
                    token: last.map(|s| strip_extension(s).to_string()),
                }
            }
            RawReference::Name(n) => Probe {
                identifier: n.contains(':').then(|| n.clone()),
                path: None,
                token: Some(n.clone()),
            },
            RawReference::Inline { marker, fields } => {
                if let Some(m) = marker {
                    let classified = if m.starts_with('/') || m.starts_with('.') {
                        RawReference::Path(m.clone())
                    } else {
                        RawReference::Identifier(m.clone())
                    };
                    return self.probe(&classified);
                }
                let text = |keys: &[String]| {
                    keys.iter().find_map(|k| match fields.get(k) {
                        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
                        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
                        _ => None,
                    })
                };
                let id = text(self.config.builder.id_fields.as_slice());
                let name = text(self.config.builder.name_fields.as_slice());
                Probe {
                    token: name.or_else(|| id.clone()),
                    identifier: id,
                    path: None,
                }
            }
        }
    }

    /// A canonical identifier is used directly; anything else is interpreted
    /// the way record ids are: scheme-prefixed as-is, otherwise with the
    /// scheme prefixed.
    fn lookup_identifier(&self, raw: &str) -> Option<NodeId> {
        let scheme = self.scheme();
        let raw = raw.trim();
        if is_well_formed(raw, scheme) {
            return self.index.get_str(raw).map(|n| n.id.clone());
        }
        let normalized = normalize_identifier(raw);
        let candidate = if normalized.starts_with(&format!("{scheme}:")) {
            normalized
        } else if normalized.contains(':') {
            format!("{scheme}:{normalized}")
        } else {
            return None;
        };
        let id = NodeId::from_canonical(&candidate, scheme).ok()?;
        self.index.contains(&id).then_some(id)
    }

    /// Relative paths resolve against the source's directory, then against
    /// the source origin itself.
    fn lookup_path(&self, source_origin: Option<&str>, path: &str) -> Option<NodeId> {
        let relative = path.starts_with("./") || path.starts_with("../");
        let mut candidates = Vec::new();
        match source_origin {
            Some(origin) if relative => {
                let (origin_path, _) = split_fragment(origin);
                candidates.push(join_path(&parent_dir(origin), path));
                candidates.push(join_path(&normalize_path(origin_path), path));
            }
            _ => candidates.push(path.to_string()),
        }
        candidates
            .iter()
            .find_map(|c| self.index.lookup_origin(c))
            .cloned()
    }

    /// Normalization variants of a slightly malformed identifier, capped at
    /// the configured budget.
    pub fn alternatives(&self, raw: &str, type_hint: Option<&str>) -> Vec<String> {
        let scheme = self.scheme();
        let prefix = format!("{scheme}:");
        let normalized = canonical_text(raw);
        let qualified = if normalized.starts_with(&prefix) {
            normalized.clone()
        } else {
            format!("{prefix}{normalized}")
        };
        let hint = type_hint.map(canonical_text);
        let segments: Vec<&str> = qualified.split(':').collect();
        let token = segments.last().copied().unwrap_or_default();

        let mut out: Vec<String> = Vec::new();
        let mut push = |s: String| {
            if !out.contains(&s) {
                out.push(s);
            }
        };

        push(qualified.clone());
        // separator swaps
        push(qualified.replace("%2E", "-"));
        push(qualified.replace('/', "-"));
        push(format!("{prefix}{}", segments[1..].join(":").replace('-', "")));
        if let Some(h) = hint.as_deref() {
            push(format!("{prefix}{h}:{token}"));
            push(format!("{prefix}{h}:{}", token.replace('/', "-")));
            if let Some(leaf) = token.rsplit('/').next() {
                push(format!("{prefix}{h}:{leaf}"));
            }
        }
        // dropped middle segment
        if segments.len() > 3 {
            for skip in 2..segments.len() - 1 {
                let kept: Vec<&str> = segments
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != skip)
                    .map(|(_, s)| *s)
                    .collect();
                push(kept.join(":"));
            }
        }
        // added middle segment
        if let Some(h) = hint.as_deref() {
            if segments.len() >= 3 && segments[1] != h {
                push(format!("{prefix}{h}:{}", segments[1..].join(":")));
            }
        }

        out.retain(|alt| alt != raw);
        out.truncate(self.config.resolver.max_alternatives);
        out
    }

    fn fuzzy(&self, token: &str, hint: &str) -> Resolution {
        let candidates = self.index.by_name_type(token, hint);
        match candidates {
            [] => Resolution::NotFound,
            [only] => Resolution::Found(only.clone(), Confidence::Low),
            many => match self.config.resolver.fuzzy_tie_policy {
                FuzzyTiePolicy::Reject => Resolution::Ambiguous,
                FuzzyTiePolicy::PreferHighestConfidence => {
                    let scored: Vec<(Confidence, &NodeId)> = many
                        .iter()
                        .filter_map(|id| self.index.get(id).map(|n| (n.confidence, id)))
                        .collect();
                    let best = scored.iter().map(|(c, _)| *c).max();
                    let top: Vec<&NodeId> = scored
                        .iter()
                        .filter(|(c, _)| Some(*c) == best)
                        .map(|(_, id)| *id)
                        .collect();
                    match top.as_slice() {
                        [winner] => Resolution::Found((*winner).clone(), Confidence::Low),
                        _ => Resolution::Ambiguous,
                    }
                }
            },
        }
    }
}

/// `raw` unchanged when it is already in canonical form, normalized otherwise.
fn canonical_text(raw: &str) -> String {
    let trimmed = raw.trim();
    if is_canonical_text(trimmed) {
        trimmed.to_string()
    } else {
        normalize_identifier(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DedupConfig;
    use crate::index::IndexBuilder;
    use kgforge_model::{Attributes, Node};

    fn node(id: &str, node_type: &str, name: &str, origin: Option<&str>, confidence: Confidence) -> Node {
        Node {
            id: NodeId::parse(id, "kg").unwrap(),
            node_type: node_type.into(),
            name: name.into(),
            attributes: Attributes::new(),
            origin: origin.map(str::to_string),
            confidence,
            source_digest: String::new(),
        }
    }

    fn descriptor(field: &str, predicate: &str, raw: RawReference, hint: Option<&str>) -> ReferenceDescriptor {
        ReferenceDescriptor {
            field_name: field.into(),
            predicate: predicate.into(),
            raw_value: raw,
            target_type_hint: hint.map(str::to_string),
        }
    }

    fn fixture() -> EntityIndex {
        let mut b = IndexBuilder::new();
        b.insert(node("kg:service:a", "Service", "A", Some("/services/a/service.json"), Confidence::High), Vec::new());
        b.insert(node("kg:service:b", "Service", "B", Some("/services/b/service.json"), Confidence::High), Vec::new());
        b.insert(node("kg:team:platform", "Team", "Platform", Some("/teams/platform"), Confidence::High), Vec::new());
        b.insert(node("kg:team:payments-core", "Team", "Payments", None, Confidence::High), Vec::new());
        b.insert(node("kg:env:prod-1", "Environment", "Production", None, Confidence::Medium), Vec::new());
        b.insert(node("kg:env:prod-2", "Environment", "Production", None, Confidence::Low), Vec::new());
        b.freeze(&DedupConfig::default()).0
    }

    fn pending(source: &str, origin: &str, refs: Vec<ReferenceDescriptor>) -> PendingNode {
        PendingNode {
            source: NodeId::parse(source, "kg").unwrap(),
            origin: Some(origin.into()),
            references: refs,
        }
    }

    #[test]
    fn identifier_and_relative_path_hits_are_high() {
        let cfg = EngineConfig::default();
        let index = fixture();
        let r = ReferenceResolver::new(&index, &cfg);
        let p = pending("kg:service:a", "/services/a/service.json", Vec::new());

        let d = descriptor("dependsOn", "dependsOn", RawReference::Identifier("kg:service:b".into()), None);
        assert_eq!(r.resolve(&p, &d), Resolution::Found(NodeId::parse("kg:service:b", "kg").unwrap(), Confidence::High));

        let d = descriptor("next", "next", RawReference::Path("../b/service.json".into()), None);
        assert!(matches!(r.resolve(&p, &d), Resolution::Found(_, Confidence::High)));
    }

    #[test]
    fn alternatives_are_medium_and_fuzzy_is_low() {
        let cfg = EngineConfig::default();
        let index = fixture();
        let r = ReferenceResolver::new(&index, &cfg);
        let p = pending("kg:service:a", "/services/a/service.json", Vec::new());

        let d = descriptor("team", "ownedBy", RawReference::Name("Platform".into()), Some("Team"));
        assert_eq!(
            r.resolve(&p, &d),
            Resolution::Found(NodeId::parse("kg:team:platform", "kg").unwrap(), Confidence::Medium)
        );

        let d = descriptor("team", "ownedBy", RawReference::Name("payments".into()), Some("Team"));
        assert_eq!(
            r.resolve(&p, &d),
            Resolution::Found(NodeId::parse("kg:team:payments-core", "kg").unwrap(), Confidence::Low)
        );
    }

    #[test]
    fn fuzzy_ties_follow_the_configured_policy() {
        let index = fixture();
        let p = pending("kg:service:a", "/services/a/service.json", Vec::new());
        let d = descriptor("environment", "deployedTo", RawReference::Name("production".into()), Some("Environment"));

        let cfg = EngineConfig::default();
        assert_eq!(ReferenceResolver::new(&index, &cfg).resolve(&p, &d), Resolution::Ambiguous);

        let mut cfg = EngineConfig::default();
        cfg.resolver.fuzzy_tie_policy = FuzzyTiePolicy::PreferHighestConfidence;
        assert_eq!(
            ReferenceResolver::new(&index, &cfg).resolve(&p, &d),
            Resolution::Found(NodeId::parse("kg:env:prod-1", "kg").unwrap(), Confidence::Low)
        );
    }

    #[test]
    fn resolve_all_materializes_inverses_and_reports_failures() {
        let cfg = EngineConfig::default();
        let index = fixture();
        let r = ReferenceResolver::new(&index, &cfg);
        let p = pending(
            "kg:service:a",
            "/services/a/service.json",
            vec![
                descriptor("dependsOn", "dependsOn", RawReference::Identifier("kg:service:b".into()), None),
                descriptor("dependsOn", "dependsOn", RawReference::Identifier("KG:Service:B".into()), None),
                descriptor("next", "next", RawReference::Path("./missing".into()), None),
                descriptor("me", "self", RawReference::Identifier("kg:service:a".into()), None),
            ],
        );
        let out = r.resolve_all(&[p]);
        assert_eq!(out.edges.len(), 3);
        assert!(out
            .edges
            .iter()
            .any(|e| e.predicate == "requiredBy" && e.reason == EdgeReason::BidirectionalGenerated));
        let reasons: Vec<_> = out.broken.iter().map(|b| b.reason).collect();
        assert_eq!(reasons, vec![BrokenReason::NotFound]);
    }

    #[test]
    fn self_references_become_plain_edges() {
        let cfg = EngineConfig::default();
        let index = fixture();
        let r = ReferenceResolver::new(&index, &cfg);
        let p = pending(
            "kg:service:a",
            "/services/a/service.json",
            vec![descriptor("partOf", "partOf", RawReference::Identifier("kg:service:a".into()), None)],
        );
        let out = r.resolve_all(&[p]);
        assert!(out.broken.is_empty());
        let a = NodeId::parse("kg:service:a", "kg").unwrap();
        assert!(out
            .edges
            .iter()
            .any(|e| e.source == a && e.target == a && e.predicate == "partOf" && e.reason == EdgeReason::Explicit));
        assert!(out.edges.iter().any(|e| e.predicate == "hasPart" && e.source == a && e.target == a));
    }

    #[test]
    fn dropped_middle_segment_resolves_at_medium() {
        let cfg = EngineConfig::default();
        let index = fixture();
        let r = ReferenceResolver::new(&index, &cfg);
        let p = pending("kg:service:b", "/services/b/service.json", Vec::new());

        let d = descriptor("dependsOn", "dependsOn", RawReference::Identifier("kg:service:team:a".into()), None);
        assert_eq!(
            r.resolve(&p, &d),
            Resolution::Found(NodeId::parse("kg:service:a", "kg").unwrap(), Confidence::Medium)
        );
    }

    #[test]
    fn added_middle_segment_uses_the_type_hint() {
        let cfg = EngineConfig::default();
        let mut b = IndexBuilder::new();
        b.insert(node("kg:team:platform:core", "Team", "Core", None, Confidence::High), Vec::new());
        b.insert(node("kg:service:a", "Service", "A", Some("/a"), Confidence::High), Vec::new());
        let index = b.freeze(&DedupConfig::default()).0;
        let r = ReferenceResolver::new(&index, &cfg);
        let p = pending("kg:service:a", "/a", Vec::new());

        let alts = r.alternatives("platform:core", Some("Team"));
        assert!(alts.contains(&"kg:team:platform:core".to_string()));

        let d = descriptor("team", "ownedBy", RawReference::Identifier("platform:core".into()), Some("Team"));
        assert_eq!(
            r.resolve(&p, &d),
            Resolution::Found(NodeId::parse("kg:team:platform:core", "kg").unwrap(), Confidence::Medium)
        );
    }

    #[test]
    fn canonical_escaped_identifiers_hit_directly() {
        let cfg = EngineConfig::default();
        let mut b = IndexBuilder::new();
        b.insert(node("kg:file:a.b", "File", "A", None, Confidence::High), Vec::new());
        let index = b.freeze(&DedupConfig::default()).0;
        let r = ReferenceResolver::new(&index, &cfg);
        let p = pending("kg:service:x", "/x", Vec::new());
        let target = NodeId::parse("kg:file:a.b", "kg").unwrap();
        assert_eq!(target.as_str(), "kg:file:a%2Eb");

        for raw in ["kg:file:a%2Eb", "kg:file:a.b"] {
            let d = descriptor("file", "uses", RawReference::Identifier(raw.into()), None);
            assert_eq!(r.resolve(&p, &d), Resolution::Found(target.clone(), Confidence::High));
        }
        let d = descriptor("file", "uses", RawReference::Identifier("kg:file:a%2eb".into()), None);
        assert_ne!(r.resolve(&p, &d), Resolution::Found(target, Confidence::High));
    }

    #[test]
    fn alternatives_respect_the_budget() {
        let mut cfg = EngineConfig::default();
        cfg.resolver.max_alternatives = 3;
        let index = fixture();
        let r = ReferenceResolver::new(&index, &cfg);
        let alts = r.alternatives("kg:service:a:b:c", Some("Service"));
        assert!(alts.len() <= 3);
        assert!(alts.iter().all(|a| a.starts_with("kg:")));
    }
}
