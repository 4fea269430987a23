//! Entity Builder: one candidate record → one node plus pending references.
//!
//! Identity fallbacks, in order:
//! - type: explicit field, id type segment, type hint, schema hint, origin
//!   directory, platform `kind` field;
//! - name: explicit field, id last segment, origin directory,
//!   `"{Type} ({identifier})"`, composite of discriminator fields.
//!
//! Rich nested objects are returned as child candidate records instead of
//! being flattened, and the parent gets a path reference to each child.

use crate::candidate::{CandidateRecord, FieldMap, RecordLoader};
use crate::config::{BuilderConfig, EngineConfig, ReferenceFieldRule};
use crate::error::RecordError;
use crate::naming::{
    is_opaque_segment, origin_directories, origin_name_segment, pascal_case,
    percent_decoded_title, singularize, strip_extension,
};
use kgforge_model::{
    is_well_formed, Attributes, Confidence, IdPattern, Node, NodeId, RawReference,
    ReferenceDescriptor, Value,
};
use serde_json::Value as Json;
use std::collections::BTreeMap;

/// Everything one record contributes to the batch.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub node: Node,
    pub references: Vec<ReferenceDescriptor>,
    /// Rich nested objects to be built in a later round.
    pub children: Vec<CandidateRecord>,
    pub fields_seen: usize,
    pub fields_consumed: usize,
}

pub struct EntityBuilder<'a> {
    config: &'a EngineConfig,
}

/// A raw identifier as given by the record, before the type is known.
enum RawId {
    Qualified(NodeId),
    Bare(String),
}

fn scalar_text(value: &Json) -> Option<String> {
    match value {
        Json::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Json::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_field<'f>(fields: &'f FieldMap, names: &'f [String]) -> Option<(&'f str, String)> {
    names
        .iter()
        .find_map(|k| fields.get(k).and_then(scalar_text).map(|v| (k.as_str(), v)))
}

impl<'a> EntityBuilder<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    fn rules(&self) -> &BuilderConfig {
        &self.config.builder
    }

    fn scheme(&self) -> &str {
        self.config.scheme()
    }

    pub fn build(
        &self,
        record: &CandidateRecord,
        loader: &dyn RecordLoader,
    ) -> Result<BuildOutcome, RecordError> {
        let display_origin = record.display_origin();
        let fields = record
            .resolve_fields(loader)
            .map_err(|err| RecordError::RecordLoad {
                origin: display_origin.clone(),
                message: format!("{err:#}"),
            })?;
        let rules = self.rules();
        let mut consumed: Vec<String> = Vec::new();

        // --- raw identifier -------------------------------------------------
        let raw_id = match first_field(&fields, &rules.id_fields) {
            Some((key, raw)) => {
                consumed.push(key.to_string());
                Some((raw.clone(), self.interpret_raw_id(&raw, &display_origin)?))
            }
            None => None,
        };
        let qualified = match &raw_id {
            Some((_, RawId::Qualified(id))) => Some(id),
            _ => None,
        };

        // --- type -------------------------------------------------------------
        let explicit_type = first_field(&fields, &rules.type_fields);
        let type_explicit = explicit_type.is_some();
        let node_type = match explicit_type {
            Some((key, t)) => {
                consumed.push(key.to_string());
                Some(t)
            }
            None => self.infer_type(record, qualified, &fields, &mut consumed),
        };

        // --- name -------------------------------------------------------------
        let explicit_name = first_field(&fields, &rules.name_fields);
        let name_explicit = explicit_name.is_some();
        let name = match explicit_name {
            Some((key, n)) => {
                consumed.push(key.to_string());
                Some(n)
            }
            None => self.infer_name(record, raw_id.as_ref(), qualified, node_type.as_deref(), &fields),
        };

        let (node_type, name) = match (node_type, name) {
            (Some(t), Some(n)) => (t, n),
            (t, n) => {
                let missing = match (t.is_none(), n.is_none()) {
                    (true, true) => "type and name",
                    (true, false) => "type",
                    _ => "name",
                };
                return Err(RecordError::UnidentifiableRecord {
                    origin: display_origin,
                    reason: format!("no {missing} could be established from fields, hints or origin"),
                });
            }
        };

        let confidence = match (type_explicit, name_explicit) {
            (true, true) => Confidence::High,
            (false, false) => Confidence::Low,
            _ => Confidence::Medium,
        };

        // --- identifier -------------------------------------------------------
        let id = match raw_id {
            Some((_, RawId::Qualified(id))) => id,
            Some((_, RawId::Bare(token))) => NodeId::from_segments(self.scheme(), &[&node_type, &token])
                .map_err(|source| RecordError::InvalidIdentifier {
                    origin: display_origin.clone(),
                    source,
                })?,
            None => self.derive_id(record, &node_type, &name, &fields, &display_origin)?,
        };

        // --- attributes, references, children ---------------------------------
        let parent_base = record.origin.clone().unwrap_or_else(|| id.to_string());
        let mut extracted = Extraction::default();
        let mut attributes = Attributes::new();
        for (key, value) in &fields {
            if consumed.iter().any(|c| c == key) {
                continue;
            }
            if rules.metadata_fields.iter().any(|m| m == key) {
                continue;
            }
            consumed.push(key.clone());
            if let Some(attr) = self.classify_field(key, value, &parent_base, record.depth, &mut extracted) {
                attributes.insert(key.clone(), attr);
            }
        }

        let node = Node {
            id,
            node_type,
            name,
            attributes,
            origin: record.origin.clone(),
            confidence,
            source_digest: record.digest(),
        };
        tracing::debug!(
            id = %node.id,
            confidence = %node.confidence,
            references = extracted.references.len(),
            children = extracted.children.len(),
            "built node"
        );

        Ok(BuildOutcome {
            node,
            references: extracted.references,
            children: extracted.children,
            fields_seen: fields.len(),
            fields_consumed: consumed.len(),
        })
    }

    fn interpret_raw_id(&self, raw: &str, origin: &str) -> Result<RawId, RecordError> {
        let scheme = self.scheme();
        let invalid = |source| RecordError::InvalidIdentifier {
            origin: origin.to_string(),
            source,
        };
        let lowered = raw.trim().to_lowercase();
        if lowered.starts_with(&format!("{scheme}:")) {
            return NodeId::parse(raw, scheme).map(RawId::Qualified).map_err(invalid);
        }
        if raw.contains(':') {
            return NodeId::parse(&format!("{scheme}:{raw}"), scheme)
                .map(RawId::Qualified)
                .map_err(invalid);
        }
        Ok(RawId::Bare(raw.to_string()))
    }

    fn infer_type(
        &self,
        record: &CandidateRecord,
        qualified: Option<&NodeId>,
        fields: &FieldMap,
        consumed: &mut Vec<String>,
    ) -> Option<String> {
        let rules = self.rules();
        if let Some(id) = qualified {
            return Some(pascal_case(id.type_segment()));
        }
        if let Some(hint) = record.type_hint.as_deref().filter(|h| !h.trim().is_empty()) {
            return Some(pascal_case(hint));
        }
        if let Some(schema) = record.schema_hint.as_deref() {
            let last = schema
                .rsplit(|c: char| c == '/' || c == '#')
                .find(|s| !s.is_empty())
                .map(strip_extension)
                .filter(|s| !s.is_empty());
            if let Some(s) = last {
                return Some(pascal_case(s));
            }
        }
        if let Some(origin) = record.origin.as_deref() {
            let from_dir = origin_directories(origin)
                .into_iter()
                .rev()
                .find_map(|seg| rules.origin_type_dirs.get(&seg.to_ascii_lowercase()));
            if let Some(t) = from_dir {
                return Some(t.clone());
            }
        }
        let (key, kind) = first_field(fields, &rules.kind_fields)?;
        consumed.push(key.to_string());
        Some(pascal_case(&kind))
    }

    fn infer_name(
        &self,
        record: &CandidateRecord,
        raw_id: Option<&(String, RawId)>,
        qualified: Option<&NodeId>,
        node_type: Option<&str>,
        fields: &FieldMap,
    ) -> Option<String> {
        let rules = self.rules();
        let id_leaf = match raw_id {
            Some((_, RawId::Qualified(_))) => qualified.map(|id| id.leaf().to_string()),
            Some((_, RawId::Bare(token))) => Some(token.clone()),
            None => None,
        };
        if let Some(leaf) = id_leaf.as_deref().filter(|l| !is_opaque_segment(l)) {
            let name = percent_decoded_title(leaf);
            if !name.is_empty() {
                return Some(name);
            }
        }
        if let Some(seg) = record
            .origin
            .as_deref()
            .and_then(|o| origin_name_segment(o, &rules.generic_path_segments))
        {
            let name = percent_decoded_title(strip_extension(seg));
            if !name.is_empty() {
                return Some(name);
            }
        }
        if let (Some(t), Some((raw, _))) = (node_type, raw_id) {
            return Some(format!("{t} ({raw})"));
        }
        let parts: Vec<String> = rules
            .discriminator_fields
            .iter()
            .filter_map(|k| fields.get(k).and_then(scalar_text))
            .collect();
        if parts.len() >= 2 {
            return Some(parts.join(" / "));
        }
        None
    }

    fn derive_id(
        &self,
        record: &CandidateRecord,
        node_type: &str,
        name: &str,
        fields: &FieldMap,
        origin: &str,
    ) -> Result<NodeId, RecordError> {
        let scheme = self.scheme();
        let invalid = |source| RecordError::InvalidIdentifier {
            origin: origin.to_string(),
            source,
        };
        if let Some(pattern) = self.config.identifiers.patterns.get(node_type) {
            return IdPattern::new(pattern.clone())
                .render(scheme, |field| match field {
                    "type" => Some(node_type.to_string()),
                    "name" => fields.get("name").and_then(scalar_text).or_else(|| Some(name.to_string())),
                    other => fields.get(other).and_then(scalar_text),
                })
                .map_err(invalid);
        }
        let token = match record.origin.as_deref().map(|o| o.trim_start_matches('/')) {
            Some(o) if !o.is_empty() => o.to_string(),
            _ => name.to_string(),
        };
        NodeId::from_segments(scheme, &[node_type, &token]).map_err(invalid)
    }

    // ------------------------------------------------------------------------
    // Field classification
    // ------------------------------------------------------------------------

    fn is_path_like(&self, s: &str) -> bool {
        self.rules().path_prefixes.iter().any(|p| s.starts_with(p.as_str()))
    }

    fn marker_value(&self, obj: &FieldMap) -> Option<String> {
        self.rules()
            .reference_markers
            .iter()
            .find_map(|m| obj.get(m).and_then(scalar_text))
    }

    fn is_rich(&self, obj: &FieldMap) -> bool {
        let rules = self.rules();
        if obj.len() >= rules.rich_min_fields {
            return true;
        }
        let has = |names: &[String]| names.iter().any(|n| obj.get(n).and_then(scalar_text).is_some());
        has(&rules.name_fields) && (has(&rules.type_fields) || has(&rules.id_fields))
    }

    /// Reference carried by a string value, if it looks like one.
    fn string_reference(&self, s: &str, registered: bool) -> Option<RawReference> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return None;
        }
        if self.is_path_like(trimmed) {
            return Some(RawReference::Path(trimmed.to_string()));
        }
        if is_well_formed(trimmed, self.scheme()) {
            return Some(RawReference::Identifier(trimmed.to_string()));
        }
        if registered {
            if trimmed.contains(':') {
                return Some(RawReference::Identifier(trimmed.to_string()));
            }
            return Some(RawReference::Name(trimmed.to_string()));
        }
        None
    }

    /// Returns the attribute value to keep, if any; references and children
    /// are pushed into `out`.
    fn classify_field(
        &self,
        key: &str,
        value: &Json,
        parent_base: &str,
        depth: usize,
        out: &mut Extraction,
    ) -> Option<Value> {
        let scheme = self.scheme();
        let rule = self.rules().reference_fields.get(key);
        let site = FieldSite { key, rule, depth };
        match value {
            Json::Array(items) => {
                let mut kept = Vec::new();
                for (index, item) in items.iter().enumerate() {
                    let child_origin = format!("{parent_base}#{key}/{index}");
                    if let Some(v) = self.classify_item(&site, item, &child_origin, out) {
                        kept.push(v);
                    }
                }
                if kept.is_empty() && !items.is_empty() {
                    None
                } else {
                    Some(Value::Sequence(kept))
                }
            }
            Json::Null if rule.is_some() => None,
            Json::Number(_) if rule.is_some() => {
                let child_origin = format!("{parent_base}#{key}");
                self.classify_item(&site, value, &child_origin, out)
            }
            Json::String(_) | Json::Object(_) => {
                let child_origin = format!("{parent_base}#{key}");
                self.classify_item(&site, value, &child_origin, out)
            }
            other => Some(Value::from_json(other, scheme)),
        }
    }

    fn classify_item(
        &self,
        site: &FieldSite<'_>,
        item: &Json,
        child_origin: &str,
        out: &mut Extraction,
    ) -> Option<Value> {
        let rules = self.rules();
        let registered = site.rule.is_some();
        let predicate = site.rule.map(|r| r.predicate.clone()).unwrap_or_else(|| site.key.to_string());
        let type_hint = site.rule.and_then(|r| r.target_type.clone());
        let descriptor = |raw_value: RawReference| ReferenceDescriptor {
            field_name: site.key.to_string(),
            predicate: predicate.clone(),
            raw_value,
            target_type_hint: type_hint.clone(),
        };

        match item {
            Json::String(s) => match self.string_reference(s, registered) {
                Some(r) => {
                    out.references.push(descriptor(r));
                    None
                }
                None => Some(Value::from_json(item, self.scheme())),
            },
            Json::Number(_) if registered => {
                if let Some(text) = scalar_text(item) {
                    out.references.push(descriptor(RawReference::Name(text)));
                }
                None
            }
            Json::Object(obj) => {
                if let Some(marker) = self.marker_value(obj) {
                    let r = self
                        .string_reference(&marker, true)
                        .unwrap_or(RawReference::Name(marker));
                    out.references.push(descriptor(r));
                    return None;
                }
                let inline_only = rules.inline_fields.iter().any(|f| f == site.key);
                if inline_only {
                    return Some(Value::from_json(item, self.scheme()));
                }
                let has_id = rules.id_fields.iter().any(|f| obj.get(f).and_then(scalar_text).is_some());
                if registered && has_id && obj.len() < rules.rich_min_fields {
                    out.references.push(descriptor(RawReference::Inline {
                        marker: None,
                        fields: obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<BTreeMap<_, _>>(),
                    }));
                    return None;
                }
                let extract = (registered || self.is_rich(obj)) && site.depth < rules.max_depth;
                if !extract {
                    return Some(Value::from_json(item, self.scheme()));
                }
                let hint = site
                    .rule
                    .and_then(|r| r.target_type.clone())
                    .unwrap_or_else(|| pascal_case(&singularize(site.key)));
                out.children.push(CandidateRecord {
                    fields: Some(obj.clone()),
                    origin: Some(child_origin.to_string()),
                    type_hint: Some(hint),
                    schema_hint: None,
                    depth: site.depth + 1,
                });
                out.references.push(descriptor(RawReference::Path(child_origin.to_string())));
                None
            }
            other => Some(Value::from_json(other, self.scheme())),
        }
    }
}

#[derive(Default)]
struct Extraction {
    references: Vec<ReferenceDescriptor>,
    children: Vec<CandidateRecord>,
}

struct FieldSite<'s> {
    key: &'s str,
    rule: Option<&'s ReferenceFieldRule>,
    depth: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::NoLoader;
    use serde_json::json;

    fn build(fields: Json, origin: Option<&str>) -> Result<BuildOutcome, RecordError> {
        let cfg = EngineConfig::default();
        let mut record = CandidateRecord::from_json(fields);
        record.origin = origin.map(str::to_string);
        EntityBuilder::new(&cfg).build(&record, &NoLoader)
    }

    #[test]
    fn derives_id_from_origin_and_uses_explicit_name() {
        let out = build(json!({"type": "Service", "title": "Cincinnati"}), Some("/services/cincinnati/app")).unwrap();
        assert_eq!(out.node.id.as_str(), "kg:service:services/cincinnati/app");
        assert_eq!(out.node.name, "Cincinnati");
        assert_eq!(out.node.confidence, Confidence::High);
        assert!(out.node.attributes.is_empty());
    }

    #[test]
    fn infers_type_and_name_from_identifier() {
        let out = build(json!({"id": "kg:api-gateway:checkout-edge", "tier": "prod"}), None).unwrap();
        assert_eq!(out.node.node_type, "ApiGateway");
        assert_eq!(out.node.name, "Checkout Edge");
        assert_eq!(out.node.confidence, Confidence::Low);
        assert_eq!(out.node.attributes["tier"], Value::text("prod"));
    }

    #[test]
    fn short_ids_get_the_scheme_prefixed() {
        let out = build(json!({"id": "svc:foo", "name": "Foo"}), None).unwrap();
        assert_eq!(out.node.id.as_str(), "kg:svc:foo");
        assert_eq!(out.node.node_type, "Svc");
        assert_eq!(out.node.confidence, Confidence::Medium);
    }

    #[test]
    fn opaque_ids_fall_back_to_type_and_identifier() {
        let out = build(json!({"id": "12345", "type": "Ticket"}), None).unwrap();
        assert_eq!(out.node.id.as_str(), "kg:ticket:12345");
        assert_eq!(out.node.name, "Ticket (12345)");
    }

    #[test]
    fn composite_name_from_discriminators() {
        let cfg = EngineConfig::default();
        let record = CandidateRecord::from_json(json!({"namespace": "payments", "region": "eu-west-1"}))
            .with_type_hint("Deployment");
        let out = EntityBuilder::new(&cfg).build(&record, &NoLoader).unwrap();
        assert_eq!(out.node.name, "payments / eu-west-1");
        assert_eq!(out.node.id.as_str(), "kg:deployment:payments-/-eu-west-1");
    }

    #[test]
    fn unidentifiable_records_fail_alone() {
        let err = build(json!({"tier": "prod"}), None).unwrap_err();
        assert!(matches!(err, RecordError::UnidentifiableRecord { .. }));
    }

    #[test]
    fn invalid_identifier_is_a_record_error() {
        let err = build(json!({"id": "kg::broken", "name": "x"}), None).unwrap_err();
        assert!(matches!(err, RecordError::InvalidIdentifier { .. }));
    }

    #[test]
    fn references_become_descriptors_not_attributes() {
        let out = build(
            json!({
                "type": "Service",
                "name": "a",
                "next": "./b",
                "team": "platform",
                "dependsOn": ["kg:service:db", "kg:service:cache"],
                "peer": {"$ref": "../c"},
                "$schema": "v1"
            }),
            Some("/services/a"),
        )
        .unwrap();
        assert!(out.node.attributes.is_empty());
        let mut preds: Vec<_> = out.references.iter().map(|r| r.predicate.as_str()).collect();
        preds.sort();
        assert_eq!(preds, vec!["dependsOn", "dependsOn", "next", "ownedBy", "peer"]);
        let team = out.references.iter().find(|r| r.field_name == "team").unwrap();
        assert_eq!(team.raw_value, RawReference::Name("platform".into()));
        assert_eq!(team.target_type_hint.as_deref(), Some("Team"));
        assert_eq!(out.fields_seen, 7);
        assert_eq!(out.fields_consumed, 6);
    }

    #[test]
    fn rich_nested_objects_are_extracted() {
        let out = build(
            json!({
                "type": "Service",
                "name": "checkout",
                "database": {"engine": "postgres", "version": "15", "size": "large"},
                "labels": {"team": "payments", "tier": "1", "app": "checkout"},
                "limits": {"cpu": "2"}
            }),
            Some("/services/checkout"),
        )
        .unwrap();
        assert_eq!(out.children.len(), 1);
        let child = &out.children[0];
        assert_eq!(child.origin.as_deref(), Some("/services/checkout#database"));
        assert_eq!(child.type_hint.as_deref(), Some("Database"));
        assert_eq!(child.depth, 1);
        assert!(out
            .references
            .iter()
            .any(|r| r.raw_value == RawReference::Path("/services/checkout#database".into())));
        assert!(out.node.attributes.contains_key("labels"));
        assert!(out.node.attributes.contains_key("limits"));
        assert!(!out.node.attributes.contains_key("database"));
    }

    #[test]
    fn extracted_children_are_nameable_from_their_origin() {
        let cfg = EngineConfig::default();
        let child = CandidateRecord {
            fields: Some(json!({"engine": "postgres", "version": "15", "size": "large"}).as_object().cloned().unwrap_or_default()),
            origin: Some("/services/checkout#database".into()),
            type_hint: Some("Database".into()),
            schema_hint: None,
            depth: 1,
        };
        let out = EntityBuilder::new(&cfg).build(&child, &NoLoader).unwrap();
        assert_eq!(out.node.name, "Database");
        assert_eq!(out.node.id.as_str(), "kg:database:services/checkout%23database");
    }

    #[test]
    fn type_from_origin_directory_and_schema_hint() {
        let out = build(json!({"name": "Platform"}), Some("/teams/platform/team.json")).unwrap();
        assert_eq!(out.node.node_type, "Team");

        let cfg = EngineConfig::default();
        let record = CandidateRecord::from_json(json!({"name": "x"}))
            .with_schema_hint("https://schemas.example/api-gateway.json");
        let out = EntityBuilder::new(&cfg).build(&record, &NoLoader).unwrap();
        assert_eq!(out.node.node_type, "ApiGateway");
    }

    #[test]
    fn kind_field_is_the_last_type_fallback() {
        let out = build(json!({"kind": "Deployment", "name": "web"}), None).unwrap();
        assert_eq!(out.node.node_type, "Deployment");
        assert!(!out.node.attributes.contains_key("kind"));
    }

    #[test]
    fn identifier_patterns_apply_per_type() {
        let mut cfg = EngineConfig::default();
        cfg.identifiers
            .patterns
            .insert("Service".into(), "{scheme}:service:{namespace}/{name}".into());
        let record = CandidateRecord::from_json(json!({"type": "Service", "name": "Web", "namespace": "shop"}));
        let out = EntityBuilder::new(&cfg).build(&record, &NoLoader).unwrap();
        assert_eq!(out.node.id.as_str(), "kg:service:shop/web");

        let record = CandidateRecord::from_json(json!({"type": "Service", "name": "Web"}));
        let err = EntityBuilder::new(&cfg).build(&record, &NoLoader).unwrap_err();
        assert!(matches!(err, RecordError::InvalidIdentifier { .. }));
    }
}
