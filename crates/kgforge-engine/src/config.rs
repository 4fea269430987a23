//! Engine configuration.
//!
//! Every section has defaults, so a partial JSON document is a valid config:
//!
//! ```json
//! { "validator": { "repair": true, "orphan_threshold": 10 } }
//! ```

use anyhow::{Context, Result};
use kgforge_model::DEFAULT_SCHEME;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub identifiers: IdentifierPolicy,
    pub builder: BuilderConfig,
    pub resolver: ResolverConfig,
    pub linker: LinkerConfig,
    pub dedup: DedupConfig,
    pub validator: ValidatorConfig,
    /// Worker threads for record-local phases (0 = rayon's global pool).
    pub parallelism: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            identifiers: IdentifierPolicy::default(),
            builder: BuilderConfig::default(),
            resolver: ResolverConfig::default(),
            linker: LinkerConfig::default(),
            dedup: DedupConfig::default(),
            validator: ValidatorConfig::default(),
            parallelism: 0,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("failed to parse engine config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config {}", path.display()))?;
        Self::from_json_str(&text)
    }

    pub fn scheme(&self) -> &str {
        &self.identifiers.scheme
    }

    /// Inverse predicate lookup (symmetric).
    pub fn inverse_of(&self, predicate: &str) -> Option<&str> {
        for (a, b) in &self.resolver.inverse_predicates {
            if a == predicate {
                return Some(b);
            }
            if b == predicate {
                return Some(a);
            }
        }
        None
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// Identifiers
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifierPolicy {
    /// Reserved scheme prefix.
    pub scheme: String,
    /// Per-type identifier patterns used when a record has no id field,
    /// e.g. `"Service": "{scheme}:service:{namespace}/{name}"`.
    pub patterns: BTreeMap<String, String>,
}

impl Default for IdentifierPolicy {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            patterns: BTreeMap::new(),
        }
    }
}

// ============================================================================
// Entity Builder
// ============================================================================

/// How a registered reference field is turned into edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceFieldRule {
    pub predicate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
}

impl ReferenceFieldRule {
    pub fn new(predicate: &str, target_type: Option<&str>) -> Self {
        Self {
            predicate: predicate.to_string(),
            target_type: target_type.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    pub id_fields: Vec<String>,
    pub type_fields: Vec<String>,
    pub name_fields: Vec<String>,
    /// Platform-specific "kind" fields (last type fallback).
    pub kind_fields: Vec<String>,
    /// Structural metadata dropped from attributes.
    pub metadata_fields: Vec<String>,
    /// Keys marking an inline object as a reference (`{"$ref": "./b"}`).
    pub reference_markers: Vec<String>,
    /// Fields whose values are always references.
    pub reference_fields: BTreeMap<String, ReferenceFieldRule>,
    /// Prefixes that make a string value path-like.
    pub path_prefixes: Vec<String>,
    /// Nested objects with at least this many fields are extracted as records.
    pub rich_min_fields: usize,
    /// Nested objects under these fields always stay inline attributes.
    pub inline_fields: Vec<String>,
    /// Origin directory name → type tag.
    pub origin_type_dirs: BTreeMap<String, String>,
    /// Origin segments too generic to name a node.
    pub generic_path_segments: Vec<String>,
    /// Precedence list for composite names.
    pub discriminator_fields: Vec<String>,
    /// Nesting depth beyond which rich objects are no longer extracted.
    pub max_depth: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        let reference_fields = [
            ("owner", ReferenceFieldRule::new("ownedBy", None)),
            ("team", ReferenceFieldRule::new("ownedBy", Some("Team"))),
            ("dependsOn", ReferenceFieldRule::new("dependsOn", None)),
            ("depends_on", ReferenceFieldRule::new("dependsOn", None)),
            ("uses", ReferenceFieldRule::new("uses", None)),
            ("partOf", ReferenceFieldRule::new("partOf", None)),
            ("parent", ReferenceFieldRule::new("partOf", None)),
            ("environment", ReferenceFieldRule::new("deployedTo", Some("Environment"))),
            ("deployedTo", ReferenceFieldRule::new("deployedTo", Some("Environment"))),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let origin_type_dirs = [
            ("services", "Service"),
            ("teams", "Team"),
            ("environments", "Environment"),
            ("users", "User"),
            ("people", "Person"),
            ("groups", "Group"),
            ("orgs", "Organization"),
            ("organizations", "Organization"),
            ("repos", "Repository"),
            ("repositories", "Repository"),
            ("databases", "Database"),
            ("deployments", "Deployment"),
            ("clusters", "Cluster"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            id_fields: strings(&["id", "@id", "identifier"]),
            type_fields: strings(&["type", "@type", "entityType"]),
            name_fields: strings(&["name", "title", "displayName", "label"]),
            kind_fields: strings(&["kind"]),
            metadata_fields: strings(&["$schema", "schemaVersion", "schema_version", "_meta"]),
            reference_markers: strings(&["$ref", "ref"]),
            reference_fields,
            path_prefixes: strings(&["./", "../", "/"]),
            rich_min_fields: 3,
            inline_fields: strings(&["labels", "annotations", "tags"]),
            origin_type_dirs,
            generic_path_segments: strings(&[
                "src", "app", "lib", "index", "main", "config", "manifests", "data",
            ]),
            discriminator_fields: strings(&[
                "namespace",
                "environment",
                "region",
                "cluster",
                "version",
                "owner",
                "email",
            ]),
            max_depth: 8,
        }
    }
}

// ============================================================================
// Reference Resolver
// ============================================================================

/// What fuzzy name matching does when several nodes tie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuzzyTiePolicy {
    /// Any tie is rejected (reported as an ambiguous reference).
    #[default]
    Reject,
    /// A unique highest-confidence candidate wins; otherwise reject.
    PreferHighestConfidence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Predicate pairs materialized in both directions.
    pub inverse_predicates: Vec<(String, String)>,
    /// Maximum alternative identifiers probed per descriptor.
    pub max_alternatives: usize,
    pub fuzzy_matching: bool,
    pub fuzzy_tie_policy: FuzzyTiePolicy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            inverse_predicates: [
                ("dependsOn", "requiredBy"),
                ("owns", "ownedBy"),
                ("contains", "containedIn"),
                ("partOf", "hasPart"),
                ("deployedTo", "hosts"),
            ]
            .into_iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect(),
            max_alternatives: 8,
            fuzzy_matching: true,
            fuzzy_tie_policy: FuzzyTiePolicy::Reject,
        }
    }
}

// ============================================================================
// Orphan linker
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkDirection {
    /// `target --predicate--> node`
    Inbound,
    /// `node --predicate--> target`
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum NamingRule {
    /// `{x}{suffix}` --predicate--> `{x}` (e.g. `payments-team` owns `payments`).
    OwnerSuffix { suffix: String, predicate: String },
    /// `{x}{separator}{q}` --predicate--> the `target_type` node named `{q}`.
    QualifierSuffix {
        separator: String,
        target_type: String,
        predicate: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRule {
    pub key: String,
    pub predicate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
    pub direction: LinkDirection,
}

impl LabelRule {
    fn new(key: &str, predicate: &str, target_type: Option<&str>, direction: LinkDirection) -> Self {
        Self {
            key: key.to_string(),
            predicate: predicate.to_string(),
            target_type: target_type.map(str::to_string),
            direction,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkerConfig {
    pub path_containment: bool,
    pub naming_conventions: bool,
    pub metadata_labels: bool,
    /// Off by default: needs change history from the caller.
    pub co_occurrence: bool,
    /// Container type → containment predicate.
    pub containment_predicates: BTreeMap<String, String>,
    pub default_containment_predicate: String,
    pub naming_rules: Vec<NamingRule>,
    /// Attributes holding label maps.
    pub label_attributes: Vec<String>,
    pub label_rules: Vec<LabelRule>,
    pub min_co_changes: usize,
    pub co_occurrence_predicate: String,
}

impl Default for LinkerConfig {
    fn default() -> Self {
        Self {
            path_containment: true,
            naming_conventions: true,
            metadata_labels: true,
            co_occurrence: false,
            containment_predicates: [("Team", "owns"), ("Group", "owns"), ("Organization", "owns")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            default_containment_predicate: "contains".to_string(),
            naming_rules: vec![
                NamingRule::OwnerSuffix {
                    suffix: "-team".to_string(),
                    predicate: "owns".to_string(),
                },
                NamingRule::QualifierSuffix {
                    separator: "-".to_string(),
                    target_type: "Environment".to_string(),
                    predicate: "deployedTo".to_string(),
                },
            ],
            label_attributes: strings(&["labels"]),
            label_rules: vec![
                LabelRule::new("team", "owns", Some("Team"), LinkDirection::Inbound),
                LabelRule::new("owner", "owns", None, LinkDirection::Inbound),
                LabelRule::new("group", "memberOf", None, LinkDirection::Outbound),
                LabelRule::new("app.kubernetes.io/part-of", "partOf", None, LinkDirection::Outbound),
            ],
            min_co_changes: 3,
            co_occurrence_predicate: "relatedTo".to_string(),
        }
    }
}

// ============================================================================
// Deduplicator / Validator
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Attributes whose (normalized) value identifies an entity.
    pub identity_keys: Vec<String>,
    /// Only merge identity-key matches of the same node type.
    pub scope_by_type: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            identity_keys: strings(&["email"]),
            scope_by_type: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Create tagged placeholder nodes for unresolved references.
    pub repair: bool,
    /// Remaining orphans above this count are a batch-level soft failure.
    pub orphan_threshold: Option<usize>,
}
