//! Candidate records: the engine's input.
//!
//! A candidate record is an opaque field map plus an origin token and optional
//! hints. Records may be *deferred* (no fields yet): the builder then asks a
//! [`RecordLoader`] to read the nested record behind the origin.

use anyhow::{anyhow, Context, Result};
use kgforge_model::digest::json_digest;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::path::{Path, PathBuf};

pub type FieldMap = Map<String, Json>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<FieldMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_hint: Option<String>,
    /// Nesting depth for records extracted out of a parent.
    #[serde(skip)]
    pub depth: usize,
}

impl CandidateRecord {
    pub fn new(fields: FieldMap) -> Self {
        Self {
            fields: Some(fields),
            ..Default::default()
        }
    }

    /// Build from a JSON object literal; non-objects produce an empty record.
    pub fn from_json(fields: Json) -> Self {
        match fields {
            Json::Object(map) => Self::new(map),
            _ => Self::new(FieldMap::new()),
        }
    }

    /// A record whose fields must be loaded from its origin.
    pub fn deferred(origin: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.into()),
            ..Default::default()
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_type_hint(mut self, hint: impl Into<String>) -> Self {
        self.type_hint = Some(hint.into());
        self
    }

    pub fn with_schema_hint(mut self, hint: impl Into<String>) -> Self {
        self.schema_hint = Some(hint.into());
        self
    }

    pub fn is_deferred(&self) -> bool {
        self.fields.is_none()
    }

    pub fn display_origin(&self) -> String {
        match &self.origin {
            Some(o) => o.clone(),
            None => format!("<inline {}>", self.digest()),
        }
    }

    /// Digest of the record's fields in canonical form.
    pub fn digest(&self) -> String {
        match &self.fields {
            Some(f) => json_digest(&Json::Object(f.clone())),
            None => String::new(),
        }
    }

    /// Canonical batch position: `(origin, digest)`.
    pub fn canonical_key(&self) -> (String, String) {
        (self.origin.clone().unwrap_or_default(), self.digest())
    }

    /// The record's fields, reading deferred records through `loader`.
    pub fn resolve_fields(&self, loader: &dyn RecordLoader) -> Result<FieldMap> {
        if let Some(fields) = &self.fields {
            return Ok(fields.clone());
        }
        let origin = self
            .origin
            .as_deref()
            .ok_or_else(|| anyhow!("deferred record has no origin to load from"))?;
        loader.load(origin)
    }
}

// ============================================================================
// Loading nested records
// ============================================================================

/// Reads the record behind an origin token (I/O happens on the worker).
pub trait RecordLoader: Send + Sync {
    fn load(&self, origin: &str) -> Result<FieldMap>;
}

/// Rejects every deferred record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLoader;

impl RecordLoader for NoLoader {
    fn load(&self, origin: &str) -> Result<FieldMap> {
        Err(anyhow!("no record loader configured for deferred record `{origin}`"))
    }
}

/// Reads `<root>/<origin>` as a JSON object.
#[derive(Debug, Clone)]
pub struct FsRecordLoader {
    root: PathBuf,
}

impl FsRecordLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, origin: &str) -> PathBuf {
        self.root.join(origin.trim_start_matches('/'))
    }
}

impl RecordLoader for FsRecordLoader {
    fn load(&self, origin: &str) -> Result<FieldMap> {
        let path = self.path_for(origin);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        match serde_json::from_str::<Json>(&text)
            .with_context(|| format!("failed to parse {}", path.display()))?
        {
            Json::Object(map) => Ok(map),
            _ => Err(anyhow!("{} does not contain a JSON object", path.display())),
        }
    }
}

// ============================================================================
// Batches
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateBatch {
    pub records: Vec<CandidateRecord>,
}

impl CandidateBatch {
    pub fn new(records: Vec<CandidateRecord>) -> Self {
        Self { records }
    }

    pub fn push(&mut self, record: CandidateRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Accepts either a bare JSON array of records or `{"records": [...]}`.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let json: Json = serde_json::from_str(text).context("failed to parse candidate batch")?;
        match json {
            Json::Array(_) => {
                let records: Vec<CandidateRecord> =
                    serde_json::from_value(json).context("invalid candidate record")?;
                Ok(Self { records })
            }
            Json::Object(_) => serde_json::from_value(json).context("invalid candidate batch"),
            _ => Err(anyhow!("candidate batch must be a JSON array or object")),
        }
    }

    /// One record per non-empty line.
    pub fn from_json_lines(text: &str) -> Result<Self> {
        let mut records = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: CandidateRecord = serde_json::from_str(line)
                .with_context(|| format!("invalid candidate record on line {}", lineno + 1))?;
            records.push(record);
        }
        Ok(Self { records })
    }

    /// Load a `.json` or `.jsonl` file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read candidate batch {}", path.display()))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("jsonl") | Some("ndjson") => Self::from_json_lines(&text),
            _ => Self::from_json_str(&text),
        }
    }

    /// Records in canonical batch order; this order defines "first seen".
    pub fn canonicalize(self) -> Vec<CandidateRecord> {
        let mut keyed: Vec<((String, String), CandidateRecord)> = self
            .records
            .into_iter()
            .map(|r| (r.canonical_key(), r))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed.into_iter().map(|(_, r)| r).collect()
    }
}

impl FromIterator<CandidateRecord> for CandidateBatch {
    fn from_iter<I: IntoIterator<Item = CandidateRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}
