//! Identifier normalization and validation.
//!
//! Every node carries an identifier shaped `scheme:type-segment:identifier-segments...`.
//! Identifiers are normalized once, validated once, and immutable afterwards.
//!
//! Normalization:
//! - trim + lowercase,
//! - each run of whitespace/underscores becomes a single `-`,
//! - everything outside `[a-z0-9-:/]` is percent-encoded (`%XX`, uppercase hex),
//!   including `%` itself.
//!
//! Escaping `%` keeps normalization injective: `a.b` and `a%2eb` stay distinct.
//! The flip side is that normalizing an already canonical identifier escapes it
//! again, so canonical strings enter through [`NodeId::from_canonical`].

use serde::{Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;

/// Reserved scheme used when no other scheme is configured.
pub const DEFAULT_SCHEME: &str = "kg";

/// Minimum number of `:`-separated segments (scheme, type, identifier).
pub const MIN_SEGMENTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,

    #[error("identifier `{id}` does not start with reserved scheme `{scheme}:`")]
    MissingScheme { id: String, scheme: String },

    #[error("identifier `{id}` has {found} segment(s), expected at least 3")]
    TooFewSegments { id: String, found: usize },

    #[error("identifier `{id}` has an empty segment at position {position}")]
    EmptySegment { id: String, position: usize },

    #[error("identifier pattern `{pattern}` references unbound field `{field}`")]
    UnboundPatternField { pattern: String, field: String },

    #[error("identifier pattern `{pattern}` has an unterminated placeholder")]
    MalformedPattern { pattern: String },
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | ':' | '/')
}

fn push_encoded(out: &mut String, c: char) {
    let mut buf = [0u8; 4];
    for b in c.encode_utf8(&mut buf).bytes() {
        out.push_str(&format!("%{b:02X}"));
    }
}

/// Canonicalize a raw identifier string.
pub fn normalize_identifier(raw: &str) -> String {
    let trimmed = raw.trim();
    let mut out = String::with_capacity(trimmed.len());
    let mut pending_sep = false;

    for c in trimmed.chars() {
        if c.is_whitespace() || c == '_' {
            pending_sep = true;
            continue;
        }
        if pending_sep {
            out.push('-');
            pending_sep = false;
        }
        for lc in c.to_lowercase() {
            if is_allowed(lc) {
                out.push(lc);
            } else {
                push_encoded(&mut out, lc);
            }
        }
    }
    if pending_sep {
        out.push('-');
    }
    out
}

/// Check the structural rules for an already-normalized identifier.
pub fn validate_identifier(id: &str, scheme: &str) -> Result<(), IdentifierError> {
    if id.is_empty() {
        return Err(IdentifierError::Empty);
    }
    let segments: Vec<&str> = id.split(':').collect();
    if segments[0] != scheme {
        return Err(IdentifierError::MissingScheme {
            id: id.to_string(),
            scheme: scheme.to_string(),
        });
    }
    if segments.len() < MIN_SEGMENTS {
        return Err(IdentifierError::TooFewSegments {
            id: id.to_string(),
            found: segments.len(),
        });
    }
    if let Some(position) = segments.iter().position(|s| s.is_empty()) {
        return Err(IdentifierError::EmptySegment {
            id: id.to_string(),
            position,
        });
    }
    Ok(())
}

fn is_upper_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'A'..=b'F').contains(&b)
}

/// True when `s` uses only the canonical alphabet: `[a-z0-9-:/]` plus `%XX`
/// escapes with uppercase hex digits.
pub fn is_canonical_text(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => match bytes.get(i + 1..i + 3) {
                Some(&[hi, lo]) if is_upper_hex(hi) && is_upper_hex(lo) => i += 3,
                _ => return false,
            },
            b if is_allowed(b as char) => i += 1,
            _ => return false,
        }
    }
    true
}

/// True when `s` is already a canonical, valid identifier under `scheme`.
pub fn is_well_formed(s: &str, scheme: &str) -> bool {
    is_canonical_text(s) && validate_identifier(s, scheme).is_ok()
}

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

/// Decode `%XX` escapes produced by [`normalize_identifier`].
///
/// Invalid escapes and non-UTF-8 results are passed through unchanged.
pub fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let Some(&[hi, lo]) = bytes.get(i + 1..i + 3) {
                if let (Some(hi), Some(lo)) = (hex_value(hi), hex_value(lo)) {
                    out.push(hi << 4 | lo);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| s.to_string())
}

// ============================================================================
// NodeId
// ============================================================================

/// A validated, normalized node identifier.
///
/// The only constructors go through normalization + validation, so holding a
/// `NodeId` means the structural identifier rules hold.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(String);

impl NodeId {
    /// Normalize and validate `raw` under `scheme`.
    pub fn parse(raw: &str, scheme: &str) -> Result<Self, IdentifierError> {
        let normalized = normalize_identifier(raw);
        validate_identifier(&normalized, scheme)?;
        Ok(Self(normalized))
    }

    /// Accept a string that is already canonical (as produced by
    /// [`NodeId::parse`] or found in a graph document) without re-normalizing.
    pub fn from_canonical(s: &str, scheme: &str) -> Result<Self, IdentifierError> {
        if !is_canonical_text(s) {
            return Self::parse(s, scheme);
        }
        validate_identifier(s, scheme)?;
        Ok(Self(s.to_string()))
    }

    /// Build `scheme:seg1:seg2...`, normalizing each segment independently.
    ///
    /// Colons inside a segment are replaced so a single value can never add
    /// segments.
    pub fn from_segments(scheme: &str, segments: &[&str]) -> Result<Self, IdentifierError> {
        let mut raw = String::from(scheme);
        for seg in segments {
            raw.push(':');
            raw.push_str(&normalize_identifier(&seg.replace(':', "-")));
        }
        Self::from_canonical(&raw, scheme)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(':')
    }

    pub fn scheme(&self) -> &str {
        self.segments().next().unwrap_or_default()
    }

    /// The type segment (second segment).
    pub fn type_segment(&self) -> &str {
        self.segments().nth(1).unwrap_or_default()
    }

    /// The last `:`-separated segment.
    pub fn last_segment(&self) -> &str {
        self.0.rsplit(':').next().unwrap_or_default()
    }

    /// The most specific component: last segment, then last `/` component of it.
    pub fn leaf(&self) -> &str {
        let last = self.last_segment();
        last.rsplit('/').find(|s| !s.is_empty()).unwrap_or(last)
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Lets `BTreeMap<NodeId, _>` be probed with a plain `&str`.
impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

// ============================================================================
// Patterns
// ============================================================================

/// Identifier template such as `{scheme}:{type}:{name}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdPattern(String);

impl IdPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substitute every `{field}` placeholder, then normalize + validate.
    ///
    /// Substituted values have `:` replaced by `-` so they stay one segment.
    pub fn render<F>(&self, scheme: &str, lookup: F) -> Result<NodeId, IdentifierError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut raw = String::new();
        let mut rest = self.0.as_str();

        while let Some(open) = rest.find('{') {
            raw.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| IdentifierError::MalformedPattern {
                pattern: self.0.clone(),
            })?;
            let field = &after[..close];
            let value = if field == "scheme" {
                Some(scheme.to_string())
            } else {
                lookup(field)
            };
            match value {
                Some(v) if !v.trim().is_empty() => raw.push_str(&v.replace(':', "-")),
                _ => {
                    return Err(IdentifierError::UnboundPatternField {
                        pattern: self.0.clone(),
                        field: field.to_string(),
                    })
                }
            }
            rest = &after[close + 1..];
        }
        raw.push_str(rest);

        NodeId::parse(&raw, scheme)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_case_and_separators() {
        assert_eq!(normalize_identifier("KG:Service:My_Api  Gateway"), "kg:service:my-api-gateway");
    }

    #[test]
    fn normalize_percent_encodes_outside_alphabet() {
        assert_eq!(normalize_identifier("kg:user:a.b@c"), "kg:user:a%2Eb%40c");
        assert_eq!(normalize_identifier("kg:city:café"), "kg:city:caf%C3%A9");
    }

    #[test]
    fn normalize_escapes_percent_so_inputs_stay_distinct() {
        assert_eq!(normalize_identifier("kg:file:a.b"), "kg:file:a%2Eb");
        assert_eq!(normalize_identifier("kg:file:a%2eb"), "kg:file:a%252eb");
        assert_ne!(
            NodeId::parse("kg:file:a.b", "kg").unwrap(),
            NodeId::parse("kg:file:a%2eb", "kg").unwrap()
        );
    }

    #[test]
    fn well_formed_means_canonical_alphabet() {
        assert!(is_well_formed("kg:file:a%2Eb", "kg"));
        assert!(!is_well_formed("kg:file:a%2eb", "kg"));
        assert!(!is_well_formed("kg:file:a%2", "kg"));
        assert!(!is_well_formed("kg:file:a.b", "kg"));
        assert!(!is_well_formed("kg:File:ab", "kg"));
    }

    #[test]
    fn canonical_ids_are_accepted_without_escaping_again() {
        let id = NodeId::parse("kg:user:a.b", "kg").unwrap();
        assert_eq!(NodeId::from_canonical(id.as_str(), "kg").unwrap(), id);
        assert_eq!(
            NodeId::from_canonical("kg:User:A B", "kg").unwrap().as_str(),
            "kg:user:a-b"
        );
    }

    #[test]
    fn validate_rejects_structural_violations() {
        assert_eq!(validate_identifier("", "kg"), Err(IdentifierError::Empty));
        assert!(matches!(
            validate_identifier("svc:foo:bar", "kg"),
            Err(IdentifierError::MissingScheme { .. })
        ));
        assert!(matches!(
            validate_identifier("kg:foo", "kg"),
            Err(IdentifierError::TooFewSegments { found: 2, .. })
        ));
        assert!(matches!(
            validate_identifier("kg::foo", "kg"),
            Err(IdentifierError::EmptySegment { position: 1, .. })
        ));
        assert!(validate_identifier("kg:service:foo", "kg").is_ok());
    }

    #[test]
    fn node_id_accessors() {
        let id = NodeId::parse("kg:service:services/cincinnati/app", "kg").unwrap();
        assert_eq!(id.scheme(), "kg");
        assert_eq!(id.type_segment(), "service");
        assert_eq!(id.last_segment(), "services/cincinnati/app");
        assert_eq!(id.leaf(), "app");
    }

    #[test]
    fn from_segments_keeps_values_in_one_segment() {
        let id = NodeId::from_segments("kg", &["Team", "a:b"]).unwrap();
        assert_eq!(id.as_str(), "kg:team:a-b");
    }

    #[test]
    fn pattern_renders_and_reports_unbound_fields() {
        let p = IdPattern::new("{scheme}:{type}:{name}");
        let id = p
            .render("kg", |f| match f {
                "type" => Some("Service".into()),
                "name" => Some("Checkout API".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(id.as_str(), "kg:service:checkout-api");

        let err = p.render("kg", |_| None).unwrap_err();
        assert!(matches!(err, IdentifierError::UnboundPatternField { field, .. } if field == "type"));

        let bad = IdPattern::new("{scheme}:{type");
        assert!(matches!(
            bad.render("kg", |_| Some("x".into())),
            Err(IdentifierError::MalformedPattern { .. })
        ));
    }

    #[test]
    fn percent_decode_inverts_encoding() {
        assert_eq!(percent_decode("caf%C3%A9"), "café");
        assert_eq!(percent_decode("50%"), "50%");
        assert_eq!(percent_decode("%+1"), "%+1");
        assert_eq!(percent_decode("%2e%2E"), "..");
    }
}
