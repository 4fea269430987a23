//! Name, type and origin-path helpers shared by the builder, resolver and linker.

use kgforge_model::percent_decode;
use regex::Regex;
use std::sync::OnceLock;

/// Lowercase alphanumeric runs joined by `_` (`"Checkout API"` → `checkout_api`).
pub fn normalize_name_key(s: &str) -> String {
    let mut out = String::new();
    let mut prev_underscore = false;
    for c in s.trim().chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            out.push(c);
            prev_underscore = false;
        } else if !prev_underscore {
            out.push('_');
            prev_underscore = true;
        }
    }
    out.trim_matches('_').to_string()
}

fn words(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| c == '-' || c == '_' || c == '.' || c.is_whitespace())
        .filter(|w| !w.is_empty())
}

fn capitalize(w: &str) -> String {
    let mut chars = w.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `cincinnati-app` → `Cincinnati App`.
pub fn title_case(s: &str) -> String {
    words(s).map(capitalize).collect::<Vec<_>>().join(" ")
}

/// Title case of an identifier or path component, undoing percent-encoding.
pub fn percent_decoded_title(s: &str) -> String {
    title_case(&percent_decode(s))
}

/// `api-gateway` → `ApiGateway`. Already-cased tags keep their inner capitals.
pub fn pascal_case(s: &str) -> String {
    words(s).map(capitalize).collect()
}

/// Crude English singular for field names (`databases` → `database`).
pub fn singularize(s: &str) -> String {
    if let Some(stem) = s.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{stem}y");
        }
    }
    if s.ends_with("ss") || s.ends_with("us") {
        return s.to_string();
    }
    match s.strip_suffix('s') {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => s.to_string(),
    }
}

fn opaque_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(?:\d+|[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}|[0-9a-f]{12,})$",
        )
        .ok()
    })
    .as_ref()
}

/// Digits, UUIDs and long hex strings carry no human meaning.
pub fn is_opaque_segment(s: &str) -> bool {
    match opaque_re() {
        Some(re) => re.is_match(s),
        None => s.chars().all(|c| c.is_ascii_digit()),
    }
}

// ============================================================================
// Origin paths
// ============================================================================

/// Split `path#fragment`.
pub fn split_fragment(origin: &str) -> (&str, Option<&str>) {
    match origin.split_once('#') {
        Some((path, frag)) => (path, Some(frag)),
        None => (origin, None),
    }
}

/// Resolve `.` and `..` components; keeps a leading `/`, drops a trailing one.
pub fn normalize_path(path: &str) -> String {
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Directory containing `origin` (fragment ignored).
pub fn parent_dir(origin: &str) -> String {
    let (path, _) = split_fragment(origin);
    let normalized = normalize_path(path);
    match normalized.rsplit_once('/') {
        Some(("", _)) => "/".to_string(),
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

pub fn join_path(base: &str, relative: &str) -> String {
    if relative.starts_with('/') || base.is_empty() {
        return normalize_path(relative);
    }
    normalize_path(&format!("{}/{}", base.trim_end_matches('#'), relative))
}

/// Non-empty `/` components of the path part of an origin.
pub fn path_segments(origin: &str) -> Vec<&str> {
    let (path, _) = split_fragment(origin);
    path.split('/').filter(|s| !s.is_empty() && *s != ".").collect()
}

pub fn looks_like_file(segment: &str) -> bool {
    match segment.rsplit_once('.') {
        Some((stem, ext)) => !stem.is_empty() && !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()),
        None => false,
    }
}

pub fn strip_extension(segment: &str) -> &str {
    if looks_like_file(segment) {
        segment.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(segment)
    } else {
        segment
    }
}

/// Directory segments of an origin, deepest last; a trailing file name is dropped.
pub fn origin_directories(origin: &str) -> Vec<&str> {
    let mut segs = path_segments(origin);
    if segs.last().is_some_and(|s| looks_like_file(s)) {
        segs.pop();
    }
    segs
}

/// The most specific meaningful component of an origin.
///
/// Fragment components (for extracted sub-records) come first, skipping
/// array indices; then path directories, skipping generic ones.
pub fn origin_name_segment<'a>(origin: &'a str, generic: &[String]) -> Option<&'a str> {
    let is_generic = |s: &str| generic.iter().any(|g| g.eq_ignore_ascii_case(s));
    let (_, fragment) = split_fragment(origin);
    if let Some(frag) = fragment {
        if let Some(seg) = frag
            .rsplit('/')
            .find(|s| !s.is_empty() && !s.chars().all(|c| c.is_ascii_digit()) && !is_generic(s))
        {
            return Some(seg);
        }
    }
    origin_directories(origin)
        .into_iter()
        .rev()
        .find(|s| !is_generic(s))
}
