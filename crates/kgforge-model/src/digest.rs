//! Deterministic digests (FNV-1a 64-bit).
//!
//! Used for:
//! - canonical batch order (digest of a candidate record's fields),
//! - stable placeholder identifiers,
//! - idempotence checks over rendered graph documents.
//!
//! This is not a security primitive.

/// Prefix used in serialized digests.
pub const DIGEST_V1_PREFIX: &str = "fnv1a64:";

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x00000100000001b3;

fn fnv1a64(parts: &[&[u8]]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for part in parts {
        for b in *part {
            hash ^= (*b) as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    }
    hash
}

/// 16 lowercase hex digits, no prefix (safe inside identifiers).
pub fn fnv1a64_hex(bytes: &[u8]) -> String {
    format!("{:016x}", fnv1a64(&[bytes]))
}

/// `"fnv1a64:<16 hex>"` over arbitrary bytes.
pub fn fnv1a64_digest_bytes(bytes: &[u8]) -> String {
    format!("{DIGEST_V1_PREFIX}{:016x}", fnv1a64(&[bytes]))
}

/// Digest over several fields, each terminated so `("ab","c") != ("a","bc")`.
pub fn fnv1a64_fields_hex(fields: &[&str]) -> String {
    let mut parts: Vec<&[u8]> = Vec::with_capacity(fields.len() * 2);
    for f in fields {
        parts.push(f.as_bytes());
        parts.push(b"\x1f");
    }
    format!("{:016x}", fnv1a64(&parts))
}

/// Digest of a JSON object in canonical (key-sorted) form.
pub fn json_digest(value: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    fnv1a64_digest_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_has_expected_prefix_and_width() {
        let d = fnv1a64_digest_bytes(b"kg:service:a");
        assert!(d.starts_with(DIGEST_V1_PREFIX));
        assert_eq!(d.len(), DIGEST_V1_PREFIX.len() + 16);
    }

    #[test]
    fn field_digest_is_boundary_sensitive() {
        assert_ne!(fnv1a64_fields_hex(&["ab", "c"]), fnv1a64_fields_hex(&["a", "bc"]));
        assert_eq!(fnv1a64_fields_hex(&["a", "b"]), fnv1a64_fields_hex(&["a", "b"]));
    }

    #[test]
    fn json_digest_ignores_key_insertion_order() {
        let a: serde_json::Value = serde_json::from_str(r#"{"x":1,"y":2}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"y":2,"x":1}"#).unwrap();
        assert_eq!(json_digest(&a), json_digest(&b));
    }
}
