//! Canonical content-hash helper shared by schema versioning (§3, §4.A) and
//! subscription result caching (§4.C [SUPPLEMENT]: `last_result_hash` is a
//! SHA-256 digest rather than the raw result).
use sha2::{
    Digest,
    Sha256,
};

pub fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hash of a JSON value's canonical (serde_json's stable key order for
/// maps that were built from a `BTreeMap`, as every document/result here
/// is) text form.
pub fn hex_digest_json(value: &serde_json::Value) -> String {
    hex_digest(value.to_string().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bytes_hash_the_same() {
        assert_eq!(hex_digest(b"hello"), hex_digest(b"hello"));
    }

    #[test]
    fn different_bytes_hash_differently() {
        assert_ne!(hex_digest(b"hello"), hex_digest(b"world"));
    }
}
