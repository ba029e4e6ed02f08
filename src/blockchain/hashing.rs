use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of raw bytes.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hex-encoded SHA-256 digest of a canonical JSON value.
///
/// serde_json objects keep their keys sorted, so logically equal values
/// always serialize to the same string and therefore the same digest,
/// regardless of the order fields were inserted in.
pub fn hash_json(value: &serde_json::Value) -> String {
    hash_bytes(value.to_string().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_bytes_is_deterministic() {
        let a = hash_bytes(b"hello");
        let b = hash_bytes(b"hello");

        assert_eq!(a, b);
        assert_eq!(a.len(), 64); // SHA-256 hex digest
    }

    #[test]
    fn test_hash_bytes_differs_on_input() {
        assert_ne!(hash_bytes(b"hello"), hash_bytes(b"hello!"));
    }

    #[test]
    fn test_hash_json_ignores_insertion_order() {
        let mut first = serde_json::Map::new();
        first.insert("sender".to_string(), json!("a"));
        first.insert("amount".to_string(), json!(1.5));

        let mut second = serde_json::Map::new();
        second.insert("amount".to_string(), json!(1.5));
        second.insert("sender".to_string(), json!("a"));

        assert_eq!(
            hash_json(&serde_json::Value::Object(first)),
            hash_json(&serde_json::Value::Object(second))
        );
    }
}
