//! Request signing for the Boohee API.
//!
//! The canonical string is built from every request parameter except `sign`
//! and `app_key`, sorted by key, each rendered as `key` immediately followed
//! by its value with no separators. The app key is wrapped around both ends
//! and the MD5 digest of the result, in lowercase hex, is the signature.
//!
//! Values render the same way they go over the wire: strings verbatim,
//! numbers in their JSON form, arrays and objects as compact JSON. The query
//! builder in [`crate::data_sources::boohee`] uses [`canonical_value`] as
//! well, so the signed text and the sent text never diverge.

use md5::{Digest, Md5};
use serde_json::{Map, Value};

/// Parameters that never take part in the signature.
const EXCLUDED_KEYS: [&str; 2] = ["sign", "app_key"];

/// Render one parameter value as it appears in the canonical string.
pub fn canonical_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Build the canonical parameter string (without the secret wrapping).
pub fn canonical_string(params: &Map<String, Value>) -> String {
    let mut pairs: Vec<(&String, &Value)> = params
        .iter()
        .filter(|(k, _)| !EXCLUDED_KEYS.contains(&k.as_str()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    pairs
        .into_iter()
        .map(|(k, v)| format!("{}{}", k, canonical_value(v)))
        .collect()
}

/// Compute the request signature for `params` with the account secret.
pub fn sign(params: &Map<String, Value>, secret: &str) -> String {
    let payload = format!("{secret}{}{secret}", canonical_string(params));
    hex::encode(Md5::digest(payload.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_known_digest() {
        // md5("secretapp_idabctimestamp1700000000secret")
        let p = params(json!({"app_id": "abc", "timestamp": 1700000000}));
        assert_eq!(
            canonical_string(&p),
            "app_idabctimestamp1700000000".to_string()
        );

        let expected = hex::encode(Md5::digest(
            "secretapp_idabctimestamp1700000000secret".as_bytes(),
        ));
        assert_eq!(sign(&p, "secret"), expected);
    }

    #[test]
    fn test_empty_input_digest() {
        // md5("") is a fixed, well-known value.
        assert_eq!(sign(&Map::new(), ""), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_signature_is_lowercase_fixed_width_hex() {
        let p = params(json!({"q": "苹果", "page": 2}));
        let signature = sign(&p, "k");
        assert_eq!(signature.len(), 32);
        assert!(
            signature
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        );
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let mut a = Map::new();
        a.insert("timestamp".to_string(), json!(1700000000));
        a.insert("q".to_string(), json!("apple"));
        a.insert("app_id".to_string(), json!("id-1"));

        let mut b = Map::new();
        b.insert("app_id".to_string(), json!("id-1"));
        b.insert("q".to_string(), json!("apple"));
        b.insert("timestamp".to_string(), json!(1700000000));

        assert_eq!(sign(&a, "key"), sign(&b, "key"));
        assert_eq!(canonical_string(&a), "app_idid-1qappletimestamp1700000000");
    }

    #[test]
    fn test_sign_and_app_key_are_excluded() {
        let base = params(json!({"app_id": "id-1", "timestamp": 1}));
        let expected = sign(&base, "key");

        let mut with_extras = base.clone();
        with_extras.insert("sign".to_string(), json!("whatever"));
        with_extras.insert("app_key".to_string(), json!("leaked"));
        assert_eq!(sign(&with_extras, "key"), expected);

        with_extras.insert("sign".to_string(), json!("something-else"));
        with_extras.insert("app_key".to_string(), json!(42));
        assert_eq!(sign(&with_extras, "key"), expected);
    }

    #[test]
    fn test_secret_changes_signature() {
        let p = params(json!({"app_id": "id-1"}));
        assert_ne!(sign(&p, "key-a"), sign(&p, "key-b"));
    }

    #[test]
    fn test_arrays_render_as_compact_json() {
        let p = params(json!({
            "foods": [{"code": "pingguo_junzhi", "weight": 150.0}],
            "app_id": "id-1"
        }));
        assert_eq!(
            canonical_string(&p),
            r#"app_idid-1foods[{"code":"pingguo_junzhi","weight":150.0}]"#
        );
    }

    #[test]
    fn test_non_ascii_is_not_escaped() {
        let p = params(json!({"foods": [{"code": "苹果"}]}));
        assert_eq!(canonical_string(&p), r#"foods[{"code":"苹果"}]"#);
    }

    #[test]
    fn test_numbers_have_no_grouping() {
        assert_eq!(canonical_value(&json!(1234567)), "1234567");
        assert_eq!(canonical_value(&json!(100.0)), "100.0");
        assert_eq!(canonical_value(&json!(0.5)), "0.5");
    }
}
