//! Opaque pagination cursors.
//!
//! A cursor is the base64url (no padding) encoding of the canonical JSON
//! object `{"k":{"<attr>":{"<type>":"<value>"}}}` where `<type>` is `S`,
//! `N`, or `B` (base64 bytes). Keys are emitted in sorted order so equal
//! key maps always encode to the same token. The decoder is strict: any
//! other type tag, extra key, or malformed layer is an invalid value.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};

use theorydb_core::error::ValidationError;
use theorydb_core::value::{Av, Item};

use crate::error::{Result, TheoryError};

/// Encodes a last-evaluated-key map as an opaque cursor token.
pub fn encode_cursor(key: &Item) -> Result<String> {
    let mut entries: BTreeMap<&str, serde_json::Value> = BTreeMap::new();
    for (attr, av) in key {
        let (tag, text) = match av {
            Av::S(s) => ("S", s.clone()),
            Av::N(n) => ("N", n.clone()),
            Av::B(b) => ("B", BASE64.encode(b)),
            _ => {
                return Err(TheoryError::Validation(ValidationError::invalid_value(
                    "cursor keys must be S, N, or B attributes",
                )));
            }
        };
        let mut typed = serde_json::Map::with_capacity(1);
        typed.insert(tag.to_string(), serde_json::Value::String(text));
        entries.insert(attr, serde_json::Value::Object(typed));
    }

    let wrapper = serde_json::json!({ "k": entries });
    let json = serde_json::to_string(&wrapper)
        .map_err(|e| TheoryError::Convert(theorydb_core::error::ConvertError::Serde(e)))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Decodes a cursor token back to its key map.
pub fn decode_cursor(token: &str) -> Result<Item> {
    let invalid = |reason: &str| {
        TheoryError::Validation(ValidationError::invalid_value(format!(
            "malformed cursor: {reason}"
        )))
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| invalid("not base64url"))?;
    let value: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|_| invalid("not json"))?;

    let serde_json::Value::Object(wrapper) = value else {
        return Err(invalid("top level is not an object"));
    };
    if wrapper.len() != 1 {
        return Err(invalid("unexpected top-level keys"));
    }
    let Some(serde_json::Value::Object(entries)) = wrapper.get("k") else {
        return Err(invalid("missing key map"));
    };

    let mut key = Item::with_capacity(entries.len());
    for (attr, entry) in entries {
        let serde_json::Value::Object(typed) = entry else {
            return Err(invalid("attribute entry is not an object"));
        };
        if typed.len() != 1 {
            return Err(invalid("attribute entry has extra keys"));
        }
        let (tag, text) = typed.iter().next().expect("checked");
        let serde_json::Value::String(text) = text else {
            return Err(invalid("attribute value is not a string"));
        };
        let av = match tag.as_str() {
            "S" => Av::S(text.clone()),
            "N" => Av::N(text.clone()),
            "B" => Av::B(BASE64.decode(text).map_err(|_| invalid("bad base64 bytes"))?),
            _ => return Err(invalid("unsupported attribute type")),
        };
        key.insert(attr.clone(), av);
    }
    if key.is_empty() {
        return Err(invalid("empty key map"));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_key() -> Item {
        Item::from([
            ("pk".to_string(), Av::s("org#1")),
            ("sk".to_string(), Av::s("key#z")),
        ])
    }

    #[test]
    fn encode_decode_is_a_bijection() {
        let key = sample_key();
        let token = encode_cursor(&key).unwrap();
        let back = decode_cursor(&token).unwrap();
        assert_eq!(key, back);
        // Canonical: re-encoding the decoded map yields the same token.
        assert_eq!(encode_cursor(&back).unwrap(), token);
    }

    #[test]
    fn token_is_stable_across_insertion_order() {
        let a = Item::from([
            ("pk".to_string(), Av::s("1")),
            ("sk".to_string(), Av::s("2")),
        ]);
        let mut b = Item::new();
        b.insert("sk".to_string(), Av::s("2"));
        b.insert("pk".to_string(), Av::s("1"));
        assert_eq!(encode_cursor(&a).unwrap(), encode_cursor(&b).unwrap());
    }

    #[test]
    fn numeric_and_binary_keys_roundtrip() {
        let key = Item::from([
            ("pk".to_string(), Av::s("p")),
            ("seq".to_string(), Av::N("42".into())),
            ("hash".to_string(), Av::B(vec![1, 2, 255])),
        ]);
        let back = decode_cursor(&encode_cursor(&key).unwrap()).unwrap();
        assert_eq!(key, back);
    }

    #[test]
    fn non_key_attribute_types_are_rejected_on_encode() {
        let key = Item::from([("pk".to_string(), Av::Bool(true))]);
        assert!(encode_cursor(&key).unwrap_err().is_invalid_value());
    }

    #[test]
    fn corrupted_token_is_invalid_value() {
        let token = encode_cursor(&sample_key()).unwrap();
        let mut corrupted = token.clone();
        // Flip one character.
        let replacement = if corrupted.ends_with('A') { 'B' } else { 'A' };
        corrupted.pop();
        corrupted.push(replacement);
        let err = decode_cursor(&corrupted).unwrap_err();
        assert!(err.is_invalid_value());
    }

    #[test]
    fn strict_decoder_rejections() {
        let cases = [
            // Wrong top-level key.
            serde_json::json!({"x": {}}),
            // Extra top-level key.
            serde_json::json!({"k": {}, "extra": 1}),
            // Unsupported attribute type.
            serde_json::json!({"k": {"pk": {"BOOL": "true"}}}),
            // Extra type key inside an attribute.
            serde_json::json!({"k": {"pk": {"S": "a", "N": "1"}}}),
            // Non-string payload.
            serde_json::json!({"k": {"pk": {"N": 42}}}),
            // Empty key map.
            serde_json::json!({"k": {}}),
        ];
        for case in cases {
            let token = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&case).unwrap());
            let err = decode_cursor(&token).unwrap_err();
            assert!(err.is_invalid_value(), "case: {case}");
        }
    }

    #[test]
    fn garbage_tokens_are_invalid_value() {
        for garbage in ["", "!!!", "not/base64url=", "AAAA"] {
            let err = decode_cursor(garbage).unwrap_err();
            assert!(err.is_invalid_value(), "input: {garbage}");
        }
    }
}
