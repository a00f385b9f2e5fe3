//! The attribute-value tree -- the closed sum type used on the wire.
//!
//! Every item attribute is one of exactly ten variants. Matching is
//! exhaustive throughout the crate; there is no "unknown variant" branch.
//! The serde impls emit the store's single-key-map JSON form
//! (`{"S": "hello"}`, `{"N": "42"}`, ...), with binary payloads as base64.

use std::collections::HashMap;
use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// An item as it appears on the wire: attribute name to attribute value.
pub type Item = HashMap<String, Av>;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Av {
    /// A string.
    S(String),
    /// A number, carried in exact decimal string form.
    N(String),
    /// Raw bytes.
    B(Vec<u8>),
    /// A boolean.
    Bool(bool),
    /// The null value.
    Null,
    /// An ordered, heterogeneous list.
    L(Vec<Av>),
    /// A string-keyed map.
    M(HashMap<String, Av>),
    /// A non-empty string set.
    Ss(Vec<String>),
    /// A non-empty numeric set (decimal strings).
    Ns(Vec<String>),
    /// A non-empty binary set.
    Bs(Vec<Vec<u8>>),
}

impl Av {
    /// Returns the wire tag for this variant (`"S"`, `"N"`, ...).
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::S(_) => "S",
            Self::N(_) => "N",
            Self::B(_) => "B",
            Self::Bool(_) => "BOOL",
            Self::Null => "NULL",
            Self::L(_) => "L",
            Self::M(_) => "M",
            Self::Ss(_) => "SS",
            Self::Ns(_) => "NS",
            Self::Bs(_) => "BS",
        }
    }

    /// Builds a string attribute.
    pub fn s(v: impl Into<String>) -> Self {
        Self::S(v.into())
    }

    /// Builds a numeric attribute from anything displayable as a decimal.
    pub fn n(v: impl fmt::Display) -> Self {
        Self::N(v.to_string())
    }

    /// Returns the string payload, if this is an `S`.
    pub fn as_s(&self) -> Option<&str> {
        match self {
            Self::S(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the decimal payload, if this is an `N`.
    pub fn as_n(&self) -> Option<&str> {
        match self {
            Self::N(s) => Some(s),
            _ => None,
        }
    }

    /// Returns `true` for the null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Converts a JSON value to the generic attribute-value form.
    ///
    /// This is the untagged mapping used for plain scalars, lists, and
    /// maps. Tag-driven shapes (sets, json blobs, binary, encrypted) are
    /// applied by the converter, which consults the field descriptor.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::N(n.to_string()),
            serde_json::Value::String(s) => Self::S(s.clone()),
            serde_json::Value::Array(items) => Self::L(items.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(map) => Self::M(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Converts back to a JSON value, the inverse of [`Av::from_json`].
    ///
    /// Sets become plain arrays and bytes become number arrays so that a
    /// record type deserializes naturally from the result.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::N(n) => parse_number(n),
            Self::S(s) => serde_json::Value::String(s.clone()),
            Self::B(bytes) => bytes_to_json(bytes),
            Self::L(items) => serde_json::Value::Array(items.iter().map(Self::to_json).collect()),
            Self::M(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Self::Ss(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|s| serde_json::Value::String(s.clone()))
                    .collect(),
            ),
            Self::Ns(items) => serde_json::Value::Array(items.iter().map(|n| parse_number(n)).collect()),
            Self::Bs(items) => serde_json::Value::Array(items.iter().map(|b| bytes_to_json(b)).collect()),
        }
    }
}

fn bytes_to_json(bytes: &[u8]) -> serde_json::Value {
    serde_json::Value::Array(bytes.iter().map(|b| serde_json::Value::from(*b)).collect())
}

/// Parses a decimal string back into a JSON number, preferring integer
/// representations. Unparseable input degrades to a string rather than
/// losing the payload.
fn parse_number(s: &str) -> serde_json::Value {
    if !s.contains(['.', 'e', 'E']) {
        if let Ok(i) = s.parse::<i64>() {
            return serde_json::Value::from(i);
        }
        if let Ok(u) = s.parse::<u64>() {
            return serde_json::Value::from(u);
        }
    }
    if let Ok(f) = s.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return serde_json::Value::Number(n);
        }
    }
    serde_json::Value::String(s.to_string())
}

// ---------------------------------------------------------------------------
// Wire serde
// ---------------------------------------------------------------------------

impl Serialize for Av {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        match self {
            Self::S(s) => map.serialize_entry("S", s)?,
            Self::N(n) => map.serialize_entry("N", n)?,
            Self::B(b) => map.serialize_entry("B", &BASE64.encode(b))?,
            Self::Bool(b) => map.serialize_entry("BOOL", b)?,
            Self::Null => map.serialize_entry("NULL", &true)?,
            Self::L(items) => map.serialize_entry("L", items)?,
            Self::M(m) => map.serialize_entry("M", m)?,
            Self::Ss(items) => map.serialize_entry("SS", items)?,
            Self::Ns(items) => map.serialize_entry("NS", items)?,
            Self::Bs(items) => {
                let encoded: Vec<String> = items.iter().map(|b| BASE64.encode(b)).collect();
                map.serialize_entry("BS", &encoded)?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Av {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(AvVisitor)
    }
}

struct AvVisitor;

impl<'de> Visitor<'de> for AvVisitor {
    type Value = Av;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an attribute value map with exactly one type key")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Av, A::Error> {
        let Some(tag) = access.next_key::<String>()? else {
            return Err(de::Error::custom("empty attribute value"));
        };

        let value = match tag.as_str() {
            "S" => Av::S(access.next_value()?),
            "N" => Av::N(access.next_value()?),
            "B" => {
                let encoded: String = access.next_value()?;
                let bytes = BASE64
                    .decode(&encoded)
                    .map_err(|_| de::Error::custom("invalid base64 in B attribute"))?;
                Av::B(bytes)
            }
            "BOOL" => Av::Bool(access.next_value()?),
            "NULL" => {
                let _: bool = access.next_value()?;
                Av::Null
            }
            "L" => Av::L(access.next_value()?),
            "M" => Av::M(access.next_value()?),
            "SS" => Av::Ss(access.next_value()?),
            "NS" => Av::Ns(access.next_value()?),
            "BS" => {
                let encoded: Vec<String> = access.next_value()?;
                let mut items = Vec::with_capacity(encoded.len());
                for e in &encoded {
                    items.push(
                        BASE64
                            .decode(e)
                            .map_err(|_| de::Error::custom("invalid base64 in BS attribute"))?,
                    );
                }
                Av::Bs(items)
            }
            other => return Err(de::Error::custom(format!("unknown attribute type {other}"))),
        };

        if access.next_key::<String>()?.is_some() {
            return Err(de::Error::custom("attribute value has more than one type key"));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn wire_serde_roundtrip() {
        let av = Av::M(HashMap::from([
            ("name".to_string(), Av::s("ada")),
            ("age".to_string(), Av::n(36)),
            ("tags".to_string(), Av::Ss(vec!["a".into(), "b".into()])),
            ("blob".to_string(), Av::B(vec![1, 2, 3])),
            ("flag".to_string(), Av::Bool(true)),
            ("gone".to_string(), Av::Null),
        ]));

        let json = serde_json::to_string(&av).unwrap();
        let back: Av = serde_json::from_str(&json).unwrap();
        assert_eq!(av, back);
    }

    #[test]
    fn wire_form_shapes() {
        assert_eq!(serde_json::to_string(&Av::s("x")).unwrap(), r#"{"S":"x"}"#);
        assert_eq!(serde_json::to_string(&Av::n(7)).unwrap(), r#"{"N":"7"}"#);
        assert_eq!(serde_json::to_string(&Av::Null).unwrap(), r#"{"NULL":true}"#);
        assert_eq!(
            serde_json::to_string(&Av::B(vec![0xff])).unwrap(),
            r#"{"B":"/w=="}"#
        );
    }

    #[test]
    fn rejects_multi_key_maps() {
        let err = serde_json::from_str::<Av>(r#"{"S":"x","N":"1"}"#).unwrap_err();
        assert!(err.to_string().contains("more than one"));
    }

    #[test]
    fn rejects_unknown_type_tag() {
        assert!(serde_json::from_str::<Av>(r#"{"XX":"x"}"#).is_err());
    }

    #[test]
    fn from_json_generic_mapping() {
        let v = serde_json::json!({"a": 1, "b": [true, null], "c": "s"});
        let av = Av::from_json(&v);
        let Av::M(m) = &av else { panic!("expected M") };
        assert_eq!(m["a"], Av::N("1".into()));
        assert_eq!(m["b"], Av::L(vec![Av::Bool(true), Av::Null]));
        assert_eq!(m["c"], Av::s("s"));
        assert_eq!(av.to_json(), v);
    }

    #[test]
    fn to_json_sets_become_arrays() {
        let av = Av::Ns(vec!["1".into(), "2".into()]);
        assert_eq!(av.to_json(), serde_json::json!([1, 2]));
        let av = Av::Bs(vec![vec![1], vec![2]]);
        assert_eq!(av.to_json(), serde_json::json!([[1], [2]]));
    }

    #[test]
    fn number_parsing_is_exact_for_integers() {
        assert_eq!(parse_number("42"), serde_json::json!(42));
        assert_eq!(
            parse_number("9223372036854775807"),
            serde_json::json!(9223372036854775807i64)
        );
        assert_eq!(parse_number("1.5"), serde_json::json!(1.5));
    }
}
