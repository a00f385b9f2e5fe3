//! Bidirectional conversion between records and attribute-value items.
//!
//! Records travel through their serde representation; the descriptor then
//! drives the wire shape field by field. Set-vs-list, json blobs, binary
//! payloads, and encryption are all decided by the tag, never inferred
//! from the runtime value.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::crypto::{DataKeyProvider, Envelope};
use crate::error::ConvertError;
use crate::registry::Registry;
use crate::schema::{FieldDescriptor, FieldKind, Model};
use crate::value::{Av, Item};

/// Marshals a record into its wire item, honoring the full tag language.
pub fn marshal_item<T: Model + Serialize + 'static>(
    registry: &Registry,
    record: &T,
    provider: Option<&dyn DataKeyProvider>,
) -> Result<Item, ConvertError> {
    let descriptor = registry.descriptor_of::<T>()?;
    let serde_json::Value::Object(values) = serde_json::to_value(record)? else {
        return Err(ConvertError::UnsupportedType {
            detail: "record did not serialize to a map".to_string(),
        });
    };

    let mut item = Item::with_capacity(descriptor.fields.len());
    for field in &descriptor.fields {
        let value = values.get(&field.rust_name).unwrap_or(&serde_json::Value::Null);
        if (field.omitempty || field.sparse) && is_zero(value) {
            continue;
        }
        let av = field_to_av(registry, field, value, provider)?;
        item.insert(field.attribute_name.clone(), av);
    }
    Ok(item)
}

/// Unmarshals a wire item into a fresh record.
///
/// Attributes missing from the item fall back to the record's serde
/// defaults, so record types declare `#[serde(default)]` on optional
/// fields the same way they would for any partial document.
pub fn from_item<T: Model + DeserializeOwned + 'static>(
    registry: &Registry,
    item: &Item,
    provider: Option<&dyn DataKeyProvider>,
) -> Result<T, ConvertError> {
    let descriptor = registry.descriptor_of::<T>()?;

    let mut values = serde_json::Map::with_capacity(item.len());
    for field in &descriptor.fields {
        let Some(av) = item.get(&field.attribute_name) else {
            continue;
        };
        values.insert(field.rust_name.clone(), av_to_field(registry, field, av, provider)?);
    }
    Ok(serde_json::from_value(serde_json::Value::Object(values))?)
}

/// Unmarshals a wire item in place.
pub fn unmarshal_item<T: Model + DeserializeOwned + 'static>(
    registry: &Registry,
    item: &Item,
    record: &mut T,
    provider: Option<&dyn DataKeyProvider>,
) -> Result<(), ConvertError> {
    *record = from_item(registry, item, provider)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Per-field conversion
// ---------------------------------------------------------------------------

/// Converts one field's serde value to its wire form.
///
/// A registered custom converter for the field's declared type takes
/// precedence over every built-in rule.
pub fn field_to_av(
    registry: &Registry,
    field: &FieldDescriptor,
    value: &serde_json::Value,
    provider: Option<&dyn DataKeyProvider>,
) -> Result<Av, ConvertError> {
    if let Some(type_id) = field.type_id {
        if let Some(converter) = registry.converter(type_id) {
            return (converter.to_av)(value);
        }
    }

    match field.kind {
        FieldKind::Encrypted => {
            if value.is_null() {
                return Ok(Av::Null);
            }
            let Some(provider) = provider else {
                return Err(ConvertError::EncryptionNotConfigured);
            };
            let plaintext = serde_json::to_vec(value)?;
            Ok(provider.seal(&plaintext)?.to_av())
        }
        FieldKind::Set => set_to_av(field, value),
        FieldKind::JsonBlob => {
            if value.is_null() {
                Ok(Av::Null)
            } else {
                Ok(Av::S(serde_json::to_string(value)?))
            }
        }
        FieldKind::Ttl | FieldKind::Version => integer_to_av(field, value),
        FieldKind::CreatedAt | FieldKind::UpdatedAt => match value {
            serde_json::Value::Null => Ok(Av::Null),
            serde_json::Value::String(s) => Ok(Av::S(s.clone())),
            serde_json::Value::Number(n) => Ok(Av::N(n.to_string())),
            _ => Err(ConvertError::unsupported(
                &field.rust_name,
                "an RFC3339 string or epoch number",
            )),
        },
        FieldKind::Scalar | FieldKind::PartitionKey | FieldKind::SortKey => {
            if field.binary && !value.is_null() {
                let bytes = bytes_from_json(value).ok_or_else(|| {
                    ConvertError::unsupported(&field.rust_name, "a byte array")
                })?;
                Ok(Av::B(bytes))
            } else {
                Ok(Av::from_json(value))
            }
        }
    }
}

/// Converts one field's wire value back to its serde form.
pub fn av_to_field(
    registry: &Registry,
    field: &FieldDescriptor,
    av: &Av,
    provider: Option<&dyn DataKeyProvider>,
) -> Result<serde_json::Value, ConvertError> {
    if let Some(type_id) = field.type_id {
        if let Some(converter) = registry.converter(type_id) {
            return (converter.from_av)(av);
        }
    }

    match field.kind {
        FieldKind::Encrypted => {
            if av.is_null() {
                return Ok(serde_json::Value::Null);
            }
            // Fail closed before even parsing the envelope.
            let Some(provider) = provider else {
                return Err(ConvertError::EncryptionNotConfigured);
            };
            let envelope = Envelope::from_av(av)?;
            let plaintext = provider.open(&envelope)?;
            Ok(serde_json::from_slice(&plaintext)?)
        }
        FieldKind::Set => match av {
            // Empty sets are stored as NULL; read back as empty.
            Av::Null => Ok(serde_json::Value::Array(Vec::new())),
            Av::Ss(_) | Av::Ns(_) | Av::Bs(_) | Av::L(_) => Ok(av.to_json()),
            _ => Err(ConvertError::unsupported(&field.rust_name, "a typed set")),
        },
        FieldKind::JsonBlob => match av {
            Av::Null => Ok(serde_json::Value::Null),
            Av::S(s) => Ok(serde_json::from_str(s)?),
            _ => Err(ConvertError::unsupported(&field.rust_name, "a json string")),
        },
        FieldKind::Ttl | FieldKind::Version => match av {
            Av::Null => Ok(serde_json::Value::Null),
            Av::N(_) => Ok(av.to_json()),
            _ => Err(ConvertError::unsupported(&field.rust_name, "a number")),
        },
        FieldKind::Scalar
        | FieldKind::PartitionKey
        | FieldKind::SortKey
        | FieldKind::CreatedAt
        | FieldKind::UpdatedAt => Ok(av.to_json()),
    }
}

fn integer_to_av(field: &FieldDescriptor, value: &serde_json::Value) -> Result<Av, ConvertError> {
    match value {
        serde_json::Value::Null => Ok(Av::Null),
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Av::N(n.to_string())),
        _ => Err(ConvertError::unsupported(&field.rust_name, "an integer")),
    }
}

fn set_to_av(field: &FieldDescriptor, value: &serde_json::Value) -> Result<Av, ConvertError> {
    let items = match value {
        serde_json::Value::Null => return Ok(Av::Null),
        serde_json::Value::Array(items) => items,
        _ => return Err(ConvertError::unsupported(&field.rust_name, "a set of elements")),
    };
    // The wire protocol forbids empty typed sets.
    if items.is_empty() {
        return Ok(Av::Null);
    }

    if field.binary {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(bytes_from_json(item).ok_or_else(|| {
                ConvertError::unsupported(&field.rust_name, "a set of byte arrays")
            })?);
        }
        return Ok(Av::Bs(out));
    }

    match &items[0] {
        serde_json::Value::String(_) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    serde_json::Value::String(s) => out.push(s.clone()),
                    _ => {
                        return Err(ConvertError::unsupported(
                            &field.rust_name,
                            "homogeneous string set elements",
                        ));
                    }
                }
            }
            Ok(Av::Ss(out))
        }
        serde_json::Value::Number(_) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    serde_json::Value::Number(n) => out.push(n.to_string()),
                    _ => {
                        return Err(ConvertError::unsupported(
                            &field.rust_name,
                            "homogeneous numeric set elements",
                        ));
                    }
                }
            }
            Ok(Av::Ns(out))
        }
        serde_json::Value::Array(_) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(bytes_from_json(item).ok_or_else(|| {
                    ConvertError::unsupported(&field.rust_name, "a set of byte arrays")
                })?);
            }
            Ok(Av::Bs(out))
        }
        _ => Err(ConvertError::unsupported(
            &field.rust_name,
            "string, number, or binary set elements",
        )),
    }
}

fn bytes_from_json(value: &serde_json::Value) -> Option<Vec<u8>> {
    let serde_json::Value::Array(items) = value else {
        return None;
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(u8::try_from(item.as_u64()?).ok()?);
    }
    Some(out)
}

/// Returns `true` for the zero values that `omitempty` drops: null, empty
/// string, zero, false, and empty collections.
pub fn is_zero(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Bool(b) => !b,
        serde_json::Value::Number(n) => {
            n.as_i64() == Some(0) || n.as_u64() == Some(0) || n.as_f64() == Some(0.0)
        }
        serde_json::Value::String(s) => s.is_empty(),
        serde_json::Value::Array(items) => items.is_empty(),
        serde_json::Value::Object(map) => map.is_empty(),
    }
}
