//! Model schemas and their compiled descriptors.
//!
//! A record type declares its shape once through [`ModelSchema`]; the
//! registry compiles that into an immutable [`Descriptor`] on first use.
//! Marshaling and expression building are table walks over the descriptor
//! from then on.

use std::any::TypeId;
use std::collections::HashMap;

use crate::error::ModelError;
use crate::naming::NamingConvention;
use crate::tag::{FieldTag, IndexRole, ProjectionKind};

/// A storable record type.
///
/// `schema()` is consulted once per process per type; the result is
/// compiled and memoized. `table_name()` is resolved at call time on every
/// operation, so an implementation reading an environment variable sees
/// the current value.
pub trait Model {
    /// Declares the table and per-field tags for this record type.
    fn schema() -> ModelSchema
    where
        Self: Sized;

    /// Optional per-call table-name override. The default defers to the
    /// schema's declared table name.
    fn table_name(&self) -> Option<String> {
        None
    }
}

/// One field declaration: a Rust field name plus its tag string.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// The Rust field name (serde name) on the record.
    pub name: String,
    /// The unparsed tag string.
    pub tag: String,
    /// Captured type id for custom-converter dispatch, if declared.
    pub type_id: Option<TypeId>,
}

/// Builder for a model's declared shape.
#[derive(Debug, Clone)]
pub struct ModelSchema {
    table: String,
    naming: Option<NamingConvention>,
    fields: Vec<FieldSpec>,
}

impl ModelSchema {
    /// Creates a schema for the given table name.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            naming: None,
            fields: Vec::new(),
        }
    }

    /// Selects the attribute naming convention (default camelCase).
    pub fn naming(mut self, convention: NamingConvention) -> Self {
        self.naming = Some(convention);
        self
    }

    /// Declares a field with its tag string.
    pub fn field(mut self, name: impl Into<String>, tag: impl Into<String>) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            tag: tag.into(),
            type_id: None,
        });
        self
    }

    /// Declares a field whose value type participates in custom-converter
    /// dispatch.
    pub fn field_with<T: 'static>(mut self, name: impl Into<String>, tag: impl Into<String>) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            tag: tag.into(),
            type_id: Some(TypeId::of::<T>()),
        });
        self
    }

    /// The declared table name.
    pub fn table(&self) -> &str {
        &self.table
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Primary classification of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Plain value: scalar, list, or map, converted generically.
    Scalar,
    /// Typed set (SS/NS/BS chosen from the element type).
    Set,
    /// Serialized to JSON text and stored as a string.
    JsonBlob,
    /// Stored as an encrypted envelope; never queryable.
    Encrypted,
    /// Integer epoch-seconds garbage-collection horizon.
    Ttl,
    /// Optimistic-concurrency counter.
    Version,
    /// Auto-stamped creation time.
    CreatedAt,
    /// Auto-stamped modification time.
    UpdatedAt,
    /// Table partition key.
    PartitionKey,
    /// Table sort key.
    SortKey,
}

/// A resolved field.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    /// The Rust (serde) field name.
    pub rust_name: String,
    /// The resolved wire attribute name.
    pub attribute_name: String,
    /// Primary classification.
    pub kind: FieldKind,
    /// Omit zero values when marshaling.
    pub omitempty: bool,
    /// Omit empty values so the item drops out of a sparse index.
    pub sparse: bool,
    /// Byte-oriented: scalars become `B`, set elements become `BS`.
    pub binary: bool,
    /// The field keys a secondary index.
    pub index_member: bool,
    /// Custom-converter dispatch id, if declared on the schema.
    pub type_id: Option<TypeId>,
    /// The parsed tag, kept for introspection and round-tripping.
    pub tag: FieldTag,
}

impl FieldDescriptor {
    /// Returns `true` if the field may appear in any expression.
    pub fn queryable(&self) -> bool {
        self.kind != FieldKind::Encrypted
    }
}

/// Secondary-index flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Global secondary index: its own partition and sort key.
    Global,
    /// Local secondary index: table partition key, alternate sort key.
    Local,
}

/// A resolved secondary index.
#[derive(Debug, Clone)]
pub struct IndexDescriptor {
    pub name: String,
    pub kind: IndexKind,
    /// Field index of the index partition key.
    pub pk_field: usize,
    /// Field index of the index sort key.
    pub sk_field: Option<usize>,
    pub projection: ProjectionKind,
    /// Field indices projected by an `include` projection.
    pub projected_fields: Vec<usize>,
}

/// Immutable, memoized metadata for one record type.
#[derive(Debug)]
pub struct Descriptor {
    pub table_name: String,
    pub naming: NamingConvention,
    pub fields: Vec<FieldDescriptor>,
    /// Field index of the partition key.
    pub pk: usize,
    /// Field index of the sort key, if any.
    pub sk: Option<usize>,
    /// Field index of the version field, if any.
    pub version: Option<usize>,
    /// Field index of the TTL field, if any.
    pub ttl: Option<usize>,
    /// Field index of the created-at stamp, if any.
    pub created_at: Option<usize>,
    /// Field index of the updated-at stamp, if any.
    pub updated_at: Option<usize>,
    /// Secondary indexes in declaration order.
    pub indexes: Vec<IndexDescriptor>,
    by_attribute: HashMap<String, usize>,
    by_rust: HashMap<String, usize>,
}

impl Descriptor {
    /// Compiles a schema into a descriptor, enforcing the model invariants.
    pub fn build(schema: &ModelSchema) -> Result<Self, ModelError> {
        let model = schema.table.clone();
        if model.is_empty() {
            return Err(ModelError::invalid("empty table name"));
        }

        // Pass 1: parse all tags, pick the naming convention.
        let mut parsed: Vec<(usize, FieldTag)> = Vec::with_capacity(schema.fields.len());
        let mut naming = schema.naming;
        for (i, spec) in schema.fields.iter().enumerate() {
            let tag = FieldTag::parse(&spec.name, &spec.tag)?;
            if tag.skip {
                continue;
            }
            if let Some(nc) = tag.naming {
                if tag_is_sentinel(&tag) {
                    if naming.is_some() && naming != Some(nc) {
                        return Err(ModelError::invalid(format!(
                            "conflicting naming conventions declared on model {model}"
                        )));
                    }
                    naming = Some(nc);
                    continue;
                }
                return Err(ModelError::invalid(format!(
                    "naming token on non-sentinel field {}",
                    spec.name
                )));
            }
            parsed.push((i, tag));
        }
        let naming = naming.unwrap_or_default();

        // Pass 2: resolve fields.
        let mut fields: Vec<FieldDescriptor> = Vec::with_capacity(parsed.len());
        let mut by_attribute = HashMap::new();
        let mut by_rust = HashMap::new();
        let mut pk = None;
        let mut sk = None;
        let mut version = None;
        let mut ttl = None;
        let mut created_at = None;
        let mut updated_at = None;

        for (spec_idx, tag) in parsed {
            let spec = &schema.fields[spec_idx];
            let attribute_name = match &tag.attribute {
                Some(explicit) => {
                    if !naming.matches(explicit) {
                        return Err(ModelError::invalid(format!(
                            "attribute name for field {} violates the {} convention",
                            spec.name,
                            naming.as_str()
                        )));
                    }
                    explicit.clone()
                }
                None => naming.derive(&spec.name),
            };

            let kind = classify(&spec.name, &tag)?;
            let field_idx = fields.len();

            if by_attribute.insert(attribute_name.clone(), field_idx).is_some() {
                return Err(ModelError::invalid(format!(
                    "attribute name collision on model {model}: {attribute_name}"
                )));
            }
            by_rust.insert(spec.name.clone(), field_idx);

            match kind {
                FieldKind::PartitionKey => {
                    if pk.is_some() {
                        return Err(ModelError::DuplicatePrimaryKey {
                            model,
                            field: spec.name.clone(),
                        });
                    }
                    pk = Some(field_idx);
                }
                FieldKind::SortKey => {
                    if sk.is_some() {
                        return Err(ModelError::invalid(format!(
                            "model {model} declares a second sort key on field {}",
                            spec.name
                        )));
                    }
                    sk = Some(field_idx);
                }
                FieldKind::Version => {
                    if version.is_some() {
                        return Err(ModelError::invalid(format!(
                            "model {model} declares a second version field on {}",
                            spec.name
                        )));
                    }
                    version = Some(field_idx);
                }
                FieldKind::Ttl => {
                    if ttl.is_some() {
                        return Err(ModelError::invalid(format!(
                            "model {model} declares a second ttl field on {}",
                            spec.name
                        )));
                    }
                    ttl = Some(field_idx);
                }
                FieldKind::CreatedAt => created_at = created_at.or(Some(field_idx)),
                FieldKind::UpdatedAt => updated_at = updated_at.or(Some(field_idx)),
                _ => {}
            }

            fields.push(FieldDescriptor {
                rust_name: spec.name.clone(),
                attribute_name,
                kind,
                omitempty: tag.omitempty,
                sparse: tag.sparse,
                binary: tag.binary,
                index_member: !tag.global_indexes.is_empty() || !tag.local_indexes.is_empty(),
                type_id: spec.type_id,
                tag,
            });
        }

        let Some(pk) = pk else {
            return Err(ModelError::MissingPrimaryKey { model });
        };

        let indexes = build_indexes(&model, &fields, pk)?;

        Ok(Self {
            table_name: model,
            naming,
            fields,
            pk,
            sk,
            version,
            ttl,
            created_at,
            updated_at,
            indexes,
            by_attribute,
            by_rust,
        })
    }

    /// The partition-key field.
    pub fn pk_field(&self) -> &FieldDescriptor {
        &self.fields[self.pk]
    }

    /// The sort-key field, if any.
    pub fn sk_field(&self) -> Option<&FieldDescriptor> {
        self.sk.map(|i| &self.fields[i])
    }

    /// Resolves a user-supplied name: Rust field name first, then wire
    /// attribute name. Returns `None` for names outside the descriptor
    /// (legal for schemaless attributes).
    pub fn resolve(&self, name: &str) -> Option<&FieldDescriptor> {
        self.by_rust
            .get(name)
            .or_else(|| self.by_attribute.get(name))
            .map(|&i| &self.fields[i])
    }

    /// Looks up a secondary index by name.
    pub fn index(&self, name: &str) -> Option<&IndexDescriptor> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// The key attribute names for the table or a named index:
    /// `(partition, sort)`.
    pub fn key_schema(&self, index: Option<&str>) -> Option<(&str, Option<&str>)> {
        match index {
            None => Some((
                self.pk_field().attribute_name.as_str(),
                self.sk_field().map(|f| f.attribute_name.as_str()),
            )),
            Some(name) => {
                let idx = self.index(name)?;
                Some((
                    self.fields[idx.pk_field].attribute_name.as_str(),
                    idx.sk_field.map(|i| self.fields[i].attribute_name.as_str()),
                ))
            }
        }
    }
}

/// A sentinel carries only a naming token (and possibly a placeholder
/// attribute name such as `_`).
fn tag_is_sentinel(tag: &FieldTag) -> bool {
    let FieldTag {
        attribute,
        skip,
        pk,
        sk,
        version,
        ttl,
        set,
        json,
        encrypted,
        omitempty,
        binary,
        sparse,
        created_at,
        updated_at,
        naming,
        global_indexes,
        local_indexes,
        projected_into,
        projection,
    } = tag;
    naming.is_some()
        && !skip
        && !pk
        && !sk
        && !version
        && !ttl
        && !set
        && !json
        && !encrypted
        && !omitempty
        && !binary
        && !sparse
        && !created_at
        && !updated_at
        && attribute.is_none()
        && global_indexes.is_empty()
        && local_indexes.is_empty()
        && projected_into.is_empty()
        && projection.is_none()
}

fn classify(field: &str, tag: &FieldTag) -> Result<FieldKind, ModelError> {
    if tag.pk && tag.sk {
        return Err(ModelError::invalid(format!(
            "field {field} is tagged both pk and sk"
        )));
    }
    if tag.encrypted && (tag.pk || tag.sk || !tag.global_indexes.is_empty() || !tag.local_indexes.is_empty())
    {
        return Err(ModelError::invalid(format!(
            "encrypted field {field} cannot be a key or index member"
        )));
    }
    let exclusive = [tag.pk, tag.sk, tag.version, tag.ttl, tag.created_at, tag.updated_at, tag.encrypted]
        .iter()
        .filter(|b| **b)
        .count();
    if exclusive > 1 {
        return Err(ModelError::invalid(format!(
            "field {field} combines mutually exclusive tags"
        )));
    }
    if (tag.version || tag.ttl || tag.encrypted) && (tag.set || tag.json) {
        return Err(ModelError::invalid(format!(
            "field {field} combines mutually exclusive tags"
        )));
    }
    if tag.set && tag.json {
        return Err(ModelError::invalid(format!(
            "field {field} is tagged both set and json"
        )));
    }
    if tag.projection.is_some() && tag.global_indexes.len() + tag.local_indexes.len() != 1 {
        return Err(ModelError::invalid(format!(
            "projection tag on field {field} must accompany exactly one index token"
        )));
    }

    Ok(if tag.pk {
        FieldKind::PartitionKey
    } else if tag.sk {
        FieldKind::SortKey
    } else if tag.version {
        FieldKind::Version
    } else if tag.ttl {
        FieldKind::Ttl
    } else if tag.created_at {
        FieldKind::CreatedAt
    } else if tag.updated_at {
        FieldKind::UpdatedAt
    } else if tag.encrypted {
        FieldKind::Encrypted
    } else if tag.set {
        FieldKind::Set
    } else if tag.json {
        FieldKind::JsonBlob
    } else {
        FieldKind::Scalar
    })
}

/// Finds or appends the index slot for `name`.
fn index_slot(indexes: &mut Vec<IndexDescriptor>, name: &str, kind: IndexKind) -> usize {
    if let Some(pos) = indexes.iter().position(|i| i.name == name) {
        pos
    } else {
        indexes.push(IndexDescriptor {
            name: name.to_string(),
            kind,
            pk_field: usize::MAX,
            sk_field: None,
            projection: ProjectionKind::All,
            projected_fields: Vec::new(),
        });
        indexes.len() - 1
    }
}

fn build_indexes(
    model: &str,
    fields: &[FieldDescriptor],
    table_pk: usize,
) -> Result<Vec<IndexDescriptor>, ModelError> {
    let mut indexes: Vec<IndexDescriptor> = Vec::new();

    for (field_idx, field) in fields.iter().enumerate() {
        for key_ref in &field.tag.global_indexes {
            let pos = index_slot(&mut indexes, &key_ref.name, IndexKind::Global);
            if indexes[pos].kind != IndexKind::Global {
                return Err(ModelError::invalid(format!(
                    "index {} on model {model} is declared both global and local",
                    key_ref.name
                )));
            }
            match key_ref.role {
                IndexRole::Pk => {
                    if indexes[pos].pk_field != usize::MAX {
                        return Err(ModelError::invalid(format!(
                            "index {} on model {model} declares two partition keys",
                            key_ref.name
                        )));
                    }
                    indexes[pos].pk_field = field_idx;
                }
                IndexRole::Sk => {
                    if indexes[pos].sk_field.is_some() {
                        return Err(ModelError::invalid(format!(
                            "index {} on model {model} declares two sort keys",
                            key_ref.name
                        )));
                    }
                    indexes[pos].sk_field = Some(field_idx);
                }
            }
            if let Some(kind) = field.tag.projection {
                indexes[pos].projection = kind;
            }
        }
        for name in &field.tag.local_indexes {
            let pos = index_slot(&mut indexes, name, IndexKind::Local);
            if indexes[pos].kind != IndexKind::Local {
                return Err(ModelError::invalid(format!(
                    "index {name} on model {model} is declared both global and local"
                )));
            }
            if indexes[pos].sk_field.is_some() {
                return Err(ModelError::invalid(format!(
                    "local index {name} on model {model} declares two sort keys"
                )));
            }
            indexes[pos].pk_field = table_pk;
            indexes[pos].sk_field = Some(field_idx);
            if let Some(kind) = field.tag.projection {
                indexes[pos].projection = kind;
            }
        }
    }

    for index in &mut indexes {
        if index.pk_field == usize::MAX {
            return Err(ModelError::invalid(format!(
                "index {} on model {model} has no partition key",
                index.name
            )));
        }
    }

    // Resolve include projections.
    for (field_idx, field) in fields.iter().enumerate() {
        for name in &field.tag.projected_into {
            let Some(index) = indexes.iter_mut().find(|i| i.name == *name) else {
                return Err(ModelError::invalid(format!(
                    "field {} projects into unknown index {name}",
                    field.rust_name
                )));
            };
            index.projected_fields.push(field_idx);
        }
    }

    Ok(indexes)
}
