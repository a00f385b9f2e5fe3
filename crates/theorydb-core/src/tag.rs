//! The per-field tag mini-language.
//!
//! A tag is a comma-separated token list: bare modifiers (`pk`, `sk`,
//! `version`, `ttl`, `set`, `json`, `encrypted`, `omitempty`, `binary`,
//! `sparse`, `created_at`, `updated_at`), `key:value` forms (`attr:`,
//! `index:`, `local_index:`, `project:`, `naming:`, `projection:`), and a
//! positional attribute name (the first bare token that is neither a
//! modifier nor a `key:value`). `-` skips the field entirely.
//!
//! Parsed tags render back to a canonical string; `parse(render(t)) == t`.

use std::fmt;

use crate::error::ModelError;
use crate::naming::NamingConvention;

/// Which key slot a field occupies inside a global secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexRole {
    /// Partition key of the index.
    Pk,
    /// Sort key of the index.
    Sk,
}

/// Reference to a global secondary index from a field tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKeyRef {
    /// The index name.
    pub name: String,
    /// The key slot this field fills.
    pub role: IndexRole,
}

/// What an index projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectionKind {
    /// All attributes (the default).
    #[default]
    All,
    /// Keys only.
    KeysOnly,
    /// Keys plus the fields tagged `project:<index>`.
    Include,
}

impl ProjectionKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(Self::All),
            "keys_only" => Some(Self::KeysOnly),
            "include" => Some(Self::Include),
            _ => None,
        }
    }

    /// Canonical token value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::KeysOnly => "keys_only",
            Self::Include => "include",
        }
    }
}

/// A parsed field tag.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldTag {
    /// Explicit or positional attribute name; `None` means derive from the
    /// Rust field name through the naming convention.
    pub attribute: Option<String>,
    /// `-`: the field is not stored at all.
    pub skip: bool,
    pub pk: bool,
    pub sk: bool,
    pub version: bool,
    pub ttl: bool,
    pub set: bool,
    pub json: bool,
    pub encrypted: bool,
    pub omitempty: bool,
    pub binary: bool,
    pub sparse: bool,
    pub created_at: bool,
    pub updated_at: bool,
    /// `naming:` sentinel value, only meaningful on a sentinel field.
    pub naming: Option<NamingConvention>,
    /// Global-index key memberships, in tag order.
    pub global_indexes: Vec<IndexKeyRef>,
    /// Local-index sort-key memberships, in tag order.
    pub local_indexes: Vec<String>,
    /// `project:` memberships for `include` projections.
    pub projected_into: Vec<String>,
    /// `projection:` kind; must accompany exactly one index token.
    pub projection: Option<ProjectionKind>,
}

const MODIFIERS: &[&str] = &[
    "pk",
    "sk",
    "version",
    "ttl",
    "set",
    "json",
    "encrypted",
    "omitempty",
    "binary",
    "sparse",
    "created_at",
    "updated_at",
];

fn is_modifier(token: &str) -> bool {
    MODIFIERS.contains(&token)
}

fn valid_index_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
}

impl FieldTag {
    /// Parses a tag string. `field` is used only for error context.
    pub fn parse(field: &str, tag: &str) -> Result<Self, ModelError> {
        let invalid = || ModelError::InvalidTag {
            field: field.to_string(),
        };

        let mut parsed = Self::default();
        if tag.trim() == "-" {
            parsed.skip = true;
            return Ok(parsed);
        }

        for raw in tag.split(',') {
            let token = raw.trim();
            if token.is_empty() {
                if tag.trim().is_empty() {
                    break;
                }
                return Err(invalid());
            }

            if let Some((key, value)) = token.split_once(':') {
                if value.is_empty() {
                    return Err(invalid());
                }
                match key {
                    "attr" => {
                        parsed.attribute = Some(value.to_string());
                    }
                    "index" => {
                        let (name, role) = match value.split_once('/') {
                            None => (value, IndexRole::Pk),
                            Some((name, "pk")) => (name, IndexRole::Pk),
                            Some((name, "sk")) => (name, IndexRole::Sk),
                            Some(_) => return Err(invalid()),
                        };
                        if !valid_index_name(name) {
                            return Err(invalid());
                        }
                        parsed.global_indexes.push(IndexKeyRef {
                            name: name.to_string(),
                            role,
                        });
                    }
                    "local_index" => {
                        if !valid_index_name(value) {
                            return Err(invalid());
                        }
                        parsed.local_indexes.push(value.to_string());
                    }
                    "project" => {
                        if !valid_index_name(value) {
                            return Err(invalid());
                        }
                        parsed.projected_into.push(value.to_string());
                    }
                    "naming" => {
                        parsed.naming = Some(NamingConvention::parse(value).ok_or_else(invalid)?);
                    }
                    "projection" => {
                        parsed.projection = Some(ProjectionKind::parse(value).ok_or_else(invalid)?);
                    }
                    _ => return Err(invalid()),
                }
                continue;
            }

            match token {
                "pk" => parsed.pk = true,
                "sk" => parsed.sk = true,
                "version" => parsed.version = true,
                "ttl" => parsed.ttl = true,
                "set" => parsed.set = true,
                "json" => parsed.json = true,
                "encrypted" => parsed.encrypted = true,
                "omitempty" => parsed.omitempty = true,
                "binary" => parsed.binary = true,
                "sparse" => parsed.sparse = true,
                "created_at" => parsed.created_at = true,
                "updated_at" => parsed.updated_at = true,
                name if parsed.attribute.is_none() => {
                    parsed.attribute = Some(name.to_string());
                }
                // A second positional name is an unknown modifier.
                _ => return Err(invalid()),
            }
        }

        Ok(parsed)
    }
}

impl fmt::Display for FieldTag {
    /// Renders the canonical token order: attribute name first, then
    /// modifiers, then `key:value` forms.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.skip {
            return f.write_str("-");
        }
        let mut tokens: Vec<String> = Vec::new();

        if let Some(attr) = &self.attribute {
            // A name that reads as a modifier must use the explicit form.
            if is_modifier(attr) || attr.contains(':') {
                tokens.push(format!("attr:{attr}"));
            } else {
                tokens.push(attr.clone());
            }
        }
        for (flag, name) in [
            (self.pk, "pk"),
            (self.sk, "sk"),
            (self.version, "version"),
            (self.ttl, "ttl"),
            (self.created_at, "created_at"),
            (self.updated_at, "updated_at"),
            (self.set, "set"),
            (self.binary, "binary"),
            (self.json, "json"),
            (self.encrypted, "encrypted"),
            (self.omitempty, "omitempty"),
            (self.sparse, "sparse"),
        ] {
            if flag {
                tokens.push(name.to_string());
            }
        }
        if let Some(nc) = self.naming {
            tokens.push(format!("naming:{}", nc.as_str()));
        }
        for idx in &self.global_indexes {
            let role = match idx.role {
                IndexRole::Pk => "pk",
                IndexRole::Sk => "sk",
            };
            tokens.push(format!("index:{}/{role}", idx.name));
        }
        for name in &self.local_indexes {
            tokens.push(format!("local_index:{name}"));
        }
        for name in &self.projected_into {
            tokens.push(format!("project:{name}"));
        }
        if let Some(kind) = self.projection {
            tokens.push(format!("projection:{}", kind.as_str()));
        }

        f.write_str(&tokens.join(","))
    }
}
