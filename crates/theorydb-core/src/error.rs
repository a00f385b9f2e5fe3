//! Error types shared across the core crate.

/// Problems detected while parsing tags or building a model descriptor.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The model declares no partition-key field.
    #[error("model {model} has no partition key field")]
    MissingPrimaryKey {
        /// Table or record name the schema was built for.
        model: String,
    },

    /// More than one field is tagged `pk`.
    #[error("model {model} declares a second partition key on field {field}")]
    DuplicatePrimaryKey {
        /// Table or record name the schema was built for.
        model: String,
        /// The second field carrying a `pk` tag.
        field: String,
    },

    /// A field tag could not be parsed. The offending token is deliberately
    /// not included in the message.
    #[error("invalid tag on field {field}")]
    InvalidTag {
        /// The field whose tag failed to parse.
        field: String,
    },

    /// A structural problem with the model as a whole (colliding attribute
    /// names, naming-convention violations, malformed index layout).
    #[error("invalid model: {reason}")]
    InvalidModel {
        /// Description of the structural problem.
        reason: String,
    },

    /// A converter is already registered for this type with different
    /// behavior. Registrations never overwrite each other.
    #[error("a conflicting converter is already registered for {type_name}")]
    ConverterConflict {
        /// The Rust type the registration targeted.
        type_name: &'static str,
    },
}

impl ModelError {
    /// Creates an [`ModelError::InvalidModel`] with the given reason.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidModel {
            reason: reason.into(),
        }
    }
}

/// Classification of a rejected identifier.
///
/// The detail string describes the violation without ever echoing the
/// rejected input, so hostile field names cannot reach logs or error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityKind {
    /// A field name or path segment failed the identifier grammar.
    InvalidField,
    /// An identifier exceeded the configured maximum length.
    OversizedName,
}

impl SecurityKind {
    /// Returns the stable string form used in messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidField => "InvalidField",
            Self::OversizedName => "OversizedName",
        }
    }
}

/// A rejected identifier, operator shape, or path.
#[derive(Debug, Clone, thiserror::Error)]
#[error("security violation ({}): {detail}", kind.as_str())]
pub struct SecurityError {
    /// What class of violation occurred.
    pub kind: SecurityKind,
    /// A description that never contains the rejected input.
    pub detail: &'static str,
}

impl SecurityError {
    /// Creates a [`SecurityKind::InvalidField`] error.
    pub fn invalid_field(detail: &'static str) -> Self {
        Self {
            kind: SecurityKind::InvalidField,
            detail,
        }
    }
}

/// Rejections produced by the validator before any expression text exists.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// An identifier or path failed validation.
    #[error(transparent)]
    Security(#[from] SecurityError),

    /// The operator is not in the closed operator set.
    #[error("invalid operator: {0}")]
    InvalidOperator(String),

    /// A value is malformed for its position. The reason describes the
    /// shape problem, never the value itself.
    #[error("invalid value: {reason}")]
    InvalidValue {
        /// Why the value was rejected.
        reason: String,
    },
}

impl ValidationError {
    /// Creates an [`ValidationError::InvalidValue`] with the given reason.
    pub fn invalid_value(reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this is an [`ValidationError::InvalidValue`].
    pub fn is_invalid_value(&self) -> bool {
        matches!(self, Self::InvalidValue { .. })
    }

    /// Returns `true` if this is a [`SecurityError`] rejection.
    pub fn is_security(&self) -> bool {
        matches!(self, Self::Security(_))
    }
}

/// Failures while converting between records and attribute values.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// A value's runtime shape cannot be represented on the wire.
    #[error("unsupported type: {detail}")]
    UnsupportedType {
        /// Field and expectation, e.g. `"field version: expected integer"`.
        detail: String,
    },

    /// An encrypted field was touched but no data-key provider is
    /// configured. Both reads and writes fail closed.
    #[error("encryption is not configured")]
    EncryptionNotConfigured,

    /// A stored encrypted envelope does not have the expected shape.
    #[error("invalid encrypted envelope: {reason}")]
    InvalidEncryptedEnvelope {
        /// Which part of the envelope was malformed.
        reason: &'static str,
    },

    /// The record could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The record's descriptor could not be built.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// A value failed validation during conversion.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl ConvertError {
    /// Creates an [`ConvertError::UnsupportedType`] for the given field.
    pub fn unsupported(field: &str, expected: &str) -> Self {
        Self::UnsupportedType {
            detail: format!("field {field}: expected {expected}"),
        }
    }

    /// Returns `true` if encryption was required but not configured.
    pub fn is_encryption_not_configured(&self) -> bool {
        matches!(self, Self::EncryptionNotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_error_never_echoes_input() {
        let err = SecurityError::invalid_field("segment contains forbidden characters");
        let msg = err.to_string();
        assert!(msg.contains("InvalidField"));
        assert!(!msg.contains('[') && !msg.contains(';'));
    }

    #[test]
    fn convert_error_predicates() {
        assert!(ConvertError::EncryptionNotConfigured.is_encryption_not_configured());
        assert!(!ConvertError::unsupported("ttl", "integer").is_encryption_not_configured());
    }

    #[test]
    fn validation_error_predicates() {
        let err = ValidationError::invalid_value("string exceeds maximum length");
        assert!(err.is_invalid_value());
        assert!(!err.is_security());

        let err = ValidationError::from(SecurityError::invalid_field("empty segment"));
        assert!(err.is_security());
    }
}
