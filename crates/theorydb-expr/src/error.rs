//! Expression-builder error type.

use theorydb_core::error::{ConvertError, SecurityError, ValidationError};

/// Errors produced while building an expression.
#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    /// An identifier, operator, or value failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The field is encrypted; no expression may reference it. Raised
    /// before any placeholder is allocated.
    #[error("field {field} is encrypted and cannot be queried")]
    EncryptedFieldNotQueryable {
        /// The encrypted field's attribute name.
        field: String,
    },

    /// A value could not be serialized.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A custom converter failed while producing an expression value.
    #[error(transparent)]
    Convert(#[from] ConvertError),
}

impl From<SecurityError> for ExprError {
    fn from(err: SecurityError) -> Self {
        Self::Validation(ValidationError::Security(err))
    }
}

impl ExprError {
    /// Returns `true` if this is the encrypted-field rejection.
    pub fn is_encrypted_field(&self) -> bool {
        matches!(self, Self::EncryptedFieldNotQueryable { .. })
    }
}
