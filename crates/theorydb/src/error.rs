//! The umbrella error type for the client crate.

use theorydb_core::error::{ConvertError, ModelError, SecurityError, ValidationError};
use theorydb_core::value::Item;
use theorydb_expr::ExprError;

use crate::executor::{ExecutorError, WriteRequest};

/// One failed member of a transactional write.
///
/// `operation_index` is the originally submitted position, not the wire
/// position.
#[derive(Debug, thiserror::Error)]
#[error("{operation} at index {operation_index}: {reason}")]
pub struct TransactionError {
    /// The operation kind (`Put`, `Create`, `Update`, `Delete`,
    /// `ConditionCheck`).
    pub operation: &'static str,
    /// Position in submission order.
    pub operation_index: usize,
    /// The store's cancellation reason code.
    pub reason: String,
    /// Optional human-readable store message.
    pub cause: Option<String>,
}

/// One failed chunk of a batch operation.
#[derive(Debug, thiserror::Error)]
#[error("chunk {chunk}: {source}")]
pub struct BatchChunkError {
    /// Zero-based chunk number.
    pub chunk: usize,
    /// The store-side failure.
    #[source]
    pub source: ExecutorError,
}

/// An element a batch operation could not complete.
#[derive(Debug, Clone)]
pub enum UnprocessedItem {
    /// A batch-get key that was never satisfied.
    GetKey(Item),
    /// A write request the store kept returning.
    Write(WriteRequest),
}

/// Errors surfaced by the client crate.
#[derive(Debug, thiserror::Error)]
pub enum TheoryError {
    /// No item matched the key.
    #[error("item not found")]
    ItemNotFound,

    /// A store-side conditional write failed.
    #[error("conditional check failed")]
    ConditionFailed,

    /// A transactional write was canceled.
    #[error("transaction failed: {} operation(s) at fault", errors.len())]
    TransactionFailed {
        /// Per-item failures, in submission order.
        errors: Vec<TransactionError>,
    },

    /// The named index is not declared on the model.
    #[error("index not found: {0}")]
    IndexNotFound(String),

    /// The table does not exist in the store.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// A batch operation left failures or unprocessed elements behind.
    #[error(
        "batch operation failed: {} chunk error(s), {} unprocessed item(s)",
        errors.len(),
        unprocessed.len()
    )]
    BatchOperationFailed {
        /// Per-chunk store failures.
        errors: Vec<BatchChunkError>,
        /// Elements never processed after the bounded retry passes.
        unprocessed: Vec<UnprocessedItem>,
    },

    /// Descriptor or tag problem.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Identifier, operator, or value rejection.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Record/item conversion failure.
    #[error(transparent)]
    Convert(#[from] ConvertError),

    /// Expression-builder failure.
    #[error(transparent)]
    Expr(#[from] ExprError),

    /// Executor failure outside the typed discriminators, wrapped with an
    /// opaque operation label.
    #[error("theorydb: {operation} operation failed: {source}")]
    Executor {
        /// The wire operation that failed.
        operation: &'static str,
        /// The underlying store failure.
        #[source]
        source: ExecutorError,
    },
}

/// Convenience alias used throughout the client crate.
pub type Result<T> = std::result::Result<T, TheoryError>;

impl From<SecurityError> for TheoryError {
    fn from(err: SecurityError) -> Self {
        Self::Validation(ValidationError::Security(err))
    }
}

impl TheoryError {
    /// Maps a store-side failure onto the typed discriminators, wrapping
    /// everything else with the operation label.
    pub(crate) fn from_executor(operation: &'static str, err: ExecutorError) -> Self {
        match err {
            ExecutorError::ConditionFailed => Self::ConditionFailed,
            ExecutorError::TableNotFound(name) => Self::TableNotFound(name),
            ExecutorError::IndexNotFound(name) => Self::IndexNotFound(name),
            other => Self::Executor {
                operation,
                source: other,
            },
        }
    }

    // -- Predicates ----------------------------------------------------------

    /// Returns `true` if no item matched the key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ItemNotFound)
    }

    /// Returns `true` if a conditional write failed.
    pub fn is_condition_failed(&self) -> bool {
        matches!(self, Self::ConditionFailed)
    }

    /// Returns `true` if a transactional write was canceled.
    pub fn is_transaction_failed(&self) -> bool {
        matches!(self, Self::TransactionFailed { .. })
    }

    /// Returns `true` if an encrypted field was touched with no data-key
    /// provider configured, anywhere in the chain.
    pub fn is_encryption_not_configured(&self) -> bool {
        match self {
            Self::Convert(err) => err.is_encryption_not_configured(),
            Self::Expr(ExprError::Convert(err)) => err.is_encryption_not_configured(),
            _ => false,
        }
    }

    /// Returns `true` if an encrypted field was referenced by an
    /// expression.
    pub fn is_encrypted_field_not_queryable(&self) -> bool {
        matches!(self, Self::Expr(err) if err.is_encrypted_field())
    }

    /// Returns `true` for a malformed-value rejection, anywhere in the
    /// chain.
    pub fn is_invalid_value(&self) -> bool {
        match self {
            Self::Validation(err) => err.is_invalid_value(),
            Self::Expr(ExprError::Validation(err)) => err.is_invalid_value(),
            _ => false,
        }
    }

    /// Returns `true` for an identifier-grammar rejection, anywhere in the
    /// chain.
    pub fn is_security(&self) -> bool {
        match self {
            Self::Validation(err) => err.is_security(),
            Self::Expr(ExprError::Validation(err)) => err.is_security(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executor_wrap_preserves_source_and_label() {
        let err = TheoryError::from_executor("Query", ExecutorError::Store("timeout".into()));
        let msg = err.to_string();
        assert!(msg.starts_with("theorydb: Query operation failed:"));
        assert!(msg.contains("timeout"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn typed_discriminators_map_through() {
        assert!(
            TheoryError::from_executor("PutItem", ExecutorError::ConditionFailed)
                .is_condition_failed()
        );
        assert!(matches!(
            TheoryError::from_executor("Query", ExecutorError::TableNotFound("users".into())),
            TheoryError::TableNotFound(_)
        ));
        assert!(matches!(
            TheoryError::from_executor("Query", ExecutorError::IndexNotFound("gsi".into())),
            TheoryError::IndexNotFound(_)
        ));
    }

    #[test]
    fn encryption_predicate_walks_the_chain() {
        let err = TheoryError::Convert(ConvertError::EncryptionNotConfigured);
        assert!(err.is_encryption_not_configured());

        let err = TheoryError::Expr(ExprError::Convert(ConvertError::EncryptionNotConfigured));
        assert!(err.is_encryption_not_configured());

        assert!(!TheoryError::ItemNotFound.is_encryption_not_configured());
    }

    #[test]
    fn invalid_value_predicate_walks_the_chain() {
        let err = TheoryError::Validation(ValidationError::invalid_value("bad shape"));
        assert!(err.is_invalid_value());
        let err = TheoryError::Expr(ExprError::Validation(ValidationError::invalid_value("x")));
        assert!(err.is_invalid_value());
    }
}
