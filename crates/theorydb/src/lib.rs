//! Object-document mapper for DynamoDB-style wide-column stores.
//!
//! Records implement [`Model`] to describe their item shape through the
//! tag mini-language; [`TheoryDb`] compiles fluent chains into
//! [`CompiledQuery`] request shapes and hands them to an [`Executor`].
//! The core performs no I/O and never retries; everything store-facing
//! lives behind the executor trait.

pub mod batch;
pub mod compiled;
pub mod cursor;
pub mod error;
pub mod executor;
pub mod query;
pub mod transaction;
pub mod update;

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use theorydb_core::schema::Descriptor;
use theorydb_core::validate::Limits;
use theorydb_expr::ExpressionBuilder;

// Re-exports for convenience.
pub use batch::BatchGetOptions;
pub use compiled::{CompiledQuery, Operation, RetryHint, ReturnValues, Select};
pub use cursor::{decode_cursor, encode_cursor};
pub use error::{Result, TheoryError, TransactionError};
pub use executor::{
    BatchGetOutput, BatchWriteResult, Executor, ExecutorError, QueryOutput, TransactItem,
    WriteRequest,
};
pub use query::{FilterGroup, Query};
pub use theorydb_config::TheoryConfig;
pub use theorydb_core::crypto::{DataKeyProvider, Envelope};
pub use theorydb_core::{
    Av, ConvertError, Item, Model, ModelError, ModelSchema, Registry, SecurityError,
    ValidationError,
};
pub use transaction::TransactionBuilder;
pub use update::UpdateBuilder;

/// The client: an executor, a registry, configuration, and an optional
/// data-key provider for encrypted fields.
pub struct TheoryDb {
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) config: TheoryConfig,
    pub(crate) provider: Option<Arc<dyn DataKeyProvider>>,
}

impl TheoryDb {
    /// Creates a client over the process-wide registry with default
    /// configuration.
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            registry: Registry::global(),
            config: TheoryConfig::default(),
            provider: None,
        }
    }

    /// Starts a builder for non-default wiring.
    pub fn builder(executor: Arc<dyn Executor>) -> TheoryDbBuilder {
        TheoryDbBuilder {
            executor,
            registry: None,
            config: None,
            provider: None,
        }
    }

    /// The registry this client resolves descriptors and converters
    /// against.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Opens a fluent query over one record.
    pub fn model<T>(&self, record: T) -> Query<'_, T>
    where
        T: Model + Serialize + DeserializeOwned + 'static,
    {
        Query::new(self, record)
    }

    /// Opens a standalone update builder over one record key.
    pub fn update_builder<T>(&self, record: T) -> UpdateBuilder<'_, T>
    where
        T: Model + Serialize + DeserializeOwned + 'static,
    {
        UpdateBuilder::new(self, record)
    }

    /// Opens a transaction assembler.
    pub fn transaction(&self) -> TransactionBuilder<'_> {
        TransactionBuilder::new(self)
    }

    /// Marshals a record into its wire item, honoring the full tag
    /// language.
    pub fn marshal_item<T>(&self, record: &T) -> Result<Item>
    where
        T: Model + Serialize + 'static,
    {
        Ok(theorydb_core::convert::marshal_item(
            &self.registry,
            record,
            self.provider_ref(),
        )?)
    }

    /// Unmarshals a wire item into a fresh record.
    pub fn from_item<T>(&self, item: &Item) -> Result<T>
    where
        T: Model + DeserializeOwned + 'static,
    {
        Ok(theorydb_core::convert::from_item(
            &self.registry,
            item,
            self.provider_ref(),
        )?)
    }

    // -- Crate-internal plumbing ---------------------------------------------

    pub(crate) fn limits(&self) -> Limits {
        self.config.limits()
    }

    pub(crate) fn provider_ref(&self) -> Option<&dyn DataKeyProvider> {
        self.provider.as_deref()
    }

    pub(crate) fn new_builder(&self, descriptor: Arc<Descriptor>) -> ExpressionBuilder {
        ExpressionBuilder::new(descriptor, self.registry.clone(), self.limits())
    }

    /// Resolves the table name at call time: the record's override wins,
    /// then the descriptor's declared name, then the configured prefix is
    /// applied.
    pub(crate) fn resolve_table_name<T: Model>(&self, record: &T, descriptor: &Descriptor) -> String {
        let base = record
            .table_name()
            .unwrap_or_else(|| descriptor.table_name.clone());
        self.config.qualify_table(&base)
    }
}

/// Builder for a [`TheoryDb`] with non-default wiring.
pub struct TheoryDbBuilder {
    executor: Arc<dyn Executor>,
    registry: Option<Arc<Registry>>,
    config: Option<TheoryConfig>,
    provider: Option<Arc<dyn DataKeyProvider>>,
}

impl TheoryDbBuilder {
    /// Uses a private registry instead of the process-wide one (tests
    /// cannot leak state into each other this way).
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Applies a loaded configuration.
    pub fn config(mut self, config: TheoryConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Configures the data-key provider for encrypted fields. Without
    /// one, every encrypted read and write fails closed.
    pub fn data_key_provider(mut self, provider: Arc<dyn DataKeyProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Finishes the client.
    pub fn build(self) -> TheoryDb {
        TheoryDb {
            executor: self.executor,
            registry: self.registry.unwrap_or_else(Registry::global),
            config: self.config.unwrap_or_default(),
            provider: self.provider,
        }
    }
}
