//! The executor boundary -- the only suspension points in the system.
//!
//! The core performs no I/O. Terminal operations compile a request shape
//! and hand it to an [`Executor`]; mocks substitute freely in tests, real
//! transports live in their own crates.

use theorydb_core::value::Item;

use crate::compiled::CompiledQuery;

/// Result of a Query or Scan call.
#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    /// Matched items, in result order.
    pub items: Vec<Item>,
    /// Pagination continuation key, when the result is partial.
    pub last_evaluated_key: Option<Item>,
    /// Matched count (meaningful for `Select::Count` requests too).
    pub count: u64,
}

/// Result of one batch-get request.
#[derive(Debug, Clone, Default)]
pub struct BatchGetOutput {
    /// Retrieved items.
    pub items: Vec<Item>,
    /// Keys the store did not process; the caller re-queues them.
    pub unprocessed_keys: Vec<Item>,
}

/// One element of a batch write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    /// Store this item.
    Put { item: Item },
    /// Delete the item with this key.
    Delete { key: Item },
}

/// Result of one batch-write request.
#[derive(Debug, Clone, Default)]
pub struct BatchWriteResult {
    /// Requests the store did not process; the caller re-queues them.
    pub unprocessed: Vec<WriteRequest>,
}

/// One member of a transactional write.
#[derive(Debug, Clone)]
pub struct TransactItem {
    /// The compiled request shape (operation, expressions, placeholders).
    pub query: CompiledQuery,
    /// The full item, for Put operations.
    pub item: Option<Item>,
    /// The primary key, for Update/Delete/ConditionCheck operations.
    pub key: Option<Item>,
}

/// Store-side failures surfaced by an executor.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// A conditional write's condition did not hold.
    #[error("conditional check failed")]
    ConditionFailed,

    /// The named table does not exist.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// The named index does not exist on the table.
    #[error("index not found: {0}")]
    IndexNotFound(String),

    /// The transaction was canceled; one reason slot per submitted item
    /// (`None` when that item was not at fault).
    #[error("transaction canceled")]
    TransactionCanceled { reasons: Vec<Option<String>> },

    /// Transport or store failure outside the typed discriminators.
    #[error("{0}")]
    Store(String),
}

/// The request-shape contract consumed from external transports.
pub trait Executor: Send + Sync {
    /// Runs a Query operation.
    fn execute_query(&self, query: &CompiledQuery) -> Result<QueryOutput, ExecutorError>;

    /// Runs a Scan operation (one segment).
    fn execute_scan(&self, query: &CompiledQuery) -> Result<QueryOutput, ExecutorError>;

    /// Fetches a single item by key; `None` when absent.
    fn execute_get_item(
        &self,
        query: &CompiledQuery,
        key: &Item,
    ) -> Result<Option<Item>, ExecutorError>;

    /// Stores an item, honoring the compiled condition expression.
    fn execute_put_item(&self, query: &CompiledQuery, item: &Item) -> Result<(), ExecutorError>;

    /// Applies an update expression to the item at `key`; returns the item
    /// shape requested by `return_values`.
    fn execute_update_item(
        &self,
        query: &CompiledQuery,
        key: &Item,
    ) -> Result<Option<Item>, ExecutorError>;

    /// Deletes the item at `key`, honoring the compiled condition.
    fn execute_delete_item(&self, query: &CompiledQuery, key: &Item) -> Result<(), ExecutorError>;

    /// Fetches up to one batch of keys from one table.
    fn execute_batch_get(
        &self,
        table: &str,
        keys: &[Item],
        consistent: bool,
    ) -> Result<BatchGetOutput, ExecutorError>;

    /// Writes up to one batch of requests against one table.
    fn execute_batch_write(
        &self,
        table: &str,
        requests: &[WriteRequest],
    ) -> Result<BatchWriteResult, ExecutorError>;

    /// Applies all items atomically, or none.
    fn transact_write(&self, items: &[TransactItem]) -> Result<(), ExecutorError>;
}
