//! Batch get/write: chunking, bounded unprocessed retry, progress.

use std::collections::HashSet;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use theorydb_core::convert;
use theorydb_core::schema::Model;
use theorydb_core::value::{Av, Item};

use crate::TheoryDb;
use crate::error::{BatchChunkError, Result, TheoryError, UnprocessedItem};
use crate::executor::WriteRequest;
use crate::query::{key_from_values, record_values};

/// Options for a batch get.
pub struct BatchGetOptions {
    /// Keys per request; defaults to the configured batch get size.
    pub chunk_size: Option<usize>,
    /// Strongly consistent reads.
    pub consistent: bool,
    /// Invoked after every request with the cumulative retrieved count.
    pub progress: Option<Box<dyn Fn(usize) + Send + Sync>>,
}

impl Default for BatchGetOptions {
    fn default() -> Self {
        Self {
            chunk_size: None,
            consistent: false,
            progress: None,
        }
    }
}

impl TheoryDb {
    /// Extracts a record's primary-key map, for batch operations.
    pub fn key_for<T: Model + Serialize + 'static>(&self, record: &T) -> Result<Item> {
        let descriptor = self.registry.descriptor_of::<T>()?;
        let values = record_values(record)?;
        key_from_values(self, &descriptor, &values)
    }

    /// Fetches many items by key.
    ///
    /// Keys are deduplicated, partitioned into chunks, and each chunk is
    /// one executor call; unprocessed keys are re-queued for a bounded
    /// number of extra passes, then surfaced in
    /// [`TheoryError::BatchOperationFailed`].
    pub fn batch_get<T>(&self, keys: &[Item], options: BatchGetOptions) -> Result<Vec<T>>
    where
        T: Model + Serialize + DeserializeOwned + 'static,
    {
        let descriptor = self.registry.descriptor_of::<T>()?;
        let table = self.config.qualify_table(&descriptor.table_name);
        let chunk_size = options.chunk_size.unwrap_or(self.config.batch.get_size).max(1);

        // Duplicate keys would make one chunk illegal; drop repeats while
        // keeping first-seen order.
        let mut seen = HashSet::new();
        let mut pending: Vec<Item> = Vec::with_capacity(keys.len());
        for key in keys {
            if seen.insert(canonical_key(key)) {
                pending.push(key.clone());
            }
        }

        let mut items: Vec<Item> = Vec::new();
        let mut errors: Vec<BatchChunkError> = Vec::new();
        let mut chunk_index = 0usize;
        let max_passes = 1 + self.config.batch.unprocessed_passes;

        for _pass in 0..max_passes {
            if pending.is_empty() {
                break;
            }
            let mut next_pending: Vec<Item> = Vec::new();
            for chunk in pending.chunks(chunk_size) {
                match self
                    .executor
                    .execute_batch_get(&table, chunk, options.consistent)
                {
                    Ok(output) => {
                        items.extend(output.items);
                        next_pending.extend(output.unprocessed_keys);
                    }
                    Err(err) => {
                        errors.push(BatchChunkError {
                            chunk: chunk_index,
                            source: err,
                        });
                        next_pending.extend(chunk.iter().cloned());
                    }
                }
                if let Some(progress) = &options.progress {
                    progress(items.len());
                }
                chunk_index += 1;
            }
            // A pass that made no headway will not converge.
            if next_pending.len() == pending.len() {
                pending = next_pending;
                break;
            }
            pending = next_pending;
        }

        debug!(
            table = %table,
            retrieved = items.len(),
            leftover = pending.len(),
            "batch get finished"
        );

        if !errors.is_empty() || !pending.is_empty() {
            return Err(TheoryError::BatchOperationFailed {
                errors,
                unprocessed: pending.into_iter().map(UnprocessedItem::GetKey).collect(),
            });
        }

        let mut records = Vec::with_capacity(items.len());
        for item in &items {
            records.push(convert::from_item(&self.registry, item, self.provider_ref())?);
        }
        Ok(records)
    }

    /// Writes puts and deletes in chunks of the configured write size.
    ///
    /// No item appears in more than one chunk; store-side unprocessed
    /// requests are retried for a bounded number of passes.
    pub fn batch_write<T>(&self, puts: &[T], delete_keys: &[Item]) -> Result<()>
    where
        T: Model + Serialize + 'static,
    {
        let descriptor = self.registry.descriptor_of::<T>()?;
        let table = self.config.qualify_table(&descriptor.table_name);
        let chunk_size = self.config.batch.write_size.max(1);

        let mut pending: Vec<WriteRequest> = Vec::with_capacity(puts.len() + delete_keys.len());
        for record in puts {
            let item = convert::marshal_item(&self.registry, record, self.provider_ref())?;
            pending.push(WriteRequest::Put { item });
        }
        for key in delete_keys {
            pending.push(WriteRequest::Delete { key: key.clone() });
        }

        let mut errors: Vec<BatchChunkError> = Vec::new();
        let mut failed: Vec<WriteRequest> = Vec::new();
        let mut chunk_index = 0usize;
        let max_passes = 1 + self.config.batch.unprocessed_passes;

        for _pass in 0..max_passes {
            if pending.is_empty() {
                break;
            }
            let mut next_pending: Vec<WriteRequest> = Vec::new();
            for chunk in pending.chunks(chunk_size) {
                match self.executor.execute_batch_write(&table, chunk) {
                    Ok(result) => next_pending.extend(result.unprocessed),
                    Err(err) => {
                        errors.push(BatchChunkError {
                            chunk: chunk_index,
                            source: err,
                        });
                        // An errored chunk is not retried blindly; its
                        // requests surface to the caller.
                        failed.extend(chunk.iter().cloned());
                    }
                }
                chunk_index += 1;
            }
            if next_pending.len() == pending.len() {
                pending = next_pending;
                break;
            }
            pending = next_pending;
        }

        failed.extend(pending);
        if !errors.is_empty() || !failed.is_empty() {
            return Err(TheoryError::BatchOperationFailed {
                errors,
                unprocessed: failed.into_iter().map(UnprocessedItem::Write).collect(),
            });
        }
        Ok(())
    }
}

/// A stable textual form of a key map, for dedup membership.
fn canonical_key(key: &Item) -> String {
    let sorted: std::collections::BTreeMap<&String, &Av> = key.iter().collect();
    serde_json::to_string(&sorted).unwrap_or_default()
}
