//! The compiled request shape handed to the executor.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use theorydb_core::value::{Av, Item};

/// The wire operation a compiled query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Query,
    Scan,
    GetItem,
    PutItem,
    UpdateItem,
    DeleteItem,
    BatchGetItem,
    BatchWriteItem,
    TransactWriteItems,
}

impl Operation {
    /// The wire name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "Query",
            Self::Scan => "Scan",
            Self::GetItem => "GetItem",
            Self::PutItem => "PutItem",
            Self::UpdateItem => "UpdateItem",
            Self::DeleteItem => "DeleteItem",
            Self::BatchGetItem => "BatchGetItem",
            Self::BatchWriteItem => "BatchWriteItem",
            Self::TransactWriteItems => "TransactWriteItems",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a mutating operation returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnValues {
    #[default]
    None,
    AllOld,
    UpdatedOld,
    AllNew,
    UpdatedNew,
}

impl ReturnValues {
    /// The wire name of the option.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::AllOld => "ALL_OLD",
            Self::UpdatedOld => "UPDATED_OLD",
            Self::AllNew => "ALL_NEW",
            Self::UpdatedNew => "UPDATED_NEW",
        }
    }
}

/// Query/Scan result selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Select {
    AllAttributes,
    Count,
    SpecificAttributes,
}

impl Select {
    /// The wire name of the selection.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllAttributes => "ALL_ATTRIBUTES",
            Self::Count => "COUNT",
            Self::SpecificAttributes => "SPECIFIC_ATTRIBUTES",
        }
    }
}

/// Retry intent attached for the executor. The core itself never retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryHint {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

/// The language-neutral request shape produced by a terminal operation.
///
/// Expression strings reference identifiers and literals exclusively
/// through the `expression_attribute_names` / `expression_attribute_values`
/// maps. `retry` and `deadline` are attached for the executor and never
/// interpreted by the core.
#[derive(Debug, Clone, Default)]
pub struct CompiledQuery {
    pub operation: Option<Operation>,
    pub table_name: String,
    pub index_name: Option<String>,
    pub key_condition_expression: Option<String>,
    pub filter_expression: Option<String>,
    pub projection_expression: Option<String>,
    pub update_expression: Option<String>,
    pub condition_expression: Option<String>,
    pub expression_attribute_names: HashMap<String, String>,
    pub expression_attribute_values: HashMap<String, Av>,
    pub limit: Option<u32>,
    pub scan_index_forward: Option<bool>,
    pub consistent_read: Option<bool>,
    pub exclusive_start_key: Option<Item>,
    pub segment: Option<u32>,
    pub total_segments: Option<u32>,
    pub select: Option<Select>,
    pub return_values: Option<ReturnValues>,
    pub retry: Option<RetryHint>,
    pub deadline: Option<DateTime<Utc>>,
}

impl CompiledQuery {
    /// Creates an empty compiled query for one operation and table.
    pub fn new(operation: Operation, table_name: impl Into<String>) -> Self {
        Self {
            operation: Some(operation),
            table_name: table_name.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names() {
        assert_eq!(Operation::TransactWriteItems.as_str(), "TransactWriteItems");
        assert_eq!(ReturnValues::AllNew.as_str(), "ALL_NEW");
        assert_eq!(ReturnValues::default().as_str(), "NONE");
        assert_eq!(Select::Count.as_str(), "COUNT");
    }
}
