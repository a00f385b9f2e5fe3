//! The transaction assembler.
//!
//! Collects mixed write operations under a single condition-check
//! contract and dispatches them as one transactional write. Any
//! validation failure aborts the whole transaction before dispatch.

use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

use theorydb_core::error::{SecurityError, ValidationError};
use theorydb_core::schema::Model;
use theorydb_core::validate::{self, Operator};
use theorydb_core::value::Av;
use theorydb_expr::{Connector, convert_expression_value, split_operands};

use crate::TheoryDb;
use crate::compiled::{CompiledQuery, Operation};
use crate::error::{Result, TheoryError, TransactionError};
use crate::executor::{ExecutorError, TransactItem};
use crate::query::{
    CondSpec, FilterEntry, compile_record_create, compile_record_delete, compile_record_update,
    key_from_values, record_values,
};
use crate::update::UpdateBuilder;

pub(crate) struct PendingOp {
    pub label: &'static str,
    pub item: TransactItem,
}

/// Assembles one transactional write.
pub struct TransactionBuilder<'a> {
    db: &'a TheoryDb,
    ops: Vec<PendingOp>,
    deferred: Option<TheoryError>,
}

impl<'a> TransactionBuilder<'a> {
    pub(crate) fn new(db: &'a TheoryDb) -> Self {
        Self {
            db,
            ops: Vec::new(),
            deferred: None,
        }
    }

    fn record_op(mut self, label: &'static str, build: impl FnOnce(&TheoryDb) -> Result<TransactItem>) -> Self {
        if self.deferred.is_some() {
            return self;
        }
        match build(self.db) {
            Ok(item) => self.ops.push(PendingOp { label, item }),
            Err(err) => self.deferred = Some(err),
        }
        self
    }

    // -- Operations ----------------------------------------------------------

    /// Unconditional Put: the item replaces whatever is stored.
    pub fn put<T: Model + Serialize + 'static>(self, record: &T) -> Self {
        self.record_op("Put", |db| {
            let descriptor = db.registry.descriptor_of::<T>()?;
            let item = theorydb_core::convert::marshal_item(&db.registry, record, db.provider_ref())?;
            let compiled = CompiledQuery::new(
                Operation::PutItem,
                db.resolve_table_name(record, &descriptor),
            );
            Ok(TransactItem {
                query: compiled,
                item: Some(item),
                key: None,
            })
        })
    }

    /// Put guarded by `attribute_not_exists(pk)`, with timestamps and a
    /// fresh version stamped.
    pub fn create<T: Model + Serialize + 'static>(self, record: &T) -> Self {
        self.record_op("Create", |db| {
            let descriptor = db.registry.descriptor_of::<T>()?;
            let (compiled, item) = compile_record_create(db, record, &descriptor, &[])?;
            Ok(TransactItem {
                query: compiled,
                item: Some(item),
                key: None,
            })
        })
    }

    /// Update of the named fields, with the automatic version pair.
    pub fn update<T: Model + Serialize + DeserializeOwned + 'static>(
        self,
        record: &T,
        fields: &[&str],
    ) -> Self {
        self.record_op("Update", |db| {
            let descriptor = db.registry.descriptor_of::<T>()?;
            let state = crate::query::QueryState::default();
            let (compiled, key) = compile_record_update(
                db,
                record,
                &descriptor,
                &state,
                fields,
                crate::compiled::ReturnValues::None,
            )?;
            Ok(TransactItem {
                query: compiled,
                item: None,
                key: Some(key),
            })
        })
    }

    /// Incorporates a prepared [`UpdateBuilder`] as one member.
    pub fn update_with_builder<T: Model + Serialize + DeserializeOwned + 'static>(
        self,
        builder: UpdateBuilder<'a, T>,
    ) -> Self {
        self.record_op("Update", |_db| {
            let (compiled, key) = builder.compile_for_transaction()?;
            Ok(TransactItem {
                query: compiled,
                item: None,
                key: Some(key),
            })
        })
    }

    /// Delete of the record's key, with a version-equals guard when the
    /// record carries a nonzero version.
    pub fn delete<T: Model + Serialize + 'static>(self, record: &T) -> Self {
        self.record_op("Delete", |db| {
            let descriptor = db.registry.descriptor_of::<T>()?;
            let (compiled, key) = compile_record_delete(db, record, &descriptor, &[])?;
            Ok(TransactItem {
                query: compiled,
                item: None,
                key: Some(key),
            })
        })
    }

    /// Pure guard: the transaction commits only if the comparison holds.
    pub fn condition_check<T, V>(self, record: &T, field: &str, op: &str, value: V) -> Self
    where
        T: Model + Serialize + 'static,
        V: Serialize + 'static,
    {
        self.record_op("ConditionCheck", |db| {
            let op = Operator::parse(op).map_err(TheoryError::from)?;
            let av = convert_expression_value(&db.registry, &db.limits(), &value)?;
            let operands = split_operands(op, av)?;
            condition_check_item(db, record, &[FilterEntry::Cond {
                connector: Connector::And,
                spec: CondSpec {
                    field: field.to_string(),
                    op,
                    operands,
                },
            }])
        })
    }

    /// Guard: the item must exist.
    pub fn condition_check_exists<T: Model + Serialize + 'static>(self, record: &T) -> Self {
        self.check_presence(record, Operator::Exists)
    }

    /// Guard: the item must not exist.
    pub fn condition_check_not_exists<T: Model + Serialize + 'static>(self, record: &T) -> Self {
        self.check_presence(record, Operator::NotExists)
    }

    fn check_presence<T: Model + Serialize + 'static>(self, record: &T, op: Operator) -> Self {
        self.record_op("ConditionCheck", |db| {
            let descriptor = db.registry.descriptor_of::<T>()?;
            let field = descriptor.pk_field().attribute_name.clone();
            condition_check_item(db, record, &[FilterEntry::Cond {
                connector: Connector::And,
                spec: CondSpec {
                    field,
                    op,
                    operands: Vec::new(),
                },
            }])
        })
    }

    /// Guard: the version field must equal `expected`.
    pub fn check_version<T: Model + Serialize + 'static>(self, record: &T, expected: i64) -> Self {
        self.record_op("ConditionCheck", |db| {
            let descriptor = db.registry.descriptor_of::<T>()?;
            let Some(idx) = descriptor.version else {
                return Err(TheoryError::Validation(ValidationError::invalid_value(
                    "model declares no version field",
                )));
            };
            let field = descriptor.fields[idx].attribute_name.clone();
            condition_check_item(db, record, &[FilterEntry::Cond {
                connector: Connector::And,
                spec: CondSpec {
                    field,
                    op: Operator::Eq,
                    operands: vec![Av::n(expected)],
                },
            }])
        })
    }

    /// Pure guard from a raw condition expression.
    ///
    /// The expression must reference identifiers and literals only through
    /// the supplied placeholder maps; undeclared placeholders or stray
    /// characters reject the whole transaction.
    pub fn condition_check_raw<T: Model + Serialize + 'static>(
        self,
        record: &T,
        expression: &str,
        names: HashMap<String, String>,
        values: HashMap<String, Av>,
    ) -> Self {
        let expression = expression.to_string();
        self.record_op("ConditionCheck", move |db| {
            validate_raw_expression(&expression, &names, &values, &db.limits())?;
            let descriptor = db.registry.descriptor_of::<T>()?;
            let record_map = record_values(record)?;
            let key = key_from_values(db, &descriptor, &record_map)?;

            let mut compiled = CompiledQuery::new(
                Operation::TransactWriteItems,
                db.resolve_table_name(record, &descriptor),
            );
            compiled.condition_expression = Some(expression);
            compiled.expression_attribute_names = names;
            compiled.expression_attribute_values = values;
            Ok(TransactItem {
                query: compiled,
                item: None,
                key: Some(key),
            })
        })
    }

    // -- Terminal ------------------------------------------------------------

    /// Validates the assembled set and dispatches it atomically.
    pub fn execute(self) -> Result<()> {
        let db = self.db;
        let ops = self.into_ops()?;
        let items: Vec<TransactItem> = ops.iter().map(|op| op.item.clone()).collect();

        match db.executor.transact_write(&items) {
            Ok(()) => Ok(()),
            Err(ExecutorError::TransactionCanceled { reasons }) => {
                let mut errors: Vec<TransactionError> = reasons
                    .iter()
                    .enumerate()
                    .filter_map(|(i, reason)| {
                        let reason = reason.as_ref()?;
                        if reason == "None" {
                            return None;
                        }
                        Some(TransactionError {
                            operation: ops.get(i).map(|op| op.label).unwrap_or("Unknown"),
                            operation_index: i,
                            reason: reason.clone(),
                            cause: None,
                        })
                    })
                    .collect();
                if errors.is_empty() {
                    errors = ops
                        .iter()
                        .enumerate()
                        .map(|(i, op)| TransactionError {
                            operation: op.label,
                            operation_index: i,
                            reason: "TransactionCanceled".to_string(),
                            cause: None,
                        })
                        .collect();
                }
                Err(TheoryError::TransactionFailed { errors })
            }
            Err(other) => Err(TheoryError::from_executor("TransactWriteItems", other)),
        }
    }

    /// Surfaces deferred failures and enforces the item cap.
    pub(crate) fn into_ops(mut self) -> Result<Vec<PendingOp>> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }
        if self.ops.is_empty() {
            return Err(TheoryError::Validation(ValidationError::invalid_value(
                "transaction has no operations",
            )));
        }
        let cap = self.db.config.transaction.max_items;
        if self.ops.len() > cap {
            return Err(TheoryError::Validation(ValidationError::invalid_value(
                format!("transaction exceeds the {cap}-item cap"),
            )));
        }
        Ok(self.ops)
    }
}

fn condition_check_item<T: Model + Serialize + 'static>(
    db: &TheoryDb,
    record: &T,
    conditions: &[FilterEntry],
) -> Result<TransactItem> {
    let descriptor = db.registry.descriptor_of::<T>()?;
    let values = record_values(record)?;
    let key = key_from_values(db, &descriptor, &values)?;

    let mut builder = db.new_builder(descriptor.clone());
    crate::query::apply_condition_entries(&mut builder, conditions)?;
    let expressions = builder.build();

    let mut compiled = CompiledQuery::new(
        Operation::TransactWriteItems,
        db.resolve_table_name(record, &descriptor),
    );
    compiled.condition_expression = expressions.condition;
    compiled.expression_attribute_names = expressions.names;
    compiled.expression_attribute_values = expressions.values;
    Ok(TransactItem {
        query: compiled,
        item: None,
        key: Some(key),
    })
}

/// A raw expression may only contain placeholder references, comparison
/// punctuation, and function-call syntax; every placeholder it names must
/// be declared, and declared attribute names must themselves be valid
/// identifiers.
fn validate_raw_expression(
    expression: &str,
    names: &HashMap<String, String>,
    values: &HashMap<String, Av>,
    limits: &theorydb_core::validate::Limits,
) -> Result<()> {
    if expression.trim().is_empty() {
        return Err(TheoryError::Validation(ValidationError::invalid_value(
            "empty condition expression",
        )));
    }
    for c in expression.chars() {
        let allowed = c.is_ascii_alphanumeric()
            || c.is_ascii_whitespace()
            || "#:_()=<>.,+-".contains(c);
        if !allowed {
            return Err(SecurityError::invalid_field(
                "condition expression contains forbidden characters",
            )
            .into());
        }
    }
    for token in expression.split(|c: char| !(c.is_ascii_alphanumeric() || "#:_".contains(c))) {
        if token.starts_with('#') && !names.contains_key(token) {
            return Err(TheoryError::Validation(ValidationError::invalid_value(
                "expression references an undeclared name placeholder",
            )));
        }
        if token.starts_with(':') && !values.contains_key(token) {
            return Err(TheoryError::Validation(ValidationError::invalid_value(
                "expression references an undeclared value placeholder",
            )));
        }
    }
    for attribute in names.values() {
        validate::validate_identifier(attribute, limits).map_err(TheoryError::from)?;
    }
    Ok(())
}
