//! The standalone update builder.
//!
//! Accumulates mutations over a single record key. Every method is
//! chainable and infallible at the call site; the first failure is
//! deferred and reported by `execute`, so the fluent surface cannot
//! panic.

use serde::Serialize;
use serde::de::DeserializeOwned;

use theorydb_core::convert;
use theorydb_core::error::ValidationError;
use theorydb_core::schema::{Descriptor, FieldKind, Model};
use theorydb_core::value::{Av, Item};
use theorydb_expr::{Connector, convert_expression_value, split_operands};

use crate::TheoryDb;
use crate::compiled::{CompiledQuery, Operation, ReturnValues};
use crate::error::{Result, TheoryError};
use crate::query::{
    CondSpec, FilterEntry, apply_condition_entries, key_from_values, now_rfc3339, record_values,
};

#[derive(Debug, Clone)]
enum Directive {
    Set { field: String, value: serde_json::Value },
    SetIfNotExists { field: String, default: serde_json::Value },
    Add { field: String, value: serde_json::Value },
    Remove { field: String },
    DeleteFromSet { field: String, value: serde_json::Value },
    Append { field: String, value: serde_json::Value, prepend: bool },
    RemoveAt { field: String, index: i64 },
    SetAt { field: String, index: i64, value: serde_json::Value },
}

/// Fluent mutation builder over one record key.
pub struct UpdateBuilder<'a, T> {
    db: &'a TheoryDb,
    record: T,
    directives: Vec<Directive>,
    conditions: Vec<FilterEntry>,
    version_guard: Option<i64>,
    return_values: Option<ReturnValues>,
    deferred: Option<TheoryError>,
}

impl<'a, T> UpdateBuilder<'a, T>
where
    T: Model + Serialize + DeserializeOwned + 'static,
{
    pub(crate) fn new(db: &'a TheoryDb, record: T) -> Self {
        Self {
            db,
            record,
            directives: Vec::new(),
            conditions: Vec::new(),
            version_guard: None,
            return_values: None,
            deferred: None,
        }
    }

    fn push(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    fn capture<V: Serialize>(&mut self, value: V) -> serde_json::Value {
        match serde_json::to_value(value) {
            Ok(v) => v,
            Err(err) => {
                if self.deferred.is_none() {
                    self.deferred =
                        Some(theorydb_core::error::ConvertError::Serde(err).into());
                }
                serde_json::Value::Null
            }
        }
    }

    // -- Mutations -----------------------------------------------------------

    /// `SET field = :v`.
    pub fn set<V: Serialize>(mut self, field: &str, value: V) -> Self {
        let value = self.capture(value);
        self.push(Directive::Set {
            field: field.to_string(),
            value,
        })
    }

    /// `SET field = if_not_exists(field, :default)`.
    pub fn set_if_not_exists<V: Serialize>(mut self, field: &str, default: V) -> Self {
        let default = self.capture(default);
        self.push(Directive::SetIfNotExists {
            field: field.to_string(),
            default,
        })
    }

    /// `ADD field :v` -- numeric increment or set union.
    pub fn add<V: Serialize>(mut self, field: &str, value: V) -> Self {
        let value = self.capture(value);
        self.push(Directive::Add {
            field: field.to_string(),
            value,
        })
    }

    /// `ADD field :one`.
    pub fn increment(self, field: &str) -> Self {
        self.add(field, 1)
    }

    /// `ADD field :minus_one`.
    pub fn decrement(self, field: &str) -> Self {
        self.add(field, -1)
    }

    /// `REMOVE field`.
    pub fn remove(self, field: &str) -> Self {
        self.push(Directive::Remove {
            field: field.to_string(),
        })
    }

    /// `DELETE field :v` -- set difference; the value must be a set.
    pub fn delete_from_set<V: Serialize>(mut self, field: &str, value: V) -> Self {
        let value = self.capture(value);
        self.push(Directive::DeleteFromSet {
            field: field.to_string(),
            value,
        })
    }

    /// `SET field = list_append(field, :v)`.
    pub fn append_to_list<V: Serialize>(mut self, field: &str, value: V) -> Self {
        let value = self.capture(value);
        self.push(Directive::Append {
            field: field.to_string(),
            value,
            prepend: false,
        })
    }

    /// `SET field = list_append(:v, field)`.
    pub fn prepend_to_list<V: Serialize>(mut self, field: &str, value: V) -> Self {
        let value = self.capture(value);
        self.push(Directive::Append {
            field: field.to_string(),
            value,
            prepend: true,
        })
    }

    /// `REMOVE field[i]`.
    pub fn remove_from_list_at(self, field: &str, index: i64) -> Self {
        self.push(Directive::RemoveAt {
            field: field.to_string(),
            index,
        })
    }

    /// `SET field[i] = :v`.
    pub fn set_list_element<V: Serialize>(mut self, field: &str, index: i64, value: V) -> Self {
        let value = self.capture(value);
        self.push(Directive::SetAt {
            field: field.to_string(),
            index,
            value,
        })
    }

    // -- Conditions ----------------------------------------------------------

    /// Appends a condition with AND.
    pub fn condition<V: Serialize + 'static>(self, field: &str, op: &str, value: V) -> Self {
        self.push_condition(Connector::And, field, op, value)
    }

    /// Appends a condition with OR.
    pub fn or_condition<V: Serialize + 'static>(self, field: &str, op: &str, value: V) -> Self {
        self.push_condition(Connector::Or, field, op, value)
    }

    fn push_condition<V: Serialize + 'static>(
        mut self,
        connector: Connector,
        field: &str,
        op: &str,
        value: V,
    ) -> Self {
        if self.deferred.is_some() {
            return self;
        }
        let spec = (|| -> Result<CondSpec> {
            let op = theorydb_core::validate::Operator::parse(op).map_err(TheoryError::from)?;
            let av = convert_expression_value(&self.db.registry, &self.db.limits(), &value)?;
            let operands = split_operands(op, av)?;
            Ok(CondSpec {
                field: field.to_string(),
                op,
                operands,
            })
        })();
        match spec {
            Ok(spec) => self.conditions.push(FilterEntry::Cond { connector, spec }),
            Err(err) => self.deferred = Some(err),
        }
        self
    }

    /// Guards on `attribute_exists(field)`.
    pub fn condition_exists(mut self, field: &str) -> Self {
        self.conditions.push(FilterEntry::Cond {
            connector: Connector::And,
            spec: CondSpec {
                field: field.to_string(),
                op: theorydb_core::validate::Operator::Exists,
                operands: Vec::new(),
            },
        });
        self
    }

    /// Guards on `attribute_not_exists(field)`.
    pub fn condition_not_exists(mut self, field: &str) -> Self {
        self.conditions.push(FilterEntry::Cond {
            connector: Connector::And,
            spec: CondSpec {
                field: field.to_string(),
                op: theorydb_core::validate::Operator::NotExists,
                operands: Vec::new(),
            },
        });
        self
    }

    /// Guards on the version field equaling `expected`; the increment uses
    /// the same base.
    pub fn condition_version(mut self, expected: i64) -> Self {
        self.version_guard = Some(expected);
        self
    }

    /// Overrides the return-values option. Defaults: NONE for
    /// [`Self::execute`], ALL_NEW for [`Self::execute_returning`].
    pub fn return_values(mut self, option: ReturnValues) -> Self {
        self.return_values = Some(option);
        self
    }

    // -- Terminals -----------------------------------------------------------

    /// Compiles and dispatches, discarding the result.
    pub fn execute(self) -> Result<()> {
        let db = self.db;
        let (compiled, key) = self.compile(ReturnValues::None)?;
        db.executor
            .execute_update_item(&compiled, &key)
            .map_err(|e| TheoryError::from_executor("UpdateItem", e))?;
        Ok(())
    }

    /// Compiles and dispatches, returning the stored item (ALL_NEW unless
    /// overridden).
    pub fn execute_returning(self) -> Result<T> {
        let db = self.db;
        let (compiled, key) = self.compile(ReturnValues::AllNew)?;
        let returned = db
            .executor
            .execute_update_item(&compiled, &key)
            .map_err(|e| TheoryError::from_executor("UpdateItem", e))?;
        match returned {
            Some(item) => Ok(convert::from_item(&db.registry, &item, db.provider_ref())?),
            None => Err(TheoryError::ItemNotFound),
        }
    }

    /// Compiles without dispatching, for the transaction assembler.
    pub(crate) fn compile_for_transaction(self) -> Result<(CompiledQuery, Item)> {
        self.compile(ReturnValues::None)
    }

    fn compile(mut self, default_rv: ReturnValues) -> Result<(CompiledQuery, Item)> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }
        let db = self.db;
        let descriptor = db.registry.descriptor_of::<T>()?;
        let values = record_values(&self.record)?;
        let key = key_from_values(db, &descriptor, &values)?;
        let mut builder = db.new_builder(descriptor.clone());

        for directive in &self.directives {
            match directive {
                Directive::Set { field, value } => {
                    let av = directive_value(db, &descriptor, field, value)?;
                    builder.set_value(field, av)?;
                }
                Directive::SetIfNotExists { field, default } => {
                    let av = directive_value(db, &descriptor, field, default)?;
                    builder.set_if_not_exists(field, av)?;
                }
                Directive::Add { field, value } => {
                    let av = directive_value(db, &descriptor, field, value)?;
                    builder.add_value(field, av)?;
                }
                Directive::Remove { field } => builder.remove_value(field)?,
                Directive::DeleteFromSet { field, value } => {
                    let av = directive_value(db, &descriptor, field, value)?;
                    builder.delete_value(field, av)?;
                }
                Directive::Append { field, value, prepend } => {
                    let av = generic_value(db, value)?;
                    builder.list_append(field, av, *prepend)?;
                }
                Directive::RemoveAt { field, index } => {
                    builder.remove_list_element(field, *index)?;
                }
                Directive::SetAt { field, index, value } => {
                    let av = generic_value(db, value)?;
                    builder.set_list_element(field, *index, av)?;
                }
            }
        }

        if let Some(idx) = descriptor.updated_at {
            builder.set_value(&descriptor.fields[idx].attribute_name, Av::s(now_rfc3339()))?;
        }
        if let Some(idx) = descriptor.version {
            let field = &descriptor.fields[idx];
            let current = self.version_guard.unwrap_or_else(|| {
                values
                    .get(&field.rust_name)
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0)
            });
            builder.add_version_pair(&field.attribute_name, current)?;
        } else if self.version_guard.is_some() {
            return Err(TheoryError::Validation(ValidationError::invalid_value(
                "model declares no version field",
            )));
        }
        apply_condition_entries(&mut builder, &self.conditions)?;

        let expressions = builder.build();
        let mut compiled = CompiledQuery::new(
            Operation::UpdateItem,
            db.resolve_table_name(&self.record, &descriptor),
        );
        compiled.update_expression = expressions.update;
        compiled.condition_expression = expressions.condition;
        compiled.expression_attribute_names = expressions.names;
        compiled.expression_attribute_values = expressions.values;
        compiled.return_values = Some(self.return_values.unwrap_or(default_rv));
        Ok((compiled, key))
    }
}

/// Converts a directive value, consulting the descriptor so tagged fields
/// (sets, json blobs, binary) keep their wire shape. Targets outside the
/// model convert generically. Automatically maintained fields reject
/// direct writes.
fn directive_value(
    db: &TheoryDb,
    descriptor: &Descriptor,
    field: &str,
    value: &serde_json::Value,
) -> Result<Av> {
    match descriptor.resolve(field) {
        Some(fd) => {
            match fd.kind {
                FieldKind::PartitionKey | FieldKind::SortKey => {
                    return Err(TheoryError::Validation(ValidationError::invalid_value(
                        "key fields cannot be updated",
                    )));
                }
                FieldKind::Version | FieldKind::CreatedAt | FieldKind::UpdatedAt => {
                    return Err(TheoryError::Validation(ValidationError::invalid_value(
                        "field is maintained automatically",
                    )));
                }
                _ => {}
            }
            Ok(convert::field_to_av(&db.registry, fd, value, db.provider_ref())?)
        }
        None => generic_value(db, value),
    }
}

fn generic_value(db: &TheoryDb, value: &serde_json::Value) -> Result<Av> {
    theorydb_core::validate::validate_value(value, &db.limits())
        .map_err(TheoryError::from)?;
    Ok(Av::from_json(value))
}
