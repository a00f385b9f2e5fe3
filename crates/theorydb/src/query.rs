//! The fluent query chain and its compiler.
//!
//! A [`Query`] is created by [`TheoryDb::model`], mutated only by chain
//! methods, and consumed exactly once by a terminal operation. Chain
//! methods never panic: the first failure is deferred and surfaces from
//! the terminal.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use theorydb_core::convert;
use theorydb_core::error::{ModelError, ValidationError};
use theorydb_core::registry::Registry;
use theorydb_core::schema::{Descriptor, FieldKind, Model};
use theorydb_core::validate::{Limits, Operator};
use theorydb_core::value::{Av, Item};
use theorydb_expr::{Connector, ExpressionBuilder, convert_expression_value, split_operands};

use crate::TheoryDb;
use crate::compiled::{CompiledQuery, Operation, RetryHint, ReturnValues, Select};
use crate::cursor;
use crate::error::{Result, TheoryError};

/// One accumulated condition: field, operator, converted operands.
#[derive(Debug, Clone)]
pub(crate) struct CondSpec {
    pub field: String,
    pub op: Operator,
    pub operands: Vec<Av>,
}

/// A filter or condition entry; groups nest.
#[derive(Debug, Clone)]
pub(crate) enum FilterEntry {
    Cond {
        connector: Connector,
        spec: CondSpec,
    },
    Group {
        connector: Connector,
        entries: Vec<FilterEntry>,
    },
}

/// The accumulator mutated by the fluent chain.
#[derive(Debug, Clone, Default)]
pub(crate) struct QueryState {
    pub index_name: Option<String>,
    pub key_conditions: Vec<CondSpec>,
    pub filters: Vec<FilterEntry>,
    pub conditions: Vec<FilterEntry>,
    pub projection: Vec<String>,
    pub consistent_read: Option<bool>,
    pub limit: Option<u32>,
    pub offset: Option<usize>,
    pub scan_index_forward: Option<bool>,
    pub exclusive_start_key: Option<Item>,
    pub segment: Option<u32>,
    pub total_segments: Option<u32>,
    pub retry: Option<RetryHint>,
    pub deadline: Option<chrono::DateTime<Utc>>,
}

/// A nested filter group under construction.
pub struct FilterGroup {
    registry: Arc<Registry>,
    limits: Limits,
    entries: Vec<FilterEntry>,
    error: Option<TheoryError>,
}

impl FilterGroup {
    fn new(registry: Arc<Registry>, limits: Limits) -> Self {
        Self {
            registry,
            limits,
            entries: Vec::new(),
            error: None,
        }
    }

    fn push<V: Serialize + 'static>(mut self, connector: Connector, field: &str, op: &str, value: V) -> Self {
        if self.error.is_some() {
            return self;
        }
        match make_cond(&self.registry, &self.limits, field, op, value) {
            Ok(spec) => self.entries.push(FilterEntry::Cond { connector, spec }),
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Appends a condition with AND.
    pub fn filter<V: Serialize + 'static>(self, field: &str, op: &str, value: V) -> Self {
        self.push(Connector::And, field, op, value)
    }

    /// Appends a condition with OR.
    pub fn or_filter<V: Serialize + 'static>(self, field: &str, op: &str, value: V) -> Self {
        self.push(Connector::Or, field, op, value)
    }

    /// Appends a nested group with AND.
    pub fn group(mut self, f: impl FnOnce(FilterGroup) -> FilterGroup) -> Self {
        self.nest(Connector::And, f)
    }

    /// Appends a nested group with OR.
    pub fn or_group(mut self, f: impl FnOnce(FilterGroup) -> FilterGroup) -> Self {
        self.nest(Connector::Or, f)
    }

    fn nest(
        &mut self,
        connector: Connector,
        f: impl FnOnce(FilterGroup) -> FilterGroup,
    ) -> Self {
        let inner = f(FilterGroup::new(self.registry.clone(), self.limits));
        let mut out = FilterGroup {
            registry: self.registry.clone(),
            limits: self.limits,
            entries: std::mem::take(&mut self.entries),
            error: self.error.take(),
        };
        if out.error.is_none() {
            match inner.error {
                Some(err) => out.error = Some(err),
                None => out.entries.push(FilterEntry::Group {
                    connector,
                    entries: inner.entries,
                }),
            }
        }
        out
    }
}

fn make_cond<V: Serialize + 'static>(
    registry: &Registry,
    limits: &Limits,
    field: &str,
    op: &str,
    value: V,
) -> Result<CondSpec> {
    let op = Operator::parse(op).map_err(TheoryError::from)?;
    let av = convert_expression_value(registry, limits, &value)?;
    let operands = split_operands(op, av)?;
    Ok(CondSpec {
        field: field.to_string(),
        op,
        operands,
    })
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// A fluent query over one record type.
pub struct Query<'a, T> {
    db: &'a TheoryDb,
    record: T,
    descriptor: Option<Arc<Descriptor>>,
    state: QueryState,
    deferred: Option<TheoryError>,
}

impl<'a, T> Query<'a, T>
where
    T: Model + Serialize + DeserializeOwned + 'static,
{
    pub(crate) fn new(db: &'a TheoryDb, record: T) -> Self {
        let (descriptor, deferred) = match db.registry.descriptor_of::<T>() {
            Ok(d) => (Some(d), None),
            Err(e) => (None, Some(TheoryError::from(e))),
        };
        Self {
            db,
            record,
            descriptor,
            state: QueryState::default(),
            deferred,
        }
    }

    fn mutate(mut self, f: impl FnOnce(&mut Self) -> Result<()>) -> Self {
        if self.deferred.is_none() {
            if let Err(err) = f(&mut self) {
                self.deferred = Some(err);
            }
        }
        self
    }

    // -- Chain ---------------------------------------------------------------

    /// Appends a key condition. The field must belong to the selected key
    /// schema (the table's, or the index's once [`Self::index`] is set);
    /// membership is enforced at compile time.
    pub fn where_<V: Serialize + 'static>(self, field: &str, op: &str, value: V) -> Self {
        self.mutate(|q| {
            let spec = make_cond(&q.db.registry, &q.db.limits(), field, op, value)?;
            q.state.key_conditions.push(spec);
            Ok(())
        })
    }

    /// Appends a filter with AND.
    pub fn filter<V: Serialize + 'static>(self, field: &str, op: &str, value: V) -> Self {
        self.push_filter(Connector::And, field, op, value)
    }

    /// Appends a filter with OR.
    pub fn or_filter<V: Serialize + 'static>(self, field: &str, op: &str, value: V) -> Self {
        self.push_filter(Connector::Or, field, op, value)
    }

    fn push_filter<V: Serialize + 'static>(
        self,
        connector: Connector,
        field: &str,
        op: &str,
        value: V,
    ) -> Self {
        self.mutate(|q| {
            let spec = make_cond(&q.db.registry, &q.db.limits(), field, op, value)?;
            q.state.filters.push(FilterEntry::Cond { connector, spec });
            Ok(())
        })
    }

    /// Appends a parenthesized filter group with AND.
    pub fn filter_group(self, f: impl FnOnce(FilterGroup) -> FilterGroup) -> Self {
        self.push_group(Connector::And, f)
    }

    /// Appends a parenthesized filter group with OR.
    pub fn or_filter_group(self, f: impl FnOnce(FilterGroup) -> FilterGroup) -> Self {
        self.push_group(Connector::Or, f)
    }

    fn push_group(self, connector: Connector, f: impl FnOnce(FilterGroup) -> FilterGroup) -> Self {
        self.mutate(|q| {
            let group = f(FilterGroup::new(q.db.registry.clone(), q.db.limits()));
            if let Some(err) = group.error {
                return Err(err);
            }
            q.state.filters.push(FilterEntry::Group {
                connector,
                entries: group.entries,
            });
            Ok(())
        })
    }

    /// Appends a condition-expression entry (applies to Create, Update,
    /// and Delete terminals) with AND.
    pub fn with_condition<V: Serialize + 'static>(self, field: &str, op: &str, value: V) -> Self {
        self.push_condition(Connector::And, field, op, value)
    }

    /// Appends a condition-expression entry with OR.
    pub fn or_condition<V: Serialize + 'static>(self, field: &str, op: &str, value: V) -> Self {
        self.push_condition(Connector::Or, field, op, value)
    }

    fn push_condition<V: Serialize + 'static>(
        self,
        connector: Connector,
        field: &str,
        op: &str,
        value: V,
    ) -> Self {
        self.mutate(|q| {
            let spec = make_cond(&q.db.registry, &q.db.limits(), field, op, value)?;
            q.state.conditions.push(FilterEntry::Cond { connector, spec });
            Ok(())
        })
    }

    /// Selects a declared secondary index.
    pub fn index(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.mutate(|q| {
            q.state.index_name = Some(name);
            Ok(())
        })
    }

    /// Restricts the attributes returned.
    pub fn projection(self, fields: &[&str]) -> Self {
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        self.mutate(|q| {
            q.state.projection.extend(fields);
            Ok(())
        })
    }

    /// Requests a strongly consistent read.
    pub fn consistent_read(self) -> Self {
        self.mutate(|q| {
            q.state.consistent_read = Some(true);
            Ok(())
        })
    }

    /// Caps the number of evaluated items.
    pub fn limit(self, limit: u32) -> Self {
        self.mutate(|q| {
            q.state.limit = Some(limit);
            Ok(())
        })
    }

    /// Skips the first `offset` results client-side. Not a wire field.
    pub fn offset(self, offset: usize) -> Self {
        self.mutate(|q| {
            q.state.offset = Some(offset);
            Ok(())
        })
    }

    /// Sets the sort-key traversal direction.
    pub fn scan_index_forward(self, forward: bool) -> Self {
        self.mutate(|q| {
            q.state.scan_index_forward = Some(forward);
            Ok(())
        })
    }

    /// Resumes from an opaque cursor token.
    pub fn cursor(self, token: &str) -> Self {
        let token = token.to_string();
        self.mutate(|q| {
            q.state.exclusive_start_key = Some(cursor::decode_cursor(&token)?);
            Ok(())
        })
    }

    /// Selects one segment of a parallel scan.
    pub fn parallel_scan(self, segment: u32, total: u32) -> Self {
        self.mutate(|q| {
            if total == 0 || segment >= total {
                return Err(TheoryError::Validation(ValidationError::invalid_value(
                    "segment must be less than total_segments",
                )));
            }
            q.state.segment = Some(segment);
            q.state.total_segments = Some(total);
            Ok(())
        })
    }

    /// Attaches a retry intent for the executor. The core never retries.
    pub fn with_retry(self, max_attempts: u32, initial_delay: std::time::Duration) -> Self {
        self.mutate(|q| {
            q.state.retry = Some(RetryHint {
                max_attempts,
                initial_delay,
            });
            Ok(())
        })
    }

    /// Attaches a deadline for the executor. The core never interprets it.
    pub fn deadline(self, at: chrono::DateTime<Utc>) -> Self {
        self.mutate(|q| {
            q.state.deadline = Some(at);
            Ok(())
        })
    }

    // -- Compilation ---------------------------------------------------------

    fn take(mut self) -> Result<(&'a TheoryDb, T, Arc<Descriptor>, QueryState)> {
        if let Some(err) = self.deferred.take() {
            return Err(err);
        }
        let descriptor = self.descriptor.take().expect("descriptor present when no error");
        Ok((self.db, self.record, descriptor, self.state))
    }

    // -- Terminals -----------------------------------------------------------

    /// Returns the first matching item, or [`TheoryError::ItemNotFound`].
    ///
    /// When the chain pins the full primary key with equality conditions
    /// and nothing else, this compiles a GetItem; otherwise a Query.
    pub fn first(self) -> Result<T> {
        let (db, record, descriptor, state) = self.take()?;

        if let Some(key) = get_item_key(&descriptor, &state) {
            // GetItem carries the key as a map, not as expression text.
            let mut builder = db.new_builder(descriptor.clone());
            for field in &state.projection {
                builder.add_projection(field)?;
            }
            let expressions = builder.build();

            let mut compiled = CompiledQuery::new(
                Operation::GetItem,
                db.resolve_table_name(&record, &descriptor),
            );
            compiled.projection_expression = expressions.projection;
            compiled.expression_attribute_names = expressions.names;
            compiled.consistent_read = state.consistent_read;
            compiled.retry = state.retry;
            compiled.deadline = state.deadline;

            debug!(table = %compiled.table_name, "compiled GetItem");
            let found = db
                .executor
                .execute_get_item(&compiled, &key)
                .map_err(|e| TheoryError::from_executor("GetItem", e))?;
            return match found {
                Some(item) => Ok(convert::from_item(&db.registry, &item, db.provider_ref())?),
                None => Err(TheoryError::ItemNotFound),
            };
        }

        let (items, _) = run_read(db, &record, &descriptor, state)?;
        items.into_iter().next().ok_or(TheoryError::ItemNotFound)
    }

    /// Returns every matching item.
    pub fn all(self) -> Result<Vec<T>> {
        let (db, record, descriptor, state) = self.take()?;
        run_read(db, &record, &descriptor, state).map(|(items, _)| items)
    }

    /// Returns every matching item plus the continuation cursor, when the
    /// store truncated the page.
    pub fn all_with_cursor(self) -> Result<(Vec<T>, Option<String>)> {
        let (db, record, descriptor, state) = self.take()?;
        run_read(db, &record, &descriptor, state)
    }

    /// Returns the matched count without materializing items.
    pub fn count(self) -> Result<u64> {
        let (db, record, descriptor, state) = self.take()?;
        let operation = read_operation(&state);
        let mut compiled = compile_read(db, &descriptor, &state, operation)?;
        compiled.table_name = db.resolve_table_name(&record, &descriptor);
        compiled.select = Some(Select::Count);
        let output = match operation {
            Operation::Query => db.executor.execute_query(&compiled),
            _ => db.executor.execute_scan(&compiled),
        }
        .map_err(|e| TheoryError::from_executor(operation.as_str(), e))?;
        Ok(output.count)
    }

    /// Stores the record as a new item; fails with
    /// [`TheoryError::ConditionFailed`] when the key already exists.
    pub fn create(self) -> Result<()> {
        let (db, record, descriptor, state) = self.take()?;
        let (mut compiled, item) =
            compile_record_create(db, &record, &descriptor, &state.conditions)?;
        compiled.retry = state.retry;
        compiled.deadline = state.deadline;

        debug!(table = %compiled.table_name, "compiled PutItem for create");
        db.executor
            .execute_put_item(&compiled, &item)
            .map_err(|e| TheoryError::from_executor("PutItem", e))
    }

    /// Serializes only the named fields into SET directives and applies
    /// them. The version field, when declared, participates automatically.
    /// Returns nothing (`ReturnValues` NONE).
    pub fn update(self, fields: &[&str]) -> Result<()> {
        let (db, record, descriptor, state) = self.take()?;
        let (compiled, key) =
            compile_record_update(db, &record, &descriptor, &state, fields, ReturnValues::None)?;
        db.executor
            .execute_update_item(&compiled, &key)
            .map_err(|e| TheoryError::from_executor("UpdateItem", e))?;
        Ok(())
    }

    /// Like [`Self::update`], but consumes the result (`ReturnValues`
    /// ALL_NEW) and returns the stored item.
    pub fn update_returning(self, fields: &[&str]) -> Result<T> {
        let (db, record, descriptor, state) = self.take()?;
        let (compiled, key) =
            compile_record_update(db, &record, &descriptor, &state, fields, ReturnValues::AllNew)?;
        let returned = db
            .executor
            .execute_update_item(&compiled, &key)
            .map_err(|e| TheoryError::from_executor("UpdateItem", e))?;
        match returned {
            Some(item) => Ok(convert::from_item(&db.registry, &item, db.provider_ref())?),
            None => Err(TheoryError::ItemNotFound),
        }
    }

    /// Deletes the record's item. Chain conditions apply; a declared
    /// version field adds a version-equals guard.
    pub fn delete(self) -> Result<()> {
        let (db, record, descriptor, state) = self.take()?;
        let (mut compiled, key) =
            compile_record_delete(db, &record, &descriptor, &state.conditions)?;
        compiled.retry = state.retry;
        compiled.deadline = state.deadline;

        db.executor
            .execute_delete_item(&compiled, &key)
            .map_err(|e| TheoryError::from_executor("DeleteItem", e))
    }

    /// Client-side fanout: compiles `total` segment scans, runs them
    /// through the executor in order, and concatenates the results.
    pub fn scan_all_segments(self, total: u32) -> Result<Vec<T>> {
        if total == 0 {
            return Err(TheoryError::Validation(ValidationError::invalid_value(
                "total_segments must be positive",
            )));
        }
        let (db, record, descriptor, state) = self.take()?;
        let mut base = compile_read(db, &descriptor, &state, Operation::Scan)?;
        base.table_name = db.resolve_table_name(&record, &descriptor);

        let mut items = Vec::new();
        for segment in 0..total {
            let mut compiled = base.clone();
            compiled.segment = Some(segment);
            compiled.total_segments = Some(total);
            let output = db
                .executor
                .execute_scan(&compiled)
                .map_err(|e| TheoryError::from_executor("Scan", e))?;
            for item in &output.items {
                items.push(convert::from_item(&db.registry, item, db.provider_ref())?);
            }
        }
        Ok(items)
    }
}

// ---------------------------------------------------------------------------
// Compilation helpers (shared with the update and transaction builders)
// ---------------------------------------------------------------------------

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn record_values<T: Serialize>(record: &T) -> Result<serde_json::Map<String, serde_json::Value>> {
    match serde_json::to_value(record).map_err(theorydb_core::error::ConvertError::Serde)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(theorydb_core::error::ConvertError::UnsupportedType {
            detail: "record did not serialize to a map".to_string(),
        }
        .into()),
    }
}

/// Extracts the full primary key from a record's serialized values.
pub(crate) fn key_from_values(
    db: &TheoryDb,
    descriptor: &Arc<Descriptor>,
    values: &serde_json::Map<String, serde_json::Value>,
) -> Result<Item> {
    let mut key = Item::new();
    let mut slots = vec![descriptor.pk];
    if let Some(sk) = descriptor.sk {
        slots.push(sk);
    }
    for idx in slots {
        let field = &descriptor.fields[idx];
        let value = values.get(&field.rust_name).unwrap_or(&serde_json::Value::Null);
        let missing = matches!(value, serde_json::Value::Null)
            || matches!(value, serde_json::Value::String(s) if s.is_empty());
        if missing {
            return Err(ModelError::MissingPrimaryKey {
                model: descriptor.table_name.clone(),
            }
            .into());
        }
        let av = convert::field_to_av(&db.registry, field, value, db.provider_ref())?;
        key.insert(field.attribute_name.clone(), av);
    }
    Ok(key)
}

fn read_operation(state: &QueryState) -> Operation {
    if state.key_conditions.is_empty() {
        Operation::Scan
    } else {
        Operation::Query
    }
}

/// A chain compiles to GetItem when it pins the full primary key with
/// equality and asks for nothing a Query would add.
fn get_item_key(descriptor: &Descriptor, state: &QueryState) -> Option<Item> {
    if state.index_name.is_some()
        || !state.filters.is_empty()
        || state.exclusive_start_key.is_some()
        || state.segment.is_some()
    {
        return None;
    }
    let expected = 1 + usize::from(descriptor.sk.is_some());
    if state.key_conditions.len() != expected {
        return None;
    }

    let mut key = Item::new();
    for spec in &state.key_conditions {
        if spec.op != Operator::Eq || spec.operands.len() != 1 {
            return None;
        }
        let attr = descriptor
            .resolve(&spec.field)
            .map(|f| f.attribute_name.clone())?;
        let is_pk = attr == descriptor.pk_field().attribute_name;
        let is_sk = descriptor.sk_field().is_some_and(|f| f.attribute_name == attr);
        if !is_pk && !is_sk {
            return None;
        }
        key.insert(attr, spec.operands[0].clone());
    }
    (key.len() == expected).then_some(key)
}

fn compile_read(
    db: &TheoryDb,
    descriptor: &Arc<Descriptor>,
    state: &QueryState,
    operation: Operation,
) -> Result<CompiledQuery> {
    if let Some(name) = &state.index_name {
        if descriptor.index(name).is_none() {
            return Err(TheoryError::IndexNotFound(name.clone()));
        }
    }

    let mut builder = db.new_builder(descriptor.clone());

    let (pk_attr, sk_attr) = descriptor
        .key_schema(state.index_name.as_deref())
        .expect("index validated above");
    let pk_attr = pk_attr.to_string();
    let sk_attr = sk_attr.map(|s| s.to_string());
    for spec in &state.key_conditions {
        let attr = descriptor
            .resolve(&spec.field)
            .map(|f| f.attribute_name.as_str())
            .unwrap_or(spec.field.as_str());
        if attr != pk_attr && sk_attr.as_deref() != Some(attr) {
            return Err(TheoryError::Validation(ValidationError::invalid_value(
                "field is not part of the selected key schema",
            )));
        }
        builder.add_key_condition(&spec.field, spec.op, spec.operands.clone())?;
    }

    apply_filter_entries(&mut builder, &state.filters)?;
    for field in &state.projection {
        builder.add_projection(field)?;
    }
    let expressions = builder.build();

    let mut compiled = CompiledQuery::new(operation, descriptor.table_name.clone());
    compiled.index_name = state.index_name.clone();
    compiled.key_condition_expression = expressions.key_condition;
    compiled.filter_expression = expressions.filter;
    compiled.projection_expression = expressions.projection;
    compiled.expression_attribute_names = expressions.names;
    compiled.expression_attribute_values = expressions.values;
    compiled.limit = state.limit;
    compiled.scan_index_forward = state.scan_index_forward;
    compiled.consistent_read = state.consistent_read;
    compiled.exclusive_start_key = state.exclusive_start_key.clone();
    compiled.segment = state.segment;
    compiled.total_segments = state.total_segments;
    compiled.retry = state.retry;
    compiled.deadline = state.deadline;
    Ok(compiled)
}

fn run_read<T: Model + Serialize + DeserializeOwned + 'static>(
    db: &TheoryDb,
    record: &T,
    descriptor: &Arc<Descriptor>,
    state: QueryState,
) -> Result<(Vec<T>, Option<String>)> {
    let operation = read_operation(&state);
    let mut compiled = compile_read(db, descriptor, &state, operation)?;
    compiled.table_name = db.resolve_table_name(record, descriptor);
    debug!(
        table = %compiled.table_name,
        operation = %operation,
        "compiled read"
    );

    let output = match operation {
        Operation::Query => db.executor.execute_query(&compiled),
        _ => db.executor.execute_scan(&compiled),
    }
    .map_err(|e| TheoryError::from_executor(operation.as_str(), e))?;

    let mut items = Vec::with_capacity(output.items.len());
    for item in &output.items {
        items.push(convert::from_item(&db.registry, item, db.provider_ref())?);
    }
    if let Some(offset) = state.offset {
        items.drain(..offset.min(items.len()));
    }
    let token = match output.last_evaluated_key {
        Some(key) => Some(cursor::encode_cursor(&key)?),
        None => None,
    };
    Ok((items, token))
}

pub(crate) fn apply_filter_entries(
    builder: &mut ExpressionBuilder,
    entries: &[FilterEntry],
) -> Result<()> {
    for entry in entries {
        match entry {
            FilterEntry::Cond { connector, spec } => {
                builder.add_filter(*connector, &spec.field, spec.op, spec.operands.clone())?;
            }
            FilterEntry::Group { connector, entries } => {
                let mut sub = builder.sub_builder();
                apply_filter_entries(&mut sub, entries)?;
                builder.absorb_filter_group(sub, *connector);
            }
        }
    }
    Ok(())
}

pub(crate) fn apply_condition_entries(
    builder: &mut ExpressionBuilder,
    entries: &[FilterEntry],
) -> Result<()> {
    for entry in entries {
        match entry {
            FilterEntry::Cond { connector, spec } => {
                builder.add_condition(*connector, &spec.field, spec.op, spec.operands.clone())?;
            }
            FilterEntry::Group { connector, entries } => {
                let mut sub = builder.sub_builder();
                apply_condition_entries(&mut sub, entries)?;
                builder.absorb_condition_group(sub, *connector);
            }
        }
    }
    Ok(())
}

/// Compiles a PutItem for create: the whole record converted, timestamps
/// stamped, a fresh version initialized to 1, and the
/// `attribute_not_exists(pk)` guard prepended to any chain conditions.
pub(crate) fn compile_record_create<T: Model + Serialize + 'static>(
    db: &TheoryDb,
    record: &T,
    descriptor: &Arc<Descriptor>,
    conditions: &[FilterEntry],
) -> Result<(CompiledQuery, Item)> {
    let mut item = convert::marshal_item(&db.registry, record, db.provider_ref())?;

    let now = now_rfc3339();
    for slot in [descriptor.created_at, descriptor.updated_at] {
        if let Some(idx) = slot {
            item.insert(descriptor.fields[idx].attribute_name.clone(), Av::s(now.clone()));
        }
    }
    if let Some(idx) = descriptor.version {
        let attr = &descriptor.fields[idx].attribute_name;
        let fresh = match item.get(attr) {
            None | Some(Av::Null) => true,
            Some(Av::N(n)) => n == "0",
            _ => false,
        };
        if fresh {
            item.insert(attr.clone(), Av::n(1));
        }
    }

    let mut builder = db.new_builder(descriptor.clone());
    builder.add_condition(
        Connector::And,
        &descriptor.pk_field().attribute_name,
        Operator::NotExists,
        Vec::new(),
    )?;
    apply_condition_entries(&mut builder, conditions)?;
    let expressions = builder.build();

    let mut compiled = CompiledQuery::new(
        Operation::PutItem,
        db.resolve_table_name(record, descriptor),
    );
    compiled.condition_expression = expressions.condition;
    compiled.expression_attribute_names = expressions.names;
    compiled.expression_attribute_values = expressions.values;
    Ok((compiled, item))
}

/// Compiles a DeleteItem: key from the record, chain conditions, and a
/// version-equals guard when the record carries a nonzero version.
pub(crate) fn compile_record_delete<T: Model + Serialize + 'static>(
    db: &TheoryDb,
    record: &T,
    descriptor: &Arc<Descriptor>,
    conditions: &[FilterEntry],
) -> Result<(CompiledQuery, Item)> {
    let values = record_values(record)?;
    let key = key_from_values(db, descriptor, &values)?;

    let mut builder = db.new_builder(descriptor.clone());
    apply_condition_entries(&mut builder, conditions)?;
    if let Some(idx) = descriptor.version {
        let field = &descriptor.fields[idx];
        if let Some(current) = values.get(&field.rust_name).and_then(|v| v.as_i64()) {
            if current != 0 {
                builder.add_condition(
                    Connector::And,
                    &field.attribute_name,
                    Operator::Eq,
                    vec![Av::n(current)],
                )?;
            }
        }
    }
    let expressions = builder.build();

    let mut compiled = CompiledQuery::new(
        Operation::DeleteItem,
        db.resolve_table_name(record, descriptor),
    );
    compiled.condition_expression = expressions.condition;
    compiled.expression_attribute_names = expressions.names;
    compiled.expression_attribute_values = expressions.values;
    Ok((compiled, key))
}

/// Compiles an UpdateItem from a record and a list of field names: named
/// fields become SET directives, `updated_at` is stamped, and a declared
/// version field contributes its condition-and-increment pair.
pub(crate) fn compile_record_update<T: Model + Serialize + 'static>(
    db: &TheoryDb,
    record: &T,
    descriptor: &Arc<Descriptor>,
    state: &QueryState,
    fields: &[&str],
    return_values: ReturnValues,
) -> Result<(CompiledQuery, Item)> {
    let values = record_values(record)?;
    let key = key_from_values(db, descriptor, &values)?;
    let mut builder = db.new_builder(descriptor.clone());

    for name in fields {
        let Some(field) = descriptor.resolve(name) else {
            return Err(TheoryError::Validation(ValidationError::invalid_value(
                "update references a field outside the model",
            )));
        };
        match field.kind {
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
        let value = values.get(&field.rust_name).unwrap_or(&serde_json::Value::Null);
        let av = convert::field_to_av(&db.registry, field, value, db.provider_ref())?;
        builder.set_value(&field.attribute_name, av)?;
    }

    if let Some(idx) = descriptor.updated_at {
        builder.set_value(&descriptor.fields[idx].attribute_name, Av::s(now_rfc3339()))?;
    }
    if let Some(idx) = descriptor.version {
        let field = &descriptor.fields[idx];
        let current = values
            .get(&field.rust_name)
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        builder.add_version_pair(&field.attribute_name, current)?;
    }
    apply_condition_entries(&mut builder, &state.conditions)?;

    let expressions = builder.build();
    let mut compiled = CompiledQuery::new(
        Operation::UpdateItem,
        db.resolve_table_name(record, descriptor),
    );
    compiled.update_expression = expressions.update;
    compiled.condition_expression = expressions.condition;
    compiled.expression_attribute_names = expressions.names;
    compiled.expression_attribute_values = expressions.values;
    compiled.return_values = Some(return_values);
    compiled.retry = state.retry;
    compiled.deadline = state.deadline;
    Ok((compiled, key))
}
