//! The expression builder.
//!
//! One builder serves exactly one compilation: it is created by a terminal
//! operation, fed conditions and directives, drained by [`ExpressionBuilder::build`],
//! and discarded. Placeholders are assigned in first-reference order, so a
//! deterministic chain yields deterministic expression text.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use theorydb_core::error::ValidationError;
use theorydb_core::registry::Registry;
use theorydb_core::schema::Descriptor;
use theorydb_core::validate::{self, Limits, OperandShape, Operator};
use theorydb_core::value::Av;

use crate::error::ExprError;
use crate::reserved::is_reserved;

/// Logical connector between adjacent conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connector {
    #[default]
    And,
    Or,
}

impl Connector {
    /// The expression text for this connector.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// The compiled output of one builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expressions {
    pub key_condition: Option<String>,
    pub filter: Option<String>,
    pub condition: Option<String>,
    pub projection: Option<String>,
    pub update: Option<String>,
    pub names: HashMap<String, String>,
    pub values: HashMap<String, Av>,
}

/// Accumulates placeholders and condition text for one compilation.
pub struct ExpressionBuilder {
    descriptor: Arc<Descriptor>,
    registry: Arc<Registry>,
    limits: Limits,

    names: HashMap<String, String>,
    assigned: HashMap<String, String>,
    values: HashMap<String, Av>,
    name_counter: usize,
    value_counter: usize,

    key_conditions: Vec<String>,
    filters: Vec<String>,
    pub(crate) filter_connectors: Vec<Connector>,
    conditions: Vec<String>,
    pub(crate) condition_connectors: Vec<Connector>,
    projection: Vec<String>,

    pub(crate) set_actions: Vec<String>,
    pub(crate) remove_actions: Vec<String>,
    pub(crate) add_actions: Vec<String>,
    pub(crate) delete_actions: Vec<String>,
}

impl ExpressionBuilder {
    /// Creates a builder for one compilation against the given model.
    pub fn new(descriptor: Arc<Descriptor>, registry: Arc<Registry>, limits: Limits) -> Self {
        Self {
            descriptor,
            registry,
            limits,
            names: HashMap::new(),
            assigned: HashMap::new(),
            values: HashMap::new(),
            name_counter: 0,
            value_counter: 0,
            key_conditions: Vec::new(),
            filters: Vec::new(),
            filter_connectors: Vec::new(),
            conditions: Vec::new(),
            condition_connectors: Vec::new(),
            projection: Vec::new(),
            set_actions: Vec::new(),
            remove_actions: Vec::new(),
            add_actions: Vec::new(),
            delete_actions: Vec::new(),
        }
    }

    /// Creates an empty builder that continues this builder's placeholder
    /// numbering, for group composition.
    pub fn sub_builder(&self) -> Self {
        let mut sub = Self::new(self.descriptor.clone(), self.registry.clone(), self.limits);
        sub.name_counter = self.name_counter;
        sub.value_counter = self.value_counter;
        // The sub-builder must reuse existing placeholders for attributes
        // the parent already named, so absorbed maps stay consistent.
        sub.names = self.names.clone();
        sub.assigned = self.assigned.clone();
        sub.values = self.values.clone();
        sub
    }

    /// The model descriptor this builder compiles against.
    pub fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    // -- Placeholders --------------------------------------------------------

    /// Returns the placeholder for an attribute, allocating on first use.
    ///
    /// Reserved words get the uppercase convenience form (`#STATUS`);
    /// everything else gets an opaque `#nN`. A given attribute maps to the
    /// same placeholder for the life of the builder.
    fn name_placeholder(&mut self, attribute: &str) -> String {
        if let Some(existing) = self.assigned.get(attribute) {
            return existing.clone();
        }
        let placeholder = if is_reserved(attribute) {
            let candidate = format!("#{}", attribute.to_ascii_uppercase());
            if self.names.contains_key(&candidate) {
                // Two attributes uppercasing to the same word; fall back to
                // an opaque placeholder for the latecomer.
                self.name_counter += 1;
                format!("#n{}", self.name_counter)
            } else {
                candidate
            }
        } else {
            self.name_counter += 1;
            format!("#n{}", self.name_counter)
        };
        self.names.insert(placeholder.clone(), attribute.to_string());
        self.assigned.insert(attribute.to_string(), placeholder.clone());
        placeholder
    }

    /// Registers a value and returns its `:vN` placeholder.
    fn value_placeholder(&mut self, value: Av) -> String {
        self.value_counter += 1;
        let placeholder = format!(":v{}", self.value_counter);
        self.values.insert(placeholder.clone(), value);
        placeholder
    }

    /// Crate-internal value registration for the update verbs.
    pub(crate) fn register_value(&mut self, value: Av) -> String {
        self.value_placeholder(value)
    }

    /// Validates a field path, rejects encrypted fields, and returns the
    /// fully placeholderized path (`#n1[2].#n2`).
    ///
    /// The encrypted check runs before any placeholder is allocated, so a
    /// rejected reference leaves no trace in the builder.
    pub fn resolve_path(&mut self, path: &str) -> Result<String, ExprError> {
        validate::validate_field_path(path, &self.limits)?;

        for segment in path.split('.') {
            let (name, _) = validate::parse_list_index(segment, &self.limits)?;
            if let Some(field) = self.descriptor.resolve(name) {
                if !field.queryable() {
                    return Err(ExprError::EncryptedFieldNotQueryable {
                        field: field.attribute_name.clone(),
                    });
                }
            }
        }

        let mut parts = Vec::new();
        for segment in path.split('.') {
            let (name, index) = validate::parse_list_index(segment, &self.limits)?;
            let attribute = match self.descriptor.resolve(name) {
                Some(field) => field.attribute_name.clone(),
                None => name.to_string(),
            };
            let placeholder = self.name_placeholder(&attribute);
            match index {
                Some(i) => parts.push(format!("{placeholder}[{i}]")),
                None => parts.push(placeholder),
            }
        }
        Ok(parts.join("."))
    }

    // -- Values --------------------------------------------------------------

    /// Converts a value for use in an expression, dispatching through any
    /// registered custom converter for its type. Converter output still
    /// passes validation before it may carry a placeholder.
    pub fn convert_value<V: Serialize + 'static>(&self, value: &V) -> Result<Av, ExprError> {
        convert_expression_value(&self.registry, &self.limits, value)
    }

    // -- Conditions ----------------------------------------------------------

    /// Appends a key condition. Only the key-condition operator subset is
    /// accepted.
    pub fn add_key_condition(
        &mut self,
        field: &str,
        op: Operator,
        operands: Vec<Av>,
    ) -> Result<(), ExprError> {
        if !op.valid_for_key() {
            return Err(ValidationError::InvalidOperator(
                "operator not allowed in a key condition".to_string(),
            )
            .into());
        }
        let text = self.render_condition(field, op, operands)?;
        self.key_conditions.push(text);
        Ok(())
    }

    /// Appends a filter condition joined by `connector` (ignored for the
    /// first condition).
    pub fn add_filter(
        &mut self,
        connector: Connector,
        field: &str,
        op: Operator,
        operands: Vec<Av>,
    ) -> Result<(), ExprError> {
        let text = self.render_condition(field, op, operands)?;
        self.filters.push(text);
        self.filter_connectors.push(connector);
        Ok(())
    }

    /// Appends a condition-expression entry joined by `connector`.
    pub fn add_condition(
        &mut self,
        connector: Connector,
        field: &str,
        op: Operator,
        operands: Vec<Av>,
    ) -> Result<(), ExprError> {
        let text = self.render_condition(field, op, operands)?;
        self.conditions.push(text);
        self.condition_connectors.push(connector);
        Ok(())
    }

    /// Appends a raw, already-rendered condition fragment. Internal to the
    /// crate; everything public funnels through [`Self::render_condition`].
    pub(crate) fn push_condition_text(&mut self, connector: Connector, text: String) {
        self.conditions.push(text);
        self.condition_connectors.push(connector);
    }

    /// Appends a `size(name) <op> :v` filter.
    pub fn add_size_filter(
        &mut self,
        connector: Connector,
        field: &str,
        op: Operator,
        operand: Av,
    ) -> Result<(), ExprError> {
        let Some(symbol) = op.symbol() else {
            return Err(ValidationError::InvalidOperator(
                "size() requires a comparator".to_string(),
            )
            .into());
        };
        let name = self.resolve_path(field)?;
        let value = self.value_placeholder(operand);
        self.filters.push(format!("size({name}) {symbol} {value}"));
        self.filter_connectors.push(connector);
        Ok(())
    }

    /// Appends an `attribute_type(name, :v)` filter; `type_tag` must be a
    /// wire type tag (`S`, `N`, `B`, `BOOL`, `NULL`, `L`, `M`, `SS`, `NS`,
    /// `BS`).
    pub fn add_attribute_type_filter(
        &mut self,
        connector: Connector,
        field: &str,
        type_tag: &str,
    ) -> Result<(), ExprError> {
        const TAGS: &[&str] = &["S", "N", "B", "BOOL", "NULL", "L", "M", "SS", "NS", "BS"];
        if !TAGS.contains(&type_tag) {
            return Err(ValidationError::invalid_value("unknown attribute type tag").into());
        }
        let name = self.resolve_path(field)?;
        let value = self.value_placeholder(Av::s(type_tag));
        self.filters.push(format!("attribute_type({name}, {value})"));
        self.filter_connectors.push(connector);
        Ok(())
    }

    fn render_condition(
        &mut self,
        field: &str,
        op: Operator,
        operands: Vec<Av>,
    ) -> Result<String, ExprError> {
        // Shape is checked before any placeholder exists.
        match op.operand_shape() {
            OperandShape::None => {
                if !operands.is_empty() {
                    return Err(ValidationError::invalid_value("operator takes no operand").into());
                }
            }
            OperandShape::One => {
                if operands.len() != 1 {
                    return Err(ValidationError::invalid_value(
                        "operator requires exactly one value",
                    )
                    .into());
                }
            }
            OperandShape::Two => {
                if operands.len() != 2 {
                    return Err(ValidationError::invalid_value(
                        "BETWEEN requires exactly two values",
                    )
                    .into());
                }
            }
            OperandShape::Many => {
                if operands.is_empty() || operands.len() > 100 {
                    return Err(ValidationError::invalid_value("IN requires 1 to 100 values").into());
                }
            }
        }

        let name = self.resolve_path(field)?;
        let text = match op {
            Operator::Eq | Operator::Ne | Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
                let value = self.value_placeholder(operands.into_iter().next().expect("checked"));
                format!("{name} {} {value}", op.symbol().expect("comparator"))
            }
            Operator::Between => {
                let mut iter = operands.into_iter();
                let low = self.value_placeholder(iter.next().expect("checked"));
                let high = self.value_placeholder(iter.next().expect("checked"));
                format!("{name} BETWEEN {low} AND {high}")
            }
            Operator::In => {
                let placeholders: Vec<String> = operands
                    .into_iter()
                    .map(|av| self.value_placeholder(av))
                    .collect();
                format!("{name} IN ({})", placeholders.join(", "))
            }
            Operator::BeginsWith => {
                let value = self.value_placeholder(operands.into_iter().next().expect("checked"));
                format!("begins_with({name}, {value})")
            }
            Operator::Contains => {
                let value = self.value_placeholder(operands.into_iter().next().expect("checked"));
                format!("contains({name}, {value})")
            }
            Operator::Exists => format!("attribute_exists({name})"),
            Operator::NotExists => format!("attribute_not_exists({name})"),
        };
        Ok(text)
    }

    // -- Groups --------------------------------------------------------------

    /// Incorporates a sub-builder's filters as one parenthesized group.
    pub fn absorb_filter_group(&mut self, sub: ExpressionBuilder, connector: Connector) {
        let Some(fragment) = join_conditions(&sub.filters, &sub.filter_connectors) else {
            return;
        };
        self.adopt_placeholders(sub);
        self.filters.push(format!("({fragment})"));
        self.filter_connectors.push(connector);
    }

    /// Incorporates a sub-builder's conditions as one parenthesized group.
    pub fn absorb_condition_group(&mut self, sub: ExpressionBuilder, connector: Connector) {
        let Some(fragment) = join_conditions(&sub.conditions, &sub.condition_connectors) else {
            return;
        };
        self.adopt_placeholders(sub);
        self.conditions.push(format!("({fragment})"));
        self.condition_connectors.push(connector);
    }

    fn adopt_placeholders(&mut self, sub: ExpressionBuilder) {
        self.names = sub.names;
        self.assigned = sub.assigned;
        self.values = sub.values;
        self.name_counter = sub.name_counter;
        self.value_counter = sub.value_counter;
    }

    // -- Projections ---------------------------------------------------------

    /// Adds a projected field, skipping duplicates.
    pub fn add_projection(&mut self, field: &str) -> Result<(), ExprError> {
        let name = self.resolve_path(field)?;
        if !self.projection.contains(&name) {
            self.projection.push(name);
        }
        Ok(())
    }

    // -- Emission ------------------------------------------------------------

    /// Emits the five canonical expression strings and the placeholder
    /// maps, consuming the builder.
    pub fn build(self) -> Expressions {
        let key_condition = if self.key_conditions.is_empty() {
            None
        } else {
            Some(self.key_conditions.join(" AND "))
        };
        let filter = join_conditions(&self.filters, &self.filter_connectors);
        let condition = join_conditions(&self.conditions, &self.condition_connectors);
        let projection = if self.projection.is_empty() {
            None
        } else {
            Some(self.projection.join(", "))
        };

        let mut update_parts = Vec::new();
        for (verb, actions) in [
            ("SET", &self.set_actions),
            ("REMOVE", &self.remove_actions),
            ("ADD", &self.add_actions),
            ("DELETE", &self.delete_actions),
        ] {
            if !actions.is_empty() {
                update_parts.push(format!("{verb} {}", actions.join(", ")));
            }
        }
        let update = if update_parts.is_empty() {
            None
        } else {
            Some(update_parts.join(" "))
        };

        Expressions {
            key_condition,
            filter,
            condition,
            projection,
            update,
            names: self.names,
            values: self.values,
        }
    }

    /// Number of allocated name placeholders. Used by tests to prove that
    /// rejected references allocate nothing.
    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    /// Number of allocated value placeholders.
    pub fn value_count(&self) -> usize {
        self.values.len()
    }
}

/// Converts a value for use in an expression.
///
/// A registered custom converter for `V` takes precedence; its output
/// still passes validation before it may carry a placeholder.
pub fn convert_expression_value<V: Serialize + 'static>(
    registry: &Registry,
    limits: &Limits,
    value: &V,
) -> Result<Av, ExprError> {
    let json = serde_json::to_value(value)?;
    validate::validate_value(&json, limits)?;
    if let Some(converter) = registry.converter_for::<V>() {
        let av = (converter.to_av)(&json)?;
        validate_av(&av, limits)?;
        return Ok(av);
    }
    Ok(Av::from_json(&json))
}

/// Splits a converted value into the operand list an operator expects:
/// `BETWEEN` and `IN` take a list, everything else a single value.
pub fn split_operands(op: Operator, value: Av) -> Result<Vec<Av>, ExprError> {
    match op.operand_shape() {
        OperandShape::None => match value {
            Av::Null => Ok(Vec::new()),
            _ => Err(ValidationError::invalid_value("operator takes no operand").into()),
        },
        OperandShape::One => Ok(vec![value]),
        OperandShape::Two | OperandShape::Many => match value {
            Av::L(items) => Ok(items),
            other => Ok(vec![other]),
        },
    }
}

/// Zips conditions with their connectors. The connector for position `k`
/// may be missing (parallel arrays of N and N-1); the fallback is `AND`.
fn join_conditions(conditions: &[String], connectors: &[Connector]) -> Option<String> {
    if conditions.is_empty() {
        return None;
    }
    let mut out = conditions[0].clone();
    for (i, condition) in conditions.iter().enumerate().skip(1) {
        let connector = connectors.get(i).copied().unwrap_or(Connector::And);
        out.push(' ');
        out.push_str(connector.as_str());
        out.push(' ');
        out.push_str(condition);
    }
    Some(out)
}

/// Validates converter output before it may enter the expression.
fn validate_av(av: &Av, limits: &Limits) -> Result<(), ValidationError> {
    match av {
        Av::S(s) if s.len() > limits.max_string_value_len => Err(ValidationError::invalid_value(
            "string exceeds maximum length",
        )),
        Av::L(items) => {
            for item in items {
                validate_av(item, limits)?;
            }
            Ok(())
        }
        Av::M(map) => {
            for value in map.values() {
                validate_av(value, limits)?;
            }
            Ok(())
        }
        Av::Ss(items) => {
            for s in items {
                if s.len() > limits.max_string_value_len {
                    return Err(ValidationError::invalid_value("string exceeds maximum length"));
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use theorydb_core::schema::{Model, ModelSchema};

    struct User;

    impl Model for User {
        fn schema() -> ModelSchema {
            ModelSchema::new("users")
                .field("pk", "pk")
                .field("sk", "sk")
                .field("status", "status")
                .field("age", "age")
                .field("secret", "secret,encrypted")
        }
    }

    fn builder() -> ExpressionBuilder {
        let registry = Arc::new(Registry::new());
        let descriptor = registry.descriptor_of::<User>().unwrap();
        ExpressionBuilder::new(descriptor, registry, Limits::default())
    }

    #[test]
    fn key_condition_and_reserved_filter() {
        let mut b = builder();
        b.add_key_condition("pk", Operator::Eq, vec![Av::s("user#42")]).unwrap();
        b.add_filter(Connector::And, "status", Operator::Eq, vec![Av::s("active")])
            .unwrap();
        let out = b.build();

        assert_eq!(out.key_condition.as_deref(), Some("#n1 = :v1"));
        assert_eq!(out.filter.as_deref(), Some("#STATUS = :v2"));
        assert_eq!(out.names["#n1"], "pk");
        assert_eq!(out.names["#STATUS"], "status");
        assert_eq!(out.values[":v1"], Av::s("user#42"));
        assert_eq!(out.values[":v2"], Av::s("active"));
    }

    #[test]
    fn no_raw_identifier_or_value_escapes_into_text() {
        let mut b = builder();
        b.add_key_condition("pk", Operator::Eq, vec![Av::s("user#42")]).unwrap();
        b.add_filter(Connector::And, "age", Operator::Between, vec![Av::n(18), Av::n(65)])
            .unwrap();
        b.add_filter(Connector::Or, "status", Operator::In, vec![Av::s("a"), Av::s("b")])
            .unwrap();
        let out = b.build();

        for text in [out.key_condition.as_deref(), out.filter.as_deref()].into_iter().flatten() {
            assert!(!text.contains("user#42"), "raw value leaked: {text}");
            assert!(!text.contains("age"), "raw name leaked: {text}");
            // Only placeholders, operators, and punctuation remain.
            for token in text.split_whitespace() {
                let token = token.trim_matches(|c| "(),".contains(c));
                assert!(
                    token.starts_with('#')
                        || token.starts_with(':')
                        || ["=", "<>", "<", "<=", ">", ">=", "AND", "OR", "BETWEEN", "IN"]
                            .contains(&token)
                        || token.is_empty(),
                    "unexpected bare token {token} in {text}"
                );
            }
        }
    }

    #[test]
    fn canonical_function_forms() {
        let mut b = builder();
        b.add_filter(Connector::And, "sk", Operator::BeginsWith, vec![Av::s("key#")])
            .unwrap();
        b.add_filter(Connector::And, "status", Operator::Contains, vec![Av::s("act")])
            .unwrap();
        b.add_filter(Connector::And, "age", Operator::Exists, vec![]).unwrap();
        b.add_filter(Connector::And, "age", Operator::NotExists, vec![]).unwrap();
        let out = b.build();
        assert_eq!(
            out.filter.as_deref(),
            Some(
                "begins_with(#n1, :v1) AND contains(#STATUS, :v2) AND \
                 attribute_exists(#n2) AND attribute_not_exists(#n2)"
            )
        );
    }

    #[test]
    fn same_attribute_reuses_placeholder() {
        let mut b = builder();
        b.add_filter(Connector::And, "age", Operator::Gt, vec![Av::n(18)]).unwrap();
        b.add_filter(Connector::And, "age", Operator::Lt, vec![Av::n(65)]).unwrap();
        let out = b.build();
        assert_eq!(out.filter.as_deref(), Some("#n1 > :v1 AND #n1 < :v2"));
        assert_eq!(out.names.len(), 1);
    }

    #[test]
    fn reserved_word_placeholder_is_consistent() {
        let mut b = builder();
        b.add_filter(Connector::And, "status", Operator::Eq, vec![Av::s("a")]).unwrap();
        b.add_filter(Connector::And, "status", Operator::Ne, vec![Av::s("b")]).unwrap();
        b.add_projection("status").unwrap();
        let out = b.build();
        assert_eq!(out.filter.as_deref(), Some("#STATUS = :v1 AND #STATUS <> :v2"));
        assert_eq!(out.projection.as_deref(), Some("#STATUS"));
    }

    #[test]
    fn between_and_in_operand_shapes() {
        let mut b = builder();
        let err = b
            .add_filter(Connector::And, "age", Operator::Between, vec![Av::n(1)])
            .unwrap_err();
        assert!(matches!(err, ExprError::Validation(_)));

        let err = b.add_filter(Connector::And, "age", Operator::In, vec![]).unwrap_err();
        assert!(matches!(err, ExprError::Validation(_)));

        let too_many: Vec<Av> = (0..101).map(Av::n).collect();
        let err = b
            .add_filter(Connector::And, "age", Operator::In, too_many)
            .unwrap_err();
        assert!(matches!(err, ExprError::Validation(_)));

        // Shape errors allocate nothing.
        assert_eq!(b.name_count(), 0);
        assert_eq!(b.value_count(), 0);
    }

    #[test]
    fn key_condition_operator_subset() {
        let mut b = builder();
        let err = b
            .add_key_condition("pk", Operator::Contains, vec![Av::s("x")])
            .unwrap_err();
        assert!(matches!(
            err,
            ExprError::Validation(ValidationError::InvalidOperator(_))
        ));
    }

    #[test]
    fn encrypted_field_rejected_before_any_placeholder() {
        let mut b = builder();
        let err = b
            .add_filter(Connector::And, "secret", Operator::Eq, vec![Av::s("x")])
            .unwrap_err();
        assert!(err.is_encrypted_field());
        assert_eq!(b.name_count(), 0);
        assert_eq!(b.value_count(), 0);

        let err = b.add_projection("secret").unwrap_err();
        assert!(err.is_encrypted_field());
        assert_eq!(b.name_count(), 0);
    }

    #[test]
    fn malformed_list_paths_rejected() {
        let mut b = builder();
        for bad in ["items[-1]", "items[x]", "items[0]items[1]", "items[0]=:v, other=:v, items[0"] {
            let err = b
                .add_filter(Connector::And, bad, Operator::Eq, vec![Av::n(1)])
                .unwrap_err();
            assert!(
                matches!(err, ExprError::Validation(ValidationError::Security(_))),
                "input: {bad}"
            );
        }
        assert_eq!(b.name_count(), 0);
    }

    #[test]
    fn nested_paths_placeholderize_every_segment() {
        let mut b = builder();
        b.add_filter(Connector::And, "address.city", Operator::Eq, vec![Av::s("berlin")])
            .unwrap();
        b.add_filter(Connector::And, "orders[2].amount", Operator::Gt, vec![Av::n(10)])
            .unwrap();
        let out = b.build();
        assert_eq!(
            out.filter.as_deref(),
            Some("#n1.#n2 = :v1 AND #n3[2].#n4 > :v2")
        );
        assert_eq!(out.names["#n3"], "orders");
        assert_eq!(out.names["#n4"], "amount");
    }

    #[test]
    fn rust_field_names_resolve_to_attribute_names() {
        struct Snaky;
        impl Model for Snaky {
            fn schema() -> ModelSchema {
                ModelSchema::new("snaky").field("pk", "pk").field("user_name", "")
            }
        }
        let registry = Arc::new(Registry::new());
        let descriptor = registry.descriptor_of::<Snaky>().unwrap();
        let mut b = ExpressionBuilder::new(descriptor, registry, Limits::default());
        b.add_filter(Connector::And, "user_name", Operator::Eq, vec![Av::s("ada")])
            .unwrap();
        let out = b.build();
        assert_eq!(out.names["#n1"], "userName");
    }

    #[test]
    fn or_connector_and_fallback() {
        let mut b = builder();
        b.add_filter(Connector::And, "age", Operator::Gt, vec![Av::n(1)]).unwrap();
        b.add_filter(Connector::Or, "age", Operator::Lt, vec![Av::n(9)]).unwrap();
        b.add_filter(Connector::And, "status", Operator::Eq, vec![Av::s("a")]).unwrap();
        // Drop the connectors past the first: the zipper must fall back to
        // AND for every missing slot.
        b.filter_connectors.truncate(1);
        let out = b.build();
        assert_eq!(
            out.filter.as_deref(),
            Some("#n1 > :v1 AND #n1 < :v2 AND #STATUS = :v3")
        );
    }

    #[test]
    fn group_composition_parenthesizes_and_absorbs() {
        let mut b = builder();
        b.add_filter(Connector::And, "age", Operator::Gt, vec![Av::n(21)]).unwrap();

        let mut sub = b.sub_builder();
        sub.add_filter(Connector::And, "status", Operator::Eq, vec![Av::s("a")]).unwrap();
        sub.add_filter(Connector::Or, "status", Operator::Eq, vec![Av::s("b")]).unwrap();
        b.absorb_filter_group(sub, Connector::Or);

        let out = b.build();
        assert_eq!(
            out.filter.as_deref(),
            Some("#n1 > :v1 OR (#STATUS = :v2 OR #STATUS = :v3)")
        );
        assert_eq!(out.values.len(), 3);
    }

    #[test]
    fn empty_group_is_dropped() {
        let mut b = builder();
        b.add_filter(Connector::And, "age", Operator::Gt, vec![Av::n(1)]).unwrap();
        let sub = b.sub_builder();
        b.absorb_filter_group(sub, Connector::Or);
        let out = b.build();
        assert_eq!(out.filter.as_deref(), Some("#n1 > :v1"));
    }

    #[test]
    fn size_and_attribute_type_functions() {
        let mut b = builder();
        b.add_size_filter(Connector::And, "sk", Operator::Gt, Av::n(3)).unwrap();
        b.add_attribute_type_filter(Connector::And, "age", "N").unwrap();
        let out = b.build();
        assert_eq!(
            out.filter.as_deref(),
            Some("size(#n1) > :v1 AND attribute_type(#n2, :v2)")
        );
        assert_eq!(out.values[":v2"], Av::s("N"));

        let mut b = builder();
        assert!(b.add_attribute_type_filter(Connector::And, "age", "STR").is_err());
        assert!(b.add_size_filter(Connector::And, "age", Operator::In, Av::n(1)).is_err());
    }

    #[test]
    fn projection_deduplicates() {
        let mut b = builder();
        b.add_projection("pk").unwrap();
        b.add_projection("age").unwrap();
        b.add_projection("pk").unwrap();
        let out = b.build();
        assert_eq!(out.projection.as_deref(), Some("#n1, #n2"));
    }

    #[test]
    fn empty_builder_emits_nothing() {
        let out = builder().build();
        assert_eq!(out, Expressions::default());
    }
}
