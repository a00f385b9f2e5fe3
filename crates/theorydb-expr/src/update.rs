//! Update-expression verbs on the expression builder.
//!
//! SET, REMOVE, ADD, and DELETE actions accumulate independently and are
//! prefixed with their verb at emission. List positions come exclusively
//! from validated indices.

use theorydb_core::error::{SecurityError, ValidationError};
use theorydb_core::value::Av;

use crate::builder::{Connector, ExpressionBuilder};
use crate::error::ExprError;

impl ExpressionBuilder {
    /// `SET name = :v`. The field may be a nested or indexed path.
    pub fn set_value(&mut self, field: &str, value: Av) -> Result<(), ExprError> {
        let name = self.resolve_path(field)?;
        let value = self.push_value(value);
        self.set_actions.push(format!("{name} = {value}"));
        Ok(())
    }

    /// `SET name = if_not_exists(name, :default)`.
    pub fn set_if_not_exists(&mut self, field: &str, default: Av) -> Result<(), ExprError> {
        let name = self.resolve_path(field)?;
        let value = self.push_value(default);
        self.set_actions
            .push(format!("{name} = if_not_exists({name}, {value})"));
        Ok(())
    }

    /// `ADD name :v` -- numeric increment or set union.
    pub fn add_value(&mut self, field: &str, value: Av) -> Result<(), ExprError> {
        match value {
            Av::N(_) | Av::Ss(_) | Av::Ns(_) | Av::Bs(_) => {}
            _ => {
                return Err(
                    ValidationError::invalid_value("ADD requires a number or a set").into(),
                );
            }
        }
        let name = self.resolve_path(field)?;
        let value = self.push_value(value);
        self.add_actions.push(format!("{name} {value}"));
        Ok(())
    }

    /// `DELETE name :v` -- set difference; the value must be a typed set.
    pub fn delete_value(&mut self, field: &str, value: Av) -> Result<(), ExprError> {
        match value {
            Av::Ss(_) | Av::Ns(_) | Av::Bs(_) => {}
            _ => return Err(ValidationError::invalid_value("DELETE requires a set value").into()),
        }
        let name = self.resolve_path(field)?;
        let value = self.push_value(value);
        self.delete_actions.push(format!("{name} {value}"));
        Ok(())
    }

    /// `REMOVE name`. The field may be a nested or indexed path.
    pub fn remove_value(&mut self, field: &str) -> Result<(), ExprError> {
        let name = self.resolve_path(field)?;
        self.remove_actions.push(name);
        Ok(())
    }

    /// `SET name = list_append(name, :v)` (append) or
    /// `SET name = list_append(:v, name)` (prepend). Which argument is the
    /// field is decided solely by `prepend`; neither argument is ever an
    /// expression fragment.
    pub fn list_append(&mut self, field: &str, value: Av, prepend: bool) -> Result<(), ExprError> {
        let value = match value {
            Av::L(_) => value,
            single => Av::L(vec![single]),
        };
        let name = self.resolve_path(field)?;
        let value = self.push_value(value);
        let call = if prepend {
            format!("{name} = list_append({value}, {name})")
        } else {
            format!("{name} = list_append({name}, {value})")
        };
        self.set_actions.push(call);
        Ok(())
    }

    /// `SET name[i] = :v`.
    pub fn set_list_element(&mut self, field: &str, index: i64, value: Av) -> Result<(), ExprError> {
        let path = self.indexed_path(field, index)?;
        let value = self.push_value(value);
        self.set_actions.push(format!("{path} = {value}"));
        Ok(())
    }

    /// `REMOVE name[i]`.
    pub fn remove_list_element(&mut self, field: &str, index: i64) -> Result<(), ExprError> {
        let path = self.indexed_path(field, index)?;
        self.remove_actions.push(path);
        Ok(())
    }

    /// The optimistic-concurrency pair: `SET field = :next` plus the
    /// condition `field = :current`. Emitted together so the store
    /// enforces them atomically.
    pub fn add_version_pair(&mut self, field: &str, current: i64) -> Result<(), ExprError> {
        self.set_value(field, Av::n(current + 1))?;
        let name = self.resolve_path(field)?;
        let guard = self.push_value(Av::n(current));
        self.push_condition_text(Connector::And, format!("{name} = {guard}"));
        Ok(())
    }

    /// Validates the index before it can touch the path text. A negative
    /// index is rejected as a security violation, same as a malformed
    /// bracket.
    fn indexed_path(&mut self, field: &str, index: i64) -> Result<String, ExprError> {
        if index < 0 {
            return Err(SecurityError::invalid_field(
                "list index is not a non-negative decimal",
            )
            .into());
        }
        self.resolve_path(&format!("{field}[{index}]"))
    }

    fn push_value(&mut self, value: Av) -> String {
        // Private shim: value placeholders stay builder-owned.
        self.register_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Expressions;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use theorydb_core::registry::Registry;
    use theorydb_core::schema::{Model, ModelSchema};
    use theorydb_core::validate::Limits;

    struct Doc;

    impl Model for Doc {
        fn schema() -> ModelSchema {
            ModelSchema::new("docs")
                .field("pk", "pk")
                .field("title", "title")
                .field("tags", "tags,set")
                .field("scores", "scores")
                .field("hits", "hits")
                .field("rev", "rev,version")
        }
    }

    fn builder() -> ExpressionBuilder {
        let registry = Arc::new(Registry::new());
        let descriptor = registry.descriptor_of::<Doc>().unwrap();
        ExpressionBuilder::new(descriptor, registry, Limits::default())
    }

    fn build(b: ExpressionBuilder) -> Expressions {
        b.build()
    }

    #[test]
    fn set_and_remove_render_with_verbs() {
        let mut b = builder();
        b.set_value("title", Av::s("new")).unwrap();
        b.remove_value("hits").unwrap();
        let out = build(b);
        assert_eq!(out.update.as_deref(), Some("SET #n1 = :v1 REMOVE #n2"));
    }

    #[test]
    fn verb_groups_emit_in_canonical_order() {
        let mut b = builder();
        b.delete_value("tags", Av::Ss(vec!["old".into()])).unwrap();
        b.add_value("hits", Av::n(1)).unwrap();
        b.remove_value("scores").unwrap();
        b.set_value("title", Av::s("t")).unwrap();
        let out = build(b);
        assert_eq!(
            out.update.as_deref(),
            Some("SET #n4 = :v3 REMOVE #n3 ADD #n2 :v2 DELETE #n1 :v1")
        );
    }

    #[test]
    fn set_if_not_exists_reuses_the_name() {
        let mut b = builder();
        b.set_if_not_exists("hits", Av::n(0)).unwrap();
        let out = build(b);
        assert_eq!(
            out.update.as_deref(),
            Some("SET #n1 = if_not_exists(#n1, :v1)")
        );
    }

    #[test]
    fn list_append_argument_order() {
        let mut b = builder();
        b.list_append("scores", Av::n(5), false).unwrap();
        let out = build(b);
        assert_eq!(
            out.update.as_deref(),
            Some("SET #n1 = list_append(#n1, :v1)")
        );
        assert_eq!(out.values[":v1"], Av::L(vec![Av::n(5)]));

        let mut b = builder();
        b.list_append("scores", Av::L(vec![Av::n(5)]), true).unwrap();
        let out = build(b);
        assert_eq!(
            out.update.as_deref(),
            Some("SET #n1 = list_append(:v1, #n1)")
        );
    }

    #[test]
    fn list_element_mutations() {
        let mut b = builder();
        b.set_list_element("tags", 2, Av::s("vip")).unwrap();
        b.remove_list_element("scores", 0).unwrap();
        let out = build(b);
        assert_eq!(
            out.update.as_deref(),
            Some("SET #n1[2] = :v1 REMOVE #n2[0]")
        );
    }

    #[test]
    fn negative_index_is_a_security_error() {
        let mut b = builder();
        let err = b.set_list_element("tags", -1, Av::s("x")).unwrap_err();
        match err {
            ExprError::Validation(ValidationError::Security(s)) => {
                assert_eq!(s.kind, theorydb_core::error::SecurityKind::InvalidField);
            }
            other => panic!("expected security error, got {other:?}"),
        }
        assert_eq!(b.name_count(), 0);
        assert_eq!(b.value_count(), 0);

        assert!(b.remove_list_element("tags", -3).is_err());
    }

    #[test]
    fn add_requires_number_or_set() {
        let mut b = builder();
        assert!(b.add_value("hits", Av::n(1)).is_ok());
        assert!(b.add_value("tags", Av::Ss(vec!["x".into()])).is_ok());
        assert!(b.add_value("hits", Av::s("one")).is_err());
    }

    #[test]
    fn delete_requires_a_set() {
        let mut b = builder();
        assert!(b.delete_value("tags", Av::Ns(vec!["1".into()])).is_ok());
        let err = b.delete_value("tags", Av::s("x")).unwrap_err();
        assert!(matches!(err, ExprError::Validation(_)));
    }

    #[test]
    fn version_pair_is_condition_plus_increment() {
        let mut b = builder();
        b.set_value("title", Av::s("new")).unwrap();
        b.add_version_pair("rev", 7).unwrap();
        let out = build(b);
        assert_eq!(out.update.as_deref(), Some("SET #n1 = :v1, #n2 = :v2"));
        assert_eq!(out.condition.as_deref(), Some("#n2 = :v3"));
        assert_eq!(out.values[":v2"], Av::N("8".into()));
        assert_eq!(out.values[":v3"], Av::N("7".into()));
    }
}
