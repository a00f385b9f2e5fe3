//! Identifier, operator, and value validation.
//!
//! Everything user-supplied passes through here before any expression text
//! is formed. Rejections are typed and never echo the rejected input.

use crate::error::{SecurityError, SecurityKind, ValidationError};

/// Size limits applied during validation.
///
/// Defaults are permissive; deployments tighten them through the config
/// crate.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Maximum length of a single field-name segment.
    pub max_field_name_len: usize,
    /// Maximum length of a string value.
    pub max_string_value_len: usize,
    /// Maximum nesting depth of a value.
    pub max_value_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_field_name_len: 255,
            max_string_value_len: 400_000,
            max_value_depth: 32,
        }
    }
}

// ---------------------------------------------------------------------------
// Field names and paths
// ---------------------------------------------------------------------------

/// Validates a complete (possibly dotted, possibly indexed) field path.
///
/// Each dot-separated segment must be an identifier or an identifier with
/// a single bracketed non-negative decimal index.
pub fn validate_field_path(path: &str, limits: &Limits) -> Result<(), SecurityError> {
    if path.is_empty() {
        return Err(SecurityError::invalid_field("empty field path"));
    }
    for segment in path.split('.') {
        parse_list_index(segment, limits)?;
    }
    Ok(())
}

/// Parses a path segment into `(name, Some(index))` for `name[3]` or
/// `(name, None)` for a plain identifier.
///
/// Anything else is rejected: negative or non-decimal indices, whitespace,
/// trailing text after the bracket, unterminated brackets. Paths are
/// parsed, never assembled by string surgery, so input like
/// `items[0]=:v, other` can never reach an expression.
pub fn parse_list_index<'a>(
    segment: &'a str,
    limits: &Limits,
) -> Result<(&'a str, Option<u32>), SecurityError> {
    let (name, index) = match segment.find('[') {
        None => (segment, None),
        Some(open) => {
            let rest = &segment[open + 1..];
            let Some(close) = rest.find(']') else {
                return Err(SecurityError::invalid_field("unterminated list index"));
            };
            if close + 1 != rest.len() {
                return Err(SecurityError::invalid_field("trailing text after list index"));
            }
            let digits = &rest[..close];
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(SecurityError::invalid_field(
                    "list index is not a non-negative decimal",
                ));
            }
            let index: u32 = digits
                .parse()
                .map_err(|_| SecurityError::invalid_field("list index out of range"))?;
            (&segment[..open], Some(index))
        }
    };

    validate_identifier(name, limits)?;
    Ok((name, index))
}

/// Validates a bare identifier segment: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_identifier(name: &str, limits: &Limits) -> Result<(), SecurityError> {
    if name.is_empty() {
        return Err(SecurityError::invalid_field("empty field name segment"));
    }
    if name.len() > limits.max_field_name_len {
        return Err(SecurityError {
            kind: SecurityKind::OversizedName,
            detail: "field name segment exceeds maximum length",
        });
    }
    let bytes = name.as_bytes();
    if !(bytes[0].is_ascii_alphabetic() || bytes[0] == b'_') {
        return Err(SecurityError::invalid_field(
            "field name must start with a letter or underscore",
        ));
    }
    if !bytes[1..]
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || *b == b'_')
    {
        return Err(SecurityError::invalid_field(
            "field name contains forbidden characters",
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// The closed set of condition operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Between,
    In,
    BeginsWith,
    Contains,
    Exists,
    NotExists,
}

/// How many operands an operator consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandShape {
    /// No operand (`attribute_exists` and friends).
    None,
    /// Exactly one operand.
    One,
    /// Exactly two operands (`BETWEEN`).
    Two,
    /// One to one hundred operands (`IN`).
    Many,
}

impl Operator {
    /// Parses an operator, accepting the symbolic and word aliases.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let op = match s {
            "=" | "==" => Self::Eq,
            "!=" | "<>" => Self::Ne,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            _ => match s.to_ascii_uppercase().as_str() {
                "EQ" => Self::Eq,
                "NE" => Self::Ne,
                "LT" => Self::Lt,
                "LE" => Self::Le,
                "GT" => Self::Gt,
                "GE" => Self::Ge,
                "BETWEEN" => Self::Between,
                "IN" => Self::In,
                "BEGINS_WITH" => Self::BeginsWith,
                "CONTAINS" => Self::Contains,
                "EXISTS" | "ATTRIBUTE_EXISTS" => Self::Exists,
                "NOT_EXISTS" | "ATTRIBUTE_NOT_EXISTS" => Self::NotExists,
                _ => return Err(ValidationError::InvalidOperator(s.to_string())),
            },
        };
        Ok(op)
    }

    /// The comparator symbol, for operators that render as `name op :v`.
    pub fn symbol(&self) -> Option<&'static str> {
        match self {
            Self::Eq => Some("="),
            Self::Ne => Some("<>"),
            Self::Lt => Some("<"),
            Self::Le => Some("<="),
            Self::Gt => Some(">"),
            Self::Ge => Some(">="),
            _ => None,
        }
    }

    /// The operand shape this operator requires.
    pub fn operand_shape(&self) -> OperandShape {
        match self {
            Self::Exists | Self::NotExists => OperandShape::None,
            Self::Between => OperandShape::Two,
            Self::In => OperandShape::Many,
            _ => OperandShape::One,
        }
    }

    /// Returns `true` for operators valid in a key-condition expression.
    pub fn valid_for_key(&self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Lt | Self::Le | Self::Gt | Self::Ge | Self::Between | Self::BeginsWith
        )
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Validates a value's shape before conversion.
///
/// String lengths and nesting depth are bounded; everything serde can
/// produce is otherwise representable.
pub fn validate_value(value: &serde_json::Value, limits: &Limits) -> Result<(), ValidationError> {
    validate_value_at(value, limits, 0)
}

fn validate_value_at(
    value: &serde_json::Value,
    limits: &Limits,
    depth: usize,
) -> Result<(), ValidationError> {
    if depth > limits.max_value_depth {
        return Err(ValidationError::invalid_value("value nesting too deep"));
    }
    match value {
        serde_json::Value::String(s) if s.len() > limits.max_string_value_len => {
            Err(ValidationError::invalid_value("string exceeds maximum length"))
        }
        serde_json::Value::Array(items) => {
            for item in items {
                validate_value_at(item, limits, depth + 1)?;
            }
            Ok(())
        }
        serde_json::Value::Object(map) => {
            for v in map.values() {
                validate_value_at(v, limits, depth + 1)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
