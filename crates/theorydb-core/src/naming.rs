//! Attribute naming conventions.
//!
//! A model declares one convention; it governs both the default attribute
//! name derived from a Rust field name and validation of explicit names.

use serde::{Deserialize, Serialize};

/// The attribute naming convention for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamingConvention {
    /// `camelCase` attribute names (the default).
    #[default]
    CamelCase,
    /// `snake_case` attribute names.
    SnakeCase,
}

impl NamingConvention {
    /// Parses a convention from its tag token value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "camelCase" | "camel_case" => Some(Self::CamelCase),
            "snake_case" => Some(Self::SnakeCase),
            _ => None,
        }
    }

    /// Returns the canonical tag token value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CamelCase => "camelCase",
            Self::SnakeCase => "snake_case",
        }
    }

    /// Derives the default attribute name from a Rust field name
    /// (which is snake_case by convention).
    pub fn derive(&self, rust_name: &str) -> String {
        match self {
            Self::SnakeCase => rust_name.to_string(),
            Self::CamelCase => {
                let mut out = String::with_capacity(rust_name.len());
                let mut upper_next = false;
                for c in rust_name.chars() {
                    if c == '_' {
                        upper_next = true;
                    } else if upper_next {
                        out.extend(c.to_uppercase());
                        upper_next = false;
                    } else {
                        out.push(c);
                    }
                }
                out
            }
        }
    }

    /// Returns `true` if an explicit attribute name matches this convention.
    pub fn matches(&self, name: &str) -> bool {
        let mut chars = name.chars();
        let Some(first) = chars.next() else {
            return false;
        };
        if !first.is_ascii_lowercase() && first != '_' {
            return false;
        }
        match self {
            Self::CamelCase => chars.all(|c| c.is_ascii_alphanumeric()),
            Self::SnakeCase => chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'),
        }
    }
}
