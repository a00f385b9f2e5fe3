//! Expression compilation for the theorydb object-document mapper.
//!
//! The [`ExpressionBuilder`] accumulates placeholders and condition text
//! and emits the five canonical expression strings. Every identifier and
//! literal appears only as a placeholder; nothing user-supplied is ever
//! inlined.

pub mod builder;
pub mod error;
pub mod reserved;
mod update;

pub use builder::{
    Connector, ExpressionBuilder, Expressions, convert_expression_value, split_operands,
};
pub use error::ExprError;
pub use reserved::is_reserved;
