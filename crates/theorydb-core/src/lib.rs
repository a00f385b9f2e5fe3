//! Core types and traits for the theorydb object-document mapper.
//!
//! This crate contains everything the query layer compiles against: the
//! attribute-value tree, the tag mini-language, model schemas and their
//! memoized descriptors, the validator, and the record/item converter.

pub mod convert;
pub mod crypto;
pub mod error;
pub mod naming;
pub mod registry;
pub mod schema;
pub mod tag;
pub mod validate;
pub mod value;

// Re-exports for convenience.
pub use convert::{from_item, marshal_item, unmarshal_item};
pub use crypto::{DataKeyProvider, Envelope};
pub use error::{ConvertError, ModelError, SecurityError, SecurityKind, ValidationError};
pub use naming::NamingConvention;
pub use registry::{Converter, Registry};
pub use schema::{Descriptor, FieldDescriptor, FieldKind, Model, ModelSchema};
pub use tag::{FieldTag, ProjectionKind};
pub use validate::{Limits, Operator};
pub use value::{Av, Item};
