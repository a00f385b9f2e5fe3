//! Process-wide registries for descriptors and custom converters.
//!
//! Both registries are read-mostly: descriptors are built once per record
//! type and never mutated; converter registration serializes writers and
//! refuses conflicting re-registration. API boundaries take an explicit
//! [`Registry`] value so tests can use their own instead of the process
//! default.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::debug;

use crate::error::{ConvertError, ModelError};
use crate::schema::{Descriptor, Model};
use crate::value::Av;

/// Conversion functions for one registered type.
///
/// Converters operate on the serde representation of a field value; their
/// output still passes value validation when it enters an expression
/// builder.
pub struct Converter {
    /// Stable identity used to detect conflicting re-registration.
    pub name: &'static str,
    /// Record-to-wire direction.
    pub to_av: Box<dyn Fn(&serde_json::Value) -> Result<Av, ConvertError> + Send + Sync>,
    /// Wire-to-record direction.
    pub from_av: Box<dyn Fn(&Av) -> Result<serde_json::Value, ConvertError> + Send + Sync>,
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter").field("name", &self.name).finish()
    }
}

/// Descriptor and converter registry.
#[derive(Debug, Default)]
pub struct Registry {
    descriptors: RwLock<HashMap<TypeId, Arc<Descriptor>>>,
    converters: RwLock<HashMap<TypeId, Arc<Converter>>>,
}

static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();

impl Registry {
    /// Creates an empty registry (useful for tests).
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide default registry.
    pub fn global() -> Arc<Self> {
        GLOBAL.get_or_init(|| Arc::new(Self::new())).clone()
    }

    /// Returns the memoized descriptor for `T`, building it on first use.
    pub fn descriptor_of<T: Model + 'static>(&self) -> Result<Arc<Descriptor>, ModelError> {
        let type_id = TypeId::of::<T>();
        {
            let descriptors = self.descriptors.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(found) = descriptors.get(&type_id) {
                return Ok(found.clone());
            }
        }

        // Build outside the lock; a racing builder produces the same value.
        let built = Arc::new(Descriptor::build(&T::schema())?);
        debug!(table = %built.table_name, fields = built.fields.len(), "built model descriptor");

        let mut map = self.descriptors.write().unwrap_or_else(PoisonError::into_inner);
        Ok(map.entry(type_id).or_insert(built).clone())
    }

    /// Registers a custom converter for `T`.
    ///
    /// Re-registering the same named converter is a no-op; registering a
    /// differently named converter for the same type fails.
    pub fn register_type_converter<T: 'static>(
        &self,
        converter: Converter,
    ) -> Result<(), ModelError> {
        let mut map = self.converters.write().unwrap_or_else(PoisonError::into_inner);
        match map.get(&TypeId::of::<T>()) {
            Some(existing) if existing.name != converter.name => Err(ModelError::ConverterConflict {
                type_name: std::any::type_name::<T>(),
            }),
            Some(_) => Ok(()),
            None => {
                map.insert(TypeId::of::<T>(), Arc::new(converter));
                Ok(())
            }
        }
    }

    /// Looks up a converter by exact type id.
    pub fn converter(&self, type_id: TypeId) -> Option<Arc<Converter>> {
        self.converters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&type_id)
            .cloned()
    }

    /// Looks up a converter for a concrete type.
    pub fn converter_for<T: 'static>(&self) -> Option<Arc<Converter>> {
        self.converter(TypeId::of::<T>())
    }
}
