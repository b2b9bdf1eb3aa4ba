//! The value converter.
//!
//! Conversion of a value to a target type tries, in order:
//!
//! 1. the value's own [`Convertible`] hook,
//! 2. returning the value unchanged when it already satisfies the target
//!    (array, collection and map targets are always re-checked),
//! 3. the pluggable [`TypeConverter`]s in registration order,
//! 4. built-in scalar, number, collection and map conversions,
//! 5. building the target from a single string through the construction backend.
//!
//! Anything else is a [`DiError::Conversion`].
//!
//! [`Convertible`]: crate::value::Convertible

mod builtin;

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::backend::ConstructionBackend;
use crate::error::{DiError, DiResult};
use crate::types::TypeSpec;
use crate::value::Value;

pub use builtin::{parse_bool, parse_char, parse_properties};

/// A pluggable conversion strategy.
///
/// Registered converters are consulted after the identity check and before
/// the built-in conversions. A converter that returns [`Value::Null`] is
/// treated as having declined.
///
/// # Examples
///
/// ```rust
/// use ferrous_blueprint::{Converter, TypeConverter, TypeSpec, Value, DiResult};
/// use std::sync::Arc;
///
/// struct Upper;
///
/// impl TypeConverter for Upper {
///     fn can_convert(&self, value: &Value, target: &TypeSpec) -> bool {
///         value.as_str().is_some() && *target == TypeSpec::named("Upper")
///     }
///
///     fn convert(&self, value: &Value, _target: &TypeSpec) -> DiResult<Value> {
///         Ok(Value::str(value.as_str().unwrap_or_default().to_uppercase()))
///     }
/// }
///
/// let converter = Converter::new();
/// converter.register(Arc::new(Upper));
/// let out = converter.convert(&Value::str("abc"), &TypeSpec::named("Upper")).unwrap();
/// assert_eq!(out, Value::str("ABC"));
/// ```
pub trait TypeConverter: Send + Sync {
    fn can_convert(&self, value: &Value, target: &TypeSpec) -> bool;
    fn convert(&self, value: &Value, target: &TypeSpec) -> DiResult<Value>;
}

/// Converts values to target types; shared by a container and its repository.
#[derive(Default)]
pub struct Converter {
    converters: RwLock<Vec<Arc<dyn TypeConverter>>>,
    backend: Option<Arc<dyn ConstructionBackend>>,
}

impl Converter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A converter that can build named types from strings through `backend`.
    pub fn with_backend(backend: Arc<dyn ConstructionBackend>) -> Self {
        Converter {
            converters: RwLock::new(Vec::new()),
            backend: Some(backend),
        }
    }

    /// Appends a pluggable converter.
    pub fn register(&self, converter: Arc<dyn TypeConverter>) {
        self.converters.write().push(converter);
    }

    /// Removes a previously registered converter, comparing by identity.
    pub fn unregister(&self, converter: &Arc<dyn TypeConverter>) -> bool {
        let mut converters = self.converters.write();
        let before = converters.len();
        converters.retain(|c| !same_converter(c, converter));
        before != converters.len()
    }

    pub fn converter_count(&self) -> usize {
        self.converters.read().len()
    }

    /// True when `value` converts to `target` without error.
    pub fn can_convert(&self, value: &Value, target: &TypeSpec) -> bool {
        self.convert(value, target).is_ok()
    }

    /// Converts `value` to `target`.
    pub fn convert(&self, value: &Value, target: &TypeSpec) -> DiResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        if let Value::Convertible(hook) = value {
            return hook.convert(target, self);
        }
        if !target.is_container() && is_assignable(value, target) {
            return Ok(value.clone());
        }

        let converters = self.converters.read().clone();
        for converter in &converters {
            if converter.can_convert(value, target) {
                let converted = converter.convert(value, target)?;
                if !converted.is_null() {
                    trace!(target_type = %target, "converted by pluggable converter");
                    return Ok(converted);
                }
            }
        }

        if let Some(result) = builtin::convert(self, value, target) {
            return result;
        }

        if let (TypeSpec::Named(class), Value::Str(text)) = (target, value) {
            if let Some(backend) = &self.backend {
                if let Some(result) = backend.from_string(class, text) {
                    return result.map_err(|e| {
                        DiError::conversion(value, target, Some(e.to_string()))
                    });
                }
            }
        }

        Err(DiError::conversion(value, target, None))
    }

    /// Typed convenience wrapper around [`Converter::convert`].
    pub fn convert_to<T: crate::value::FromValue>(
        &self,
        value: &Value,
        target: &TypeSpec,
    ) -> DiResult<T> {
        let converted = self.convert(value, target)?;
        T::from_value(&converted).ok_or_else(|| DiError::TypeMismatch {
            expected: std::any::type_name::<T>().to_string(),
            found: converted.kind().to_string(),
        })
    }
}

fn same_converter(a: &Arc<dyn TypeConverter>, b: &Arc<dyn TypeConverter>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const u8,
        Arc::as_ptr(b) as *const u8,
    )
}

/// Whether `value` already satisfies a non-container `target`.
pub(crate) fn is_assignable(value: &Value, target: &TypeSpec) -> bool {
    match (target, value) {
        (TypeSpec::Any, _) => true,
        (TypeSpec::Bool, Value::Bool(_)) => true,
        (t, Value::Int(i)) if t.is_integer() => in_range(t, i128::from(*i)),
        (t, Value::UInt(u)) if t.is_integer() => in_range(t, i128::from(*u)),
        (TypeSpec::F32 | TypeSpec::F64, Value::Float(_)) => true,
        (TypeSpec::Char, Value::Char(_)) => true,
        (TypeSpec::String, Value::Str(_)) => true,
        (TypeSpec::Duration, Value::Duration(_)) => true,
        (TypeSpec::Path, Value::Path(_)) => true,
        (TypeSpec::IpAddr, Value::Ip(_)) => true,
        (TypeSpec::SocketAddr, Value::Socket(_)) => true,
        (TypeSpec::Regex, Value::Regex(_)) => true,
        (TypeSpec::Locale, Value::Locale(..)) => true,
        (TypeSpec::Properties, Value::Map(entries)) => {
            entries.iter().all(|(k, _)| matches!(k, Value::Str(_)))
        }
        (TypeSpec::Enum { name, variants }, Value::Enum { type_name, variant }) => {
            name == type_name && variants.contains(variant)
        }
        (TypeSpec::Named(name), Value::Object(instance)) => instance.satisfies(name),
        _ => false,
    }
}

fn in_range(target: &TypeSpec, value: i128) -> bool {
    target
        .integer_range()
        .map(|(min, max)| value >= min && value <= max)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Instance;

    struct Declines;

    impl TypeConverter for Declines {
        fn can_convert(&self, _value: &Value, _target: &TypeSpec) -> bool {
            true
        }

        fn convert(&self, _value: &Value, _target: &TypeSpec) -> DiResult<Value> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn identity_short_circuit_keeps_objects() {
        let converter = Converter::new();
        let instance = Instance::new(1u8).with_class("One");
        let value = Value::Object(instance.clone());
        let out = converter.convert(&value, &TypeSpec::named("One")).unwrap();
        assert!(out.as_instance().unwrap().ptr_eq(&instance));
        assert!(converter.convert(&value, &TypeSpec::named("Two")).is_err());
    }

    #[test]
    fn declining_converter_falls_through_to_builtins() {
        let converter = Converter::new();
        converter.register(Arc::new(Declines));
        assert_eq!(
            converter.convert(&Value::str("7"), &TypeSpec::I32).unwrap(),
            Value::Int(7)
        );
    }

    #[test]
    fn unregister_compares_identity() {
        let converter = Converter::new();
        let declines: Arc<dyn TypeConverter> = Arc::new(Declines);
        converter.register(declines.clone());
        assert_eq!(converter.converter_count(), 1);
        assert!(converter.unregister(&declines));
        assert!(!converter.unregister(&declines));
    }
}
