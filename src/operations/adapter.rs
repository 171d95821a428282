//! Type-erasure adapter.
//!
//! Nil tests, dereferencing and conversions over registered values. These
//! checks are soft: given a valid handle they report failure through
//! `Option`/`bool` instead of faulting.

use super::{shape_mismatch, Lookup};
use crate::registry::{Handle, Registry};
use crate::types::TypeDescriptor;
use crate::value::{new_cell, Value};
use std::sync::Arc;
use tracing::debug;

/// Whether the value at `handle` is a null pointer or an unset interface.
///
/// Any other shape is a protocol violation.
pub fn is_nil(registry: &Registry, handle: Handle) -> bool {
    registry.with(handle, |value| match value.is_nil() {
        Some(nil) => nil,
        None => shape_mismatch("is_nil", "a pointer or interface", value),
    })
}

/// Register what the value at `handle` refers to.
///
/// A pointer's pointee is registered as is, so the new handle and the
/// pointer share it. An interface's dynamic value is registered as a copy.
/// Returns `None` for null pointers, unset interfaces and values that are
/// neither pointers nor interfaces.
pub fn dereference(registry: &Registry, handle: Handle) -> Lookup {
    let target = registry.with(handle, |value| match value.unnamed() {
        Value::Pointer(pointer) => pointer.target().map(Arc::clone),
        Value::Interface(inner) => inner.as_deref().cloned().map(new_cell),
        _ => None,
    })?;
    Some(registry.register_cell(target))
}

/// Convert the value at `source` to the type of the value at `target`.
///
/// A set interface at `target` contributes the type it holds; a set
/// interface at `source` contributes the value it holds. Returns `None`
/// when the types are not convertible or the source interface is unset.
pub fn cast(registry: &Registry, target: Handle, source: Handle) -> Lookup {
    let target_type = target_type(registry, target);
    let source_value = registry.with(source, |value| match value.unnamed() {
        Value::Interface(inner) => inner.as_deref().cloned(),
        _ => Some(value.clone()),
    });

    let converted = source_value.and_then(|value| value.convert(&target_type));
    registry.metrics().record_cast(converted.is_some());

    match converted {
        Some(value) => Some(registry.register(value)),
        None => {
            debug!(target, source, to = %target_type, "Cast rejected");
            None
        }
    }
}

/// Register an unset interface value
pub fn nil_interface(registry: &Registry) -> Handle {
    registry.register(Value::nil_interface())
}

/// Type a shape handle stands for when used as a cast target
pub fn target_type(registry: &Registry, handle: Handle) -> TypeDescriptor {
    registry.with(handle, |value| match value.unnamed() {
        Value::Interface(Some(inner)) => inner.type_descriptor(),
        _ => value.type_descriptor(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NamedType, ScalarKind};
    use crate::value::Pointer;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    struct Selector {
        label: String,
    }

    #[test]
    fn test_is_nil() {
        let registry = Registry::default();
        let unset = nil_interface(&registry);
        assert!(is_nil(&registry, unset));

        let null = registry.register(Pointer::null(ScalarKind::Int32.into()));
        assert!(is_nil(&registry, null));

        let set = registry.register(Value::Interface(Some(Box::new(Value::from(1u8)))));
        assert!(!is_nil(&registry, set));

        let pointer = registry.new_pointer(registry.register(1u8));
        assert!(!is_nil(&registry, pointer));
    }

    #[test]
    #[should_panic(expected = "is_nil() expects a pointer or interface, found i32")]
    fn test_is_nil_on_direct_value() {
        let registry = Registry::default();
        let handle = registry.register(4i32);
        is_nil(&registry, handle);
    }

    #[test]
    fn test_dereference_pointer() {
        let registry = Registry::default();
        let original = registry.register("leaf");
        let pointer = registry.new_pointer(original);

        let deref = dereference(&registry, pointer).unwrap();
        assert_eq!(registry.get(deref), Value::from("leaf"));
        assert_ne!(deref, original);

        registry.with_mut(deref, |value| *value = Value::from("branch"));
        let again = dereference(&registry, pointer).unwrap();
        assert_eq!(registry.get(again), Value::from("branch"));
        assert_eq!(registry.get(original), Value::from("leaf"));

        // the pointee outlives the pointer handle
        registry.forget(pointer);
        assert_eq!(registry.get(deref), Value::from("branch"));
    }

    #[test]
    fn test_dereference_interface_is_copy() {
        let registry = Registry::default();
        let set = registry.register(Value::Interface(Some(Box::new(Value::from(1u8)))));
        let deref = dereference(&registry, set).unwrap();
        registry.with_mut(deref, |value| *value = Value::from(2u8));

        let again = dereference(&registry, set).unwrap();
        assert_eq!(registry.get(again), Value::Uint8(1));
    }

    #[test]
    fn test_dereference_interface() {
        let registry = Registry::default();
        let set = registry.register(Value::Interface(Some(Box::new(Value::from(2.5f64)))));
        let deref = dereference(&registry, set).unwrap();
        assert_eq!(registry.get(deref), Value::Float64(2.5));
    }

    #[test]
    fn test_dereference_soft_failures() {
        let registry = Registry::default();
        let unset = nil_interface(&registry);
        let null = registry.register(Pointer::null(ScalarKind::Text.into()));
        let direct = registry.register(5u32);

        assert_eq!(dereference(&registry, unset), None);
        assert_eq!(dereference(&registry, null), None);
        assert_eq!(dereference(&registry, direct), None);
    }

    #[test]
    fn test_cast_widens() {
        let registry = Registry::default();
        let target = registry.register(0i64);
        let source = registry.register(7i32);

        let cast_handle = cast(&registry, target, source).unwrap();
        assert_eq!(registry.get(cast_handle), Value::Int64(7));
        assert_eq!(registry.stats().casts_succeeded, 1);
    }

    #[test]
    fn test_cast_rejects_lossy_and_unrelated() {
        let registry = Registry::default();
        let int32 = registry.register(0i32);
        let int64 = registry.register(1i64 << 40);
        let boolean = registry.register(false);
        let text = registry.register("true");

        assert_eq!(cast(&registry, int32, int64), None);
        assert_eq!(cast(&registry, boolean, text), None);
        assert_eq!(registry.stats().casts_failed, 2);
    }

    #[test]
    fn test_cast_unwraps_source_interface() {
        let registry = Registry::default();
        let selector = Selector {
            label: "name".into(),
        };
        let target = registry.register_object(Selector {
            label: String::new(),
        });
        let source = registry.register(Value::Interface(Some(Box::new(Value::host(
            selector.clone(),
        )))));

        let concrete = cast(&registry, target, source).unwrap();
        assert_eq!(registry.get_object::<Selector>(concrete), selector);

        let unset = nil_interface(&registry);
        assert_eq!(cast(&registry, target, unset), None);
    }

    #[test]
    fn test_cast_into_interface() {
        let registry = Registry::default();
        let any = nil_interface(&registry);
        let source = registry.register(3u16);

        let boxed = cast(&registry, any, source).unwrap();
        assert_eq!(registry.type_of(boxed), TypeDescriptor::Interface);
        assert!(!is_nil(&registry, boxed));
        let inner = dereference(&registry, boxed).unwrap();
        assert_eq!(registry.get(inner), Value::Uint16(3));
    }

    #[test]
    fn test_cast_uses_contained_target_type() {
        let registry = Registry::default();
        let target = registry.register(Value::Interface(Some(Box::new(Value::from(0f64)))));
        let source = registry.register(2u32);

        let handle = cast(&registry, target, source).unwrap();
        assert_eq!(registry.get(handle), Value::Float64(2.0));
    }

    #[test]
    fn test_cast_named_types() {
        let registry = Registry::default();
        let op = NamedType::new("Op", ScalarKind::Int32.into());
        let target = registry.register(Value::named(Arc::clone(&op), Value::from(0i32)).unwrap());
        let source = registry.register(12i32);

        let handle = cast(&registry, target, source).unwrap();
        assert_eq!(registry.type_of(handle), TypeDescriptor::Named(op));
        assert_eq!(registry.get(handle).unnamed(), &Value::Int32(12));
    }

    #[test]
    fn test_cast_text_to_bytes() {
        let registry = Registry::default();
        let bytes = crate::operations::make_sequence(&registry, registry.register(0u8), 0);
        let text = registry.register("ok");

        let handle = cast(&registry, bytes, text).unwrap();
        assert_eq!(crate::operations::sequence_len(&registry, handle), 2);
    }

    #[test]
    fn test_target_type() {
        let registry = Registry::default();
        let set = registry.register(Value::Interface(Some(Box::new(Value::from(1i8)))));
        assert_eq!(target_type(&registry, set), ScalarKind::Int8.into());
        assert_eq!(
            target_type(&registry, nil_interface(&registry)),
            TypeDescriptor::Interface
        );
    }
}
