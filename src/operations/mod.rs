//! Handle-level operations exposed to foreign callers.
//!
//! Every operation is a free function over a shared [`Registry`]: it looks
//! up its operands by handle, works on copies or in place under the
//! value's lock, and registers any result under a fresh handle. The C ABI
//! and N-API surfaces are thin shims over these functions.

pub mod adapter;
pub mod boxing;
pub mod containers;

pub use adapter::{cast, dereference, is_nil, nil_interface};
pub use boxing::*;
pub use containers::{
    append, insert, make_map, make_sequence, map_get, map_len, sequence_get, sequence_len,
};

use crate::error::{violation, ProtocolViolation};
use crate::registry::{Handle, Registry};
use crate::value::Value;

/// Result type for operations that can fail without breaking the handle
/// contract. `None` is the foreign `(0, false)` pair.
pub type Lookup = Option<Handle>;

/// Apply `f` to the value at `handle`, or raise a shape mismatch when `f`
/// does not accept it
pub(crate) fn with_shape<T: ?Sized, R>(
    registry: &Registry,
    op: &'static str,
    handle: Handle,
    expected: &'static str,
    project: impl FnOnce(&Value) -> Option<&T>,
    f: impl FnOnce(&T) -> R,
) -> R {
    registry.with(handle, |value| match project(value) {
        Some(inner) => f(inner),
        None => shape_mismatch(op, expected, value),
    })
}

/// Raise a shape mismatch for `value`
pub(crate) fn shape_mismatch(op: &'static str, expected: &'static str, value: &Value) -> ! {
    violation(ProtocolViolation::ShapeMismatch {
        op,
        expected,
        found: value.type_descriptor().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_shape() {
        let registry = Registry::default();
        let handle = registry.register("abc");
        let len = with_shape(&registry, "len", handle, "text", Value::as_text, |s: &str| {
            s.len()
        });
        assert_eq!(len, 3);
    }

    #[test]
    #[should_panic(expected = "len() expects text, found bool")]
    fn test_with_shape_mismatch() {
        let registry = Registry::default();
        let handle = registry.register(true);
        with_shape(&registry, "len", handle, "text", Value::as_text, |s: &str| {
            s.len()
        });
    }
}
