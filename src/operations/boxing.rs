//! Scalar boxing.
//!
//! `box_*` registers a primitive received from the foreign side; `unbox_*`
//! reads one back. Unboxing a handle of any other type is a protocol
//! violation.

use crate::error::{violation, ProtocolViolation};
use crate::registry::{Handle, Registry};
use crate::types::ScalarKind;
use crate::value::Value;

macro_rules! scalar_boxing {
    ($($box_fn:ident, $unbox_fn:ident, $ty:ty, $variant:ident, $kind:ident;)*) => {
        $(
            #[doc = concat!("Register a `", stringify!($ty), "`")]
            pub fn $box_fn(registry: &Registry, value: $ty) -> Handle {
                registry.register(Value::$variant(value))
            }

            #[doc = concat!("Read back the `", stringify!($ty), "` at `handle`")]
            pub fn $unbox_fn(registry: &Registry, handle: Handle) -> $ty {
                registry.with(handle, |value| match *value {
                    Value::$variant(v) => v,
                    ref other => unbox_mismatch(stringify!($unbox_fn), ScalarKind::$kind, other),
                })
            }
        )*
    };
}

scalar_boxing! {
    box_bool, unbox_bool, bool, Bool, Bool;
    box_int8, unbox_int8, i8, Int8, Int8;
    box_int16, unbox_int16, i16, Int16, Int16;
    box_int32, unbox_int32, i32, Int32, Int32;
    box_int64, unbox_int64, i64, Int64, Int64;
    box_uint8, unbox_uint8, u8, Uint8, Uint8;
    box_uint16, unbox_uint16, u16, Uint16, Uint16;
    box_uint32, unbox_uint32, u32, Uint32, Uint32;
    box_uint64, unbox_uint64, u64, Uint64, Uint64;
    box_float32, unbox_float32, f32, Float32, Float32;
    box_float64, unbox_float64, f64, Float64, Float64;
}

/// Register a copy of `text`
pub fn box_text(registry: &Registry, text: &str) -> Handle {
    registry.register(text)
}

/// Copy of the text at `handle`
pub fn unbox_text(registry: &Registry, handle: Handle) -> String {
    registry.with(handle, |value| match value {
        Value::Text(text) => text.clone(),
        other => unbox_mismatch("unbox_text", ScalarKind::Text, other),
    })
}

fn unbox_mismatch(op: &'static str, expected: ScalarKind, found: &Value) -> ! {
    violation(ProtocolViolation::TypeMismatch {
        op,
        expected: expected.name().to_string(),
        found: found.type_descriptor().to_string(),
    })
}
