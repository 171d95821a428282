//! Generic container builder.
//!
//! Sequences and maps are created from shape handles: the runtime type of
//! the value at the shape handle becomes the element (or key/value) type.
//! Values are copied in on insertion. A sequence item handed out by
//! [`sequence_get`] is the item itself, so writes through its handle land in
//! the sequence; map lookups hand out copies.

use super::{shape_mismatch, with_shape, Lookup};
use crate::error::{violation, ProtocolViolation};
use crate::registry::{Handle, Registry};
use crate::value::{MapValue, Sequence, SlotMismatch, Value};
use tracing::trace;

const SEQUENCE: &str = "a sequence";
const MAP: &str = "a map";

fn slot_violation(op: &'static str, err: SlotMismatch) -> ! {
    violation(ProtocolViolation::TypeMismatch {
        op,
        expected: err.expected.to_string(),
        found: err.found.to_string(),
    })
}

/// Register an empty sequence whose element type is the type of the value
/// at `shape`. `capacity` is a sizing hint.
pub fn make_sequence(registry: &Registry, shape: Handle, capacity: usize) -> Handle {
    let elem = registry.type_of(shape);
    trace!(elem = %elem, capacity, "Creating sequence");
    registry.register(Sequence::new(elem, capacity))
}

/// Number of items in the sequence at `handle`
pub fn sequence_len(registry: &Registry, handle: Handle) -> usize {
    with_shape(
        registry,
        "sequence_len",
        handle,
        SEQUENCE,
        Value::as_sequence,
        Sequence::len,
    )
}

/// Register the item at `index`, or `None` when out of range.
///
/// The new handle shares the item's storage with the sequence.
pub fn sequence_get(registry: &Registry, handle: Handle, index: usize) -> Lookup {
    let item = with_shape(
        registry,
        "sequence_get",
        handle,
        SEQUENCE,
        Value::as_sequence,
        |seq| seq.cell(index).cloned(),
    )?;
    Some(registry.register_cell(item))
}

/// Append a copy of the value at `value` to the sequence at `target`.
///
/// The value must be of the element type, or the element type must be an
/// interface.
pub fn append(registry: &Registry, target: Handle, value: Handle) {
    let item = registry.get(value);
    registry.modify("append", target, |slot| match slot.as_sequence_mut() {
        Some(seq) => {
            if let Err(err) = seq.push(item) {
                slot_violation("append", err);
            }
        }
        None => shape_mismatch("append", SEQUENCE, slot),
    });
}

/// Register an empty map from the type at `key` to the type at `value`.
///
/// The key type must support equality.
pub fn make_map(registry: &Registry, key: Handle, value: Handle, capacity: usize) -> Handle {
    let key_type = registry.type_of(key);
    let value_type = registry.type_of(value);
    if !key_type.is_comparable() {
        violation(ProtocolViolation::NotComparable {
            op: "make_map",
            key: key_type.to_string(),
        });
    }
    trace!(key = %key_type, value = %value_type, capacity, "Creating map");
    registry.register(MapValue::new(key_type, value_type, capacity))
}

/// Insert copies of the values at `key` and `value` into the map at
/// `target`, replacing the entry for an equal key
pub fn insert(registry: &Registry, target: Handle, key: Handle, value: Handle) {
    let key = registry.get(key);
    let value = registry.get(value);
    registry.modify("insert", target, |slot| match slot.as_map_mut() {
        Some(map) => {
            if let Err(err) = map.insert(key, value) {
                slot_violation("insert", err);
            }
        }
        None => shape_mismatch("insert", MAP, slot),
    });
}

/// Number of entries in the map at `handle`
pub fn map_len(registry: &Registry, handle: Handle) -> usize {
    with_shape(registry, "map_len", handle, MAP, Value::as_map, MapValue::len)
}

/// Register a copy of the value stored under a key equal to the value at
/// `key`, or `None` when absent
pub fn map_get(registry: &Registry, handle: Handle, key: Handle) -> Lookup {
    let key = registry.get(key);
    let found = with_shape(registry, "map_get", handle, MAP, Value::as_map, |map| {
        match map.get(&key) {
            Ok(found) => found.cloned(),
            Err(err) => slot_violation("map_get", err),
        }
    })?;
    Some(registry.register(found))
}
