//! Values held by the registry.
//!
//! [`Value`] is the type-erased representation of everything a handle can
//! refer to: primitives, pointers, interface slots, the two generic
//! containers, defined types, and opaque domain objects. Copying a `Value`
//! (via `Clone`) follows host assignment semantics: containers and text are
//! deep-copied, a pointer copy still refers to the same pointee.

use crate::types::{HostType, NamedType, ScalarKind, Shape, TypeDescriptor};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A wrapped domain type.
///
/// Implemented for every `Clone + PartialEq + Debug + Send + Sync` type, so
/// domain structs only need the usual derives to be registered.
pub trait HostObject: Any + fmt::Debug + Send + Sync {
    /// Descriptor of the concrete type
    fn host_type(&self) -> HostType;

    /// Copy into a new box
    fn clone_object(&self) -> Box<dyn HostObject>;

    /// Host equality; objects of different types are never equal
    fn eq_object(&self, other: &dyn HostObject) -> bool;

    /// Upcast for downcasting to the concrete type
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete type
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T> HostObject for T
where
    T: Any + Clone + PartialEq + fmt::Debug + Send + Sync,
{
    fn host_type(&self) -> HostType {
        HostType::of::<T>()
    }

    fn clone_object(&self) -> Box<dyn HostObject> {
        Box::new(self.clone())
    }

    fn eq_object(&self, other: &dyn HostObject) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A value did not fit the slot it was written to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotMismatch {
    /// Type of the slot
    pub expected: TypeDescriptor,
    /// Type of the rejected value
    pub found: TypeDescriptor,
}

/// Shared storage for one value.
///
/// Registry entries, pointer targets and sequence items each live in a
/// cell, so a handle can refer to the same storage as a pointee or element.
pub type ValueCell = Arc<RwLock<Value>>;

/// Move `value` into a fresh cell
pub fn new_cell(value: Value) -> ValueCell {
    Arc::new(RwLock::new(value))
}

/// A possibly-null pointer to a shared, mutable value
#[derive(Clone)]
pub struct Pointer {
    elem: TypeDescriptor,
    target: Option<ValueCell>,
}

impl Pointer {
    /// A null pointer to `elem`
    pub fn null(elem: TypeDescriptor) -> Self {
        Self { elem, target: None }
    }

    /// Move `value` into a fresh allocation and point at it
    pub fn to(value: Value) -> Self {
        Self {
            elem: value.type_descriptor(),
            target: Some(new_cell(value)),
        }
    }

    /// Type of the pointee
    pub fn elem_type(&self) -> &TypeDescriptor {
        &self.elem
    }

    /// Whether the pointer is null
    pub fn is_null(&self) -> bool {
        self.target.is_none()
    }

    /// The pointee's storage, or `None` for a null pointer
    pub fn target(&self) -> Option<&ValueCell> {
        self.target.as_ref()
    }

    /// Copy of the pointee, or `None` for a null pointer
    pub fn load(&self) -> Option<Value> {
        self.target.as_ref().map(|cell| cell.read().clone())
    }

    /// Replace the pointee. Returns the value back if the pointer is null or
    /// the type does not match.
    pub fn store(&self, value: Value) -> Result<(), Value> {
        match &self.target {
            Some(cell) if value.type_descriptor() == self.elem => {
                *cell.write() = value;
                Ok(())
            }
            _ => Err(value),
        }
    }

    /// Whether both pointers are null or refer to the same allocation
    pub fn same_target(&self, other: &Pointer) -> bool {
        match (&self.target, &other.target) {
            (None, None) => self.elem == other.elem,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(cell) => write!(f, "Pointer(*{} @ {:p})", self.elem, Arc::as_ptr(cell)),
            None => write!(f, "Pointer(*{} null)", self.elem),
        }
    }
}

/// An ordered, growable sequence with a fixed element type.
///
/// Each item lives in its own cell, so a handle to an item sees writes made
/// through the sequence and the other way round. Cloning the sequence
/// copies every item into new cells.
#[derive(Debug)]
pub struct Sequence {
    elem: TypeDescriptor,
    items: Vec<ValueCell>,
}

impl Sequence {
    /// An empty sequence of `elem`, pre-sized for `capacity` items
    pub fn new(elem: TypeDescriptor, capacity: usize) -> Self {
        Self {
            elem,
            items: Vec::with_capacity(capacity),
        }
    }

    /// Element type
    pub fn elem_type(&self) -> &TypeDescriptor {
        &self.elem
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the sequence is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Copy of the item at `index`
    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.get(index).map(|cell| cell.read().clone())
    }

    /// Storage of the item at `index`
    pub fn cell(&self, index: usize) -> Option<&ValueCell> {
        self.items.get(index)
    }

    /// Copies of all items in order
    pub fn values(&self) -> Vec<Value> {
        self.items.iter().map(|cell| cell.read().clone()).collect()
    }

    /// Append `value`, boxing it when the element type is an interface
    pub fn push(&mut self, value: Value) -> Result<(), SlotMismatch> {
        let value = value.assign_to(&self.elem)?;
        self.items.push(new_cell(value));
        Ok(())
    }
}

impl Clone for Sequence {
    fn clone(&self) -> Self {
        Self {
            elem: self.elem.clone(),
            items: self
                .items
                .iter()
                .map(|cell| new_cell(cell.read().clone()))
                .collect(),
        }
    }
}

impl PartialEq for Sequence {
    fn eq(&self, other: &Self) -> bool {
        self.elem == other.elem
            && self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(&other.items)
                .all(|(a, b)| Arc::ptr_eq(a, b) || *a.read() == *b.read())
    }
}

/// A mapping with fixed key and value types.
///
/// Entries keep insertion order. Keys are bucketed by [`Value::key_hash`],
/// so lookups compare only keys with an equal hash. Wrapped domain objects
/// hash by type alone and fall back to a scan of their bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct MapValue {
    key: TypeDescriptor,
    value: TypeDescriptor,
    entries: Vec<(Value, Value)>,
    index: HashMap<u64, Vec<usize>>,
}

impl MapValue {
    /// An empty map, pre-sized for `capacity` entries
    pub fn new(key: TypeDescriptor, value: TypeDescriptor, capacity: usize) -> Self {
        Self {
            key,
            value,
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    /// Key type
    pub fn key_type(&self) -> &TypeDescriptor {
        &self.key
    }

    /// Value type
    pub fn value_type(&self) -> &TypeDescriptor {
        &self.value
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order
    pub fn entries(&self) -> &[(Value, Value)] {
        &self.entries
    }

    fn position(&self, hash: u64, key: &Value) -> Option<usize> {
        self.index
            .get(&hash)?
            .iter()
            .copied()
            .find(|&i| self.entries[i].0 == *key)
    }

    /// Look up the value stored under a key equal to `key`
    pub fn get(&self, key: &Value) -> Result<Option<&Value>, SlotMismatch> {
        let key = key.clone().assign_to(&self.key)?;
        let hash = key.key_hash();
        Ok(self.position(hash, &key).map(|i| &self.entries[i].1))
    }

    /// Insert a pair, replacing and returning the previous value for an
    /// equal key
    pub fn insert(&mut self, key: Value, value: Value) -> Result<Option<Value>, SlotMismatch> {
        let key = key.assign_to(&self.key)?;
        let value = value.assign_to(&self.value)?;
        let hash = key.key_hash();
        match self.position(hash, &key) {
            Some(i) => Ok(Some(std::mem::replace(&mut self.entries[i].1, value))),
            None => {
                self.index.entry(hash).or_default().push(self.entries.len());
                self.entries.push((key, value));
                Ok(None)
            }
        }
    }
}

/// A value of a defined type
#[derive(Debug, Clone, PartialEq)]
pub struct NamedValue {
    ty: Arc<NamedType>,
    inner: Box<Value>,
}

impl NamedValue {
    /// The defined type
    pub fn named_type(&self) -> &Arc<NamedType> {
        &self.ty
    }

    /// The underlying value
    pub fn inner(&self) -> &Value {
        &self.inner
    }
}

/// A type-erased registered value
#[derive(Debug)]
pub enum Value {
    /// Boolean
    Bool(bool),
    /// Signed 8-bit integer
    Int8(i8),
    /// Signed 16-bit integer
    Int16(i16),
    /// Signed 32-bit integer
    Int32(i32),
    /// Signed 64-bit integer
    Int64(i64),
    /// Unsigned 8-bit integer
    Uint8(u8),
    /// Unsigned 16-bit integer
    Uint16(u16),
    /// Unsigned 32-bit integer
    Uint32(u32),
    /// Unsigned 64-bit integer
    Uint64(u64),
    /// 32-bit float
    Float32(f32),
    /// 64-bit float
    Float64(f64),
    /// UTF-8 text
    Text(String),
    /// Pointer
    Pointer(Pointer),
    /// Interface slot, `None` when unset
    Interface(Option<Box<Value>>),
    /// Sequence container
    Sequence(Sequence),
    /// Map container
    Map(MapValue),
    /// Value of a defined type
    Named(NamedValue),
    /// Wrapped domain object
    Host(Box<dyn HostObject>),
}

enum Num {
    Int(i128),
    Float(f64),
}

impl Value {
    /// Wrap a domain object
    pub fn host<T: HostObject>(object: T) -> Self {
        Value::Host(Box::new(object))
    }

    /// An unset interface slot
    pub fn nil_interface() -> Self {
        Value::Interface(None)
    }

    /// A value of the defined type `ty`. Fails if `inner` is not of the
    /// underlying type.
    pub fn named(ty: Arc<NamedType>, inner: Value) -> Result<Self, SlotMismatch> {
        let found = inner.type_descriptor();
        if found != *ty.underlying() {
            return Err(SlotMismatch {
                expected: ty.underlying().clone(),
                found,
            });
        }
        Ok(Value::Named(NamedValue {
            ty,
            inner: Box::new(inner),
        }))
    }

    /// Runtime type of this value
    pub fn type_descriptor(&self) -> TypeDescriptor {
        match self {
            Value::Bool(_) => ScalarKind::Bool.into(),
            Value::Int8(_) => ScalarKind::Int8.into(),
            Value::Int16(_) => ScalarKind::Int16.into(),
            Value::Int32(_) => ScalarKind::Int32.into(),
            Value::Int64(_) => ScalarKind::Int64.into(),
            Value::Uint8(_) => ScalarKind::Uint8.into(),
            Value::Uint16(_) => ScalarKind::Uint16.into(),
            Value::Uint32(_) => ScalarKind::Uint32.into(),
            Value::Uint64(_) => ScalarKind::Uint64.into(),
            Value::Float32(_) => ScalarKind::Float32.into(),
            Value::Float64(_) => ScalarKind::Float64.into(),
            Value::Text(_) => ScalarKind::Text.into(),
            Value::Pointer(p) => TypeDescriptor::pointer_to(p.elem.clone()),
            Value::Interface(_) => TypeDescriptor::Interface,
            Value::Sequence(s) => TypeDescriptor::sequence_of(s.elem.clone()),
            Value::Map(m) => TypeDescriptor::map_of(m.key.clone(), m.value.clone()),
            Value::Named(n) => TypeDescriptor::Named(Arc::clone(&n.ty)),
            Value::Host(obj) => TypeDescriptor::Host(obj.host_type()),
        }
    }

    /// Structural category of this value
    pub fn shape(&self) -> Shape {
        match self.unnamed() {
            Value::Pointer(_) => Shape::Pointer,
            Value::Interface(_) => Shape::Interface,
            _ => Shape::Direct,
        }
    }

    /// The value with any defined-type wrapper removed
    pub fn unnamed(&self) -> &Value {
        match self {
            Value::Named(n) => &n.inner,
            other => other,
        }
    }

    /// Null test for pointers and interfaces; `None` for any other shape
    pub fn is_nil(&self) -> Option<bool> {
        match self.unnamed() {
            Value::Pointer(p) => Some(p.is_null()),
            Value::Interface(inner) => Some(inner.is_none()),
            _ => None,
        }
    }

    /// Text content, if this is text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Sequence, if this is one (names are looked through)
    pub fn as_sequence(&self) -> Option<&Sequence> {
        match self.unnamed() {
            Value::Sequence(s) => Some(s),
            _ => None,
        }
    }

    /// Mutable sequence, if this is one (names are looked through)
    pub fn as_sequence_mut(&mut self) -> Option<&mut Sequence> {
        match self {
            Value::Sequence(s) => Some(s),
            Value::Named(n) => n.inner.as_sequence_mut(),
            _ => None,
        }
    }

    /// Map, if this is one (names are looked through)
    pub fn as_map(&self) -> Option<&MapValue> {
        match self.unnamed() {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Mutable map, if this is one (names are looked through)
    pub fn as_map_mut(&mut self) -> Option<&mut MapValue> {
        match self {
            Value::Map(m) => Some(m),
            Value::Named(n) => n.inner.as_map_mut(),
            _ => None,
        }
    }

    /// Pointer, if this is one (names are looked through)
    pub fn as_pointer(&self) -> Option<&Pointer> {
        match self.unnamed() {
            Value::Pointer(p) => Some(p),
            _ => None,
        }
    }

    /// Borrow a wrapped domain object of type `T`
    pub fn as_host<T: HostObject>(&self) -> Option<&T> {
        match self {
            Value::Host(obj) => obj.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Mutably borrow a wrapped domain object of type `T`
    pub fn as_host_mut<T: HostObject>(&mut self) -> Option<&mut T> {
        match self {
            Value::Host(obj) => obj.as_any_mut().downcast_mut::<T>(),
            _ => None,
        }
    }

    /// Contents this value contributes when stored into an interface slot
    fn into_dynamic(self) -> Option<Box<Value>> {
        if let Value::Interface(inner) = self.unnamed() {
            return inner.clone();
        }
        Some(Box::new(self))
    }

    /// Prepare this value for storage in a slot of type `slot`.
    ///
    /// Identical types are stored as-is; any value is boxed into an
    /// interface slot. Everything else is rejected.
    pub fn assign_to(self, slot: &TypeDescriptor) -> Result<Value, SlotMismatch> {
        let found = self.type_descriptor();
        if found == *slot {
            return Ok(self);
        }
        if !found.assignable_to(slot) {
            return Err(SlotMismatch {
                expected: slot.clone(),
                found,
            });
        }
        let boxed = Value::Interface(self.into_dynamic());
        Ok(match slot {
            TypeDescriptor::Named(ty) => Value::Named(NamedValue {
                ty: Arc::clone(ty),
                inner: Box::new(boxed),
            }),
            _ => boxed,
        })
    }

    /// Convert to `target` under the lossless convertibility relation.
    ///
    /// Returns `None` when the types are not convertible. Never truncates.
    pub fn convert(&self, target: &TypeDescriptor) -> Option<Value> {
        let source = self.type_descriptor();
        if !source.convertible_to(target) {
            return None;
        }
        if source.assignable_to(target) {
            return self.clone().assign_to(target).ok();
        }
        let converted = self.unnamed().convert_underlying(target.underlying())?;
        Some(match target {
            TypeDescriptor::Named(ty) => Value::Named(NamedValue {
                ty: Arc::clone(ty),
                inner: Box::new(converted),
            }),
            _ => converted,
        })
    }

    fn convert_underlying(&self, target: &TypeDescriptor) -> Option<Value> {
        if self.type_descriptor() == *target {
            return Some(self.clone());
        }
        match (self, target) {
            (Value::Text(text), TypeDescriptor::Sequence(_)) => {
                let mut bytes = Sequence::new(ScalarKind::Uint8.into(), text.len());
                bytes
                    .items
                    .extend(text.bytes().map(|b| new_cell(Value::Uint8(b))));
                Some(Value::Sequence(bytes))
            }
            (_, TypeDescriptor::Scalar(kind)) => self.widen(*kind),
            _ => None,
        }
    }

    /// Hash consistent with host equality, for map key lookup
    pub fn key_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash_key(&mut hasher);
        hasher.finish()
    }

    fn hash_key<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Bool(v) => v.hash(state),
            Value::Int8(v) => v.hash(state),
            Value::Int16(v) => v.hash(state),
            Value::Int32(v) => v.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::Uint8(v) => v.hash(state),
            Value::Uint16(v) => v.hash(state),
            Value::Uint32(v) => v.hash(state),
            Value::Uint64(v) => v.hash(state),
            // 0.0 == -0.0, so both hash as zero
            Value::Float32(v) => (if *v == 0.0 { 0 } else { v.to_bits() }).hash(state),
            Value::Float64(v) => (if *v == 0.0 { 0 } else { v.to_bits() }).hash(state),
            Value::Text(v) => v.hash(state),
            Value::Pointer(p) => p.target.as_ref().map(Arc::as_ptr).hash(state),
            Value::Interface(inner) => match inner {
                Some(inner) => inner.hash_key(state),
                None => 0u8.hash(state),
            },
            Value::Sequence(seq) => seq.len().hash(state),
            Value::Map(map) => map.len().hash(state),
            Value::Named(named) => named.inner.hash_key(state),
            Value::Host(obj) => obj.host_type().id().hash(state),
        }
    }

    fn as_num(&self) -> Option<Num> {
        Some(match *self {
            Value::Int8(v) => Num::Int(v.into()),
            Value::Int16(v) => Num::Int(v.into()),
            Value::Int32(v) => Num::Int(v.into()),
            Value::Int64(v) => Num::Int(v.into()),
            Value::Uint8(v) => Num::Int(v.into()),
            Value::Uint16(v) => Num::Int(v.into()),
            Value::Uint32(v) => Num::Int(v.into()),
            Value::Uint64(v) => Num::Int(v.into()),
            Value::Float32(v) => Num::Float(v.into()),
            Value::Float64(v) => Num::Float(v),
            _ => return None,
        })
    }

    // Callers have already checked `widens_to`, so the float casts are exact.
    fn widen(&self, kind: ScalarKind) -> Option<Value> {
        match (self.as_num()?, kind) {
            (Num::Int(v), ScalarKind::Int8) => i8::try_from(v).ok().map(Value::Int8),
            (Num::Int(v), ScalarKind::Int16) => i16::try_from(v).ok().map(Value::Int16),
            (Num::Int(v), ScalarKind::Int32) => i32::try_from(v).ok().map(Value::Int32),
            (Num::Int(v), ScalarKind::Int64) => i64::try_from(v).ok().map(Value::Int64),
            (Num::Int(v), ScalarKind::Uint8) => u8::try_from(v).ok().map(Value::Uint8),
            (Num::Int(v), ScalarKind::Uint16) => u16::try_from(v).ok().map(Value::Uint16),
            (Num::Int(v), ScalarKind::Uint32) => u32::try_from(v).ok().map(Value::Uint32),
            (Num::Int(v), ScalarKind::Uint64) => u64::try_from(v).ok().map(Value::Uint64),
            (Num::Int(v), ScalarKind::Float32) => Some(Value::Float32(v as f32)),
            (Num::Int(v), ScalarKind::Float64) => Some(Value::Float64(v as f64)),
            (Num::Float(v), ScalarKind::Float64) => Some(Value::Float64(v)),
            _ => None,
        }
    }
}

impl Clone for Value {
    fn clone(&self) -> Self {
        match self {
            Value::Bool(v) => Value::Bool(*v),
            Value::Int8(v) => Value::Int8(*v),
            Value::Int16(v) => Value::Int16(*v),
            Value::Int32(v) => Value::Int32(*v),
            Value::Int64(v) => Value::Int64(*v),
            Value::Uint8(v) => Value::Uint8(*v),
            Value::Uint16(v) => Value::Uint16(*v),
            Value::Uint32(v) => Value::Uint32(*v),
            Value::Uint64(v) => Value::Uint64(*v),
            Value::Float32(v) => Value::Float32(*v),
            Value::Float64(v) => Value::Float64(*v),
            Value::Text(v) => Value::Text(v.clone()),
            Value::Pointer(p) => Value::Pointer(p.clone()),
            Value::Interface(inner) => Value::Interface(inner.clone()),
            Value::Sequence(s) => Value::Sequence(s.clone()),
            Value::Map(m) => Value::Map(m.clone()),
            Value::Named(n) => Value::Named(n.clone()),
            Value::Host(obj) => Value::Host(obj.clone_object()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int8(a), Value::Int8(b)) => a == b,
            (Value::Int16(a), Value::Int16(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Uint8(a), Value::Uint8(b)) => a == b,
            (Value::Uint16(a), Value::Uint16(b)) => a == b,
            (Value::Uint32(a), Value::Uint32(b)) => a == b,
            (Value::Uint64(a), Value::Uint64(b)) => a == b,
            (Value::Float32(a), Value::Float32(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => a.same_target(b),
            (Value::Interface(a), Value::Interface(b)) => a == b,
            (Value::Sequence(a), Value::Sequence(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Named(a), Value::Named(b)) => a == b,
            (Value::Host(a), Value::Host(b)) => a.eq_object(b.as_ref()),
            _ => false,
        }
    }
}

macro_rules! impl_from_variant {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_variant! {
    bool => Bool,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => Uint8,
    u16 => Uint16,
    u32 => Uint32,
    u64 => Uint64,
    f32 => Float32,
    f64 => Float64,
    String => Text,
    Pointer => Pointer,
    Sequence => Sequence,
    MapValue => Map,
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}
