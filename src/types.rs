//! Runtime type descriptors.
//!
//! Every registered value carries a [`TypeDescriptor`]. Containers are built
//! from descriptors sampled from other entries, and casts consult the
//! convertibility relation defined here. Nothing in the bridge relies on
//! runtime reflection: the set of structural types is closed, and the open
//! set of wrapped domain types is represented by [`HostType`].

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

/// Primitive kinds that can be boxed across the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    /// Boolean
    Bool,
    /// Signed 8-bit integer
    Int8,
    /// Signed 16-bit integer
    Int16,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 8-bit integer
    Uint8,
    /// Unsigned 16-bit integer
    Uint16,
    /// Unsigned 32-bit integer
    Uint32,
    /// Unsigned 64-bit integer
    Uint64,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// UTF-8 text
    Text,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum NumClass {
    Signed,
    Unsigned,
    Float,
}

impl ScalarKind {
    /// Short type name used in messages
    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Int8 => "i8",
            ScalarKind::Int16 => "i16",
            ScalarKind::Int32 => "i32",
            ScalarKind::Int64 => "i64",
            ScalarKind::Uint8 => "u8",
            ScalarKind::Uint16 => "u16",
            ScalarKind::Uint32 => "u32",
            ScalarKind::Uint64 => "u64",
            ScalarKind::Float32 => "f32",
            ScalarKind::Float64 => "f64",
            ScalarKind::Text => "text",
        }
    }

    fn numeric(self) -> Option<(NumClass, u32)> {
        match self {
            ScalarKind::Int8 => Some((NumClass::Signed, 8)),
            ScalarKind::Int16 => Some((NumClass::Signed, 16)),
            ScalarKind::Int32 => Some((NumClass::Signed, 32)),
            ScalarKind::Int64 => Some((NumClass::Signed, 64)),
            ScalarKind::Uint8 => Some((NumClass::Unsigned, 8)),
            ScalarKind::Uint16 => Some((NumClass::Unsigned, 16)),
            ScalarKind::Uint32 => Some((NumClass::Unsigned, 32)),
            ScalarKind::Uint64 => Some((NumClass::Unsigned, 64)),
            ScalarKind::Float32 => Some((NumClass::Float, 32)),
            ScalarKind::Float64 => Some((NumClass::Float, 64)),
            ScalarKind::Bool | ScalarKind::Text => None,
        }
    }

    /// Whether every value of `self` is exactly representable in `target`.
    ///
    /// This is the lossless `From` relation of the primitive types: no
    /// narrowing, no sign changes that lose values, no float to integer.
    pub fn widens_to(self, target: ScalarKind) -> bool {
        if self == target {
            return true;
        }
        let (Some((from, from_bits)), Some((to, to_bits))) = (self.numeric(), target.numeric())
        else {
            return false;
        };
        match (from, to) {
            (NumClass::Signed, NumClass::Signed)
            | (NumClass::Unsigned, NumClass::Unsigned)
            | (NumClass::Float, NumClass::Float) => to_bits >= from_bits,
            (NumClass::Unsigned, NumClass::Signed) => to_bits > from_bits,
            // f32 holds 24 mantissa bits, f64 holds 53
            (NumClass::Signed | NumClass::Unsigned, NumClass::Float) => {
                from_bits <= if to_bits == 32 { 16 } else { 32 }
            }
            _ => false,
        }
    }
}

/// Structural category of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// A plain value
    Direct,
    /// A pointer that may be null
    Pointer,
    /// A dynamically-typed slot that may be unset
    Interface,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Direct => write!(f, "direct value"),
            Shape::Pointer => write!(f, "pointer"),
            Shape::Interface => write!(f, "interface"),
        }
    }
}

/// A defined type: a name bound to an underlying structural type
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct NamedType {
    name: String,
    underlying: TypeDescriptor,
}

impl NamedType {
    /// Define a new named type. Naming a named type reuses its underlying type.
    pub fn new(name: impl Into<String>, underlying: TypeDescriptor) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            underlying: underlying.underlying().clone(),
        })
    }

    /// The type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying structural type (never itself named)
    pub fn underlying(&self) -> &TypeDescriptor {
        &self.underlying
    }
}

/// Identity of a wrapped domain type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostType {
    name: &'static str,
    id: TypeId,
}

impl HostType {
    /// Descriptor for the Rust type `T`
    pub fn of<T: 'static>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            id: TypeId::of::<T>(),
        }
    }

    /// Rust type name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Rust type id
    pub fn id(&self) -> TypeId {
        self.id
    }
}

/// Runtime type of a registered value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// A primitive
    Scalar(ScalarKind),
    /// Pointer to the element type
    Pointer(Box<TypeDescriptor>),
    /// Dynamically-typed slot (accepts any value)
    Interface,
    /// Ordered growable sequence of the element type
    Sequence(Box<TypeDescriptor>),
    /// Mapping from key type to value type
    Map(Box<TypeDescriptor>, Box<TypeDescriptor>),
    /// Defined type over an underlying type
    Named(Arc<NamedType>),
    /// Opaque wrapped domain type
    Host(HostType),
}

impl TypeDescriptor {
    /// Pointer to `elem`
    pub fn pointer_to(elem: TypeDescriptor) -> Self {
        TypeDescriptor::Pointer(Box::new(elem))
    }

    /// Sequence of `elem`
    pub fn sequence_of(elem: TypeDescriptor) -> Self {
        TypeDescriptor::Sequence(Box::new(elem))
    }

    /// Map from `key` to `value`
    pub fn map_of(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        TypeDescriptor::Map(Box::new(key), Box::new(value))
    }

    /// The structural type with any name stripped
    pub fn underlying(&self) -> &TypeDescriptor {
        match self {
            TypeDescriptor::Named(named) => named.underlying(),
            other => other,
        }
    }

    /// Structural category of values of this type
    pub fn shape(&self) -> Shape {
        match self.underlying() {
            TypeDescriptor::Pointer(_) => Shape::Pointer,
            TypeDescriptor::Interface => Shape::Interface,
            _ => Shape::Direct,
        }
    }

    /// Whether values of this type support equality, and so can be map keys
    pub fn is_comparable(&self) -> bool {
        !matches!(
            self.underlying(),
            TypeDescriptor::Sequence(_) | TypeDescriptor::Map(..)
        )
    }

    /// Whether a value of this type can be stored as-is in a slot of `target`
    pub fn assignable_to(&self, target: &TypeDescriptor) -> bool {
        self == target || matches!(target.underlying(), TypeDescriptor::Interface)
    }

    /// Whether a value of this type can be converted to `target` without loss
    pub fn convertible_to(&self, target: &TypeDescriptor) -> bool {
        if self.assignable_to(target) {
            return true;
        }
        match (self.underlying(), target.underlying()) {
            (from, to) if from == to => true,
            (TypeDescriptor::Scalar(from), TypeDescriptor::Scalar(to)) => from.widens_to(*to),
            (TypeDescriptor::Scalar(ScalarKind::Text), TypeDescriptor::Sequence(elem)) => {
                **elem == TypeDescriptor::Scalar(ScalarKind::Uint8)
            }
            _ => false,
        }
    }
}

impl From<ScalarKind> for TypeDescriptor {
    fn from(kind: ScalarKind) -> Self {
        TypeDescriptor::Scalar(kind)
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Scalar(kind) => write!(f, "{}", kind.name()),
            TypeDescriptor::Pointer(elem) => write!(f, "*{}", elem),
            TypeDescriptor::Interface => write!(f, "dyn"),
            TypeDescriptor::Sequence(elem) => write!(f, "[{}]", elem),
            TypeDescriptor::Map(key, value) => write!(f, "{{{}: {}}}", key, value),
            TypeDescriptor::Named(named) => write!(f, "{}", named.name()),
            TypeDescriptor::Host(host) => write!(f, "{}", host.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ScalarKind::*;

    fn scalar(kind: ScalarKind) -> TypeDescriptor {
        TypeDescriptor::Scalar(kind)
    }

    #[test]
    fn test_widening() {
        assert!(Int8.widens_to(Int64));
        assert!(Int32.widens_to(Int64));
        assert!(Uint8.widens_to(Int16));
        assert!(Uint32.widens_to(Uint64));
        assert!(Int16.widens_to(Float32));
        assert!(Uint32.widens_to(Float64));
        assert!(Float32.widens_to(Float64));
    }

    #[test]
    fn test_no_narrowing() {
        assert!(!Int64.widens_to(Int32));
        assert!(!Uint16.widens_to(Int16));
        assert!(!Int8.widens_to(Uint64));
        assert!(!Int32.widens_to(Float32));
        assert!(!Int64.widens_to(Float64));
        assert!(!Float64.widens_to(Float32));
        assert!(!Float32.widens_to(Int64));
        assert!(!Bool.widens_to(Int8));
        assert!(!Text.widens_to(Bool));
    }

    #[test]
    fn test_convertible_named() {
        let kind = TypeDescriptor::Named(NamedType::new("Kind", scalar(Int64)));
        let other = TypeDescriptor::Named(NamedType::new("Other", scalar(Int64)));

        assert!(kind.convertible_to(&scalar(Int64)));
        assert!(scalar(Int64).convertible_to(&kind));
        assert!(kind.convertible_to(&other));
        assert!(scalar(Int32).convertible_to(&kind));
        assert!(!kind.convertible_to(&scalar(Int32)));
    }

    #[test]
    fn test_convertible_to_interface() {
        assert!(scalar(Text).convertible_to(&TypeDescriptor::Interface));
        let expr = TypeDescriptor::Named(NamedType::new("Expr", TypeDescriptor::Interface));
        assert!(TypeDescriptor::sequence_of(scalar(Bool)).convertible_to(&expr));
        assert_eq!(expr.shape(), Shape::Interface);
    }

    #[test]
    fn test_text_to_bytes() {
        let bytes = TypeDescriptor::sequence_of(scalar(Uint8));
        assert!(scalar(Text).convertible_to(&bytes));
        assert!(!bytes.convertible_to(&scalar(Text)));
        assert!(!scalar(Text).convertible_to(&TypeDescriptor::sequence_of(scalar(Int8))));
    }

    #[test]
    fn test_pointer_identity_only() {
        let p = TypeDescriptor::pointer_to(scalar(Int32));
        assert!(p.convertible_to(&p.clone()));
        assert!(!p.convertible_to(&TypeDescriptor::pointer_to(scalar(Int64))));
        assert_eq!(p.shape(), Shape::Pointer);
    }

    #[test]
    fn test_comparable() {
        assert!(scalar(Text).is_comparable());
        assert!(TypeDescriptor::Interface.is_comparable());
        assert!(!TypeDescriptor::sequence_of(scalar(Int8)).is_comparable());
        let list = TypeDescriptor::Named(NamedType::new(
            "List",
            TypeDescriptor::map_of(scalar(Text), scalar(Int8)),
        ));
        assert!(!list.is_comparable());
    }

    #[test]
    fn test_named_of_named_flattens() {
        let inner = NamedType::new("Inner", scalar(Bool));
        let outer = NamedType::new("Outer", TypeDescriptor::Named(inner));
        assert_eq!(outer.underlying(), &scalar(Bool));
    }

    #[test]
    fn test_display() {
        let ty = TypeDescriptor::map_of(
            scalar(Text),
            TypeDescriptor::sequence_of(TypeDescriptor::pointer_to(scalar(Float64))),
        );
        assert_eq!(ty.to_string(), "{text: [*f64]}");
        assert_eq!(TypeDescriptor::Interface.to_string(), "dyn");
    }
}
