//! The handle table.
//!
//! A [`Registry`] owns every value a foreign caller can refer to. Callers
//! only ever see the 32-bit [`Handle`] issued by [`Registry::register`];
//! handles are issued in strictly increasing order and are never reused,
//! even after [`Registry::forget`].
//!
//! The table sits behind one reader/writer lock. Registration and release
//! take it exclusively, lookups share it, and it is held for a single table
//! access only. Each entry's value lives in its own [`ValueCell`], so two
//! handles can name the same storage: the pointee behind a pointer, or an
//! item inside a sequence. Closures passed to [`Registry::with`] and
//! [`Registry::with_mut`] run under the cell's lock and must not call back
//! into the registry.
//!
//! The lock keeps the table consistent; it does not order a lookup of a
//! handle against a concurrent `forget` of the same handle from another
//! foreign caller. Callers that share a handle across threads must
//! serialize their use of it.

use crate::config::{BridgeConfig, ForgetPolicy};
use crate::error::{violation, ProtocolViolation, Result};
use crate::metrics::{RegistryMetrics, RegistryStats};
use crate::types::{HostType, TypeDescriptor};
use crate::value::{new_cell, HostObject, Pointer, Value, ValueCell};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, trace, warn};

/// Opaque identifier of a registered value
pub type Handle = u32;

/// A registered value's storage and its runtime type
#[derive(Debug)]
struct Entry {
    cell: ValueCell,
    ty: TypeDescriptor,
}

/// Lock-protected table state
struct HandleTable {
    entries: HashMap<Handle, Entry>,
    next: u64,
}

impl HandleTable {
    fn issue(&mut self) -> Handle {
        let handle = Handle::try_from(self.next)
            .unwrap_or_else(|_| violation(ProtocolViolation::HandleSpaceExhausted));
        self.next += 1;
        handle
    }

    /// Look up an entry, treating an unknown handle as fatal
    fn entry(&self, op: &'static str, handle: Handle) -> &Entry {
        self.entries
            .get(&handle)
            .unwrap_or_else(|| violation(ProtocolViolation::InvalidHandle { op, handle }))
    }
}

/// Concurrency-safe registry of live values
pub struct Registry {
    config: BridgeConfig,
    table: RwLock<HandleTable>,
    metrics: RegistryMetrics,
}

impl Registry {
    /// Create a registry with the given configuration
    pub fn new(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: BridgeConfig) -> Self {
        info!(
            initial_capacity = config.initial_capacity,
            first_handle = config.first_handle,
            forget_policy = ?config.forget_policy,
            "Creating handle registry"
        );

        let table = HandleTable {
            entries: HashMap::with_capacity(config.initial_capacity),
            next: u64::from(config.first_handle),
        };

        Self {
            config,
            table: RwLock::new(table),
            metrics: RegistryMetrics::new(),
        }
    }

    /// The configuration this registry was created with
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Metrics collector
    pub fn metrics(&self) -> &RegistryMetrics {
        &self.metrics
    }

    /// Snapshot of the registry's counters
    pub fn stats(&self) -> RegistryStats {
        self.metrics.snapshot(self.len())
    }

    /// Store `value` under a freshly issued handle
    pub fn register(&self, value: impl Into<Value>) -> Handle {
        self.register_cell(new_cell(value.into()))
    }

    /// Register existing storage under a fresh handle. The new handle
    /// aliases every other holder of `cell`.
    pub(crate) fn register_cell(&self, cell: ValueCell) -> Handle {
        let ty = cell.read().type_descriptor();
        let (handle, live) = {
            let mut table = self.table.write();
            let handle = table.issue();
            trace!(handle, ty = %ty, "Registered value");
            table.entries.insert(handle, Entry { cell, ty });
            (handle, table.entries.len())
        };
        self.metrics.record_register(live);
        handle
    }

    /// Register a wrapped domain object
    pub fn register_object<T: HostObject>(&self, object: T) -> Handle {
        self.register(Value::host(object))
    }

    /// Remove the entry for `handle`.
    ///
    /// An unknown handle is ignored under [`ForgetPolicy::Lenient`] and is a
    /// protocol violation under [`ForgetPolicy::Strict`].
    pub fn forget(&self, handle: Handle) {
        let removed = self.table.write().entries.remove(&handle);
        match removed {
            Some(entry) => {
                self.metrics.record_forget();
                trace!(handle, ty = %entry.ty, "Forgot value");
            }
            None => match self.config.forget_policy {
                ForgetPolicy::Lenient => {
                    self.metrics.record_ignored_forget();
                    warn!(handle, "forget() called with an unknown handle, ignoring");
                }
                ForgetPolicy::Strict => {
                    violation(ProtocolViolation::InvalidHandle { op: "forget", handle })
                }
            },
        }
    }

    /// Register a pointer to a copy of the value at `handle`
    pub fn new_pointer(&self, handle: Handle) -> Handle {
        let value = self.cell("new_pointer", handle).read().clone();
        self.register(Pointer::to(value))
    }

    /// Whether `handle` is currently registered
    pub fn contains(&self, handle: Handle) -> bool {
        self.table.read().entries.contains_key(&handle)
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.table.read().entries.len()
    }

    /// Whether no handles are live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the value at `handle` for the duration of `f`
    pub fn with<R>(&self, handle: Handle, f: impl FnOnce(&Value) -> R) -> R {
        let cell = self.cell("get", handle);
        let value = cell.read();
        f(&value)
    }

    /// Mutably borrow the value at `handle` for the duration of `f`.
    ///
    /// `f` works on a copy that replaces the stored value only once `f`
    /// returns with the type unchanged. A type change is a protocol
    /// violation and leaves the stored value as it was.
    pub fn with_mut<R>(&self, handle: Handle, f: impl FnOnce(&mut Value) -> R) -> R {
        let (cell, ty) = self.read(|table| {
            let entry = table.entry("with_mut", handle);
            (Arc::clone(&entry.cell), entry.ty.clone())
        });
        let mut slot = cell.write();
        let mut scratch = slot.clone();
        let result = f(&mut scratch);
        let found = scratch.type_descriptor();
        if found != ty {
            drop(slot);
            violation(ProtocolViolation::TypeMismatch {
                op: "with_mut",
                expected: ty.to_string(),
                found: found.to_string(),
            });
        }
        *slot = scratch;
        result
    }

    /// Copy of the value at `handle`
    pub fn get(&self, handle: Handle) -> Value {
        self.with(handle, Value::clone)
    }

    /// Runtime type of the value at `handle`
    pub fn type_of(&self, handle: Handle) -> TypeDescriptor {
        self.read(|table| table.entry("type_of", handle).ty.clone())
    }

    /// Borrow the domain object of type `T` at `handle`
    pub fn with_object<T: HostObject, R>(&self, handle: Handle, f: impl FnOnce(&T) -> R) -> R {
        let cell = self.cell("with_object", handle);
        let value = cell.read();
        match value.as_host::<T>() {
            Some(object) => f(object),
            None => object_mismatch::<T>("with_object", &value.type_descriptor()),
        }
    }

    /// Mutably borrow the domain object of type `T` at `handle`
    pub fn with_object_mut<T: HostObject, R>(
        &self,
        handle: Handle,
        f: impl FnOnce(&mut T) -> R,
    ) -> R {
        self.modify("with_object_mut", handle, |value| {
            let found = value.type_descriptor();
            match value.as_host_mut::<T>() {
                Some(object) => f(object),
                None => object_mismatch::<T>("with_object_mut", &found),
            }
        })
    }

    /// Copy of the domain object of type `T` at `handle`
    pub fn get_object<T: HostObject + Clone>(&self, handle: Handle) -> T {
        self.with_object(handle, T::clone)
    }

    /// Storage of the value at `handle`
    pub(crate) fn cell(&self, op: &'static str, handle: Handle) -> ValueCell {
        self.read(|table| Arc::clone(&table.entry(op, handle).cell))
    }

    /// Change the value at `handle` in place.
    ///
    /// `f` must keep the value's type; container mutators go through here
    /// since their own checks already guarantee it.
    pub(crate) fn modify<R>(
        &self,
        op: &'static str,
        handle: Handle,
        f: impl FnOnce(&mut Value) -> R,
    ) -> R {
        let cell = self.cell(op, handle);
        let mut value = cell.write();
        f(&mut value)
    }

    fn read<R>(&self, f: impl FnOnce(&HandleTable) -> R) -> R {
        f(&self.table.read())
    }
}

fn object_mismatch<T: HostObject>(op: &'static str, found: &TypeDescriptor) -> ! {
    violation(ProtocolViolation::TypeMismatch {
        op,
        expected: HostType::of::<T>().name().to_string(),
        found: found.to_string(),
    })
}

impl Default for Registry {
    fn default() -> Self {
        Self::build(BridgeConfig::default())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("live_handles", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{catch_violation, ErrorCode};
    use crate::types::ScalarKind;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    struct Attribute {
        name: String,
        contents: String,
    }

    fn attribute() -> Attribute {
        Attribute {
            name: "json".into(),
            contents: "omitempty".into(),
        }
    }

    #[test]
    fn test_round_trip() {
        let registry = Registry::default();
        let handle = registry.register("hello");
        assert_eq!(registry.get(handle), Value::from("hello"));
        assert_eq!(registry.type_of(handle), ScalarKind::Text.into());
    }

    #[test]
    fn test_handles_are_unique_for_equal_values() {
        let registry = Registry::default();
        let a = registry.register(1i32);
        let b = registry.register(1i32);
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn test_handles_are_never_reused() {
        let registry = Registry::default();
        let a = registry.register(true);
        registry.forget(a);
        let b = registry.register(true);
        assert!(b > a);
    }

    #[test]
    fn test_zero_is_never_issued() {
        let registry = Registry::default();
        assert_eq!(registry.register(0u8), 1);
    }

    #[test]
    fn test_first_handle_from_config() {
        let registry = Registry::new(BridgeConfig::new().with_first_handle(500)).unwrap();
        assert_eq!(registry.register(0u8), 500);
        assert!(Registry::new(BridgeConfig::new().with_first_handle(0)).is_err());
    }

    #[test]
    #[should_panic(expected = "get() called with an invalid handle")]
    fn test_get_after_forget_is_fatal() {
        let registry = Registry::default();
        let handle = registry.register(1.5f64);
        registry.forget(handle);
        registry.get(handle);
    }

    #[test]
    fn test_lenient_double_forget() {
        let registry = Registry::default();
        let handle = registry.register(1u64);
        registry.forget(handle);
        registry.forget(handle);
        assert_eq!(registry.stats().ignored_forgets, 1);
        assert!(registry.is_empty());
    }

    #[test]
    #[should_panic(expected = "forget() called with an invalid handle")]
    fn test_strict_double_forget() {
        let config = BridgeConfig::new().with_forget_policy(ForgetPolicy::Strict);
        let registry = Registry::new(config).unwrap();
        let handle = registry.register(1u64);
        registry.forget(handle);
        registry.forget(handle);
    }

    #[test]
    fn test_new_pointer_copies() {
        let registry = Registry::default();
        let original = registry.register(10i16);
        let pointer = registry.new_pointer(original);

        assert_eq!(
            registry.type_of(pointer),
            TypeDescriptor::pointer_to(ScalarKind::Int16.into())
        );

        registry.with(pointer, |value| {
            let p = value.as_pointer().unwrap();
            p.store(Value::from(11i16)).unwrap();
        });
        assert_eq!(registry.get(original), Value::Int16(10));

        registry.forget(original);
        registry.with(pointer, |value| {
            assert_eq!(value.as_pointer().unwrap().load(), Some(Value::Int16(11)));
        });
    }

    #[test]
    #[should_panic(expected = "new_pointer() called with an invalid handle")]
    fn test_new_pointer_invalid_handle() {
        Registry::default().new_pointer(99);
    }

    #[test]
    fn test_with_mut() {
        let registry = Registry::default();
        let handle = registry.register("a");
        registry.with_mut(handle, |value| *value = Value::from("b"));
        assert_eq!(registry.get(handle), Value::from("b"));
    }

    #[test]
    #[should_panic(expected = "with_mut() expects a value of type text, found bool")]
    fn test_with_mut_cannot_change_type() {
        let registry = Registry::default();
        let handle = registry.register("a");
        registry.with_mut(handle, |value| *value = Value::from(true));
    }

    #[test]
    fn test_with_mut_type_change_leaves_value_untouched() {
        let registry = Registry::default();
        let handle = registry.register("a");

        let err = catch_violation(|| {
            registry.with_mut(handle, |value| *value = Value::from(true))
        })
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::ProtocolViolation);

        assert_eq!(registry.get(handle), Value::from("a"));
        assert_eq!(registry.type_of(handle), registry.get(handle).type_descriptor());
    }

    #[test]
    fn test_handles_can_share_storage() {
        let registry = Registry::default();
        let first = registry.register(1u16);
        let second = registry.register_cell(registry.cell("get", first));
        assert_ne!(first, second);

        registry.with_mut(second, |value| *value = Value::from(2u16));
        assert_eq!(registry.get(first), Value::Uint16(2));

        registry.forget(first);
        assert_eq!(registry.get(second), Value::Uint16(2));
    }

    #[test]
    fn test_objects() {
        let registry = Registry::default();
        let handle = registry.register_object(attribute());

        let name = registry.with_object(handle, |attr: &Attribute| attr.name.clone());
        assert_eq!(name, "json");

        registry.with_object_mut(handle, |attr: &mut Attribute| attr.contents.clear());
        assert_eq!(registry.get_object::<Attribute>(handle).contents, "");
    }

    #[test]
    #[should_panic(expected = "with_object() expects a value of type")]
    fn test_object_type_mismatch() {
        let registry = Registry::default();
        let handle = registry.register(5u8);
        registry.with_object(handle, |_: &Attribute| ());
    }

    #[test]
    fn test_stats() {
        let registry = Registry::default();
        let a = registry.register(1u8);
        let _b = registry.register(2u8);
        registry.forget(a);

        let stats = registry.stats();
        assert_eq!(stats.live_handles, 1);
        assert_eq!(stats.total_registered, 2);
        assert_eq!(stats.total_forgotten, 1);
        assert_eq!(stats.peak_live_handles, 2);
    }

    #[test]
    fn test_concurrent_register_threads() {
        let registry = Arc::new(Registry::default());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    (0..250)
                        .map(|i| registry.register(format!("{}-{}", t, i)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let handles: Vec<Handle> = threads
            .into_iter()
            .flat_map(|t| t.join().unwrap())
            .collect();

        let unique: HashSet<_> = handles.iter().copied().collect();
        assert_eq!(unique.len(), 2000);
        for handle in handles {
            assert!(registry.get(handle).as_text().is_some());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_tasks() {
        let registry = Arc::new(Registry::default());
        let tasks: Vec<_> = (0..64u32)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { (i, registry.register(i)) })
            })
            .collect();

        let mut seen = HashSet::new();
        for task in tasks {
            let (value, handle) = task.await.unwrap();
            assert!(seen.insert(handle));
            assert_eq!(registry.get(handle), Value::Uint32(value));
        }
        assert_eq!(registry.len(), 64);
    }
}
