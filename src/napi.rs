//! N-API bindings for Node.js integration.
//!
//! Exposes a [`Registry`] to JavaScript as the `ProxyBridge` class. Handles
//! cross as plain numbers. Lookups that can fail softly resolve to
//! `{ handle, ok }` objects; breaking the handle contract throws an error
//! whose message starts with `[PROTOCOL_VIOLATION]`.

use crate::config::{BridgeConfig, ForgetPolicy};
use crate::error::{catch_violation, BridgeError};
use crate::metrics::RegistryStats;
use crate::operations::{self, Lookup};
use crate::registry::Registry;
use napi::bindgen_prelude::*;
use napi_derive::napi;
use std::sync::Arc;

/// JavaScript-friendly configuration
#[napi(object)]
pub struct JsBridgeConfig {
    /// Entries pre-allocated in the handle table
    pub initial_capacity: Option<u32>,
    /// First handle issued (must not be 0)
    pub first_handle: Option<u32>,
    /// `"lenient"` or `"strict"`
    pub forget_policy: Option<String>,
}

impl TryFrom<JsBridgeConfig> for BridgeConfig {
    type Error = BridgeError;

    fn try_from(js: JsBridgeConfig) -> std::result::Result<Self, Self::Error> {
        let mut config = BridgeConfig::default();
        if let Some(capacity) = js.initial_capacity {
            config = config.with_initial_capacity(capacity as usize);
        }
        if let Some(first) = js.first_handle {
            config = config.with_first_handle(first);
        }
        if let Some(policy) = js.forget_policy {
            let policy = match policy.as_str() {
                "lenient" => ForgetPolicy::Lenient,
                "strict" => ForgetPolicy::Strict,
                other => {
                    return Err(BridgeError::invalid_argument(format!(
                        "unknown forget policy: {}",
                        other
                    )))
                }
            };
            config = config.with_forget_policy(policy);
        }
        Ok(config)
    }
}

/// Result of a lookup that may fail without error
#[napi(object)]
pub struct JsLookup {
    /// The new handle, 0 when `ok` is false
    pub handle: u32,
    /// Whether the lookup produced a handle
    pub ok: bool,
}

impl From<Lookup> for JsLookup {
    fn from(lookup: Lookup) -> Self {
        Self {
            handle: lookup.unwrap_or(0),
            ok: lookup.is_some(),
        }
    }
}

/// Registry statistics for JavaScript
#[napi(object)]
pub struct JsRegistryStats {
    /// Handles currently registered
    pub live_handles: i64,
    /// Handles issued since creation
    pub total_registered: i64,
    /// Handles released since creation
    pub total_forgotten: i64,
    /// Ignored releases of unknown handles
    pub ignored_forgets: i64,
    /// Highest number of simultaneously live handles
    pub peak_live_handles: i64,
    /// Successful casts
    pub casts_succeeded: i64,
    /// Rejected casts
    pub casts_failed: i64,
}

impl From<RegistryStats> for JsRegistryStats {
    fn from(stats: RegistryStats) -> Self {
        Self {
            live_handles: stats.live_handles as i64,
            total_registered: stats.total_registered as i64,
            total_forgotten: stats.total_forgotten as i64,
            ignored_forgets: stats.ignored_forgets as i64,
            peak_live_handles: stats.peak_live_handles as i64,
            casts_succeeded: stats.casts_succeeded as i64,
            casts_failed: stats.casts_failed as i64,
        }
    }
}

fn to_napi_error(e: BridgeError) -> napi::Error {
    napi::Error::new(Status::GenericFailure, e.to_string())
}

/// Run a bridge operation, turning a protocol violation into a JS error
fn guarded<T>(f: impl FnOnce() -> T) -> Result<T> {
    catch_violation(f).map_err(to_napi_error)
}

/// The handle registry exposed to Node.js
#[napi]
pub struct ProxyBridge {
    registry: Arc<Registry>,
}

#[napi]
impl ProxyBridge {
    /// Create a new bridge with the given configuration
    #[napi(constructor)]
    pub fn new(config: Option<JsBridgeConfig>) -> Result<Self> {
        let config = match config {
            Some(js) => BridgeConfig::try_from(js).map_err(to_napi_error)?,
            None => BridgeConfig::default(),
        };
        let registry = Registry::new(config)
            .map_err(|e| to_napi_error(e.to_bridge_error()))?;

        Ok(Self {
            registry: Arc::new(registry),
        })
    }

    /// Release a handle
    #[napi]
    pub fn forget(&self, handle: u32) -> Result<()> {
        guarded(|| self.registry.forget(handle))
    }

    /// Whether a handle is currently registered
    #[napi]
    pub fn contains(&self, handle: u32) -> bool {
        self.registry.contains(handle)
    }

    /// Register a pointer to a copy of the value at `handle`
    #[napi]
    pub fn new_pointer(&self, handle: u32) -> Result<u32> {
        guarded(|| self.registry.new_pointer(handle))
    }

    /// Whether the value is a null pointer or an unset interface
    #[napi]
    pub fn is_nil(&self, handle: u32) -> Result<bool> {
        guarded(|| operations::is_nil(&self.registry, handle))
    }

    /// Register a copy of what a pointer or interface refers to
    #[napi]
    pub fn dereference(&self, handle: u32) -> Result<JsLookup> {
        guarded(|| operations::dereference(&self.registry, handle).into())
    }

    /// Convert the value at `source` to the type of the value at `target`
    #[napi]
    pub fn cast(&self, target: u32, source: u32) -> Result<JsLookup> {
        guarded(|| operations::cast(&self.registry, target, source).into())
    }

    /// Register an unset interface value
    #[napi]
    pub fn nil_interface(&self) -> u32 {
        operations::nil_interface(&self.registry)
    }

    /// Register an empty sequence of the type of the value at `shape`
    #[napi]
    pub fn make_sequence(&self, shape: u32, capacity: Option<u32>) -> Result<u32> {
        let capacity = capacity.unwrap_or(0) as usize;
        guarded(|| operations::make_sequence(&self.registry, shape, capacity))
    }

    /// Number of items in a sequence
    #[napi]
    pub fn sequence_len(&self, handle: u32) -> Result<u32> {
        let len = guarded(|| operations::sequence_len(&self.registry, handle))?;
        narrow::<u32, _>(len, "uint32")
    }

    /// Register the sequence item at `index`, sharing its storage
    #[napi]
    pub fn sequence_get(&self, handle: u32, index: u32) -> Result<JsLookup> {
        guarded(|| operations::sequence_get(&self.registry, handle, index as usize).into())
    }

    /// Append a copy of the value at `value` to the sequence at `target`
    #[napi]
    pub fn append(&self, target: u32, value: u32) -> Result<()> {
        guarded(|| operations::append(&self.registry, target, value))
    }

    /// Register an empty map from the type at `key` to the type at `value`
    #[napi]
    pub fn make_map(&self, key: u32, value: u32, capacity: Option<u32>) -> Result<u32> {
        let capacity = capacity.unwrap_or(0) as usize;
        guarded(|| operations::make_map(&self.registry, key, value, capacity))
    }

    /// Insert copies of `key` and `value` into the map at `target`
    #[napi]
    pub fn insert(&self, target: u32, key: u32, value: u32) -> Result<()> {
        guarded(|| operations::insert(&self.registry, target, key, value))
    }

    /// Number of entries in a map
    #[napi]
    pub fn map_len(&self, handle: u32) -> Result<u32> {
        let len = guarded(|| operations::map_len(&self.registry, handle))?;
        narrow::<u32, _>(len, "uint32")
    }

    /// Register a copy of the map value stored under `key`
    #[napi]
    pub fn map_get(&self, handle: u32, key: u32) -> Result<JsLookup> {
        guarded(|| operations::map_get(&self.registry, handle, key).into())
    }

    /// Register a boolean
    #[napi]
    pub fn box_bool(&self, value: bool) -> u32 {
        operations::box_bool(&self.registry, value)
    }

    /// Register an `i8`
    #[napi]
    pub fn box_int8(&self, value: i32) -> Result<u32> {
        let value = narrow::<i8, _>(value, "int8")?;
        Ok(operations::box_int8(&self.registry, value))
    }

    /// Register an `i16`
    #[napi]
    pub fn box_int16(&self, value: i32) -> Result<u32> {
        let value = narrow::<i16, _>(value, "int16")?;
        Ok(operations::box_int16(&self.registry, value))
    }

    /// Register an `i32`
    #[napi]
    pub fn box_int32(&self, value: i32) -> u32 {
        operations::box_int32(&self.registry, value)
    }

    /// Register an `i64` passed as a BigInt
    #[napi]
    pub fn box_int64(&self, value: BigInt) -> Result<u32> {
        let (value, lossless) = value.get_i64();
        if !lossless {
            return Err(to_napi_error(BridgeError::invalid_argument(
                "value out of range for int64",
            )));
        }
        Ok(operations::box_int64(&self.registry, value))
    }

    /// Register a `u8`
    #[napi]
    pub fn box_uint8(&self, value: u32) -> Result<u32> {
        let value = narrow::<u8, _>(value, "uint8")?;
        Ok(operations::box_uint8(&self.registry, value))
    }

    /// Register a `u16`
    #[napi]
    pub fn box_uint16(&self, value: u32) -> Result<u32> {
        let value = narrow::<u16, _>(value, "uint16")?;
        Ok(operations::box_uint16(&self.registry, value))
    }

    /// Register a `u32`
    #[napi]
    pub fn box_uint32(&self, value: u32) -> u32 {
        operations::box_uint32(&self.registry, value)
    }

    /// Register a `u64` passed as a BigInt
    #[napi]
    pub fn box_uint64(&self, value: BigInt) -> Result<u32> {
        let (signed, value, lossless) = value.get_u64();
        if signed || !lossless {
            return Err(to_napi_error(BridgeError::invalid_argument(
                "value out of range for uint64",
            )));
        }
        Ok(operations::box_uint64(&self.registry, value))
    }

    /// Register an `f32`; the number is rounded to single precision
    #[napi]
    pub fn box_float32(&self, value: f64) -> u32 {
        operations::box_float32(&self.registry, value as f32)
    }

    /// Register an `f64`
    #[napi]
    pub fn box_float64(&self, value: f64) -> u32 {
        operations::box_float64(&self.registry, value)
    }

    /// Register a copy of a string
    #[napi]
    pub fn box_text(&self, value: String) -> u32 {
        operations::box_text(&self.registry, &value)
    }

    /// Read back a boxed boolean
    #[napi]
    pub fn unbox_bool(&self, handle: u32) -> Result<bool> {
        guarded(|| operations::unbox_bool(&self.registry, handle))
    }

    /// Read back a boxed `i8`
    #[napi]
    pub fn unbox_int8(&self, handle: u32) -> Result<i32> {
        guarded(|| operations::unbox_int8(&self.registry, handle).into())
    }

    /// Read back a boxed `i16`
    #[napi]
    pub fn unbox_int16(&self, handle: u32) -> Result<i32> {
        guarded(|| operations::unbox_int16(&self.registry, handle).into())
    }

    /// Read back a boxed `i32`
    #[napi]
    pub fn unbox_int32(&self, handle: u32) -> Result<i32> {
        guarded(|| operations::unbox_int32(&self.registry, handle))
    }

    /// Read back a boxed `i64` as a BigInt
    #[napi]
    pub fn unbox_int64(&self, handle: u32) -> Result<BigInt> {
        guarded(|| BigInt::from(operations::unbox_int64(&self.registry, handle)))
    }

    /// Read back a boxed `u8`
    #[napi]
    pub fn unbox_uint8(&self, handle: u32) -> Result<u32> {
        guarded(|| operations::unbox_uint8(&self.registry, handle).into())
    }

    /// Read back a boxed `u16`
    #[napi]
    pub fn unbox_uint16(&self, handle: u32) -> Result<u32> {
        guarded(|| operations::unbox_uint16(&self.registry, handle).into())
    }

    /// Read back a boxed `u32`
    #[napi]
    pub fn unbox_uint32(&self, handle: u32) -> Result<u32> {
        guarded(|| operations::unbox_uint32(&self.registry, handle))
    }

    /// Read back a boxed `u64` as a BigInt
    #[napi]
    pub fn unbox_uint64(&self, handle: u32) -> Result<BigInt> {
        guarded(|| BigInt::from(operations::unbox_uint64(&self.registry, handle)))
    }

    /// Read back a boxed `f32`
    #[napi]
    pub fn unbox_float32(&self, handle: u32) -> Result<f64> {
        guarded(|| operations::unbox_float32(&self.registry, handle).into())
    }

    /// Read back a boxed `f64`
    #[napi]
    pub fn unbox_float64(&self, handle: u32) -> Result<f64> {
        guarded(|| operations::unbox_float64(&self.registry, handle))
    }

    /// Read back a copy of a boxed string
    #[napi]
    pub fn unbox_text(&self, handle: u32) -> Result<String> {
        guarded(|| operations::unbox_text(&self.registry, handle))
    }

    /// Get registry statistics
    #[napi]
    pub fn get_stats(&self) -> JsRegistryStats {
        self.registry.stats().into()
    }

    /// Get Prometheus metrics
    #[napi]
    pub fn get_prometheus_metrics(&self) -> String {
        self.registry.stats().to_prometheus()
    }
}

fn narrow<T: TryFrom<V>, V: std::fmt::Display + Copy>(value: V, ty: &str) -> Result<T> {
    T::try_from(value).map_err(|_| {
        to_napi_error(BridgeError::invalid_argument(format!(
            "{} out of range for {}",
            value, ty
        )))
    })
}

/// Initialize the module
#[napi]
pub fn init() {
    crate::init_logging();
}
