//! C ABI bindings.
//!
//! Every function operates on one process-wide [`Registry`], created on
//! first use with the default configuration (or the one passed to
//! [`bridge_configure`] beforehand) and never torn down.
//!
//! The API follows these principles:
//! - Only handles and primitives cross the boundary
//! - Recoverable failures return `false` and leave the out-parameter alone
//! - Handle 0 is never issued and doubles as the failure value where a
//!   function has no flag to report through
//! - Text is copied both ways; strings returned by the bridge must be
//!   released with [`bridge_string_free`]
//!
//! Breaking the handle contract (an unknown handle, a value of the wrong
//! shape) panics. Every export runs its body under [`guard`], which turns
//! any panic into a process abort after the violation has been logged; an
//! unwind never reaches the foreign caller.

use crate::config::BridgeConfig;
use crate::error::error_codes;
use crate::operations::{self, Lookup};
use crate::registry::{Handle, Registry};
use once_cell::sync::OnceCell;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::{process, ptr};

static REGISTRY: OnceCell<Registry> = OnceCell::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::default)
}

/// Run the body of an export, aborting the process if it panics
fn guard<T>(f: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            tracing::error!("Bridge call panicked, aborting the process");
            process::abort()
        }
    }
}

/// Convert Rust string to C string (caller must free)
fn rust_to_c_string(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(c_str) => c_str.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Write a successful lookup to `out`
unsafe fn report(lookup: Lookup, out: *mut Handle) -> bool {
    match lookup {
        Some(handle) => {
            if !out.is_null() {
                // SAFETY: caller guarantees `out` is valid for writes
                unsafe { *out = handle };
            }
            true
        }
        None => false,
    }
}

// ============================================================================
// Setup
// ============================================================================

/// Configure the process-wide registry from a JSON document
///
/// # Returns
/// * `SUCCESS` (0) if the registry was created with this configuration
/// * `INVALID_ARGUMENT` (-3) if `config_json` is NULL, not UTF-8 or invalid
/// * `ALREADY_INITIALIZED` (-5) if any bridge function already ran
///
/// # Safety
/// `config_json` must be NULL or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn bridge_configure(config_json: *const c_char) -> c_int {
    if config_json.is_null() {
        return error_codes::INVALID_ARGUMENT;
    }
    // SAFETY: caller guarantees a valid NUL-terminated string
    let json = match unsafe { CStr::from_ptr(config_json) }.to_str() {
        Ok(s) => s,
        Err(_) => return error_codes::INVALID_ARGUMENT,
    };
    guard(|| {
        let registry = BridgeConfig::from_json(json)
            .map_err(crate::Error::from)
            .and_then(Registry::new);
        match registry {
            Ok(registry) => match REGISTRY.set(registry) {
                Ok(()) => error_codes::SUCCESS,
                Err(_) => error_codes::ALREADY_INITIALIZED,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Rejected bridge configuration");
                error_codes::INVALID_ARGUMENT
            }
        }
    })
}

/// Install a `tracing` subscriber filtered by `RUST_LOG`
///
/// Safe to call more than once; later calls are ignored.
#[no_mangle]
pub extern "C" fn bridge_init_logging() {
    guard(crate::init_logging);
}

/// Registry statistics as a JSON string
///
/// The returned string must be freed with `bridge_string_free()`.
#[no_mangle]
pub extern "C" fn bridge_stats_json() -> *mut c_char {
    guard(|| match serde_json::to_string(&registry().stats()) {
        Ok(json) => rust_to_c_string(&json),
        Err(_) => ptr::null_mut(),
    })
}

/// Free a string returned by the bridge
///
/// # Safety
/// `s` must be NULL or a pointer returned by this library, not yet freed.
#[no_mangle]
pub unsafe extern "C" fn bridge_string_free(s: *mut c_char) {
    if !s.is_null() {
        // SAFETY: `s` came from `CString::into_raw` in this library
        drop(unsafe { CString::from_raw(s) });
    }
}

// ============================================================================
// Handle Table
// ============================================================================

/// Release a handle
#[no_mangle]
pub extern "C" fn bridge_forget(handle: Handle) {
    guard(|| registry().forget(handle));
}

/// Whether a handle is currently registered
#[no_mangle]
pub extern "C" fn bridge_contains(handle: Handle) -> bool {
    guard(|| registry().contains(handle))
}

/// Register a pointer to a copy of the value at `handle`
#[no_mangle]
pub extern "C" fn bridge_new_pointer(handle: Handle) -> Handle {
    guard(|| registry().new_pointer(handle))
}

// ============================================================================
// Type-Erasure Adapter
// ============================================================================

/// Whether the value is a null pointer or an unset interface
#[no_mangle]
pub extern "C" fn bridge_is_nil(handle: Handle) -> bool {
    guard(|| operations::is_nil(registry(), handle))
}

/// Register what a pointer or interface refers to
///
/// The handle for a pointee shares storage with the pointer.
///
/// # Returns
/// `true` and the new handle in `out`, or `false` for a null pointer, an
/// unset interface or a direct value.
///
/// # Safety
/// `out` must be NULL or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn bridge_dereference(handle: Handle, out: *mut Handle) -> bool {
    let lookup = guard(|| operations::dereference(registry(), handle));
    // SAFETY: caller guarantees `out` is NULL or valid for writes
    unsafe { report(lookup, out) }
}

/// Convert the value at `source` to the type of the value at `target`
///
/// # Returns
/// `true` and the converted value's handle in `out`, or `false` when the
/// types are not convertible.
///
/// # Safety
/// `out` must be NULL or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn bridge_cast(target: Handle, source: Handle, out: *mut Handle) -> bool {
    let lookup = guard(|| operations::cast(registry(), target, source));
    // SAFETY: caller guarantees `out` is NULL or valid for writes
    unsafe { report(lookup, out) }
}

/// Register an unset interface value
#[no_mangle]
pub extern "C" fn bridge_nil_interface() -> Handle {
    guard(|| operations::nil_interface(registry()))
}

// ============================================================================
// Containers
// ============================================================================

/// Register an empty sequence of the type of the value at `shape`
#[no_mangle]
pub extern "C" fn bridge_make_sequence(shape: Handle, capacity: usize) -> Handle {
    guard(|| operations::make_sequence(registry(), shape, capacity))
}

/// Number of items in a sequence
#[no_mangle]
pub extern "C" fn bridge_sequence_len(handle: Handle) -> usize {
    guard(|| operations::sequence_len(registry(), handle))
}

/// Register the sequence item at `index`, sharing its storage
///
/// # Safety
/// `out` must be NULL or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn bridge_sequence_get(
    handle: Handle,
    index: usize,
    out: *mut Handle,
) -> bool {
    let lookup = guard(|| operations::sequence_get(registry(), handle, index));
    // SAFETY: caller guarantees `out` is NULL or valid for writes
    unsafe { report(lookup, out) }
}

/// Append a copy of the value at `value` to the sequence at `target`
#[no_mangle]
pub extern "C" fn bridge_append(target: Handle, value: Handle) {
    guard(|| operations::append(registry(), target, value));
}

/// Register an empty map from the type at `key` to the type at `value`
#[no_mangle]
pub extern "C" fn bridge_make_map(key: Handle, value: Handle, capacity: usize) -> Handle {
    guard(|| operations::make_map(registry(), key, value, capacity))
}

/// Number of entries in a map
#[no_mangle]
pub extern "C" fn bridge_map_len(handle: Handle) -> usize {
    guard(|| operations::map_len(registry(), handle))
}

/// Insert copies of `key` and `value` into the map at `target`
#[no_mangle]
pub extern "C" fn bridge_insert(target: Handle, key: Handle, value: Handle) {
    guard(|| operations::insert(registry(), target, key, value));
}

/// Register a copy of the map value stored under `key`
///
/// # Safety
/// `out` must be NULL or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn bridge_map_get(handle: Handle, key: Handle, out: *mut Handle) -> bool {
    let lookup = guard(|| operations::map_get(registry(), handle, key));
    // SAFETY: caller guarantees `out` is NULL or valid for writes
    unsafe { report(lookup, out) }
}

// ============================================================================
// Scalar Boxing
// ============================================================================

macro_rules! export_scalars {
    ($($box_export:ident => $box_fn:ident, $unbox_export:ident => $unbox_fn:ident, $ty:ty;)*) => {
        $(
            #[doc = concat!("Register a `", stringify!($ty), "`")]
            #[no_mangle]
            pub extern "C" fn $box_export(value: $ty) -> Handle {
                guard(|| operations::$box_fn(registry(), value))
            }

            #[doc = concat!("Read back a boxed `", stringify!($ty), "`")]
            #[no_mangle]
            pub extern "C" fn $unbox_export(handle: Handle) -> $ty {
                guard(|| operations::$unbox_fn(registry(), handle))
            }
        )*
    };
}

export_scalars! {
    bridge_box_bool => box_bool, bridge_unbox_bool => unbox_bool, bool;
    bridge_box_int8 => box_int8, bridge_unbox_int8 => unbox_int8, i8;
    bridge_box_int16 => box_int16, bridge_unbox_int16 => unbox_int16, i16;
    bridge_box_int32 => box_int32, bridge_unbox_int32 => unbox_int32, i32;
    bridge_box_int64 => box_int64, bridge_unbox_int64 => unbox_int64, i64;
    bridge_box_uint8 => box_uint8, bridge_unbox_uint8 => unbox_uint8, u8;
    bridge_box_uint16 => box_uint16, bridge_unbox_uint16 => unbox_uint16, u16;
    bridge_box_uint32 => box_uint32, bridge_unbox_uint32 => unbox_uint32, u32;
    bridge_box_uint64 => box_uint64, bridge_unbox_uint64 => unbox_uint64, u64;
    bridge_box_float32 => box_float32, bridge_unbox_float32 => unbox_float32, f32;
    bridge_box_float64 => box_float64, bridge_unbox_float64 => unbox_float64, f64;
}

/// Register a copy of a NUL-terminated string
///
/// Invalid UTF-8 is replaced with U+FFFD.
///
/// # Returns
/// The new handle, or 0 if `text` is NULL.
///
/// # Safety
/// `text` must be NULL or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn bridge_box_text(text: *const c_char) -> Handle {
    if text.is_null() {
        return 0;
    }
    // SAFETY: caller guarantees a valid NUL-terminated string
    let text = unsafe { CStr::from_ptr(text) }.to_string_lossy();
    guard(|| operations::box_text(registry(), &text))
}

/// Copy the boxed text at `handle` into a new C string
///
/// # Returns
/// The string, or NULL if the text contains an interior NUL. The string
/// must be freed with `bridge_string_free()`.
#[no_mangle]
pub extern "C" fn bridge_unbox_text(handle: Handle) -> *mut c_char {
    guard(|| rust_to_c_string(&operations::unbox_text(registry(), handle)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_round_trip() {
        let handle = bridge_box_int64(-9);
        assert_ne!(handle, 0);
        assert!(bridge_contains(handle));
        assert_eq!(bridge_unbox_int64(handle), -9);
        bridge_forget(handle);
        assert!(!bridge_contains(handle));
    }

    #[test]
    fn test_text_round_trip() {
        let input = CString::new("struct").unwrap();
        let handle = unsafe { bridge_box_text(input.as_ptr()) };
        let output = bridge_unbox_text(handle);
        assert!(!output.is_null());

        let copied = unsafe { CStr::from_ptr(output) }.to_str().unwrap().to_string();
        assert_eq!(copied, "struct");
        unsafe { bridge_string_free(output) };

        assert_eq!(unsafe { bridge_box_text(ptr::null()) }, 0);
    }

    #[test]
    fn test_cast_out_parameter() {
        let target = bridge_box_float64(0.0);
        let source = bridge_box_int32(3);
        let mut out: Handle = 0;

        assert!(unsafe { bridge_cast(target, source, &mut out) });
        assert_eq!(bridge_unbox_float64(out), 3.0);

        let flag = bridge_box_bool(true);
        let mut untouched: Handle = 0;
        assert!(!unsafe { bridge_cast(source, flag, &mut untouched) });
        assert_eq!(untouched, 0);
    }

    #[test]
    fn test_containers() {
        let shape = bridge_box_uint8(0);
        let seq = bridge_make_sequence(shape, 2);
        bridge_append(seq, bridge_box_uint8(7));
        assert_eq!(bridge_sequence_len(seq), 1);

        let mut item: Handle = 0;
        assert!(unsafe { bridge_sequence_get(seq, 0, &mut item) });
        assert_eq!(bridge_unbox_uint8(item), 7);
        assert!(!unsafe { bridge_sequence_get(seq, 1, &mut item) });

        let map = bridge_make_map(shape, bridge_box_bool(false), 0);
        bridge_insert(map, bridge_box_uint8(1), bridge_box_bool(true));
        assert_eq!(bridge_map_len(map), 1);
        assert!(unsafe { bridge_map_get(map, bridge_box_uint8(1), ptr::null_mut()) });
    }

    #[test]
    fn test_pointers_and_interfaces() {
        let value = bridge_box_uint16(5);
        let pointer = bridge_new_pointer(value);
        assert!(!bridge_is_nil(pointer));

        let mut deref: Handle = 0;
        assert!(unsafe { bridge_dereference(pointer, &mut deref) });
        assert_eq!(bridge_unbox_uint16(deref), 5);

        let unset = bridge_nil_interface();
        assert!(bridge_is_nil(unset));
        assert!(!unsafe { bridge_dereference(unset, &mut deref) });
    }

    #[test]
    fn test_dereference_shares_pointee() {
        let pointer = bridge_new_pointer(bridge_box_int32(1));
        let mut first: Handle = 0;
        let mut second: Handle = 0;
        assert!(unsafe { bridge_dereference(pointer, &mut first) });
        assert!(unsafe { bridge_dereference(pointer, &mut second) });
        assert_ne!(first, second);

        registry().with_mut(first, |value| *value = crate::Value::from(8i32));
        assert_eq!(bridge_unbox_int32(second), 8);
    }

    const ABORT_CHILD: &str = "NEXUS_PROXY_BRIDGE_ABORT_CHILD";

    #[test]
    fn test_violation_aborts_process() {
        if std::env::var_os(ABORT_CHILD).is_some() {
            let handle = bridge_box_int32(1);
            bridge_forget(handle);
            bridge_unbox_int32(handle);
            return;
        }

        let status = std::process::Command::new(std::env::current_exe().unwrap())
            .args(["--exact", "ffi::tests::test_violation_aborts_process", "--nocapture"])
            .env(ABORT_CHILD, "1")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .unwrap();

        assert!(!status.success());
        // a caught test panic exits with 101; an abort does not
        assert_ne!(status.code(), Some(101));
    }

    #[test]
    fn test_configure_rejects_bad_input() {
        assert_eq!(
            unsafe { bridge_configure(ptr::null()) },
            error_codes::INVALID_ARGUMENT
        );
        let bad = CString::new(r#"{"firstHandle": 0}"#).unwrap();
        assert_eq!(
            unsafe { bridge_configure(bad.as_ptr()) },
            error_codes::INVALID_ARGUMENT
        );
    }

    #[test]
    fn test_stats_json() {
        bridge_box_bool(true);
        let json = bridge_stats_json();
        let text = unsafe { CStr::from_ptr(json) }.to_str().unwrap().to_string();
        unsafe { bridge_string_free(json) };
        assert!(text.contains("\"totalRegistered\""));
    }
}
