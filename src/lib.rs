//! # Nexus Proxy Bridge
//!
//! This library lets a foreign caller hold and manipulate host values
//! without ever seeing them. The caller only holds 32-bit handles into a
//! concurrency-safe registry and asks the bridge to operate on them:
//! build containers, append and insert, cast, test for nil, take pointers.
//!
//! ## Architecture
//!
//! ```text
//! C caller            Node.js
//!     │                  │
//!     │ C ABI (ffi)      │ N-API (napi, feature "node")
//!     ▼                  ▼
//! Operations (adapter, containers, boxing)
//!     │
//!     │ handles
//!     ▼
//! Registry (handle → value + type)
//! ```
//!
//! ## Features
//!
//! - **Type Erasure**: Every value carries a runtime [`TypeDescriptor`]
//! - **Copy In, Alias Out**: Containers copy values in; pointees and
//!   sequence items come back as handles onto the same storage
//! - **Lossless Casts**: Conversions never truncate or reinterpret bytes
//! - **Fail Fast**: Unknown handles and wrong shapes are protocol violations

#![deny(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod error;
pub mod ffi;
pub mod metrics;
#[cfg(feature = "node")]
pub mod napi;
pub mod operations;
pub mod registry;
pub mod types;
pub mod value;

// Re-export commonly used types
pub use config::{BridgeConfig, ForgetPolicy};
pub use error::{BridgeError, Error, ErrorCode, ProtocolViolation, Result};
pub use metrics::{RegistryMetrics, RegistryStats};
pub use registry::{Handle, Registry};
pub use types::{NamedType, ScalarKind, Shape, TypeDescriptor};
pub use value::{HostObject, MapValue, Pointer, Sequence, Value};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install a `tracing` subscriber filtered by `RUST_LOG`.
///
/// Defaults to `info` for this crate. Does nothing if a global subscriber is
/// already set.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("nexus_proxy_bridge=info"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
