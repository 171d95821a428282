//! Error types for the proxy bridge.
//!
//! The bridge distinguishes two classes of failure. Protocol violations
//! (an unknown handle, an operation applied to the wrong shape) mean the
//! foreign caller broke the handle contract; they are raised with
//! [`violation`], which panics. Expected negative outcomes (a cast that is
//! not convertible, an index out of range) are ordinary `Option`/`bool`
//! results and never show up here.

use crate::registry::Handle;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};

/// Error codes for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The foreign caller broke the handle contract
    ProtocolViolation,
    /// Invalid argument decoded at the boundary
    InvalidArgument,
    /// Configuration could not be loaded or is invalid
    InvalidConfig,
    /// Serialization/deserialization error
    SerializationError,
    /// Internal bridge error (bug)
    InternalError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::ProtocolViolation => write!(f, "PROTOCOL_VIOLATION"),
            ErrorCode::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
            ErrorCode::InvalidConfig => write!(f, "INVALID_CONFIG"),
            ErrorCode::SerializationError => write!(f, "SERIALIZATION_ERROR"),
            ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

/// A breach of the handle contract by the foreign caller.
///
/// These are never returned as values from bridge operations. They are
/// formatted into a panic message by [`violation`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    /// The handle is not (or no longer) registered
    #[error("protocol violation: {op}() called with an invalid handle {handle}")]
    InvalidHandle {
        /// Operation that received the handle
        op: &'static str,
        /// The offending handle
        handle: Handle,
    },

    /// The value behind a handle has a shape the operation does not accept
    #[error("protocol violation: {op}() expects {expected}, found {found}")]
    ShapeMismatch {
        /// Operation name
        op: &'static str,
        /// What the operation accepts
        expected: &'static str,
        /// Type actually found
        found: String,
    },

    /// A value's type does not fit the slot it is written to
    #[error("protocol violation: {op}() expects a value of type {expected}, found {found}")]
    TypeMismatch {
        /// Operation name
        op: &'static str,
        /// Required type
        expected: String,
        /// Type actually found
        found: String,
    },

    /// A map was requested with a key type that has no equality
    #[error("protocol violation: {op}() with non-comparable key type {key}")]
    NotComparable {
        /// Operation name
        op: &'static str,
        /// The key type
        key: String,
    },

    /// Every 32-bit handle has been issued
    #[error("protocol violation: handle space exhausted")]
    HandleSpaceExhausted,
}

impl ProtocolViolation {
    /// Error code reported to foreign callers
    pub fn code(&self) -> ErrorCode {
        ErrorCode::ProtocolViolation
    }
}

/// Abort the current operation because the caller broke the handle contract.
pub fn violation(v: ProtocolViolation) -> ! {
    tracing::error!(violation = %v, "Handle contract broken by foreign caller");
    panic!("{}", v)
}

/// Error details reported across the boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeError {
    /// Error code
    pub code: ErrorCode,

    /// Human-readable message
    pub message: String,
}

impl BridgeError {
    /// Create a new bridge error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create a protocol violation error
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProtocolViolation, message)
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for BridgeError {}

impl From<ProtocolViolation> for BridgeError {
    fn from(v: ProtocolViolation) -> Self {
        Self::new(v.code(), v.to_string())
    }
}

/// Run `f`, converting a protocol-violation panic into a [`BridgeError`].
///
/// Export shims whose host cannot survive an unwind use this to surface the
/// fatal class as a host-level exception instead.
pub fn catch_violation<T>(f: impl FnOnce() -> T) -> std::result::Result<T, BridgeError> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else {
            "bridge operation panicked".to_string()
        };
        if message.starts_with("protocol violation") {
            BridgeError::protocol_violation(message)
        } else {
            BridgeError::new(ErrorCode::InternalError, message)
        }
    })
}

/// Main error type for the bridge
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Convert to BridgeError for returning to a foreign caller
    pub fn to_bridge_error(&self) -> BridgeError {
        match self {
            Error::Config(e) => BridgeError::new(ErrorCode::InvalidConfig, e.to_string()),
            Error::Io(e) => BridgeError::new(ErrorCode::InternalError, e.to_string()),
            Error::Serialization(msg) => {
                BridgeError::new(ErrorCode::SerializationError, msg.clone())
            }
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Integer codes returned by the C ABI
pub mod error_codes {
    /// Success
    pub const SUCCESS: i32 = 0;
    /// Invalid argument (null pointer, bad encoding)
    pub const INVALID_ARGUMENT: i32 = -3;
    /// The process-wide registry already exists
    pub const ALREADY_INITIALIZED: i32 = -5;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(ErrorCode::ProtocolViolation.to_string(), "PROTOCOL_VIOLATION");
        assert_eq!(ErrorCode::InvalidConfig.to_string(), "INVALID_CONFIG");
    }

    #[test]
    fn test_violation_message() {
        let v = ProtocolViolation::InvalidHandle { op: "get", handle: 7 };
        assert_eq!(
            v.to_string(),
            "protocol violation: get() called with an invalid handle 7"
        );
    }

    #[test]
    #[should_panic(expected = "handle space exhausted")]
    fn test_violation_panics() {
        violation(ProtocolViolation::HandleSpaceExhausted);
    }

    #[test]
    fn test_catch_violation() {
        let err = catch_violation(|| -> u32 {
            violation(ProtocolViolation::InvalidHandle { op: "forget", handle: 3 })
        })
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::ProtocolViolation);
        assert!(err.message.contains("forget()"));

        assert_eq!(catch_violation(|| 5).unwrap(), 5);
    }

    #[test]
    fn test_bridge_error_serialization() {
        let err = BridgeError::invalid_argument("text is not UTF-8");
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(
            json,
            r#"{"code":"INVALID_ARGUMENT","message":"text is not UTF-8"}"#
        );
    }

    #[test]
    fn test_error_conversion() {
        let err = Error::Serialization("bad".into());
        assert_eq!(err.to_bridge_error().code, ErrorCode::SerializationError);
    }
}
