//! Registry configuration types and defaults.
//!
//! The registry has no required parameters; everything here tunes how the
//! handle table is allocated and how strictly it enforces the handle
//! contract on release.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default number of entries pre-allocated in the handle table
pub const DEFAULT_INITIAL_CAPACITY: usize = 1024;

/// Default first handle issued by a registry. Handle 0 is never issued.
pub const DEFAULT_FIRST_HANDLE: u32 = 1;

/// What `forget` does with a handle that is not registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForgetPolicy {
    /// Ignore the call and log a warning
    #[default]
    Lenient,
    /// Treat the call as a protocol violation
    Strict,
}

/// Configuration for a handle registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Entries pre-allocated in the handle table (default: 1024)
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,

    /// First handle issued (default: 1, must not be 0)
    #[serde(default = "default_first_handle")]
    pub first_handle: u32,

    /// Behaviour of `forget` on an absent handle (default: lenient)
    #[serde(default)]
    pub forget_policy: ForgetPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            first_handle: DEFAULT_FIRST_HANDLE,
            forget_policy: ForgetPolicy::default(),
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial table capacity
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Set the first handle issued
    pub fn with_first_handle(mut self, handle: u32) -> Self {
        self.first_handle = handle;
        self
    }

    /// Set the forget policy
    pub fn with_forget_policy(mut self, policy: ForgetPolicy) -> Self {
        self.forget_policy = policy;
        self
    }

    /// Parse a configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.first_handle == 0 {
            return Err(ConfigError::InvalidValue {
                field: "first_handle".into(),
                reason: "handle 0 is reserved as the failure sentinel".into(),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The field name
        field: String,
        /// The reason it's invalid
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Default value functions for serde
fn default_initial_capacity() -> usize {
    DEFAULT_INITIAL_CAPACITY
}

fn default_first_handle() -> u32 {
    DEFAULT_FIRST_HANDLE
}
