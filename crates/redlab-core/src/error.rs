//! Unified error types for the caching layers.

use std::fmt::Debug;
use thiserror::Error;

/// Unified error type for redlab.
///
/// The variants follow the four failure classes of the caching layer:
/// configuration problems are fatal at startup, serialization problems are
/// reported to whoever asked for the encode or decode, store problems are
/// absorbed at the wrapper boundary, and the wrapped function's own errors
/// never pass through this type at all.
#[derive(Error, Debug)]
pub enum CacheError {
    // ============ Startup Errors ============
    /// Missing or invalid settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ============ Serialization Errors ============
    /// A value could not be encoded in the requested format.
    #[error("Serialization error ({format}): {message}")]
    Serialization {
        format: &'static str,
        message: String,
    },

    /// Stored bytes could not be decoded in the requested format.
    #[error("Deserialization error ({format}): {message}")]
    Deserialization {
        format: &'static str,
        message: String,
    },

    // ============ Store Errors ============
    /// The key-value store could not be reached or rejected the command.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    // ============ Internal Errors ============
    /// File system error (writing generated files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Serialization { .. } => "SERIALIZATION_ERROR",
            Self::Deserialization { .. } => "DESERIALIZATION_ERROR",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::Io(_) => "IO_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration<T: Into<String>>(message: T) -> Self {
        Self::Configuration(message.into())
    }

    /// Creates a store-unavailable error.
    #[must_use]
    pub fn store_unavailable<T: Into<String>>(message: T) -> Self {
        Self::StoreUnavailable(message.into())
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal<T: Into<String>>(message: T) -> Self {
        Self::Internal(message.into())
    }

    /// Checks if this error is a degraded store that callers may bypass.
    #[must_use]
    pub const fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Checks if this error points at a wrong format choice or corrupt data.
    #[must_use]
    pub const fn is_serialization(&self) -> bool {
        matches!(
            self,
            Self::Serialization { .. } | Self::Deserialization { .. }
        )
    }
}
