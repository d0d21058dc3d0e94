//! Error types for rdtctl.

use std::io;
use thiserror::Error;

/// Result type alias for rdtctl operations.
pub type Result<T> = std::result::Result<T, QosError>;

/// Main error type for rdtctl.
///
/// Variants follow the library's failure taxonomy: caller errors
/// ([`QosError::Param`]), missing platform resources and allocation
/// failures ([`QosError::Resource`]), lifecycle-state violations
/// ([`QosError::AlreadyInitialized`], [`QosError::NotInitialized`]) and
/// fatal generic failures (everything else).
#[derive(Error, Debug)]
pub enum QosError {
    /// Invalid argument supplied by the caller.
    #[error("invalid parameter: {0}")]
    Param(String),

    /// Resource allocation failed or the probed feature is absent
    /// on this platform/backend.
    #[error("resource unavailable: {0}")]
    Resource(String),

    /// The library is already initialized; `init` does not layer.
    #[error("library already initialized")]
    AlreadyInitialized,

    /// The library has not been initialized.
    #[error("library not initialized")]
    NotInitialized,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic fatal error (interface conflict, backend or subsystem
    /// failure).
    #[error("{0}")]
    Failure(String),
}

impl QosError {
    /// Whether this is a caller (parameter) error.
    pub fn is_param(&self) -> bool {
        matches!(self, Self::Param(_))
    }

    /// Whether this is a resource error. Capability aggregation treats
    /// a resource error from a feature probe as "feature absent".
    pub fn is_resource(&self) -> bool {
        matches!(self, Self::Resource(_))
    }
}
