//! Error types for assetkeep

use std::fmt;

/// Result type alias for assetkeep operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by loader and instantiation backends
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error types for handle and cache operations
#[derive(Debug)]
pub enum Error {
    /// Load requested with an empty path or while the handle is busy
    InvalidLoad {
        /// Path the caller asked for
        path: String,
        /// State the handle was in
        status: &'static str,
    },

    /// The loader reported a failure
    Load {
        /// Path that failed
        path: String,
        /// Underlying loader error
        source: BoxError,
    },

    /// The loaded asset is not of the requested type
    TypeMismatch {
        /// Path that was loaded
        path: String,
        /// Requested type name
        expected: &'static str,
    },

    /// Unknown group name
    InvalidGroup(String),

    /// Unknown category name
    InvalidCategory(String),

    /// Background task requested outside a tokio runtime
    NoRuntime,

    /// The cache manager has been torn down
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidLoad { path, status } => {
                write!(f, "Invalid load state or path: '{}' (handle is {})", path, status)
            }
            Error::Load { path, source } => write!(f, "Failed to load '{}': {}", path, source),
            Error::TypeMismatch { path, expected } => {
                write!(f, "Asset at '{}' is not a {}", path, expected)
            }
            Error::InvalidGroup(name) => write!(f, "Invalid group: {}", name),
            Error::InvalidCategory(name) => write!(f, "Invalid category: {}", name),
            Error::NoRuntime => write!(f, "No tokio runtime available"),
            Error::Closed => write!(f, "Cache manager is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Load { source, .. } => Some(&**source),
            _ => None,
        }
    }
}

