//! Error types for the persistence layer.
//!
//! This module defines all error types used throughout the persistence layer,
//! following a hierarchy that separates document state errors, validation
//! errors, backend errors, change feed errors, and operation control errors.
//!
//! Every error also belongs to an [`ErrorCategory`]. Fatal errors mean the
//! process cannot serve any tenant without storage; the embedding application
//! is expected to stop rather than retry.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

/// The primary error type for all storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Document state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Caller input errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Change feed errors
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// Deadline and cancellation errors
    #[error(transparent)]
    Operation(#[from] OperationError),
}

/// Errors related to document state.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// No document with the given identifier exists in the collection.
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// A document with the given identifier already exists.
    #[error("document already exists: {collection}/{id}")]
    AlreadyExists { collection: String, id: String },
}

/// Errors caused by malformed caller input.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("malformed filter: {message}")]
    MalformedFilter { message: String },

    #[error("invalid patch: {message}")]
    InvalidPatch { message: String },

    #[error("invalid document: {message}")]
    InvalidDocument { message: String },
}

/// Errors originating in a storage backend.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend unavailable: {backend_name}: {message}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    #[error("capability '{capability}' not supported by {backend_name}")]
    UnsupportedCapability {
        backend_name: String,
        capability: String,
    },

    #[error("provisioning of {collection} failed in {backend_name}: {message}")]
    ProvisioningFailed {
        backend_name: String,
        collection: String,
        message: String,
    },

    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("query execution failed: {message}")]
    QueryError { message: String },

    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Errors raised by change feed subscriptions.
#[derive(Error, Debug)]
pub enum SubscriptionError {
    /// The backend refused to open the change cursor.
    #[error("failed to open change feed on {collection}: {message}")]
    CursorOpenFailed { collection: String, message: String },

    /// The cursor failed after it was opened.
    #[error("change feed on {collection} failed: {message}")]
    StreamFailed { collection: String, message: String },
}

/// Errors raised when an operation is aborted by its [`OperationContext`].
///
/// [`OperationContext`]: crate::core::OperationContext
#[derive(Error, Debug)]
pub enum OperationError {
    #[error("operation {operation} was cancelled")]
    Cancelled { operation: String },

    #[error("operation {operation} exceeded its deadline of {timeout_ms}ms")]
    DeadlineExceeded { operation: String, timeout_ms: u64 },
}

/// How the caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Storage cannot be used at all; the process should stop.
    Fatal,
    /// The failure is local to this call and should be reported to the client.
    Recoverable,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Fatal => write!(f, "fatal"),
            ErrorCategory::Recoverable => write!(f, "recoverable"),
        }
    }
}

impl StorageError {
    /// Returns the category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            StorageError::Backend(BackendError::ConnectionFailed { .. })
            | StorageError::Backend(BackendError::ProvisioningFailed { .. }) => {
                ErrorCategory::Fatal
            }
            _ => ErrorCategory::Recoverable,
        }
    }

    /// Returns `true` if the process cannot usefully continue after this error.
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Fatal
    }

    /// Returns `true` for a lookup that matched no document.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Resource(ResourceError::NotFound { .. }))
    }

    /// Returns `true` for an insert whose identifier was already taken.
    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            StorageError::Resource(ResourceError::AlreadyExists { .. })
        )
    }
}

/// Type alias for storage operation results.
pub type StorageResult<T> = Result<T, StorageError>;

// Implement conversions from common error types

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Internal {
            backend_name: "unknown".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<tokio::time::error::Elapsed> for StorageError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        StorageError::Operation(OperationError::DeadlineExceeded {
            operation: "unknown".to_string(),
            timeout_ms: 0,
        })
    }
}

#[cfg(feature = "mongodb")]
impl From<mongodb::error::Error> for StorageError {
    fn from(err: mongodb::error::Error) -> Self {
        StorageError::Backend(BackendError::Internal {
            backend_name: "mongodb".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}
