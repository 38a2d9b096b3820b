//! Error types for the Bulwark operator
//!
//! Errors carry the object they were raised for (kind, name, namespace) so a
//! failed reconciliation can be diagnosed from the log line alone. The
//! variants follow the failure taxonomy of the security core: missing
//! references, entropy failures, store writes, role RPC failures, and token
//! signing.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Bulwark operations
#[derive(Debug, Error)]
pub enum Error {
    /// A referenced secret, config map, or key is absent (or empty)
    #[error("{kind} {namespace}/{name} not found{}", .key.as_ref().map(|k| format!(" (key {k})")).unwrap_or_default())]
    NotFound {
        /// Kind of the referenced object (Secret, ConfigMap, Service)
        kind: String,
        /// Name of the referenced object
        name: String,
        /// Namespace that was searched
        namespace: String,
        /// Key within the object, when the object exists but the key does not
        key: Option<String>,
    },

    /// The cryptographically secure random source failed
    #[error("failed to generate secret material: {0}")]
    GenerationFailure(String),

    /// A create, update, or delete against the object store failed
    #[error("failed to {operation} {namespace}/{name}: {message}")]
    StoreWrite {
        /// Operation that failed (create-or-update, delete)
        operation: String,
        /// Name of the object being written
        name: String,
        /// Namespace of the object being written
        namespace: String,
        /// Underlying cause
        message: String,
    },

    /// The administrative API could not be reached
    #[error("connection to storage API failed: {0}")]
    Connection(String),

    /// The administrative API rejected our credentials
    #[error("storage API authentication failed: {0}")]
    Auth(String),

    /// The administrative API rejected the request itself
    #[error("storage API rejected request: {0}")]
    RemoteRejected(String),

    /// A bearer token could not be built or signed
    #[error("failed to sign operator token: {0}")]
    Signing(String),

    /// No credential could be obtained for an authenticated call
    #[error("credential unavailable: {0}")]
    CredentialUnavailable(String),

    /// Validation error for the StorageCluster spec
    #[error("validation error for {cluster}: {message}")]
    Validation {
        /// Name of the cluster with invalid configuration
        cluster: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.security.auth.selfSigned.tokenLifetime")
        field: Option<String>,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// An external call did not complete within its deadline
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        /// What was being waited on
        operation: String,
        /// The deadline that elapsed
        seconds: u64,
    },
}

impl Error {
    /// Create a not-found error for a missing secret
    pub fn secret_not_found(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Secret".to_string(),
            name: name.into(),
            namespace: namespace.into(),
            key: None,
        }
    }

    /// Create a not-found error for a missing config map
    pub fn config_map_not_found(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "ConfigMap".to_string(),
            name: name.into(),
            namespace: namespace.into(),
            key: None,
        }
    }

    /// Create a not-found error for a key that is absent or empty in an existing object
    pub fn key_not_found(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
            key: Some(key.into()),
        }
    }

    /// Create a store write error
    pub fn store_write(
        operation: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::StoreWrite {
            operation: operation.into(),
            name: name.into(),
            namespace: namespace.into(),
            message: message.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context and field path
    pub fn validation_for_field(
        cluster: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a timeout error for `operation` after `deadline` elapsed
    pub fn timeout(operation: impl Into<String>, deadline: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds: deadline.as_secs(),
        }
    }

    /// Map a gRPC status returned by the storage API onto the error taxonomy
    pub fn from_status(status: tonic::Status) -> Self {
        use tonic::Code;

        let message = format!("{}: {}", status.code(), status.message());
        match status.code() {
            Code::Unavailable | Code::DeadlineExceeded | Code::Cancelled => {
                Self::Connection(message)
            }
            Code::Unauthenticated | Code::PermissionDenied => Self::Auth(message),
            _ => Self::RemoteRejected(message),
        }
    }

    /// Returns true if this is a not-found error
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// Returns true if the error may clear on its own and the pass should be retried soon
    ///
    /// Validation, signing, and not-found errors need someone to change the
    /// spec or restore a referenced object, so they are requeued on the slow
    /// interval instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::GenerationFailure(_)
            | Error::StoreWrite { .. }
            | Error::Connection(_)
            | Error::Kube { .. }
            | Error::Timeout { .. } => true,
            Error::NotFound { .. }
            | Error::Auth(_)
            | Error::RemoteRejected(_)
            | Error::Signing(_)
            | Error::CredentialUnavailable(_)
            | Error::Validation { .. }
            | Error::Serialization { .. } => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
