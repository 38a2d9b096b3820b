//! Common types for Bulwark: the StorageCluster CRD, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod duration;
pub mod error;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for every server-side apply issued by the operator
pub const FIELD_MANAGER: &str = "bulwark-operator";

/// Label key identifying the manager of a resource
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Label value for resources managed by Bulwark
pub const LABEL_MANAGED_BY_BULWARK: &str = "bulwark";

/// Requeue interval for successful reconciliation (drift detection)
pub const REQUEUE_SUCCESS_SECS: u64 = 300;

/// Requeue interval after a retryable failure
pub const REQUEUE_ERROR_SECS: u64 = 60;

/// Requeue interval after a failure that needs a spec change to clear
pub const REQUEUE_PERMANENT_ERROR_SECS: u64 = 300;

/// Env var holding the shared system key used between storage nodes
pub const ENV_AUTH_SYSTEM_KEY: &str = "PORTWORX_AUTH_SYSTEM_KEY";

/// Env var holding the JWT shared secret used to sign operator tokens
pub const ENV_AUTH_JWT_SHARED_SECRET: &str = "PORTWORX_AUTH_JWT_SHAREDSECRET";

/// Env var overriding the issuer of self-signed tokens
pub const ENV_AUTH_JWT_ISSUER: &str = "PORTWORX_AUTH_JWT_ISSUER";
