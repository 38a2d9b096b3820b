//! Security convergence for storage clusters
//!
//! Provisions the long-lived credential secrets a storage cluster needs,
//! keeps the `system.guest` authorization role in line with the cluster's
//! guest access policy, and mints the short-lived tokens the operator uses to
//! authenticate its own calls to the storage API.
//!
//! External systems are reached through two seams: [`store::ObjectStore`]
//! for Kubernetes objects and [`connection::ConnectionProvider`] for the
//! storage API. [`reconciler::SecurityReconciler`] wires everything together.

#![deny(missing_docs)]

pub mod auth_context;
pub mod connection;
pub mod env;
pub mod guest_role;
pub mod provisioner;
pub mod reconciler;
pub mod secret;
pub mod store;
pub mod token;

#[cfg(test)]
mod testing;

pub use auth_context::{AuthContextBuilder, BootstrapAuth, CallContext};
pub use connection::{ConnectionProvider, RoleApi, SdkConnectionProvider};
pub use env::{EnvResolver, IndirectValue};
pub use guest_role::{GuestRoleConverger, GUEST_ROLE_NAME};
pub use provisioner::{EntropySource, OsEntropy, ProvisionOutcome, ProvisionRequest, SecretProvisioner};
pub use reconciler::{
    SecurityConfig, SecurityOutcome, SecurityReconciler, ADMIN_SECRET_NAME, SYSTEM_SECRET_NAME,
};
pub use secret::{ManagedSecret, SecretValue, AUTH_SECRET_KEY};
pub use store::{DeleteOutcome, KubeObjectStore, ObjectStore};
pub use token::{BearerToken, TokenIssuer};
