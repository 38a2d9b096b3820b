//! Security reconciliation for a StorageCluster
//!
//! A pass runs three idempotent steps in order and stops at the first
//! failure:
//!
//! 1. converge the `system.guest` role
//! 2. ensure the system secret (`px-system`, bound to `PORTWORX_AUTH_SYSTEM_KEY`)
//! 3. ensure the admin secret (`px-admin`, bound to `PORTWORX_AUTH_JWT_SHAREDSECRET`)
//!
//! The role update authenticates with whatever admin secret resolves at the
//! start of the pass. On a fresh cluster that is none, so the first pass runs
//! unauthenticated under [`BootstrapAuth::AllowAnonymous`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use tracing::{debug, info};

use bulwark_common::crd::{DesiredSecurityPolicy, StorageCluster};
use bulwark_common::{Error, ENV_AUTH_JWT_SHARED_SECRET, ENV_AUTH_SYSTEM_KEY};

use crate::auth_context::{AuthContextBuilder, BootstrapAuth};
use crate::connection::ConnectionProvider;
use crate::env::EnvResolver;
use crate::guest_role::GuestRoleConverger;
use crate::provisioner::{EntropySource, ProvisionRequest, SecretProvisioner};
use crate::store::{DeleteOutcome, ObjectStore};

/// Secret holding the key shared between storage nodes
pub const SYSTEM_SECRET_NAME: &str = "px-system";

/// Secret holding the JWT shared secret for operator tokens
pub const ADMIN_SECRET_NAME: &str = "px-admin";

/// Default deadline for each external call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Reconciler settings
#[derive(Clone, Copy, Debug)]
pub struct SecurityConfig {
    /// Deadline for each external call
    pub call_timeout: Duration,
    /// Behavior of the role update when no admin credential resolves
    pub bootstrap_auth: BootstrapAuth,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            bootstrap_auth: BootstrapAuth::default(),
        }
    }
}

/// Result of a successful pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SecurityOutcome {
    /// Env list to persist on the cluster
    pub env: Vec<EnvVar>,
    /// Secrets generated during this pass
    pub created_secrets: Vec<String>,
    /// Whether a role update was sent
    pub role_updated: bool,
}

/// Sequences guest role convergence and secret provisioning
#[derive(Clone)]
pub struct SecurityReconciler {
    store: Arc<dyn ObjectStore>,
    connections: Arc<dyn ConnectionProvider>,
    converger: GuestRoleConverger,
    provisioner: SecretProvisioner,
    call_timeout: Duration,
}

impl SecurityReconciler {
    /// Build a reconciler and its components over the given seams
    pub fn new(
        store: Arc<dyn ObjectStore>,
        connections: Arc<dyn ConnectionProvider>,
        entropy: Arc<dyn EntropySource>,
        config: SecurityConfig,
    ) -> Self {
        let resolver = EnvResolver::new(store.clone());
        let auth = AuthContextBuilder::new(resolver.clone(), config.bootstrap_auth);
        Self {
            converger: GuestRoleConverger::new(connections.clone(), auth, config.call_timeout),
            provisioner: SecretProvisioner::new(store.clone(), resolver, entropy),
            store,
            connections,
            call_timeout: config.call_timeout,
        }
    }

    /// Run one pass for `cluster`
    pub async fn reconcile(&self, cluster: &StorageCluster) -> Result<SecurityOutcome, Error> {
        let name = cluster.name_any();
        let namespace = namespace_of(cluster)?;
        let owner = owner_of(cluster)?;
        let policy = DesiredSecurityPolicy::from_cluster(cluster)?;

        let role_updated = self
            .converger
            .converge(&policy, &cluster.spec.env, &namespace)
            .await?;

        let mut env = cluster.spec.env.clone();
        let mut created_secrets = Vec::new();
        for (env_var, secret_name) in [
            (ENV_AUTH_SYSTEM_KEY, SYSTEM_SECRET_NAME),
            (ENV_AUTH_JWT_SHARED_SECRET, ADMIN_SECRET_NAME),
        ] {
            let request = ProvisionRequest {
                env_var,
                secret_name,
                namespace: &namespace,
                owner: &owner,
            };
            let outcome = self
                .within(secret_name, self.provisioner.ensure(&env, request))
                .await?;
            if outcome.created {
                created_secrets.push(secret_name.to_string());
            }
            env = outcome.env;
        }

        info!(
            cluster = %name,
            role_updated,
            created = created_secrets.len(),
            "security reconciled"
        );
        Ok(SecurityOutcome {
            env,
            created_secrets,
            role_updated,
        })
    }

    /// Release this cluster's hold on both secrets
    ///
    /// Secrets that were never created are skipped.
    pub async fn teardown(&self, cluster: &StorageCluster) -> Result<(), Error> {
        let namespace = namespace_of(cluster)?;
        let owner = owner_of(cluster)?;

        for secret_name in [SYSTEM_SECRET_NAME, ADMIN_SECRET_NAME] {
            let outcome = self
                .within(
                    secret_name,
                    self.store.delete_secret(secret_name, &namespace, &owner),
                )
                .await?;
            debug!(cluster = %cluster.name_any(), secret = %secret_name, ?outcome, "released secret");
            if outcome == DeleteOutcome::Kept {
                info!(secret = %secret_name, namespace = %namespace, "secret still has other owners, kept");
            }
        }
        Ok(())
    }

    /// Drop the cached SDK connection of `cluster`
    pub async fn release(&self, cluster: &StorageCluster) {
        if let Some(namespace) = cluster.namespace() {
            self.connections.release(&namespace).await;
        }
    }

    /// Drop every cached SDK connection
    pub async fn release_all(&self) {
        self.connections.release_all().await;
    }

    async fn within<T>(
        &self,
        step: &str,
        fut: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| Error::timeout(step, self.call_timeout))?
    }
}

fn namespace_of(cluster: &StorageCluster) -> Result<String, Error> {
    cluster.namespace().ok_or_else(|| {
        Error::validation_for_field(cluster.name_any(), "metadata.namespace", "cluster has no namespace")
    })
}

fn owner_of(cluster: &StorageCluster) -> Result<OwnerReference, Error> {
    cluster.controller_owner_ref(&()).ok_or_else(|| {
        Error::validation_for_field(cluster.name_any(), "metadata.uid", "cluster has no uid")
    })
}
