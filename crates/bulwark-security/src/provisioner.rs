//! Credential secret provisioning
//!
//! Ensures a credential exists for a given env entry. The credential is
//! generated at most once per secret: whenever the env entry already resolves
//! to a value, or the secret is already stored, no new credential is made.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{EnvVar, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use rand::RngCore;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use bulwark_common::Error;

use crate::env::{EnvResolver, IndirectValue};
use crate::secret::{secret_data_value, ManagedSecret, SecretValue, AUTH_SECRET_KEY};
use crate::store::ObjectStore;

/// Number of random bytes in a generated credential
pub const GENERATED_SECRET_LEN: usize = 32;

/// Source of cryptographically secure random bytes
#[cfg_attr(test, automock)]
pub trait EntropySource: Send + Sync {
    /// Fill `dest` entirely, or fail
    fn fill(&self, dest: &mut [u8]) -> Result<(), Error>;
}

/// Operating system entropy
#[derive(Clone, Copy, Debug, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<(), Error> {
        rand::rngs::OsRng
            .try_fill_bytes(dest)
            .map_err(|e| Error::GenerationFailure(e.to_string()))
    }
}

/// What to provision and where to bind it
#[derive(Clone, Copy, Debug)]
pub struct ProvisionRequest<'a> {
    /// Env entry consumers read the credential from
    pub env_var: &'a str,
    /// Secret that stores the credential
    pub secret_name: &'a str,
    /// Namespace of the cluster and the secret
    pub namespace: &'a str,
    /// Owner the secret is attached to
    pub owner: &'a OwnerReference,
}

/// Result of [`SecretProvisioner::ensure`]
#[derive(Clone, Debug, PartialEq)]
pub struct ProvisionOutcome {
    /// Whether a new credential was generated and written
    pub created: bool,
    /// The env list to persist, with the binding entry added when it was missing
    pub env: Vec<EnvVar>,
}

/// Generates and stores credential secrets
#[derive(Clone)]
pub struct SecretProvisioner {
    store: Arc<dyn ObjectStore>,
    resolver: EnvResolver,
    entropy: Arc<dyn EntropySource>,
}

impl SecretProvisioner {
    /// Create a provisioner
    pub fn new(
        store: Arc<dyn ObjectStore>,
        resolver: EnvResolver,
        entropy: Arc<dyn EntropySource>,
    ) -> Self {
        Self {
            store,
            resolver,
            entropy,
        }
    }

    /// Ensure the credential bound to `request.env_var` exists
    pub async fn ensure(
        &self,
        entries: &[EnvVar],
        request: ProvisionRequest<'_>,
    ) -> Result<ProvisionOutcome, Error> {
        let ProvisionRequest {
            env_var,
            secret_name,
            namespace,
            owner,
        } = request;

        if self
            .resolver
            .resolve_entry(entries, env_var, namespace)
            .await?
            .is_some()
        {
            debug!(env = %env_var, "credential already bound, skipping generation");
            return Ok(ProvisionOutcome {
                created: false,
                env: entries.to_vec(),
            });
        }

        // A stored credential is never regenerated. It is rebound when the env
        // update of an earlier pass was lost or the entry is an empty literal,
        // and adopted with this cluster as an extra owner when it lacks one.
        if let Some(stored) = self.store.get_secret(secret_name, namespace).await? {
            if let Some(value) = secret_data_value(&stored, AUTH_SECRET_KEY) {
                if !owned_by(&stored, owner) {
                    let adopted = ManagedSecret {
                        name: secret_name.to_string(),
                        namespace: namespace.to_string(),
                        value,
                    };
                    self.store.create_or_update_secret(&adopted, owner).await?;
                    info!(secret = %secret_name, namespace = %namespace, "adopted existing credential secret");
                }
                info!(secret = %secret_name, namespace = %namespace, env = %env_var, "binding existing credential secret");
                return Ok(ProvisionOutcome {
                    created: false,
                    env: bind(entries, env_var, secret_name),
                });
            }
        }

        let mut bytes = vec![0u8; GENERATED_SECRET_LEN];
        self.entropy.fill(&mut bytes)?;
        let secret = ManagedSecret {
            name: secret_name.to_string(),
            namespace: namespace.to_string(),
            value: SecretValue::new(bytes),
        };

        self.store.create_or_update_secret(&secret, owner).await?;
        info!(secret = %secret_name, namespace = %namespace, env = %env_var, "generated credential secret");

        Ok(ProvisionOutcome {
            created: true,
            env: bind(entries, env_var, secret_name),
        })
    }
}

/// Bind `env_var` to the secret, replacing an existing entry of that name
fn bind(entries: &[EnvVar], env_var: &str, secret_name: &str) -> Vec<EnvVar> {
    let binding = IndirectValue::SecretRef {
        name: secret_name.to_string(),
        key: AUTH_SECRET_KEY.to_string(),
    }
    .to_env_var(env_var);

    let mut env = entries.to_vec();
    match env.iter_mut().find(|e| e.name == env_var) {
        Some(entry) => *entry = binding,
        None => env.push(binding),
    }
    env
}

fn owned_by(secret: &Secret, owner: &OwnerReference) -> bool {
    secret
        .metadata
        .owner_references
        .as_ref()
        .is_some_and(|owners| owners.iter().any(|o| o.uid == owner.uid))
}
