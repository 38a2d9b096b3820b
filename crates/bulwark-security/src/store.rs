//! Object store access
//!
//! The security core reads and writes a handful of namespaced objects:
//! credential Secrets, ConfigMaps referenced from env entries, and the
//! storage Service used to locate the SDK endpoint. All access goes through
//! [`ObjectStore`] so reconciliation can be exercised without an API server.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use bulwark_common::{Error, FIELD_MANAGER};

use crate::secret::ManagedSecret;

/// Result of releasing a secret on teardown
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The secret was deleted
    Deleted,
    /// The secret is still referenced by another owner, or was never ours, and was kept
    Kept,
    /// There was nothing to delete
    Absent,
}

/// Trait abstracting the object store used by the security core
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Get a Secret, `None` if it does not exist
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error>;

    /// Get a ConfigMap, `None` if it does not exist
    async fn get_config_map(&self, name: &str, namespace: &str)
        -> Result<Option<ConfigMap>, Error>;

    /// Get a Service, `None` if it does not exist
    async fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>, Error>;

    /// Create the secret, or converge an existing one onto the given value and owner
    async fn create_or_update_secret(
        &self,
        secret: &ManagedSecret,
        owner: &OwnerReference,
    ) -> Result<(), Error>;

    /// Drop `owner` from a secret, deleting it when no other owner remains
    ///
    /// A missing secret is not an error. A secret that does not list `owner`
    /// is left untouched.
    async fn delete_secret(
        &self,
        name: &str,
        namespace: &str,
        owner: &OwnerReference,
    ) -> Result<DeleteOutcome, Error>;
}

/// Real object store backed by the Kubernetes API
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    /// Create a store wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_config_map(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(cm) => Ok(Some(cm)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>, Error> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(svc) => Ok(Some(svc)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_or_update_secret(
        &self,
        secret: &ManagedSecret,
        owner: &OwnerReference,
    ) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &secret.namespace);
        let object = secret.to_secret(owner);

        // Server-side apply merges ownerReferences by uid, so an object that
        // already exists (created concurrently or by another owner) converges
        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(&secret.name, &params, &Patch::Apply(&object))
            .await
            .map_err(|e| {
                Error::store_write(
                    "create-or-update secret",
                    &secret.name,
                    &secret.namespace,
                    e.to_string(),
                )
            })?;

        debug!(secret = %secret.name, namespace = %secret.namespace, "applied secret");
        Ok(())
    }

    async fn delete_secret(
        &self,
        name: &str,
        namespace: &str,
        owner: &OwnerReference,
    ) -> Result<DeleteOutcome, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);

        let Some(mut secret) = self.get_secret(name, namespace).await? else {
            debug!(secret = %name, namespace = %namespace, "secret already absent");
            return Ok(DeleteOutcome::Absent);
        };

        let owners = secret.metadata.owner_references.take().unwrap_or_default();
        if owners.iter().all(|o| o.uid != owner.uid) {
            debug!(secret = %name, namespace = %namespace, "secret not owned by cluster, leaving it");
            return Ok(DeleteOutcome::Kept);
        }
        let remaining = remove_owner(&owners, owner);

        if remaining.is_empty() {
            return match api.delete(name, &DeleteParams::default()).await {
                Ok(_) => {
                    info!(secret = %name, namespace = %namespace, "deleted secret");
                    Ok(DeleteOutcome::Deleted)
                }
                Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(DeleteOutcome::Absent),
                Err(e) => Err(Error::store_write(
                    "delete secret",
                    name,
                    namespace,
                    e.to_string(),
                )),
            };
        }

        secret.metadata.owner_references = Some(remaining);
        api.replace(name, &PostParams::default(), &secret)
            .await
            .map_err(|e| Error::store_write("release secret", name, namespace, e.to_string()))?;
        info!(secret = %name, namespace = %namespace, "released ownership of shared secret");
        Ok(DeleteOutcome::Kept)
    }
}

/// Owner references left after removing `owner` (matched by uid)
pub fn remove_owner(owners: &[OwnerReference], owner: &OwnerReference) -> Vec<OwnerReference> {
    owners
        .iter()
        .filter(|o| o.uid != owner.uid)
        .cloned()
        .collect()
}
