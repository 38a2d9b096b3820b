//! In-memory fakes for driving whole reconciliation passes in tests

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;

use bulwark_common::Error;
use bulwark_proto::SdkRoleUpdateRequest;

use crate::auth_context::AUTHORIZATION_HEADER;
use crate::connection::{ConnectionProvider, RoleApi};
use crate::secret::{ManagedSecret, AUTH_SECRET_KEY};
use crate::store::{remove_owner, DeleteOutcome, ObjectStore};

type Key = (String, String);

fn key(name: &str, namespace: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

pub(crate) fn owner(uid: &str) -> OwnerReference {
    OwnerReference {
        api_version: "core.libopenstorage.org/v1".to_string(),
        kind: "StorageCluster".to_string(),
        name: format!("cluster-{uid}"),
        uid: uid.to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Object store keeping everything in maps, counting writes and deletes
#[derive(Default)]
pub(crate) struct InMemoryStore {
    secrets: Mutex<BTreeMap<Key, Secret>>,
    config_maps: Mutex<BTreeMap<Key, ConfigMap>>,
    services: Mutex<BTreeMap<Key, Service>>,
    writes: AtomicUsize,
    deletes: AtomicUsize,
}

impl InMemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Seed a secret without counting a write
    pub(crate) fn insert_secret(&self, name: &str, namespace: &str, value: &[u8]) {
        self.insert_owned_secret(name, namespace, value, Vec::new());
    }

    pub(crate) fn insert_owned_secret(
        &self,
        name: &str,
        namespace: &str,
        value: &[u8],
        owners: Vec<OwnerReference>,
    ) {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                owner_references: Some(owners).filter(|o| !o.is_empty()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                AUTH_SECRET_KEY.to_string(),
                ByteString(value.to_vec()),
            )])),
            ..Default::default()
        };
        self.secrets
            .lock()
            .unwrap()
            .insert(key(name, namespace), secret);
    }

    pub(crate) fn insert_config_map(&self, name: &str, namespace: &str, data: &[(&str, &str)]) {
        let config_map = ConfigMap {
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        };
        self.config_maps
            .lock()
            .unwrap()
            .insert(key(name, namespace), config_map);
    }

    pub(crate) fn secret(&self, name: &str, namespace: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .unwrap()
            .get(&key(name, namespace))
            .cloned()
    }

    pub(crate) fn secret_count(&self) -> usize {
        self.secrets.lock().unwrap().len()
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub(crate) fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for InMemoryStore {
    async fn get_secret(&self, name: &str, namespace: &str) -> Result<Option<Secret>, Error> {
        Ok(self.secret(name, namespace))
    }

    async fn get_config_map(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        Ok(self
            .config_maps
            .lock()
            .unwrap()
            .get(&key(name, namespace))
            .cloned())
    }

    async fn get_service(&self, name: &str, namespace: &str) -> Result<Option<Service>, Error> {
        Ok(self
            .services
            .lock()
            .unwrap()
            .get(&key(name, namespace))
            .cloned())
    }

    async fn create_or_update_secret(
        &self,
        secret: &ManagedSecret,
        owner: &OwnerReference,
    ) -> Result<(), Error> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut secrets = self.secrets.lock().unwrap();
        let mut object = secret.to_secret(owner);

        if let Some(existing) = secrets.get(&key(&secret.name, &secret.namespace)) {
            let mut owners = existing
                .metadata
                .owner_references
                .clone()
                .unwrap_or_default();
            if owners.iter().all(|o| o.uid != owner.uid) {
                owners.push(owner.clone());
            }
            object.metadata.owner_references = Some(owners);
        }

        secrets.insert(key(&secret.name, &secret.namespace), object);
        Ok(())
    }

    async fn delete_secret(
        &self,
        name: &str,
        namespace: &str,
        owner: &OwnerReference,
    ) -> Result<DeleteOutcome, Error> {
        let mut secrets = self.secrets.lock().unwrap();
        let Some(secret) = secrets.get_mut(&key(name, namespace)) else {
            return Ok(DeleteOutcome::Absent);
        };

        let owners = secret.metadata.owner_references.clone().unwrap_or_default();
        if owners.iter().all(|o| o.uid != owner.uid) {
            return Ok(DeleteOutcome::Kept);
        }
        let remaining = remove_owner(&owners, owner);
        if remaining.is_empty() {
            secrets.remove(&key(name, namespace));
            self.deletes.fetch_add(1, Ordering::SeqCst);
            return Ok(DeleteOutcome::Deleted);
        }
        secret.metadata.owner_references = Some(remaining);
        Ok(DeleteOutcome::Kept)
    }
}

/// Role API that records every request it receives
#[derive(Default)]
pub(crate) struct RecordingRoleApi {
    calls: Mutex<Vec<SdkRoleUpdateRequest>>,
    authorizations: Mutex<Vec<Option<String>>>,
    hang: bool,
}

impl RecordingRoleApi {
    /// A role API whose calls never complete
    pub(crate) fn hanging() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<SdkRoleUpdateRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn authorizations(&self) -> Vec<Option<String>> {
        self.authorizations.lock().unwrap().clone()
    }
}

#[async_trait]
impl RoleApi for RecordingRoleApi {
    async fn update_role(
        &self,
        request: tonic::Request<SdkRoleUpdateRequest>,
    ) -> Result<(), Error> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        let authorization = request
            .metadata()
            .get(AUTHORIZATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.authorizations.lock().unwrap().push(authorization);
        self.calls.lock().unwrap().push(request.into_inner());
        Ok(())
    }
}

/// Connection provider handing out a fixed role API
pub(crate) struct StaticConnections {
    api: Arc<dyn RoleApi>,
    released: Mutex<Vec<String>>,
    full_releases: AtomicUsize,
}

impl StaticConnections {
    pub(crate) fn new(api: Arc<dyn RoleApi>) -> Self {
        Self {
            api,
            released: Mutex::new(Vec::new()),
            full_releases: AtomicUsize::new(0),
        }
    }

    /// Namespaces released one at a time, in order
    pub(crate) fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }

    pub(crate) fn full_releases(&self) -> usize {
        self.full_releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionProvider for StaticConnections {
    async fn role_api(&self, _namespace: &str) -> Result<Arc<dyn RoleApi>, Error> {
        Ok(self.api.clone())
    }

    async fn release(&self, namespace: &str) {
        self.released.lock().unwrap().push(namespace.to_string());
    }

    async fn release_all(&self) {
        self.full_releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Object store whose reads never complete
pub(crate) struct StalledStore;

#[async_trait]
impl ObjectStore for StalledStore {
    async fn get_secret(&self, _name: &str, _namespace: &str) -> Result<Option<Secret>, Error> {
        std::future::pending().await
    }

    async fn get_config_map(
        &self,
        _name: &str,
        _namespace: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        std::future::pending().await
    }

    async fn get_service(&self, _name: &str, _namespace: &str) -> Result<Option<Service>, Error> {
        std::future::pending().await
    }

    async fn create_or_update_secret(
        &self,
        _secret: &ManagedSecret,
        _owner: &OwnerReference,
    ) -> Result<(), Error> {
        std::future::pending().await
    }

    async fn delete_secret(
        &self,
        _name: &str,
        _namespace: &str,
        _owner: &OwnerReference,
    ) -> Result<DeleteOutcome, Error> {
        std::future::pending().await
    }
}
