//! Connection to the storage cluster's SDK endpoint
//!
//! The SDK endpoint is found through the storage Service's ClusterIP and its
//! `px-sdk` port. Channels connect lazily and are cached per namespace, so one
//! channel serves every reconciliation of a cluster until it is released.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use bulwark_common::Error;
use bulwark_proto::{OpenStorageRoleClient, SdkRoleUpdateRequest};

use crate::store::ObjectStore;

/// Service fronting the storage daemons
pub const SDK_SERVICE_NAME: &str = "portworx-service";

/// Name of the SDK port on [`SDK_SERVICE_NAME`]
pub const SDK_PORT_NAME: &str = "px-sdk";

/// SDK port used when the Service does not name one
pub const DEFAULT_SDK_PORT: i32 = 9020;

/// Default connect timeout for SDK channels
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// The role service of the storage API
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RoleApi: Send + Sync {
    /// Replace a role with the definition in the request
    async fn update_role(&self, request: tonic::Request<SdkRoleUpdateRequest>)
        -> Result<(), Error>;
}

/// Hands out storage API clients over a shared connection
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Role API client for the cluster in `namespace`
    async fn role_api(&self, namespace: &str) -> Result<Arc<dyn RoleApi>, Error>;

    /// Drop the cached connection of the cluster in `namespace`
    async fn release(&self, namespace: &str);

    /// Drop every cached connection
    async fn release_all(&self);
}

/// Role API over a tonic channel
#[derive(Clone, Debug)]
pub struct GrpcRoleApi {
    client: OpenStorageRoleClient<Channel>,
}

impl GrpcRoleApi {
    /// Create a client over `channel`
    pub fn new(channel: Channel) -> Self {
        Self {
            client: OpenStorageRoleClient::new(channel),
        }
    }
}

#[async_trait]
impl RoleApi for GrpcRoleApi {
    async fn update_role(
        &self,
        request: tonic::Request<SdkRoleUpdateRequest>,
    ) -> Result<(), Error> {
        let mut client = self.client.clone();
        client.update(request).await.map_err(Error::from_status)?;
        Ok(())
    }
}

/// Connection provider that discovers the SDK endpoint from the storage Service
pub struct SdkConnectionProvider {
    store: Arc<dyn ObjectStore>,
    connect_timeout: Duration,
    channels: Mutex<HashMap<String, Channel>>,
}

impl SdkConnectionProvider {
    /// Create a provider that looks up endpoints through `store`
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Set the connect timeout used for new channels
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Use `channel` for `namespace` instead of discovering one
    pub async fn insert_channel(&self, namespace: &str, channel: Channel) {
        self.channels
            .lock()
            .await
            .insert(namespace.to_string(), channel);
    }

    async fn channel(&self, namespace: &str) -> Result<Channel, Error> {
        if let Some(channel) = self.channels.lock().await.get(namespace) {
            return Ok(channel.clone());
        }

        // Discovery runs without holding the cache lock
        let service = self
            .store
            .get_service(SDK_SERVICE_NAME, namespace)
            .await?
            .ok_or_else(|| {
                Error::Connection(format!(
                    "service {namespace}/{SDK_SERVICE_NAME} not found"
                ))
            })?;
        let endpoint = sdk_endpoint(&service, namespace)?;

        let channel = Endpoint::from_shared(endpoint.clone())
            .map_err(|e| Error::Connection(format!("invalid SDK endpoint {endpoint}: {e}")))?
            .connect_timeout(self.connect_timeout)
            .connect_lazy();

        let mut channels = self.channels.lock().await;
        let channel = channels
            .entry(namespace.to_string())
            .or_insert_with(|| {
                info!(namespace = %namespace, endpoint = %endpoint, "opened SDK channel");
                channel
            })
            .clone();
        Ok(channel)
    }
}

#[async_trait]
impl ConnectionProvider for SdkConnectionProvider {
    async fn role_api(&self, namespace: &str) -> Result<Arc<dyn RoleApi>, Error> {
        let channel = self.channel(namespace).await?;
        Ok(Arc::new(GrpcRoleApi::new(channel)))
    }

    async fn release(&self, namespace: &str) {
        if self.channels.lock().await.remove(namespace).is_some() {
            debug!(namespace = %namespace, "released SDK channel");
        }
    }

    async fn release_all(&self) {
        let mut channels = self.channels.lock().await;
        debug!(count = channels.len(), "releasing SDK channels");
        channels.clear();
    }
}

/// SDK endpoint URI of the storage Service
pub fn sdk_endpoint(service: &Service, namespace: &str) -> Result<String, Error> {
    let spec = service.spec.as_ref();
    let cluster_ip = spec
        .and_then(|s| s.cluster_ip.as_deref())
        .filter(|ip| !ip.is_empty() && *ip != "None")
        .ok_or_else(|| {
            Error::Connection(format!(
                "service {namespace}/{SDK_SERVICE_NAME} has no cluster IP"
            ))
        })?;

    let port = spec
        .and_then(|s| s.ports.as_ref())
        .and_then(|ports| {
            ports
                .iter()
                .find(|p| p.name.as_deref() == Some(SDK_PORT_NAME) && p.port != 0)
        })
        .map(|p| p.port)
        .unwrap_or(DEFAULT_SDK_PORT);

    if cluster_ip.contains(':') {
        Ok(format!("http://[{cluster_ip}]:{port}"))
    } else {
        Ok(format!("http://{cluster_ip}:{port}"))
    }
}
