//! StorageCluster controller
//!
//! Each pass runs the component registry and writes the resulting env list
//! back to the cluster when it changed, so credential bindings created by a
//! pass are visible to the next one and to the storage daemons.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::EnvVar;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, warn};

#[cfg(test)]
use mockall::automock;

use bulwark_common::crd::StorageCluster;
use bulwark_common::{
    Error, FIELD_MANAGER, REQUEUE_ERROR_SECS, REQUEUE_PERMANENT_ERROR_SECS, REQUEUE_SUCCESS_SECS,
};

use crate::component::ComponentRegistry;

/// Watcher timeout (seconds), kept below the client read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Writes to StorageCluster objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Replace `spec.env` of a StorageCluster
    async fn patch_env(&self, name: &str, namespace: &str, env: &[EnvVar]) -> Result<(), Error>;
}

/// Real cluster client backed by the Kubernetes API
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Create a cluster client wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn patch_env(&self, name: &str, namespace: &str, env: &[EnvVar]) -> Result<(), Error> {
        let api: Api<StorageCluster> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "spec": {
                "env": env
            }
        });

        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::store_write("patch env of", name, namespace, e.to_string()))?;
        Ok(())
    }
}

/// Controller context
pub struct Context {
    /// Writes back to StorageClusters
    pub kube: Arc<dyn ClusterClient>,
    /// Components run on every pass
    pub registry: ComponentRegistry,
}

impl Context {
    /// Create a context
    pub fn new(kube: Arc<dyn ClusterClient>, registry: ComponentRegistry) -> Self {
        Self { kube, registry }
    }
}

/// Reconcile one StorageCluster
pub async fn reconcile(cluster: Arc<StorageCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();

    if cluster.metadata.deletion_timestamp.is_some() {
        info!(cluster = %name, "cluster is being deleted");
        ctx.registry.mark_deleted(&cluster).await;
        return Ok(Action::await_change());
    }

    debug!(cluster = %name, "reconciling cluster");
    let env = ctx.registry.reconcile(&cluster).await?;

    if env != cluster.spec.env {
        info!(cluster = %name, entries = env.len(), "updating cluster env");
        ctx.kube.patch_env(&name, &namespace, &env).await?;
    }

    Ok(Action::requeue(Duration::from_secs(REQUEUE_SUCCESS_SECS)))
}

/// Requeue policy for failed passes
pub fn error_policy(cluster: Arc<StorageCluster>, error: &Error, _ctx: Arc<Context>) -> Action {
    if error.is_retryable() {
        warn!(?error, cluster = %cluster.name_any(), "reconciliation failed, retrying");
        Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS))
    } else {
        error!(?error, cluster = %cluster.name_any(), "reconciliation failed");
        Action::requeue(Duration::from_secs(REQUEUE_PERMANENT_ERROR_SECS))
    }
}

/// Run the controller until a shutdown signal arrives
///
/// Components are shut down once the controller stream ends.
pub async fn run(api: Api<StorageCluster>, ctx: Arc<Context>) {
    info!(components = ?ctx.registry.names(), "starting StorageCluster controller");

    Controller::new(api, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx.clone())
        .for_each(|result| {
            match result {
                Ok((object, action)) => debug!(cluster = %object.name, ?action, "reconciliation completed"),
                Err(e) => error!(error = ?e, "reconciliation error"),
            }
            std::future::ready(())
        })
        .await;

    ctx.registry.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::MockComponent;
    use bulwark_common::crd::StorageClusterSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::sync::Mutex;

    fn cluster(env: Vec<EnvVar>) -> Arc<StorageCluster> {
        let mut cluster = StorageCluster::new(
            "px-cluster",
            StorageClusterSpec {
                env,
                ..Default::default()
            },
        );
        cluster.metadata.namespace = Some("portworx".to_string());
        Arc::new(cluster)
    }

    fn entry(name: &str) -> EnvVar {
        EnvVar {
            name: name.to_string(),
            value: Some("x".to_string()),
            value_from: None,
        }
    }

    fn registry_returning(env: Vec<EnvVar>) -> ComponentRegistry {
        let mut component = MockComponent::new();
        component.expect_name().return_const("security");
        component.expect_is_enabled().return_const(true);
        component
            .expect_reconcile()
            .returning(move |_| Ok(Some(env.clone())));

        let mut registry = ComponentRegistry::new();
        registry.register(Arc::new(component));
        registry
    }

    /// Story: a pass that binds new credentials persists the env list once;
    /// the next pass over the updated cluster writes nothing.
    #[tokio::test]
    async fn story_env_is_persisted_only_when_changed() {
        let written: Arc<Mutex<Vec<Vec<EnvVar>>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = written.clone();

        let mut kube = MockClusterClient::new();
        kube.expect_patch_env()
            .withf(|name, ns, _| name == "px-cluster" && ns == "portworx")
            .times(1)
            .returning(move |_, _, env| {
                captured.lock().unwrap().push(env.to_vec());
                Ok(())
            });

        let bound = vec![entry("PORTWORX_AUTH_SYSTEM_KEY")];
        let ctx = Arc::new(Context::new(Arc::new(kube), registry_returning(bound.clone())));

        // First pass: env changes and is written back
        let action = reconcile(cluster(Vec::new()), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(REQUEUE_SUCCESS_SECS)));
        assert_eq!(written.lock().unwrap().as_slice(), &[bound.clone()]);

        // Second pass: already up to date, patch_env expectation is times(1)
        reconcile(cluster(bound), ctx).await.unwrap();
    }

    #[tokio::test]
    async fn deleting_cluster_marks_components_deleted() {
        let mut component = MockComponent::new();
        component.expect_name().return_const("security");
        component.expect_reconcile().never();
        component.expect_mark_deleted().times(1).return_const(());

        let mut registry = ComponentRegistry::new();
        registry.register(Arc::new(component));
        let ctx = Arc::new(Context::new(Arc::new(MockClusterClient::new()), registry));

        let mut deleting = (*cluster(Vec::new())).clone();
        deleting.metadata.deletion_timestamp = Some(Time(chrono_now()));

        let action = reconcile(Arc::new(deleting), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn component_errors_skip_env_write() {
        let mut component = MockComponent::new();
        component.expect_name().return_const("security");
        component.expect_is_enabled().return_const(true);
        component
            .expect_reconcile()
            .returning(|_| Err(Error::Connection("sdk down".to_string())));

        let mut registry = ComponentRegistry::new();
        registry.register(Arc::new(component));
        let mut kube = MockClusterClient::new();
        kube.expect_patch_env().never();
        let ctx = Arc::new(Context::new(Arc::new(kube), registry));

        let err = reconcile(cluster(Vec::new()), ctx).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[test]
    fn retryable_errors_requeue_sooner() {
        let ctx = Arc::new(Context::new(
            Arc::new(MockClusterClient::new()),
            ComponentRegistry::new(),
        ));

        let action = error_policy(
            cluster(Vec::new()),
            &Error::Connection("down".to_string()),
            ctx.clone(),
        );
        assert_eq!(action, Action::requeue(Duration::from_secs(REQUEUE_ERROR_SECS)));

        let action = error_policy(
            cluster(Vec::new()),
            &Error::validation("bad lifetime"),
            ctx,
        );
        assert_eq!(
            action,
            Action::requeue(Duration::from_secs(REQUEUE_PERMANENT_ERROR_SECS))
        );
    }

    fn chrono_now() -> k8s_openapi::chrono::DateTime<k8s_openapi::chrono::Utc> {
        k8s_openapi::chrono::Utc::now()
    }
}
