//! Cluster components and their registry
//!
//! A component owns one slice of a StorageCluster's desired state. Each pass
//! reconciles enabled components and tears down disabled ones, in
//! registration order. Components are registered explicitly when the operator
//! starts; there is no global registry.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::EnvVar;
use kube::ResourceExt;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use bulwark_common::crd::StorageCluster;
use bulwark_common::Error;
use bulwark_security::SecurityReconciler;

use crate::components::SecurityComponent;

/// One slice of a StorageCluster's desired state
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Component: Send + Sync {
    /// Stable name used in logs
    fn name(&self) -> &'static str;

    /// Whether the component applies to `cluster`
    fn is_enabled(&self, cluster: &StorageCluster) -> bool;

    /// Converge the component
    ///
    /// Returns the env list the cluster should carry when the component
    /// changes it.
    async fn reconcile(&self, cluster: &StorageCluster) -> Result<Option<Vec<EnvVar>>, Error>;

    /// Remove whatever the component created for `cluster`
    async fn delete(&self, cluster: &StorageCluster) -> Result<(), Error>;

    /// `cluster` is being deleted; owned objects go with it
    async fn mark_deleted(&self, cluster: &StorageCluster);

    /// Release held resources before the operator exits
    async fn shutdown(&self) {}
}

/// Ordered set of components
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    components: Vec<Arc<dyn Component>>,
}

impl ComponentRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The components every operator runs
    pub fn with_defaults(security: SecurityReconciler) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SecurityComponent::new(security)));
        registry
    }

    /// Append a component; components run in registration order
    pub fn register(&mut self, component: Arc<dyn Component>) {
        self.components.push(component);
    }

    /// Names of the registered components, in order
    pub fn names(&self) -> Vec<&'static str> {
        self.components.iter().map(|c| c.name()).collect()
    }

    /// Run one pass over every component
    ///
    /// Each component sees the env list produced by the ones before it. The
    /// final env list is returned; the first failure aborts the pass.
    pub async fn reconcile(&self, cluster: &StorageCluster) -> Result<Vec<EnvVar>, Error> {
        let mut working = cluster.clone();
        for component in &self.components {
            if component.is_enabled(&working) {
                debug!(cluster = %cluster.name_any(), component = component.name(), "reconciling component");
                if let Some(env) = component.reconcile(&working).await? {
                    working.spec.env = env;
                }
            } else {
                debug!(cluster = %cluster.name_any(), component = component.name(), "component disabled, deleting");
                component.delete(&working).await?;
            }
        }
        Ok(working.spec.env)
    }

    /// Tell every component `cluster` is going away
    pub async fn mark_deleted(&self, cluster: &StorageCluster) {
        for component in &self.components {
            component.mark_deleted(cluster).await;
        }
    }

    /// Release resources held by every component
    pub async fn shutdown(&self) {
        for component in &self.components {
            component.shutdown().await;
        }
        info!(components = self.components.len(), "components shut down");
    }
}
