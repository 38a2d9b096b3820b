//! Security component: guest role, credential secrets, and operator tokens

use async_trait::async_trait;
use k8s_openapi::api::core::v1::EnvVar;
use kube::ResourceExt;
use tracing::info;

use bulwark_common::crd::StorageCluster;
use bulwark_common::Error;
use bulwark_security::SecurityReconciler;

use crate::component::Component;

/// Name of the security component
pub const SECURITY_COMPONENT_NAME: &str = "Security";

/// Runs [`SecurityReconciler`] for clusters with security enabled
pub struct SecurityComponent {
    reconciler: SecurityReconciler,
}

impl SecurityComponent {
    /// Wrap a reconciler
    pub fn new(reconciler: SecurityReconciler) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl Component for SecurityComponent {
    fn name(&self) -> &'static str {
        SECURITY_COMPONENT_NAME
    }

    fn is_enabled(&self, cluster: &StorageCluster) -> bool {
        cluster.security_enabled()
    }

    async fn reconcile(&self, cluster: &StorageCluster) -> Result<Option<Vec<EnvVar>>, Error> {
        let outcome = self.reconciler.reconcile(cluster).await?;
        if !outcome.created_secrets.is_empty() {
            info!(
                cluster = %cluster.name_any(),
                secrets = ?outcome.created_secrets,
                "generated credential secrets"
            );
        }
        Ok(Some(outcome.env))
    }

    async fn delete(&self, cluster: &StorageCluster) -> Result<(), Error> {
        self.reconciler.teardown(cluster).await
    }

    async fn mark_deleted(&self, cluster: &StorageCluster) {
        self.reconciler.release(cluster).await;
    }

    async fn shutdown(&self) {
        self.reconciler.release_all().await;
    }
}
