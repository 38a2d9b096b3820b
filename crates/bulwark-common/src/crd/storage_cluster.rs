//! StorageCluster CRD
//!
//! Only the parts of the StorageCluster spec the security component reads are
//! modelled here: the container env list (which doubles as the indirection
//! list for credentials) and the `security` block.

use std::time::Duration;

use k8s_openapi::api::core::v1::EnvVar;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::Error;

/// Issuer used for self-signed operator tokens when the spec names none
pub const DEFAULT_SELF_SIGNED_ISSUER: &str = "operator.portworx.io";

/// Lifetime of operator tokens when the spec names none (24h)
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 24 * 60 * 60;

/// A distributed storage cluster managed by the operator.
///
/// Example:
/// ```yaml
/// apiVersion: core.libopenstorage.org/v1
/// kind: StorageCluster
/// metadata:
///   name: px-cluster
///   namespace: kube-system
/// spec:
///   image: portworx/oci-monitor:2.6.0
///   security:
///     enabled: true
///     auth:
///       guestAccess: Disabled
///       selfSigned:
///         issuer: operator.portworx.io
///         tokenLifetime: 1h
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "core.libopenstorage.org",
    version = "v1",
    kind = "StorageCluster",
    shortname = "stc",
    namespaced,
    status = "StorageClusterStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StorageClusterSpec {
    /// Storage daemon image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Environment passed to the storage daemon; credentials are bound here
    /// by secret reference
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,

    /// Security configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<SecuritySpec>,
}

/// Security configuration for the cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySpec {
    /// Enables authentication and authorization on the storage API
    #[serde(default)]
    pub enabled: bool,

    /// Authentication settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthSpec>,
}

/// Authentication settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthSpec {
    /// Who owns the `system.guest` role (default: Enabled)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_access: Option<GuestAccessMode>,

    /// Self-signed token settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_signed: Option<SelfSignedSpec>,
}

/// Self-signed token settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelfSignedSpec {
    /// Token issuer (default: operator.portworx.io)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    /// Token lifetime as a Go duration string (default: 24h)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_lifetime: Option<String>,
}

/// Guest access policy for the `system.guest` role
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum GuestAccessMode {
    /// Guests may call a fixed allowlist of services
    #[default]
    Enabled,
    /// Guests are denied everything
    Disabled,
    /// The role is owned by someone else; leave it alone
    Managed,
}

impl std::fmt::Display for GuestAccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuestAccessMode::Enabled => write!(f, "Enabled"),
            GuestAccessMode::Disabled => write!(f, "Disabled"),
            GuestAccessMode::Managed => write!(f, "Managed"),
        }
    }
}

/// StorageCluster status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageClusterStatus {
    /// Current phase as reported by the storage driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// Security policy as declared on a StorageCluster, with defaults applied
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesiredSecurityPolicy {
    /// Whether security is enabled at all
    pub enabled: bool,
    /// Guest role ownership
    pub guest_access_mode: GuestAccessMode,
    /// Issuer written into operator tokens
    pub jwt_issuer: String,
    /// Lifetime of operator tokens
    pub token_lifetime: Duration,
}

impl Default for DesiredSecurityPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            guest_access_mode: GuestAccessMode::default(),
            jwt_issuer: DEFAULT_SELF_SIGNED_ISSUER.to_string(),
            token_lifetime: Duration::from_secs(DEFAULT_TOKEN_LIFETIME_SECS),
        }
    }
}

impl DesiredSecurityPolicy {
    /// Read the policy off a cluster, filling in defaults for anything unset
    pub fn from_cluster(cluster: &StorageCluster) -> Result<Self, Error> {
        let mut policy = Self::default();
        let Some(security) = cluster.spec.security.as_ref() else {
            return Ok(policy);
        };
        policy.enabled = security.enabled;

        let Some(auth) = security.auth.as_ref() else {
            return Ok(policy);
        };
        if let Some(mode) = auth.guest_access {
            policy.guest_access_mode = mode;
        }

        if let Some(self_signed) = auth.self_signed.as_ref() {
            if let Some(issuer) = self_signed.issuer.as_deref().filter(|i| !i.is_empty()) {
                policy.jwt_issuer = issuer.to_string();
            }
            if let Some(lifetime) = self_signed.token_lifetime.as_deref() {
                policy.token_lifetime = parse_duration(lifetime).map_err(|e| {
                    Error::validation_for_field(
                        cluster.name_any(),
                        "spec.security.auth.selfSigned.tokenLifetime",
                        e.to_string(),
                    )
                })?;
            }
        }

        Ok(policy)
    }
}

impl StorageCluster {
    /// Whether the security component applies to this cluster
    pub fn security_enabled(&self) -> bool {
        self.spec.security.as_ref().is_some_and(|s| s.enabled)
    }

    /// Find an env entry by name
    pub fn env_entry(&self, name: &str) -> Option<&EnvVar> {
        self.spec.env.iter().find(|e| e.name == name)
    }
}
