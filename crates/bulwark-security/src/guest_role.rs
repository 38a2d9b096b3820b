//! Guest role convergence
//!
//! Maps the cluster's guest access mode onto the `system.guest` role and
//! pushes the full definition to the storage API. The role is always sent in
//! full; the remote side replaces whatever it had.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::EnvVar;
use tracing::{debug, info};

use bulwark_common::crd::{DesiredSecurityPolicy, GuestAccessMode};
use bulwark_common::Error;
use bulwark_proto::{SdkRole, SdkRoleUpdateRequest, SdkRule};

use crate::auth_context::{AuthContextBuilder, CallContext};
use crate::connection::ConnectionProvider;

/// Role applied to unauthenticated callers
pub const GUEST_ROLE_NAME: &str = "system.guest";

/// Services guests may fully use when guest access is enabled
const GUEST_SERVICES: [&str; 4] = ["mountattach", "volume", "cloudbackup", "migrate"];

fn rule(services: &[&str], apis: &[&str]) -> SdkRule {
    SdkRule {
        services: services.iter().map(|s| s.to_string()).collect(),
        apis: apis.iter().map(|a| a.to_string()).collect(),
    }
}

/// The role to push for `mode`; `None` when the role is externally managed
pub fn guest_role(mode: GuestAccessMode) -> Option<SdkRole> {
    let rules = match mode {
        GuestAccessMode::Managed => return None,
        GuestAccessMode::Enabled => vec![
            rule(&GUEST_SERVICES, &["*"]),
            rule(&["identity"], &["version"]),
        ],
        GuestAccessMode::Disabled => vec![rule(&["!*"], &["!*"])],
    };
    Some(SdkRole {
        name: GUEST_ROLE_NAME.to_string(),
        rules,
    })
}

/// Pushes the guest role for a cluster
#[derive(Clone)]
pub struct GuestRoleConverger {
    connections: Arc<dyn ConnectionProvider>,
    auth: AuthContextBuilder,
    call_timeout: Duration,
}

impl GuestRoleConverger {
    /// Create a converger
    pub fn new(
        connections: Arc<dyn ConnectionProvider>,
        auth: AuthContextBuilder,
        call_timeout: Duration,
    ) -> Self {
        Self {
            connections,
            auth,
            call_timeout,
        }
    }

    /// Converge the guest role; returns whether an update was sent
    pub async fn converge(
        &self,
        policy: &DesiredSecurityPolicy,
        env: &[EnvVar],
        namespace: &str,
    ) -> Result<bool, Error> {
        let Some(role) = guest_role(policy.guest_access_mode) else {
            debug!(namespace = %namespace, "guest role is externally managed, leaving it");
            return Ok(false);
        };

        let update = async {
            let ctx = self
                .auth
                .build(
                    policy,
                    env,
                    namespace,
                    CallContext::with_timeout(self.call_timeout),
                )
                .await?;
            let api = self.connections.role_api(namespace).await?;
            api.update_role(ctx.into_request(SdkRoleUpdateRequest { role: Some(role) }))
                .await
        };

        // One deadline covers the credential reads and the RPC
        tokio::time::timeout(self.call_timeout, update)
            .await
            .map_err(|_| Error::timeout("guest role update", self.call_timeout))??;

        info!(
            namespace = %namespace,
            mode = %policy.guest_access_mode,
            "updated {GUEST_ROLE_NAME} role"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth_context::BootstrapAuth;
    use crate::connection::{MockConnectionProvider, MockRoleApi, RoleApi};
    use crate::env::{EnvResolver, IndirectValue};
    use crate::secret::AUTH_SECRET_KEY;
    use crate::store::MockObjectStore;
    use crate::testing::{RecordingRoleApi, StalledStore, StaticConnections};
    use bulwark_common::ENV_AUTH_JWT_SHARED_SECRET;

    fn auth() -> AuthContextBuilder {
        AuthContextBuilder::new(
            EnvResolver::new(Arc::new(MockObjectStore::new())),
            BootstrapAuth::AllowAnonymous,
        )
    }

    fn policy(mode: GuestAccessMode) -> DesiredSecurityPolicy {
        DesiredSecurityPolicy {
            guest_access_mode: mode,
            ..Default::default()
        }
    }

    #[test]
    fn enabled_role_allows_fixed_service_list() {
        let role = guest_role(GuestAccessMode::Enabled).unwrap();
        assert_eq!(role.name, "system.guest");
        assert_eq!(role.rules.len(), 2);
        assert_eq!(
            role.rules[0].services,
            vec!["mountattach", "volume", "cloudbackup", "migrate"]
        );
        assert_eq!(role.rules[0].apis, vec!["*"]);
        assert_eq!(role.rules[1].services, vec!["identity"]);
        assert_eq!(role.rules[1].apis, vec!["version"]);
    }

    #[test]
    fn disabled_role_denies_everything() {
        let role = guest_role(GuestAccessMode::Disabled).unwrap();
        assert_eq!(role.rules, vec![rule(&["!*"], &["!*"])]);
    }

    #[test]
    fn managed_mode_has_no_role() {
        assert!(guest_role(GuestAccessMode::Managed).is_none());
    }

    #[tokio::test]
    async fn managed_mode_issues_no_calls() {
        // No expectations: any connection request panics
        let converger = GuestRoleConverger::new(
            Arc::new(MockConnectionProvider::new()),
            auth(),
            Duration::from_secs(5),
        );
        let sent = converger
            .converge(&policy(GuestAccessMode::Managed), &[], "ns")
            .await
            .unwrap();
        assert!(!sent);
    }

    #[tokio::test]
    async fn disabled_mode_sends_deny_all_role() {
        let roles = Arc::new(RecordingRoleApi::default());
        let converger = GuestRoleConverger::new(
            Arc::new(StaticConnections::new(roles.clone())),
            auth(),
            Duration::from_secs(5),
        );

        let sent = converger
            .converge(&policy(GuestAccessMode::Disabled), &[], "ns")
            .await
            .unwrap();
        assert!(sent);

        let calls = roles.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].role, guest_role(GuestAccessMode::Disabled));
    }

    #[tokio::test]
    async fn rpc_errors_propagate() {
        let mut api = MockRoleApi::new();
        api.expect_update_role()
            .times(1)
            .returning(|_| Err(Error::from_status(tonic::Status::permission_denied("guest"))));
        let api: Arc<dyn RoleApi> = Arc::new(api);

        let mut connections = MockConnectionProvider::new();
        connections
            .expect_role_api()
            .returning(move |_| Ok(api.clone()));

        let converger =
            GuestRoleConverger::new(Arc::new(connections), auth(), Duration::from_secs(5));
        let err = converger
            .converge(&policy(GuestAccessMode::Enabled), &[], "ns")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[tokio::test]
    async fn request_carries_call_deadline() {
        let mut api = MockRoleApi::new();
        api.expect_update_role()
            .withf(|req| req.metadata().get("grpc-timeout").is_some())
            .times(1)
            .returning(|_| Ok(()));
        let api: Arc<dyn RoleApi> = Arc::new(api);

        let mut connections = MockConnectionProvider::new();
        connections
            .expect_role_api()
            .returning(move |_| Ok(api.clone()));

        let converger =
            GuestRoleConverger::new(Arc::new(connections), auth(), Duration::from_secs(5));
        assert!(converger
            .converge(&policy(GuestAccessMode::Enabled), &[], "ns")
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_times_out() {
        let roles = Arc::new(RecordingRoleApi::hanging());
        let converger = GuestRoleConverger::new(
            Arc::new(StaticConnections::new(roles)),
            auth(),
            Duration::from_secs(5),
        );

        let err = converger
            .converge(&policy(GuestAccessMode::Enabled), &[], "ns")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_credential_read_times_out() {
        let roles = Arc::new(RecordingRoleApi::default());
        let converger = GuestRoleConverger::new(
            Arc::new(StaticConnections::new(roles.clone())),
            AuthContextBuilder::new(
                EnvResolver::new(Arc::new(StalledStore)),
                BootstrapAuth::AllowAnonymous,
            ),
            Duration::from_secs(5),
        );
        let env = vec![IndirectValue::SecretRef {
            name: "px-admin".to_string(),
            key: AUTH_SECRET_KEY.to_string(),
        }
        .to_env_var(ENV_AUTH_JWT_SHARED_SECRET)];

        let err = converger
            .converge(&policy(GuestAccessMode::Enabled), &env, "ns")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert!(roles.calls().is_empty());
    }
}
