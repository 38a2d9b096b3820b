//! Operator configuration from flags and environment

use std::time::Duration;

use clap::Args;

use bulwark_common::telemetry::LogConfig;
use bulwark_security::{BootstrapAuth, SecurityConfig};

/// Runtime configuration of the operator
#[derive(Args, Clone, Debug)]
pub struct OperatorConfig {
    /// Only watch StorageClusters in this namespace (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Deadline in seconds for each call to the API server or storage API
    #[arg(long, env = "BULWARK_CALL_TIMEOUT_SECS", default_value_t = 30)]
    pub call_timeout_secs: u64,

    /// Fail guest role updates instead of sending them unauthenticated while
    /// the admin secret does not exist yet
    #[arg(long, env = "BULWARK_REQUIRE_AUTH_FOR_GUEST_ROLE")]
    pub require_auth_for_guest_role: bool,

    /// Emit logs as JSON
    #[arg(long, env = "BULWARK_LOG_JSON")]
    pub log_json: bool,
}

impl OperatorConfig {
    /// Settings for the security reconciler
    pub fn security_config(&self) -> SecurityConfig {
        SecurityConfig {
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            bootstrap_auth: if self.require_auth_for_guest_role {
                BootstrapAuth::RequireCredential
            } else {
                BootstrapAuth::AllowAnonymous
            },
        }
    }

    /// Settings for logging
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            json: self.log_json,
        }
    }
}
