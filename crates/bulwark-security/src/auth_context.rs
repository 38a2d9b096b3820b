//! Outbound call authentication
//!
//! Builds the context for a call to the storage API: a deadline plus, when
//! security is enabled and the admin secret resolves, an
//! `authorization: bearer <token>` header.

use std::time::Duration;

use k8s_openapi::api::core::v1::EnvVar;
use tonic::metadata::{AsciiMetadataValue, MetadataMap};
use tracing::{debug, warn};

use bulwark_common::crd::DesiredSecurityPolicy;
use bulwark_common::{Error, ENV_AUTH_JWT_ISSUER, ENV_AUTH_JWT_SHARED_SECRET};

use crate::env::EnvResolver;
use crate::token::TokenIssuer;

/// Metadata key carrying the bearer token
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Per-call metadata and deadline
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    metadata: MetadataMap,
    timeout: Option<Duration>,
}

impl CallContext {
    /// An empty context with no deadline
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty context with the given deadline
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            metadata: MetadataMap::new(),
            timeout: Some(timeout),
        }
    }

    /// Deadline of the call, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The authorization header value, if one is attached
    pub fn authorization(&self) -> Option<&str> {
        self.metadata
            .get(AUTHORIZATION_HEADER)
            .and_then(|v| v.to_str().ok())
    }

    /// Metadata sent with the call
    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    /// Wrap `message` in a request carrying this context
    pub fn into_request<T>(self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        *request.metadata_mut() = self.metadata;
        if let Some(timeout) = self.timeout {
            request.set_timeout(timeout);
        }
        request
    }
}

/// What to do when security is enabled but no admin credential resolves
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BootstrapAuth {
    /// Proceed without an authorization header
    ///
    /// On a fresh cluster the guest role is converged before the admin secret
    /// is generated, so the first pass has nothing to sign with.
    #[default]
    AllowAnonymous,
    /// Fail with `CredentialUnavailable`
    RequireCredential,
}

/// Attaches operator tokens to outbound call contexts
#[derive(Clone)]
pub struct AuthContextBuilder {
    resolver: EnvResolver,
    issuer: TokenIssuer,
    bootstrap: BootstrapAuth,
}

impl AuthContextBuilder {
    /// Create a builder
    pub fn new(resolver: EnvResolver, bootstrap: BootstrapAuth) -> Self {
        Self {
            resolver,
            issuer: TokenIssuer,
            bootstrap,
        }
    }

    /// Authenticate `ctx` for a cluster with `policy` and env list `env`
    pub async fn build(
        &self,
        policy: &DesiredSecurityPolicy,
        env: &[EnvVar],
        namespace: &str,
        mut ctx: CallContext,
    ) -> Result<CallContext, Error> {
        if !policy.enabled {
            return Ok(ctx);
        }

        let secret = self
            .resolver
            .resolve_entry(env, ENV_AUTH_JWT_SHARED_SECRET, namespace)
            .await
            .map_err(credential_error)?;
        let Some(secret) = secret else {
            return match self.bootstrap {
                BootstrapAuth::AllowAnonymous => {
                    warn!(namespace = %namespace, "admin secret not available yet, calling storage API without a token");
                    Ok(ctx)
                }
                BootstrapAuth::RequireCredential => Err(Error::CredentialUnavailable(format!(
                    "{ENV_AUTH_JWT_SHARED_SECRET} does not resolve to a value in {namespace}"
                ))),
            };
        };

        let issuer = self
            .resolver
            .resolve_entry(env, ENV_AUTH_JWT_ISSUER, namespace)
            .await
            .map_err(credential_error)?
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| policy.jwt_issuer.clone());

        let token = self.issuer.issue(&issuer, &secret, policy.token_lifetime)?;
        let value: AsciiMetadataValue = format!("bearer {}", token.as_str())
            .parse()
            .map_err(|_| Error::Signing("token is not a valid header value".to_string()))?;
        ctx.metadata.insert(AUTHORIZATION_HEADER, value);

        debug!(namespace = %namespace, issuer = %issuer, "attached operator token");
        Ok(ctx)
    }
}

// A credential that is referenced but cannot be read is unavailable; store
// and transport errors keep their own classification.
fn credential_error(e: Error) -> Error {
    match e {
        Error::NotFound { .. } | Error::Validation { .. } => {
            Error::CredentialUnavailable(e.to_string())
        }
        other => other,
    }
}
