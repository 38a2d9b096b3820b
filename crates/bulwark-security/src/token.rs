//! Operator bearer tokens
//!
//! Tokens are HS256 JWTs signed with the admin shared secret. Only the issuer
//! and expiry vary; the identity and scope are fixed to the operator's own
//! administrative identity. Tokens are minted per call and never stored.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use bulwark_common::Error;

use crate::secret::SecretValue;

/// Subject and email of operator tokens
pub const OPERATOR_SUBJECT: &str = "operator@portworx.io";

/// Display name of operator tokens
pub const OPERATOR_NAME: &str = "operator communications";

/// Role granted to operator tokens
pub const OPERATOR_ROLE: &str = "system.admin";

/// Group granted to operator tokens
pub const OPERATOR_GROUP: &str = "*";

/// Claims carried by an operator token
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorClaims {
    /// Issuer
    pub iss: String,
    /// Subject
    pub sub: String,
    /// Display name
    pub name: String,
    /// Email
    pub email: String,
    /// Roles
    pub roles: Vec<String>,
    /// Groups
    pub groups: Vec<String>,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expires at (unix seconds)
    pub exp: i64,
}

impl OperatorClaims {
    /// Claims for a token issued by `issuer` at `now`, valid for `lifetime`
    pub fn new(issuer: &str, now: DateTime<Utc>, lifetime: Duration) -> Result<Self, Error> {
        let lifetime = i64::try_from(lifetime.as_secs())
            .map_err(|_| Error::Signing(format!("token lifetime {lifetime:?} out of range")))?;
        let iat = now.timestamp();
        let exp = iat
            .checked_add(lifetime)
            .ok_or_else(|| Error::Signing("token expiry overflows".to_string()))?;

        Ok(Self {
            iss: issuer.to_string(),
            sub: OPERATOR_SUBJECT.to_string(),
            name: OPERATOR_NAME.to_string(),
            email: OPERATOR_SUBJECT.to_string(),
            roles: vec![OPERATOR_ROLE.to_string()],
            groups: vec![OPERATOR_GROUP.to_string()],
            iat,
            exp,
        })
    }
}

/// A signed token; the value is never printed
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    /// The encoded JWT
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

/// Mints operator tokens
#[derive(Clone, Copy, Debug, Default)]
pub struct TokenIssuer;

impl TokenIssuer {
    /// Issue a token valid from now for `lifetime`
    pub fn issue(
        &self,
        issuer: &str,
        shared_secret: &SecretValue,
        lifetime: Duration,
    ) -> Result<BearerToken, Error> {
        self.issue_at(Utc::now(), issuer, shared_secret, lifetime)
    }

    /// Issue a token as if the current time were `now`
    pub fn issue_at(
        &self,
        now: DateTime<Utc>,
        issuer: &str,
        shared_secret: &SecretValue,
        lifetime: Duration,
    ) -> Result<BearerToken, Error> {
        if shared_secret.is_empty() {
            return Err(Error::Signing("shared secret is empty".to_string()));
        }

        let claims = OperatorClaims::new(issuer, now, lifetime)?;
        let key = EncodingKey::from_secret(shared_secret.as_bytes());
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &key)
            .map(BearerToken)
            .map_err(|e| Error::Signing(e.to_string()))
    }
}
