//! Credential values and the secrets that hold them

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use zeroize::Zeroizing;

use bulwark_common::{LABEL_MANAGED_BY, LABEL_MANAGED_BY_BULWARK};

/// Data key under which every managed secret stores its value
pub const AUTH_SECRET_KEY: &str = "auth-secret";

/// Opaque credential bytes, wiped from memory on drop
///
/// Values are carried exactly as stored; no encoding is applied on the way
/// in or out.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(Zeroizing<Vec<u8>>);

impl SecretValue {
    /// Wrap raw bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Raw bytes of the value
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// True when the value holds no bytes
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of bytes in the value
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The value as UTF-8, if it is valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl From<String> for SecretValue {
    fn from(value: String) -> Self {
        Self::new(value.into_bytes())
    }
}

impl From<&str> for SecretValue {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretValue(<{} bytes redacted>)", self.0.len())
    }
}

/// A generated credential secret owned by a StorageCluster
#[derive(Clone, Debug)]
pub struct ManagedSecret {
    /// Secret name
    pub name: String,
    /// Secret namespace
    pub namespace: String,
    /// Value stored under [`AUTH_SECRET_KEY`]
    pub value: SecretValue,
}

impl ManagedSecret {
    /// Build the Kubernetes object for this secret, owned by `owner`
    pub fn to_secret(&self, owner: &OwnerReference) -> Secret {
        let mut data = BTreeMap::new();
        data.insert(
            AUTH_SECRET_KEY.to_string(),
            ByteString(self.value.as_bytes().to_vec()),
        );

        Secret {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(BTreeMap::from([(
                    LABEL_MANAGED_BY.to_string(),
                    LABEL_MANAGED_BY_BULWARK.to_string(),
                )])),
                owner_references: Some(vec![owner.clone()]),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            data: Some(data),
            ..Default::default()
        }
    }
}

/// Read a non-empty value out of a secret's data
pub fn secret_data_value(secret: &Secret, key: &str) -> Option<SecretValue> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .filter(|v| !v.0.is_empty())
        .map(|v| SecretValue::new(v.0.clone()))
}
