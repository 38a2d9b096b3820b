//! Env indirection resolution
//!
//! A StorageCluster's env list doubles as the place where credentials are
//! bound. Each entry is either a literal, a reference into a Secret, or a
//! reference into a ConfigMap. Resolution reads the referenced object once and
//! never writes.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{
    ConfigMapKeySelector, EnvVar, EnvVarSource, SecretKeySelector,
};
use tracing::debug;

use bulwark_common::Error;

use crate::secret::{secret_data_value, SecretValue};
use crate::store::ObjectStore;

/// One named configuration value, before resolution
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndirectValue {
    /// Value carried inline
    Literal(String),
    /// Value stored under `key` in Secret `name`
    SecretRef {
        /// Secret name
        name: String,
        /// Data key
        key: String,
    },
    /// Value stored under `key` in ConfigMap `name`
    ConfigRef {
        /// ConfigMap name
        name: String,
        /// Data key
        key: String,
    },
}

impl IndirectValue {
    /// Classify an env entry
    ///
    /// Field and resource references cannot carry a credential and are
    /// rejected.
    pub fn from_env_var(entry: &EnvVar) -> Result<Self, Error> {
        let Some(source) = entry.value_from.as_ref() else {
            return Ok(Self::Literal(entry.value.clone().unwrap_or_default()));
        };

        if let Some(selector) = source.secret_key_ref.as_ref() {
            let name: Option<String> = selector.name.clone().into();
            return Ok(Self::SecretRef {
                name: name.unwrap_or_default(),
                key: selector.key.clone(),
            });
        }
        if let Some(selector) = source.config_map_key_ref.as_ref() {
            let name: Option<String> = selector.name.clone().into();
            return Ok(Self::ConfigRef {
                name: name.unwrap_or_default(),
                key: selector.key.clone(),
            });
        }

        Err(Error::validation(format!(
            "env entry {} must be a literal, secretKeyRef, or configMapKeyRef",
            entry.name
        )))
    }

    /// Build the env entry `name` carrying this value
    pub fn to_env_var(&self, name: &str) -> EnvVar {
        match self {
            Self::Literal(value) => EnvVar {
                name: name.to_string(),
                value: Some(value.clone()),
                value_from: None,
            },
            Self::SecretRef { name: secret, key } => EnvVar {
                name: name.to_string(),
                value: None,
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: secret.clone().into(),
                        key: key.clone(),
                        optional: None,
                    }),
                    ..Default::default()
                }),
            },
            Self::ConfigRef { name: config, key } => EnvVar {
                name: name.to_string(),
                value: None,
                value_from: Some(EnvVarSource {
                    config_map_key_ref: Some(ConfigMapKeySelector {
                        name: config.clone().into(),
                        key: key.clone(),
                        optional: None,
                    }),
                    ..Default::default()
                }),
            },
        }
    }
}

/// Find an env entry by name
pub fn find_entry<'a>(entries: &'a [EnvVar], name: &str) -> Option<&'a EnvVar> {
    entries.iter().find(|e| e.name == name)
}

/// Resolves [`IndirectValue`]s against the object store
#[derive(Clone)]
pub struct EnvResolver {
    store: Arc<dyn ObjectStore>,
}

impl EnvResolver {
    /// Create a resolver reading through `store`
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Resolve a value in `namespace`
    ///
    /// Literals are returned unchanged without touching the store. A missing
    /// object, a missing key, or an empty value is `NotFound`.
    pub async fn resolve(&self, value: &IndirectValue, namespace: &str) -> Result<SecretValue, Error> {
        match value {
            IndirectValue::Literal(literal) => Ok(SecretValue::from(literal.as_str())),
            IndirectValue::SecretRef { name, key } => {
                let secret = self
                    .store
                    .get_secret(name, namespace)
                    .await?
                    .ok_or_else(|| Error::secret_not_found(name, namespace))?;
                debug!(secret = %name, namespace = %namespace, key = %key, "resolving secret reference");
                secret_data_value(&secret, key)
                    .ok_or_else(|| Error::key_not_found("Secret", name, namespace, key))
            }
            IndirectValue::ConfigRef { name, key } => {
                let config_map = self
                    .store
                    .get_config_map(name, namespace)
                    .await?
                    .ok_or_else(|| Error::config_map_not_found(name, namespace))?;
                debug!(config_map = %name, namespace = %namespace, key = %key, "resolving config map reference");

                let text = config_map
                    .data
                    .as_ref()
                    .and_then(|d| d.get(key))
                    .filter(|v| !v.is_empty())
                    .map(|v| SecretValue::from(v.as_str()));
                let binary = || {
                    config_map
                        .binary_data
                        .as_ref()
                        .and_then(|d| d.get(key))
                        .filter(|v| !v.0.is_empty())
                        .map(|v| SecretValue::new(v.0.clone()))
                };
                text.or_else(binary)
                    .ok_or_else(|| Error::key_not_found("ConfigMap", name, namespace, key))
            }
        }
    }

    /// Resolve the entry `name` from `entries`
    ///
    /// `None` when there is no such entry or it is an empty literal.
    pub async fn resolve_entry(
        &self,
        entries: &[EnvVar],
        name: &str,
        namespace: &str,
    ) -> Result<Option<SecretValue>, Error> {
        let Some(entry) = find_entry(entries, name) else {
            return Ok(None);
        };
        let value = self
            .resolve(&IndirectValue::from_env_var(entry)?, namespace)
            .await?;
        Ok(Some(value).filter(|v| !v.is_empty()))
    }
}
