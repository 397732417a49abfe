//! # Persisted State
//!
//! The credential document kept for each instance: one [`ServiceAccount`] per
//! logical backend service plus the shared web-server session secret.
//!
//! The document is stored in a Secret that is deliberately not owned by the
//! instance, so deleting and recreating an instance keeps every database role,
//! broker user and encryption key it provisioned. See [`store`].
//!
//! Field names on the wire match documents written by earlier operator
//! releases; the descriptive names are accepted as aliases.

pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use store::{SecretStateStore, StateError, StateStore};

/// All provisioned credentials for one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    /// Credential bundles keyed by logical service name (`""` is the root database role)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub service_accounts: BTreeMap<String, ServiceAccount>,
    /// Session secret handed to the web server
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_secret: String,
}

impl PersistedState {
    /// Get the service account for `name`, creating an empty one on first use.
    ///
    /// Never calls out to any external system.
    pub fn ensure_account(&mut self, name: &str) -> &mut ServiceAccount {
        self.service_accounts.entry(name.to_string()).or_default()
    }

    /// Look up a service account without creating it.
    #[must_use]
    pub fn account(&self, name: &str) -> Option<&ServiceAccount> {
        self.service_accounts.get(name)
    }
}

/// Internal credential bundle for one logical backend service.
///
/// Empty strings mean "not yet generated".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub postgres_password: String,
    #[serde(
        default,
        rename = "pulsePassword",
        alias = "brokerPassword",
        skip_serializing_if = "String::is_empty"
    )]
    pub broker_password: String,
    /// Append-only list of encryption keys, oldest first
    #[serde(default, rename = "db_crypto_keys", alias = "cryptoKeys")]
    pub crypto_keys: Vec<CryptoKey>,
    /// Single key written by earlier releases, migrated into `crypto_keys` once
    #[serde(
        default,
        rename = "azure_crypto_key",
        alias = "legacyCryptoKey",
        skip_serializing_if = "Option::is_none"
    )]
    pub legacy_crypto_key: Option<String>,
}

/// Symmetric key used by services to encrypt data at rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoKey {
    /// Monotonic identifier derived from the creation time in unix seconds
    pub id: String,
    #[serde(rename = "algo", alias = "algorithm")]
    pub algorithm: String,
    /// Base64 encoded key material
    pub key: String,
}
