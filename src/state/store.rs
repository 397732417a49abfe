//! # State Store
//!
//! Durable storage for [`PersistedState`].
//!
//! [`SecretStateStore`] keeps the document under the `state` key of a Secret
//! named `<instance>-state`. The Secret is written with a forced server-side
//! apply and carries no owner reference: deleting the instance must not strand
//! credentials that already exist in the database and broker.

use super::PersistedState;
use crate::constants::{FIELD_MANAGER, STATE_SECRET_KEY, STATE_SECRET_SUFFIX};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, ObjectMeta, Patch, PatchParams};
use kube::Client;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StateError {
    /// The stored document cannot be decoded. Retrying will not help.
    #[error("persisted state in {location} is invalid: {error}")]
    Invalid {
        location: String,
        error: serde_json::Error,
    },
    /// Reading or writing the backing object failed.
    #[error("persisted state in {location} is not accessible: {error:#}")]
    Access {
        location: String,
        error: anyhow::Error,
    },
}

impl StateError {
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self, StateError::Invalid { .. })
    }
}

/// Load and save the persisted credential document of one instance.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the document. A missing document yields an empty state.
    async fn load(&self) -> Result<PersistedState, StateError>;

    /// Replace the stored document with `state`.
    async fn save(&self, state: &PersistedState) -> Result<(), StateError>;
}

/// [`StateStore`] backed by an unowned Secret next to the instance.
#[derive(Clone)]
pub struct SecretStateStore {
    api: Api<Secret>,
    namespace: String,
    name: String,
}

impl std::fmt::Debug for SecretStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStateStore")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl SecretStateStore {
    #[must_use]
    pub fn new(client: Client, namespace: &str, instance_name: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            name: secret_name(instance_name),
        }
    }

    fn location(&self) -> String {
        format!("secret {}/{}", self.namespace, self.name)
    }

    fn desired_secret(&self, state: &PersistedState) -> Result<Secret, StateError> {
        let raw = serde_json::to_vec(state).map_err(|error| StateError::Invalid {
            location: self.location(),
            error,
        })?;

        Ok(Secret {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([(
                STATE_SECRET_KEY.to_string(),
                ByteString(raw),
            )])),
            ..Secret::default()
        })
    }
}

/// Name of the Secret holding the state of `instance_name`.
#[must_use]
pub fn secret_name(instance_name: &str) -> String {
    format!("{instance_name}{STATE_SECRET_SUFFIX}")
}

/// Decode the state document found in a Secret's data.
///
/// A Secret without the state key is treated as empty state.
pub fn decode_secret_data(
    data: Option<&BTreeMap<String, ByteString>>,
) -> Result<PersistedState, serde_json::Error> {
    match data.and_then(|d| d.get(STATE_SECRET_KEY)) {
        Some(raw) => serde_json::from_slice(&raw.0),
        None => Ok(PersistedState::default()),
    }
}

#[async_trait]
impl StateStore for SecretStateStore {
    async fn load(&self) -> Result<PersistedState, StateError> {
        let secret = self
            .api
            .get_opt(&self.name)
            .await
            .map_err(|e| StateError::Access {
                location: self.location(),
                error: e.into(),
            })?;

        let Some(secret) = secret else {
            debug!("No state secret {} yet, starting empty", self.location());
            return Ok(PersistedState::default());
        };

        decode_secret_data(secret.data.as_ref()).map_err(|error| StateError::Invalid {
            location: self.location(),
            error,
        })
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StateError> {
        let secret = self.desired_secret(state)?;
        self.api
            .patch(
                &self.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&secret),
            )
            .await
            .map_err(|e| StateError::Access {
                location: self.location(),
                error: e.into(),
            })?;

        debug!(
            "Persisted state for {} service accounts to {}",
            state.service_accounts.len(),
            self.location()
        );
        Ok(())
    }
}
