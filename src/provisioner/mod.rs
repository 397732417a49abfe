//! # Credential Provisioner
//!
//! Creates and rotates the external identities every backend service needs:
//! a Postgres role, a RabbitMQ user, symmetric encryption keys and an internal
//! access token. Generated secrets live in the instance's [`PersistedState`].
//!
//! Every `ensure_*` operation is idempotent. Secrets are generated on first use
//! only, and the external confirmation calls (role create-or-alter, user
//! upsert, permission grant) are repeated on every pass so that drift on the
//! database or broker side is repaired.
//!
//! A pass ([`CredentialProvisioner::run`]) works on a copy of the state and
//! stops at the first external failure. The caller's state only changes when
//! the whole pass succeeds, so a failed pass never persists half-provisioned
//! credentials.

pub mod broker;
pub mod catalog;
pub mod postgres;

pub use broker::RabbitMqAdmin;
pub use catalog::ServiceCatalog;
pub use postgres::{PostgresConnector, PostgresEndpoint};

use crate::constants::{
    ACCESS_TOKEN_PREFIX, ACCESS_TOKEN_RANDOM_LENGTH, CRYPTO_KEY_ALGORITHM, CRYPTO_KEY_LENGTH,
    PASSWORD_LENGTH, SESSION_SECRET_LENGTH,
};
use crate::crd::StaticAccessToken;
use crate::observability::metrics;
use crate::pwgen;
use crate::state::{CryptoKey, PersistedState, ServiceAccount, StateError, StateStore};
use async_trait::async_trait;
use base64::Engine;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },
    #[error("database access for service {service:?} failed: {error:#}")]
    Database {
        service: String,
        error: anyhow::Error,
    },
    #[error("messaging access for service {service:?} failed: {error:#}")]
    Messaging {
        service: String,
        error: anyhow::Error,
    },
    #[error(transparent)]
    State(#[from] StateError),
}

impl ProvisionError {
    /// Only an unreadable state document is permanent; every external failure
    /// is retried on a later pass.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self, ProvisionError::State(e) if e.is_permanent())
    }
}

/// Opens an admin session on the database server.
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    async fn connect(&self) -> anyhow::Result<Box<dyn DatabaseSession>>;
}

/// An open admin session, reused for every role of one pass.
#[async_trait]
pub trait DatabaseSession: Send {
    async fn role_exists(&mut self, role: &str) -> anyhow::Result<bool>;
    async fn create_role(&mut self, role: &str, password: &str) -> anyhow::Result<()>;
    async fn alter_role_password(&mut self, role: &str, password: &str) -> anyhow::Result<()>;
    async fn close(self: Box<Self>) -> anyhow::Result<()>;
}

/// Configure, write and read patterns of a broker user on one vhost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Permissions {
    pub configure: String,
    pub write: String,
    pub read: String,
}

impl Permissions {
    #[must_use]
    pub fn full() -> Self {
        Self {
            configure: ".*".to_string(),
            write: ".*".to_string(),
            read: ".*".to_string(),
        }
    }
}

/// Message broker administration.
#[async_trait]
pub trait BrokerAdmin: Send + Sync {
    async fn ensure_vhost(&self, vhost: &str) -> anyhow::Result<()>;
    async fn put_user(&self, username: &str, password: &str) -> anyhow::Result<()>;
    async fn grant_permissions(
        &self,
        vhost: &str,
        username: &str,
        permissions: &Permissions,
    ) -> anyhow::Result<()>;
}

/// Naming and limits for one instance.
#[derive(Debug, Clone)]
pub struct ProvisionerSettings {
    /// Postgres role prefix; the root service uses the bare prefix
    pub role_prefix: String,
    /// Broker vhost shared by every service of the instance
    pub vhost: String,
    pub database_timeout: Duration,
    pub broker_timeout: Duration,
}

/// Role name of `service`: `<prefix>_<service>`, or the bare prefix for the root service.
#[must_use]
pub fn database_role(prefix: &str, service: &str) -> String {
    if service.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}_{service}")
    }
}

/// Broker user of `service` on `vhost`.
#[must_use]
pub fn messaging_username(vhost: &str, service: &str) -> String {
    format!("{vhost}-taskcluster-{}", catalog::dash_name(service))
}

/// Client id under which `service` is registered with the auth service.
#[must_use]
pub fn static_client_id(service: &str) -> String {
    format!("static/taskcluster/{}", catalog::dash_name(service))
}

/// Id for a key appended after `keys`: the current unix time, kept strictly
/// above the newest existing id.
#[must_use]
pub fn next_key_id(keys: &[CryptoKey], now_unix: i64) -> String {
    let newest = keys
        .iter()
        .filter_map(|k| k.id.parse::<i64>().ok())
        .max();
    match newest {
        Some(newest) if newest >= now_unix => (newest + 1).to_string(),
        _ => now_unix.to_string(),
    }
}

/// Runs the provisioning operations of one pass.
pub struct CredentialProvisioner<'a> {
    settings: ProvisionerSettings,
    database: &'a dyn DatabaseConnector,
    broker: &'a dyn BrokerAdmin,
    session: Option<Box<dyn DatabaseSession>>,
}

impl std::fmt::Debug for CredentialProvisioner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialProvisioner")
            .field("settings", &self.settings)
            .field("connected", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

impl<'a> CredentialProvisioner<'a> {
    #[must_use]
    pub fn new(
        settings: ProvisionerSettings,
        database: &'a dyn DatabaseConnector,
        broker: &'a dyn BrokerAdmin,
    ) -> Self {
        Self {
            settings,
            database,
            broker,
            session: None,
        }
    }

    /// Get or create the account of `name`. Purely local.
    pub fn ensure_account<'s>(state: &'s mut PersistedState, name: &str) -> &'s mut ServiceAccount {
        state.ensure_account(name)
    }

    async fn with_timeout<T, F>(
        operation: &str,
        after: Duration,
        future: F,
    ) -> Result<T, ProvisionError>
    where
        F: Future<Output = Result<T, ProvisionError>>,
    {
        tokio::time::timeout(after, future)
            .await
            .map_err(|_| ProvisionError::Timeout {
                operation: operation.to_string(),
                after,
            })?
    }

    async fn session(&mut self) -> anyhow::Result<&mut Box<dyn DatabaseSession>> {
        if self.session.is_none() {
            info!("Connecting to database server");
            self.session = Some(self.database.connect().await?);
        }
        self.session
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("database session unavailable"))
    }

    /// Make sure `name` has a Postgres role whose password matches the stored one.
    pub async fn ensure_database_access(
        &mut self,
        state: &mut PersistedState,
        name: &str,
    ) -> Result<(), ProvisionError> {
        let role = database_role(&self.settings.role_prefix, name);
        let account = state.ensure_account(name);
        if account.postgres_password.is_empty() {
            account.postgres_password = pwgen::alphanumeric(PASSWORD_LENGTH);
        }
        let password = account.postgres_password.clone();
        let timeout = self.settings.database_timeout;

        let outcome = Self::with_timeout(&format!("database role {role}"), timeout, async {
            let database_error = |error| ProvisionError::Database {
                service: name.to_string(),
                error,
            };
            let session = self.session().await.map_err(database_error)?;
            let exists = session.role_exists(&role).await.map_err(database_error)?;
            if exists {
                session
                    .alter_role_password(&role, &password)
                    .await
                    .map_err(database_error)?;
            } else {
                info!("Creating database role {}", role);
                session
                    .create_role(&role, &password)
                    .await
                    .map_err(database_error)?;
            }
            Ok(())
        })
        .await;

        metrics::record_credential_operation("database", outcome.is_ok());
        outcome
    }

    /// Make sure `name` has a broker user with full permissions on the vhost.
    pub async fn ensure_messaging_access(
        &mut self,
        state: &mut PersistedState,
        name: &str,
    ) -> Result<(), ProvisionError> {
        let vhost = self.settings.vhost.clone();
        let username = messaging_username(&vhost, name);
        let account = state.ensure_account(name);
        if account.broker_password.is_empty() {
            account.broker_password = pwgen::alphanumeric(PASSWORD_LENGTH);
        }
        let password = account.broker_password.clone();
        let broker = self.broker;

        let outcome = Self::with_timeout(
            &format!("broker user {username}"),
            self.settings.broker_timeout,
            async {
                let messaging_error = |error| ProvisionError::Messaging {
                    service: name.to_string(),
                    error,
                };
                broker
                    .put_user(&username, &password)
                    .await
                    .map_err(messaging_error)?;
                broker
                    .grant_permissions(&vhost, &username, &Permissions::full())
                    .await
                    .map_err(messaging_error)?;
                Ok(())
            },
        )
        .await;

        metrics::record_credential_operation("messaging", outcome.is_ok());
        outcome
    }

    /// Migrate a legacy key into the key list, then make sure at least one key exists.
    ///
    /// Existing keys are never removed or changed.
    pub fn ensure_encryption_keys(state: &mut PersistedState, name: &str) {
        let now = chrono::Utc::now().timestamp();
        let account = state.ensure_account(name);

        if let Some(legacy) = account.legacy_crypto_key.take() {
            if !legacy.is_empty() {
                debug!("Migrating legacy encryption key of service {:?}", name);
                let id = next_key_id(&account.crypto_keys, now);
                account.crypto_keys.push(CryptoKey {
                    id,
                    algorithm: CRYPTO_KEY_ALGORITHM.to_string(),
                    key: legacy,
                });
            }
        }

        if account.crypto_keys.is_empty() {
            let raw = pwgen::alphanumeric(CRYPTO_KEY_LENGTH);
            account.crypto_keys.push(CryptoKey {
                id: next_key_id(&account.crypto_keys, now),
                algorithm: CRYPTO_KEY_ALGORITHM.to_string(),
                key: base64::engine::general_purpose::STANDARD.encode(raw),
            });
        }
    }

    /// Generate the access token of `name` on first use.
    pub fn ensure_access_token(state: &mut PersistedState, name: &str) {
        let account = state.ensure_account(name);
        if account.access_token.is_empty() {
            account.access_token = format!(
                "{ACCESS_TOKEN_PREFIX}{}",
                pwgen::alphanumeric(ACCESS_TOKEN_RANDOM_LENGTH)
            );
        }
    }

    /// The client registration of `name` with the auth service.
    pub fn ensure_static_identity(state: &mut PersistedState, name: &str) -> StaticAccessToken {
        Self::ensure_access_token(state, name);
        let access_token = state.ensure_account(name).access_token.clone();
        StaticAccessToken {
            client_id: static_client_id(name),
            access_token,
            description: None,
            scopes: Vec::new(),
        }
    }

    /// Client registrations of every access-token service of `catalog`, in
    /// catalog order.
    pub fn static_identities(
        state: &mut PersistedState,
        catalog: &ServiceCatalog,
    ) -> Vec<StaticAccessToken> {
        catalog
            .access_token
            .iter()
            .map(|service| Self::ensure_static_identity(state, service))
            .collect()
    }

    pub fn ensure_session_secret(state: &mut PersistedState) {
        if state.session_secret.is_empty() {
            state.session_secret = pwgen::alphanumeric(SESSION_SECRET_LENGTH);
        }
    }

    /// Provision every service of `catalog`.
    ///
    /// `state` is only replaced when every step succeeded.
    pub async fn run(
        &mut self,
        catalog: &ServiceCatalog,
        state: &mut PersistedState,
    ) -> Result<(), ProvisionError> {
        let mut working = state.clone();
        let outcome = self.run_pass(catalog, &mut working).await;
        self.close().await;

        outcome?;
        *state = working;
        Ok(())
    }

    async fn run_pass(
        &mut self,
        catalog: &ServiceCatalog,
        state: &mut PersistedState,
    ) -> Result<(), ProvisionError> {
        let vhost = self.settings.vhost.clone();
        let broker = self.broker;
        Self::with_timeout(
            &format!("broker vhost {vhost}"),
            self.settings.broker_timeout,
            async {
                broker
                    .ensure_vhost(&vhost)
                    .await
                    .map_err(|error| ProvisionError::Messaging {
                        service: String::new(),
                        error,
                    })
            },
        )
        .await?;

        Self::ensure_session_secret(state);

        for service in &catalog.database {
            self.ensure_database_access(state, service).await?;
        }
        for service in &catalog.messaging {
            self.ensure_messaging_access(state, service).await?;
        }
        for service in &catalog.encryption {
            Self::ensure_encryption_keys(state, service);
        }
        for service in &catalog.access_token {
            Self::ensure_access_token(state, service);
        }

        info!(
            "Provisioned credentials for {} services",
            state.service_accounts.len()
        );
        Ok(())
    }

    /// Load the state, run a pass and persist the result.
    pub async fn provision(
        &mut self,
        store: &dyn StateStore,
        catalog: &ServiceCatalog,
    ) -> Result<PersistedState, ProvisionError> {
        let mut state = store.load().await?;
        self.run(catalog, &mut state).await?;
        store.save(&state).await?;
        Ok(state)
    }

    /// Close the cached database session, if any.
    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!("Failed to close database session: {:#}", e);
            }
        }
    }
}
