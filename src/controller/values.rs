//! # Chart Values
//!
//! Assembles the values document handed to the Taskcluster chart.
//!
//! Each concern has its own record ([`DatabaseAccess`], [`MessagingAccess`],
//! [`EncryptionConfig`], [`ServiceAccess`]) and each service's config is a
//! struct flattening the records it needs. The key names are the ones the
//! chart reads.

use crate::crd::{InstanceSpec, StaticAccessToken};
use crate::provisioner::{
    database_role, messaging_username, PostgresEndpoint,
};
use crate::state::{CryptoKey, PersistedState};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseAccess {
    pub read_db_url: String,
    pub write_db_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessagingAccess {
    pub pulse_username: String,
    pub pulse_password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EncryptionConfig {
    pub db_crypto_keys: Vec<CryptoKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceAccess {
    pub taskcluster_access_token: String,
}

#[derive(Clone, Default, PartialEq, Eq, Serialize)]
pub struct AwsAccess {
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
}

impl std::fmt::Debug for AwsAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsAccess")
            .field("aws_access_key_id", &self.aws_access_key_id)
            .field("aws_secret_access_key", &"***")
            .finish()
    }
}

/// GitHub App credentials of the github service.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct GitHubCredentials {
    pub app_id: String,
    pub private_pem: String,
    /// Every `webhook-secret*` entry, each single-quoted, concatenated in key order
    pub webhook_secret: String,
}

impl std::fmt::Debug for GitHubCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubCredentials")
            .field("app_id", &self.app_id)
            .finish_non_exhaustive()
    }
}

/// Credentials of outside services, read from Secrets the instance references.
/// An unreferenced Secret leaves its part empty.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Integrations {
    pub aws: AwsAccess,
    pub azure_accounts: BTreeMap<String, String>,
    pub github: GitHubCredentials,
    pub websocktunnel_secret: String,
}

impl std::fmt::Debug for Integrations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Integrations")
            .field("aws", &self.aws)
            .field("azure_accounts", &self.azure_accounts.keys().collect::<Vec<_>>())
            .field("github", &self.github)
            .finish_non_exhaustive()
    }
}

fn text(data: &BTreeMap<String, Vec<u8>>, key: &str) -> String {
    data.get(key)
        .map(|v| String::from_utf8_lossy(v).into_owned())
        .unwrap_or_default()
}

impl Integrations {
    /// Assemble from the data of the AWS, Azure, GitHub and websocktunnel Secrets.
    #[must_use]
    pub fn from_secret_data(
        aws: &BTreeMap<String, Vec<u8>>,
        azure: &BTreeMap<String, Vec<u8>>,
        github: &BTreeMap<String, Vec<u8>>,
        websocktunnel: &BTreeMap<String, Vec<u8>>,
    ) -> Self {
        let webhook_secret = github
            .iter()
            .filter(|(key, _)| key.starts_with("webhook-secret"))
            .map(|(_, value)| format!("'{}'", String::from_utf8_lossy(value)))
            .collect();

        Self {
            aws: AwsAccess {
                aws_access_key_id: text(aws, "access-key-id"),
                aws_secret_access_key: text(aws, "secret-access-key"),
            },
            azure_accounts: azure
                .keys()
                .map(|account| (account.clone(), text(azure, account)))
                .collect(),
            github: GitHubCredentials {
                app_id: text(github, "app-id"),
                private_pem: text(github, "private-pem"),
                webhook_secret,
            },
            websocktunnel_secret: text(websocktunnel, "secret"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuthConfig {
    #[serde(flatten)]
    pub database: DatabaseAccess,
    #[serde(flatten)]
    pub messaging: MessagingAccess,
    #[serde(flatten)]
    pub encryption: EncryptionConfig,
    pub azure_accounts: BTreeMap<String, String>,
    pub static_clients: Vec<StaticAccessToken>,
    pub websocktunnel_secret: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuiltInWorkersConfig {
    #[serde(flatten)]
    pub access: ServiceAccess,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GitHubConfig {
    #[serde(flatten)]
    pub access: ServiceAccess,
    #[serde(flatten)]
    pub database: DatabaseAccess,
    #[serde(flatten)]
    pub messaging: MessagingAccess,
    pub bot_username: String,
    pub github_private_pem: String,
    pub github_app_id: String,
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HooksConfig {
    #[serde(flatten)]
    pub access: ServiceAccess,
    #[serde(flatten)]
    pub database: DatabaseAccess,
    #[serde(flatten)]
    pub messaging: MessagingAccess,
    #[serde(flatten)]
    pub encryption: EncryptionConfig,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexConfig {
    #[serde(flatten)]
    pub access: ServiceAccess,
    #[serde(flatten)]
    pub database: DatabaseAccess,
    #[serde(flatten)]
    pub messaging: MessagingAccess,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NotifyConfig {
    #[serde(flatten)]
    pub access: ServiceAccess,
    #[serde(flatten)]
    pub database: DatabaseAccess,
    #[serde(flatten)]
    pub messaging: MessagingAccess,
    #[serde(flatten)]
    pub aws: AwsAccess,
    pub email_source_address: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ObjectConfig {
    #[serde(flatten)]
    pub access: ServiceAccess,
    #[serde(flatten)]
    pub database: DatabaseAccess,
    #[serde(flatten)]
    pub encryption: EncryptionConfig,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeCacheConfig {
    #[serde(flatten)]
    pub access: ServiceAccess,
    #[serde(flatten)]
    pub database: DatabaseAccess,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueConfig {
    #[serde(flatten)]
    pub access: ServiceAccess,
    #[serde(flatten)]
    pub database: DatabaseAccess,
    #[serde(flatten)]
    pub messaging: MessagingAccess,
    #[serde(flatten)]
    pub aws: AwsAccess,
    pub public_artifact_bucket: String,
    pub private_artifact_bucket: String,
    pub sign_public_artifact_urls: bool,
    pub artifact_region: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SecretsConfig {
    #[serde(flatten)]
    pub access: ServiceAccess,
    #[serde(flatten)]
    pub database: DatabaseAccess,
    #[serde(flatten)]
    pub encryption: EncryptionConfig,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WebServerConfig {
    #[serde(flatten)]
    pub access: ServiceAccess,
    #[serde(flatten)]
    pub database: DatabaseAccess,
    #[serde(flatten)]
    pub messaging: MessagingAccess,
    #[serde(flatten)]
    pub encryption: EncryptionConfig,
    pub public_url: String,
    pub additional_allowed_cors_origin: String,
    pub session_secret: String,
    pub registered_clients: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerManagerConfig {
    #[serde(flatten)]
    pub access: ServiceAccess,
    #[serde(flatten)]
    pub database: DatabaseAccess,
    #[serde(flatten)]
    pub messaging: MessagingAccess,
    #[serde(flatten)]
    pub encryption: EncryptionConfig,
    pub providers: BTreeMap<String, serde_json::Value>,
}

/// The complete values document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskclusterValues {
    pub auth: AuthConfig,
    pub built_in_workers: BuiltInWorkersConfig,
    pub github: GitHubConfig,
    pub hooks: HooksConfig,
    pub index: IndexConfig,
    pub notify: NotifyConfig,
    pub object: ObjectConfig,
    pub purge_cache: PurgeCacheConfig,
    pub queue: QueueConfig,
    pub secrets: SecretsConfig,
    pub web_server: WebServerConfig,
    pub worker_manager: WorkerManagerConfig,
    #[serde(rename = "rootUrl")]
    pub root_url: String,
    #[serde(rename = "applicationName")]
    pub application_name: String,
    #[serde(rename = "pulseHostname")]
    pub pulse_hostname: String,
    #[serde(rename = "pulseVhost")]
    pub pulse_vhost: String,
    #[serde(rename = "dockerImage")]
    pub docker_image: String,
    #[serde(rename = "azureAccountId")]
    pub azure_account_id: String,
}

impl TaskclusterValues {
    /// The document as the JSON object the renderer consumes.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).context("failed to serialize chart values")
    }
}

/// Builds per-service records from an instance's spec, provisioned state and
/// integration credentials.
///
/// Reads the state only; every credential must already have been provisioned.
#[derive(Debug)]
pub struct ValuesBuilder<'a> {
    spec: &'a InstanceSpec,
    state: &'a PersistedState,
    database: &'a PostgresEndpoint,
    integrations: &'a Integrations,
}

impl<'a> ValuesBuilder<'a> {
    #[must_use]
    pub fn new(
        spec: &'a InstanceSpec,
        state: &'a PersistedState,
        database: &'a PostgresEndpoint,
        integrations: &'a Integrations,
    ) -> Self {
        Self {
            spec,
            state,
            database,
            integrations,
        }
    }

    /// Connection URL of `service`'s own role, as handed to the service.
    pub fn database_access(&self, service: &str) -> Result<DatabaseAccess> {
        let role = database_role(&self.spec.postgres_user_prefix, service);
        let password = self
            .state
            .account(service)
            .map(|a| a.postgres_password.as_str())
            .unwrap_or_default();
        let url = self
            .database
            .with_credentials(&role, password)
            .connection_string(true, true)
            .with_context(|| format!("failed to build database URL for {service:?}"))?;

        Ok(DatabaseAccess {
            read_db_url: url.clone(),
            write_db_url: url,
        })
    }

    #[must_use]
    pub fn messaging_access(&self, service: &str) -> MessagingAccess {
        MessagingAccess {
            pulse_username: messaging_username(&self.spec.broker.vhost, service),
            pulse_password: self
                .state
                .account(service)
                .map(|a| a.broker_password.clone())
                .unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn encryption(&self, service: &str) -> EncryptionConfig {
        EncryptionConfig {
            db_crypto_keys: self
                .state
                .account(service)
                .map(|a| a.crypto_keys.clone())
                .unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn service_access(&self, service: &str) -> ServiceAccess {
        ServiceAccess {
            taskcluster_access_token: self.access_token(service),
        }
    }

    fn access_token(&self, service: &str) -> String {
        self.state
            .account(service)
            .map(|a| a.access_token.clone())
            .unwrap_or_default()
    }

    /// `static_clients` holds the services' own clients followed by any
    /// extra registrations.
    pub fn auth(&self, static_clients: Vec<StaticAccessToken>) -> Result<AuthConfig> {
        Ok(AuthConfig {
            database: self.database_access("auth")?,
            messaging: self.messaging_access("auth"),
            encryption: self.encryption("auth"),
            azure_accounts: self.integrations.azure_accounts.clone(),
            static_clients,
            websocktunnel_secret: self.integrations.websocktunnel_secret.clone(),
        })
    }

    #[must_use]
    pub fn built_in_workers(&self) -> BuiltInWorkersConfig {
        BuiltInWorkersConfig {
            access: self.service_access("built_in_workers"),
        }
    }

    pub fn github(&self) -> Result<GitHubConfig> {
        Ok(GitHubConfig {
            access: self.service_access("github"),
            database: self.database_access("github")?,
            messaging: self.messaging_access("github"),
            bot_username: self.spec.github.bot_username.clone(),
            github_private_pem: self.integrations.github.private_pem.clone(),
            github_app_id: self.integrations.github.app_id.clone(),
            webhook_secret: self.integrations.github.webhook_secret.clone(),
        })
    }

    pub fn hooks(&self) -> Result<HooksConfig> {
        Ok(HooksConfig {
            access: self.service_access("hooks"),
            database: self.database_access("hooks")?,
            messaging: self.messaging_access("hooks"),
            encryption: self.encryption("hooks"),
        })
    }

    pub fn index(&self) -> Result<IndexConfig> {
        Ok(IndexConfig {
            access: self.service_access("index"),
            database: self.database_access("index")?,
            messaging: self.messaging_access("index"),
        })
    }

    pub fn notify(&self) -> Result<NotifyConfig> {
        Ok(NotifyConfig {
            access: self.service_access("notify"),
            database: self.database_access("notify")?,
            messaging: self.messaging_access("notify"),
            aws: self.integrations.aws.clone(),
            email_source_address: self.spec.email_source_address.clone(),
        })
    }

    pub fn object(&self) -> Result<ObjectConfig> {
        Ok(ObjectConfig {
            access: self.service_access("object"),
            database: self.database_access("object")?,
            encryption: self.encryption("object"),
        })
    }

    pub fn purge_cache(&self) -> Result<PurgeCacheConfig> {
        Ok(PurgeCacheConfig {
            access: self.service_access("purge_cache"),
            database: self.database_access("purge_cache")?,
        })
    }

    pub fn queue(&self) -> Result<QueueConfig> {
        Ok(QueueConfig {
            access: self.service_access("queue"),
            database: self.database_access("queue")?,
            messaging: self.messaging_access("queue"),
            aws: self.integrations.aws.clone(),
            public_artifact_bucket: self.spec.public_artifact_bucket.clone(),
            private_artifact_bucket: self.spec.private_artifact_bucket.clone(),
            sign_public_artifact_urls: self.spec.sign_public_artifact_urls,
            artifact_region: self.spec.artifact_region.clone(),
        })
    }

    pub fn secrets(&self) -> Result<SecretsConfig> {
        Ok(SecretsConfig {
            access: self.service_access("secrets"),
            database: self.database_access("secrets")?,
            encryption: self.encryption("secrets"),
        })
    }

    pub fn web_server(&self) -> Result<WebServerConfig> {
        Ok(WebServerConfig {
            access: self.service_access("web_server"),
            database: self.database_access("web_server")?,
            messaging: self.messaging_access("web_server"),
            encryption: self.encryption("web_server"),
            public_url: self.spec.root_url.clone(),
            additional_allowed_cors_origin: self.spec.additional_allowed_cors_origin.clone(),
            session_secret: self.state.session_secret.clone(),
            registered_clients: Vec::new(),
        })
    }

    pub fn worker_manager(
        &self,
        providers: BTreeMap<String, serde_json::Value>,
    ) -> Result<WorkerManagerConfig> {
        Ok(WorkerManagerConfig {
            access: self.service_access("worker_manager"),
            database: self.database_access("worker_manager")?,
            messaging: self.messaging_access("worker_manager"),
            encryption: self.encryption("worker_manager"),
            providers,
        })
    }

    /// Assemble the full document.
    pub fn build(
        &self,
        static_clients: Vec<StaticAccessToken>,
        providers: BTreeMap<String, serde_json::Value>,
    ) -> Result<TaskclusterValues> {
        Ok(TaskclusterValues {
            auth: self.auth(static_clients)?,
            built_in_workers: self.built_in_workers(),
            github: self.github()?,
            hooks: self.hooks()?,
            index: self.index()?,
            notify: self.notify()?,
            object: self.object()?,
            purge_cache: self.purge_cache()?,
            queue: self.queue()?,
            secrets: self.secrets()?,
            web_server: self.web_server()?,
            worker_manager: self.worker_manager(providers)?,
            root_url: self.spec.root_url().to_string(),
            application_name: self.spec.application_name.clone(),
            pulse_hostname: self.spec.broker.host.clone(),
            pulse_vhost: self.spec.broker.vhost.clone(),
            docker_image: self.spec.docker_image(),
            azure_account_id: self.spec.azure_account_id.clone(),
        })
    }
}

/// Worker-manager provider entries from a Secret's data. Values that are not
/// valid JSON are rejected.
pub fn parse_providers(
    data: &BTreeMap<String, Vec<u8>>,
) -> Result<BTreeMap<String, serde_json::Value>> {
    data.iter()
        .map(|(name, raw)| {
            serde_json::from_slice(raw)
                .map(|value| (name.clone(), value))
                .with_context(|| format!("worker-manager provider {name:?} is not valid JSON"))
        })
        .collect()
}

/// Static clients from a Secret whose values are JSON encoded client records.
pub fn parse_static_clients(data: &BTreeMap<String, Vec<u8>>) -> Result<Vec<StaticAccessToken>> {
    data.iter()
        .map(|(key, raw)| {
            serde_json::from_slice(raw)
                .with_context(|| format!("access token entry {key:?} is not a valid client"))
        })
        .collect()
}
