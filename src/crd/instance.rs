//! # Instance Spec
//!
//! The `Instance` custom resource describes one Taskcluster deployment.

use crate::constants::{DEFAULT_DOCKER_REPOSITORY, DEFAULT_TASKCLUSTER_VERSION};
use serde::{Deserialize, Serialize};

/// Taskcluster deployment managed by the operator
///
/// # Example
///
/// ```yaml
/// apiVersion: taskcluster.wellplayed.games/v1beta1
/// kind: Instance
/// metadata:
///   name: prod
///   namespace: taskcluster
/// spec:
///   rootUrl: https://tc.example.com
///   databaseRef:
///     name: taskcluster
///   pulse:
///     host: mq.example.com
///     vhost: prod
///     adminSecretRef:
///       name: rabbitmq-admin
///   postgresUserPrefix: tc
/// ```
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Instance",
    group = "taskcluster.wellplayed.games",
    version = "v1beta1",
    namespaced,
    status = "crate::crd::InstanceStatus",
    shortname = "tc",
    printcolumn = r#"{"name":"Root URL", "type":"string", "jsonPath":".spec.rootUrl"}, {"name":"Progressing", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Progressing\")].status"}, {"name":"Reason", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Progressing\")].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    /// Config Connector `SQLDatabase` holding the Taskcluster schema
    #[serde(default)]
    pub database_ref: Option<LocalRef>,
    /// Message broker settings
    #[serde(default, rename = "pulse", alias = "broker")]
    pub broker: BrokerSpec,
    /// Public root URL, e.g. `https://tc.example.com`
    #[serde(default)]
    pub root_url: String,
    #[serde(default)]
    pub application_name: String,
    #[serde(default)]
    pub email_source_address: String,
    #[serde(default)]
    pub public_artifact_bucket: String,
    #[serde(default)]
    pub private_artifact_bucket: String,
    #[serde(default)]
    pub artifact_region: String,
    /// Passed through to the queue service as is
    #[serde(default)]
    pub sign_public_artifact_urls: bool,
    #[serde(default, rename = "additionalAllowedCorsOrigin")]
    pub additional_allowed_cors_origin: String,
    /// Image used by every service; defaults to `taskcluster/taskcluster:v42.1.1`
    #[serde(default)]
    pub docker_image: String,
    /// Prefix of every Postgres role; the root role uses the bare prefix
    #[serde(default)]
    pub postgres_user_prefix: String,
    #[serde(default, rename = "github")]
    pub github: GitHubSpec,
    /// Secret whose values are JSON encoded `StaticAccessToken`s
    #[serde(default)]
    pub access_tokens_secret_ref: Option<LocalRef>,
    /// Secret whose entries are copied into the worker-manager providers map
    #[serde(default)]
    pub worker_manager_providers_secret_ref: Option<LocalRef>,
    /// Secret with the `secret` shared with websocktunnel
    #[serde(default)]
    pub web_sock_tunnel_secret_ref: Option<LocalRef>,
    /// Secret with `access-key-id` and `secret-access-key` for the queue and notify services
    #[serde(default)]
    pub aws_secret_ref: Option<LocalRef>,
    /// Secret mapping Azure account names to their keys
    #[serde(default)]
    pub azure_secret_ref: Option<LocalRef>,
    #[serde(default)]
    pub azure_account_id: String,
}

impl InstanceSpec {
    /// Image for every service, with the default repository and tag filled in.
    #[must_use]
    pub fn docker_image(&self) -> String {
        let image = self.docker_image.trim();
        if image.is_empty() {
            format!("{DEFAULT_DOCKER_REPOSITORY}:v{DEFAULT_TASKCLUSTER_VERSION}")
        } else if image.contains(':') {
            image.to_string()
        } else {
            format!("{image}:v{DEFAULT_TASKCLUSTER_VERSION}")
        }
    }

    /// Root URL without a trailing slash.
    #[must_use]
    pub fn root_url(&self) -> &str {
        self.root_url.strip_suffix('/').unwrap_or(&self.root_url)
    }
}

/// Reference to an object in the same namespace
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct LocalRef {
    pub name: String,
}

/// RabbitMQ broker shared by the services of an instance
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BrokerSpec {
    /// Host name of the broker; the management API is reached over HTTPS
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub vhost: String,
    /// Secret with `admin-username` and `admin-password`; `guest` when unset
    #[serde(default)]
    pub admin_secret_ref: Option<LocalRef>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GitHubSpec {
    #[serde(default)]
    pub bot_username: String,
    /// Secret with `app-id`, `private-pem` and `webhook-secret*` entries
    #[serde(default)]
    pub secret_ref: Option<LocalRef>,
}

/// A client registered with the auth service at startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StaticAccessToken {
    pub client_id: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}
