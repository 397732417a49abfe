//! # Admin Endpoint Discovery
//!
//! Resolves the admin endpoints an instance points at.
//!
//! The database is a Config Connector `SQLDatabase`, whose `SQLInstance`
//! carries the root password and the server addresses. The broker admin login
//! comes from an optional Secret and falls back to `guest`.

use crate::constants::{
    DATABASE_ADMIN_USERNAME, DEFAULT_BROKER_ADMIN_PASSWORD, DEFAULT_BROKER_ADMIN_USERNAME,
};
use crate::crd::InstanceSpec;
use crate::provisioner::postgres::PostgresEndpoint;
use anyhow::{anyhow, Context, Result};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::core::GroupVersionKind;
use kube::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

const CNRM_SQL_GROUP: &str = "sql.cnrm.cloud.google.com";
const CNRM_SQL_VERSION: &str = "v1beta1";

/// Broker admin login.
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Default for BrokerCredentials {
    fn default() -> Self {
        Self {
            username: DEFAULT_BROKER_ADMIN_USERNAME.to_string(),
            password: DEFAULT_BROKER_ADMIN_PASSWORD.to_string(),
        }
    }
}

/// Where the root password of an `SQLInstance` lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootPassword {
    Inline(String),
    SecretKey { name: String, key: String },
}

/// What an `SQLInstance` tells about its server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlInstanceInfo {
    pub root_password: RootPassword,
    pub public_ip: String,
    pub private_ip: String,
}

fn cnrm_resource(kind: &str) -> ApiResource {
    ApiResource::from_gvk(&GroupVersionKind::gvk(
        CNRM_SQL_GROUP,
        CNRM_SQL_VERSION,
        kind,
    ))
}

fn str_at<'a>(data: &'a Value, pointer: &str) -> Option<&'a str> {
    data.pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// `spec.instanceRef.name` of an `SQLDatabase`.
pub fn sql_instance_name(database: &DynamicObject) -> Result<String> {
    str_at(&database.data, "/spec/instanceRef/name")
        .map(str::to_string)
        .ok_or_else(|| anyhow!("SQLDatabase has no spec.instanceRef.name"))
}

/// Read the password source and addresses of an `SQLInstance`.
pub fn parse_sql_instance(instance: &DynamicObject) -> Result<SqlInstanceInfo> {
    let data = &instance.data;

    let root_password = if let Some(value) = str_at(data, "/spec/rootPassword/value") {
        RootPassword::Inline(value.to_string())
    } else {
        let name = str_at(data, "/spec/rootPassword/valueFrom/secretKeyRef/name");
        let key = str_at(data, "/spec/rootPassword/valueFrom/secretKeyRef/key");
        match (name, key) {
            (Some(name), Some(key)) => RootPassword::SecretKey {
                name: name.to_string(),
                key: key.to_string(),
            },
            _ => return Err(anyhow!("SQLInstance has no root password")),
        }
    };

    let public_ip = str_at(data, "/status/publicIpAddress")
        .ok_or_else(|| anyhow!("SQLInstance has no public IP address"))?;
    let private_ip = str_at(data, "/status/privateIpAddress")
        .ok_or_else(|| anyhow!("SQLInstance has no private IP address"))?;

    Ok(SqlInstanceInfo {
        root_password,
        public_ip: public_ip.to_string(),
        private_ip: private_ip.to_string(),
    })
}

/// Look up a UTF-8 value in Secret data.
pub fn secret_value(data: Option<&BTreeMap<String, ByteString>>, key: &str) -> Option<String> {
    data.and_then(|d| d.get(key))
        .and_then(|v| String::from_utf8(v.0.clone()).ok())
}

/// Broker credentials from the admin Secret's data. Missing or empty values
/// fall back to the defaults.
#[must_use]
pub fn broker_credentials_from(data: Option<&BTreeMap<String, ByteString>>) -> BrokerCredentials {
    let defaults = BrokerCredentials::default();
    let value = |key| secret_value(data, key).filter(|v| !v.is_empty());
    BrokerCredentials {
        username: value("admin-username").unwrap_or(defaults.username),
        password: value("admin-password").unwrap_or(defaults.password),
    }
}

/// Resolve the admin endpoint of the instance database.
pub async fn database_endpoint(
    client: &Client,
    namespace: &str,
    spec: &InstanceSpec,
) -> Result<PostgresEndpoint> {
    let database_name = spec
        .database_ref
        .as_ref()
        .map(|r| r.name.as_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| anyhow!("instance has no databaseRef"))?;

    let databases: Api<DynamicObject> =
        Api::namespaced_with(client.clone(), namespace, &cnrm_resource("SQLDatabase"));
    let database = databases
        .get(database_name)
        .await
        .with_context(|| format!("failed to get SQLDatabase {namespace}/{database_name}"))?;
    let instance_name = sql_instance_name(&database)?;

    let instances: Api<DynamicObject> =
        Api::namespaced_with(client.clone(), namespace, &cnrm_resource("SQLInstance"));
    let instance = instances
        .get(&instance_name)
        .await
        .with_context(|| format!("failed to get SQLInstance {namespace}/{instance_name}"))?;
    let info = parse_sql_instance(&instance)
        .with_context(|| format!("SQLInstance {namespace}/{instance_name} is not ready"))?;

    let password = match info.root_password {
        RootPassword::Inline(password) => password,
        RootPassword::SecretKey { name, key } => {
            let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
            let secret = secrets
                .get(&name)
                .await
                .with_context(|| format!("failed to get root password secret {namespace}/{name}"))?;
            secret_value(secret.data.as_ref(), &key)
                .ok_or_else(|| anyhow!("secret {namespace}/{name} has no key {key}"))?
        }
    };

    debug!(
        "Resolved database {} on SQLInstance {}",
        database_name, instance_name
    );

    Ok(PostgresEndpoint {
        public_ip: info.public_ip,
        private_ip: info.private_ip,
        username: DATABASE_ADMIN_USERNAME.to_string(),
        password,
        database: database_name.to_string(),
    })
}

/// Resolve the broker admin login of the instance.
pub async fn broker_credentials(
    client: &Client,
    namespace: &str,
    spec: &InstanceSpec,
) -> Result<BrokerCredentials> {
    let Some(secret_ref) = spec.broker.admin_secret_ref.as_ref() else {
        return Ok(BrokerCredentials::default());
    };

    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = secrets.get(&secret_ref.name).await.with_context(|| {
        format!(
            "failed to get broker admin secret {namespace}/{}",
            secret_ref.name
        )
    })?;
    Ok(broker_credentials_from(secret.data.as_ref()))
}

/// Data of an optional Secret referenced by the instance.
pub async fn optional_secret_data(
    client: &Client,
    namespace: &str,
    name: Option<&str>,
) -> Result<BTreeMap<String, Vec<u8>>> {
    let Some(name) = name else {
        return Ok(BTreeMap::new());
    };

    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = secrets
        .get(name)
        .await
        .with_context(|| format!("failed to get secret {namespace}/{name}"))?;
    Ok(secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.0))
        .collect())
}
