//! # RabbitMQ Admin
//!
//! Minimal client for the RabbitMQ management HTTP API: virtual hosts, users
//! and per-vhost permissions. Every call is an idempotent `PUT`.

use super::{BrokerAdmin, Permissions};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct VhostSettings {
    tracing: bool,
}

#[derive(Serialize)]
struct UserSettings<'a> {
    password: &'a str,
    tags: &'a str,
}

/// [`BrokerAdmin`] talking to the RabbitMQ management plugin.
#[derive(Clone)]
pub struct RabbitMqAdmin {
    http: Client,
    endpoint: Url,
    username: String,
    password: String,
}

impl std::fmt::Debug for RabbitMqAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RabbitMqAdmin")
            .field("endpoint", &self.endpoint.as_str())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl RabbitMqAdmin {
    /// Client for the management API at `endpoint`, e.g. `https://broker.example.com`.
    pub fn new(endpoint: &str, username: &str, password: &str, timeout: Duration) -> Result<Self> {
        let endpoint =
            Url::parse(endpoint).with_context(|| format!("invalid broker endpoint {endpoint}"))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build broker HTTP client")?;

        Ok(Self {
            http,
            endpoint,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Management endpoint of a broker host. The API is always served over HTTPS.
    #[must_use]
    pub fn endpoint_for_host(host: &str) -> String {
        format!("https://{host}")
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("broker endpoint {} cannot be a base", self.endpoint))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    async fn put<T: Serialize + Sync>(&self, segments: &[&str], body: &T) -> Result<()> {
        let url = self.url(segments)?;
        debug!("PUT {}", url.path());

        let response = self
            .http
            .put(url.clone())
            .basic_auth(&self.username, Some(&self.password))
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url.path()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        anyhow::bail!("{} returned {}: {}", url.path(), status, text.trim())
    }
}

#[async_trait]
impl BrokerAdmin for RabbitMqAdmin {
    async fn ensure_vhost(&self, vhost: &str) -> Result<()> {
        self.put(&["vhosts", vhost], &VhostSettings { tracing: false })
            .await
            .with_context(|| format!("failed to create vhost {vhost}"))
    }

    async fn put_user(&self, username: &str, password: &str) -> Result<()> {
        self.put(
            &["users", username],
            &UserSettings {
                password,
                tags: "",
            },
        )
        .await
        .with_context(|| format!("failed to update broker user {username}"))
    }

    async fn grant_permissions(
        &self,
        vhost: &str,
        username: &str,
        permissions: &Permissions,
    ) -> Result<()> {
        self.put(&["permissions", vhost, username], permissions)
            .await
            .with_context(|| format!("failed to grant {username} access to vhost {vhost}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin(endpoint: &str) -> RabbitMqAdmin {
        RabbitMqAdmin::new(endpoint, "guest", "guest", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_endpoint_for_host() {
        assert_eq!(
            RabbitMqAdmin::endpoint_for_host("mq.example.com"),
            "https://mq.example.com"
        );
    }

    #[test]
    fn test_url_encodes_segments() {
        let url = admin("https://mq.example.com")
            .url(&["permissions", "/", "prod-taskcluster-queue"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://mq.example.com/api/permissions/%2F/prod-taskcluster-queue"
        );
    }

    #[test]
    fn test_url_keeps_base_path() {
        let url = admin("https://mq.example.com/rabbit/")
            .url(&["vhosts", "prod"])
            .unwrap();
        assert_eq!(url.as_str(), "https://mq.example.com/rabbit/api/vhosts/prod");
    }

    #[test]
    fn test_debug_hides_password() {
        let admin = RabbitMqAdmin::new("https://mq", "admin", "hunter2", Duration::from_secs(1))
            .unwrap();
        assert!(!format!("{admin:?}").contains("hunter2"));
    }
}
