//! # AccessToken Processing
//!
//! Turns the AccessToken resources of an instance into static clients.
//!
//! Each token lives in a Secret named after its AccessToken and owned by it.
//! A token is generated when the Secret is missing or its client id no longer
//! matches `clientID`, so renaming a client also rotates its secret.

use crate::constants::{ACCESS_TOKEN_RESOURCE_TOKEN_LENGTH, FIELD_MANAGER};
use crate::controller::database_ref::secret_value;
use crate::crd::{AccessToken, AccessTokenStatus, StaticAccessToken};
use crate::pwgen;
use anyhow::{anyhow, Context, Result};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const CLIENT_ID_KEY: &str = "client-id";
pub const ACCESS_TOKEN_KEY: &str = "access-token";

/// Token to use for `token`, given the data of its existing Secret.
///
/// Returns the token and whether the Secret must be written.
#[must_use]
pub fn resolve_token(
    token: &AccessToken,
    existing: Option<&BTreeMap<String, ByteString>>,
) -> (String, bool) {
    let stored_client = secret_value(existing, CLIENT_ID_KEY);
    let stored_token = secret_value(existing, ACCESS_TOKEN_KEY).filter(|t| !t.is_empty());

    match stored_token {
        Some(stored) if stored_client.as_deref() == Some(token.spec.client_id.as_str()) => {
            (stored, false)
        }
        _ => (pwgen::alphanumeric(ACCESS_TOKEN_RESOURCE_TOKEN_LENGTH), true),
    }
}

/// The Secret holding the token of `token`.
pub fn token_secret(token: &AccessToken, access_token: &str) -> Result<Secret> {
    let owner = token
        .controller_owner_ref(&())
        .ok_or_else(|| anyhow!("access token {} has no uid", token.name_any()))?;

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(token.name_any()),
            namespace: token.namespace(),
            owner_references: Some(vec![owner]),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([
            (
                CLIENT_ID_KEY.to_string(),
                ByteString(token.spec.client_id.clone().into_bytes()),
            ),
            (
                ACCESS_TOKEN_KEY.to_string(),
                ByteString(access_token.as_bytes().to_vec()),
            ),
        ])),
        ..Secret::default()
    })
}

/// Static client registered for `token`.
#[must_use]
pub fn static_client(token: &AccessToken, access_token: &str) -> StaticAccessToken {
    StaticAccessToken {
        client_id: token.spec.client_id.clone(),
        access_token: access_token.to_string(),
        description: Some(token.spec.description.clone()).filter(|d| !d.is_empty()),
        scopes: token.spec.scopes.clone(),
    }
}

/// Ensure the Secret and status of every AccessToken referring to the
/// instance `namespace/name`, and return their static clients.
pub async fn process_access_tokens(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<Vec<StaticAccessToken>> {
    let tokens: Api<AccessToken> = Api::all(client.clone());
    let mut list = tokens
        .list(&ListParams::default())
        .await
        .context("failed to list access tokens")?
        .items;
    list.retain(|t| t.refers_to(namespace, name));
    // Stable order keeps the rendered client list from churning.
    list.sort_by_key(|t| (t.namespace(), t.name_any()));

    let mut clients = Vec::with_capacity(list.len());
    for token in &list {
        let access_token = ensure_token(client, token).await?;
        clients.push(static_client(token, &access_token));
    }

    debug!(
        "Collected {} access token clients for {}/{}",
        clients.len(),
        namespace,
        name
    );
    Ok(clients)
}

async fn ensure_token(client: &Client, token: &AccessToken) -> Result<String> {
    let token_namespace = token
        .namespace()
        .ok_or_else(|| anyhow!("access token {} has no namespace", token.name_any()))?;
    let token_name = token.name_any();
    let secrets: Api<Secret> = Api::namespaced(client.clone(), &token_namespace);

    let existing = secrets
        .get_opt(&token_name)
        .await
        .with_context(|| format!("failed to get secret {token_namespace}/{token_name}"))?;
    let (access_token, changed) =
        resolve_token(token, existing.as_ref().and_then(|s| s.data.as_ref()));

    if changed {
        let desired = token_secret(token, &access_token)?;
        match existing {
            Some(mut current) => {
                current.metadata.owner_references = desired.metadata.owner_references;
                current.data = desired.data;
                secrets
                    .replace(&token_name, &PostParams::default(), &current)
                    .await
                    .with_context(|| {
                        format!("failed to update secret {token_namespace}/{token_name}")
                    })?;
            }
            None => {
                secrets
                    .create(&PostParams::default(), &desired)
                    .await
                    .with_context(|| {
                        format!("failed to create secret {token_namespace}/{token_name}")
                    })?;
            }
        }
        info!(
            "Issued access token for client {} in {}/{}",
            token.spec.client_id, token_namespace, token_name
        );
    }

    if !token.status_is_current() {
        let status = AccessTokenStatus {
            created: true,
            observed_generation: token.meta().generation,
        };
        let tokens: Api<AccessToken> = Api::namespaced(client.clone(), &token_namespace);
        tokens
            .patch_status(
                &token_name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(json!({ "status": status })),
            )
            .await
            .with_context(|| {
                format!("failed to update status of access token {token_namespace}/{token_name}")
            })?;
    }

    Ok(access_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AccessTokenSpec, InstanceRef};

    fn token() -> AccessToken {
        AccessToken {
            metadata: ObjectMeta {
                name: Some("ci".to_string()),
                namespace: Some("ci".to_string()),
                uid: Some("0d3f6a1e-7b1c-4a55-9c0e-8d3b2f7e6a10".to_string()),
                generation: Some(1),
                ..ObjectMeta::default()
            },
            spec: AccessTokenSpec {
                instance_ref: InstanceRef {
                    namespace: Some("taskcluster".to_string()),
                    name: "prod".to_string(),
                },
                client_id: "project/ci".to_string(),
                description: "CI client".to_string(),
                scopes: vec!["queue:create-task:*".to_string()],
            },
            status: None,
        }
    }

    fn data(client_id: &str, access_token: &str) -> BTreeMap<String, ByteString> {
        BTreeMap::from([
            (
                CLIENT_ID_KEY.to_string(),
                ByteString(client_id.as_bytes().to_vec()),
            ),
            (
                ACCESS_TOKEN_KEY.to_string(),
                ByteString(access_token.as_bytes().to_vec()),
            ),
        ])
    }

    #[test]
    fn test_resolve_token_generates_when_missing() {
        let (access_token, changed) = resolve_token(&token(), None);
        assert!(changed);
        assert_eq!(access_token.len(), ACCESS_TOKEN_RESOURCE_TOKEN_LENGTH);
        assert!(access_token.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_resolve_token_keeps_matching_secret() {
        let existing = data("project/ci", "existing-token");
        assert_eq!(
            resolve_token(&token(), Some(&existing)),
            ("existing-token".to_string(), false)
        );
    }

    #[test]
    fn test_resolve_token_rotates_on_client_change() {
        let existing = data("project/old", "existing-token");
        let (access_token, changed) = resolve_token(&token(), Some(&existing));
        assert!(changed);
        assert_ne!(access_token, "existing-token");
    }

    #[test]
    fn test_token_secret_is_owned_by_token() {
        let secret = token_secret(&token(), "abc").unwrap();
        let owner = &secret.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "AccessToken");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("ci"));
        assert_eq!(
            secret_value(secret.data.as_ref(), CLIENT_ID_KEY).as_deref(),
            Some("project/ci")
        );
    }

    #[test]
    fn test_token_secret_requires_uid() {
        let mut token = token();
        token.metadata.uid = None;
        assert!(token_secret(&token, "abc").is_err());
    }

    #[test]
    fn test_static_client() {
        let client = static_client(&token(), "abc");
        assert_eq!(client.client_id, "project/ci");
        assert_eq!(client.description.as_deref(), Some("CI client"));
        assert_eq!(client.scopes, vec!["queue:create-task:*".to_string()]);
    }
}
