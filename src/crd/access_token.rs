//! # AccessToken
//!
//! An additional static client of an instance. The operator generates the
//! token, stores it in a Secret named after the resource and registers the
//! client with the instance's auth service.

use serde::{Deserialize, Serialize};

/// Static client registered with an instance's auth service
///
/// # Example
///
/// ```yaml
/// apiVersion: taskcluster.wellplayed.games/v1beta1
/// kind: AccessToken
/// metadata:
///   name: ci-client
///   namespace: ci
/// spec:
///   instanceRef:
///     namespace: taskcluster
///     name: prod
///   clientID: project/ci
///   scopes:
///     - queue:create-task:*
/// ```
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "AccessToken",
    group = "taskcluster.wellplayed.games",
    version = "v1beta1",
    namespaced,
    status = "crate::crd::AccessTokenStatus",
    printcolumn = r#"{"name":"Client", "type":"string", "jsonPath":".spec.clientID"}, {"name":"Created", "type":"boolean", "jsonPath":".status.created"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenSpec {
    pub instance_ref: InstanceRef,
    #[serde(rename = "clientID", alias = "clientId")]
    pub client_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// The instance an access token belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct InstanceRef {
    /// Defaults to the namespace of the access token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenStatus {
    #[serde(default)]
    pub created: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl AccessToken {
    /// Namespace and name of the referenced instance.
    #[must_use]
    pub fn instance_key(&self) -> (Option<String>, String) {
        let namespace = self
            .spec
            .instance_ref
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .or_else(|| self.metadata.namespace.clone());
        (namespace, self.spec.instance_ref.name.clone())
    }

    /// True when this token belongs to the instance `namespace/name`.
    #[must_use]
    pub fn refers_to(&self, namespace: &str, name: &str) -> bool {
        let (ns, instance) = self.instance_key();
        instance == name && ns.as_deref() == Some(namespace)
    }

    /// True when the status already reflects the current generation.
    #[must_use]
    pub fn status_is_current(&self) -> bool {
        self.status.as_ref().is_some_and(|s| {
            s.created && s.observed_generation.is_some() && s.observed_generation == self.metadata.generation
        })
    }
}
