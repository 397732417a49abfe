//! # Cluster Access
//!
//! The cluster operations the composite reconciler needs, behind the
//! [`ClusterApi`] trait so passes can run against a real API server
//! ([`KubeCluster`]) or an in-memory fake.

use super::parent::ParentRef;
use super::state::DeployedKind;
use anyhow::{Context, Result};
use async_trait::async_trait;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::discovery::{self, Scope};
use kube::Client;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::debug;

/// A kind the API server serves, with its REST mapping.
#[derive(Debug, Clone)]
pub struct ResolvedKind {
    pub kind: DeployedKind,
    pub resource: ApiResource,
    pub namespaced: bool,
}

#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Look up the REST mapping of a kind. `Ok(None)` means the API server
    /// does not serve it.
    async fn resolve(&self, kind: &DeployedKind) -> Result<Option<ResolvedKind>>;

    /// Look up the preferred served version of a kind's group and kind,
    /// ignoring its version. `Ok(None)` means no version is served.
    async fn resolve_group_kind(&self, kind: &DeployedKind) -> Result<Option<ResolvedKind>>;

    /// Server-side apply `object` with forced ownership, returning the live object.
    async fn apply(
        &self,
        kind: &ResolvedKind,
        object: &DynamicObject,
        field_manager: &str,
    ) -> Result<DynamicObject>;

    /// List objects of `kind` in every namespace matching `label_selector`.
    async fn list(&self, kind: &ResolvedKind, label_selector: &str) -> Result<Vec<DynamicObject>>;

    /// Delete an object. Deleting something already gone succeeds.
    async fn delete(&self, kind: &ResolvedKind, namespace: Option<&str>, name: &str) -> Result<()>;

    /// Merge `annotations` into the parent's annotations.
    async fn patch_parent_annotations(
        &self,
        parent: &ParentRef,
        annotations: &BTreeMap<String, String>,
    ) -> Result<()>;
}

/// [`ClusterApi`] backed by a kube client and API discovery.
pub struct KubeCluster {
    client: Client,
    resolved: Mutex<HashMap<DeployedKind, ResolvedKind>>,
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

impl KubeCluster {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    fn api(&self, kind: &ResolvedKind, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if kind.namespaced => {
                Api::namespaced_with(self.client.clone(), ns, &kind.resource)
            }
            _ => Api::all_with(self.client.clone(), &kind.resource),
        }
    }

    fn cached(&self, kind: &DeployedKind) -> Option<ResolvedKind> {
        self.resolved
            .lock()
            .ok()
            .and_then(|cache| cache.get(kind).cloned())
    }
}

fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(ref resp) if resp.code == 404)
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn resolve(&self, kind: &DeployedKind) -> Result<Option<ResolvedKind>> {
        if let Some(resolved) = self.cached(kind) {
            return Ok(Some(resolved));
        }

        let discovered = discovery::pinned_kind(&self.client, &kind.to_gvk()).await;
        let (resource, capabilities) = match discovered {
            Ok(found) => found,
            Err(kube::Error::Discovery(e)) => {
                debug!("Kind {} is not served: {}", kind, e);
                return Ok(None);
            }
            Err(e) if is_not_found(&e) => {
                debug!("API group for kind {} is not served", kind);
                return Ok(None);
            }
            Err(e) => return Err(e).with_context(|| format!("failed to discover kind {kind}")),
        };

        let resolved = ResolvedKind {
            kind: kind.clone(),
            resource,
            namespaced: matches!(capabilities.scope, Scope::Namespaced),
        };

        if let Ok(mut cache) = self.resolved.lock() {
            cache.insert(kind.clone(), resolved.clone());
        }
        Ok(Some(resolved))
    }

    async fn resolve_group_kind(&self, kind: &DeployedKind) -> Result<Option<ResolvedKind>> {
        let group = match discovery::group(&self.client, &kind.group).await {
            Ok(group) => group,
            Err(kube::Error::Discovery(e)) => {
                debug!("API group of kind {} is not served: {}", kind, e);
                return Ok(None);
            }
            Err(e) if is_not_found(&e) => {
                debug!("API group of kind {} is not served", kind);
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to discover group of kind {kind}"))
            }
        };

        Ok(group
            .recommended_kind(&kind.kind)
            .map(|(resource, capabilities)| ResolvedKind {
                kind: DeployedKind::new(&kind.group, &resource.version, &kind.kind),
                resource,
                namespaced: matches!(capabilities.scope, Scope::Namespaced),
            }))
    }

    async fn apply(
        &self,
        kind: &ResolvedKind,
        object: &DynamicObject,
        field_manager: &str,
    ) -> Result<DynamicObject> {
        let name = object
            .metadata
            .name
            .as_deref()
            .context("child object has no name")?;
        let api = self.api(kind, object.metadata.namespace.as_deref());

        api.patch(
            name,
            &PatchParams::apply(field_manager).force(),
            &Patch::Apply(object),
        )
        .await
        .with_context(|| format!("failed to apply {} {}", kind.kind, describe(object)))
    }

    async fn list(&self, kind: &ResolvedKind, label_selector: &str) -> Result<Vec<DynamicObject>> {
        let api = self.api(kind, None);
        let list = api
            .list(&ListParams::default().labels(label_selector))
            .await
            .with_context(|| format!("failed to list {}", kind.kind))?;
        Ok(list.items)
    }

    async fn delete(&self, kind: &ResolvedKind, namespace: Option<&str>, name: &str) -> Result<()> {
        let api = self.api(kind, namespace);
        match api.delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e).with_context(|| {
                format!(
                    "failed to delete {} {}/{}",
                    kind.kind,
                    namespace.unwrap_or_default(),
                    name
                )
            }),
        }
    }

    async fn patch_parent_annotations(
        &self,
        parent: &ParentRef,
        annotations: &BTreeMap<String, String>,
    ) -> Result<()> {
        let api: Api<DynamicObject> = match parent.namespace.as_deref() {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &parent.resource),
            None => Api::all_with(self.client.clone(), &parent.resource),
        };
        let patch = serde_json::json!({
            "metadata": { "annotations": annotations }
        });

        api.patch(&parent.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("failed to annotate {} {}", parent.resource.kind, parent.name))?;
        Ok(())
    }
}

/// `namespace/name` or `name` of an object, for messages.
#[must_use]
pub fn describe(object: &DynamicObject) -> String {
    let name = object.metadata.name.as_deref().unwrap_or("<unnamed>");
    match object.metadata.namespace.as_deref() {
        Some(ns) => format!("{ns}/{name}"),
        None => name.to_string(),
    }
}
