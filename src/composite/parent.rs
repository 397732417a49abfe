//! # Parent and Child Metadata
//!
//! Identity of the parent resource and the metadata every child receives:
//! the parent label, and a controller owner reference when the child lives in
//! the parent's namespace.

use super::error::CompositeError;
use super::state::DeployedKind;
use crate::constants::COMPOSITE_PARENT_LABEL;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ApiResource, DynamicObject};
use kube::Resource;
use std::collections::BTreeMap;

/// The resource that owns a composite set of children.
#[derive(Debug, Clone)]
pub struct ParentRef {
    pub resource: ApiResource,
    pub name: String,
    pub namespace: Option<String>,
    pub uid: String,
    pub annotations: BTreeMap<String, String>,
}

impl ParentRef {
    /// Capture the identity of a typed resource.
    ///
    /// Fails permanently when the object has no name or UID yet.
    pub fn from_resource<K>(obj: &K) -> Result<Self, CompositeError>
    where
        K: Resource<DynamicType = ()>,
    {
        let meta = obj.meta();
        let name = meta
            .name
            .clone()
            .ok_or_else(|| CompositeError::permanent("parent resource has no name"))?;
        let uid = meta
            .uid
            .clone()
            .ok_or_else(|| CompositeError::permanent(format!("parent resource {name} has no uid")))?;

        Ok(Self {
            resource: ApiResource::erase::<K>(&()),
            name,
            namespace: meta.namespace.clone(),
            uid,
            annotations: meta.annotations.clone().unwrap_or_default(),
        })
    }

    /// Label selector matching every child of this parent.
    #[must_use]
    pub fn label_selector(&self) -> String {
        format!("{}={}", COMPOSITE_PARENT_LABEL, self.uid)
    }

    #[must_use]
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.resource.api_version.clone(),
            kind: self.resource.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

/// Kind of a child taken from its `apiVersion` and `kind`.
pub fn child_kind(child: &DynamicObject) -> Result<DeployedKind, CompositeError> {
    let types = child.types.as_ref().ok_or_else(|| {
        CompositeError::permanent(format!(
            "child {} has no apiVersion or kind",
            child.metadata.name.as_deref().unwrap_or("<unnamed>")
        ))
    })?;

    if types.kind.is_empty() || types.api_version.is_empty() {
        return Err(CompositeError::permanent(format!(
            "child {} has an empty apiVersion or kind",
            child.metadata.name.as_deref().unwrap_or("<unnamed>")
        )));
    }

    Ok(DeployedKind::from_api_version(&types.api_version, &types.kind))
}

/// Bind `child` to `parent`: label it, fix up its namespace for the kind's
/// scope, and set the parent as controller when both share a namespace.
pub fn bind_child(child: &mut DynamicObject, parent: &ParentRef, namespaced: bool) {
    child
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(COMPOSITE_PARENT_LABEL.to_string(), parent.uid.clone());

    if !namespaced {
        child.metadata.namespace = None;
        return;
    }

    if child.metadata.namespace.is_none() {
        child.metadata.namespace.clone_from(&parent.namespace);
    }

    if parent.namespace.is_some() && child.metadata.namespace == parent.namespace {
        let owner = parent.owner_reference();
        let refs = child.metadata.owner_references.get_or_insert_with(Vec::new);
        refs.retain(|r| r.uid != owner.uid && r.controller != Some(true));
        refs.push(owner);
    }
}
