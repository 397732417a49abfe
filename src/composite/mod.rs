//! # Composite Reconciler
//!
//! Converges a dynamically typed set of desired children against the cluster
//! and garbage-collects children that are no longer desired, including
//! children of kinds the operator has stopped producing.
//!
//! A pass runs in four steps:
//!
//! 1. Resolve, label and own every desired child, merging their kinds into the
//!    asserted kind set.
//! 2. Record any new kinds on the parent **before** creating anything, so a
//!    crash after creating a child never loses track of its kind.
//! 3. Apply every child with forced server-side apply, collecting failures.
//! 4. For every recorded kind, list the parent's children and delete those
//!    that were not asserted in this pass. Only a fully successful pass
//!    shrinks the recorded kind set. A kind that cannot be listed at any
//!    served version fails the pass and stays recorded.
//!
//! Children are only ever selected through the parent label, so resources of
//! another parent are never touched.

pub mod cluster;
pub mod error;
pub mod parent;
pub mod state;

pub use cluster::{ClusterApi, KubeCluster, ResolvedKind};
pub use error::{AggregateError, CompositeError};
pub use parent::ParentRef;
pub use state::{CompositeState, DeployedKind};

use crate::constants::COMPOSITE_STATE_ANNOTATION;
use anyhow::anyhow;
use kube::api::DynamicObject;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Counts from a composite pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompositeOutcome {
    pub applied: usize,
    pub pruned: usize,
}

/// A desired child with its kind resolved.
#[derive(Debug)]
struct PreparedChild {
    kind: ResolvedKind,
    object: DynamicObject,
}

/// Children asserted by the current pass.
#[derive(Debug, Default)]
struct Asserted {
    kinds: Vec<DeployedKind>,
    uids: HashSet<String>,
    /// Group, kind, namespace and name of every desired child. A child whose
    /// apply failed is still desired and must not be pruned.
    identities: HashSet<(String, String, Option<String>, String)>,
}

fn identity(kind: &DeployedKind, object: &DynamicObject) -> (String, String, Option<String>, String) {
    (
        kind.group.clone(),
        kind.kind.clone(),
        object.metadata.namespace.clone(),
        object.metadata.name.clone().unwrap_or_default(),
    )
}

pub struct CompositeReconciler<'a> {
    cluster: &'a dyn ClusterApi,
}

impl std::fmt::Debug for CompositeReconciler<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeReconciler").finish_non_exhaustive()
    }
}

impl<'a> CompositeReconciler<'a> {
    #[must_use]
    pub fn new(cluster: &'a dyn ClusterApi) -> Self {
        Self { cluster }
    }

    /// Apply `children` as the complete desired set of `parent` and prune
    /// everything else the parent owns.
    ///
    /// `field_manager` owns every applied field.
    pub async fn reconcile(
        &self,
        field_manager: &str,
        parent: &mut ParentRef,
        children: Vec<DynamicObject>,
    ) -> Result<CompositeOutcome, CompositeError> {
        let mut state = load_state(parent)?;
        let prepared = self.prepare(parent, children).await?;
        let mut asserted = self.mark_desired_kinds(parent, &mut state, &prepared).await?;

        let mut failures = AggregateError::new();
        let applied = self
            .assert_prepared(field_manager, prepared, &mut asserted, &mut failures)
            .await;
        let pruned = self
            .prune_unasserted(parent, &state, &asserted, &mut failures)
            .await;

        if !failures.is_empty() {
            warn!(
                "Composite pass for {} finished with {} failures ({} applied, {} pruned)",
                parent.name,
                failures.len(),
                applied,
                pruned
            );
            return Err(failures.into());
        }

        self.shrink_state(parent, &mut state, &asserted).await?;
        Ok(CompositeOutcome { applied, pruned })
    }

    /// Apply `children` without removing anything.
    pub async fn assert_children(
        &self,
        field_manager: &str,
        parent: &mut ParentRef,
        children: Vec<DynamicObject>,
    ) -> Result<CompositeOutcome, CompositeError> {
        let mut state = load_state(parent)?;
        let prepared = self.prepare(parent, children).await?;
        let mut asserted = self.mark_desired_kinds(parent, &mut state, &prepared).await?;

        let mut failures = AggregateError::new();
        let applied = self
            .assert_prepared(field_manager, prepared, &mut asserted, &mut failures)
            .await;
        failures.into_result()?;

        Ok(CompositeOutcome { applied, pruned: 0 })
    }

    /// Delete every child of every recorded kind and clear the recorded set.
    pub async fn prune(&self, parent: &mut ParentRef) -> Result<CompositeOutcome, CompositeError> {
        let mut state = load_state(parent)?;
        let asserted = Asserted::default();

        let mut failures = AggregateError::new();
        let pruned = self
            .prune_unasserted(parent, &state, &asserted, &mut failures)
            .await;
        failures.into_result()?;

        self.shrink_state(parent, &mut state, &asserted).await?;
        Ok(CompositeOutcome { applied: 0, pruned })
    }

    async fn prepare(
        &self,
        parent: &ParentRef,
        children: Vec<DynamicObject>,
    ) -> Result<Vec<PreparedChild>, CompositeError> {
        let mut prepared = Vec::with_capacity(children.len());

        for mut object in children {
            let kind = parent::child_kind(&object)?;
            if object.metadata.name.as_deref().unwrap_or_default().is_empty() {
                return Err(CompositeError::permanent(format!("child of kind {kind} has no name")));
            }

            let resolved = self
                .cluster
                .resolve(&kind)
                .await
                .map_err(CompositeError::Transient)?
                .ok_or_else(|| {
                    CompositeError::permanent(format!("kind {kind} is not served by the cluster"))
                })?;

            parent::bind_child(&mut object, parent, resolved.namespaced);
            prepared.push(PreparedChild {
                kind: resolved,
                object,
            });
        }

        Ok(prepared)
    }

    async fn mark_desired_kinds(
        &self,
        parent: &mut ParentRef,
        state: &mut CompositeState,
        prepared: &[PreparedChild],
    ) -> Result<Asserted, CompositeError> {
        let mut asserted = Asserted::default();
        for child in prepared {
            state::merge_kind(&mut asserted.kinds, child.kind.kind.clone());
            asserted
                .identities
                .insert(identity(&child.kind.kind, &child.object));
        }

        if state.ensure_kinds(&asserted.kinds) {
            info!(
                "Recording {} deployed kinds on {}",
                state.deployed_kinds.len(),
                parent.name
            );
            self.store_state(parent, state).await?;
        }

        Ok(asserted)
    }

    async fn assert_prepared(
        &self,
        field_manager: &str,
        prepared: Vec<PreparedChild>,
        asserted: &mut Asserted,
        failures: &mut AggregateError,
    ) -> usize {
        let mut applied = 0;
        for child in prepared {
            match self
                .cluster
                .apply(&child.kind, &child.object, field_manager)
                .await
            {
                Ok(live) => {
                    applied += 1;
                    match live.metadata.uid {
                        Some(uid) => {
                            asserted.uids.insert(uid);
                        }
                        None => debug!(
                            "Applied {} {} returned no uid",
                            child.kind.kind,
                            cluster::describe(&child.object)
                        ),
                    }
                }
                Err(e) => {
                    warn!(
                        "Failed to apply {} {}: {:#}",
                        child.kind.kind,
                        cluster::describe(&child.object),
                        e
                    );
                    failures.push(e);
                }
            }
        }
        applied
    }

    async fn prune_unasserted(
        &self,
        parent: &ParentRef,
        state: &CompositeState,
        asserted: &Asserted,
        failures: &mut AggregateError,
    ) -> usize {
        let selector = parent.label_selector();
        let mut pruned = 0;

        for kind in &state.deployed_kinds {
            let resolved = match self.resolve_recorded(kind).await {
                Ok(Some(resolved)) => resolved,
                Ok(None) => {
                    warn!("Kind {} is not served at any version, keeping it recorded", kind);
                    failures.push(anyhow!(
                        "kind {kind} is not served, its children cannot be listed"
                    ));
                    continue;
                }
                Err(e) => {
                    failures.push(e);
                    continue;
                }
            };

            let live = match self.cluster.list(&resolved, &selector).await {
                Ok(live) => live,
                Err(e) => {
                    failures.push(e);
                    continue;
                }
            };

            for object in live {
                let is_asserted = object
                    .metadata
                    .uid
                    .as_ref()
                    .is_some_and(|uid| asserted.uids.contains(uid));
                if is_asserted || asserted.identities.contains(&identity(kind, &object)) {
                    continue;
                }

                let Some(name) = object.metadata.name.as_deref() else {
                    continue;
                };
                let namespace = object.metadata.namespace.as_deref();

                match self.cluster.delete(&resolved, namespace, name).await {
                    Ok(()) => {
                        info!("Pruned {} {}", kind.kind, cluster::describe(&object));
                        pruned += 1;
                    }
                    Err(e) => {
                        warn!(
                            "Failed to prune {} {}: {:#}",
                            kind.kind,
                            cluster::describe(&object),
                            e
                        );
                        failures.push(e);
                    }
                }
            }
        }

        pruned
    }

    /// Resolve a recorded kind for listing. A kind recorded at a version the
    /// cluster stopped serving is listed through another served version of
    /// the same group and kind.
    async fn resolve_recorded(&self, kind: &DeployedKind) -> anyhow::Result<Option<ResolvedKind>> {
        if let Some(resolved) = self.cluster.resolve(kind).await? {
            return Ok(Some(resolved));
        }
        let fallback = self.cluster.resolve_group_kind(kind).await?;
        if let Some(resolved) = &fallback {
            debug!(
                "Kind {} is no longer served, listing its children as {}",
                kind, resolved.kind
            );
        }
        Ok(fallback)
    }

    /// Replace the recorded kinds with the asserted ones when some kind is no
    /// longer produced.
    async fn shrink_state(
        &self,
        parent: &mut ParentRef,
        state: &mut CompositeState,
        asserted: &Asserted,
    ) -> Result<(), CompositeError> {
        let stale: Vec<&DeployedKind> = state
            .deployed_kinds
            .iter()
            .filter(|k| !asserted.kinds.iter().any(|a| a.same_group_kind(k)))
            .collect();
        if stale.is_empty() {
            return Ok(());
        }

        info!(
            "Forgetting {} kinds no longer produced by {}",
            stale.len(),
            parent.name
        );
        state.deployed_kinds.clone_from(&asserted.kinds);
        self.store_state(parent, state).await
    }

    async fn store_state(
        &self,
        parent: &mut ParentRef,
        state: &CompositeState,
    ) -> Result<(), CompositeError> {
        let value = state
            .to_annotation_value()
            .map_err(|e| CompositeError::StateUpdate(anyhow!(e)))?;
        let annotations = BTreeMap::from([(COMPOSITE_STATE_ANNOTATION.to_string(), value.clone())]);

        self.cluster
            .patch_parent_annotations(parent, &annotations)
            .await
            .map_err(CompositeError::StateUpdate)?;

        parent
            .annotations
            .insert(COMPOSITE_STATE_ANNOTATION.to_string(), value);
        Ok(())
    }
}

fn load_state(parent: &ParentRef) -> Result<CompositeState, CompositeError> {
    CompositeState::from_annotations(&parent.annotations).map_err(|e| {
        CompositeError::Permanent(anyhow!(e).context(format!(
            "composite state annotation on {} is invalid",
            parent.name
        )))
    })
}
