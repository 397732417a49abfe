//! # Status Conditions
//!
//! Reports the outcome of each pass as the `Progressing` condition.

use super::types::{reason, ReconcilerError};
use crate::constants::FIELD_MANAGER;
use crate::crd::{Condition, Instance, InstanceStatus, CONDITION_PROGRESSING};
use anyhow::{Context, Result};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::debug;

/// Condition describing the outcome of a pass.
#[must_use]
pub fn progressing_condition(outcome: Result<(), &ReconcilerError>) -> Condition {
    let (status, reason, message) = match outcome {
        Ok(()) => ("True", reason::RECONCILED, None),
        Err(e) => ("False", e.reason(), Some(e.to_string())),
    };

    Condition {
        r#type: CONDITION_PROGRESSING.to_string(),
        status: status.to_string(),
        last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
        reason: Some(reason.to_string()),
        message,
    }
}

/// The instance status after setting `condition`.
#[must_use]
pub fn next_status(instance: &Instance, condition: Condition) -> InstanceStatus {
    let mut status = instance.status.clone().unwrap_or_default();
    status.set_condition(condition);
    status.observed_generation = instance.metadata.generation;
    status
}

/// Write the `Progressing` condition for a pass, skipping unchanged status.
pub async fn update_progressing(
    client: &Client,
    instance: &Instance,
    outcome: Result<(), &ReconcilerError>,
) -> Result<()> {
    let status = next_status(instance, progressing_condition(outcome));
    if instance.status.as_ref() == Some(&status) {
        debug!("Skipping status update - condition unchanged");
        return Ok(());
    }

    let namespace = instance.namespace().unwrap_or_default();
    let api: Api<Instance> = Api::namespaced(client.clone(), &namespace);
    api.patch_status(
        &instance.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(json!({ "status": status })),
    )
    .await
    .with_context(|| {
        format!(
            "failed to update status of instance {}/{}",
            namespace,
            instance.name_any()
        )
    })?;
    Ok(())
}
