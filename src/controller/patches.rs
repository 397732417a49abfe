//! # Kind Patches
//!
//! Fix-ups applied to rendered objects before they are applied.
//!
//! - Deployments: container ports without a protocol get `TCP`, so the
//!   applied object matches what the API server defaults and server-side
//!   apply stops reporting drift.
//! - CronJobs: the hive sidecar is disabled on the job pod template, so the
//!   jobs can run to completion.

use crate::constants::HIVE_ENABLED_ANNOTATION;
use kube::api::DynamicObject;
use serde_json::{Map, Value};

/// Patch selected by an object's group and kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindPatch {
    DefaultPortProtocol,
    DisableHiveOnJobs,
}

impl KindPatch {
    /// The patch for `api_version`/`kind`, if any.
    #[must_use]
    pub fn for_kind(api_version: &str, kind: &str) -> Option<Self> {
        let group = api_version.rsplit_once('/').map_or("", |(g, _)| g);
        match (group, kind) {
            ("apps", "Deployment") => Some(Self::DefaultPortProtocol),
            ("batch", "CronJob") => Some(Self::DisableHiveOnJobs),
            _ => None,
        }
    }

    pub fn apply(self, object: &mut DynamicObject) {
        match self {
            Self::DefaultPortProtocol => default_port_protocol(&mut object.data),
            Self::DisableHiveOnJobs => disable_hive_on_jobs(&mut object.data),
        }
    }
}

/// Apply the kind patch of every object that has one.
pub fn patch_objects(objects: &mut [DynamicObject]) {
    for object in objects {
        let patch = object
            .types
            .as_ref()
            .and_then(|t| KindPatch::for_kind(&t.api_version, &t.kind));
        if let Some(patch) = patch {
            patch.apply(object);
        }
    }
}

fn default_port_protocol(data: &mut Value) {
    let Some(containers) = data
        .pointer_mut("/spec/template/spec/containers")
        .and_then(Value::as_array_mut)
    else {
        return;
    };

    for container in containers {
        let Some(ports) = container.get_mut("ports").and_then(Value::as_array_mut) else {
            continue;
        };
        for port in ports.iter_mut().filter_map(Value::as_object_mut) {
            let missing = port
                .get("protocol")
                .and_then(Value::as_str)
                .is_none_or(str::is_empty);
            if missing {
                port.insert("protocol".to_string(), Value::from("TCP"));
            }
        }
    }
}

fn disable_hive_on_jobs(data: &mut Value) {
    let Some(template) = data.pointer_mut("/spec/jobTemplate/spec/template") else {
        return;
    };

    let annotations = object_entry(template, "metadata")
        .and_then(|metadata| object_entry(metadata, "annotations"))
        .and_then(Value::as_object_mut);
    if let Some(annotations) = annotations {
        annotations.insert(HIVE_ENABLED_ANNOTATION.to_string(), Value::from("false"));
    }
}

/// The object under `key`, replacing a missing or non-object value.
fn object_entry<'a>(value: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    let entry = value
        .as_object_mut()?
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    Some(entry)
}
