//! # Composite State
//!
//! The set of child kinds a parent has ever produced, stored as JSON in the
//! [`COMPOSITE_STATE_ANNOTATION`] annotation of the parent.
//!
//! A kind stays in the set until a pass has listed and pruned every child of
//! that kind, so children survive operator upgrades that stop producing a kind
//! and are still cleaned up afterwards.

use crate::constants::COMPOSITE_STATE_ANNOTATION;
use kube::core::GroupVersionKind;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Group, version and kind of a child resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeployedKind {
    #[serde(default, alias = "Group")]
    pub group: String,
    #[serde(alias = "Version")]
    pub version: String,
    #[serde(alias = "Kind")]
    pub kind: String,
}

impl DeployedKind {
    #[must_use]
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// Split an `apiVersion` such as `apps/v1` or `v1`.
    #[must_use]
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
        Self::new(group, version, kind)
    }

    #[must_use]
    pub fn same_group_kind(&self, other: &DeployedKind) -> bool {
        self.group == other.group && self.kind == other.kind
    }

    #[must_use]
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    #[must_use]
    pub fn to_gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }
}

impl std::fmt::Display for DeployedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeState {
    #[serde(default, alias = "DeployedKinds")]
    pub deployed_kinds: Vec<DeployedKind>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredState {
    Object(CompositeState),
    Kinds(Vec<DeployedKind>),
}

impl CompositeState {
    /// Read the state from a parent's annotations. No annotation means empty.
    ///
    /// Both the object form and a bare array of kinds are accepted.
    pub fn from_annotations(
        annotations: &BTreeMap<String, String>,
    ) -> Result<Self, serde_json::Error> {
        let Some(text) = annotations.get(COMPOSITE_STATE_ANNOTATION) else {
            return Ok(Self::default());
        };

        Ok(match serde_json::from_str::<StoredState>(text)? {
            StoredState::Object(state) => state,
            StoredState::Kinds(deployed_kinds) => Self { deployed_kinds },
        })
    }

    pub fn to_annotation_value(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Make sure every kind in `kinds` is recorded, taking the given version
    /// when it differs. Returns true if anything changed.
    pub fn ensure_kinds(&mut self, kinds: &[DeployedKind]) -> bool {
        let mut changed = false;
        for kind in kinds {
            match self
                .deployed_kinds
                .iter_mut()
                .find(|k| k.same_group_kind(kind))
            {
                Some(existing) if existing.version != kind.version => {
                    existing.version.clone_from(&kind.version);
                    changed = true;
                }
                Some(_) => {}
                None => {
                    self.deployed_kinds.push(kind.clone());
                    changed = true;
                }
            }
        }
        changed
    }
}

/// Merge `kind` into a set keyed by group and kind, keeping the most stable
/// version of each.
pub fn merge_kind(kinds: &mut Vec<DeployedKind>, kind: DeployedKind) {
    match kinds.iter_mut().find(|k| k.same_group_kind(&kind)) {
        Some(existing) => {
            if compare_versions(&kind.version, &existing.version) == Ordering::Greater {
                *existing = kind;
            }
        }
        None => kinds.push(kind),
    }
}

/// Order Kubernetes API versions: GA above beta above alpha, then by number.
///
/// Versions that do not follow the `v<N>[alpha|beta<M>]` pattern sort below
/// all conforming ones, lexically among themselves.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

fn parse_version(version: &str) -> Option<(u8, u32, u32)> {
    let rest = version.strip_prefix('v')?;
    let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    let major: u32 = rest[..digits].parse().ok()?;
    let suffix = &rest[digits..];

    if suffix.is_empty() {
        return Some((3, major, 0));
    }

    let (stability, minor) = if let Some(minor) = suffix.strip_prefix("beta") {
        (2, minor)
    } else if let Some(minor) = suffix.strip_prefix("alpha") {
        (1, minor)
    } else {
        return None;
    };

    let minor = if minor.is_empty() {
        0
    } else {
        minor.parse().ok()?
    };
    Some((stability, major, minor))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations(value: &str) -> BTreeMap<String, String> {
        BTreeMap::from([(COMPOSITE_STATE_ANNOTATION.to_string(), value.to_string())])
    }

    #[test]
    fn test_missing_annotation_is_empty() {
        let state = CompositeState::from_annotations(&BTreeMap::new()).unwrap();
        assert!(state.deployed_kinds.is_empty());
    }

    #[test]
    fn test_reads_object_form() {
        let state = CompositeState::from_annotations(&annotations(
            r#"{"deployedKinds":[{"group":"apps","version":"v1","kind":"Deployment"}]}"#,
        ))
        .unwrap();
        assert_eq!(
            state.deployed_kinds,
            vec![DeployedKind::new("apps", "v1", "Deployment")]
        );
    }

    #[test]
    fn test_reads_array_form() {
        let state = CompositeState::from_annotations(&annotations(
            r#"[{"group":"","version":"v1","kind":"Service"}]"#,
        ))
        .unwrap();
        assert_eq!(
            state.deployed_kinds,
            vec![DeployedKind::new("", "v1", "Service")]
        );
    }

    #[test]
    fn test_reads_capitalized_keys() {
        let state = CompositeState::from_annotations(&annotations(
            r#"{"deployedKinds":[{"Group":"batch","Version":"v1","Kind":"Job"}]}"#,
        ))
        .unwrap();
        assert_eq!(
            state.deployed_kinds,
            vec![DeployedKind::new("batch", "v1", "Job")]
        );
    }

    #[test]
    fn test_invalid_annotation_is_error() {
        assert!(CompositeState::from_annotations(&annotations("not json")).is_err());
    }

    #[test]
    fn test_annotation_round_trip() {
        let state = CompositeState {
            deployed_kinds: vec![
                DeployedKind::new("apps", "v1", "Deployment"),
                DeployedKind::new("", "v1", "ConfigMap"),
            ],
        };
        let value = state.to_annotation_value().unwrap();
        assert_eq!(
            CompositeState::from_annotations(&annotations(&value)).unwrap(),
            state
        );
    }

    #[test]
    fn test_ensure_kinds_adds_and_replaces_versions() {
        let mut state = CompositeState {
            deployed_kinds: vec![DeployedKind::new("batch", "v1beta1", "CronJob")],
        };

        assert!(state.ensure_kinds(&[
            DeployedKind::new("batch", "v1", "CronJob"),
            DeployedKind::new("apps", "v1", "Deployment"),
        ]));
        assert_eq!(
            state.deployed_kinds,
            vec![
                DeployedKind::new("batch", "v1", "CronJob"),
                DeployedKind::new("apps", "v1", "Deployment"),
            ]
        );

        assert!(!state.ensure_kinds(&[DeployedKind::new("apps", "v1", "Deployment")]));
    }

    #[test]
    fn test_merge_kind_keeps_most_stable_version() {
        let mut kinds = Vec::new();
        merge_kind(&mut kinds, DeployedKind::new("batch", "v1beta1", "CronJob"));
        merge_kind(&mut kinds, DeployedKind::new("batch", "v1", "CronJob"));
        merge_kind(&mut kinds, DeployedKind::new("batch", "v2alpha1", "CronJob"));
        assert_eq!(kinds, vec![DeployedKind::new("batch", "v1", "CronJob")]);
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("v1", "v1beta1"), Ordering::Greater);
        assert_eq!(compare_versions("v1beta2", "v1beta1"), Ordering::Greater);
        assert_eq!(compare_versions("v2alpha1", "v1beta1"), Ordering::Less);
        assert_eq!(compare_versions("v2", "v1"), Ordering::Greater);
        assert_eq!(compare_versions("v1", "v1"), Ordering::Equal);
        assert_eq!(compare_versions("custom", "v1alpha1"), Ordering::Less);
    }

    #[test]
    fn test_from_api_version() {
        assert_eq!(
            DeployedKind::from_api_version("apps/v1", "Deployment"),
            DeployedKind::new("apps", "v1", "Deployment")
        );
        assert_eq!(
            DeployedKind::from_api_version("v1", "Secret"),
            DeployedKind::new("", "v1", "Secret")
        );
        assert_eq!(DeployedKind::new("", "v1", "Secret").api_version(), "v1");
    }
}
