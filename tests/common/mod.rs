//! Common test utilities
//!
//! In-memory stand-ins for the cluster, the state store, the admin database
//! and the message broker, so reconcile and provisioning passes can run
//! without any external system.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject, ObjectMeta, TypeMeta};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use taskcluster_operator::composite::{ClusterApi, DeployedKind, ParentRef, ResolvedKind};
use taskcluster_operator::provisioner::{
    BrokerAdmin, DatabaseConnector, DatabaseSession, Permissions,
};
use taskcluster_operator::state::{PersistedState, StateError, StateStore};

static RUSTLS_INIT: Once = Once::new();

/// Initialize rustls crypto provider for tests that open TLS-capable clients
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

type ObjectKey = (String, String, Option<String>, String);

/// One call observed by [`FakeCluster`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    Apply(String),
    /// Listing of a kind, by kind name.
    List(String),
    Delete(String),
    PatchParent,
}

#[derive(Debug, Default)]
struct ClusterInner {
    objects: BTreeMap<ObjectKey, DynamicObject>,
    next_uid: u64,
    events: Vec<ClusterEvent>,
    failing_applies: HashSet<String>,
    fail_parent_patch: bool,
    parent_annotations: BTreeMap<String, String>,
}

/// In-memory [`ClusterApi`] serving a fixed set of kinds.
#[derive(Debug)]
pub struct FakeCluster {
    served: Mutex<Vec<(DeployedKind, bool)>>,
    inner: Mutex<ClusterInner>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCluster {
    /// Serves `v1` ConfigMaps, Services and Secrets, `apps/v1` Deployments,
    /// `batch/v1` Jobs and cluster scoped `rbac.authorization.k8s.io/v1` ClusterRoles.
    pub fn new() -> Self {
        Self {
            served: Mutex::new(vec![
                (DeployedKind::new("", "v1", "ConfigMap"), true),
                (DeployedKind::new("", "v1", "Service"), true),
                (DeployedKind::new("", "v1", "Secret"), true),
                (DeployedKind::new("apps", "v1", "Deployment"), true),
                (DeployedKind::new("batch", "v1", "Job"), true),
                (
                    DeployedKind::new("rbac.authorization.k8s.io", "v1", "ClusterRole"),
                    false,
                ),
            ]),
            inner: Mutex::new(ClusterInner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClusterInner> {
        self.inner.lock().unwrap()
    }

    /// Stop serving every version of the group and kind of `kind`.
    pub fn stop_serving(&self, kind: &DeployedKind) {
        self.served
            .lock()
            .unwrap()
            .retain(|(served, _)| !served.same_group_kind(kind));
    }

    fn served_kind(&self, matches: impl Fn(&DeployedKind) -> bool) -> Option<ResolvedKind> {
        self.served
            .lock()
            .unwrap()
            .iter()
            .find(|(served, _)| matches(served))
            .map(|(served, namespaced)| ResolvedKind {
                kind: served.clone(),
                resource: ApiResource::from_gvk(&served.to_gvk()),
                namespaced: *namespaced,
            })
    }

    /// Make every apply of an object named `name` fail.
    pub fn fail_apply_of(&self, name: &str) {
        self.lock().failing_applies.insert(name.to_string());
    }

    pub fn heal(&self) {
        let mut inner = self.lock();
        inner.failing_applies.clear();
        inner.fail_parent_patch = false;
    }

    pub fn fail_parent_patches(&self) {
        self.lock().fail_parent_patch = true;
    }

    /// Put an object into the cluster directly, as another controller would.
    pub fn seed(&self, object: DynamicObject) {
        let mut inner = self.lock();
        inner.next_uid += 1;
        let mut object = object;
        object.metadata.uid = Some(format!("seeded-{}", inner.next_uid));
        let key = key_of(&object);
        inner.objects.insert(key, object);
    }

    pub fn names_of(&self, kind: &str) -> Vec<String> {
        self.lock()
            .objects
            .iter()
            .filter(|((_, k, _, _), _)| k == kind)
            .map(|((_, _, _, name), _)| name.clone())
            .collect()
    }

    pub fn get(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<DynamicObject> {
        self.lock()
            .objects
            .iter()
            .find(|((_, k, ns, n), _)| k == kind && ns.as_deref() == namespace && n == name)
            .map(|(_, object)| object.clone())
    }

    pub fn events(&self) -> Vec<ClusterEvent> {
        self.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.lock().events.clear();
    }

    pub fn parent_annotations(&self) -> BTreeMap<String, String> {
        self.lock().parent_annotations.clone()
    }
}

fn key_of(object: &DynamicObject) -> ObjectKey {
    let (api_version, kind) = object
        .types
        .as_ref()
        .map(|t| (t.api_version.clone(), t.kind.clone()))
        .unwrap_or_default();
    let group = api_version
        .split_once('/')
        .map(|(group, _)| group.to_string())
        .unwrap_or_default();
    (
        group,
        kind,
        object.metadata.namespace.clone(),
        object.metadata.name.clone().unwrap_or_default(),
    )
}

fn matches_selector(object: &DynamicObject, selector: &str) -> bool {
    let Some((key, value)) = selector.split_once('=') else {
        return true;
    };
    object
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .is_some_and(|v| v == value)
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn resolve(&self, kind: &DeployedKind) -> Result<Option<ResolvedKind>> {
        Ok(self.served_kind(|served| served == kind))
    }

    async fn resolve_group_kind(&self, kind: &DeployedKind) -> Result<Option<ResolvedKind>> {
        Ok(self.served_kind(|served| served.same_group_kind(kind)))
    }

    async fn apply(
        &self,
        kind: &ResolvedKind,
        object: &DynamicObject,
        _field_manager: &str,
    ) -> Result<DynamicObject> {
        let mut inner = self.lock();
        let name = object.metadata.name.clone().unwrap_or_default();
        inner.events.push(ClusterEvent::Apply(name.clone()));
        if inner.failing_applies.contains(&name) {
            return Err(anyhow!("admission webhook rejected {} {}", kind.kind.kind, name));
        }

        let key = key_of(object);
        let uid = match inner.objects.get(&key) {
            Some(existing) => existing.metadata.uid.clone(),
            None => {
                inner.next_uid += 1;
                Some(format!("uid-{}", inner.next_uid))
            }
        };
        let mut live = object.clone();
        live.metadata.uid = uid;
        inner.objects.insert(key, live.clone());
        Ok(live)
    }

    async fn list(&self, kind: &ResolvedKind, label_selector: &str) -> Result<Vec<DynamicObject>> {
        let mut inner = self.lock();
        inner.events.push(ClusterEvent::List(kind.kind.kind.clone()));
        Ok(inner
            .objects
            .iter()
            .filter(|((group, k, _, _), _)| *group == kind.kind.group && *k == kind.kind.kind)
            .map(|(_, object)| object.clone())
            .filter(|object| matches_selector(object, label_selector))
            .collect())
    }

    async fn delete(&self, kind: &ResolvedKind, namespace: Option<&str>, name: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.events.push(ClusterEvent::Delete(name.to_string()));
        let key = (
            kind.kind.group.clone(),
            kind.kind.kind.clone(),
            namespace.map(str::to_string),
            name.to_string(),
        );
        inner.objects.remove(&key);
        Ok(())
    }

    async fn patch_parent_annotations(
        &self,
        _parent: &ParentRef,
        annotations: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner.events.push(ClusterEvent::PatchParent);
        if inner.fail_parent_patch {
            return Err(anyhow!("parent patch rejected"));
        }
        inner.parent_annotations.extend(annotations.clone());
        Ok(())
    }
}

/// A parent in namespace `tc` with uid `parent-uid`.
pub fn parent() -> ParentRef {
    ParentRef {
        resource: ApiResource {
            group: "taskcluster.wellplayed.games".to_string(),
            version: "v1beta1".to_string(),
            api_version: "taskcluster.wellplayed.games/v1beta1".to_string(),
            kind: "Instance".to_string(),
            plural: "instances".to_string(),
        },
        name: "prod".to_string(),
        namespace: Some("tc".to_string()),
        uid: "parent-uid".to_string(),
        annotations: BTreeMap::new(),
    }
}

pub fn object(api_version: &str, kind: &str, name: &str) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        }),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        data: serde_json::json!({}),
    }
}

pub fn config_map(name: &str) -> DynamicObject {
    object("v1", "ConfigMap", name)
}

// ---------------------------------------------------------------------------
// State store
// ---------------------------------------------------------------------------

/// [`StateStore`] holding the document in memory.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<PersistedState>>,
    invalid: bool,
    saves: Mutex<usize>,
}

impl MemoryStateStore {
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            ..Self::default()
        }
    }

    /// A store whose document cannot be decoded.
    pub fn invalid() -> Self {
        Self {
            invalid: true,
            ..Self::default()
        }
    }

    pub fn stored(&self) -> Option<PersistedState> {
        self.state.lock().unwrap().clone()
    }

    pub fn saves(&self) -> usize {
        *self.saves.lock().unwrap()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<PersistedState, StateError> {
        if self.invalid {
            let error = serde_json::from_str::<PersistedState>("{").unwrap_err();
            return Err(StateError::Invalid {
                location: "memory".to_string(),
                error,
            });
        }
        Ok(self.state.lock().unwrap().clone().unwrap_or_default())
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StateError> {
        *self.state.lock().unwrap() = Some(state.clone());
        *self.saves.lock().unwrap() += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct DatabaseInner {
    pub roles: BTreeMap<String, String>,
    pub connects: usize,
    pub closes: usize,
    pub creates: usize,
    pub failing_role: Option<String>,
    pub stall: Option<Duration>,
}

/// [`DatabaseConnector`] keeping roles and passwords in memory.
#[derive(Debug, Clone, Default)]
pub struct FakeDatabase {
    pub inner: Arc<Mutex<DatabaseInner>>,
}

impl FakeDatabase {
    pub fn password_of(&self, role: &str) -> Option<String> {
        self.inner.lock().unwrap().roles.get(role).cloned()
    }

    pub fn set_password(&self, role: &str, password: &str) {
        self.inner
            .lock()
            .unwrap()
            .roles
            .insert(role.to_string(), password.to_string());
    }

    pub fn fail_role(&self, role: &str) {
        self.inner.lock().unwrap().failing_role = Some(role.to_string());
    }

    /// Make every connect hang for `delay`.
    pub fn stall_connects(&self, delay: Duration) {
        self.inner.lock().unwrap().stall = Some(delay);
    }

    pub fn role_count(&self) -> usize {
        self.inner.lock().unwrap().roles.len()
    }

    pub fn connects(&self) -> usize {
        self.inner.lock().unwrap().connects
    }

    pub fn closes(&self) -> usize {
        self.inner.lock().unwrap().closes
    }

    pub fn creates(&self) -> usize {
        self.inner.lock().unwrap().creates
    }
}

#[derive(Debug)]
struct FakeSession {
    inner: Arc<Mutex<DatabaseInner>>,
}

impl FakeSession {
    fn check(&self, role: &str) -> Result<()> {
        if self.inner.lock().unwrap().failing_role.as_deref() == Some(role) {
            return Err(anyhow!("permission denied to alter role {role}"));
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseConnector for FakeDatabase {
    async fn connect(&self) -> Result<Box<dyn DatabaseSession>> {
        let stall = self.inner.lock().unwrap().stall;
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        self.inner.lock().unwrap().connects += 1;
        Ok(Box::new(FakeSession {
            inner: Arc::clone(&self.inner),
        }))
    }
}

#[async_trait]
impl DatabaseSession for FakeSession {
    async fn role_exists(&mut self, role: &str) -> Result<bool> {
        Ok(self.inner.lock().unwrap().roles.contains_key(role))
    }

    async fn create_role(&mut self, role: &str, password: &str) -> Result<()> {
        self.check(role)?;
        let mut inner = self.inner.lock().unwrap();
        if inner.roles.contains_key(role) {
            return Err(anyhow!("role \"{role}\" already exists"));
        }
        inner.creates += 1;
        inner.roles.insert(role.to_string(), password.to_string());
        Ok(())
    }

    async fn alter_role_password(&mut self, role: &str, password: &str) -> Result<()> {
        self.check(role)?;
        self.inner
            .lock()
            .unwrap()
            .roles
            .insert(role.to_string(), password.to_string());
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.inner.lock().unwrap().closes += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct BrokerInner {
    vhosts: BTreeSet<String>,
    users: BTreeMap<String, String>,
    permissions: BTreeMap<(String, String), Permissions>,
    failing_user: Option<String>,
    unavailable: bool,
}

/// [`BrokerAdmin`] keeping vhosts, users and grants in memory.
#[derive(Debug, Default)]
pub struct FakeBroker {
    inner: Mutex<BrokerInner>,
}

impl FakeBroker {
    pub fn fail_user(&self, username: &str) {
        self.inner.lock().unwrap().failing_user = Some(username.to_string());
    }

    pub fn heal(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failing_user = None;
        inner.unavailable = false;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unwrap().unavailable = unavailable;
    }

    pub fn has_vhost(&self, vhost: &str) -> bool {
        self.inner.lock().unwrap().vhosts.contains(vhost)
    }

    pub fn password_of(&self, username: &str) -> Option<String> {
        self.inner.lock().unwrap().users.get(username).cloned()
    }

    pub fn permissions_of(&self, vhost: &str, username: &str) -> Option<Permissions> {
        self.inner
            .lock()
            .unwrap()
            .permissions
            .get(&(vhost.to_string(), username.to_string()))
            .cloned()
    }

    pub fn user_count(&self) -> usize {
        self.inner.lock().unwrap().users.len()
    }
}

#[async_trait]
impl BrokerAdmin for FakeBroker {
    async fn ensure_vhost(&self, vhost: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.unavailable {
            return Err(anyhow!("connection refused"));
        }
        inner.vhosts.insert(vhost.to_string());
        Ok(())
    }

    async fn put_user(&self, username: &str, password: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.unavailable || inner.failing_user.as_deref() == Some(username) {
            return Err(anyhow!("/api/users/{username} returned 503"));
        }
        inner.users.insert(username.to_string(), password.to_string());
        Ok(())
    }

    async fn grant_permissions(
        &self,
        vhost: &str,
        username: &str,
        permissions: &Permissions,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.vhosts.contains(vhost) {
            return Err(anyhow!("vhost {vhost} does not exist"));
        }
        inner
            .permissions
            .insert((vhost.to_string(), username.to_string()), permissions.clone());
        Ok(())
    }
}
